//! CLI commands that talk to the engine directly, without the HTTP server.

use anyhow::{bail, Result};
use std::io::Write;
use tokio::sync::mpsc::unbounded_channel;

use crate::agent::{AgentEvent, TurnRequest};
use crate::config::Config;
use crate::context::AppContext;
use crate::models::Role;

/// `hae retrieve`: print the parent documents for a query.
pub async fn run_retrieve(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let k = k.unwrap_or(config.retrieval.broad_k);
    let ctx = AppContext::from_config(config.clone()).await?;
    let documents = ctx.retriever.retrieve(query, k).await?;

    if documents.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, doc) in documents.iter().enumerate() {
        let source = doc.metadata.get("source").map(String::as_str).unwrap_or("-");
        println!("{}. {}  source: {}", i + 1, doc.id, source);
        let snippet: String = doc.text.chars().take(240).collect();
        println!("    > {}", snippet.replace('\n', " "));
        println!();
    }
    Ok(())
}

/// `hae ask`: run one agent turn, streaming tokens to stdout.
pub async fn run_ask(config: &Config, question: &str, user_id: &str, conversation_id: &str) -> Result<()> {
    let ctx = AppContext::from_config(config.clone()).await?;
    let request = TurnRequest {
        user_id: user_id.to_string(),
        conversation_id: conversation_id.to_string(),
        input: question.to_string(),
    };

    let (tx, mut rx) = unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Token(text) => {
                    print!("{}", text);
                    let _ = stdout.flush();
                }
                AgentEvent::ToolStart { name, input, .. } => {
                    eprintln!("[{}] {}", name, input);
                }
                AgentEvent::ToolEnd {
                    name, failed: true, ..
                } => {
                    eprintln!("[{}] failed", name);
                }
                _ => {}
            }
        }
    });

    let result = ctx.agent.run_turn(&request, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;
    println!();
    result?;
    Ok(())
}

/// `hae history`: list a user's conversations, or print one of them.
pub async fn run_history(config: &Config, user_id: &str, conversation_id: Option<&str>) -> Result<()> {
    let ctx = AppContext::from_config(config.clone()).await?;
    match conversation_id {
        Some(conversation_id) => {
            let turns = ctx.history.read(user_id, conversation_id).await?;
            for turn in turns {
                let who = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                println!("{}: {}", who, turn.content);
            }
        }
        None => {
            let keys = ctx.history.list_conversations(user_id).await?;
            println!("{} conversation(s)", keys.len());
            for key in keys {
                println!("  {}", key);
            }
        }
    }
    Ok(())
}

/// `hae summarize`: one summary line per transcript argument.
pub async fn run_summarize(config: &Config, histories: &[String]) -> Result<()> {
    let ctx = AppContext::from_config(config.clone()).await?;
    let mut failed = 0;
    for (i, result) in ctx.summarizer.summarize_all(histories).await.into_iter().enumerate() {
        match result {
            Ok(summary) => println!("{}", summary),
            Err(e) => {
                eprintln!("summary {} failed: {}", i + 1, e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} summaries failed", failed, histories.len());
    }
    Ok(())
}
