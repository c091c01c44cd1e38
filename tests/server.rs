mod common;

use common::*;
use reqwest::StatusCode;
use serde_json::{json, Value};

fn chat_body(input: &str, user: &str, conversation: &str) -> Value {
    json!({
        "input": input,
        "configurable": { "userId": user, "conversationId": conversation }
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let base = spawn_server(seeded_context().await).await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_authenticated_routes_reject_bad_tokens() {
    let base = spawn_server(seeded_context().await).await;
    let client = reqwest::Client::new();
    let url = format!("{}/chat_history?user_id=u1&conversation_id=c1", base);

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "forbidden");

    let expired = format!("Bearer {}", sign_token(SIGNER_PRIVATE, now() - 3600));
    let foreign = format!("Bearer {}", sign_token(OTHER_PRIVATE, now() + 600));
    for header in [expired.as_str(), foreign.as_str(), "Bearer nonsense", "Basic dTpw"] {
        let resp = client
            .get(&url)
            .header("Authorization", header)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "header {}", header);
    }

    let resp = client
        .get(&url)
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_stream_events_rita_scenario() {
    let base = spawn_server(seeded_context().await).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/chat/stream_events", base))
        .header("Authorization", bearer())
        .json(&chat_body("Where was Rita born?", "u1", "c1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let events = parse_sse(&resp.text().await.unwrap());
    assert_eq!(events.first().map(|e| e.0.as_str()), Some("metadata"));
    assert_eq!(events.last().map(|e| e.0.as_str()), Some("end"));

    let payloads: Vec<Value> = events
        .iter()
        .filter(|(e, _)| e == "data")
        .map(|(_, d)| serde_json::from_str(d).unwrap())
        .collect();
    let kinds: Vec<&str> = payloads.iter().map(|p| p["event"].as_str().unwrap()).collect();
    assert!(kinds.contains(&"on_tool_start"));
    assert!(kinds.contains(&"on_tool_end"));
    assert_eq!(kinds.last(), Some(&"on_chain_end"));

    let tool_end = payloads.iter().find(|p| p["event"] == "on_tool_end").unwrap();
    assert_eq!(tool_end["name"], "personal_testimony_retriever");
    assert!(tool_end["data"]["output"].as_str().unwrap().contains("Kraków"));

    let streamed: String = payloads
        .iter()
        .filter(|p| p["event"] == "on_chat_model_stream")
        .map(|p| p["data"]["chunk"]["content"].as_str().unwrap().to_string())
        .collect();
    assert!(streamed.contains("Kraków"));
    let final_answer = payloads.last().unwrap()["data"]["output"].as_str().unwrap();
    assert_eq!(streamed, final_answer);

    // The exchange was persisted, oldest first.
    let history: Vec<String> = client
        .get(format!("{}/chat_history?user_id=u1&conversation_id=c1", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    let first: Value = serde_json::from_str(&history[0]).unwrap();
    let second: Value = serde_json::from_str(&history[1]).unwrap();
    assert_eq!(first["type"], "human");
    assert_eq!(first["data"]["content"], "Where was Rita born?");
    assert_eq!(second["type"], "ai");
    assert!(second["data"]["content"].as_str().unwrap().contains("Kraków"));
}

#[tokio::test]
async fn test_invoke_and_user_history() {
    let base = spawn_server(seeded_context().await).await;
    let client = reqwest::Client::new();

    for conversation in ["c1", "c2"] {
        let resp = client
            .post(format!("{}/chat/invoke", base))
            .header("Authorization", bearer())
            .json(&json!({
                "input": { "input": "When did liberation come?" },
                "config": { "configurable": { "userId": "u1", "conversationId": conversation } }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert!(body["output"].as_str().unwrap().starts_with("According to the testimony"));
    }

    let keys: Vec<String> = client
        .get(format!("{}/user_history?user_id=u1", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(keys, vec!["u1/c1".to_string(), "u1/c2".to_string()]);

    let chats: Value = client
        .get(format!("{}/user_history?user_id=u1&return_chats=true", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chats["u1/c2"].as_array().unwrap().len(), 2);

    let empty: Vec<String> = client
        .get(format!("{}/user_history?user_id=u2", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_invalid_identifiers_are_bad_requests() {
    let base = spawn_server(seeded_context().await).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/chat_history?user_id=u*&conversation_id=c1", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/chat/stream_events", base))
        .header("Authorization", bearer())
        .json(&chat_body("hi", "u1", "../c1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{}/chat/invoke", base))
        .header("Authorization", bearer())
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_share_scenario() {
    let base = spawn_server(seeded_context().await).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/chat/invoke", base))
        .header("Authorization", bearer())
        .json(&chat_body("Where was Rita born?", "u1", "c1"))
        .send()
        .await
        .unwrap();

    let public: Value = reqwest::get(format!("{}/share/get_public?conversation_id=c1", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(public["public"], false);

    let shared_url = format!("{}/share/get_history?user_id=u1&conversation_id=c1", base);
    assert_eq!(
        reqwest::get(&shared_url).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );

    let resp = client
        .post(format!("{}/share/set_public?conversation_id=c1&user_id=u1", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let state: Value = resp.json().await.unwrap();
    assert_eq!(state["public"], true);

    let public: Value = reqwest::get(format!("{}/share/get_public?conversation_id=c1", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(public, json!({ "public": true, "user_id": "u1" }));

    let shared: Vec<String> = reqwest::get(&shared_url).await.unwrap().json().await.unwrap();
    assert_eq!(shared.len(), 2);

    // Another user cannot read it through the share link.
    assert_eq!(
        reqwest::get(format!("{}/share/get_history?user_id=u2&conversation_id=c1", base))
            .await
            .unwrap()
            .status(),
        StatusCode::NOT_FOUND
    );

    client
        .post(format!("{}/share/set_private?conversation_id=c1&user_id=u1", base))
        .header("Authorization", bearer())
        .send()
        .await
        .unwrap();
    assert_eq!(
        reqwest::get(&shared_url).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );

    let resp = client
        .post(format!("{}/share/set_public?conversation_id=c1&user_id=u1", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_summary_keeps_order() {
    let base = spawn_server(seeded_context().await).await;
    let histories = vec![
        "human: hi ai: hello".to_string(),
        "human: where was Rita born? ai: Kraków".to_string(),
        "human: bye".to_string(),
    ];
    let resp = reqwest::Client::new()
        .post(format!("{}/create_summary", base))
        .header("Authorization", bearer())
        .json(&json!({ "histories": histories }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let summaries: Vec<String> = resp.json().await.unwrap();
    assert_eq!(summaries.len(), 3);
    for (summary, history) in summaries.iter().zip(&histories) {
        assert!(summary.contains(history.as_str()));
    }
}

#[tokio::test]
async fn test_tool_failure_answers_with_incomplete_information() {
    let base = spawn_server(broken_retrieval_context()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/chat/stream_events", base))
        .header("Authorization", bearer())
        .json(&chat_body("Tell me about the ghetto", "u1", "c9"))
        .send()
        .await
        .unwrap();
    let events = parse_sse(&resp.text().await.unwrap());
    assert_eq!(events.last().map(|e| e.0.as_str()), Some("end"));

    let tool_end: Value = events
        .iter()
        .filter(|(e, _)| e == "data")
        .map(|(_, d)| serde_json::from_str::<Value>(d).unwrap())
        .find(|p| p["event"] == "on_tool_end")
        .unwrap();
    assert_eq!(tool_end["data"]["failed"], true);

    let resp = client
        .post(format!("{}/chat/invoke", base))
        .header("Authorization", bearer())
        .json(&chat_body("And the trains?", "u1", "c9"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["output"].as_str().unwrap().contains("incomplete"));
}
