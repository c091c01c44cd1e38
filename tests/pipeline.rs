mod common;

use answer_engine::config::{Config, IngestConfig};
use answer_engine::context::AppContext;
use answer_engine::ingest::{document_id, load_corpus};
use answer_engine::store::{DocumentStore, FsDocumentStore};
use std::fs;
use tempfile::TempDir;

fn durable_config(root: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.db.path = root.path().join("data/hae.sqlite");
    config.storage.vector = "sqlite".into();
    config.storage.documents = "filesystem".into();
    config.storage.documents_dir = root.path().join("data/kv");
    config.storage.history = "sqlite".into();
    config.embedding.dims = Some(256);
    config.chunking.parent.chunk_size = 200;
    config.chunking.parent.chunk_overlap = 20;
    config.chunking.child.chunk_size = 60;
    config.chunking.child.chunk_overlap = 10;
    config.ingest = IngestConfig {
        root: root.path().join("corpus"),
        ..IngestConfig::default()
    };
    config
}

fn write_corpus(root: &TempDir) {
    let corpus = root.path().join("corpus");
    fs::create_dir_all(corpus.join("survivors")).unwrap();
    fs::write(
        corpus.join("survivors/rita.txt"),
        format!("[00:00:05] {}\n\n[00:01:10] {}", common::RITA, common::LIBERATION),
    )
    .unwrap();
    fs::write(corpus.join("trains.txt"), common::TRAINS).unwrap();
    fs::write(corpus.join("README.md"), "not part of the corpus").unwrap();
}

#[tokio::test]
async fn test_ingest_and_retrieve_with_durable_backends() {
    let root = TempDir::new().unwrap();
    write_corpus(&root);
    let config = durable_config(&root);

    let ctx = AppContext::from_config(config.clone()).await.unwrap();
    let corpus = load_corpus(&config.ingest, None).unwrap();
    assert_eq!(corpus.documents.len(), 2);
    let report = ctx.retriever.add_documents(corpus.documents).await;
    assert!(report.is_clean());
    assert_eq!(report.documents, 2);
    assert!(report.children_indexed >= report.parents_stored);

    let documents = ctx.retriever.retrieve("Where was Rita born", 3).await.unwrap();
    assert!(!documents.is_empty() && documents.len() <= 3);
    assert!(documents[0].text.contains("Kraków"));
    assert!(!documents[0].text.contains("[00:00:05]"));
    assert_eq!(documents[0].metadata["source"], "survivors/rita.txt");

    // Every returned parent is in the document store.
    let store = FsDocumentStore::new(config.storage.documents_dir.clone()).unwrap();
    for doc in &documents {
        assert_eq!(store.get(&doc.id).await.unwrap().as_ref(), Some(doc));
    }
}

#[tokio::test]
async fn test_reingest_does_not_duplicate_results() {
    let root = TempDir::new().unwrap();
    write_corpus(&root);
    let config = durable_config(&root);

    let ctx = AppContext::from_config(config.clone()).await.unwrap();
    for _ in 0..2 {
        let corpus = load_corpus(&config.ingest, None).unwrap();
        assert!(ctx.retriever.add_documents(corpus.documents).await.is_clean());
    }

    let documents = ctx.retriever.retrieve("trains station dawn", 10).await.unwrap();
    let mut ids: Vec<_> = documents.iter().map(|d| d.id.clone()).collect();
    let before = ids.len();
    ids.dedup();
    assert_eq!(ids.len(), before);
    let trains_parent = format!("{}-0", document_id("trains.txt"));
    assert_eq!(ids.iter().filter(|id| **id == trains_parent).count(), 1);
}

#[tokio::test]
async fn test_shortened_file_drops_old_parents() {
    let root = TempDir::new().unwrap();
    write_corpus(&root);
    let config = durable_config(&root);
    let rita = root.path().join("corpus/survivors/rita.txt");
    let long: String = (0..12)
        .map(|i| format!("Camp record {} lists the barracks and the roll call. ", i))
        .collect();
    fs::write(&rita, format!("{} {}", common::RITA, long)).unwrap();

    let ctx = AppContext::from_config(config.clone()).await.unwrap();
    let report = ctx
        .retriever
        .add_documents(load_corpus(&config.ingest, None).unwrap().documents)
        .await;
    assert!(report.is_clean());

    let rita_id = document_id("survivors/rita.txt");
    let store = FsDocumentStore::new(config.storage.documents_dir.clone()).unwrap();
    let rita_parents = |keys: Vec<String>| -> Vec<String> {
        keys.into_iter()
            .filter(|k| k.starts_with(&format!("{}-", rita_id)))
            .collect()
    };
    assert!(rita_parents(store.keys().await.unwrap()).len() > 1);

    fs::write(&rita, common::RITA).unwrap();
    let report = ctx
        .retriever
        .add_documents(load_corpus(&config.ingest, None).unwrap().documents)
        .await;
    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(report.parents_removed > 0);
    assert_eq!(
        rita_parents(store.keys().await.unwrap()),
        vec![format!("{}-0", rita_id)]
    );

    let documents = ctx.retriever.retrieve("barracks roll call camp record", 10).await.unwrap();
    assert!(documents.iter().all(|d| !d.text.contains("barracks")));
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let root = TempDir::new().unwrap();
    write_corpus(&root);
    let config = durable_config(&root);

    {
        let ctx = AppContext::from_config(config.clone()).await.unwrap();
        ctx.history.append_exchange("u1", "c1", "Hi", "Hello").await.unwrap();
        ctx.shares.set_public("c1", "u1").await.unwrap();
    }

    let ctx = AppContext::from_config(config).await.unwrap();
    assert_eq!(ctx.history.read("u1", "c1").await.unwrap().len(), 2);
    assert!(ctx.shares.is_shared_by("c1", "u1").await.unwrap());
}
