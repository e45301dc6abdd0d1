use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use docqa::config::Config;
use docqa::embedding::{create_embedder, HashingEmbedder};
use docqa::index::IndexStore;

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.documents.dir = root.join("documents");
    config.index.path = root.join("index");
    config.embedding.provider = "hashing".to_string();
    fs::create_dir_all(&config.documents.dir).unwrap();
    config
}

fn store(config: &Config) -> IndexStore {
    IndexStore::new(config, create_embedder(&config.embedding).unwrap())
}

fn write_doc(config: &Config, name: &str, body: &str) {
    fs::write(config.documents.dir.join(name), body).unwrap();
}

#[tokio::test]
async fn test_cached_index_is_reused_until_corpus_changes() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_doc(&config, "cats.txt", "Cats are mammals.");
    let store = store(&config);

    let first = store.get_or_rebuild().await.unwrap();
    let second = store.get_or_rebuild().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.rebuild_count(), 1);

    write_doc(&config, "cats.txt", "Cats are mammals!");
    let third = store.get_or_rebuild().await.unwrap();
    assert!(!Arc::ptr_eq(&second, &third));
    assert_ne!(second.fingerprint(), third.fingerprint());
    assert_eq!(store.rebuild_count(), 2);

    // holders of the old index keep a complete, usable generation
    assert_eq!(first.len(), 1);
    assert_eq!(first.entries()[0].passage.text, "Cats are mammals.");
    assert_eq!(third.entries()[0].passage.text, "Cats are mammals!");
}

#[tokio::test]
async fn test_removed_file_drops_its_passages() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_doc(&config, "cats.txt", "Cats are mammals.");
    write_doc(&config, "dogs.txt", "Dogs are mammals too.");
    let store = store(&config);
    assert_eq!(store.get_or_rebuild().await.unwrap().len(), 2);

    fs::remove_file(config.documents.dir.join("dogs.txt")).unwrap();
    let index = store.get_or_rebuild().await.unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.entries()[0].passage.source, "cats.txt");
}

#[tokio::test]
async fn test_missing_documents_dir_builds_empty_index() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.documents.dir = tmp.path().join("not-yet");
    let store = store(&config);

    let index = store.get_or_rebuild().await.unwrap();
    assert!(index.is_empty());
    assert!(config.documents.dir.is_dir());
    assert!(store
        .retrieve(&index, "anything", 5)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_retrieve_ranks_relevant_passage_first() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_doc(&config, "cats.txt", "Cats are small mammals that purr.");
    write_doc(
        &config,
        "rust.txt",
        "The borrow checker enforces ownership rules at compile time.",
    );
    write_doc(&config, "sea.txt", "Oceans cover most of the planet surface.");
    let store = store(&config);
    let index = store.get_or_rebuild().await.unwrap();

    let hits = store.retrieve(&index, "what do cats do", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].passage.source, "cats.txt");
    assert!(hits[0].score >= hits[1].score);

    let all = store.retrieve(&index, "cats", 10).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_persisted_index_is_reused_across_restarts() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_doc(&config, "cats.txt", "Cats are mammals.");

    let built = store(&config).get_or_rebuild().await.unwrap();
    assert!(config.index_db_path().exists());

    let restarted = store(&config);
    let loaded = restarted.get_or_rebuild().await.unwrap();
    assert_eq!(restarted.rebuild_count(), 0);
    assert_eq!(loaded.fingerprint(), built.fingerprint());
    assert_eq!(loaded.len(), built.len());
    assert_eq!(loaded.entries()[0].embedding, built.entries()[0].embedding);

    let forced = store(&config).with_reuse_persisted(false);
    forced.get_or_rebuild().await.unwrap();
    assert_eq!(forced.rebuild_count(), 1);
}

#[tokio::test]
async fn test_persisted_index_ignored_when_stale() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_doc(&config, "cats.txt", "Cats are mammals.");
    store(&config).get_or_rebuild().await.unwrap();

    // documents changed while the process was down
    write_doc(&config, "dogs.txt", "Dogs are mammals too.");
    let restarted = store(&config);
    assert_eq!(restarted.get_or_rebuild().await.unwrap().len(), 2);
    assert_eq!(restarted.rebuild_count(), 1);

    // different embedding model
    let other_model = IndexStore::new(&config, Arc::new(HashingEmbedder::new(64)));
    let index = other_model.get_or_rebuild().await.unwrap();
    assert_eq!(other_model.rebuild_count(), 1);
    assert_eq!(index.dims(), 64);
}

#[tokio::test]
async fn test_persisted_index_ignored_when_chunking_changes() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    let body = "Cats are small carnivorous mammals that people keep as pets. ".repeat(11);
    write_doc(&config, "cats.txt", &body);

    let built = store(&config).get_or_rebuild().await.unwrap();
    assert_eq!(built.len(), 1);

    config.chunking.chunk_chars = 50;
    config.chunking.overlap_chars = 10;
    let restarted = store(&config);
    let index = restarted.get_or_rebuild().await.unwrap();

    assert_eq!(restarted.rebuild_count(), 1);
    assert_eq!(index.fingerprint(), built.fingerprint());
    assert!(index.len() > 1);
    assert!(index
        .entries()
        .iter()
        .all(|e| e.passage.text.chars().count() <= 50));
    assert_eq!(index.chunking().chunk_chars, 50);

    // the regenerated index is what the next restart picks up
    let again = store(&config);
    assert_eq!(again.get_or_rebuild().await.unwrap().len(), index.len());
    assert_eq!(again.rebuild_count(), 0);
}

#[tokio::test]
async fn test_status_reflects_held_index() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_doc(&config, "cats.txt", "Cats are mammals.");
    let store = store(&config);

    assert!(store.status().await.is_none());
    let index = store.get_or_rebuild().await.unwrap();
    let status = store.status().await.unwrap();
    assert_eq!(status.passages, 1);
    assert_eq!(status.fingerprint, index.fingerprint());
    assert_eq!(status.model, "hashing-256");
    assert_eq!(status.rebuilds, 1);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_rebuild() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    write_doc(&config, "cats.txt", "Cats are mammals.");
    let store = Arc::new(store(&config));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get_or_rebuild().await.unwrap() })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().len(), 1);
    }
    assert_eq!(store.rebuild_count(), 1);
}
