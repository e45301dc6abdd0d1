use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use docqa::config::Config;
use docqa::conversation::InMemoryConversationStore;
use docqa::embedding::create_embedder;
use docqa::index::IndexStore;
use docqa::llm::{ChatMessage, ChatModel};
use docqa::pipeline::Pipeline;
use docqa::server::router;

/// Echoes the question back.
struct EchoModel;

#[async_trait]
impl ChatModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let question = messages[1]
            .content
            .rsplit("User question:\n")
            .next()
            .unwrap_or_default();
        Ok(format!("You asked: {}", question))
    }
}

async fn spawn_server(tmp: &TempDir) -> (String, Config) {
    let mut config = Config::default();
    config.documents.dir = tmp.path().join("documents");
    config.index.path = tmp.path().join("index");
    config.embedding.provider = "hashing".to_string();
    fs::create_dir_all(&config.documents.dir).unwrap();
    fs::write(config.documents.dir.join("cats.txt"), "Cats are mammals.").unwrap();

    let embedder = create_embedder(&config.embedding).unwrap();
    let pipeline = Pipeline::new(
        &config,
        Arc::new(IndexStore::new(&config, embedder)),
        Arc::new(InMemoryConversationStore::new()),
        Arc::new(EchoModel),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(pipeline));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), config)
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> Value {
    client
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_message_roundtrip_and_transcript() {
    let tmp = TempDir::new().unwrap();
    let (base, _config) = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let reply = post(
        &client,
        format!("{}/conversations/42/messages", base),
        json!({"text": "What are cats?"}),
    )
    .await;
    assert_eq!(reply["text"], "You asked: What are cats?");

    let transcript: Value = client
        .get(format!("{}/conversations/42/transcript", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(transcript["conversation_id"], 42);
    assert_eq!(
        transcript["transcript"],
        "User: What are cats?\nAssistant: You asked: What are cats?"
    );
    assert_eq!(transcript["turns"].as_array().unwrap().len(), 2);
    assert_eq!(transcript["turns"][0]["role"], "User");
}

#[tokio::test]
async fn test_non_text_message_gets_empty_query_prompt() {
    let tmp = TempDir::new().unwrap();
    let (base, config) = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let url = format!("{}/conversations/1/messages", base);
    let reply = post(&client, url.clone(), json!({"sticker": "cat.webp"})).await;
    assert_eq!(reply["text"], config.messages.empty_query);

    let reply = post(&client, url, json!({"text": "   "})).await;
    assert_eq!(reply["text"], config.messages.empty_query);
}

#[tokio::test]
async fn test_clear_and_start() {
    let tmp = TempDir::new().unwrap();
    let (base, config) = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    post(
        &client,
        format!("{}/conversations/-7/messages", base),
        json!({"text": "hello"}),
    )
    .await;
    let cleared = post(&client, format!("{}/conversations/-7/clear", base), json!({})).await;
    assert_eq!(cleared["text"], config.messages.cleared);

    let transcript: Value = client
        .get(format!("{}/conversations/-7/transcript", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(transcript["transcript"], "");

    let greeting = post(&client, format!("{}/conversations/-7/start", base), json!({})).await;
    assert_eq!(greeting["text"], config.messages.greeting);
}

#[tokio::test]
async fn test_health_and_index_status() {
    let tmp = TempDir::new().unwrap();
    let (base, _config) = spawn_server(&tmp).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let status: Value = client
        .get(format!("{}/index", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["loaded"], false);

    post(
        &client,
        format!("{}/conversations/1/messages", base),
        json!({"text": "What are cats?"}),
    )
    .await;
    let status: Value = client
        .get(format!("{}/index", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["loaded"], true);
    assert_eq!(status["passages"], 1);
    assert_eq!(status["rebuilds"], 1);
}
