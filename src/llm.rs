//! Chat-model access and prompt assembly.
//!
//! [`ChatModel`] is the seam the answer pipeline calls through. The shipped
//! implementation talks to any OpenAI-compatible `/chat/completions`
//! endpoint (OpenRouter by default). Each answer is a single call with no
//! retries; a failure surfaces to the caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{LlmConfig, PromptConfig};
use crate::index::ScoredPassage;

/// Placeholder context when retrieval finds nothing.
pub const NO_CONTEXT: &str = "(no context found)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A text-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Return the assistant reply for `messages`.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Build the two-message prompt for one turn.
///
/// The system message carries the configured instructions followed by the
/// retrieved passages separated by blank lines. The user message carries
/// the prior transcript and the new question.
pub fn build_messages(
    prompt: &PromptConfig,
    passages: &[ScoredPassage],
    history: &str,
    query: &str,
) -> Vec<ChatMessage> {
    let context = if passages.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        passages
            .iter()
            .map(|p| p.passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    vec![
        ChatMessage::system(format!(
            "{}\n\n{}\n{}",
            prompt.system, prompt.context_instruction, context
        )),
        ChatMessage::user(format!(
            "Conversation history (if any):\n{}\n\nUser question:\n{}",
            history, query
        )),
    ]
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions API.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
}

impl OpenAiCompatibleModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        if config.api_key.is_none() {
            tracing::warn!("no LLM API key configured; requests will be sent unauthenticated");
        }

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to call chat API at {}", self.url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Chat API returned {status}: {body}");
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("Failed to parse chat API response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("Chat API response contained no message content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Passage;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    fn scored(text: &str) -> ScoredPassage {
        ScoredPassage {
            passage: Passage {
                source: "a.txt".into(),
                page: None,
                chunk_index: 0,
                text: text.into(),
                hash: String::new(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn test_build_messages_layout() {
        let prompt = PromptConfig {
            system: "Be brief.".into(),
            context_instruction: "Use ONLY the following information from the documents:".into(),
        };
        let msgs = build_messages(
            &prompt,
            &[scored("Cats are mammals."), scored("Dogs bark.")],
            "User: hi\nAssistant: hello",
            "What are cats?",
        );
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(
            msgs[0].content,
            "Be brief.\n\nUse ONLY the following information from the documents:\nCats are mammals.\n\nDogs bark."
        );
        assert_eq!(msgs[1].role, "user");
        assert_eq!(
            msgs[1].content,
            "Conversation history (if any):\nUser: hi\nAssistant: hello\n\nUser question:\nWhat are cats?"
        );
    }

    #[test]
    fn test_build_messages_without_passages() {
        let msgs = build_messages(&PromptConfig::default(), &[], "", "Anything?");
        assert!(msgs[0].content.ends_with(NO_CONTEXT));
    }

    async fn spawn_mock(status: StatusCode, reply: Value) -> (String, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_handler = Arc::clone(&seen);
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<Value>| {
                let seen = Arc::clone(&seen_handler);
                let reply = reply.clone();
                async move {
                    seen.lock().unwrap().push(body);
                    (status, Json(reply))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1", addr), seen)
    }

    fn config_for(base_url: String) -> LlmConfig {
        LlmConfig {
            base_url,
            model: "test-model".into(),
            api_key: Some("secret".into()),
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let (url, seen) = spawn_mock(
            StatusCode::OK,
            json!({"choices": [{"message": {"role": "assistant", "content": "Cats are mammals."}}]}),
        )
        .await;
        let model = OpenAiCompatibleModel::new(&config_for(url)).unwrap();

        let answer = model
            .complete(&[ChatMessage::user("What are cats?")])
            .await
            .unwrap();
        assert_eq!(answer, "Cats are mammals.");

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["model"], "test-model");
        assert_eq!(requests[0]["max_tokens"], 1000);
        assert_eq!(requests[0]["messages"][0]["content"], "What are cats?");
    }

    #[tokio::test]
    async fn test_complete_error_status_is_single_attempt() {
        let (url, seen) = spawn_mock(
            StatusCode::TOO_MANY_REQUESTS,
            json!({"error": {"message": "rate limited"}}),
        )
        .await;
        let model = OpenAiCompatibleModel::new(&config_for(url)).unwrap();

        let err = model
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_missing_content_is_error() {
        let (url, _) = spawn_mock(StatusCode::OK, json!({"choices": []})).await;
        let model = OpenAiCompatibleModel::new(&config_for(url)).unwrap();
        assert!(model.complete(&[ChatMessage::user("hi")]).await.is_err());
    }
}
