//! Per-turn answer pipeline.
//!
//! One call to [`Pipeline::answer`] runs a full conversational turn:
//!
//! ```text
//! query ─▶ validate ─▶ load transcript ─▶ index (fresh?) ─▶ retrieve top-k
//!                                                              │
//!        persist transcript ◀─ append turn ◀─ chat model ◀─ build prompt
//! ```
//!
//! Turns for the same conversation are serialized so concurrent messages
//! cannot lose an update to the transcript; different conversations run
//! in parallel. The transcript is written only after the model answered,
//! so a failed turn leaves it unchanged.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, MessagesConfig, PromptConfig};
use crate::conversation::{ConversationStore, SqliteConversationStore};
use crate::embedding::create_embedder;
use crate::index::IndexStore;
use crate::llm::{build_messages, ChatModel, OpenAiCompatibleModel};
use crate::transcript;

/// Why a turn produced no answer.
#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("failed to load conversation history: {0:#}")]
    History(anyhow::Error),
    #[error("index unavailable: {0:#}")]
    Index(anyhow::Error),
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
    #[error("model call failed: {0:#}")]
    Model(anyhow::Error),
    #[error("failed to save conversation history: {0:#}")]
    Persist(anyhow::Error),
}

impl AnswerError {
    /// Text to send back to the user in place of an answer.
    pub fn user_message<'a>(&self, messages: &'a MessagesConfig) -> &'a str {
        match self {
            AnswerError::EmptyQuery => &messages.empty_query,
            _ => &messages.failure,
        }
    }
}

pub struct Pipeline {
    index: Arc<IndexStore>,
    conversations: Arc<dyn ConversationStore>,
    model: Arc<dyn ChatModel>,
    prompt: PromptConfig,
    messages: MessagesConfig,
    top_k: usize,
    history_max_chars: usize,
    turn_locks: std::sync::Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        index: Arc<IndexStore>,
        conversations: Arc<dyn ConversationStore>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            index,
            conversations,
            model,
            prompt: config.prompt.clone(),
            messages: config.messages.clone(),
            top_k: config.retrieval.top_k,
            history_max_chars: config.history.max_chars,
            turn_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Wire up the production components named by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let index = Arc::new(IndexStore::new(config, embedder));
        let conversations = Arc::new(SqliteConversationStore::open(config).await?);
        let model = Arc::new(OpenAiCompatibleModel::new(&config.llm)?);
        Ok(Self::new(config, index, conversations, model))
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    pub fn messages(&self) -> &MessagesConfig {
        &self.messages
    }

    /// Answer `query` in the context of `conversation_id`.
    ///
    /// Failures are logged here with their full cause chain; callers only
    /// need [`AnswerError::user_message`].
    pub async fn answer(&self, conversation_id: i64, query: &str) -> Result<String, AnswerError> {
        let result = self.run_turn(conversation_id, query).await;
        match &result {
            Ok(answer) => {
                tracing::info!(
                    conversation_id,
                    model = self.model.name(),
                    answer_chars = answer.len(),
                    "turn answered"
                );
            }
            Err(AnswerError::EmptyQuery) => {
                tracing::debug!(conversation_id, "rejected empty query");
            }
            Err(e) => {
                tracing::error!(
                    conversation_id,
                    model = self.model.name(),
                    error = %e,
                    error_debug = ?e,
                    "turn failed"
                );
            }
        }
        result
    }

    /// Transport-facing variant of [`answer`](Self::answer): always yields
    /// text to send back.
    pub async fn reply(&self, conversation_id: i64, text: &str) -> String {
        match self.answer(conversation_id, text).await {
            Ok(answer) => answer,
            Err(e) => e.user_message(&self.messages).to_string(),
        }
    }

    /// Reset a conversation's transcript. Waits for any in-flight turn.
    pub async fn clear(&self, conversation_id: i64) -> Result<()> {
        let lock = self.turn_lock(conversation_id);
        let _turn = lock.lock().await;
        self.conversations.clear_transcript(conversation_id).await?;
        tracing::info!(conversation_id, "conversation cleared");
        Ok(())
    }

    pub async fn transcript(&self, conversation_id: i64) -> Result<String> {
        self.conversations.get_transcript(conversation_id).await
    }

    async fn run_turn(&self, conversation_id: i64, query: &str) -> Result<String, AnswerError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AnswerError::EmptyQuery);
        }

        let lock = self.turn_lock(conversation_id);
        let _turn = lock.lock().await;

        let history = self
            .conversations
            .get_transcript(conversation_id)
            .await
            .map_err(AnswerError::History)?;
        let history = transcript::bound(&history, self.history_max_chars);

        let index = self
            .index
            .get_or_rebuild()
            .await
            .map_err(AnswerError::Index)?;

        let passages = self
            .index
            .retrieve(&index, query, self.top_k)
            .await
            .map_err(AnswerError::Retrieval)?;
        tracing::debug!(conversation_id, hits = passages.len(), "retrieved passages");

        let messages = build_messages(&self.prompt, &passages, &history, query);
        let answer = self
            .model
            .complete(&messages)
            .await
            .map_err(AnswerError::Model)?;

        let updated = transcript::bound(
            &transcript::append_turn(&history, query, &answer),
            self.history_max_chars,
        );
        self.conversations
            .set_transcript(conversation_id, &updated)
            .await
            .map_err(AnswerError::Persist)?;

        Ok(answer)
    }

    /// Per-conversation mutex. Entries nobody else holds are pruned on the
    /// way in so the map tracks only active conversations.
    fn turn_lock(&self, conversation_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.turn_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.retain(|id, lock| *id == conversation_id || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(conversation_id).or_default())
    }
}
