//! Core data models.
//!
//! Documents are produced by the loader and live only until they are
//! chunked; passages are what the index stores and what retrieval returns.

use serde::{Deserialize, Serialize};

/// A unit of parsed source text: a whole text file, or one page of a PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// File name relative to the documents directory.
    pub source: String,
    /// 1-based page number for paginated formats.
    pub page: Option<u32>,
    pub text: String,
}

impl Document {
    pub fn new(source: impl Into<String>, page: Option<u32>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            page,
            text: text.into(),
        }
    }
}

/// A bounded chunk of a [`Document`], the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source: String,
    pub page: Option<u32>,
    /// Position of this passage within its document, starting at 0.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// Speaker of a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used in the flattened transcript.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One line of a conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}
