//! Passage index: an in-memory vector index, its on-disk generation, and
//! the [`IndexStore`] service that keeps it in step with the documents
//! directory.
//!
//! # Refresh model
//!
//! [`IndexStore::get_or_rebuild`] recomputes the corpus fingerprint on
//! every call. When it matches the fingerprint of the held index, the same
//! `Arc<VectorIndex>` is returned. Otherwise the whole corpus is reloaded,
//! rechunked and re-embedded into a fresh index (no incremental updates),
//! which then replaces the held one.
//!
//! The check and any rebuild run under one async mutex, so two callers
//! never rebuild concurrently. Readers only ever hold an `Arc` to a
//! complete index; the swap happens after the new index is fully built.
//!
//! # On-disk layout
//!
//! `<index.path>/index.sqlite` holds two tables:
//!
//! ```text
//! passages(id, source, page, chunk_index, text, hash, embedding BLOB)
//! index_meta(id = 1, fingerprint, model, dims, chunk_chars, overlap_chars, built_at)
//! ```
//!
//! A rebuild drops and rewrites both in a single transaction, so a file
//! left by an older layout is replaced rather than patched.

use anyhow::{Context, Result};
use sqlx::{Row, SqliteConnection};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::chunk::split_into_passages;
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, vec_to_blob, Embedder};
use crate::fingerprint::compute_fingerprint;
use crate::loader::load_documents;
use crate::models::Passage;

/// A passage together with its embedding vector.
#[derive(Debug, Clone)]
pub struct IndexedPassage {
    pub passage: Passage,
    pub embedding: Vec<f32>,
}

/// A retrieval hit.
#[derive(Debug, Clone)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Chunker settings a generation was split with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunking {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
}

impl Chunking {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_chars: config.chunking.chunk_chars,
            overlap_chars: config.chunking.overlap_chars,
        }
    }
}

/// Immutable similarity index over one corpus generation.
#[derive(Debug)]
pub struct VectorIndex {
    fingerprint: String,
    model: String,
    dims: usize,
    chunking: Chunking,
    built_at: i64,
    entries: Vec<IndexedPassage>,
}

impl VectorIndex {
    pub fn new(
        fingerprint: String,
        model: String,
        dims: usize,
        chunking: Chunking,
        built_at: i64,
        entries: Vec<IndexedPassage>,
    ) -> Self {
        Self {
            fingerprint,
            model,
            dims,
            chunking,
            built_at,
            entries,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn chunking(&self) -> Chunking {
        self.chunking
    }

    pub fn built_at(&self) -> i64 {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexedPassage] {
        &self.entries
    }

    /// The `k` entries most cosine-similar to `query`, best first. Ties
    /// keep index order, so results are deterministic.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredPassage> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredPassage {
                passage: self.entries[i].passage.clone(),
                score,
            })
            .collect()
    }
}

/// Snapshot of the held index for status output.
#[derive(Debug, Clone)]
pub struct IndexStatus {
    pub fingerprint: String,
    pub model: String,
    pub passages: usize,
    pub built_at: i64,
    pub rebuilds: u64,
}

/// Owner of the process-wide index and the fingerprint it was built from.
pub struct IndexStore {
    documents_dir: PathBuf,
    index_db: PathBuf,
    chunking: Chunking,
    batch_size: usize,
    reuse_persisted: bool,
    embedder: Arc<dyn Embedder>,
    held: Mutex<Option<Arc<VectorIndex>>>,
    rebuilds: AtomicU64,
}

impl IndexStore {
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            documents_dir: config.documents.dir.clone(),
            index_db: config.index_db_path(),
            chunking: Chunking::from_config(config),
            batch_size: config.embedding.batch_size.max(1),
            reuse_persisted: config.index.reuse_persisted,
            embedder,
            held: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Override whether a matching on-disk generation may be loaded at
    /// first use instead of rebuilding.
    pub fn with_reuse_persisted(mut self, reuse: bool) -> Self {
        self.reuse_persisted = reuse;
        self
    }

    /// Number of full rebuilds completed by this store.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    /// Return the current index, rebuilding it first if the corpus changed
    /// since it was built (or if none is held yet).
    pub async fn get_or_rebuild(&self) -> Result<Arc<VectorIndex>> {
        let mut held = self.held.lock().await;

        let dir = self.documents_dir.clone();
        let fingerprint = tokio::task::spawn_blocking(move || compute_fingerprint(&dir))
            .await?
            .context("Failed to fingerprint documents directory")?;

        if let Some(index) = held.as_ref() {
            if index.fingerprint() == fingerprint {
                return Ok(Arc::clone(index));
            }
            tracing::info!(
                old = %index.fingerprint(),
                new = %fingerprint,
                "documents changed"
            );
        } else if self.reuse_persisted {
            if let Some(index) = self.load_matching_generation(&fingerprint).await {
                let index = Arc::new(index);
                *held = Some(Arc::clone(&index));
                return Ok(index);
            }
        }

        let index = Arc::new(self.rebuild(fingerprint).await?);
        *held = Some(Arc::clone(&index));
        Ok(index)
    }

    /// The `k` passages most similar to `query`. An empty index returns
    /// nothing without embedding the query.
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        if index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .context("Failed to embed query")?;
        Ok(index.search(&query_vec, k))
    }

    /// Status of the held index, if any. Waits for an in-flight rebuild.
    pub async fn status(&self) -> Option<IndexStatus> {
        let held = self.held.lock().await;
        held.as_ref().map(|index| IndexStatus {
            fingerprint: index.fingerprint().to_string(),
            model: index.model().to_string(),
            passages: index.len(),
            built_at: index.built_at(),
            rebuilds: self.rebuild_count(),
        })
    }

    async fn load_matching_generation(&self, fingerprint: &str) -> Option<VectorIndex> {
        if !self.index_db.exists() {
            return None;
        }
        match load_generation(&self.index_db).await {
            Ok(Some(index))
                if index.fingerprint() == fingerprint
                    && index.model() == self.embedder.model_name()
                    && index.chunking() == self.chunking =>
            {
                tracing::info!(
                    passages = index.len(),
                    path = %self.index_db.display(),
                    "loaded persisted index"
                );
                Some(index)
            }
            Ok(Some(index)) => {
                tracing::debug!(
                    model = %index.model(),
                    chunk_chars = index.chunking().chunk_chars,
                    overlap_chars = index.chunking().overlap_chars,
                    "persisted index is stale"
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "ignoring unreadable persisted index");
                None
            }
        }
    }

    async fn rebuild(&self, fingerprint: String) -> Result<VectorIndex> {
        tracing::info!(dir = %self.documents_dir.display(), "rebuilding index");
        let started = Instant::now();

        let dir = self.documents_dir.clone();
        let chunking = self.chunking;
        let passages = tokio::task::spawn_blocking(move || -> Result<Vec<Passage>> {
            let docs = load_documents(&dir)?;
            Ok(split_into_passages(
                &docs,
                chunking.chunk_chars,
                chunking.overlap_chars,
            ))
        })
        .await??;

        if passages.is_empty() {
            tracing::warn!("documents directory is empty; building an empty index");
        }

        let mut entries = Vec::with_capacity(passages.len());
        for batch in passages.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .context("Failed to embed passages")?;
            if vectors.len() != batch.len() {
                anyhow::bail!(
                    "Embedder returned {} vectors for {} passages",
                    vectors.len(),
                    batch.len()
                );
            }
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(passage, embedding)| IndexedPassage { passage, embedding }),
            );
        }

        let index = VectorIndex::new(
            fingerprint,
            self.embedder.model_name().to_string(),
            self.embedder.dims(),
            self.chunking,
            chrono::Utc::now().timestamp(),
            entries,
        );

        // The in-memory index stays authoritative if the disk write fails.
        if let Err(e) = save_generation(&self.index_db, &index).await {
            tracing::warn!(
                error = %format!("{:#}", e),
                path = %self.index_db.display(),
                "failed to persist index"
            );
        }

        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            passages = index.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index rebuilt"
        );
        Ok(index)
    }
}

async fn create_schema(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS passages (
            id INTEGER PRIMARY KEY,
            source TEXT NOT NULL,
            page INTEGER,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            fingerprint TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            chunk_chars INTEGER NOT NULL,
            overlap_chars INTEGER NOT NULL,
            built_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Replace the on-disk generation at `path` with `index`.
pub async fn save_generation(path: &Path, index: &VectorIndex) -> Result<()> {
    let pool = db::connect_path(path).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DROP TABLE IF EXISTS passages")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS index_meta")
        .execute(&mut *tx)
        .await?;
    create_schema(&mut tx).await?;

    for (i, entry) in index.entries().iter().enumerate() {
        sqlx::query(
            "INSERT INTO passages (id, source, page, chunk_index, text, hash, embedding) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(i as i64)
        .bind(&entry.passage.source)
        .bind(entry.passage.page.map(i64::from))
        .bind(entry.passage.chunk_index)
        .bind(&entry.passage.text)
        .bind(&entry.passage.hash)
        .bind(vec_to_blob(&entry.embedding))
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO index_meta (id, fingerprint, model, dims, chunk_chars, overlap_chars, built_at) VALUES (1, ?, ?, ?, ?, ?, ?)",
    )
    .bind(index.fingerprint())
    .bind(index.model())
    .bind(index.dims() as i64)
    .bind(index.chunking().chunk_chars as i64)
    .bind(index.chunking().overlap_chars as i64)
    .bind(index.built_at())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    pool.close().await;
    Ok(())
}

/// Read the on-disk generation at `path`, if one has been written.
pub async fn load_generation(path: &Path) -> Result<Option<VectorIndex>> {
    let pool = db::connect_path(path).await?;
    create_schema(&mut *pool.acquire().await?).await?;

    let meta = sqlx::query(
        "SELECT fingerprint, model, dims, chunk_chars, overlap_chars, built_at FROM index_meta WHERE id = 1",
    )
    .fetch_optional(&pool)
    .await?;
    let Some(meta) = meta else {
        pool.close().await;
        return Ok(None);
    };

    let rows = sqlx::query(
        "SELECT source, page, chunk_index, text, hash, embedding FROM passages ORDER BY id",
    )
    .fetch_all(&pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let page: Option<i64> = row.get("page");
        let blob: Vec<u8> = row.get("embedding");
        entries.push(IndexedPassage {
            passage: Passage {
                source: row.get("source"),
                page: page.map(|p| p as u32),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                hash: row.get("hash"),
            },
            embedding: blob_to_vec(&blob),
        });
    }
    pool.close().await;

    let dims: i64 = meta.get("dims");
    let chunk_chars: i64 = meta.get("chunk_chars");
    let overlap_chars: i64 = meta.get("overlap_chars");
    Ok(Some(VectorIndex::new(
        meta.get("fingerprint"),
        meta.get("model"),
        dims as usize,
        Chunking {
            chunk_chars: chunk_chars as usize,
            overlap_chars: overlap_chars as usize,
        },
        meta.get("built_at"),
        entries,
    )))
}
