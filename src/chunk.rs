//! Recursive boundary-aware text chunker.
//!
//! Splits document text into [`Passage`]s of at most `chunk_chars`
//! characters. Boundaries are tried in priority order: blank line, line
//! break, sentence end (`". "`), space, and finally a hard character cut.
//! Adjacent passages of the same document share up to `overlap_chars`
//! characters of trailing context. Passages never span two documents.
//!
//! Lengths are measured in `char`s, not bytes.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::models::{Document, Passage};

/// Boundary markers, highest priority first. The empty marker means
/// "split between any two characters".
const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Split every document into passages. Pure and deterministic.
pub fn split_into_passages(
    documents: &[Document],
    chunk_chars: usize,
    overlap_chars: usize,
) -> Vec<Passage> {
    let mut passages = Vec::new();
    for doc in documents {
        for (i, text) in split_text(&doc.text, chunk_chars, overlap_chars)
            .into_iter()
            .enumerate()
        {
            passages.push(make_passage(doc, i as i64, text));
        }
    }
    passages
}

/// Split one text into overlapping pieces. Whitespace-only input yields
/// no pieces.
pub fn split_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let overlap_chars = overlap_chars.min(chunk_chars - 1);
    split_recursive(text, &SEPARATORS, chunk_chars, overlap_chars)
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_chars: usize,
    overlap_chars: usize,
) -> Vec<String> {
    // First marker present in the text; finer markers are kept for pieces
    // that are still too long.
    let mut separator = "";
    let mut finer: &[&str] = &[];
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            break;
        }
        if text.contains(sep) {
            separator = *sep;
            finer = &separators[i + 1..];
            break;
        }
    }

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if piece.chars().count() < chunk_chars {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            out.extend(merge_pieces(&fitting, chunk_chars, overlap_chars));
            fitting.clear();
        }
        if finer.is_empty() {
            if let Some(text) = clean(piece) {
                out.push(text);
            }
        } else {
            out.extend(split_recursive(piece, finer, chunk_chars, overlap_chars));
        }
    }

    if !fitting.is_empty() {
        out.extend(merge_pieces(&fitting, chunk_chars, overlap_chars));
    }
    out
}

/// Split on `separator`, leaving each separator attached to the end of the
/// piece before it so sentence punctuation stays with its sentence. An empty
/// separator splits into single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, sep) in text.match_indices(separator) {
        let end = idx + sep.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily pack small pieces into chunks of at most `chunk_chars`,
/// carrying the last `overlap_chars` worth of pieces into the next chunk.
fn merge_pieces(pieces: &[&str], chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = piece.chars().count();

        if total + len > chunk_chars && !window.is_empty() {
            if let Some(text) = join_window(&window) {
                out.push(text);
            }
            while total > overlap_chars || (total + len > chunk_chars && total > 0) {
                match window.pop_front() {
                    Some((_, front_len)) => total -= front_len,
                    None => break,
                }
            }
        }

        window.push_back((piece, len));
        total += len;
    }

    if let Some(text) = join_window(&window) {
        out.push(text);
    }
    out
}

fn join_window(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(p, _)| *p).collect();
    clean(&joined)
}

fn clean(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn make_passage(doc: &Document, index: i64, text: String) -> Passage {
    let hash = hex::encode(Sha256::digest(text.as_bytes()));

    Passage {
        source: doc.source.clone(),
        page: doc.page,
        chunk_index: index,
        text,
        hash,
    }
}
