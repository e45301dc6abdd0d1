//! Flat-text conversation transcripts.
//!
//! A transcript is a sequence of `User: <query>` / `Assistant: <answer>`
//! lines joined by newlines, oldest first. This is the form stored per
//! conversation and handed to the model as history. [`parse_turns`]
//! recovers the structured turns for display.

use crate::models::{Role, Turn};

/// Append one completed exchange to `prior`, trimming outer whitespace.
pub fn append_turn(prior: &str, query: &str, answer: &str) -> String {
    format!(
        "{}\n{}: {}\n{}: {}",
        prior,
        Role::User.label(),
        query,
        Role::Assistant.label(),
        answer
    )
    .trim()
    .to_string()
}

/// Drop the oldest exchanges until `transcript` fits in `max_chars`.
///
/// Cuts only at the start of a `User:` line so exchanges stay whole. If the
/// newest exchange alone is too long, its last `max_chars` characters are
/// kept. `max_chars == 0` means unbounded.
pub fn bound(transcript: &str, max_chars: usize) -> String {
    if max_chars == 0 || transcript.chars().count() <= max_chars {
        return transcript.to_string();
    }

    let marker = format!("\n{}: ", Role::User.label());
    for (pos, _) in transcript.match_indices(&marker) {
        let tail = &transcript[pos + 1..];
        if tail.chars().count() <= max_chars {
            return tail.to_string();
        }
    }

    let skip = transcript.chars().count() - max_chars;
    transcript.chars().skip(skip).collect()
}

/// Split a transcript back into turns.
///
/// A line starting with a role label opens a new turn; any other line
/// continues the previous one, so multi-line answers survive.
pub fn parse_turns(transcript: &str) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();
    for line in transcript.lines() {
        if let Some((role, text)) = split_label(line) {
            turns.push(Turn {
                role,
                text: text.to_string(),
            });
        } else if let Some(last) = turns.last_mut() {
            last.text.push('\n');
            last.text.push_str(line);
        }
    }
    turns
}

fn split_label(line: &str) -> Option<(Role, &str)> {
    for role in [Role::User, Role::Assistant] {
        let prefix = format!("{}: ", role.label());
        if let Some(rest) = line.strip_prefix(&prefix) {
            return Some((role, rest));
        }
        if line == format!("{}:", role.label()) {
            return Some((role, ""));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_to_empty() {
        assert_eq!(
            append_turn("", "What are cats?", "Cats are mammals."),
            "User: What are cats?\nAssistant: Cats are mammals."
        );
    }

    #[test]
    fn test_append_keeps_prior_turns_first() {
        let first = append_turn("", "What are cats?", "Cats are mammals.");
        let second = append_turn(&first, "And dogs?", "Dogs are mammals too.");
        assert_eq!(
            second,
            "User: What are cats?\nAssistant: Cats are mammals.\nUser: And dogs?\nAssistant: Dogs are mammals too."
        );
    }

    #[test]
    fn test_bound_unbounded_and_short() {
        let t = "User: a\nAssistant: b";
        assert_eq!(bound(t, 0), t);
        assert_eq!(bound(t, 1000), t);
    }

    #[test]
    fn test_bound_drops_oldest_exchange() {
        let t = "User: first question\nAssistant: first answer\nUser: q2\nAssistant: a2";
        assert_eq!(bound(t, 30), "User: q2\nAssistant: a2");
    }

    #[test]
    fn test_bound_single_oversized_exchange_keeps_tail() {
        let t = "User: q\nAssistant: a very long answer";
        let bounded = bound(t, 10);
        assert_eq!(bounded.chars().count(), 10);
        assert!(t.ends_with(&bounded));
    }

    #[test]
    fn test_parse_multiline_answer() {
        let t = "User: list them\nAssistant: one\ntwo\nUser: thanks\nAssistant:";
        let turns = parse_turns(t);
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].text, "one\ntwo");
        assert_eq!(turns[2].role, Role::User);
        assert_eq!(turns[2].text, "thanks");
        assert_eq!(turns[3].text, "");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_turns("").is_empty());
    }
}
