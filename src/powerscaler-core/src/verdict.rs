//! Reading a structured verdict out of the judge's free text.
//!
//! Parsing fails closed: a verdict is only produced when the judge names one
//! of the two fighters, or explicitly calls a draw.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire label of the undetermined outcome.
pub const UNDETERMINED: &str = "undetermined";

/// Winner markers the judge may use for a tie.
const DRAW_MARKERS: &[&str] = &[
    "draw",
    "a draw",
    "tie",
    "a tie",
    "undetermined",
    "none",
    "no winner",
    "no clear winner",
    "inconclusive",
    "stalemate",
    "neither",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Winner {
    /// One of the two submitted names, spelled as submitted.
    Character(String),
    Undetermined,
}

impl Winner {
    pub fn label(&self) -> &str {
        match self {
            Winner::Character(name) => name,
            Winner::Undetermined => UNDETERMINED,
        }
    }

    /// False for a draw. The label alone cannot tell a draw from a fighter
    /// named "undetermined".
    pub fn is_decided(&self) -> bool {
        matches!(self, Winner::Character(_))
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub winner: Winner,
    pub reasoning: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerdictParseError {
    #[error("judge output has no recognizable winner line")]
    MissingWinner,

    #[error("judge declared '{0}', which is neither fighter")]
    UnknownWinner(String),
}

static WINNER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t>*#_\-]*winner[ \t*_]*[:\-][ \t]*(.*)$")
        .expect("winner pattern is valid")
});

static REASONING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ims)^[ \t>*#_\-]*reasoning[ \t*_]*:[ \t*_]*(.*)")
        .expect("reasoning pattern is valid")
});

/// Parse judge output into a [`Verdict`] for `character1` vs `character2`.
///
/// Whitespace, case and markdown emphasis around the labels are tolerated.
/// The first `Winner:` line counts. Without a `Reasoning:` block, the rest
/// of the text is the reasoning.
pub fn parse_verdict(
    raw: &str,
    character1: &str,
    character2: &str,
) -> Result<Verdict, VerdictParseError> {
    let caps = WINNER_LINE
        .captures(raw)
        .ok_or(VerdictParseError::MissingWinner)?;
    let (Some(line), Some(value)) = (caps.get(0), caps.get(1)) else {
        return Err(VerdictParseError::MissingWinner);
    };

    let written = value.as_str().trim();
    let declared = clean_value(written);
    if declared.is_empty() {
        return Err(VerdictParseError::MissingWinner);
    }

    let winner = if names_match(written, &declared, character1) {
        Winner::Character(character1.to_string())
    } else if names_match(written, &declared, character2) {
        Winner::Character(character2.to_string())
    } else if DRAW_MARKERS.contains(&normalize(&declared).as_str()) {
        Winner::Undetermined
    } else {
        return Err(VerdictParseError::UnknownWinner(declared));
    };

    let reasoning = match REASONING_BLOCK.captures(raw).and_then(|c| c.get(1)) {
        // A reasoning block written above the winner line ends where it starts.
        Some(block) if block.start() < line.start() => {
            raw[block.start()..line.start()].trim().to_string()
        }
        Some(block) => block.as_str().trim().to_string(),
        None => {
            let mut rest = String::with_capacity(raw.len());
            rest.push_str(&raw[..line.start()]);
            rest.push_str(&raw[line.end()..]);
            rest.trim().to_string()
        }
    };

    Ok(Verdict { winner, reasoning })
}

/// Strip emphasis, quotes and closing punctuation around a declared name.
fn clean_value(value: &str) -> String {
    let is_wrapping =
        |c: char| c.is_whitespace() || matches!(c, '*' | '_' | '`' | '"' | '\'' | '[' | ']');
    value
        .trim_matches(is_wrapping)
        .trim_end_matches(['.', '!'])
        .trim_matches(is_wrapping)
        .to_string()
}

/// Whether the judge's winner value names `submitted`. The value is tried as
/// written first, so names that end in punctuation or brackets still match;
/// the cleaned value is compared against the submitted name cleaned the same way.
fn names_match(written: &str, declared: &str, submitted: &str) -> bool {
    let submitted = normalize(submitted);
    normalize(written) == submitted
        || normalize(declared) == submitted
        || normalize(declared) == normalize(&clean_value(&submitted))
}

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
