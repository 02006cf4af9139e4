use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::ThinkingAnnotation;

/// Reasoning depth requested for commands that reach a model.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    #[default]
    Normal,
    Think,
    ThinkHard,
    Ultrathink,
}

impl ThinkingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ThinkingMode::Normal => "normal",
            ThinkingMode::Think => "think",
            ThinkingMode::ThinkHard => "think_hard",
            ThinkingMode::Ultrathink => "ultrathink",
        }
    }

    pub fn budget_tokens(self) -> u32 {
        match self {
            ThinkingMode::Normal => 0,
            ThinkingMode::Think => 4_000,
            ThinkingMode::ThinkHard => 10_000,
            ThinkingMode::Ultrathink => 31_999,
        }
    }

    /// `None` for normal mode: outgoing payloads stay unannotated.
    pub fn annotation(self) -> Option<ThinkingAnnotation> {
        match self {
            ThinkingMode::Normal => None,
            mode => Some(ThinkingAnnotation {
                mode,
                budget_tokens: mode.budget_tokens(),
            }),
        }
    }
}

impl fmt::Display for ThinkingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the server's `thinking-start` / `thinking-complete` pairs so the
/// surface can show one banner per round.
#[derive(Debug, Default)]
pub struct ThinkingState {
    pub mode: ThinkingMode,
    in_progress: Option<String>,
}

impl ThinkingState {
    pub fn new(mode: ThinkingMode) -> Self {
        Self {
            mode,
            in_progress: None,
        }
    }

    pub fn in_progress(&self) -> Option<&str> {
        self.in_progress.as_deref()
    }

    pub fn started(&mut self, mode: &str) -> String {
        self.in_progress = Some(mode.to_string());
        format!("thinking ({mode})...")
    }

    pub fn completed(&mut self, mode: &str, error: Option<&str>) -> String {
        self.in_progress = None;
        match error {
            Some(error) => format!("thinking ({mode}) failed: {error}"),
            None => format!("thinking ({mode}) complete"),
        }
    }
}
