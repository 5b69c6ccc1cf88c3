use anyhow::{Context, Result};
use serde::Deserialize;

use crate::session::DEFAULT_LANGUAGE;

/// One line of the editor event stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EditorEvent {
    Open {
        path: String,
        #[serde(default = "default_language")]
        language: String,
    },
    Close {
        path: String,
        #[serde(default = "default_language")]
        language: String,
    },
    StartServer,
    ShowDashboard,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Parses one stdin line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<EditorEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let event = serde_json::from_str(trimmed)
        .with_context(|| format!("invalid editor event: {trimmed}"))?;
    Ok(Some(event))
}
