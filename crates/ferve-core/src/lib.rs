use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub mod protocol;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PomodoroPhase {
    Work,
    Break,
}

impl PomodoroPhase {
    /// Phase of the next Pomodoro given how many have already completed.
    pub fn for_completed(count: u64) -> Self {
        if count % 2 == 0 {
            PomodoroPhase::Work
        } else {
            PomodoroPhase::Break
        }
    }

    pub fn next(self) -> Self {
        match self {
            PomodoroPhase::Work => PomodoroPhase::Break,
            PomodoroPhase::Break => PomodoroPhase::Work,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PomodoroPhase::Work => "work",
            PomodoroPhase::Break => "break",
        }
    }
}

impl fmt::Display for PomodoroPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: u64,
    pub text: String,
    pub completed: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub name: String,
    pub path: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    #[serde(default)]
    pub git_enabled: bool,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSource {
    System,
    Terminal,
    Ai,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
    pub source: LogSource,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageStats {
    pub used: u64,
    pub total: u64,
    pub percent: f64,
}

impl UsageStats {
    pub fn from_bytes(used: u64, total: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            ((used as f64 / total as f64) * 1000.0).round() / 10.0
        };
        Self {
            used,
            total,
            percent,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SystemStats {
    pub cpu: f32,
    pub memory: UsageStats,
    pub disk: UsageStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Document,
    Image,
    Android,
    Anki,
    Archive,
    Other,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" | "doc" | "docx" | "txt" => FileKind::Document,
            "jpg" | "jpeg" | "png" | "webp" => FileKind::Image,
            "apk" => FileKind::Android,
            "apkg" => FileKind::Anki,
            "zip" | "rar" | "tar" | "gz" => FileKind::Archive,
            _ => FileKind::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeckEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkContext {
    pub name: String,
    pub icon: String,
    pub apps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_sites: Option<Vec<String>>,
    pub description: String,
}
