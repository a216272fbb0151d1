//! Wire contracts for the dashboard channel.
//!
//! Inbound frames are flat objects tagged by `type`; outbound frames carry their
//! payload under `data`.

use crate::{
    DeckEntry, FileEntry, LogEntry, PomodoroPhase, Project, SystemStats, Task, WorkContext,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub const MAX_FRAME_BYTES: usize = 256 * 1024;
pub const DEFAULT_POMODORO_MINUTES: f64 = 25.0;
pub const MAX_POMODORO_MINUTES: f64 = 24.0 * 60.0;

pub mod tags {
    pub const TERMINAL_COMMAND: &str = "terminal_command";
    pub const AI_CHAT: &str = "ai_chat";
    pub const GET_PROJECTS: &str = "get_projects";
    pub const PROJECT_COMMAND: &str = "project_command";
    pub const GIT_STATUS: &str = "git_status";
    pub const GIT_PULL: &str = "git_pull";
    pub const OPEN_VSCODE: &str = "open_vscode";
    pub const START_POMODORO: &str = "start_pomodoro";
    pub const POMODORO_STATUS: &str = "pomodoro_status";
    pub const CANCEL_POMODORO: &str = "cancel_pomodoro";
    pub const ADD_TASK: &str = "add_task";
    pub const TOGGLE_TASK: &str = "toggle_task";
    pub const GET_TASKS: &str = "get_tasks";
    pub const QUICK_ACTIONS: &str = "quick_actions";
    pub const GET_ANKI_STATS: &str = "get_anki_stats";
    pub const DISCOVER_ANKI: &str = "discover_anki";
    pub const OPEN_ANKI: &str = "open_anki";
    pub const SCAN_DOWNLOADS: &str = "scan_downloads";
    pub const ORGANIZE_SUGGESTIONS: &str = "organize_suggestions";
    pub const GET_CONTEXTS: &str = "get_contexts";
    pub const SWITCH_CONTEXT: &str = "switch_context";
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {0} bytes")]
    TooLarge(usize),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame has no type")]
    MissingType,
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

/// A decoded inbound frame whose payload has not been interpreted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub kind: String,
    pub body: Map<String, Value>,
}

impl InboundFrame {
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.body.clone())).map_err(|err| {
            ProtocolError::InvalidPayload {
                kind: self.kind.clone(),
                reason: err.to_string(),
            }
        })
    }
}

pub fn decode_frame(raw: &[u8]) -> Result<InboundFrame, ProtocolError> {
    if raw.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::TooLarge(raw.len()));
    }
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(mut body) = value else {
        return Err(ProtocolError::NotAnObject);
    };
    let kind = match body.remove("type") {
        Some(Value::String(kind)) if !kind.trim().is_empty() => kind,
        _ => return Err(ProtocolError::MissingType),
    };
    Ok(InboundFrame { kind, body })
}

pub fn encode(msg: &OutboundMsg) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminalCommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectCommandRequest {
    pub project_id: String,
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectTarget {
    pub project_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartPomodoroRequest {
    #[serde(default = "default_pomodoro_minutes")]
    pub duration: f64,
}

impl StartPomodoroRequest {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ProtocolError::InvalidPayload {
                kind: tags::START_POMODORO.to_string(),
                reason: format!("duration must be positive, got {}", self.duration),
            });
        }
        if self.duration > MAX_POMODORO_MINUTES {
            return Err(ProtocolError::InvalidPayload {
                kind: tags::START_POMODORO.to_string(),
                reason: format!(
                    "duration must be at most {MAX_POMODORO_MINUTES} minutes, got {}",
                    self.duration
                ),
            });
        }
        Ok(())
    }
}

fn default_pomodoro_minutes() -> f64 {
    DEFAULT_POMODORO_MINUTES
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddTaskRequest {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToggleTaskRequest {
    pub task_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchContextRequest {
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMsg {
    Log(LogEntry),
    SystemStats(SystemStats),
    TerminalOutput(CommandOutcome),
    AiResponse(AiResponse),
    ProjectsList(BTreeMap<String, Project>),
    CommandResult(CommandOutcome),
    GitStatus(GitStatusReport),
    GitPullResult(GitPullReport),
    VscodeResult(ActionResult),
    StartPomodoro(ActionResult),
    PomodoroStarted(PomodoroStarted),
    PomodoroComplete(PomodoroComplete),
    PomodoroStatus(PomodoroStatus),
    PomodoroCancelled(PomodoroCancelled),
    TaskAdded(TaskAdded),
    TaskToggled(ActionResult),
    TasksList(Vec<Task>),
    QuickActions(BTreeMap<String, BTreeMap<String, String>>),
    AnkiStats(AnkiStats),
    AnkiLaunched(ActionResult),
    DownloadsScan(Vec<FileEntry>),
    OrganizeSuggestions(OrganizeSuggestions),
    ContextsList(BTreeMap<String, WorkContext>),
    ContextSwitched(ContextSwitch),
}

impl OutboundMsg {
    pub fn tag(&self) -> &'static str {
        match self {
            OutboundMsg::Log(_) => "log",
            OutboundMsg::SystemStats(_) => "system_stats",
            OutboundMsg::TerminalOutput(_) => "terminal_output",
            OutboundMsg::AiResponse(_) => "ai_response",
            OutboundMsg::ProjectsList(_) => "projects_list",
            OutboundMsg::CommandResult(_) => "command_result",
            OutboundMsg::GitStatus(_) => "git_status",
            OutboundMsg::GitPullResult(_) => "git_pull_result",
            OutboundMsg::VscodeResult(_) => "vscode_result",
            OutboundMsg::StartPomodoro(_) => "start_pomodoro",
            OutboundMsg::PomodoroStarted(_) => "pomodoro_started",
            OutboundMsg::PomodoroComplete(_) => "pomodoro_complete",
            OutboundMsg::PomodoroStatus(_) => "pomodoro_status",
            OutboundMsg::PomodoroCancelled(_) => "pomodoro_cancelled",
            OutboundMsg::TaskAdded(_) => "task_added",
            OutboundMsg::TaskToggled(_) => "task_toggled",
            OutboundMsg::TasksList(_) => "tasks_list",
            OutboundMsg::QuickActions(_) => "quick_actions",
            OutboundMsg::AnkiStats(_) => "anki_stats",
            OutboundMsg::AnkiLaunched(_) => "anki_launched",
            OutboundMsg::DownloadsScan(_) => "downloads_scan",
            OutboundMsg::OrganizeSuggestions(_) => "organize_suggestions",
            OutboundMsg::ContextsList(_) => "contexts_list",
            OutboundMsg::ContextSwitched(_) => "context_switched",
        }
    }
}

/// Result of one subprocess invocation as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn completed(stdout: String, stderr: String, exit_code: Option<i32>) -> Self {
        Self {
            success: exit_code == Some(0),
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit_code,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiResponse {
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum GitStatusReport {
    Status {
        branch: String,
        changes: Vec<String>,
        last_commit: String,
        has_changes: bool,
    },
    Unavailable {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GitPullReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PomodoroStarted {
    pub duration: f64,
    #[serde(rename = "type")]
    pub phase: PomodoroPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PomodoroComplete {
    #[serde(rename = "type")]
    pub phase: PomodoroPhase,
    pub next: PomodoroPhase,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PomodoroStatus {
    pub active: bool,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub phase: Option<PomodoroPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_minutes: Option<u64>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PomodoroCancelled {
    #[serde(flatten)]
    pub result: ActionResult,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskAdded {
    pub success: bool,
    pub task_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnkiStats {
    pub total_decks: usize,
    pub total_size_mb: f64,
    pub topics: BTreeMap<String, usize>,
    pub decks: Vec<DeckEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OrganizeSuggestions {
    pub pdfs_to_documents: Vec<FileEntry>,
    pub anki_cards: Vec<FileEntry>,
    pub apks: Vec<FileEntry>,
    pub old_files: Vec<FileEntry>,
    pub duplicates: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContextSwitch {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apps_to_launch: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
