use crate::{
    hub::{Hub, PomodoroStart},
    registry::{Connection, SendError},
    runner::ExecOptions,
    services::{contexts, chat::MockAssistant, Services},
};
use chrono::Local;
use ferve_core::{
    protocol::{
        decode_frame, tags, ActionResult, AddTaskRequest, AiChatRequest, AiResponse,
        InboundFrame, OutboundMsg, ProjectCommandRequest, ProjectTarget, ProtocolError,
        StartPomodoroRequest, SwitchContextRequest, TerminalCommandRequest, ToggleTaskRequest,
    },
    LogEntry, LogSource,
};
use futures_util::future::{BoxFuture, FutureExt};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Payload(#[from] ProtocolError),
    #[error("reply not delivered: {0}")]
    Send(#[from] SendError),
}

pub type Handler = for<'a> fn(
    &'a MessageRouter,
    &'a Connection,
    InboundFrame,
) -> BoxFuture<'a, Result<(), RouteError>>;

pub fn log_msg(message: impl Into<String>, source: LogSource) -> OutboundMsg {
    OutboundMsg::Log(LogEntry {
        timestamp: clock(),
        message: message.into(),
        source,
    })
}

fn clock() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

macro_rules! handler_table {
    ($($tag:expr => $method:ident),* $(,)?) => {{
        let mut table: HashMap<&'static str, Handler> = HashMap::new();
        $(
            fn $method<'a>(
                router: &'a MessageRouter,
                conn: &'a Connection,
                frame: InboundFrame,
            ) -> BoxFuture<'a, Result<(), RouteError>> {
                router.$method(conn, frame).boxed()
            }
            table.insert($tag, $method);
        )*
        table
    }};
}

/// Turns one connection's inbound frames into replies, one frame at a time.
pub struct MessageRouter {
    hub: Arc<Hub>,
    services: Services,
    table: HashMap<&'static str, Handler>,
    debug: bool,
}

impl MessageRouter {
    pub fn new(hub: Arc<Hub>, services: Services, debug: bool) -> Self {
        let table = handler_table! {
            tags::TERMINAL_COMMAND => terminal_command,
            tags::AI_CHAT => ai_chat,
            tags::GET_PROJECTS => get_projects,
            tags::PROJECT_COMMAND => project_command,
            tags::GIT_STATUS => git_status,
            tags::GIT_PULL => git_pull,
            tags::OPEN_VSCODE => open_vscode,
            tags::START_POMODORO => start_pomodoro,
            tags::POMODORO_STATUS => pomodoro_status,
            tags::CANCEL_POMODORO => cancel_pomodoro,
            tags::ADD_TASK => add_task,
            tags::TOGGLE_TASK => toggle_task,
            tags::GET_TASKS => get_tasks,
            tags::QUICK_ACTIONS => quick_actions,
            tags::GET_ANKI_STATS => get_anki_stats,
            tags::DISCOVER_ANKI => discover_anki,
            tags::OPEN_ANKI => open_anki,
            tags::SCAN_DOWNLOADS => scan_downloads,
            tags::ORGANIZE_SUGGESTIONS => organize_suggestions,
            tags::GET_CONTEXTS => get_contexts,
            tags::SWITCH_CONTEXT => switch_context,
        };
        Self {
            hub,
            services,
            table,
            debug,
        }
    }

    pub fn handles(&self, kind: &str) -> bool {
        self.table.contains_key(kind)
    }

    /// Decodes and dispatches one raw frame. Nothing here closes the connection:
    /// bad frames are logged and dropped, unknown tags are ignored.
    pub async fn route(&self, conn: &Connection, raw: &[u8]) {
        if self.debug {
            debug!(
                event = "message_received",
                conn_id = %conn.conn_id(),
                raw = %String::from_utf8_lossy(raw)
            );
        }
        let frame = match decode_frame(raw) {
            Ok(frame) => frame,
            Err(ProtocolError::MissingType) => {
                debug!(event = "message_untyped", conn_id = %conn.conn_id());
                return;
            }
            Err(err) => {
                warn!(event = "message_invalid", conn_id = %conn.conn_id(), error = %err);
                return;
            }
        };
        let Some(handler) = self.table.get(frame.kind.as_str()).copied() else {
            debug!(event = "unknown_message", conn_id = %conn.conn_id(), r#type = %frame.kind);
            return;
        };
        let kind = frame.kind.clone();
        match handler(self, conn, frame).await {
            Ok(()) => {}
            Err(RouteError::Payload(err)) => {
                warn!(event = "payload_invalid", conn_id = %conn.conn_id(), r#type = %kind, error = %err)
            }
            Err(RouteError::Send(err)) => {
                warn!(event = "send_error", conn_id = %conn.conn_id(), r#type = %kind, error = %err)
            }
        }
    }

    async fn terminal_command(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: TerminalCommandRequest = frame.payload()?;
        conn.send(&log_msg(format!("Executing: {}", req.command), LogSource::Terminal))
            .await?;
        info!(event = "terminal_command", conn_id = %conn.conn_id(), command = %req.command);
        let outcome = self
            .services
            .runner
            .execute(&req.command, ExecOptions::default())
            .await;
        conn.send(&OutboundMsg::TerminalOutput(outcome)).await?;
        Ok(())
    }

    async fn ai_chat(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: AiChatRequest = frame.payload()?;
        let preview = MockAssistant::preview(&req.message);
        conn.send(&log_msg(format!("Processing: {preview}..."), LogSource::Ai))
            .await?;
        let reply = AiResponse {
            message: self.services.assistant.reply(&req.message),
            timestamp: clock(),
        };
        conn.send(&OutboundMsg::AiResponse(reply)).await?;
        Ok(())
    }

    async fn get_projects(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        let projects = self.services.projects.projects().clone();
        conn.send(&OutboundMsg::ProjectsList(projects)).await?;
        Ok(())
    }

    async fn project_command(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: ProjectCommandRequest = frame.payload()?;
        let outcome = self
            .services
            .projects
            .run_command(&req.project_id, &req.command)
            .await;
        conn.send(&OutboundMsg::CommandResult(outcome)).await?;
        Ok(())
    }

    async fn git_status(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: ProjectTarget = frame.payload()?;
        let report = self.services.projects.git_status(&req.project_id).await;
        conn.send(&OutboundMsg::GitStatus(report)).await?;
        Ok(())
    }

    async fn git_pull(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: ProjectTarget = frame.payload()?;
        let report = self.services.projects.git_pull(&req.project_id).await;
        conn.send(&OutboundMsg::GitPullResult(report)).await?;
        Ok(())
    }

    async fn open_vscode(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: ProjectTarget = frame.payload()?;
        let result = self.services.projects.open_in_editor(&req.project_id);
        conn.send(&OutboundMsg::VscodeResult(result)).await?;
        Ok(())
    }

    async fn start_pomodoro(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: StartPomodoroRequest = frame.payload()?;
        req.validate()?;
        match self.hub.start_pomodoro(conn, req.duration).await {
            // The hub already queued `pomodoro_started`.
            PomodoroStart::Started(_) => {}
            PomodoroStart::Rejected => {
                let reply = ActionResult::rejected("Pomodoro already running");
                conn.send(&OutboundMsg::StartPomodoro(reply)).await?;
            }
            PomodoroStart::InvalidDuration(minutes) => {
                return Err(RouteError::Payload(ProtocolError::InvalidPayload {
                    kind: tags::START_POMODORO.to_string(),
                    reason: format!("duration {minutes} cannot be scheduled"),
                }));
            }
        }
        Ok(())
    }

    async fn pomodoro_status(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        let status = self.hub.pomodoro_status().await;
        conn.send(&OutboundMsg::PomodoroStatus(status)).await?;
        Ok(())
    }

    async fn cancel_pomodoro(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        let cancelled = self.hub.cancel_pomodoro().await;
        conn.send(&OutboundMsg::PomodoroCancelled(cancelled)).await?;
        Ok(())
    }

    async fn add_task(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: AddTaskRequest = frame.payload()?;
        let added = self.services.tasks.add(req.text).await;
        conn.send(&OutboundMsg::TaskAdded(added)).await?;
        Ok(())
    }

    async fn toggle_task(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: ToggleTaskRequest = frame.payload()?;
        let result = self.services.tasks.toggle(req.task_id).await;
        conn.send(&OutboundMsg::TaskToggled(result)).await?;
        Ok(())
    }

    async fn get_tasks(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        let tasks = self.services.tasks.list().await;
        conn.send(&OutboundMsg::TasksList(tasks)).await?;
        Ok(())
    }

    async fn quick_actions(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        conn.send(&OutboundMsg::QuickActions(contexts::quick_actions()))
            .await?;
        Ok(())
    }

    async fn get_anki_stats(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        let stats = self.services.decks.stats().await;
        conn.send(&OutboundMsg::AnkiStats(stats)).await?;
        Ok(())
    }

    async fn discover_anki(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        let stats = self.services.decks.refreshed_stats().await;
        conn.send(&OutboundMsg::AnkiStats(stats)).await?;
        Ok(())
    }

    async fn open_anki(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        let result = self.services.decks.launch_anki();
        conn.send(&OutboundMsg::AnkiLaunched(result)).await?;
        Ok(())
    }

    async fn scan_downloads(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        let files = self.services.downloads.scan_for_dashboard().await;
        conn.send(&OutboundMsg::DownloadsScan(files)).await?;
        Ok(())
    }

    async fn organize_suggestions(
        &self,
        conn: &Connection,
        _frame: InboundFrame,
    ) -> Result<(), RouteError> {
        let suggestions = self.services.downloads.organize_suggestions().await;
        conn.send(&OutboundMsg::OrganizeSuggestions(suggestions))
            .await?;
        Ok(())
    }

    async fn get_contexts(&self, conn: &Connection, _frame: InboundFrame) -> Result<(), RouteError> {
        conn.send(&OutboundMsg::ContextsList(contexts::work_contexts()))
            .await?;
        Ok(())
    }

    async fn switch_context(&self, conn: &Connection, frame: InboundFrame) -> Result<(), RouteError> {
        let req: SwitchContextRequest = frame.payload()?;
        let switched = contexts::switch_to(&req.context);
        if switched.success {
            info!(event = "context_switched", conn_id = %conn.conn_id(), context = %req.context);
        }
        conn.send(&OutboundMsg::ContextSwitched(switched)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runner::CommandRunner,
        services::projects::ProjectRegistry,
    };
    use ferve_core::{protocol::CommandOutcome, PomodoroPhase, Project};
    use std::{collections::BTreeMap, time::Duration};
    use tokio::sync::mpsc;

    struct Fixture {
        router: MessageRouter,
        conn: Arc<Connection>,
        rx: mpsc::Receiver<String>,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = Project {
            name: "Scratch".to_string(),
            path: dir.path().display().to_string(),
            kind: "rust".to_string(),
            commands: BTreeMap::from([("greet".to_string(), "echo hi".to_string())]),
            git_enabled: false,
            favorite: true,
            extra: Default::default(),
        };
        let registry =
            ProjectRegistry::from_projects(BTreeMap::from([("scratch".to_string(), project)]));
        let services = Services::new(
            CommandRunner::new(Duration::from_secs(10)),
            registry,
            dir.path().to_path_buf(),
            "true",
        );
        let hub = Arc::new(Hub::new());
        let (tx, rx) = mpsc::channel(32);
        let conn = Arc::new(Connection::new(hub.next_conn_id(), tx));
        Fixture {
            router: MessageRouter::new(hub, services, true),
            conn,
            rx,
            dir,
        }
    }

    impl Fixture {
        async fn send(&self, raw: &str) {
            self.router.route(&self.conn, raw.as_bytes()).await;
        }

        async fn next(&mut self) -> OutboundMsg {
            let text = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("reply timeout")
                .expect("channel open");
            serde_json::from_str(&text).expect("outbound frame")
        }

        fn assert_silent(&mut self) {
            assert!(self.rx.try_recv().is_err(), "unexpected reply");
        }
    }

    #[test]
    fn every_inbound_tag_has_a_handler() {
        let fx = fixture();
        for tag in [
            tags::TERMINAL_COMMAND,
            tags::AI_CHAT,
            tags::GET_PROJECTS,
            tags::PROJECT_COMMAND,
            tags::GIT_STATUS,
            tags::GIT_PULL,
            tags::OPEN_VSCODE,
            tags::START_POMODORO,
            tags::POMODORO_STATUS,
            tags::CANCEL_POMODORO,
            tags::ADD_TASK,
            tags::TOGGLE_TASK,
            tags::GET_TASKS,
            tags::QUICK_ACTIONS,
            tags::GET_ANKI_STATS,
            tags::DISCOVER_ANKI,
            tags::OPEN_ANKI,
            tags::SCAN_DOWNLOADS,
            tags::ORGANIZE_SUGGESTIONS,
            tags::GET_CONTEXTS,
            tags::SWITCH_CONTEXT,
        ] {
            assert!(fx.router.handles(tag), "no handler for {tag}");
        }
    }

    #[tokio::test]
    async fn bad_frames_get_no_reply_and_routing_continues() {
        let mut fx = fixture();
        fx.send(r#"{"type":"not_a_real_tag"}"#).await;
        fx.send(r#"{"command":"ls"}"#).await;
        fx.send("{not json").await;
        fx.send(r#"{"type":"add_task"}"#).await;
        fx.send(r#"{"type":"start_pomodoro","duration":-5}"#).await;
        fx.assert_silent();

        fx.send(r#"{"type":"get_tasks"}"#).await;
        assert_eq!(fx.next().await, OutboundMsg::TasksList(Vec::new()));
    }

    #[tokio::test]
    async fn terminal_command_echoes_then_reports() {
        let mut fx = fixture();
        fx.send(r#"{"type":"terminal_command","command":"echo hello | tr a-z A-Z"}"#)
            .await;
        let OutboundMsg::Log(echo) = fx.next().await else {
            panic!("expected log echo");
        };
        assert_eq!(echo.source, LogSource::Terminal);
        assert_eq!(echo.message, "Executing: echo hello | tr a-z A-Z");
        assert_eq!(
            fx.next().await,
            OutboundMsg::TerminalOutput(CommandOutcome::completed(
                "HELLO\n".to_string(),
                String::new(),
                Some(0)
            ))
        );
    }

    #[tokio::test]
    async fn ai_chat_truncates_the_echo() {
        let mut fx = fixture();
        let prompt = "x".repeat(70);
        fx.send(&format!(r#"{{"type":"ai_chat","message":"{prompt}"}}"#))
            .await;
        let OutboundMsg::Log(echo) = fx.next().await else {
            panic!("expected log echo");
        };
        assert_eq!(echo.source, LogSource::Ai);
        assert_eq!(echo.message, format!("Processing: {}...", "x".repeat(50)));
        let OutboundMsg::AiResponse(reply) = fx.next().await else {
            panic!("expected ai_response");
        };
        assert!(reply.message.contains(&prompt));
    }

    #[tokio::test]
    async fn tasks_are_numbered_in_order() {
        let mut fx = fixture();
        fx.send(r#"{"type":"add_task","text":"buy milk"}"#).await;
        fx.send(r#"{"type":"add_task","text":"call dad"}"#).await;
        for expected in [1, 2] {
            let OutboundMsg::TaskAdded(added) = fx.next().await else {
                panic!("expected task_added");
            };
            assert_eq!(added.task_id, expected);
        }
        fx.send(r#"{"type":"toggle_task","task_id":2}"#).await;
        assert_eq!(fx.next().await, OutboundMsg::TaskToggled(ActionResult::done()));

        fx.send(r#"{"type":"get_tasks"}"#).await;
        let OutboundMsg::TasksList(tasks) = fx.next().await else {
            panic!("expected tasks_list");
        };
        let summary: Vec<_> = tasks
            .iter()
            .map(|t| (t.id, t.text.as_str(), t.completed))
            .collect();
        assert_eq!(summary, vec![(1, "buy milk", false), (2, "call dad", true)]);
    }

    #[tokio::test]
    async fn project_commands_reply_on_the_same_connection() {
        let mut fx = fixture();
        fx.send(r#"{"type":"project_command","project_id":"scratch","command":"greet"}"#)
            .await;
        let OutboundMsg::CommandResult(outcome) = fx.next().await else {
            panic!("expected command_result");
        };
        assert!(outcome.success);
        assert_eq!(outcome.stdout.as_deref(), Some("hi\n"));

        fx.send(r#"{"type":"project_command","project_id":"scratch","command":"deploy"}"#)
            .await;
        assert_eq!(
            fx.next().await,
            OutboundMsg::CommandResult(CommandOutcome::failed("Command not found"))
        );

        fx.send(r#"{"type":"get_projects"}"#).await;
        let OutboundMsg::ProjectsList(projects) = fx.next().await else {
            panic!("expected projects_list");
        };
        assert!(projects.contains_key("scratch"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_pomodoro_request_is_rejected() {
        let mut fx = fixture();
        fx.send(r#"{"type":"start_pomodoro","duration":5}"#).await;
        let OutboundMsg::PomodoroStarted(started) = fx.next().await else {
            panic!("expected pomodoro_started");
        };
        assert_eq!(started.phase, PomodoroPhase::Work);
        assert_eq!(started.duration, 5.0);

        fx.send(r#"{"type":"start_pomodoro"}"#).await;
        assert_eq!(
            fx.next().await,
            OutboundMsg::StartPomodoro(ActionResult::rejected("Pomodoro already running"))
        );

        fx.send(r#"{"type":"pomodoro_status"}"#).await;
        let OutboundMsg::PomodoroStatus(status) = fx.next().await else {
            panic!("expected pomodoro_status");
        };
        assert!(status.active);
        assert_eq!(status.remaining_minutes, Some(4));

        fx.send(r#"{"type":"cancel_pomodoro"}"#).await;
        let OutboundMsg::PomodoroCancelled(cancelled) = fx.next().await else {
            panic!("expected pomodoro_cancelled");
        };
        assert!(cancelled.result.success);
    }

    #[tokio::test]
    async fn oversized_pomodoro_is_dropped_and_the_connection_keeps_working() {
        let mut fx = fixture();
        fx.send(r#"{"type":"start_pomodoro","duration":1e300}"#).await;
        fx.assert_silent();

        fx.send(r#"{"type":"pomodoro_status"}"#).await;
        let OutboundMsg::PomodoroStatus(status) = fx.next().await else {
            panic!("expected pomodoro_status");
        };
        assert!(!status.active);

        fx.send(r#"{"type":"start_pomodoro","duration":5}"#).await;
        assert!(matches!(fx.next().await, OutboundMsg::PomodoroStarted(_)));
        fx.send(r#"{"type":"cancel_pomodoro"}"#).await;
        fx.next().await;
    }

    #[tokio::test]
    async fn contexts_and_quick_actions() {
        let mut fx = fixture();
        fx.send(r#"{"type":"switch_context","context":"FOCUS"}"#).await;
        let OutboundMsg::ContextSwitched(switched) = fx.next().await else {
            panic!("expected context_switched");
        };
        assert!(switched.success);
        assert_eq!(switched.apps_to_launch, Some(Vec::new()));

        fx.send(r#"{"type":"get_contexts"}"#).await;
        assert!(matches!(fx.next().await, OutboundMsg::ContextsList(map) if map.len() == 3));

        fx.send(r#"{"type":"quick_actions"}"#).await;
        assert!(matches!(fx.next().await, OutboundMsg::QuickActions(groups) if groups.contains_key("docker")));
    }

    #[tokio::test]
    async fn downloads_and_decks_scan_the_configured_directory() {
        let mut fx = fixture();
        std::fs::write(fx.dir.path().join("biology_cells.apkg"), "deck").expect("write");

        fx.send(r#"{"type":"scan_downloads"}"#).await;
        let OutboundMsg::DownloadsScan(files) = fx.next().await else {
            panic!("expected downloads_scan");
        };
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"biology_cells.apkg"));

        fx.send(r#"{"type":"discover_anki"}"#).await;
        let OutboundMsg::AnkiStats(stats) = fx.next().await else {
            panic!("expected anki_stats");
        };
        assert_eq!(stats.total_decks, 1);
        assert_eq!(stats.topics.get("Sciences"), Some(&1));
    }
}
