use crate::{
    registry::{Connection, ConnectionRegistry, SendError},
    telemetry::{StatsSampler, CPU_SAMPLE_WINDOW},
};
use ferve_core::{
    protocol::{
        encode, ActionResult, OutboundMsg, PomodoroCancelled, PomodoroComplete, PomodoroStarted,
        PomodoroStatus,
    },
    PomodoroPhase,
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PomodoroStart {
    Started(PomodoroStarted),
    Rejected,
    InvalidDuration(f64),
}

struct ActivePomodoro {
    run_id: u64,
    started: Instant,
    duration: Duration,
    minutes: f64,
    phase: PomodoroPhase,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct PomodoroSlot {
    active: Option<ActivePomodoro>,
    completed: u64,
}

/// Registry membership for one socket. `leave` unregisters with a reason; if the
/// owning task unwinds or is cancelled first, dropping the guard unregisters instead.
pub struct Membership {
    hub: Arc<Hub>,
    conn_id: String,
    left: bool,
}

impl Membership {
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub async fn leave(mut self, reason: &str) {
        self.left = true;
        self.hub.unregister(&self.conn_id, reason).await;
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.left {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = "membership_leaked", conn_id = %self.conn_id);
            return;
        };
        let hub = Arc::clone(&self.hub);
        let conn_id = std::mem::take(&mut self.conn_id);
        runtime.spawn(async move {
            hub.unregister(&conn_id, "aborted").await;
        });
    }
}

/// Owns connection membership and every server-initiated frame: broadcasts,
/// the telemetry ticker and the single process-wide Pomodoro timer.
pub struct Hub {
    conn_counter: AtomicU64,
    pomodoro_runs: AtomicU64,
    registry: ConnectionRegistry,
    pomodoro: Mutex<PomodoroSlot>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            conn_counter: AtomicU64::new(0),
            pomodoro_runs: AtomicU64::new(0),
            registry: ConnectionRegistry::new(),
            pomodoro: Mutex::new(PomodoroSlot::default()),
        }
    }

    pub fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn register(&self, conn: Arc<Connection>) {
        let conn_id = conn.conn_id().to_string();
        self.registry.register(conn).await;
        let clients = self.registry.len().await;
        info!(event = "client_connected", conn_id = %conn_id, clients = clients);
    }

    pub async fn join(self: &Arc<Self>, conn: Arc<Connection>) -> Membership {
        let conn_id = conn.conn_id().to_string();
        self.register(conn).await;
        Membership {
            hub: Arc::clone(self),
            conn_id,
            left: false,
        }
    }

    pub async fn unregister(&self, conn_id: &str, reason: &str) {
        if self.registry.unregister(conn_id).await.is_some() {
            let clients = self.registry.len().await;
            info!(
                event = "client_disconnected",
                conn_id = conn_id,
                reason = reason,
                clients = clients
            );
        }
    }

    /// Encodes once and offers the frame to every member of a registry snapshot.
    /// A failed delivery is logged and skipped; it never stops the others.
    pub async fn broadcast(&self, msg: &OutboundMsg) -> BroadcastReport {
        let text = match encode(msg) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "broadcast_encode_error", kind = msg.tag(), error = %err);
                return BroadcastReport::default();
            }
        };
        let members = self.registry.snapshot().await;
        let mut report = BroadcastReport {
            attempted: members.len(),
            ..BroadcastReport::default()
        };
        for member in members {
            match member.offer(text.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    match err {
                        SendError::Full => {
                            warn!(event = "slow_consumer", conn_id = %member.conn_id(), kind = msg.tag())
                        }
                        other => {
                            warn!(event = "send_error", conn_id = %member.conn_id(), kind = msg.tag(), error = %other)
                        }
                    }
                }
            }
        }
        report
    }

    pub fn spawn_telemetry<S: StatsSampler>(
        self: &Arc<Self>,
        mut sampler: S,
        interval: Duration,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if hub.registry.is_empty().await {
                    continue;
                }
                sampler.begin_window();
                tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
                match sampler.sample() {
                    Ok(stats) => {
                        let report = hub.broadcast(&OutboundMsg::SystemStats(stats)).await;
                        debug!(
                            event = "stats_broadcast",
                            delivered = report.delivered,
                            failed = report.failed
                        );
                    }
                    Err(err) => warn!(event = "stats_error", error = %err),
                }
            }
        })
    }

    /// Starts the process-wide timer unless one is already running. On success the
    /// `pomodoro_started` reply is queued to `conn` before the timer task exists.
    pub async fn start_pomodoro(self: &Arc<Self>, conn: &Connection, minutes: f64) -> PomodoroStart {
        let mut slot = self.pomodoro.lock().await;
        if slot.active.is_some() {
            info!(event = "pomodoro_rejected", conn_id = %conn.conn_id());
            return PomodoroStart::Rejected;
        }

        let Ok(duration) = Duration::try_from_secs_f64(minutes * 60.0) else {
            warn!(event = "pomodoro_invalid", conn_id = %conn.conn_id(), minutes = minutes);
            return PomodoroStart::InvalidDuration(minutes);
        };

        let phase = PomodoroPhase::for_completed(slot.completed);
        let started = PomodoroStarted {
            duration: minutes,
            phase,
        };
        if let Err(err) = conn.offer_msg(&OutboundMsg::PomodoroStarted(started.clone())) {
            warn!(event = "send_error", conn_id = %conn.conn_id(), kind = "pomodoro_started", error = %err);
        }

        let run_id = self.pomodoro_runs.fetch_add(1, Ordering::SeqCst) + 1;
        let hub = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            hub.complete_pomodoro(run_id).await;
        });
        slot.active = Some(ActivePomodoro {
            run_id,
            started: Instant::now(),
            duration,
            minutes,
            phase,
            task,
        });
        info!(
            event = "pomodoro_started",
            conn_id = %conn.conn_id(),
            phase = %phase,
            minutes = minutes
        );
        PomodoroStart::Started(started)
    }

    async fn complete_pomodoro(&self, run_id: u64) {
        let complete = {
            let mut slot = self.pomodoro.lock().await;
            let current = slot.active.as_ref().map(|active| active.run_id);
            if current != Some(run_id) {
                return;
            }
            let Some(active) = slot.active.take() else {
                return;
            };
            slot.completed += 1;
            PomodoroComplete {
                phase: active.phase,
                next: active.phase.next(),
                count: slot.completed,
            }
        };
        info!(
            event = "pomodoro_complete",
            phase = %complete.phase,
            count = complete.count
        );
        self.broadcast(&OutboundMsg::PomodoroComplete(complete)).await;
    }

    pub async fn cancel_pomodoro(&self) -> PomodoroCancelled {
        let mut slot = self.pomodoro.lock().await;
        let count = slot.completed;
        match slot.active.take() {
            Some(active) => {
                active.task.abort();
                info!(event = "pomodoro_cancelled", phase = %active.phase, minutes = active.minutes);
                PomodoroCancelled {
                    result: ActionResult::ok(format!("{} pomodoro cancelled", active.phase)),
                    count,
                }
            }
            None => PomodoroCancelled {
                result: ActionResult::error("No active pomodoro"),
                count,
            },
        }
    }

    pub async fn pomodoro_status(&self) -> PomodoroStatus {
        let slot = self.pomodoro.lock().await;
        match slot.active.as_ref() {
            Some(active) => {
                let remaining = active.duration.saturating_sub(active.started.elapsed());
                PomodoroStatus {
                    active: true,
                    phase: Some(active.phase),
                    remaining_minutes: Some(remaining.as_secs() / 60),
                    count: slot.completed,
                }
            }
            None => PomodoroStatus {
                active: false,
                phase: None,
                remaining_minutes: None,
                count: slot.completed,
            },
        }
    }
}
