//! Local dashboard hub: one WebSocket channel multiplexing telemetry, shell
//! commands, projects, tasks, a Pomodoro timer and study/download scanning.

pub mod config;
pub mod hub;
pub mod logging;
pub mod registry;
pub mod router;
pub mod runner;
pub mod server;
pub mod services;
pub mod telemetry;
