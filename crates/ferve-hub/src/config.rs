use clap::Parser;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_ADDR: &str = "127.0.0.1:8765";
pub const DEFAULT_LOG_DIR: &str = ".ferve/logs";
pub const DEFAULT_EDITOR: &str = "code";

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub addr: String,
    pub debug: bool,
    pub log_dir: String,
    pub projects_file: PathBuf,
    pub downloads_dir: PathBuf,
    pub stats_interval: Duration,
    pub command_timeout: Duration,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub editor: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            debug: false,
            log_dir: DEFAULT_LOG_DIR.to_string(),
            projects_file: default_projects_file(),
            downloads_dir: default_downloads_dir(),
            stats_interval: Duration::from_secs(2),
            command_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(2),
            queue_capacity: 256,
            editor: DEFAULT_EDITOR.to_string(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ferve-hub", version, about = "Local dashboard hub over WebSocket")]
pub struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value = "")]
    projects_file: String,
    #[arg(long, default_value = "")]
    downloads_dir: String,
    /// Seconds between `system_stats` broadcasts.
    #[arg(long, default_value_t = 2)]
    stats_interval: u64,
    /// Seconds before a shell command is killed.
    #[arg(long, default_value_t = 30)]
    command_timeout: u64,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    /// Outbound frames buffered per connection.
    #[arg(long, default_value_t = 256)]
    queue_capacity: usize,
    #[arg(long, default_value = "")]
    editor: String,
}

pub fn load_config() -> HubConfig {
    from_args(Args::parse(), |key| std::env::var(key).ok())
}

/// Flag beats environment beats default. `env` is the variable lookup.
pub fn from_args(args: Args, env: impl Fn(&str) -> Option<String>) -> HubConfig {
    let debug = args.debug || env("FERVE_DEBUG").as_deref().is_some_and(is_truthy);
    HubConfig {
        addr: pick(&args.addr, env("FERVE_ADDR")).unwrap_or_else(|| DEFAULT_ADDR.to_string()),
        debug,
        log_dir: pick(&args.log_dir, env("FERVE_LOG_DIR"))
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string()),
        projects_file: pick(&args.projects_file, env("FERVE_PROJECTS_FILE"))
            .map(PathBuf::from)
            .unwrap_or_else(default_projects_file),
        downloads_dir: pick(&args.downloads_dir, env("FERVE_DOWNLOADS_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(default_downloads_dir),
        stats_interval: Duration::from_secs(args.stats_interval.max(1)),
        command_timeout: Duration::from_secs(args.command_timeout.max(1)),
        write_timeout: Duration::from_secs(args.write_timeout.max(1)),
        queue_capacity: args.queue_capacity.max(1),
        editor: pick(&args.editor, env("FERVE_EDITOR"))
            .unwrap_or_else(|| DEFAULT_EDITOR.to_string()),
    }
}

fn pick(flag: &str, env_value: Option<String>) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    env_value.filter(|value| !value.trim().is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn default_projects_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".ferve"))
        .join("ferve")
        .join("projects.json")
}

fn default_downloads_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("Downloads"))
}
