use crate::config::HubConfig;
use chrono::{Local, NaiveDate};
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

/// One file per calendar day, named after the day the hub started.
pub fn log_file_name(day: NaiveDate) -> String {
    format!("ferve-hub-{}.log", day.format("%Y-%m-%d"))
}

struct DayLog {
    path: PathBuf,
    file: Mutex<File>,
}

/// Holds the day's log file open until the process exits.
pub struct LogGuard {
    day_log: Option<Arc<DayLog>>,
}

impl LogGuard {
    fn stdout_only() -> Self {
        Self { day_log: None }
    }

    /// Where file output is going, if anywhere.
    pub fn path(&self) -> Option<&Path> {
        self.day_log.as_deref().map(|log| log.path.as_path())
    }
}

/// `RUST_LOG` wins; otherwise `--debug`, then `FERVE_LOG_LEVEL`, then `info`.
pub fn level_for(config: &HubConfig, env_level: Option<String>) -> String {
    if config.debug {
        "debug".to_string()
    } else if let Some(level) = env_level.filter(|level| !level.trim().is_empty()) {
        level
    } else {
        "info".to_string()
    }
}

pub fn init_logging(config: &HubConfig) -> Option<LogGuard> {
    let level = level_for(config, std::env::var("FERVE_LOG_LEVEL").ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = open_day_log(Path::new(&config.log_dir), Local::now().date_naive())
        .unwrap_or_else(|err| {
            eprintln!("log_file_error: {err}");
            LogGuard::stdout_only()
        });
    let day_log = guard.day_log.clone();
    let make_writer = BoxMakeWriter::new(move || Tee::new(day_log.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok()?;
    Some(guard)
}

/// Copies every formatted event to stdout and the day log.
struct Tee {
    stdout: io::Stdout,
    day_log: Option<Arc<DayLog>>,
}

impl Tee {
    fn new(day_log: Option<Arc<DayLog>>) -> Self {
        Self {
            stdout: io::stdout(),
            day_log,
        }
    }

    fn with_file(&self, f: impl FnOnce(&mut File) -> io::Result<()>) {
        let Some(log) = &self.day_log else {
            return;
        };
        if let Ok(mut file) = log.file.lock() {
            let _ = f(&mut file);
        }
    }
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        self.with_file(|file| file.write_all(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        self.with_file(|file| file.flush());
        Ok(())
    }
}

/// An empty or uncreatable directory means stdout only; a file that will not open is an error.
fn open_day_log(log_dir: &Path, day: NaiveDate) -> io::Result<LogGuard> {
    if log_dir.as_os_str().is_empty() || std::fs::create_dir_all(log_dir).is_err() {
        return Ok(LogGuard::stdout_only());
    }
    let path = log_dir.join(log_file_name(day));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(LogGuard {
        day_log: Some(Arc::new(DayLog {
            path,
            file: Mutex::new(file),
        })),
    })
}
