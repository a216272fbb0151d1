use crate::runner::CommandRunner;
use chrono::{DateTime, Local};
use ferve_core::{
    protocol::{ActionResult, AnkiStats},
    DeckEntry,
};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;
use tracing::{info, warn};

const DECK_EXTENSION: &str = "apkg";

const TOPICS: &[(&str, &[&str])] = &[
    ("Sciences", &["anatomia", "biology", "química"]),
    ("Law", &["legislação", "constituição", "educação"]),
    ("Mathematics", &["math"]),
];
const FALLBACK_TOPIC: &str = "Other";

pub fn topic_for(deck_name: &str) -> &'static str {
    let lowered = deck_name.to_lowercase();
    TOPICS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
        .map(|(label, _)| *label)
        .unwrap_or(FALLBACK_TOPIC)
}

/// Anki deck exports found in a single directory. The list is cached between
/// `discover` calls.
#[derive(Debug)]
pub struct DeckLibrary {
    dir: PathBuf,
    runner: CommandRunner,
    decks: Mutex<Option<Vec<DeckEntry>>>,
}

impl DeckLibrary {
    pub fn new(dir: impl Into<PathBuf>, runner: CommandRunner) -> Self {
        Self {
            dir: dir.into(),
            runner,
            decks: Mutex::new(None),
        }
    }

    /// Rescans the directory and replaces the cached deck list.
    pub async fn discover(&self) -> Vec<DeckEntry> {
        let decks = match scan_decks(&self.dir).await {
            Ok(decks) => decks,
            Err(err) => {
                warn!(event = "deck_scan_error", dir = %self.dir.display(), error = %err);
                Vec::new()
            }
        };
        info!(event = "decks_discovered", count = decks.len());
        *self.decks.lock().await = Some(decks.clone());
        decks
    }

    pub async fn stats(&self) -> AnkiStats {
        let cached = self.decks.lock().await.clone();
        let decks = match cached {
            Some(decks) => decks,
            None => self.discover().await,
        };
        summarize(decks)
    }

    pub async fn refreshed_stats(&self) -> AnkiStats {
        summarize(self.discover().await)
    }

    pub fn launch_anki(&self) -> ActionResult {
        match self.runner.spawn_detached("anki", &[]) {
            Ok(()) => ActionResult::ok("Anki launched"),
            Err(err) => {
                warn!(event = "anki_launch_failed", error = %err);
                ActionResult::rejected("Anki not found")
            }
        }
    }
}

fn summarize(decks: Vec<DeckEntry>) -> AnkiStats {
    let total_bytes: u64 = decks.iter().map(|deck| deck.size).sum();
    let mut topics = BTreeMap::new();
    for deck in &decks {
        *topics.entry(topic_for(&deck.name).to_string()).or_insert(0) += 1;
    }
    AnkiStats {
        total_decks: decks.len(),
        total_size_mb: (total_bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0,
        topics,
        decks,
    }
}

async fn scan_decks(dir: &Path) -> io::Result<Vec<DeckEntry>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut decks = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_deck = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(DECK_EXTENSION));
        if !is_deck {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().replace('_', " "))
            .unwrap_or_default();
        let modified = meta
            .modified()
            .map(|time| DateTime::<Local>::from(time).format("%d/%m/%Y").to_string())
            .unwrap_or_default();
        decks.push(DeckEntry {
            name: stem,
            path: path.display().to_string(),
            size: meta.len(),
            modified,
        });
    }
    decks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(decks)
}
