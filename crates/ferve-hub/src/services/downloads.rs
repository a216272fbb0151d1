use chrono::{DateTime, Utc};
use ferve_core::{protocol::OrganizeSuggestions, FileEntry, FileKind};
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Most entries a `downloads_scan` reply carries.
pub const DASHBOARD_SCAN_LIMIT: usize = 50;

const OLD_FILE_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct FileOrganizer {
    dir: PathBuf,
}

impl FileOrganizer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Regular files directly inside the directory, newest first. An unreadable
    /// directory scans as empty.
    pub async fn scan(&self) -> Vec<FileEntry> {
        match scan_files(&self.dir).await {
            Ok(files) => files,
            Err(err) => {
                warn!(event = "downloads_scan_error", dir = %self.dir.display(), error = %err);
                Vec::new()
            }
        }
    }

    pub async fn scan_for_dashboard(&self) -> Vec<FileEntry> {
        let mut files = self.scan().await;
        files.truncate(DASHBOARD_SCAN_LIMIT);
        files
    }

    pub async fn organize_suggestions(&self) -> OrganizeSuggestions {
        suggest(self.scan().await, Utc::now())
    }
}

async fn scan_files(dir: &Path) -> io::Result<Vec<FileEntry>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(err) => {
                debug!(event = "downloads_stat_error", path = %entry.path().display(), error = %err);
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }
        let path = entry.path();
        let kind = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(FileKind::from_extension)
            .unwrap_or(FileKind::Other);
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().to_string(),
            path: path.display().to_string(),
            size: meta.len(),
            modified,
            kind,
        });
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Buckets `files` (expected newest first) into the organizer's suggestion lists.
pub fn suggest(files: Vec<FileEntry>, now: DateTime<Utc>) -> OrganizeSuggestions {
    let mut out = OrganizeSuggestions::default();
    let mut seen: HashMap<(String, u64), usize> = HashMap::new();

    for file in files {
        match file.kind {
            FileKind::Document if !file.name.starts_with('.') => {
                out.pdfs_to_documents.push(file.clone())
            }
            FileKind::Anki => out.anki_cards.push(file.clone()),
            FileKind::Android => out.apks.push(file.clone()),
            _ => {}
        }
        if now.signed_duration_since(file.modified).num_days() > OLD_FILE_DAYS {
            out.old_files.push(file.clone());
        }
        let copies = seen.entry((copy_base_name(&file.name), file.size)).or_insert(0);
        *copies += 1;
        if *copies > 1 {
            out.duplicates.push(file);
        }
    }
    out
}

/// Strips a trailing ` (N)` copy marker from the file stem: `notes (2).pdf` -> `notes.pdf`.
pub fn copy_base_name(name: &str) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };
    let base = stem
        .strip_suffix(')')
        .and_then(|rest| rest.rsplit_once(" ("))
        .filter(|(_, digits)| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .map(|(base, _)| base)
        .unwrap_or(stem);
    format!("{base}{ext}")
}
