pub mod chat;
pub mod contexts;
pub mod downloads;
pub mod projects;
pub mod study;
pub mod tasks;

use crate::runner::CommandRunner;
use chat::MockAssistant;
use downloads::FileOrganizer;
use projects::{ProjectRegistry, ProjectService};
use std::path::PathBuf;
use study::DeckLibrary;
use tasks::TaskBoard;

/// The collaborators the router calls into.
#[derive(Debug)]
pub struct Services {
    pub runner: CommandRunner,
    pub projects: ProjectService,
    pub tasks: TaskBoard,
    pub decks: DeckLibrary,
    pub downloads: FileOrganizer,
    pub assistant: MockAssistant,
}

impl Services {
    pub fn new(
        runner: CommandRunner,
        registry: ProjectRegistry,
        downloads_dir: PathBuf,
        editor: &str,
    ) -> Self {
        Self {
            projects: ProjectService::new(registry, runner.clone(), editor),
            tasks: TaskBoard::new(),
            decks: DeckLibrary::new(downloads_dir.clone(), runner.clone()),
            downloads: FileOrganizer::new(downloads_dir),
            assistant: MockAssistant,
            runner,
        }
    }
}
