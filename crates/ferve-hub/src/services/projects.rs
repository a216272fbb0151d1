use crate::runner::{CommandRunner, ExecOptions, ProcessOutput, RunnerError};
use ferve_core::{
    protocol::{ActionResult, CommandOutcome, GitPullReport, GitStatusReport},
    Project,
};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProjectStoreError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to encode projects: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Projects keyed by id, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    projects: BTreeMap<String, Project>,
}

impl ProjectRegistry {
    /// Reads the registry file, writing the built-in defaults first if it is absent.
    pub fn load_or_init(path: &Path) -> Result<Self, ProjectStoreError> {
        if !path.exists() {
            let projects = default_projects();
            write_projects(path, &projects)?;
            info!(event = "projects_initialized", path = %path.display(), count = projects.len());
            return Ok(Self { projects });
        }
        let raw = fs::read_to_string(path).map_err(|source| ProjectStoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let projects: BTreeMap<String, Project> =
            serde_json::from_str(&raw).map_err(|source| ProjectStoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!(event = "projects_loaded", path = %path.display(), count = projects.len());
        Ok(Self { projects })
    }

    pub fn from_projects(projects: BTreeMap<String, Project>) -> Self {
        Self { projects }
    }

    pub fn all(&self) -> &BTreeMap<String, Project> {
        &self.projects
    }

    pub fn get(&self, project_id: &str) -> Option<&Project> {
        self.projects.get(project_id)
    }
}

fn write_projects(path: &Path, projects: &BTreeMap<String, Project>) -> Result<(), ProjectStoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| ProjectStoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    let json = serde_json::to_string_pretty(projects)?;
    fs::write(path, json).map_err(|source| ProjectStoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn default_projects() -> BTreeMap<String, Project> {
    let downloads = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Downloads");
    let mut projects = BTreeMap::new();
    projects.insert(
        "ferve-labs".to_string(),
        Project {
            name: "Ferve Labs - James Foundation".to_string(),
            path: downloads
                .join("ferve-labs_-genesis-core")
                .display()
                .to_string(),
            kind: "angular".to_string(),
            commands: BTreeMap::from([
                ("dev".to_string(), "npm run dev -- --port 4300".to_string()),
                ("build".to_string(), "npm run build".to_string()),
                (
                    "install".to_string(),
                    "npm install --legacy-peer-deps".to_string(),
                ),
            ]),
            git_enabled: true,
            favorite: true,
            extra: Default::default(),
        },
    );
    projects.insert(
        "dashboard".to_string(),
        Project {
            name: "Dashboard 2".to_string(),
            path: downloads.join("dashboard-2-main").display().to_string(),
            kind: "fullstack".to_string(),
            commands: BTreeMap::from([
                ("backend".to_string(), "cd backend && npm run dev".to_string()),
                (
                    "frontend".to_string(),
                    "cd frontend && npm run dev".to_string(),
                ),
                (
                    "install_all".to_string(),
                    "cd backend && npm install && cd ../frontend && npm install".to_string(),
                ),
            ]),
            git_enabled: true,
            favorite: true,
            extra: Default::default(),
        },
    );
    projects
}

/// Project operations: named commands, git plumbing and the editor launcher.
#[derive(Debug, Clone)]
pub struct ProjectService {
    registry: ProjectRegistry,
    runner: CommandRunner,
    editor: String,
}

impl ProjectService {
    pub fn new(registry: ProjectRegistry, runner: CommandRunner, editor: impl Into<String>) -> Self {
        Self {
            registry,
            runner,
            editor: editor.into(),
        }
    }

    pub fn projects(&self) -> &BTreeMap<String, Project> {
        self.registry.all()
    }

    pub async fn run_command(&self, project_id: &str, command_key: &str) -> CommandOutcome {
        let Some(project) = self.registry.get(project_id) else {
            return CommandOutcome::failed("Project not found");
        };
        let Some(command) = project.commands.get(command_key) else {
            return CommandOutcome::failed("Command not found");
        };
        info!(event = "project_command", project_id = project_id, command = command_key);
        self.runner
            .execute(command, ExecOptions::in_dir(&project.path))
            .await
    }

    fn git_project(&self, project_id: &str) -> Option<&Project> {
        self.registry
            .get(project_id)
            .filter(|project| project.git_enabled)
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<ProcessOutput, RunnerError> {
        self.runner
            .run_program("git", args, ExecOptions::in_dir(dir))
            .await
    }

    pub async fn git_status(&self, project_id: &str) -> GitStatusReport {
        let Some(project) = self.git_project(project_id) else {
            return GitStatusReport::Unavailable {
                error: "Git not enabled".to_string(),
            };
        };
        let dir = Path::new(&project.path);

        let branch = match self.git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await {
            Ok(output) if output.success() => output.stdout.trim().to_string(),
            Ok(output) => {
                return GitStatusReport::Unavailable {
                    error: output.stderr.trim().to_string(),
                }
            }
            Err(err) => {
                return GitStatusReport::Unavailable {
                    error: err.to_string(),
                }
            }
        };
        let status = match self.git(dir, &["status", "--short"]).await {
            Ok(output) => output.stdout,
            Err(err) => {
                return GitStatusReport::Unavailable {
                    error: err.to_string(),
                }
            }
        };
        let last_commit = match self.git(dir, &["log", "-1", "--pretty=%B"]).await {
            Ok(output) => output.stdout.trim().to_string(),
            Err(err) => {
                warn!(event = "git_log_error", project_id = project_id, error = %err);
                String::new()
            }
        };

        let changes: Vec<String> = status
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        GitStatusReport::Status {
            branch,
            has_changes: !changes.is_empty(),
            changes,
            last_commit,
        }
    }

    pub async fn git_pull(&self, project_id: &str) -> GitPullReport {
        let Some(project) = self.git_project(project_id) else {
            return GitPullReport {
                success: false,
                output: None,
                error: Some("Git not enabled".to_string()),
            };
        };
        match self.git(Path::new(&project.path), &["pull"]).await {
            Ok(output) => GitPullReport {
                success: output.success(),
                output: Some(format!("{}{}", output.stdout, output.stderr)),
                error: None,
            },
            Err(err) => GitPullReport {
                success: false,
                output: None,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn open_in_editor(&self, project_id: &str) -> ActionResult {
        let Some(project) = self.registry.get(project_id) else {
            return ActionResult::error("Project not found");
        };
        match self
            .runner
            .spawn_detached(&self.editor, &[Path::new(&project.path)])
        {
            Ok(()) => ActionResult::ok(format!("Opening {} in VS Code", project.name)),
            Err(err) => ActionResult::error(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_project(path: &Path, git_enabled: bool) -> Project {
        Project {
            name: "Sample".to_string(),
            path: path.display().to_string(),
            kind: "rust".to_string(),
            commands: BTreeMap::from([
                ("hello".to_string(), "echo hello from $(basename $PWD)".to_string()),
                ("fail".to_string(), "exit 2".to_string()),
            ]),
            git_enabled,
            favorite: false,
            extra: Default::default(),
        }
    }

    fn service(dir: &Path, git_enabled: bool) -> ProjectService {
        let project = sample_project(dir, git_enabled);
        let registry = ProjectRegistry::from_projects(BTreeMap::from([("sample".to_string(), project)]));
        ProjectService::new(registry, CommandRunner::new(Duration::from_secs(10)), "true")
    }

    #[test]
    fn missing_file_is_initialized_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("projects.json");
        let registry = ProjectRegistry::load_or_init(&path).expect("init");
        assert!(path.exists());
        assert!(registry.get("ferve-labs").is_some());
        assert!(registry.get("dashboard").is_some());

        let reloaded = ProjectRegistry::load_or_init(&path).expect("reload");
        assert_eq!(reloaded.all(), registry.all());
    }

    #[test]
    fn existing_file_is_used_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("projects.json");
        fs::write(
            &path,
            r#"{"notes": {"name": "Notes", "path": "/tmp/notes", "commands": {}}}"#,
        )
        .expect("write");
        let registry = ProjectRegistry::load_or_init(&path).expect("load");
        assert_eq!(registry.all().len(), 1);
        let notes = registry.get("notes").expect("notes");
        assert!(!notes.git_enabled);
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("projects.json");
        fs::write(&path, "{not json").expect("write");
        let err = ProjectRegistry::load_or_init(&path).unwrap_err();
        assert!(matches!(err, ProjectStoreError::Parse { .. }));
    }

    #[tokio::test]
    async fn runs_named_command_in_project_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), false);
        let outcome = svc.run_command("sample", "hello").await;
        assert!(outcome.success);
        let expected = dir
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .expect("dir name");
        assert!(outcome.stdout.unwrap_or_default().contains(expected));

        let failed = svc.run_command("sample", "fail").await;
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(2));
    }

    #[tokio::test]
    async fn unknown_project_or_command_runs_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), false);
        let missing = svc.run_command("nope", "hello").await;
        assert_eq!(missing.error.as_deref(), Some("Project not found"));
        let missing = svc.run_command("sample", "nope").await;
        assert_eq!(missing.error.as_deref(), Some("Command not found"));
    }

    #[tokio::test]
    async fn git_operations_require_git_enabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), false);
        assert_eq!(
            svc.git_status("sample").await,
            GitStatusReport::Unavailable {
                error: "Git not enabled".to_string()
            }
        );
        let pull = svc.git_pull("sample").await;
        assert!(!pull.success);
        assert_eq!(pull.error.as_deref(), Some("Git not enabled"));
    }

    #[test]
    fn open_in_editor_reports_unknown_project() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service(dir.path(), false);
        let result = svc.open_in_editor("nope");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Project not found"));
    }
}
