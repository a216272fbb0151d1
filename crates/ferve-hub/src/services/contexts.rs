use ferve_core::{protocol::ContextSwitch, WorkContext};
use std::collections::BTreeMap;

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn context(
    name: &str,
    icon: &str,
    apps: &[&str],
    blocked_sites: Option<&[&str]>,
    description: &str,
) -> WorkContext {
    WorkContext {
        name: name.to_string(),
        icon: icon.to_string(),
        apps: owned(apps),
        blocked_sites: blocked_sites.map(owned),
        description: description.to_string(),
    }
}

pub fn work_contexts() -> BTreeMap<String, WorkContext> {
    BTreeMap::from([
        (
            "DEV".to_string(),
            context(
                "Development",
                "💻",
                &["code", "brave-browser"],
                None,
                "VS Code + browser for development",
            ),
        ),
        (
            "STUDY".to_string(),
            context(
                "Study",
                "📚",
                &["anki"],
                None,
                "Anki for flashcard review",
            ),
        ),
        (
            "FOCUS".to_string(),
            context(
                "Deep Focus",
                "🎯",
                &[],
                Some(&["youtube.com", "netflix.com", "twitter.com"]),
                "Blocks distractions + Pomodoro",
            ),
        ),
    ])
}

/// Resolves a context id. Nothing is launched; the reply lists the apps the UI should open.
pub fn switch_to(context_id: &str) -> ContextSwitch {
    match work_contexts().remove(context_id) {
        Some(ctx) => ContextSwitch {
            success: true,
            context: Some(context_id.to_string()),
            message: Some(format!("Switched to {}", ctx.name)),
            apps_to_launch: Some(ctx.apps),
            error: None,
        },
        None => ContextSwitch {
            success: false,
            error: Some("Context not found".to_string()),
            ..ContextSwitch::default()
        },
    }
}

pub fn quick_actions() -> BTreeMap<String, BTreeMap<String, String>> {
    let group = |pairs: &[(&str, &str)]| {
        pairs
            .iter()
            .map(|(name, cmd)| (name.to_string(), cmd.to_string()))
            .collect::<BTreeMap<_, _>>()
    };
    BTreeMap::from([
        (
            "git".to_string(),
            group(&[
                ("status", "git status"),
                ("pull", "git pull"),
                ("push", "git push"),
                ("log", "git log --oneline -10"),
                ("branches", "git branch -a"),
            ]),
        ),
        (
            "docker".to_string(),
            group(&[
                ("ps", "docker ps"),
                ("images", "docker images"),
                ("prune", "docker system prune -f"),
                ("stop_all", "docker stop $(docker ps -q)"),
            ]),
        ),
        (
            "system".to_string(),
            group(&[
                ("ports", "lsof -i -P -n | grep LISTEN"),
                ("processes", "ps aux | head -20"),
                ("disk", "df -h"),
                ("memory", "free -h"),
            ]),
        ),
        (
            "node".to_string(),
            group(&[
                ("version", "node --version && npm --version"),
                ("clean", "rm -rf node_modules package-lock.json"),
                ("outdated", "npm outdated"),
            ]),
        ),
    ])
}
