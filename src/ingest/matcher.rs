//! Path-to-event mapping
//!
//! Maps a path relative to the watch root onto the wire-level message type and
//! the payload family used to build it. Each path matches at most one rule.

use std::path::Path;

use crate::broadcast::protocol::DomainType;

/// What kind of resource a watched file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainKind {
    Task,
    Report,
    Dashboard,
    Command,
    GameState,
}

impl DomainKind {
    /// Whether payloads for this kind carry a worker id taken from the file stem
    pub fn is_per_worker(&self) -> bool {
        matches!(self, Self::Task | Self::Report)
    }
}

/// Result of a successful match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticEvent {
    pub domain_type: DomainType,
    pub domain_kind: DomainKind,
}

enum Rule {
    /// `<dir>/<single segment>.<ext>`
    InDir {
        dir: &'static str,
        ext: &'static str,
    },
    /// An exact relative path
    Exact(&'static str),
}

impl Rule {
    fn matches(&self, rel: &str) -> bool {
        match self {
            Rule::InDir { dir, ext } => rel
                .strip_prefix(dir)
                .and_then(|rest| rest.strip_prefix('/'))
                .and_then(|file| file.strip_suffix(ext))
                .and_then(|stem| stem.strip_suffix('.'))
                .is_some_and(|stem| !stem.is_empty() && !stem.contains('/')),
            Rule::Exact(name) => rel == *name,
        }
    }
}

const RULES: &[(Rule, DomainType, DomainKind)] = &[
    (
        Rule::InDir {
            dir: "tasks",
            ext: "yaml",
        },
        DomainType::TaskUpdate,
        DomainKind::Task,
    ),
    (
        Rule::InDir {
            dir: "reports",
            ext: "yaml",
        },
        DomainType::ReportUpdate,
        DomainKind::Report,
    ),
    (
        Rule::Exact("dashboard.md"),
        DomainType::DashboardUpdate,
        DomainKind::Dashboard,
    ),
    (
        Rule::Exact("commands.yaml"),
        DomainType::CommandUpdate,
        DomainKind::Command,
    ),
    (
        Rule::Exact("game_state.yaml"),
        DomainType::GameStateUpdate,
        DomainKind::GameState,
    ),
];

/// Normalize a relative path to `/`-separated form
pub fn normalize(rel_path: &Path) -> String {
    rel_path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Classify a path relative to the watch root
pub fn match_path(rel_path: &Path) -> Option<SemanticEvent> {
    let rel = normalize(rel_path);
    RULES
        .iter()
        .find(|(rule, _, _)| rule.matches(&rel))
        .map(|(_, domain_type, domain_kind)| SemanticEvent {
            domain_type: *domain_type,
            domain_kind: *domain_kind,
        })
}

/// Worker id for per-worker kinds (the file stem)
pub fn worker_id(rel_path: &Path) -> String {
    rel_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
