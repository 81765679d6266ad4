//! Payload construction for changed resources
//!
//! Every failure mode degrades to a well-formed payload describing the failure;
//! nothing here returns an error to the caller.
//!
//! | Kind        | Family          | Success shape            |
//! |-------------|-----------------|--------------------------|
//! | task        | structured doc  | `{workerId, task}`       |
//! | report      | structured doc  | `{workerId, report}`     |
//! | game state  | structured doc  | `{state}`                |
//! | dashboard   | free text       | `{content}`              |
//! | command     | structured list | `{commands: [...]}`      |

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::error::RelayError;

use super::matcher::{worker_id, DomainKind};
use super::watcher::EventKind;

/// Field holding the list in the command file
const COMMANDS_FIELD: &str = "commands";

/// Builds transport payloads from files on disk
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    retry_delay: Duration,
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl PayloadBuilder {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    /// Build the payload for one accepted change
    pub async fn build(
        &self,
        abs_path: &Path,
        rel_path: &Path,
        kind: EventKind,
        domain_kind: DomainKind,
    ) -> Value {
        if kind == EventKind::Removed {
            return deleted_payload(rel_path, domain_kind);
        }

        match domain_kind {
            DomainKind::Task => self.structured(abs_path, identity(rel_path, domain_kind), "task").await,
            DomainKind::Report => {
                self.structured(abs_path, identity(rel_path, domain_kind), "report").await
            }
            DomainKind::GameState => self.structured(abs_path, Map::new(), "state").await,
            DomainKind::Dashboard => free_text(abs_path).await,
            DomainKind::Command => structured_list(abs_path).await,
        }
    }

    /// Parse a structured document, retrying once after the retry delay
    async fn structured(&self, abs_path: &Path, mut out: Map<String, Value>, field: &str) -> Value {
        let first = read_and_parse(abs_path).await;
        let outcome = match first {
            Ok(value) => Ok(value),
            Err(first_err) => {
                tracing::debug!(
                    path = %abs_path.display(),
                    error = %first_err.message,
                    "Parse failed, retrying once"
                );
                tokio::time::sleep(self.retry_delay).await;
                read_and_parse(abs_path).await
            }
        };

        match outcome {
            Ok(value) => {
                out.insert(field.to_string(), value);
            }
            Err(failure) => {
                let err = RelayError::Parse {
                    path: abs_path.to_path_buf(),
                    message: failure.message.clone(),
                };
                tracing::warn!(error = %err, "Emitting error payload after retry");
                out.insert("error".to_string(), Value::String(failure.message));
                out.insert("raw".to_string(), Value::String(failure.raw));
            }
        }
        Value::Object(out)
    }
}

/// A read or parse failure, carrying whatever bytes were read
#[derive(Debug)]
struct ParseFailure {
    message: String,
    raw: String,
}

async fn read_and_parse(abs_path: &Path) -> Result<Value, ParseFailure> {
    let bytes = tokio::fs::read(abs_path).await.map_err(|e| ParseFailure {
        message: e.to_string(),
        raw: String::new(),
    })?;
    let raw = String::from_utf8_lossy(&bytes).into_owned();
    match serde_yaml::from_str::<Value>(&raw) {
        Ok(value) => Ok(value),
        Err(e) => Err(ParseFailure {
            message: e.to_string(),
            raw,
        }),
    }
}

fn identity(rel_path: &Path, domain_kind: DomainKind) -> Map<String, Value> {
    let mut out = Map::new();
    if domain_kind.is_per_worker() {
        out.insert("workerId".to_string(), Value::String(worker_id(rel_path)));
    }
    out
}

/// Minimal marker for a removed resource; performs no I/O
pub fn deleted_payload(rel_path: &Path, domain_kind: DomainKind) -> Value {
    match domain_kind {
        DomainKind::Task | DomainKind::Report => {
            json!({ "workerId": worker_id(rel_path), "deleted": true })
        }
        DomainKind::Dashboard => json!({ "content": "", "deleted": true }),
        DomainKind::Command => json!({ COMMANDS_FIELD: [], "deleted": true }),
        DomainKind::GameState => json!({ "state": null, "deleted": true }),
    }
}

async fn free_text(abs_path: &Path) -> Value {
    match tokio::fs::read_to_string(abs_path).await {
        Ok(content) => json!({ "content": content }),
        Err(e) => json!({ "content": "", "error": e.to_string() }),
    }
}

async fn structured_list(abs_path: &Path) -> Value {
    match read_and_parse(abs_path).await {
        Ok(doc) => json!({ COMMANDS_FIELD: unwrap_list(doc) }),
        Err(failure) if failure.raw.is_empty() => {
            json!({ COMMANDS_FIELD: [], "error": failure.message })
        }
        Err(failure) => {
            json!({ COMMANDS_FIELD: [], "error": failure.message, "raw": failure.raw })
        }
    }
}

fn unwrap_list(doc: Value) -> Value {
    match doc {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => match map.remove(COMMANDS_FIELD) {
            Some(Value::Array(items)) => Value::Array(items),
            _ => Value::Array(Vec::new()),
        },
        _ => Value::Array(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn builder() -> PayloadBuilder {
        PayloadBuilder::new(Duration::from_millis(5))
    }

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_removal_needs_no_io() {
        let rel = Path::new("reports/report_7.yaml");
        let payload = builder()
            .build(Path::new("/does/not/exist"), rel, EventKind::Removed, DomainKind::Report)
            .await;
        assert_eq!(payload, json!({ "workerId": "report_7", "deleted": true }));
    }

    #[tokio::test]
    async fn test_task_payload() {
        let dir = tempfile::tempdir().unwrap();
        let abs = write(dir.path(), "tasks/ashigaru3.yaml", "task:\n  status: assigned\n");
        let payload = builder()
            .build(&abs, Path::new("tasks/ashigaru3.yaml"), EventKind::Modified, DomainKind::Task)
            .await;
        assert_eq!(payload["workerId"], "ashigaru3");
        assert_eq!(payload["task"]["task"]["status"], "assigned");
    }

    #[tokio::test]
    async fn test_malformed_report_yields_error_payload() {
        let dir = tempfile::tempdir().unwrap();
        let abs = write(dir.path(), "reports/r1.yaml", "a: [unclosed\n");
        let payload = builder()
            .build(&abs, Path::new("reports/r1.yaml"), EventKind::Added, DomainKind::Report)
            .await;
        assert_eq!(payload["workerId"], "r1");
        assert!(payload["error"].as_str().is_some_and(|s| !s.is_empty()));
        assert_eq!(payload["raw"], "a: [unclosed\n");
        assert!(payload.get("report").is_none());
    }

    #[tokio::test]
    async fn test_retry_picks_up_completed_write() {
        let dir = tempfile::tempdir().unwrap();
        let abs = write(dir.path(), "tasks/a.yaml", "half: [written\n");
        let fixed = abs.clone();

        let builder = PayloadBuilder::new(Duration::from_millis(200));
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::write(&fixed, "half: [written]\n").unwrap();
        });

        let payload = builder
            .build(&abs, Path::new("tasks/a.yaml"), EventKind::Modified, DomainKind::Task)
            .await;
        writer.await.unwrap();
        assert_eq!(payload["task"]["half"], json!(["written"]));
        assert!(payload.get("error").is_none());
    }

    #[tokio::test]
    async fn test_malformed_command_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = "commands: [\n  - broken";
        let abs = write(dir.path(), "commands.yaml", raw);
        let payload = builder()
            .build(&abs, Path::new("commands.yaml"), EventKind::Modified, DomainKind::Command)
            .await;
        assert_eq!(payload["commands"], json!([]));
        assert_eq!(payload["raw"], raw);
        assert!(payload["error"].is_string());
    }

    #[tokio::test]
    async fn test_command_list_unwrapping() {
        let dir = tempfile::tempdir().unwrap();
        let abs = write(dir.path(), "commands.yaml", "commands:\n  - id: c1\n  - id: c2\n");
        let payload = structured_list(&abs).await;
        assert_eq!(payload["commands"].as_array().unwrap().len(), 2);

        std::fs::write(&abs, "- id: c1\n").unwrap();
        assert_eq!(structured_list(&abs).await["commands"][0]["id"], "c1");

        std::fs::write(&abs, "other: 1\n").unwrap();
        assert_eq!(structured_list(&abs).await, json!({ "commands": [] }));
    }

    #[tokio::test]
    async fn test_unreadable_dashboard() {
        let payload = free_text(Path::new("/does/not/exist/dashboard.md")).await;
        assert_eq!(payload["content"], "");
        assert!(payload["error"].is_string());
    }

    #[tokio::test]
    async fn test_dashboard_text() {
        let dir = tempfile::tempdir().unwrap();
        let abs = write(dir.path(), "dashboard.md", "# Status\n");
        let payload = builder()
            .build(&abs, Path::new("dashboard.md"), EventKind::Modified, DomainKind::Dashboard)
            .await;
        assert_eq!(payload, json!({ "content": "# Status\n" }));
    }

    #[test]
    fn test_deleted_shapes() {
        let p = Path::new("x");
        assert_eq!(deleted_payload(p, DomainKind::Command), json!({ "commands": [], "deleted": true }));
        assert_eq!(deleted_payload(p, DomainKind::GameState), json!({ "state": null, "deleted": true }));
        assert_eq!(deleted_payload(p, DomainKind::Dashboard), json!({ "content": "", "deleted": true }));
    }
}
