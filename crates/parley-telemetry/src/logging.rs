use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// tracing layer that persists warn+ events to SQLite so failed sessions can
/// be inspected after the fact (`sqlite3 ~/.parley/database/logs.db`).
/// Write-only: the client never reads these records back at runtime.
pub struct SqliteLogLayer {
    conn: Mutex<Connection>,
}

impl SqliteLogLayer {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 conversation_id TEXT,
                 agent_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_logs_conversation ON logs(conversation_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &Record) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, conversation_id, agent_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.conversation_id,
                record.agent_id,
            ],
        );
    }
}

struct Record {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    conversation_id: Option<String>,
    agent_id: Option<String>,
}

/// Extracts the message, the correlation ids, and everything else as a JSON
/// bag from a tracing event or span.
#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    conversation_id: Option<String>,
    agent_id: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl EventVisitor {
    /// Route a stringly-typed value: the well-known names get dedicated
    /// columns, the rest land in the fields bag.
    fn assign(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "conversation_id" => self.conversation_id = Some(value),
            "agent_id" => self.agent_id = Some(value),
            _ => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value));
            }
        }
    }

    fn fields_json(&self) -> Option<String> {
        if self.fields.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&self.fields).unwrap_or_default())
        }
    }
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        // Debug-rendered strings keep their quotes; strip them for the
        // dedicated columns.
        self.assign(field.name(), rendered.trim_matches('"').to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.assign(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::Number(value.into()),
        );
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::Number(value.into()),
        );
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields
                .insert(field.name().to_string(), serde_json::Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Stored on spans so events inside an instrumented request inherit its
/// conversation_id / agent_id.
struct SpanFields {
    conversation_id: Option<String>,
    agent_id: Option<String>,
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        // Only persist WARN and above
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        // Fall back to the enclosing spans for the correlation ids
        if visitor.conversation_id.is_none() || visitor.agent_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(fields) = extensions.get::<SpanFields>() {
                        if visitor.conversation_id.is_none() {
                            visitor.conversation_id.clone_from(&fields.conversation_id);
                        }
                        if visitor.agent_id.is_none() {
                            visitor.agent_id.clone_from(&fields.agent_id);
                        }
                    }
                }
            }
        }

        self.insert(&Record {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.clone().unwrap_or_default(),
            fields: visitor.fields_json(),
            conversation_id: visitor.conversation_id,
            agent_id: visitor.agent_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        attrs.record(&mut visitor);

        if visitor.conversation_id.is_some() || visitor.agent_id.is_some() {
            if let Some(span) = ctx.span(id) {
                let mut extensions = span.extensions_mut();
                extensions.insert(SpanFields {
                    conversation_id: visitor.conversation_id,
                    agent_id: visitor.agent_id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tracing_subscriber::layer::SubscriberExt;

    struct Row {
        level: String,
        target: String,
        message: String,
        fields: Option<String>,
        conversation_id: Option<String>,
        agent_id: Option<String>,
    }

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("parley-test-logs-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("test-logs.db")
    }

    /// Read the table back through a second connection, the way an operator
    /// inspecting the db would.
    fn read_rows(path: &Path) -> Vec<Row> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT level, target, message, fields, conversation_id, agent_id
                 FROM logs ORDER BY id",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |row| {
                Ok(Row {
                    level: row.get(0)?,
                    target: row.get(1)?,
                    message: row.get(2)?,
                    fields: row.get(3)?,
                    conversation_id: row.get(4)?,
                    agent_id: row.get(5)?,
                })
            })
            .unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    fn with_layer(path: &Path, f: impl FnOnce()) {
        let layer = SqliteLogLayer::open(path).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn warn_and_error_events_persisted_below_info_skipped() {
        let path = temp_db();
        with_layer(&path, || {
            tracing::warn!("slow backend");
            tracing::error!("request failed");
            tracing::info!("chatty");
            tracing::debug!("chattier");
        });

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].level, "WARN");
        assert_eq!(rows[0].message, "slow backend");
        assert_eq!(rows[1].level, "ERROR");
        assert_eq!(rows[1].message, "request failed");
    }

    #[test]
    fn event_fields_split_into_columns_and_json_bag() {
        let path = temp_db();
        with_layer(&path, || {
            tracing::warn!(
                conversation_id = "conv_123",
                agent_id = "math-agent",
                attempt = 3,
                "rate limited"
            );
        });

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].conversation_id.as_deref(), Some("conv_123"));
        assert_eq!(rows[0].agent_id.as_deref(), Some("math-agent"));
        assert_eq!(rows[0].fields.as_deref(), Some(r#"{"attempt":3}"#));
        assert!(rows[0].target.contains("logging"));
    }

    #[test]
    fn events_inherit_conversation_id_from_enclosing_span() {
        let path = temp_db();
        with_layer(&path, || {
            let span = tracing::warn_span!("send", conversation_id = "conv_span");
            let _guard = span.enter();
            tracing::warn!("dropping malformed chunk");
        });

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].conversation_id.as_deref(), Some("conv_span"));
    }

    #[test]
    fn event_field_wins_over_span_field() {
        let path = temp_db();
        with_layer(&path, || {
            let span = tracing::warn_span!("send", conversation_id = "conv_outer");
            let _guard = span.enter();
            tracing::warn!(conversation_id = "conv_inner", "retagged");
        });

        let rows = read_rows(&path);
        assert_eq!(rows[0].conversation_id.as_deref(), Some("conv_inner"));
    }

    #[test]
    fn open_creates_parent_directories() {
        let path = temp_db().join("nested/deeper/logs.db");
        let layer = SqliteLogLayer::open(&path);
        assert!(layer.is_ok());
        assert!(path.exists());
    }
}
