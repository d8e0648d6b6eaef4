use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A log record persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub span_id: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
}

/// Query parameters for searching persisted logs.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink that persists warn+ logs.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
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
                 span_id TEXT,
                 session_id TEXT,
                 request_id TEXT,
                 created_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_session ON logs(session_id);
             CREATE INDEX IF NOT EXISTS idx_logs_request ON logs(request_id);
             CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        // A failed log write must never take the caller down.
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, span_id, session_id, request_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.span_id,
                record.session_id,
                record.request_id,
            ],
        );
    }

    /// Newest first. `level` matches exactly (any case), `target` as a substring.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let filters = [
            ("level = ?", q.level.as_ref().map(|l| l.to_uppercase())),
            ("target LIKE ?", q.target.as_ref().map(|t| format!("%{t}%"))),
            ("session_id = ?", q.session_id.clone()),
            ("request_id = ?", q.request_id.clone()),
            ("timestamp >= ?", q.since.clone()),
        ];
        let (clauses, values): (Vec<&str>, Vec<String>) = filters
            .into_iter()
            .filter_map(|(clause, value)| value.map(|v| (clause, v)))
            .unzip();

        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, span_id, session_id, request_id FROM logs",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                span_id: row.get(6)?,
                session_id: row.get(7)?,
                request_id: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    span_id: Option<String>,
    session_id: Option<String>,
    request_id: Option<String>,
}

/// tracing Layer that writes warn+ events to SQLite.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Correlation ids lifted out of event and span fields.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    session_id: Option<String>,
    request_id: Option<String>,
}

impl FieldVisitor {
    fn take(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "session_id" => self.session_id = Some(value),
            "request_id" => self.request_id = Some(value),
            other => {
                self.fields.insert(other.to_string(), value.into());
            }
        }
    }

    fn extra(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        match field.name() {
            "message" => self.take("message", rendered),
            name => self.take(name, rendered.trim_matches('"').to_string()),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.take(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.extra(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.extra(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.extra(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.extra(field, value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if visitor.session_id.is_none() || visitor.request_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(ids) = extensions.get::<SpanIds>() {
                        if visitor.session_id.is_none() {
                            visitor.session_id.clone_from(&ids.session_id);
                        }
                        if visitor.request_id.is_none() {
                            visitor.request_id.clone_from(&ids.request_id);
                        }
                    }
                }
            }
        }

        let span_id = ctx
            .event_scope(event)
            .and_then(|mut scope| scope.next())
            .map(|span| format!("{:?}", span.id()));

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            span_id,
            session_id: visitor.session_id,
            request_id: visitor.request_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if visitor.session_id.is_some() || visitor.request_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanIds {
                    session_id: visitor.session_id,
                    request_id: visitor.request_id,
                });
            }
        }
    }
}

/// Stored on spans so child events inherit the ids.
struct SpanIds {
    session_id: Option<String>,
    request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tracing_subscriber::layer::SubscriberExt;

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("warden-test-logs-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("logs.db")
    }

    fn record(sink: &SqliteLogSink, ts: &str, level: &str, target: &str, message: &str, session: Option<&str>) {
        sink.insert(&LogInsert {
            timestamp: ts.into(),
            level: level.into(),
            target: target.into(),
            message: message.into(),
            fields: None,
            span_id: None,
            session_id: session.map(String::from),
            request_id: None,
        });
    }

    #[test]
    fn filters_by_level_target_and_session() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        record(&sink, "2026-03-01T12:00:00Z", "WARN", "warden_dispatch::dispatcher", "retrying", Some("sess_a"));
        record(&sink, "2026-03-01T12:00:01Z", "ERROR", "warden_store::sessions", "write failed", Some("sess_b"));
        assert_eq!(sink.count().unwrap(), 2);

        let by_level = sink
            .query(&LogQuery { level: Some("error".into()), ..Default::default() })
            .unwrap();
        assert_eq!(by_level.len(), 1);
        assert_eq!(by_level[0].message, "write failed");

        let by_target = sink
            .query(&LogQuery { target: Some("dispatch".into()), ..Default::default() })
            .unwrap();
        assert_eq!(by_target[0].message, "retrying");

        let by_session = sink
            .query(&LogQuery { session_id: Some("sess_b".into()), ..Default::default() })
            .unwrap();
        assert_eq!(by_session.len(), 1);
        assert_eq!(by_session[0].target, "warden_store::sessions");
    }

    #[test]
    fn since_and_limit() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        for i in 0..10 {
            record(&sink, &format!("2026-03-01T12:00:{i:02}Z"), "WARN", "t", &format!("msg {i}"), None);
        }

        let limited = sink.query(&LogQuery { limit: Some(3), ..Default::default() }).unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[0].message, "msg 9");

        let since = sink
            .query(&LogQuery { since: Some("2026-03-01T12:00:08Z".into()), ..Default::default() })
            .unwrap();
        assert_eq!(since.len(), 2);
    }

    #[test]
    fn layer_persists_warnings_with_span_ids() {
        let sink = Arc::new(SqliteLogSink::new(&temp_db()).unwrap());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("dispatch", request_id = "req_1", session_id = "sess_1");
            let _guard = span.enter();
            tracing::info!("not persisted");
            tracing::warn!(attempt = 2u64, "timed out");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.level, "WARN");
        assert_eq!(row.message, "timed out");
        assert_eq!(row.request_id.as_deref(), Some("req_1"));
        assert_eq!(row.session_id.as_deref(), Some("sess_1"));
        assert!(row.fields.as_deref().unwrap_or_default().contains("\"attempt\":2"));

        let by_request = sink
            .query(&LogQuery { request_id: Some("req_1".into()), ..Default::default() })
            .unwrap();
        assert_eq!(by_request.len(), 1);
    }
}
