//! JSON lines logger
//!
//! Every call emits one JSON object: `level`, `title`, `timestamp` and the
//! merged body fields at the top level.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

use crate::context::Ctx;
use crate::log::{Level, LogBody, LogProvider};

/// Title of the entry emitted when a body cannot be serialized
pub const MARSHAL_ERROR_TITLE: &str = "could-not-marshal-log-body";

/// Destination for rendered lines
pub type Sink = Arc<dyn Fn(&str) + Send + Sync>;

/// [`LogProvider`] that prints JSON lines
#[derive(Clone)]
pub struct JsonLogger {
    min_level: Level,
    sink: Sink,
}

impl JsonLogger {
    /// Logger writing to stdout; `level` is a `LOG_LEVEL` value
    pub fn new(level: &str) -> Self {
        Self::with_writer(level, std::io::stdout)
    }

    /// Logger writing through a writer factory, one write per line
    ///
    /// Failed writes are reported as `tracing` errors.
    pub fn with_writer<W>(level: &str, make_writer: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        Self::with_sink(
            level,
            Arc::new(move |line: &str| {
                let mut entry = String::with_capacity(line.len() + 1);
                entry.push_str(line);
                entry.push('\n');
                if let Err(err) = make_writer.make_writer().write_all(entry.as_bytes()) {
                    tracing::error!("could not write log entry: {err}");
                }
            }),
        )
    }

    /// Logger writing to a custom sink
    pub fn with_sink(level: &str, sink: Sink) -> Self {
        Self {
            min_level: Level::parse(level),
            sink,
        }
    }

    pub fn min_level(&self) -> Level {
        self.min_level
    }
}

impl LogProvider for JsonLogger {
    fn log(&self, ctx: &Ctx, level: Level, title: &str, bodies: &[LogBody]) {
        if level.priority() < self.min_level.priority() {
            return;
        }

        let mut body = ctx.values().clone();
        for extra in bodies {
            body.merge(extra);
        }
        body.strip_reserved();

        (self.sink)(&build_line(level, title, &body));
    }
}

/// Render a log line, falling back to a marshal error entry
pub fn build_line(level: Level, title: &str, body: &LogBody) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let fields = match body.to_json() {
        Ok(fields) => fields,
        Err(_) => return marshal_error_line(&timestamp, body),
    };

    let mut line = Map::with_capacity(fields.len() + 3);
    line.insert("level".to_string(), Value::from(level.label()));
    line.insert("title".to_string(), Value::from(title));
    line.insert("timestamp".to_string(), Value::from(timestamp));
    line.extend(fields);

    Value::Object(line).to_string()
}

fn marshal_error_line(timestamp: &str, body: &LogBody) -> String {
    serde_json::json!({
        "level": Level::Error.label(),
        "title": MARSHAL_ERROR_TITLE,
        "timestamp": timestamp,
        "body": format!("{body:?}"),
    })
    .to_string()
}
