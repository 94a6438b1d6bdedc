//! Log levels, log bodies and the logging port
//!
//! A [`LogBody`] is an ordered key/value map whose values are stored as JSON.
//! Values that fail to serialize are kept as a debug dump so the logger can
//! still report them.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{self, Debug};

use crate::context::Ctx;

/// Keys owned by the log line itself
pub const RESERVED_KEYS: [&str; 3] = ["level", "title", "timestamp"];

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    /// Logged as `ERROR`, then the process exits
    Fatal,
}

impl Level {
    /// Parse a `LOG_LEVEL` value; anything unknown means INFO
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Level::Debug,
            "WARN" => Level::Warn,
            "ERROR" => Level::Error,
            _ => Level::Info,
        }
    }

    /// Ordering weight; fatal shares the error priority
    pub fn priority(self) -> u8 {
        match self {
            Level::Debug => 0,
            Level::Info => 1,
            Level::Warn => 2,
            Level::Error | Level::Fatal => 3,
        }
    }

    /// Label written in the `level` field
    pub fn label(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error | Level::Fatal => "ERROR",
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error | Level::Fatal => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single body value
#[derive(Clone, PartialEq)]
pub enum LogValue {
    Json(Value),
    /// Serialization failed; `dump` is the value's `Debug` output
    Unserializable { dump: String, error: String },
}

impl Debug for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Json(value) => write!(f, "{value}"),
            LogValue::Unserializable { dump, .. } => f.write_str(dump),
        }
    }
}

/// Key/value map attached to log lines and domain errors
#[derive(Clone, Default, PartialEq)]
pub struct LogBody(BTreeMap<String, LogValue>);

impl LogBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, overwriting any previous value under `key`
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Serialize + Debug,
    {
        let value = match serde_json::to_value(&value) {
            Ok(json) => LogValue::Json(json),
            Err(e) => LogValue::Unserializable {
                dump: format!("{value:?}"),
                error: e.to_string(),
            },
        };
        self.0.insert(key.into(), value);
    }

    /// Builder form of [`LogBody::insert`]
    pub fn with<T>(mut self, key: impl Into<String>, value: T) -> Self
    where
        T: Serialize + Debug,
    {
        self.insert(key, value);
        self
    }

    /// Copy every entry of `other` into `self`; `other` wins on collisions
    pub fn merge(&mut self, other: &LogBody) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<LogValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&LogValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Drop the keys reserved for the log line
    pub fn strip_reserved(&mut self) {
        for key in RESERVED_KEYS {
            self.0.remove(key);
        }
    }

    /// The body as a JSON object, or the first serialization error
    pub fn to_json(&self) -> Result<Map<String, Value>, String> {
        let mut map = Map::with_capacity(self.0.len());
        for (key, value) in &self.0 {
            match value {
                LogValue::Json(json) => {
                    map.insert(key.clone(), json.clone());
                }
                LogValue::Unserializable { error, .. } => {
                    return Err(format!("{key}: {error}"));
                }
            }
        }
        Ok(map)
    }

    /// The body as a JSON object, with unserializable values replaced by their dump
    pub fn to_json_lossy(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(key, value)| {
                let json = match value {
                    LogValue::Json(json) => json.clone(),
                    LogValue::Unserializable { dump, .. } => Value::String(dump.clone()),
                };
                (key.clone(), json)
            })
            .collect()
    }
}

impl Debug for LogBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl From<Map<String, Value>> for LogBody {
    fn from(map: Map<String, Value>) -> Self {
        LogBody(
            map.into_iter()
                .map(|(key, value)| (key, LogValue::Json(value)))
                .collect(),
        )
    }
}

/// Build a [`LogBody`] from `key => value` pairs
///
/// ```
/// use common::log_body;
///
/// let body = log_body! { "user_id" => 42, "name" => "ana" };
/// assert_eq!(body.len(), 2);
/// ```
#[macro_export]
macro_rules! log_body {
    () => {
        $crate::log::LogBody::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut body = $crate::log::LogBody::new();
        $( body.insert($key, $value); )+
        body
    }};
}

/// Structured logging port
///
/// Implementations merge the context values of `ctx` with `bodies`, in order.
pub trait LogProvider: Send + Sync {
    fn log(&self, ctx: &Ctx, level: Level, title: &str, bodies: &[LogBody]);

    fn debug(&self, ctx: &Ctx, title: &str, bodies: &[LogBody]) {
        self.log(ctx, Level::Debug, title, bodies);
    }

    fn info(&self, ctx: &Ctx, title: &str, bodies: &[LogBody]) {
        self.log(ctx, Level::Info, title, bodies);
    }

    fn warn(&self, ctx: &Ctx, title: &str, bodies: &[LogBody]) {
        self.log(ctx, Level::Warn, title, bodies);
    }

    fn error(&self, ctx: &Ctx, title: &str, bodies: &[LogBody]) {
        self.log(ctx, Level::Error, title, bodies);
    }

    /// Log at error level and terminate the process
    fn fatal(&self, ctx: &Ctx, title: &str, bodies: &[LogBody]) -> ! {
        self.log(ctx, Level::Fatal, title, bodies);
        std::process::exit(1)
    }
}
