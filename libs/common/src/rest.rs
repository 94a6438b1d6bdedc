//! Generic REST client port
//!
//! [`RestProvider`] issues HTTP calls with bodies of several shapes, optional
//! bounded retries and optional streamed responses. [`HttpClient`] is the
//! reqwest-backed implementation.

pub mod client;
pub mod multipart;
pub mod retry;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use thiserror::Error;

pub use reqwest::{Method, StatusCode};

pub use self::client::HttpClient;
pub use self::multipart::{MultipartData, MultipartSource, MultipartStream};
pub use self::retry::{
    Backoff, FixedJitter, JitterSource, RandomJitter, RetryConfig, RetryRule, default_retry_rule,
};

use crate::context::Ctx;

/// Lazily read response body
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send + Sync>>;

/// Caller-provided streaming request body
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send + Sync>>;

/// Makes a `Send`-only stream shareable; polling needs `&mut` so the lock is never contended
pub(crate) struct SyncStream<S>(Mutex<S>);

impl<S> SyncStream<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self(Mutex::new(stream))
    }
}

impl<S: Stream + Unpin> Stream for SyncStream<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        let inner = self
            .get_mut()
            .0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        Pin::new(inner).poll_next(cx)
    }
}

/// Bytes of an error payload kept in [`RestError::UnexpectedStatus`] messages
const SNIPPET_LEN: usize = 512;

/// Request body shapes
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Text(String),
    /// Cannot be replayed, so only valid with a single attempt
    Stream(BodyStream),
    /// Sent as `application/json`
    Json(Value),
    /// Rendered on the fly; cannot be replayed either
    Multipart(MultipartData),
}

impl Body {
    /// JSON body from any serializable value
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RestError> {
        Ok(Body::Json(serde_json::to_value(value)?))
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Vec<u8>>> + Send + Sync + 'static,
    {
        Body::Stream(Box::pin(stream))
    }

    /// Whether the body can only be sent once
    pub fn is_streaming(&self) -> bool {
        matches!(self, Body::Stream(_) | Body::Multipart(_))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Body::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Body::Stream(_) => f.write_str("Stream"),
            Body::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Body::Multipart(form) => f.debug_tuple("Multipart").field(form).finish(),
        }
    }
}

/// Everything about a call except its method and URL
#[derive(Debug, Default)]
pub struct RequestData {
    pub body: Body,
    pub headers: HashMap<String, String>,
    /// Expose a successful response body as a stream instead of buffering it
    pub stream: bool,
    pub retry: RetryConfig,
}

impl RequestData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Normalized HTTP response
pub struct Response {
    pub status_code: u16,
    /// First value of every response header, keyed by lowercase name
    pub header: HashMap<String, String>,
    /// Buffered body; empty when the body is streamed
    pub body: Vec<u8>,
    stream: Option<ByteStream>,
}

impl Response {
    pub fn new(status_code: u16, header: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status_code,
            header,
            body,
            stream: None,
        }
    }

    pub(crate) fn streamed(status_code: u16, header: HashMap<String, String>, stream: ByteStream) -> Self {
        Self {
            status_code,
            header,
            body: Vec::new(),
            stream: Some(stream),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Take the body stream out of a streamed response
    pub fn take_stream(&mut self) -> Option<ByteStream> {
        self.stream.take()
    }

    /// Body as a stream, whether or not it was buffered
    pub fn into_stream(self) -> ByteStream {
        match self.stream {
            Some(stream) => stream,
            None => Box::pin(futures_util::stream::once(std::future::ready(Ok(self.body)))),
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status_code", &self.status_code)
            .field("header", &self.header)
            .field("body", &self.text())
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

/// Errors returned by [`RestProvider`] calls
#[derive(Error, Debug)]
pub enum RestError {
    #[error("streaming request bodies cannot be retried (max attempts: {0})")]
    StreamNotReplayable(u32),

    #[error("could not encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{method} {url}: request cancelled")]
    Cancelled { method: String, url: String },

    #[error("{method} {url}: {source}")]
    Transport {
        method: String,
        url: String,
        source: reqwest::Error,
    },

    /// Non-2xx status; the normalized response is kept
    #[error("{method} {url}: unexpected status code: {status}, payload: {payload}")]
    UnexpectedStatus {
        method: String,
        url: String,
        status: u16,
        payload: String,
        response: Box<Response>,
    },
}

impl RestError {
    /// The response received alongside the error, if any
    pub fn response(&self) -> Option<&Response> {
        match self {
            RestError::UnexpectedStatus { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            RestError::UnexpectedStatus { response, .. } => Some(*response),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status_code)
    }

    pub(crate) fn unexpected_status(method: &Method, url: &str, response: Response) -> Self {
        let payload: String = response.text().chars().take(SNIPPET_LEN).collect();
        RestError::UnexpectedStatus {
            method: method.to_string(),
            url: url.to_string(),
            status: response.status_code,
            payload,
            response: Box::new(response),
        }
    }
}

/// HTTP client port
#[async_trait]
pub trait RestProvider: Send + Sync {
    async fn request(
        &self,
        ctx: &Ctx,
        method: Method,
        url: &str,
        data: RequestData,
    ) -> Result<Response, RestError>;

    async fn get(&self, ctx: &Ctx, url: &str, data: RequestData) -> Result<Response, RestError> {
        self.request(ctx, Method::GET, url, data).await
    }

    async fn post(&self, ctx: &Ctx, url: &str, data: RequestData) -> Result<Response, RestError> {
        self.request(ctx, Method::POST, url, data).await
    }

    async fn put(&self, ctx: &Ctx, url: &str, data: RequestData) -> Result<Response, RestError> {
        self.request(ctx, Method::PUT, url, data).await
    }

    async fn patch(&self, ctx: &Ctx, url: &str, data: RequestData) -> Result<Response, RestError> {
        self.request(ctx, Method::PATCH, url, data).await
    }

    async fn delete(&self, ctx: &Ctx, url: &str, data: RequestData) -> Result<Response, RestError> {
        self.request(ctx, Method::DELETE, url, data).await
    }
}
