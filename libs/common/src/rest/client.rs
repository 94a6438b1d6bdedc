//! reqwest-backed [`RestProvider`]

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tracing::debug;

use super::retry::retry;
use super::{Body, Method, RequestData, Response, RestError, RestProvider, SyncStream};
use crate::context::Ctx;

/// Default overall timeout of a single attempt
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client issuing [`RestProvider`] calls through reqwest
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    /// Client whose attempts time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::InvalidRequest(format!("could not build http client: {e}")))?;
        Ok(Self { http })
    }

    /// Wrap an existing reqwest client
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        body: Body,
        headers: HashMap<String, String>,
    ) -> Result<reqwest::Request, RestError> {
        let has_content_type = headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));

        // A form's Content-Type must carry its own boundary.
        let is_form = matches!(body, Body::Multipart(_));

        let mut builder = self.http.request(method, url);
        for (name, value) in &headers {
            if is_form && name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match body {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes),
            Body::Text(text) => builder.body(text),
            Body::Json(value) => {
                let payload = serde_json::to_vec(&value)?;
                if !has_content_type {
                    builder = builder.header(CONTENT_TYPE, "application/json");
                }
                builder.body(payload)
            }
            Body::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
            Body::Multipart(form) => {
                let stream = form.into_stream();
                builder
                    .header(CONTENT_TYPE, stream.content_type())
                    .body(reqwest::Body::wrap_stream(stream))
            }
        };

        builder
            .build()
            .map_err(|e| RestError::InvalidRequest(e.to_string()))
    }
}

/// First value of every header
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .keys()
        .filter_map(|name| {
            let value = headers.get(name)?.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl RestProvider for HttpClient {
    async fn request(
        &self,
        ctx: &Ctx,
        method: Method,
        url: &str,
        data: RequestData,
    ) -> Result<Response, RestError> {
        let RequestData {
            body,
            headers,
            stream,
            retry: retry_config,
        } = data;

        let max_attempts = retry_config.max_attempts.max(1);
        if body.is_streaming() && max_attempts > 1 {
            return Err(RestError::StreamNotReplayable(max_attempts));
        }

        let cancelled = || RestError::Cancelled {
            method: method.to_string(),
            url: url.to_string(),
        };
        if ctx.is_cancelled() {
            return Err(cancelled());
        }

        // Streaming bodies cannot be cloned; they are taken on the single attempt.
        let mut template = Some(self.build_request(method.clone(), url, body, headers)?);
        let backoff = retry_config.backoff();
        let rule = retry_config.rule.clone();

        let outcome = retry(
            ctx,
            &backoff,
            max_attempts,
            || {
                let request = template
                    .as_ref()
                    .and_then(reqwest::Request::try_clone)
                    .or_else(|| template.take());
                let http = self.http.clone();
                let method = method.clone();
                async move {
                    let Some(request) = request else {
                        return Err(RestError::StreamNotReplayable(max_attempts));
                    };
                    debug!("{} {}", method, url);
                    tokio::select! {
                        result = http.execute(request) => result.map_err(|source| RestError::Transport {
                            method: method.to_string(),
                            url: url.to_string(),
                            source,
                        }),
                        _ = ctx.cancelled() => Err(cancelled()),
                    }
                }
            },
            |outcome| match outcome {
                Ok(response) => rule(Some(response.status()), None),
                Err(err) => rule(None, Some(err)),
            },
        )
        .await;

        let response = outcome?;
        let status = response.status();
        let header = flatten_headers(response.headers());

        if stream && status.is_success() {
            let body = response
                .bytes_stream()
                .map_ok(|chunk| chunk.to_vec())
                .map_err(io::Error::other);
            let body = Box::pin(SyncStream::new(body.boxed()));
            return Ok(Response::streamed(status.as_u16(), header, body));
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| RestError::Transport {
                method: method.to_string(),
                url: url.to_string(),
                source,
            })?
            .to_vec();
        let response = Response::new(status.as_u16(), header, body);

        if !status.is_success() {
            return Err(RestError::unexpected_status(&method, url, response));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::{MultipartData, MultipartSource, RetryConfig};
    use reqwest::header::HeaderValue;

    #[test]
    fn test_flatten_headers_keeps_first_value() {
        let mut headers = HeaderMap::new();
        headers.append("x-multi", HeaderValue::from_static("first"));
        headers.append("x-multi", HeaderValue::from_static("second"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let flat = flatten_headers(&headers);

        assert_eq!(flat.len(), 2);
        assert_eq!(flat["x-multi"], "first");
        assert_eq!(flat["content-type"], "application/json");
    }

    #[test]
    fn test_form_content_type_replaces_the_callers() {
        let client = HttpClient::new(DEFAULT_TIMEOUT).unwrap();
        let headers = HashMap::from([
            ("content-type".to_string(), "multipart/form-data".to_string()),
            ("x-fake".to_string(), "fake-value".to_string()),
        ]);
        let form = MultipartData::new().field("a", MultipartSource::plain(&b"1"[..]));

        let request = client
            .build_request(Method::POST, "http://upstream/upload", Body::Multipart(form), headers)
            .unwrap();

        let content_types: Vec<_> = request.headers().get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(content_types.len(), 1);
        let value = content_types[0].to_str().unwrap();
        assert!(value.starts_with("multipart/form-data; boundary="));
        assert_eq!(request.headers()["x-fake"], "fake-value");
    }

    #[test]
    fn test_json_keeps_the_callers_content_type() {
        let client = HttpClient::new(DEFAULT_TIMEOUT).unwrap();
        let headers = HashMap::from([(
            "Content-Type".to_string(),
            "application/merge-patch+json".to_string(),
        )]);

        let request = client
            .build_request(
                Method::PATCH,
                "http://upstream/users/1",
                Body::json(&serde_json::json!({"name": "x"})).unwrap(),
                headers,
            )
            .unwrap();

        let content_types: Vec<&str> = request
            .headers()
            .get_all(CONTENT_TYPE)
            .iter()
            .map(|value| value.to_str().unwrap())
            .collect();
        assert_eq!(content_types, vec!["application/merge-patch+json"]);
    }

    #[tokio::test]
    async fn test_streaming_body_with_retries_is_rejected() {
        let client = HttpClient::new(DEFAULT_TIMEOUT).unwrap();
        let data = RequestData::new()
            .with_body(Body::stream(futures_util::stream::empty()))
            .with_retry(RetryConfig::default().with_max_attempts(3));

        let err = client
            .post(&Ctx::background(), "http://127.0.0.1:9/unused", data)
            .await
            .unwrap_err();

        assert!(matches!(err, RestError::StreamNotReplayable(3)));
    }

    #[tokio::test]
    async fn test_cancelled_context_sends_nothing() {
        let client = HttpClient::new(DEFAULT_TIMEOUT).unwrap();
        let (ctx, handle) = Ctx::background().with_cancel();
        handle.cancel();

        let err = client
            .get(&ctx, "http://127.0.0.1:9/unused", RequestData::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RestError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let client = HttpClient::new(DEFAULT_TIMEOUT).unwrap();
        let err = client
            .get(&Ctx::background(), "not a url", RequestData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::InvalidRequest(_)));
    }
}
