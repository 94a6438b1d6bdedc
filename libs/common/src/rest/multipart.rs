//! Streaming `multipart/form-data` bodies
//!
//! A [`MultipartStream`] renders its parts on demand: a part header is only
//! produced once the previous field's reader is exhausted, so the payload is
//! never held in memory as a whole.

use futures_util::Stream;
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Byte source of a field
pub type Reader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Default read size per chunk
const CHUNK_SIZE: usize = 8 * 1024;

/// Field payload and its part headers
pub enum MultipartSource {
    /// No filename, no content type
    Plain(Reader),
    /// Sent with a filename and `application/octet-stream`
    File { reader: Reader, filename: String },
    /// Sent with an explicit content type
    Item { reader: Reader, content_type: String },
}

impl MultipartSource {
    pub fn plain(reader: impl AsyncRead + Send + Sync + Unpin + 'static) -> Self {
        MultipartSource::Plain(Box::new(reader))
    }

    pub fn file(
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        filename: impl Into<String>,
    ) -> Self {
        MultipartSource::File {
            reader: Box::new(reader),
            filename: filename.into(),
        }
    }

    pub fn item(
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        content_type: impl Into<String>,
    ) -> Self {
        MultipartSource::Item {
            reader: Box::new(reader),
            content_type: content_type.into(),
        }
    }

    fn into_reader(self) -> Reader {
        match self {
            MultipartSource::Plain(reader)
            | MultipartSource::File { reader, .. }
            | MultipartSource::Item { reader, .. } => reader,
        }
    }
}

impl fmt::Debug for MultipartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartSource::Plain(_) => f.write_str("Plain"),
            MultipartSource::File { filename, .. } => {
                f.debug_struct("File").field("filename", filename).finish()
            }
            MultipartSource::Item { content_type, .. } => f
                .debug_struct("Item")
                .field("content_type", content_type)
                .finish(),
        }
    }
}

/// Ordered form fields
#[derive(Debug, Default)]
pub struct MultipartData {
    fields: Vec<(String, MultipartSource)>,
}

impl MultipartData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, source: MultipartSource) -> Self {
        self.add(name, source);
        self
    }

    pub fn add(&mut self, name: impl Into<String>, source: MultipartSource) {
        self.fields.push((name.into(), source));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Stream with a random boundary
    pub fn into_stream(self) -> MultipartStream {
        MultipartStream::new(self, random_boundary())
    }
}

/// Pull-based renderer of a [`MultipartData`]
pub struct MultipartStream {
    boundary: String,
    pending: VecDeque<(String, MultipartSource)>,
    current: Option<Reader>,
    started: bool,
    closed: bool,
    chunk_size: usize,
}

impl MultipartStream {
    fn new(form: MultipartData, boundary: String) -> Self {
        Self {
            boundary,
            pending: form.fields.into(),
            current: None,
            started: false,
            closed: false,
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Maximum size of the chunks read from field readers
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value of the request `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn part_header(&mut self, name: &str, source: &MultipartSource) -> String {
        let mut header = String::new();
        if self.started {
            header.push_str("\r\n");
        }
        self.started = true;

        let _ = write!(
            header,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.boundary,
            escape_quotes(name)
        );
        match source {
            MultipartSource::Plain(_) => header.push_str("\r\n"),
            MultipartSource::File { filename, .. } => {
                let _ = write!(
                    header,
                    "; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n",
                    escape_quotes(filename)
                );
            }
            MultipartSource::Item { content_type, .. } if content_type.is_empty() => {
                header.push_str("\r\n")
            }
            MultipartSource::Item { content_type, .. } => {
                let _ = write!(header, "\r\nContent-Type: {content_type}\r\n");
            }
        }
        header.push_str("\r\n");
        header
    }
}

impl Stream for MultipartStream {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(reader) = this.current.as_mut() {
                let mut chunk = vec![0u8; this.chunk_size];
                let mut buf = ReadBuf::new(&mut chunk);
                match Pin::new(reader).poll_read(cx, &mut buf) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e))),
                    Poll::Ready(Ok(())) => {
                        let read = buf.filled().len();
                        if read > 0 {
                            chunk.truncate(read);
                            return Poll::Ready(Some(Ok(chunk)));
                        }
                        this.current = None;
                        continue;
                    }
                }
            }

            if let Some((name, source)) = this.pending.pop_front() {
                let header = this.part_header(&name, &source);
                this.current = Some(source.into_reader());
                return Poll::Ready(Some(Ok(header.into_bytes())));
            }

            if !this.closed {
                this.closed = true;
                let lead = if this.started { "\r\n" } else { "" };
                let closing = format!("{lead}--{}--\r\n", this.boundary);
                return Poll::Ready(Some(Ok(closing.into_bytes())));
            }

            return Poll::Ready(None);
        }
    }
}

/// Escape backslashes and double quotes in header parameter values
pub fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn random_boundary() -> String {
    let bytes: [u8; 30] = rand::random();
    bytes.iter().fold(String::with_capacity(60), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
