//! Streaming `multipart/form-data` encoding.
//!
//! A [`Multipart`] form is a list of [`Part`]s plus a boundary token. Sending a
//! form goes through a [`MultipartEncoder`], an iterator that yields the body
//! one chunk at a time:
//!
//! ```text
//! --BOUNDARY\r\n
//! Content-Disposition: form-data; name="n"[; filename="f"]\r\n
//! Content-Type: ct\r\n
//! \r\n
//! <payload>\r\n
//! ... one section per part ...
//! --BOUNDARY--
//! ```
//!
//! ### Memory
//! Only the current part's source is open, and it is read in [`CHUNK_SIZE`]
//! buffers. The handle is dropped before the next part starts, and when the
//! encoder itself is dropped midway.
//!
//! ### Boundary
//! Generated boundaries are random alphanumeric tokens. Making sure the token
//! does not occur inside part content is up to the caller; it is not checked.
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use rand::distr::Alphanumeric;
use rand::Rng;

use super::CONTENT_TYPE_OCTET_STREAM;
use crate::errors::EncodingError;

/// Read buffer size used while streaming a part.
pub const CHUNK_SIZE: usize = 8 * 1024;

const BOUNDARY_LEN: usize = 16;
const CRLF: &[u8] = b"\r\n";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Produces a fresh reader each time a stream part is encoded.
pub type StreamFactory = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Random alphanumeric boundary token.
pub fn generate_boundary() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect()
}

/// One named section of a multipart body.
#[derive(Clone)]
pub enum Part {
    Text {
        name: String,
        value: String,
    },
    Bytes {
        name: String,
        filename: String,
        content_type: Option<String>,
        bytes: Bytes,
    },
    /// Read from disk when its turn comes. Filename and content type default
    /// to the path's base name and extension.
    File {
        name: String,
        path: PathBuf,
        filename: Option<String>,
        content_type: Option<String>,
    },
    Stream {
        name: String,
        filename: String,
        content_type: Option<String>,
        factory: StreamFactory,
    },
}

impl Part {
    pub fn name(&self) -> &str {
        match self {
            Part::Text { name, .. }
            | Part::Bytes { name, .. }
            | Part::File { name, .. }
            | Part::Stream { name, .. } => name,
        }
    }

    pub fn filename(&self) -> Option<Cow<'_, str>> {
        match self {
            Part::Text { .. } => None,
            Part::Bytes { filename, .. } | Part::Stream { filename, .. } => {
                Some(Cow::Borrowed(filename.as_str()))
            }
            Part::File { filename: Some(filename), .. } => Some(Cow::Borrowed(filename.as_str())),
            Part::File { path, .. } => path.file_name().map(|n| n.to_string_lossy()),
        }
    }

    pub fn content_type(&self) -> Cow<'_, str> {
        match self {
            Part::Text { .. } => Cow::Borrowed(TEXT_CONTENT_TYPE),
            Part::Bytes { content_type, .. } | Part::Stream { content_type, .. } => content_type
                .as_deref()
                .map_or(Cow::Borrowed(CONTENT_TYPE_OCTET_STREAM), Cow::Borrowed),
            Part::File { content_type: Some(ct), .. } => Cow::Borrowed(ct.as_str()),
            Part::File { path, .. } => Cow::Owned(guess_content_type(path)),
        }
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            Part::Text { value, .. } => Ok(Box::new(Cursor::new(Bytes::from(value.clone())))),
            Part::Bytes { bytes, .. } => Ok(Box::new(bytes.clone().reader())),
            Part::File { path, .. } => Ok(Box::new(File::open(path)?)),
            Part::Stream { factory, .. } => factory(),
        }
    }

    fn head(&self, boundary: &str) -> Bytes {
        let mut head = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"",
            self.name()
        );
        if let Some(filename) = self.filename() {
            head.push_str("; filename=\"");
            head.push_str(&filename);
            head.push('"');
        }
        head.push_str("\r\nContent-Type: ");
        head.push_str(&self.content_type());
        head.push_str("\r\n\r\n");
        Bytes::from(head)
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Part::Text { name, value } => f
                .debug_struct("Text")
                .field("name", name)
                .field("value", value)
                .finish(),
            Part::Bytes { name, filename, content_type, bytes } => f
                .debug_struct("Bytes")
                .field("name", name)
                .field("filename", filename)
                .field("content_type", content_type)
                .field("len", &bytes.len())
                .finish(),
            Part::File { name, path, filename, content_type } => f
                .debug_struct("File")
                .field("name", name)
                .field("path", path)
                .field("filename", filename)
                .field("content_type", content_type)
                .finish(),
            Part::Stream { name, filename, content_type, .. } => f
                .debug_struct("Stream")
                .field("name", name)
                .field("filename", filename)
                .field("content_type", content_type)
                .finish_non_exhaustive(),
        }
    }
}

fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

/// An ordered multipart form with its boundary.
#[derive(Debug, Clone)]
pub struct Multipart {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

impl Multipart {
    /// Empty form with a freshly generated boundary.
    pub fn new() -> Self {
        Self::with_boundary(generate_boundary())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self { boundary: boundary.into(), parts: Vec::new() }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.part(Part::Text { name: name.into(), value: value.into() })
    }

    pub fn bytes(
        self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<&str>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        self.part(Part::Bytes {
            name: name.into(),
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
            bytes: bytes.into(),
        })
    }

    pub fn file(self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.part(Part::File {
            name: name.into(),
            path: path.into(),
            filename: None,
            content_type: None,
        })
    }

    pub fn file_with(
        self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> Self {
        self.part(Part::File {
            name: name.into(),
            path: path.into(),
            filename: filename.map(str::to_string),
            content_type: content_type.map(str::to_string),
        })
    }

    pub fn stream<F, R>(
        self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<&str>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> io::Result<R> + Send + Sync + 'static,
        R: Read + Send + 'static,
    {
        let factory: StreamFactory =
            Arc::new(move || factory().map(|r| Box::new(r) as Box<dyn Read + Send>));
        self.part(Part::Stream {
            name: name.into(),
            filename: filename.into(),
            content_type: content_type.map(str::to_string),
            factory,
        })
    }

    /// Fresh single-use encoder over a snapshot of the parts.
    pub fn encoder(&self) -> Result<MultipartEncoder, EncodingError> {
        MultipartEncoder::new(self.parts.clone(), self.boundary.clone())
    }
}

enum State {
    /// Next step emits the head of the next part, or the closing delimiter.
    Between,
    /// Streaming the current part's source.
    Payload(Box<dyn Read + Send>),
    Done,
}

/// Single-use chunk iterator over a multipart body.
///
/// Yields `Err` at most once, when a part's source cannot be opened or read;
/// the iterator is finished afterwards.
pub struct MultipartEncoder {
    boundary: String,
    parts: std::vec::IntoIter<Part>,
    state: State,
}

impl MultipartEncoder {
    pub fn new(parts: Vec<Part>, boundary: impl Into<String>) -> Result<Self, EncodingError> {
        if parts.is_empty() {
            return Err(EncodingError::EmptyMultipart);
        }
        Ok(Self {
            boundary: boundary.into(),
            parts: parts.into_iter(),
            state: State::Between,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    fn next_part(&mut self) -> io::Result<Bytes> {
        let Some(part) = self.parts.next() else {
            self.state = State::Done;
            return Ok(Bytes::from(format!("--{}--", self.boundary)));
        };

        let source = part.open()?;
        log::trace!("multipart: streaming part '{}'", part.name());
        self.state = State::Payload(source);
        Ok(part.head(&self.boundary))
    }

    fn read_chunk(source: &mut dyn Read) -> io::Result<Option<Bytes>> {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    chunk.truncate(n);
                    return Ok(Some(Bytes::from(chunk)));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Iterator for MultipartEncoder {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = match &mut self.state {
            State::Done => return None,
            State::Between => self.next_part(),
            State::Payload(source) => match Self::read_chunk(source.as_mut()) {
                Ok(Some(chunk)) => Ok(chunk),
                Ok(None) => {
                    // end of part: release the source before moving on
                    self.state = State::Between;
                    Ok(Bytes::from_static(CRLF))
                }
                Err(e) => Err(e),
            },
        };

        if step.is_err() {
            self.state = State::Done;
        }
        Some(step)
    }
}

impl FusedIterator for MultipartEncoder {}

impl fmt::Debug for MultipartEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Between => "between",
            State::Payload(_) => "payload",
            State::Done => "done",
        };
        f.debug_struct("MultipartEncoder")
            .field("boundary", &self.boundary)
            .field("remaining_parts", &self.parts.len())
            .field("state", &state)
            .finish()
    }
}

/// Blocking [`Read`] adapter over a [`MultipartEncoder`].
pub struct MultipartReader {
    encoder: MultipartEncoder,
    current: Bytes,
}

impl MultipartReader {
    pub fn new(encoder: MultipartEncoder) -> Self {
        Self { encoder, current: Bytes::new() }
    }
}

impl Read for MultipartReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.encoder.next() {
                Some(chunk) => self.current = chunk?,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}
