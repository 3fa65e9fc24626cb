//! Result of one request attempt.
//!
//! A [`Receiver`] always carries the elapsed time and exactly one [`Outcome`].
//! Status, headers and body are only present when the exchange reached the
//! server and a response came back.
//!
//! The body type is picked by a [`BodyHandler`]; `send()` uses
//! [`StringHandler`], `send_with(handler)` accepts any other one.
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::errors::BodyError;

/// Terminal state of an attempt. Checked in declaration order when classifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ConnectTimeout,
    ReadTimeout,
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::ConnectTimeout => f.write_str("connect timeout"),
            Outcome::ReadTimeout => f.write_str("read timeout"),
            Outcome::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

#[derive(Debug)]
pub struct Receiver<B = String> {
    request_id: Uuid,
    outcome: Outcome,
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Option<B>,
    cost_time: Duration,
}

impl<B> Receiver<B> {
    pub(crate) fn success(
        request_id: Uuid,
        status: StatusCode,
        headers: HeaderMap,
        body: B,
        cost_time: Duration,
    ) -> Self {
        Self {
            request_id,
            outcome: Outcome::Success,
            status: Some(status),
            headers,
            body: Some(body),
            cost_time,
        }
    }

    /// A failed attempt. `status`/`headers` are kept when the response head
    /// arrived before the failure (e.g. the body timed out).
    pub(crate) fn failure(
        request_id: Uuid,
        outcome: Outcome,
        status: Option<StatusCode>,
        headers: HeaderMap,
        cost_time: Duration,
    ) -> Self {
        debug_assert!(!outcome.is_success());
        Self { request_id, outcome, status, headers, body: None, cost_time }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn is_connect_timeout(&self) -> bool {
        self.outcome == Outcome::ConnectTimeout
    }

    pub fn is_read_timeout(&self) -> bool {
        self.outcome == Outcome::ReadTimeout
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status.map(|s| s.as_u16())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> Option<&B> {
        self.body.as_ref()
    }

    pub fn into_body(self) -> Option<B> {
        self.body
    }

    pub fn cost_time(&self) -> Duration {
        self.cost_time
    }

    pub fn cost_time_ms(&self) -> u128 {
        self.cost_time.as_millis()
    }
}

/// Read-only, body-type-erased view handed to post-processors.
pub trait ReceiverView {
    fn request_id(&self) -> Uuid;
    fn outcome(&self) -> &Outcome;
    fn status(&self) -> Option<u16>;
    fn headers(&self) -> &HeaderMap;
    fn body_debug(&self) -> Option<&dyn fmt::Debug>;
    fn cost_time(&self) -> Duration;
}

impl<B: fmt::Debug> ReceiverView for Receiver<B> {
    fn request_id(&self) -> Uuid {
        self.request_id
    }

    fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    fn status(&self) -> Option<u16> {
        Receiver::status(self)
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn body_debug(&self) -> Option<&dyn fmt::Debug> {
        self.body.as_ref().map(|b| b as &dyn fmt::Debug)
    }

    fn cost_time(&self) -> Duration {
        self.cost_time
    }
}

/// Turns raw response bytes into the receiver's body type.
pub trait BodyHandler: Send + Sync + 'static {
    type Output: fmt::Debug + Send + 'static;

    fn handle(&self, headers: &HeaderMap, body: Bytes) -> Result<Self::Output, BodyError>;
}

/// Decodes text using the `Content-Type` charset, falling back to lossy UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringHandler;

impl BodyHandler for StringHandler {
    type Output = String;

    fn handle(&self, headers: &HeaderMap, body: Bytes) -> Result<String, BodyError> {
        Ok(decode_text(headers, &body))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BytesHandler;

impl BodyHandler for BytesHandler {
    type Output = Bytes;

    fn handle(&self, _headers: &HeaderMap, body: Bytes) -> Result<Bytes, BodyError> {
        Ok(body)
    }
}

/// Drops the payload; only status and headers are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardHandler;

impl BodyHandler for DiscardHandler {
    type Output = ();

    fn handle(&self, _headers: &HeaderMap, _body: Bytes) -> Result<(), BodyError> {
        Ok(())
    }
}

/// Deserializes a JSON payload into `T`.
pub struct JsonHandler<T>(PhantomData<fn() -> T>);

impl<T> JsonHandler<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BodyHandler for JsonHandler<T>
where
    T: DeserializeOwned + fmt::Debug + Send + 'static,
{
    type Output = T;

    fn handle(&self, _headers: &HeaderMap, body: Bytes) -> Result<T, BodyError> {
        Ok(serde_json::from_slice(&body)?)
    }
}

fn charset(headers: &HeaderMap) -> Option<&str> {
    let ct = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    ct.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

fn decode_text(headers: &HeaderMap, body: &[u8]) -> String {
    match charset(headers) {
        Some(cs) if cs.eq_ignore_ascii_case("iso-8859-1") || cs.eq_ignore_ascii_case("latin1") => {
            body.iter().map(|&b| b as char).collect()
        }
        // UTF-8 and anything unknown
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(ct: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, ct.parse().unwrap());
        headers
    }

    #[test]
    fn string_handler_respects_charset() {
        let utf8 = headers_with("text/html; charset=UTF-8");
        let body = Bytes::from_static(b"<p>\xe2\x98\x83</p>");
        assert_eq!(StringHandler.handle(&utf8, body).unwrap(), "<p>\u{2603}</p>");

        let latin1 = headers_with("text/plain; charset=\"ISO-8859-1\"");
        let body = Bytes::from_static(b"caf\xe9");
        assert_eq!(StringHandler.handle(&latin1, body).unwrap(), "café");
    }

    #[test]
    fn string_handler_falls_back_to_lossy_utf8() {
        let body = Bytes::from_static(b"\xff\xfehello");
        let text = StringHandler.handle(&HeaderMap::new(), body).unwrap();
        assert!(text.ends_with("hello"));
    }

    #[test]
    fn json_handler_decodes_or_reports() {
        let handler = JsonHandler::<serde_json::Value>::new();
        let value = handler
            .handle(&HeaderMap::new(), Bytes::from_static(br#"{"ok":true}"#))
            .unwrap();
        assert_eq!(value["ok"], true);

        let err = handler.handle(&HeaderMap::new(), Bytes::from_static(b"not json"));
        assert!(matches!(err, Err(BodyError::Json(_))));
    }

    #[test]
    fn failure_exposes_exactly_one_kind() {
        let id = Uuid::new_v4();
        let rcv: Receiver = Receiver::failure(
            id,
            Outcome::ReadTimeout,
            None,
            HeaderMap::new(),
            Duration::from_millis(1000),
        );
        assert!(rcv.is_read_timeout());
        assert!(!rcv.is_connect_timeout());
        assert!(!rcv.is_success());
        assert_eq!(rcv.error_message(), None);
        assert_eq!(rcv.status(), None);
        assert!(rcv.body().is_none());
        assert_eq!(rcv.cost_time_ms(), 1000);
        assert_eq!(rcv.request_id(), id);

        let failed: Receiver<()> = Receiver::failure(
            id,
            Outcome::Failed("dns error".into()),
            None,
            HeaderMap::new(),
            Duration::ZERO,
        );
        assert_eq!(failed.error_message(), Some("dns error"));
    }

    #[test]
    fn view_exposes_body_for_logging() {
        let rcv = Receiver::success(
            Uuid::new_v4(),
            StatusCode::OK,
            headers_with("text/plain"),
            "pong".to_string(),
            Duration::from_millis(3),
        );
        let view: &dyn ReceiverView = &rcv;
        assert_eq!(view.status(), Some(200));
        assert_eq!(format!("{:?}", view.body_debug().unwrap()), "\"pong\"");
        assert!(view.outcome().is_success());
    }
}
