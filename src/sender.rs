//! Fluent request builder.
//!
//! A [`Sender`] accumulates method, URL, headers, query parameters, body,
//! timeouts and post-processors, then sends the request either blocking
//! ([`Sender::send`]) or through a deferred [`ResponseHandle`]
//! ([`Sender::send_async`]).
//!
//! Both paths go through the same finalization step: constant substitution,
//! query-string building, header validation and body encoding. Problems found
//! there are returned as [`SendError`] before anything touches the network.
//! Everything that fails afterwards ends up in the returned
//! [`Receiver`](crate::receiver::Receiver).
//!
//! ```no_run
//! use courier::Sender;
//!
//! let receiver = Sender::post("https://{{api_host}}/v1/orders")
//!     .header("Authorization", "Bearer {{token}}")
//!     .parameter("dry_run", "true")
//!     .body_json(r#"{"sku":"A-1","qty":2}"#)
//!     .send()?;
//!
//! if receiver.is_success() {
//!     println!("{:?} {:?}", receiver.status(), receiver.body());
//! }
//! # Ok::<(), courier::SendError>(())
//! ```
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::body::{
    Body, Multipart, Payload, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, CONTENT_TYPE_XML,
};
use crate::config::SenderConfig;
use crate::errors::SendError;
use crate::net::{self, ResponseHandle};
use crate::processor::{ProcessorChain, ProcessorHandle};
use crate::receiver::{BodyHandler, Receiver, ReceiverView, StringHandler};
use crate::request::{HeaderList, RequestSpec};

const CONTENT_TYPE: &str = "Content-Type";
const USER_AGENT: &str = "User-Agent";

pub struct Sender {
    config: Arc<SenderConfig>,
    method: Method,
    url: String,
    headers: HeaderList,
    params: Vec<(String, String)>,
    body: Option<Body>,
    connect_timeout: Duration,
    read_timeout: Duration,
    debug_label: Option<String>,
    log_failures_only: bool,
    processors: ProcessorChain,
    /// First configuration error seen while chaining; reported by `send*`.
    pending_error: Option<SendError>,
}

/// Output of finalization, shared by both transports.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub spec: RequestSpec,
    pub wire_headers: HeaderMap,
    pub payload: Option<Payload>,
    pub processors: ProcessorChain,
}

impl Sender {
    /// New sender using the process-wide [`SenderConfig::global`] snapshot.
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self::with_config(SenderConfig::global(), method, url)
    }

    pub fn with_config(config: Arc<SenderConfig>, method: &str, url: impl Into<String>) -> Self {
        let upper = method.to_ascii_uppercase();
        let (method, pending_error) = match Method::from_bytes(upper.as_bytes()) {
            Ok(m) => (m, None),
            Err(_) => (Method::GET, Some(SendError::InvalidMethod(method.to_string()))),
        };

        Self {
            method,
            url: url.into(),
            headers: HeaderList::new(),
            params: Vec::new(),
            body: None,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            debug_label: None,
            log_failures_only: config.log_failures_only,
            processors: config.processors.clone(),
            pending_error,
            config,
        }
    }

    pub fn get(url: impl Into<String>) -> Self { Self::new("GET", url) }
    pub fn post(url: impl Into<String>) -> Self { Self::new("POST", url) }
    pub fn put(url: impl Into<String>) -> Self { Self::new("PUT", url) }
    pub fn patch(url: impl Into<String>) -> Self { Self::new("PATCH", url) }
    pub fn delete(url: impl Into<String>) -> Self { Self::new("DELETE", url) }
    pub fn head(url: impl Into<String>) -> Self { Self::new("HEAD", url) }

    /// Sets a header. The last value written for a name wins.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self.headers.set(name, value);
        }
        self
    }

    /// Appends a query parameter. Parameters keep insertion order.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn parameters<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the body and its `Content-Type`. Replaces any earlier body.
    pub fn body(mut self, body: Body) -> Self {
        self.headers.set(CONTENT_TYPE, body.content_type());
        self.body = Some(body);
        self
    }

    pub fn body_raw(self, content: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.body(Body::Raw { content: content.into(), content_type: content_type.into() })
    }

    pub fn body_json(self, json: impl Into<String>) -> Self {
        self.body_raw(json, CONTENT_TYPE_JSON)
    }

    /// Serializes `value` with `serde_json`. A serialization failure is
    /// reported when the request is sent.
    pub fn body_json_value<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(json) => self.body_json(json),
            Err(e) => {
                self.pending_error.get_or_insert(SendError::Serialize(e));
                self
            }
        }
    }

    pub fn body_xml(self, xml: impl Into<String>) -> Self {
        self.body_raw(xml, CONTENT_TYPE_XML)
    }

    pub fn body_text(self, text: impl Into<String>) -> Self {
        self.body_raw(text, CONTENT_TYPE_TEXT)
    }

    pub fn body_bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.body(Body::Bytes(bytes.into()))
    }

    pub fn body_form<I, K, V>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.body(Body::FormUrlencoded(pairs))
    }

    pub fn body_multipart(self, form: Multipart) -> Self {
        self.body(Body::Multipart(form))
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Label shown by the logging processor instead of the request id.
    pub fn debug_label(mut self, label: impl Into<String>) -> Self {
        self.debug_label = Some(label.into());
        self
    }

    /// Restrict the logging processor to non-success attempts.
    pub fn log_failures_only(mut self, on: bool) -> Self {
        self.log_failures_only = on;
        self
    }

    /// Appends a closure to this sender's post-processor chain.
    pub fn add_post_processor<F>(self, f: F) -> Self
    where
        F: Fn(&RequestSpec, &dyn ReceiverView) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_processor(Arc::new(f))
    }

    pub fn add_processor(mut self, processor: ProcessorHandle) -> Self {
        self.processors.push(processor);
        self
    }

    /// Replaces the chain inherited from the config.
    pub fn processors(mut self, chain: ProcessorChain) -> Self {
        self.processors = chain;
        self
    }

    pub(crate) fn finalize(self) -> Result<Prepared, SendError> {
        if let Some(err) = self.pending_error {
            return Err(err);
        }

        let constants = &self.config.constants;

        let raw_url = constants.substitute(&self.url);
        let mut url = Url::parse(&raw_url).map_err(|source| SendError::InvalidUrl {
            url: raw_url.to_string(),
            source,
        })?;
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }

        let mut headers: HeaderList = self
            .headers
            .iter()
            .map(|(name, value)| (name, constants.substitute(value).into_owned()))
            .collect();
        if let Some(ua) = &self.config.user_agent {
            if !headers.contains_ignore_case(USER_AGENT) {
                headers.set(USER_AGENT, ua.as_str());
            }
        }
        let wire_headers = headers.to_header_map()?;

        let payload = self.body.as_ref().map(Body::payload).transpose()?;

        let spec = RequestSpec {
            id: Uuid::new_v4(),
            method: self.method,
            url,
            headers,
            body: self.body,
            read_timeout: self.read_timeout,
            connect_timeout: self.connect_timeout,
            debug_label: self.debug_label,
            log_failures_only: self.log_failures_only,
        };

        Ok(Prepared { spec, wire_headers, payload, processors: self.processors })
    }

    /// Blocking send; the body is decoded as text.
    ///
    /// Must not be called from inside an async runtime.
    pub fn send(self) -> Result<Receiver<String>, SendError> {
        self.send_with(StringHandler)
    }

    pub fn send_with<H: BodyHandler>(self, handler: H) -> Result<Receiver<H::Output>, SendError> {
        let prepared = self.finalize()?;
        let client = net::blocking_client(net::connect_budget(&prepared.spec))?;
        Ok(net::execute_blocking(&client, prepared, &handler))
    }

    /// Non-blocking send. Transport failures arrive through the handle's result.
    pub fn send_async(self) -> Result<ResponseHandle<String>, SendError> {
        self.send_async_with(StringHandler)
    }

    pub fn send_async_with<H: BodyHandler>(
        self,
        handler: H,
    ) -> Result<ResponseHandle<H::Output>, SendError> {
        let prepared = self.finalize()?;
        net::spawn(prepared, handler)
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("body", &self.body)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("debug_label", &self.debug_label)
            .field("processors", &self.processors)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ConstantTable;
    use crate::errors::EncodingError;

    fn config_with(table: ConstantTable) -> Arc<SenderConfig> {
        Arc::new(
            SenderConfig::builder()
                .constants(table)
                .no_user_agent()
                .processors(ProcessorChain::new())
                .build()
                .unwrap(),
        )
    }

    fn bare(method: &str, url: &str) -> Sender {
        Sender::with_config(config_with(ConstantTable::new()), method, url)
    }

    fn wire_body(prepared: &Prepared) -> Bytes {
        match prepared.payload.as_ref() {
            Some(Payload::Full(bytes)) => bytes.clone(),
            _ => panic!("expected a buffered payload"),
        }
    }

    #[test]
    fn repeated_header_keeps_last_value() {
        let prepared = bare("GET", "http://host/ok")
            .header("X-Name", "v1")
            .header("X-Name", "v2")
            .finalize()
            .unwrap();

        let headers: Vec<_> = prepared.spec.headers().iter().collect();
        assert_eq!(headers, vec![("X-Name", "v2")]);
        assert_eq!(prepared.wire_headers.get_all("x-name").iter().count(), 1);
    }

    #[test]
    fn body_content_type_follows_last_write() {
        // header set before the body is overwritten by it
        let prepared = bare("POST", "http://host/")
            .header("Content-Type", "text/csv")
            .body_json("{}")
            .finalize()
            .unwrap();
        assert_eq!(prepared.spec.headers().get("Content-Type"), Some(CONTENT_TYPE_JSON));

        // header set after the body wins
        let prepared = bare("POST", "http://host/")
            .body_json("{}")
            .header("Content-Type", "application/vnd.api+json")
            .finalize()
            .unwrap();
        assert_eq!(
            prepared.spec.headers().get("Content-Type"),
            Some("application/vnd.api+json")
        );
    }

    #[test]
    fn last_body_call_wins() {
        let prepared = bare("POST", "http://host/")
            .body_xml("<a/>")
            .body_form([("a", "1"), ("b", "x y")])
            .finalize()
            .unwrap();

        assert!(matches!(prepared.spec.body(), Some(Body::FormUrlencoded(_))));
        assert_eq!(wire_body(&prepared), "a=1&b=x+y");
        assert_eq!(
            prepared.spec.headers().get("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn parameters_are_encoded_in_insertion_order() {
        let prepared = bare("GET", "http://host/search?page=2")
            .parameter("q", "rust lang")
            .parameters([("tag", "a&b"), ("tag", "c")])
            .finalize()
            .unwrap();

        assert_eq!(
            prepared.spec.url().as_str(),
            "http://host/search?page=2&q=rust+lang&tag=a%26b&tag=c"
        );
    }

    #[test]
    fn placeholders_are_substituted_in_url_and_headers() {
        let table = ConstantTable::new();
        table.set("host", "api.internal:8080").set("token", "t0k");

        let prepared = Sender::with_config(config_with(table), "get", "http://{{host}}/v1")
            .header("Authorization", "Bearer {{token}}")
            .header("X-Unknown", "{{nope}}")
            .finalize()
            .unwrap();

        assert_eq!(prepared.spec.url().as_str(), "http://api.internal:8080/v1");
        assert_eq!(prepared.spec.method(), &Method::GET);
        assert_eq!(prepared.spec.headers().get("Authorization"), Some("Bearer t0k"));
        assert_eq!(prepared.spec.headers().get("X-Unknown"), Some("{{nope}}"));
    }

    #[test]
    fn configuration_errors_surface_before_sending() {
        let err = bare("GET", "not a url").finalize().unwrap_err();
        assert!(matches!(err, SendError::InvalidUrl { .. }));

        let err = bare("GE T", "http://host/").finalize().unwrap_err();
        assert!(matches!(err, SendError::InvalidMethod(_)));

        let err = bare("POST", "http://host/")
            .body_multipart(Multipart::new())
            .finalize()
            .unwrap_err();
        assert!(matches!(err, SendError::Encoding(EncodingError::EmptyMultipart)));
    }

    #[test]
    fn json_value_is_serialized() {
        #[derive(Serialize)]
        struct Order<'a> {
            sku: &'a str,
            qty: u32,
        }

        let prepared = bare("POST", "http://host/orders")
            .body_json_value(&Order { sku: "A-1", qty: 2 })
            .finalize()
            .unwrap();
        assert_eq!(wire_body(&prepared), r#"{"sku":"A-1","qty":2}"#);
    }

    #[test]
    fn user_agent_from_config_unless_overridden() {
        let config = Arc::new(SenderConfig::builder().user_agent("agent/1").build().unwrap());

        let prepared = Sender::with_config(config.clone(), "GET", "http://host/")
            .finalize()
            .unwrap();
        assert_eq!(prepared.spec.headers().get("User-Agent"), Some("agent/1"));

        let prepared = Sender::with_config(config, "GET", "http://host/")
            .header("user-agent", "custom")
            .finalize()
            .unwrap();
        assert_eq!(prepared.spec.headers().get("user-agent"), Some("custom"));
        assert_eq!(prepared.spec.headers().get("User-Agent"), None);
    }

    #[test]
    fn processors_extend_the_config_chain() {
        let prepared = Sender::new("GET", "http://host/")
            .add_post_processor(|_: &RequestSpec, _: &dyn ReceiverView| Ok(()))
            .finalize()
            .unwrap();
        assert_eq!(prepared.processors.len(), 2);
    }

    #[test]
    fn timeouts_and_labels_land_in_the_spec() {
        let prepared = bare("DELETE", "http://host/item/1")
            .connect_timeout(Duration::from_secs(2))
            .read_timeout(Duration::from_millis(1500))
            .debug_label("cleanup")
            .log_failures_only(true)
            .finalize()
            .unwrap();

        let spec = &prepared.spec;
        assert_eq!(spec.connect_timeout(), Duration::from_secs(2));
        assert_eq!(spec.read_timeout(), Duration::from_millis(1500));
        assert_eq!(spec.debug_label(), Some("cleanup"));
        assert!(spec.log_failures_only());
        assert!(prepared.payload.is_none());
    }
}
