//! Finalized request description.
//!
//! A [`RequestSpec`] is produced by [`Sender`](crate::Sender) when a request is
//! sent and is read-only from then on. Post-processors receive it alongside the
//! [`Receiver`](crate::receiver::Receiver).
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use url::Url;
use uuid::Uuid;

use crate::body::Body;
use crate::errors::SendError;

/// Insertion-ordered header list.
///
/// Names are compared exactly as inserted. Setting an existing name drops the
/// old entry and appends the new one, so the most recent write is always last.
/// That keeps "last write wins" true on the wire when names differing only in
/// case collapse onto one header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Case-insensitive presence check, as the wire sees it.
    pub fn contains_ignore_case(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates every entry and converts to the wire representation.
    pub(crate) fn to_header_map(&self) -> Result<HeaderMap, SendError> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SendError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| SendError::InvalidHeader(format!("{name}: {value}")))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut list = HeaderList::new();
        for (k, v) in iter {
            list.set(k, v);
        }
        list
    }
}

/// Immutable description of one request attempt.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub(crate) id: Uuid,
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderList,
    pub(crate) body: Option<Body>,
    pub(crate) read_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) debug_label: Option<String>,
    pub(crate) log_failures_only: bool,
}

impl RequestSpec {
    /// Random id used to correlate log lines of one attempt.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Final URL: placeholders substituted, query parameters appended.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn debug_label(&self) -> Option<&str> {
        self.debug_label.as_deref()
    }

    pub fn log_failures_only(&self) -> bool {
        self.log_failures_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_and_moves_to_the_end() {
        let mut headers = HeaderList::new();
        assert!(headers.is_empty());
        headers.set("Accept", "text/plain");
        headers.set("X-Trace", "1");
        headers.set("Accept", "application/json");

        assert!(!headers.is_empty());
        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(collected, vec![("X-Trace", "1"), ("Accept", "application/json")]);
    }

    #[test]
    fn rewriting_a_case_variant_wins_on_the_wire() {
        let mut headers = HeaderList::new();
        headers.set("content-type", "text/a");
        headers.set("Content-Type", "application/json");
        headers.set("content-type", "text/b");

        let map = headers.to_header_map().unwrap();
        assert_eq!(map["content-type"], "text/b");
    }

    #[test]
    fn names_are_case_sensitive_as_inserted() {
        let mut headers = HeaderList::new();
        headers.set("content-type", "a");
        headers.set("Content-Type", "b");

        assert_eq!(headers.len(), 2);
        assert!(headers.contains_ignore_case("CONTENT-TYPE"));

        // both collapse onto one wire header, later entry wins
        let map = headers.to_header_map().unwrap();
        assert_eq!(map.get_all("content-type").iter().count(), 1);
        assert_eq!(map["content-type"], "b");
    }

    #[test]
    fn invalid_header_is_rejected() {
        let headers: HeaderList = [("Bad Name", "x")].into_iter().collect();
        assert!(matches!(headers.to_header_map(), Err(SendError::InvalidHeader(_))));

        let headers: HeaderList = [("X-Ok", "line\nbreak")].into_iter().collect();
        assert!(matches!(headers.to_header_map(), Err(SendError::InvalidHeader(_))));
    }
}
