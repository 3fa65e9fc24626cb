//! Request body variants.
//!
//! [`Body`] is a closed set of encodings. Each variant knows the `Content-Type`
//! it implies and how it turns into a wire [`Payload`]; both are exhaustive
//! matches so a new variant has to be handled in both places.

mod multipart;

use std::borrow::Cow;

use bytes::Bytes;

use crate::errors::EncodingError;

pub use multipart::{
    generate_boundary, Multipart, MultipartEncoder, MultipartReader, Part, StreamFactory,
    CHUNK_SIZE,
};

pub const CONTENT_TYPE_JSON: &str = "application/json;charset=utf-8";
pub const CONTENT_TYPE_XML: &str = "application/xml;charset=utf-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain;charset=utf-8";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub enum Body {
    /// Text payload with an explicit content type.
    Raw { content: String, content_type: String },
    /// Opaque binary payload.
    Bytes(Bytes),
    /// Ordered `name=value` pairs.
    FormUrlencoded(Vec<(String, String)>),
    Multipart(Multipart),
}

/// Body bytes as handed to a transport.
#[derive(Debug)]
pub(crate) enum Payload {
    Full(Bytes),
    Multipart(MultipartEncoder),
}

impl Body {
    /// The `Content-Type` header value this body implies.
    pub fn content_type(&self) -> Cow<'_, str> {
        match self {
            Body::Raw { content_type, .. } => Cow::Borrowed(content_type.as_str()),
            Body::Bytes(_) => Cow::Borrowed(CONTENT_TYPE_OCTET_STREAM),
            Body::FormUrlencoded(_) => Cow::Borrowed(CONTENT_TYPE_FORM),
            Body::Multipart(form) => {
                Cow::Owned(format!("multipart/form-data; boundary={}", form.boundary()))
            }
        }
    }

    /// Builds the payload for one send attempt.
    ///
    /// Multipart bodies get a fresh encoder every call, so stream parts are
    /// opened again through their factories.
    pub(crate) fn payload(&self) -> Result<Payload, EncodingError> {
        Ok(match self {
            Body::Raw { content, .. } => Payload::Full(Bytes::from(content.clone())),
            Body::Bytes(bytes) => Payload::Full(bytes.clone()),
            Body::FormUrlencoded(pairs) => Payload::Full(Bytes::from(encode_form(pairs))),
            Body::Multipart(form) => Payload::Multipart(form.encoder()?),
        })
    }
}

/// `application/x-www-form-urlencoded` serialization, insertion order kept.
pub fn encode_form<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
        .finish()
}
