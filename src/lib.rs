//! HTTP request pipeline: build a request fluently, send it blocking or
//! async, and get back a [`Receiver`] describing exactly one outcome.
//!
//! Transport failures (connect timeout, read timeout, I/O errors) never come
//! back as `Err`; they are part of the receiver. `Err` is reserved for
//! problems found before anything is sent.

pub mod body;
pub mod config;
pub mod constants;
pub mod errors;
pub mod net;
pub mod processor;
pub mod receiver;
pub mod request;
pub mod sender;

pub use body::{Body, Multipart, Part};
pub use config::SenderConfig;
pub use constants::ConstantTable;
pub use errors::{BodyError, EncodingError, HandleError, SendError};
pub use net::ResponseHandle;
pub use processor::{PostProcessor, ProcessorChain};
pub use receiver::{Outcome, Receiver, ReceiverView};
pub use request::RequestSpec;
pub use sender::Sender;
