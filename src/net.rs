//! Transport executors.
//!
//! Two executors share everything after [`Sender`](crate::Sender)
//! finalization: `blocking` drives a `reqwest::blocking::Client` on the
//! caller's thread, `nonblocking` drives a `reqwest::Client` on a shared tokio
//! runtime and hands back a [`ResponseHandle`].
//!
//! Both end the same way: the reqwest error (if any) is classified into an
//! [`Outcome`], the response body goes through the caller's
//! [`BodyHandler`], and the post-processor chain runs once over the finished
//! [`Receiver`].

mod blocking;
mod handle;
mod nonblocking;

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::processor::ProcessorChain;
use crate::receiver::{BodyHandler, Outcome, Receiver};
use crate::request::RequestSpec;

pub use handle::ResponseHandle;
pub(crate) use blocking::{blocking_client, execute_blocking};
pub(crate) use nonblocking::spawn;

/// Maps a transport error onto the failure taxonomy.
///
/// A connect error counts as a connect timeout only when the peer could not
/// be reached: the attempt timed out, was refused, or had no route. Name
/// resolution and TLS handshake errors are plain failures. Timeouts outside
/// the connect phase are read timeouts.
pub(crate) fn classify(err: &reqwest::Error) -> Outcome {
    if err.is_connect() {
        if err.is_timeout() || unreachable_peer(err) {
            Outcome::ConnectTimeout
        } else {
            Outcome::Failed(error_chain(err))
        }
    } else if err.is_timeout() {
        Outcome::ReadTimeout
    } else {
        Outcome::Failed(error_chain(err))
    }
}

/// Looks for the socket-level error behind a connect failure.
fn unreachable_peer(err: &dyn StdError) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
                    | io::ErrorKind::AddrNotAvailable
            );
        }
        source = cause.source();
    }
    false
}

/// Connect timeout actually given to the client for `spec`.
///
/// The request deadline starts before the connection is opened. Keeping the
/// connect budget below it lets a stalled connect fail as a connect error
/// instead of tripping the read deadline first.
pub(crate) fn connect_budget(spec: &RequestSpec) -> Duration {
    let read = spec.read_timeout();
    let ceiling = read.saturating_sub(read / 10).max(Duration::from_millis(1));
    spec.connect_timeout().min(ceiling)
}

/// `outer: inner: innermost`
fn error_chain(err: &dyn StdError) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !msg.ends_with(&text) {
            msg.push_str(": ");
            msg.push_str(&text);
        }
        source = cause.source();
    }
    msg
}

/// Classifies `err` and logs the full chain for failures that are not timeouts.
fn transport_failure(spec: &RequestSpec, err: &reqwest::Error) -> Outcome {
    let outcome = classify(err);
    if let Outcome::Failed(chain) = &outcome {
        log::error!("[{}] {} {}: {chain}", spec.id(), spec.method(), spec.url());
    }
    outcome
}

/// Builds the receiver once the response head is in and the body has been read.
fn receive<H: BodyHandler>(
    spec: &RequestSpec,
    handler: &H,
    status: StatusCode,
    headers: HeaderMap,
    body: Result<Bytes, reqwest::Error>,
    started: Instant,
) -> Receiver<H::Output> {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            let outcome = transport_failure(spec, &e);
            return Receiver::failure(spec.id(), outcome, Some(status), headers, started.elapsed());
        }
    };

    match handler.handle(&headers, body) {
        Ok(decoded) => Receiver::success(spec.id(), status, headers, decoded, started.elapsed()),
        Err(e) => {
            let outcome = Outcome::Failed(format!("cannot decode response body: {e}"));
            Receiver::failure(spec.id(), outcome, Some(status), headers, started.elapsed())
        }
    }
}

/// Receiver for an attempt that never got a response head.
fn unanswered<B>(spec: &RequestSpec, err: &reqwest::Error, started: Instant) -> Receiver<B> {
    let outcome = transport_failure(spec, err);
    Receiver::failure(spec.id(), outcome, None, HeaderMap::new(), started.elapsed())
}

/// Terminal step shared by both executors.
fn finish<B: fmt::Debug>(spec: &RequestSpec, processors: &ProcessorChain, receiver: &Receiver<B>) {
    let failures = processors.run(spec, receiver);
    if failures > 0 {
        log::debug!("[{}] {failures} post-processor(s) failed", spec.id());
    }
}
