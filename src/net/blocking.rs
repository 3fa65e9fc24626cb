use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use reqwest::blocking::{Body, Client};

use crate::body::{MultipartReader, Payload};
use crate::errors::SendError;
use crate::net::{finish, receive, unanswered};
use crate::receiver::{BodyHandler, Receiver};
use crate::sender::Prepared;

lazy_static! {
    /// One pooled client per connect budget.
    static ref CLIENTS: Mutex<HashMap<Duration, Client>> = Mutex::new(HashMap::new());
}

/// Returns the shared blocking client for a connect budget (see
/// [`connect_budget`](crate::net::connect_budget)), building it on first use.
///
/// Panics (inside reqwest) when called from within an async runtime.
pub(crate) fn blocking_client(connect_timeout: Duration) -> Result<Client, SendError> {
    let mut clients = CLIENTS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(client) = clients.get(&connect_timeout) {
        return Ok(client.clone());
    }

    // The per-request read timeout replaces reqwest's 30 s client default.
    let client = Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(None::<Duration>)
        .build()
        .map_err(SendError::Client)?;
    clients.insert(connect_timeout, client.clone());
    Ok(client)
}

/// Performs one attempt on the calling thread.
pub(crate) fn execute_blocking<H: BodyHandler>(
    client: &Client,
    prepared: Prepared,
    handler: &H,
) -> Receiver<H::Output> {
    let Prepared { spec, wire_headers, payload, processors } = prepared;

    let mut request = client
        .request(spec.method().clone(), spec.url().clone())
        .headers(wire_headers)
        .timeout(spec.read_timeout());
    if let Some(payload) = payload {
        request = request.body(match payload {
            Payload::Full(bytes) => Body::from(bytes),
            // chunked upload pulled straight from the part sources
            Payload::Multipart(encoder) => Body::new(MultipartReader::new(encoder)),
        });
    }

    log::debug!("[{}] {} {} (blocking)", spec.id(), spec.method(), spec.url());
    let started = Instant::now();
    let receiver = match request.send() {
        Ok(response) => {
            let status = response.status();
            let headers = response.headers().clone();
            receive(&spec, handler, status, headers, response.bytes(), started)
        }
        Err(e) => unanswered(&spec, &e, started),
    };

    finish(&spec, &processors, &receiver);
    receiver
}
