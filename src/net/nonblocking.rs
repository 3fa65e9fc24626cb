use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::Stream;
use http::HeaderMap;
use lazy_static::lazy_static;
use reqwest::{Body, Client};
use tokio::runtime::{self, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::body::{MultipartEncoder, Payload};
use crate::errors::SendError;
use crate::net::{connect_budget, finish, receive, unanswered, ResponseHandle};
use crate::receiver::{BodyHandler, Receiver};
use crate::request::RequestSpec;
use crate::sender::Prepared;

/// Encoded multipart chunks buffered between the encoder thread and the socket.
const STREAM_CHANNEL_DEPTH: usize = 4;

lazy_static! {
    /// Runtime owning every async attempt and the connection pools behind them.
    static ref RUNTIME: io::Result<Runtime> = runtime::Builder::new_multi_thread()
        .thread_name("courier-io")
        .enable_all()
        .build();

    /// One pooled client per connect budget.
    static ref CLIENTS: Mutex<HashMap<Duration, Client>> = Mutex::new(HashMap::new());
}

fn transport_runtime() -> Result<&'static Runtime, SendError> {
    let rt: &'static io::Result<Runtime> = &RUNTIME;
    rt.as_ref().map_err(|e| SendError::Runtime(e.to_string()))
}

fn client(connect_timeout: Duration) -> Result<Client, SendError> {
    let mut clients = CLIENTS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(client) = clients.get(&connect_timeout) {
        return Ok(client.clone());
    }

    let client = Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(SendError::Client)?;
    clients.insert(connect_timeout, client.clone());
    Ok(client)
}

/// Starts one attempt on the transport runtime.
///
/// The returned handle can be awaited from any executor or waited on from a
/// plain thread. Cancelling it stops the attempt and skips the post-processors.
pub(crate) fn spawn<H: BodyHandler>(
    prepared: Prepared,
    handler: H,
) -> Result<ResponseHandle<H::Output>, SendError> {
    let rt = transport_runtime()?;
    let client = client(connect_budget(&prepared.spec))?;

    let token = CancellationToken::new();
    let cancel = token.clone();
    let (tx, rx) = oneshot::channel();

    rt.spawn(async move {
        let Prepared { spec, wire_headers, payload, processors } = prepared;
        log::debug!("[{}] {} {} (async)", spec.id(), spec.method(), spec.url());

        let receiver = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("[{}] cancelled", spec.id());
                return;
            }
            receiver = execute(&client, &spec, wire_headers, payload, &handler) => receiver,
        };

        // cancelled between completion and here
        if cancel.is_cancelled() {
            return;
        }
        finish(&spec, &processors, &receiver);
        if tx.send(receiver).is_err() {
            log::debug!("[{}] response handle dropped before completion", spec.id());
        }
    });

    Ok(ResponseHandle::new(rx, token))
}

async fn execute<H: BodyHandler>(
    client: &Client,
    spec: &RequestSpec,
    headers: HeaderMap,
    payload: Option<Payload>,
    handler: &H,
) -> Receiver<H::Output> {
    let mut request = client
        .request(spec.method().clone(), spec.url().clone())
        .headers(headers)
        .timeout(spec.read_timeout());
    if let Some(payload) = payload {
        request = request.body(match payload {
            Payload::Full(bytes) => Body::from(bytes),
            Payload::Multipart(encoder) => Body::wrap_stream(encoder_stream(encoder)),
        });
    }

    let started = Instant::now();
    match request.send().await {
        Ok(response) => {
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await;
            receive(spec, handler, status, headers, body, started)
        }
        Err(e) => unanswered(spec, &e, started),
    }
}

/// Runs the encoder on the blocking pool and exposes its chunks as a stream.
///
/// Part sources are read strictly in order on one thread. When the request
/// goes away the channel closes and dropping the encoder releases the open
/// source.
fn encoder_stream(encoder: MultipartEncoder) -> ChunkStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        for chunk in encoder {
            if tx.blocking_send(chunk).is_err() {
                break;
            }
        }
    });
    ChunkStream { rx }
}

struct ChunkStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl Stream for ChunkStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Multipart;
    use futures::StreamExt;
    use std::io::Read;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn encoder_stream_matches_the_iterator() {
        let form = Multipart::with_boundary("streamtest")
            .text("a", "1")
            .bytes("blob", "blob.bin", None, vec![7u8; 20_000]);

        let expected: Vec<u8> = form
            .encoder()
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .flat_map(|chunk| chunk.to_vec())
            .collect();

        let mut streamed = Vec::new();
        let mut stream = encoder_stream(form.encoder().unwrap());
        while let Some(chunk) = stream.next().await {
            streamed.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(streamed, expected);
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_encoder() {
        struct Endless(Arc<AtomicBool>);
        impl Read for Endless {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                buf.fill(b'x');
                Ok(buf.len())
            }
        }
        impl Drop for Endless {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        let form = Multipart::new().stream("big", "big.bin", None, move || {
            Ok(Endless(flag.clone()))
        });

        let mut stream = encoder_stream(form.encoder().unwrap());
        assert!(stream.next().await.is_some());
        drop(stream);

        for _ in 0..200 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn clients_are_keyed_by_connect_budget() {
        let prepared = crate::Sender::get("http://localhost/")
            .connect_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_millis(1234))
            .finalize()
            .unwrap();
        let budget = connect_budget(&prepared.spec);
        assert!(budget < Duration::from_millis(1234));

        let a = client(budget).unwrap();
        let b = client(budget).unwrap();
        drop((a, b));
        let clients = CLIENTS.lock().unwrap();
        assert!(clients.contains_key(&budget));
    }
}
