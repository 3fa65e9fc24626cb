//! Post-send hooks.
//!
//! Every attempt ends by running a [`ProcessorChain`] over the finalized
//! [`RequestSpec`] and the completed receiver, in registration order, once.
//! A processor that returns an error or panics is logged and skipped; the
//! remaining processors still run and the send itself is unaffected.
use std::any::Any;
use std::fmt;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::body::{encode_form, Body};
use crate::receiver::ReceiverView;
use crate::request::RequestSpec;

const BODY_PREVIEW_LIMIT: usize = 2048;

pub trait PostProcessor: Send + Sync {
    fn process(&self, request: &RequestSpec, receiver: &dyn ReceiverView) -> anyhow::Result<()>;

    /// Name used when reporting failures.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> PostProcessor for F
where
    F: Fn(&RequestSpec, &dyn ReceiverView) -> anyhow::Result<()> + Send + Sync,
{
    fn process(&self, request: &RequestSpec, receiver: &dyn ReceiverView) -> anyhow::Result<()> {
        self(request, receiver)
    }
}

pub type ProcessorHandle = Arc<dyn PostProcessor>;

/// Ordered list of post-processors. Cloning shares the processors themselves.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<ProcessorHandle>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain seeded with [`LoggingProcessor`].
    pub fn with_default_logging() -> Self {
        let mut chain = Self::new();
        chain.push(Arc::new(LoggingProcessor));
        chain
    }

    pub fn push(&mut self, processor: ProcessorHandle) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Runs every processor once. Returns how many of them failed.
    pub fn run(&self, request: &RequestSpec, receiver: &dyn ReceiverView) -> usize {
        let mut failures = 0;
        for processor in &self.processors {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| processor.process(request, receiver)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    log::error!(
                        "[{}] post-processor {} failed: {e:#}",
                        request.id(),
                        processor.name()
                    );
                }
                Err(payload) => {
                    failures += 1;
                    log::error!(
                        "[{}] post-processor {} panicked: {}",
                        request.id(),
                        processor.name(),
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        failures
    }
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.processors.iter().map(|p| p.name()))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Default processor: dumps request and response details.
///
/// Non-success attempts are logged at `warn`. Successful ones are logged at
/// `debug`, and only when the request was not flagged `log_failures_only`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProcessor;

impl PostProcessor for LoggingProcessor {
    fn process(&self, request: &RequestSpec, receiver: &dyn ReceiverView) -> anyhow::Result<()> {
        if !receiver.outcome().is_success() {
            log::warn!("{}", describe(request, receiver)?);
        } else if !request.log_failures_only() && log::log_enabled!(log::Level::Debug) {
            log::debug!("{}", describe(request, receiver)?);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Multi-line dump of one exchange.
pub fn describe(request: &RequestSpec, receiver: &dyn ReceiverView) -> Result<String, fmt::Error> {
    let mut out = String::new();

    match request.debug_label() {
        Some(label) => write!(out, "[{label}] ")?,
        None => write!(out, "[{}] ", request.id())?,
    }
    writeln!(out, "{} {}", request.method(), request.url())?;
    for (name, value) in request.headers().iter() {
        writeln!(out, "  > {name}: {value}")?;
    }
    if let Some(body) = request.body() {
        writeln!(out, "  > body: {}", body_preview(body))?;
    }

    match receiver.status() {
        Some(status) => writeln!(out, "  < status {status} ({})", receiver.outcome())?,
        None => writeln!(out, "  < {}", receiver.outcome())?,
    }
    for (name, value) in receiver.headers() {
        writeln!(out, "  < {name}: {}", value.to_str().unwrap_or("<binary>"))?;
    }
    if let Some(body) = receiver.body_debug() {
        let rendered = format!("{body:?}");
        writeln!(out, "  < body: {}", truncate(&rendered))?;
    }
    write!(out, "  cost {} ms", receiver.cost_time().as_millis())?;

    Ok(out)
}

fn body_preview(body: &Body) -> String {
    match body {
        Body::Raw { content, .. } => truncate(content).to_string(),
        Body::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        Body::FormUrlencoded(pairs) => truncate(&encode_form(pairs)).to_string(),
        Body::Multipart(form) => {
            format!("<multipart: {} parts, boundary {}>", form.len(), form.boundary())
        }
    }
}

fn truncate(text: &str) -> &str {
    if text.len() <= BODY_PREVIEW_LIMIT {
        return text;
    }
    let mut end = BODY_PREVIEW_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
