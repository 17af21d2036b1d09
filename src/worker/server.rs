//! Worker-side protocol loop.
//!
//! Reads requests line by line, validates them and hands them to the
//! [`Dispatcher`]. Read-only kinds run on their own tasks; kinds that change
//! worker state (`update`, `settings`) run one at a time in arrival order.
//! Replies therefore may leave in a different order than requests arrived;
//! the controller correlates them by id.
//!
//! # Wire errors
//!
//! | Condition | Reply |
//! |-----------|-------|
//! | Envelope fails validation | `-32602` invalid params |
//! | Method other than `request` | `-32601` method not found |
//! | Valid JSON with an id but not a request | `-32600` invalid request |
//! | No recoverable id | dropped with a warning |
//! | Dispatcher panicked | `-32603` internal error |

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::identifiers::RequestId;
use crate::protocol::{
    FailureSignal, Notification, ReadyData, Request, RequestEnvelope, Response, codes,
    request::METHOD_REQUEST,
};

use super::dispatcher::Dispatcher;

// ============================================================================
// Inbound
// ============================================================================

/// Classification of one inbound line.
#[derive(Debug)]
enum Inbound {
    /// A valid request to dispatch.
    Dispatch(RequestId, RequestEnvelope),
    /// A request rejected before dispatch.
    Reject(Response),
    /// Nothing to answer.
    Ignore,
}

fn classify(text: &str) -> Inbound {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Dropping unparseable line");
            return Inbound::Ignore;
        }
    };

    let request: Request = match serde_json::from_value(value.clone()) {
        Ok(request) => request,
        Err(e) => {
            let id = value
                .get("id")
                .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
            return match id {
                Some(id) => Inbound::Reject(Response::error(
                    id,
                    codes::INVALID_REQUEST,
                    format!("not a request: {e}"),
                )),
                None => {
                    warn!(error = %e, "Dropping message without request id");
                    Inbound::Ignore
                }
            };
        }
    };

    if request.method != METHOD_REQUEST {
        return Inbound::Reject(Response::error(
            request.id,
            codes::METHOD_NOT_FOUND,
            format!("unknown method `{}`", request.method),
        ));
    }

    match request.envelope() {
        Ok(envelope) => Inbound::Dispatch(request.id, envelope),
        Err(e) => Inbound::Reject(Response::error(
            request.id,
            codes::INVALID_PARAMS,
            e.to_string(),
        )),
    }
}

// ============================================================================
// Output
// ============================================================================

fn encode<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

async fn write_line<W>(writer: &mut BufWriter<W>, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Runs one dispatch to completion and builds its reply.
///
/// The dispatch runs on its own task so a panicking dispatcher still yields
/// exactly one reply for `id`.
async fn handle(
    dispatcher: Arc<dyn Dispatcher>,
    id: RequestId,
    envelope: RequestEnvelope,
) -> Response {
    let kind = envelope.event_type;
    let dispatched = tokio::spawn(async move { dispatcher.dispatch(envelope).await });

    match dispatched.await {
        Ok(result) => {
            debug!(request_id = %id, %kind, successful = result.successful, "Request handled");
            Response::result(id, result)
        }
        Err(e) => {
            error!(request_id = %id, %kind, error = %e, "Dispatcher failed");
            Response::error(id, codes::INTERNAL_ERROR, format!("{kind} dispatch failed: {e}"))
        }
    }
}

fn send_reply(line_tx: &mpsc::UnboundedSender<String>, response: &Response) {
    match encode(response) {
        Ok(line) => {
            let _ = line_tx.send(line);
        }
        Err(e) => error!(request_id = %response.id, error = %e, "Failed to encode reply"),
    }
}

/// Applies state-changing requests one at a time, in the order queued.
async fn run_sequential(
    dispatcher: Arc<dyn Dispatcher>,
    mut queue: mpsc::UnboundedReceiver<(RequestId, RequestEnvelope)>,
    line_tx: mpsc::UnboundedSender<String>,
) {
    while let Some((id, envelope)) = queue.recv().await {
        let response = handle(Arc::clone(&dispatcher), id, envelope).await;
        send_reply(&line_tx, &response);
    }
}

/// Drains `lines` into `writer` until every sender is gone.
async fn run_writer<W>(writer: W, mut lines: mpsc::UnboundedReceiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(line) = lines.recv().await {
        write_line(&mut writer, &line).await?;
    }
    writer.shutdown().await
}

// ============================================================================
// Public API
// ============================================================================

/// Announces an initialization failure and returns.
///
/// Used instead of [`serve`] when the worker cannot start serving.
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if the line cannot be written.
pub async fn announce_failure<W>(writer: W, message: &str, signal: FailureSignal) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    let line = encode(&Notification::initialize_failed(message, signal))?;
    write_line(&mut writer, &line).await?;
    warn!(%message, retry = signal.retry, "Initialization failure announced");
    Ok(())
}

/// Serves the protocol until `reader` reaches EOF.
///
/// Sends the `ready` notification first. `update` and `settings` requests
/// are applied in arrival order; read-only requests run concurrently.
/// Requests still running at EOF are allowed to finish and their replies
/// are written before returning.
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if reading or writing fails.
pub async fn serve<R, W>(dispatcher: Arc<dyn Dispatcher>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(run_writer(writer, line_rx));

    let ready = ReadyData::current();
    let _ = line_tx.send(encode(&Notification::ready(&ready))?);
    info!(pid = ready.process_id, version = %ready.version, "Worker ready");

    let (ordered_tx, ordered_rx) = mpsc::unbounded_channel();
    let sequential = tokio::spawn(run_sequential(
        Arc::clone(&dispatcher),
        ordered_rx,
        line_tx.clone(),
    ));

    let mut lines = BufReader::new(reader).lines();
    let mut tasks = JoinSet::new();
    let mut read_error = None;

    loop {
        let text = match lines.next_line().await {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!("Input closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "Read error");
                read_error = Some(e);
                break;
            }
        };

        while tasks.try_join_next().is_some() {}

        if text.trim().is_empty() {
            continue;
        }

        match classify(&text) {
            Inbound::Dispatch(id, envelope) => {
                trace!(request_id = %id, kind = %envelope.event_type, "Dispatching");

                if envelope.event_type.is_read_only() {
                    let dispatcher = Arc::clone(&dispatcher);
                    let line_tx = line_tx.clone();
                    tasks.spawn(async move {
                        let response = handle(dispatcher, id, envelope).await;
                        send_reply(&line_tx, &response);
                    });
                } else if let Err(mpsc::error::SendError((id, _))) =
                    ordered_tx.send((id, envelope))
                {
                    error!(request_id = %id, "Sequential dispatcher is gone");
                    send_reply(
                        &line_tx,
                        &Response::error(
                            id,
                            codes::INTERNAL_ERROR,
                            "worker cannot apply requests",
                        ),
                    );
                }
            }

            Inbound::Reject(response) => {
                if let Some(error) = &response.error {
                    debug!(request_id = %response.id, code = error.code, "Request rejected");
                }
                let _ = line_tx.send(encode(&response)?);
            }

            Inbound::Ignore => {}
        }
    }

    drop(ordered_tx);
    if let Err(e) = sequential.await {
        error!(error = %e, "Sequential dispatcher failed");
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Request task failed");
        }
    }

    drop(line_tx);
    match writer_task.await {
        Ok(written) => written?,
        Err(e) => error!(error = %e, "Writer task failed"),
    }

    if let Some(e) = read_error {
        return Err(e.into());
    }

    info!("Worker finished serving");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
