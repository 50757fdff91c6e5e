//! `WebSocket` session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use runbox_core::{ConnectionId, RunRequest};
use runbox_pipeline::RunService;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, instrument, warn};

use super::connection::{ClientConnection, Outbound};
use super::handler::{FrameAction, ProtocolViolation, classify_frame};
use super::registry::ConnectionRegistry;

/// Per-session queue sizes and timeouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    /// Capacity of the outbound frame queue.
    pub send_queue_capacity: usize,
    /// Capacity of the pending `run` command queue.
    pub command_queue_capacity: usize,
    /// How long to wait for the client's close reply after sending a close.
    pub close_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            send_queue_capacity: 64,
            command_queue_capacity: 8,
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared collaborators handed to every session.
#[derive(Clone, Debug)]
pub struct SessionDeps {
    /// Registry of live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Executes `run` commands.
    pub runner: RunService,
    /// Queue sizes and timeouts.
    pub limits: SessionLimits,
    /// Fires when the server is shutting down.
    pub shutdown: CancellationToken,
}

/// Run a `WebSocket` session for a connected client.
///
/// 1. Registers the connection
/// 2. Queues `run` commands for the session's command worker without
///    blocking the read loop; a full queue closes with 1008
/// 3. Closes the socket on protocol violations or server shutdown
/// 4. Answers a client close and waits for the reply to be written
/// 5. Deregisters on disconnect
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(ws: WebSocket, conn_id: ConnectionId, deps: SessionDeps) {
    let (ws_tx, mut ws_rx) = ws.split();
    let limits = deps.limits;

    let (out_tx, out_rx) = mpsc::channel::<Outbound>(limits.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(conn_id, out_tx));
    if !deps.registry.register(connection.clone()).await {
        warn!("connection id already registered, dropping socket");
        return;
    }

    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let mut writer = tokio::spawn(write_frames(ws_tx, out_rx).instrument(Span::current()));

    let (command_tx, command_rx) = mpsc::channel::<RunRequest>(limits.command_queue_capacity);
    let handled = Arc::new(AtomicU64::new(0));
    // Detached: an in-flight build finishes even if the client leaves.
    let _worker = tokio::spawn(
        run_commands(
            connection.clone(),
            deps.runner.clone(),
            command_rx,
            handled.clone(),
        )
        .instrument(Span::current()),
    );

    let mut close_deadline: Option<tokio::time::Instant> = None;
    // Set once a close frame is queued that the writer should get out
    // before the socket drops.
    let mut flush_close = false;
    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read failed");
                        break;
                    }
                    None => break,
                };
                match classify_frame(&message) {
                    FrameAction::PeerClosed(code) => {
                        debug!(code = ?code, "client sent close frame");
                        let _ = connection.begin_close(code.unwrap_or(close_code::NORMAL), "");
                        flush_close = true;
                        break;
                    }
                    FrameAction::Pong => connection.mark_alive(),
                    _ if !connection.is_open() => debug!("frame ignored while closing"),
                    FrameAction::Ignore(what) => debug!(frame = what, "frame ignored"),
                    FrameAction::Dispatch(request) => {
                        debug!(toolchain = %request.toolchain, "run command queued");
                        match command_tx.try_send(request) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                let violation = ProtocolViolation::QueueOverflow {
                                    capacity: limits.command_queue_capacity,
                                };
                                if !reject(&connection, &violation) {
                                    break;
                                }
                                close_deadline = Some(tokio::time::Instant::now() + limits.close_timeout);
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!("command worker stopped unexpectedly");
                                break;
                            }
                        }
                    }
                    FrameAction::Reject(violation) => {
                        if !reject(&connection, &violation) {
                            break;
                        }
                        close_deadline = Some(tokio::time::Instant::now() + limits.close_timeout);
                    }
                }
            }
            () = deps.shutdown.cancelled(), if connection.is_open() => {
                info!("server shutting down, closing session");
                if !connection.begin_close(close_code::AWAY, "server shutting down") {
                    break;
                }
                close_deadline = Some(tokio::time::Instant::now() + limits.close_timeout);
            }
            () = tokio::time::sleep_until(close_deadline.unwrap_or_else(tokio::time::Instant::now)),
                if close_deadline.is_some() =>
            {
                debug!("client did not answer close frame in time");
                break;
            }
        }
    }

    connection.mark_closed();
    drop(command_tx);
    if flush_close {
        if tokio::time::timeout(limits.close_timeout, &mut writer).await.is_err() {
            debug!("close reply not flushed in time");
            writer.abort();
        }
    } else {
        writer.abort();
    }
    let _ = deps.registry.deregister(&connection.id).await;

    let duration = connection.age();
    info!(
        duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        commands = handled.load(Ordering::Relaxed),
        dropped = connection.drop_count(),
        last_pong_ms = u64::try_from(connection.last_pong_elapsed().as_millis()).unwrap_or(u64::MAX),
        "client disconnected"
    );
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(duration.as_secs_f64());
}

/// Log and count a violation, then start the close handshake.
///
/// Returns `false` if the close frame could not be queued.
fn reject(connection: &ClientConnection, violation: &ProtocolViolation) -> bool {
    warn!(error = %violation, code = violation.close_code(), "protocol violation, closing session");
    counter!("ws_protocol_violations_total", "reason" => violation.label()).increment(1);
    connection.begin_close(violation.close_code(), violation.reason())
}

/// Forward queued frames to the socket. Stops after a close frame or on the
/// first write error, then closes the sink so any pending close reply is
/// flushed.
async fn write_frames(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = out_rx.recv().await {
        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text.into()), false),
            Outbound::Ping => (Message::Ping(Vec::<u8>::new().into()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.to_owned().into(),
                })),
                true,
            ),
        };
        if let Err(e) = ws_tx.send(message).await {
            debug!(error = %e, "socket write failed");
            break;
        }
        if last {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

/// Execute queued `run` commands one at a time, in arrival order.
///
/// Requests still queued once the session has left `Open` are skipped. A
/// command already executing runs to completion; its response is discarded
/// if the socket is gone.
async fn run_commands(
    connection: Arc<ClientConnection>,
    runner: RunService,
    mut command_rx: mpsc::Receiver<RunRequest>,
    handled: Arc<AtomicU64>,
) {
    while let Some(request) = command_rx.recv().await {
        if !connection.is_open() {
            debug!("session no longer open, skipping queued command");
            continue;
        }
        let response = runner.execute(request).await;
        let _ = handled.fetch_add(1, Ordering::Relaxed);
        if !connection.send_command(&response).await {
            debug!("response discarded, connection gone");
        }
    }
}

#[cfg(test)]
mod tests {
    // Full sessions need a real socket and are covered in
    // tests/integration.rs. These exercise the command worker directly.
    use super::*;
    use async_trait::async_trait;
    use runbox_core::{Command, ToolchainId};
    use runbox_pipeline::{BuildOutcome, BuildPipeline, LineDiagnosticParser};

    /// Echoes the source back, sleeping for the number of milliseconds
    /// given by the toolchain id.
    struct DelayedEcho;

    #[async_trait]
    impl BuildPipeline for DelayedEcho {
        async fn build_and_run(&self, source: &str, toolchain: &ToolchainId) -> BuildOutcome {
            let delay = toolchain.as_str().parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            BuildOutcome::Success(source.to_owned())
        }
    }

    fn runner() -> RunService {
        RunService::new(Arc::new(DelayedEcho), Arc::new(LineDiagnosticParser::new()))
    }

    fn request(source: &str, delay_ms: u64) -> RunRequest {
        RunRequest {
            source_code: source.into(),
            toolchain: delay_ms.to_string().as_str().into(),
        }
    }

    fn setup() -> (
        Arc<ClientConnection>,
        mpsc::Receiver<Outbound>,
        mpsc::Sender<RunRequest>,
        Arc<AtomicU64>,
        tokio::task::JoinHandle<()>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let connection = Arc::new(ClientConnection::new("s1".into(), out_tx));
        let (command_tx, command_rx) = mpsc::channel(8);
        let handled = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(run_commands(
            connection.clone(),
            runner(),
            command_rx,
            handled.clone(),
        ));
        (connection, out_rx, command_tx, handled, worker)
    }

    fn text_of(command: &Command) -> Outbound {
        Outbound::Text(runbox_core::encode(command))
    }

    #[tokio::test(start_paused = true)]
    async fn responses_follow_command_order() {
        let (_conn, mut out_rx, command_tx, handled, worker) = setup();
        command_tx.send(request("slow", 50)).await.unwrap();
        command_tx.send(request("fast", 0)).await.unwrap();
        drop(command_tx);
        worker.await.unwrap();

        assert_eq!(out_rx.recv().await.unwrap(), text_of(&Command::output("slow", vec![])));
        assert_eq!(out_rx.recv().await.unwrap(), text_of(&Command::output("fast", vec![])));
        assert_eq!(handled.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_commands_skipped_after_close() {
        let (conn, mut out_rx, command_tx, handled, worker) = setup();
        command_tx.send(request("first", 100)).await.unwrap();
        command_tx.send(request("second", 0)).await.unwrap();
        tokio::task::yield_now().await;
        assert!(conn.begin_close(1002, "malformed command"));
        drop(command_tx);
        worker.await.unwrap();

        assert_eq!(
            out_rx.recv().await.unwrap(),
            Outbound::Close {
                code: 1002,
                reason: "malformed command"
            }
        );
        // The in-flight command still answers while closing.
        assert_eq!(out_rx.recv().await.unwrap(), text_of(&Command::output("first", vec![])));
        assert!(out_rx.try_recv().is_err());
        assert_eq!(handled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_result_discarded_after_disconnect() {
        let (conn, out_rx, command_tx, handled, worker) = setup();
        command_tx.send(request("orphan", 100)).await.unwrap();
        tokio::task::yield_now().await;
        conn.mark_closed();
        drop(out_rx);
        drop(command_tx);
        worker.await.unwrap();

        // The build still ran to completion.
        assert_eq!(handled.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn reject_queues_close_once() {
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let conn = ClientConnection::new("r1".into(), out_tx);
        assert!(reject(&conn, &ProtocolViolation::QueueOverflow { capacity: 1 }));
        assert_eq!(
            out_rx.try_recv().unwrap(),
            Outbound::Close {
                code: 1008,
                reason: "too many pending commands"
            }
        );
        assert!(!reject(&conn, &ProtocolViolation::BinaryFrame { len: 3 }));
        assert!(out_rx.try_recv().is_err());
    }

    #[test]
    fn default_limits() {
        let limits = SessionLimits::default();
        assert_eq!(limits.send_queue_capacity, 64);
        assert_eq!(limits.command_queue_capacity, 8);
        assert_eq!(limits.close_timeout, Duration::from_secs(5));
    }
}
