use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::limits::MAX_LINE_LEN;
use crate::model::{Event, RoomId};
use crate::observability::*;
use crate::protocol::{execute, Command, Reply};
use crate::schedule::{ErrorKind, Scheduler};
use crate::store::ReservationStore;

const EVENT_BUFFER: usize = 256;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn encode(reply: &Reply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        serde_json::json!({
            "status": "error",
            "kind": ErrorKind::Storage,
            "message": format!("failed to encode reply: {e}"),
        })
        .to_string()
    })
}

/// Copy a room's broadcast events into the connection's queue.
async fn forward(mut rx: broadcast::Receiver<Event>, tx: mpsc::Sender<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("watcher lagged, {n} events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Serve one client: read JSON commands line by line, write one reply per
/// command, and interleave events of watched rooms.
pub async fn process_connection<S: ReservationStore + 'static>(
    socket: TcpStream,
    scheduler: Arc<Scheduler<S>>,
    clock: Arc<dyn Clock>,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(EVENT_BUFFER);
    let mut watches: HashMap<RoomId, JoinHandle<()>> = HashMap::new();

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    None => break Ok(()),
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let reply = Reply::Error {
                            kind: ErrorKind::LimitExceeded,
                            message: "command line too long".into(),
                        };
                        let _ = framed.send(encode(&reply)).await;
                        break Ok(());
                    }
                    Some(Err(e)) => break Err(e),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match serde_json::from_str::<Command>(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        debug!("malformed command: {e}");
                        if let Err(e) = framed.send(encode(&Reply::malformed(&e))).await {
                            break Err(e);
                        }
                        continue;
                    }
                };
                let watch = match &command {
                    Command::Watch { room_id } => Some((*room_id, true)),
                    Command::Unwatch { room_id } => Some((*room_id, false)),
                    _ => None,
                };

                let sched = scheduler.clone();
                let clk = clock.clone();
                let reply = match tokio::task::spawn_blocking(move || {
                    execute(sched.as_ref(), clk.as_ref(), command)
                })
                .await
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!("command task failed: {e}");
                        Reply::Error {
                            kind: ErrorKind::Storage,
                            message: "internal error".into(),
                        }
                    }
                };

                if reply.is_ok() {
                    match watch {
                        Some((room_id, true)) => {
                            watches.entry(room_id).or_insert_with(|| {
                                let rx = scheduler.notify().subscribe(room_id);
                                tokio::spawn(forward(rx, event_tx.clone()))
                            });
                        }
                        Some((room_id, false)) => {
                            if let Some(handle) = watches.remove(&room_id) {
                                handle.abort();
                            }
                        }
                        None => {}
                    }
                }

                if let Err(e) = framed.send(encode(&reply)).await {
                    break Err(e);
                }
            }
            Some(event) = event_rx.recv() => {
                if let Err(e) = framed.send(encode(&Reply::event(event))).await {
                    break Err(e);
                }
            }
        }
    };

    for handle in watches.into_values() {
        handle.abort();
    }
    result
}

/// Accept connections until `shutdown` resolves, then wait (bounded) for
/// open connections to finish.
pub async fn serve<S: ReservationStore + 'static>(
    listener: TcpListener,
    scheduler: Arc<Scheduler<S>>,
    clock: Arc<dyn Clock>,
    max_connections: usize,
    shutdown: impl Future<Output = ()>,
) {
    let semaphore = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let scheduler = scheduler.clone();
                let clock = clock.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = process_connection(socket, scheduler, clock).await {
                        error!("connection error from {peer}: {e}");
                    }
                    debug!("connection from {peer} closed");
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(DRAIN_TIMEOUT);
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}
