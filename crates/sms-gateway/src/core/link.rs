use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sms_proto::{FrameKind, ProtoError, read_frame_async, write_frame_async};

/// Fixed delay before the transport is reopened after link loss.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

const INBOUND_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Device name, used only for log lines.
    pub tag: String,
    pub send_queue_size: usize,
    pub heartbeat_send_interval: Duration,
    pub heartbeat_receive_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("send queue full")]
    QueueFull,
    #[error("link is down")]
    Down,
    #[error("link killed")]
    Killed,
}

/// Write half of a connected link. Cloned freely by send tasks.
#[derive(Debug, Clone)]
pub struct LinkSender {
    frame_tx: mpsc::Sender<Vec<u8>>,
    alive: Arc<AtomicBool>,
    kill: CancellationToken,
}

impl LinkSender {
    /// Enqueues one outbound data frame. Fails when the bounded queue is
    /// full, the link is between reconnects, or the link was killed.
    pub fn write(
        &self,
        frame: Vec<u8>,
    ) -> Result<(), LinkError> {
        if self.kill.is_cancelled() {
            return Err(LinkError::Killed);
        }
        if !self.alive.load(Ordering::Acquire) {
            return Err(LinkError::Down);
        }
        self.frame_tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => LinkError::QueueFull,
            TrySendError::Closed(_) => LinkError::Killed,
        })
    }

    pub fn is_alive(&self) -> bool {
        !self.kill.is_cancelled() && self.alive.load(Ordering::Acquire)
    }

    /// Terminal shutdown. Idempotent; the supervisor drops the transport,
    /// which closes the underlying byte stream.
    pub fn kill(&self) {
        self.kill.cancel();
    }
}

/// Starts the link over an already-open transport and returns the write
/// handle plus the ordered stream of inbound data frames.
///
/// `opener` supplies replacement transports after link loss when
/// `reconnect_on_loss` is set; reopen attempts are spaced by
/// [`RECONNECT_BACKOFF`]. A heartbeat frame is emitted every
/// `heartbeat_send_interval`; peer silence longer than
/// `heartbeat_receive_timeout` tears the connection down.
pub fn connect<T, F>(
    initial: T,
    opener: F,
    config: LinkConfig,
    reconnect_on_loss: bool,
) -> (LinkSender, mpsc::Receiver<Vec<u8>>)
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    F: FnMut() -> io::Result<T> + Send + 'static,
{
    let (frame_tx, frame_rx) = mpsc::channel(config.send_queue_size.max(1));
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
    let alive = Arc::new(AtomicBool::new(true));
    let kill = CancellationToken::new();

    tokio::spawn(run_supervisor(
        initial,
        opener,
        config,
        reconnect_on_loss,
        frame_rx,
        inbound_tx,
        alive.clone(),
        kill.clone(),
    ));

    (LinkSender { frame_tx, alive, kill }, inbound_rx)
}

enum ConnectionEnd {
    Killed,
    HeartbeatTimeout,
    ReadFailed(ProtoError),
    WriteFailed(ProtoError),
    QueueClosed,
}

#[allow(clippy::too_many_arguments)]
async fn run_supervisor<T, F>(
    initial: T,
    mut opener: F,
    config: LinkConfig,
    reconnect_on_loss: bool,
    mut frame_rx: mpsc::Receiver<Vec<u8>>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    alive: Arc<AtomicBool>,
    kill: CancellationToken,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    F: FnMut() -> io::Result<T> + Send + 'static,
{
    let mut transport = Some(initial);

    loop {
        let current = match transport.take() {
            Some(t) => Some(t),
            None => match opener() {
                Ok(t) => {
                    info!("link reopened: tag={}", config.tag);
                    Some(t)
                }
                Err(err) => {
                    warn!(
                        "link reopen failed: tag={}, error={}",
                        config.tag, err
                    );
                    None
                }
            },
        };

        if let Some(t) = current {
            alive.store(true, Ordering::Release);
            let end =
                run_connection(t, &config, &mut frame_rx, &inbound_tx, &kill)
                    .await;
            alive.store(false, Ordering::Release);

            match end {
                ConnectionEnd::Killed => break,
                ConnectionEnd::QueueClosed => break,
                ConnectionEnd::HeartbeatTimeout => {
                    warn!("heartbeat receive timeout: tag={}", config.tag);
                }
                ConnectionEnd::ReadFailed(err) => {
                    warn!("link read failed: tag={}, error={}", config.tag, err);
                }
                ConnectionEnd::WriteFailed(err) => {
                    warn!(
                        "link write failed: tag={}, error={}",
                        config.tag, err
                    );
                }
            }
        }

        if !reconnect_on_loss || kill.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = kill.cancelled() => break,
            _ = sleep(RECONNECT_BACKOFF) => {}
        }
    }

    alive.store(false, Ordering::Release);
    debug!("link supervisor stopped: tag={}", config.tag);
}

async fn run_connection<T>(
    transport: T,
    config: &LinkConfig,
    frame_rx: &mut mpsc::Receiver<Vec<u8>>,
    inbound_tx: &mpsc::Sender<Vec<u8>>,
    kill: &CancellationToken,
) -> ConnectionEnd
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(transport);
    let mut read_task = tokio::spawn(run_read_loop(
        read_half,
        config.heartbeat_receive_timeout,
        inbound_tx.clone(),
    ));

    let mut heartbeat = interval(config.heartbeat_send_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let end = loop {
        tokio::select! {
            _ = kill.cancelled() => break ConnectionEnd::Killed,
            read_end = &mut read_task => {
                break read_end.unwrap_or_else(|join_err| {
                    ConnectionEnd::ReadFailed(ProtoError::Io(
                        io::Error::other(join_err),
                    ))
                });
            }
            maybe_frame = frame_rx.recv() => {
                let Some(frame) = maybe_frame else {
                    break ConnectionEnd::QueueClosed;
                };
                if let Err(err) = write_frame_async(
                    &mut write_half,
                    FrameKind::Data,
                    &frame,
                )
                .await
                {
                    break ConnectionEnd::WriteFailed(err);
                }
            }
            _ = heartbeat.tick() => {
                if let Err(err) = write_frame_async(
                    &mut write_half,
                    FrameKind::Heartbeat,
                    &[],
                )
                .await
                {
                    break ConnectionEnd::WriteFailed(err);
                }
            }
        }
    };

    read_task.abort();
    end
}

/// Reads frames until the peer goes silent past the heartbeat timeout or
/// the stream errors. Every successfully decoded frame counts as liveness;
/// heartbeat frames carry nothing else.
async fn run_read_loop<R>(
    mut reader: R,
    read_timeout: Duration,
    inbound_tx: mpsc::Sender<Vec<u8>>,
) -> ConnectionEnd
where
    R: AsyncRead + Send + Unpin + 'static,
{
    loop {
        match timeout(read_timeout, read_frame_async(&mut reader)).await {
            Err(_) => return ConnectionEnd::HeartbeatTimeout,
            Ok(Err(err)) => return ConnectionEnd::ReadFailed(err),
            Ok(Ok((FrameKind::Heartbeat, _))) => {}
            Ok(Ok((FrameKind::Data, payload))) => {
                if inbound_tx.send(payload).await.is_err() {
                    return ConnectionEnd::QueueClosed;
                }
            }
        }
    }
}
