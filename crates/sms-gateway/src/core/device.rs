use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sms_proto::{Ack, Msg, Sms, Tag};

use super::dedup::DedupCache;
use super::history::History;
use super::link::{self, LinkConfig, LinkSender};
use super::pending::PendingAcks;
use crate::config::{DeviceConfig, WebhookConfig};

/// How long one send attempt waits for the remote ACK before re-emitting.
const ACK_WAIT: Duration = Duration::from_secs(30);
/// Backoff between write attempts while the link refuses the frame.
const WRITE_RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// One engine per modem: owns the serial link, the dedup cache and the
/// pending-ACK registry, and runs the send state machine plus the inbound
/// reactor.
pub struct DeviceEngine {
    pub(super) config: DeviceConfig,
    pub(super) history: Arc<History>,
    pub(super) webhook: WebhookConfig,
    pub(super) http: reqwest::Client,
    pending: Arc<PendingAcks>,
    dedup: DedupCache,
    runtime: Mutex<Option<EngineRuntime>>,
}

struct EngineRuntime {
    link: LinkSender,
    stop: CancellationToken,
}

impl DeviceEngine {
    pub fn new(
        config: DeviceConfig,
        history: Arc<History>,
        webhook: WebhookConfig,
        http: reqwest::Client,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            history,
            webhook,
            http,
            pending: Arc::new(PendingAcks::new()),
            dedup: DedupCache::new(),
            runtime: Mutex::new(None),
        })
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    /// Opens the serial port and brings the link up. Errors when already
    /// running; a port that fails to open is fatal to this start attempt.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut runtime = self.runtime.lock().unwrap();
        if runtime.is_some() {
            bail!("device {} is already running", self.config.name);
        }

        let builder = tokio_serial::new(
            self.config.device_path.clone(),
            self.config.baud,
        );
        let initial =
            builder.clone().open_native_async().with_context(|| {
                format!(
                    "failed to open serial port {}",
                    self.config.device_path
                )
            })?;
        let opener =
            move || builder.clone().open_native_async().map_err(io::Error::other);

        let (link, inbound_rx) = link::connect(
            initial,
            opener,
            self.link_config(),
            true,
        );
        self.finish_start(&mut runtime, link, inbound_rx);

        info!(
            "device started: name={}, path={}",
            self.config.name, self.config.device_path
        );
        Ok(())
    }

    /// Stops the link and the reactor. Success when already stopped.
    pub fn stop(&self) -> Result<()> {
        let taken = self.runtime.lock().unwrap().take();
        if let Some(runtime) = taken {
            runtime.link.kill();
            runtime.stop.cancel();
            info!("device stopped: name={}", self.config.name);
        }
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.runtime
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|runtime| runtime.link.is_alive())
    }

    /// Fire-and-forget: spawns one send task per envelope and returns.
    /// Each task owns its retry discipline and the history finalization.
    pub fn send(
        self: &Arc<Self>,
        sender: &str,
        msgs: Vec<Msg>,
    ) -> Result<()> {
        let (link, stop) = {
            let runtime = self.runtime.lock().unwrap();
            let Some(runtime) = runtime.as_ref() else {
                bail!("device {} is not running", self.config.name);
            };
            (runtime.link.clone(), runtime.stop.clone())
        };

        for msg in msgs {
            let engine = self.clone();
            let link = link.clone();
            let stop = stop.clone();
            let sender = sender.to_string();
            tokio::spawn(async move {
                engine.run_send_task(sender, msg, link, stop).await;
            });
        }
        Ok(())
    }

    async fn run_send_task(
        self: Arc<Self>,
        sender: String,
        mut msg: Msg,
        link: LinkSender,
        stop: CancellationToken,
    ) {
        let Some(sms) = msg.sms.as_ref() else {
            warn!(
                "outbound envelope without sms payload: device={}",
                self.config.name
            );
            return;
        };

        let dedup_key = format!("{}{}", sms.phone, sms.message);
        let is_duplicate = self.dedup.check_and_insert(&dedup_key);
        if is_duplicate {
            debug!(
                "duplicate send suppressed: device={}, phone={}",
                self.config.name, sms.phone
            );
            msg.retag_duplicate();
        }

        let Some(sms) = msg.sms.clone() else {
            return;
        };
        let id = self
            .history
            .insert(&self.config.region, &sender, &sms)
            .await;

        let mut acked = false;
        if !is_duplicate {
            match msg.encode() {
                Err(err) => warn!(
                    "envelope encode failed: device={}, error={}",
                    self.config.name, err
                ),
                Ok(frame) => {
                    let rendezvous = self.pending.put(&msg.md5);
                    write_with_retry(&link, &frame, &stop, &self.config.name)
                        .await;

                    let mut retries: u32 = 0;
                    loop {
                        tokio::select! {
                            _ = rendezvous.notified() => {
                                acked = true;
                                break;
                            }
                            _ = stop.cancelled() => break,
                            _ = sleep(ACK_WAIT) => {
                                retries += 1;
                                if retries > self.config.send_retry_limit {
                                    warn!(
                                        "send retries exhausted: device={}, phone={}, md5={}",
                                        self.config.name, sms.phone, msg.md5
                                    );
                                    break;
                                }
                                debug!(
                                    "ack overdue, re-sending: device={}, md5={}, attempt={}",
                                    self.config.name, msg.md5, retries
                                );
                                write_with_retry(
                                    &link,
                                    &frame,
                                    &stop,
                                    &self.config.name,
                                )
                                .await;
                            }
                        }
                    }
                    self.pending.delete(&msg.md5);
                }
            }
        }

        self.history.update_sent(id, acked).await;
        debug!(
            "send finished: device={}, sender={}, phone={}, duplicate={}, acked={}",
            self.config.name, sender, sms.phone, is_duplicate, acked
        );
    }

    async fn handle_frame(
        self: &Arc<Self>,
        payload: &[u8],
    ) {
        let msg = match Msg::decode(payload) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(
                    "envelope decode failed: device={}, error={}",
                    self.config.name, err
                );
                return;
            }
        };

        match Tag::from_raw(msg.tag) {
            Some(Tag::SmsReceived) => self.handle_received(&msg).await,
            Some(Tag::SmsAck) => self.handle_ack(&msg),
            // Real modems never send the outbound shape back; a peer echo
            // carries nothing for us.
            Some(Tag::SmsSend) => debug!(
                "ignoring echoed send envelope: device={}",
                self.config.name
            ),
            None => debug!(
                "unknown envelope tag: device={}, tag={}",
                self.config.name, msg.tag
            ),
        }
    }

    async fn handle_received(
        self: &Arc<Self>,
        msg: &Msg,
    ) {
        let sms = match Sms::decode(msg.data.as_bytes()) {
            Ok(sms) => sms,
            Err(err) => {
                warn!(
                    "received sms decode failed: device={}, error={}",
                    self.config.name, err
                );
                return;
            }
        };

        info!(
            "sms received: device={}, phone={}, message={}",
            self.config.name, sms.phone, sms.message
        );
        self.history
            .insert(&self.config.region, &self.config.name, &sms)
            .await;

        self.react_to_command(&sms).await;
    }

    fn handle_ack(
        &self,
        msg: &Msg,
    ) {
        let ack = match Ack::decode(msg.data.as_bytes()) {
            Ok(ack) => ack,
            Err(err) => {
                warn!(
                    "ack decode failed: device={}, error={}",
                    self.config.name, err
                );
                return;
            }
        };

        // An unregistered key means the send already completed or gave up.
        self.pending.trick(&ack.key);
        debug!("ack observed: device={}, key={}", self.config.name, ack.key);
    }

    fn link_config(&self) -> LinkConfig {
        LinkConfig {
            tag: self.config.name.clone(),
            send_queue_size: self.config.send_queue_size,
            heartbeat_send_interval: self.config.heartbeat_send_interval,
            heartbeat_receive_timeout: self.config.heartbeat_receive_timeout,
        }
    }

    fn finish_start(
        self: &Arc<Self>,
        slot: &mut Option<EngineRuntime>,
        link: LinkSender,
        inbound_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        let stop = CancellationToken::new();
        tokio::spawn(run_inbound_reactor(
            self.clone(),
            inbound_rx,
            stop.clone(),
        ));
        *slot = Some(EngineRuntime { link, stop });
    }

    #[cfg(test)]
    pub(crate) fn start_with_transport<T, F>(
        self: &Arc<Self>,
        initial: T,
        opener: F,
        reconnect_on_loss: bool,
    ) -> Result<()>
    where
        T: tokio::io::AsyncRead
            + tokio::io::AsyncWrite
            + Send
            + Unpin
            + 'static,
        F: FnMut() -> io::Result<T> + Send + 'static,
    {
        let mut runtime = self.runtime.lock().unwrap();
        if runtime.is_some() {
            bail!("device {} is already running", self.config.name);
        }
        let (link, inbound_rx) = link::connect(
            initial,
            opener,
            self.link_config(),
            reconnect_on_loss,
        );
        self.finish_start(&mut runtime, link, inbound_rx);
        Ok(())
    }
}

async fn run_inbound_reactor(
    engine: Arc<DeviceEngine>,
    mut inbound_rx: mpsc::Receiver<Vec<u8>>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            maybe_frame = inbound_rx.recv() => {
                let Some(payload) = maybe_frame else {
                    break;
                };
                engine.handle_frame(&payload).await;
            }
        }
    }
    debug!("inbound reactor stopped: device={}", engine.config.name);
}

/// Writes one frame, retrying forever with a fixed backoff while the link
/// queue is full or the link is re-establishing. Only engine stop aborts.
async fn write_with_retry(
    link: &LinkSender,
    frame: &[u8],
    stop: &CancellationToken,
    tag: &str,
) {
    loop {
        match link.write(frame.to_vec()) {
            Ok(()) => return,
            Err(err) => {
                debug!("link write deferred: device={}, error={}", tag, err);
            }
        }
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = sleep(WRITE_RETRY_BACKOFF) => {}
        }
    }
}
