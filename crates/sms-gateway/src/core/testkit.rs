use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::time::timeout;

use sms_proto::{
    Ack, FrameKind, Msg, Sms, Tag, md5_hex_upper, read_frame_async,
    write_frame_async,
};

use super::device::DeviceEngine;
use super::history::{History, HistoryRecord};
use crate::config::{DeviceConfig, WebhookConfig};

pub(crate) fn test_device_config(
    name: &str,
    region: &str,
    self_phone: &str,
) -> DeviceConfig {
    DeviceConfig {
        name: name.to_string(),
        device_path: "/dev/ttyTEST0".to_string(),
        baud: 115_200,
        send_queue_size: 8,
        heartbeat_send_interval: Duration::from_secs(5),
        // Tests drive a silent peer through long simulated windows; keep
        // the liveness watchdog out of the way.
        heartbeat_receive_timeout: Duration::from_secs(3600),
        self_phone: self_phone.to_string(),
        region: region.to_string(),
        send_retry_limit: 10,
    }
}

pub(crate) async fn start_test_engine(
    config: DeviceConfig
) -> (Arc<DeviceEngine>, DuplexStream, Arc<History>) {
    start_test_engine_with(config, WebhookConfig::default()).await
}

pub(crate) async fn start_test_engine_with(
    config: DeviceConfig,
    webhook: WebhookConfig,
) -> (Arc<DeviceEngine>, DuplexStream, Arc<History>) {
    let history = Arc::new(History::open_in_memory().await);
    let engine = DeviceEngine::new(
        config,
        history.clone(),
        webhook,
        reqwest::Client::new(),
    );
    let (local, remote) = tokio::io::duplex(65536);
    engine
        .start_with_transport(
            local,
            || Err(io::Error::other("no replacement transport")),
            false,
        )
        .expect("start engine");
    (engine, remote, history)
}

/// Reads frames from the engine side until a data frame arrives, skipping
/// heartbeats, and decodes the envelope.
pub(crate) async fn read_data_msg(remote: &mut DuplexStream) -> Msg {
    loop {
        let (kind, payload) = timeout(
            Duration::from_secs(600),
            read_frame_async(remote),
        )
        .await
        .expect("no data frame before timeout")
        .expect("peer read failed");
        if kind == FrameKind::Data {
            return Msg::decode(&payload).expect("envelope decode");
        }
    }
}

/// Asserts that no data frame shows up within `window`; heartbeats keep
/// flowing and are ignored.
pub(crate) async fn expect_no_data_frame(
    remote: &mut DuplexStream,
    window: Duration,
) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, read_frame_async(remote)).await {
            Err(_) => return,
            Ok(Err(err)) => panic!("peer read failed: {err}"),
            Ok(Ok((FrameKind::Heartbeat, _))) => {}
            Ok(Ok((FrameKind::Data, payload))) => {
                panic!(
                    "unexpected data frame: {}",
                    String::from_utf8_lossy(&payload)
                );
            }
        }
    }
}

pub(crate) async fn deliver_envelope(
    remote: &mut DuplexStream,
    tag: Tag,
    data: String,
) {
    let msg = Msg {
        tag: tag.raw(),
        md5: md5_hex_upper(&data),
        data,
        sms: None,
    };
    let payload = msg.encode().expect("envelope encode");
    write_frame_async(remote, FrameKind::Data, &payload)
        .await
        .expect("peer write");
}

pub(crate) async fn deliver_ack(
    remote: &mut DuplexStream,
    key: &str,
) {
    let data = serde_json::to_string(&Ack { key: key.to_string() })
        .expect("ack encode");
    deliver_envelope(remote, Tag::SmsAck, data).await;
}

pub(crate) async fn deliver_received(
    remote: &mut DuplexStream,
    sms: &Sms,
) {
    deliver_envelope(remote, Tag::SmsReceived, sms.to_json()).await;
}

/// Polls the ledger until `pred` holds. Generous with simulated time:
/// paused-clock tests burn through retry windows here.
pub(crate) async fn wait_for_rows(
    history: &Arc<History>,
    country: &str,
    pred: impl Fn(&[HistoryRecord]) -> bool,
) {
    for _ in 0..900 {
        let rows = history.get_all(country, false).await.expect("query");
        if pred(&rows) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("history did not reach the expected state");
}
