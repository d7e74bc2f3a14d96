use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{info, warn};

use sms_proto::{Msg, Sms, Tag};

use super::device::DeviceEngine;

impl DeviceEngine {
    /// Reacts to an inbound SMS whose text matches one of the command
    /// words. Operator commands (`ha.*`) only fire when the message came
    /// from the configured self phone. Replies re-enter the normal send
    /// pipeline, so a repeated command inside the dedup window is only
    /// logged.
    pub(super) async fn react_to_command(
        self: &Arc<Self>,
        sms: &Sms,
    ) {
        let is_self_phone = sms.phone.contains(&self.config.self_phone);

        let reply = match sms.message.as_str() {
            "hello" => Some(if is_self_phone {
                format!(
                    "Hello {}! This is SMS service on {}.",
                    self.config.self_phone, self.config.name
                )
            } else {
                "Hello! This is SMS service.".to_string()
            }),
            "你好" => Some(if is_self_phone {
                format!(
                    "你好 {}！这里是{}的SMS服务。",
                    self.config.self_phone, self.config.name
                )
            } else {
                "你好！这里是SMS服务。".to_string()
            }),
            "status" => Some(format!(
                "[SMS][{}] Device: {}, Status: Active",
                self.config.name, self.config.device_path
            )),
            "ha.help" if is_self_phone => {
                Some("[HA][HELP]\nha.op.reboot - Reboot OP".to_string())
            }
            "ha.op.reboot" if is_self_phone => {
                self.trigger_reboot_webhook().await;
                Some("Reboot OP".to_string())
            }
            _ => None,
        };

        let Some(reply) = reply else {
            return;
        };

        let msgs = Msg::batch(Tag::SmsSend, Sms::split_long(&sms.phone, &reply));
        if let Err(err) = self.send("sms", msgs) {
            warn!(
                "command reply failed: device={}, error={}",
                self.config.name, err
            );
        }
    }

    /// Best-effort: the confirmation reply goes out whether or not the
    /// webhook endpoint answered.
    async fn trigger_reboot_webhook(&self) {
        let request = self
            .http
            .post(&self.webhook.reboot_url)
            .header(CONTENT_TYPE, "application/json")
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.webhook.reboot_token),
            );

        match request.send().await {
            Ok(response) => info!(
                "reboot webhook delivered: device={}, status={}",
                self.config.name,
                response.status()
            ),
            Err(err) => warn!(
                "reboot webhook failed: device={}, error={}",
                self.config.name, err
            ),
        }
    }
}
