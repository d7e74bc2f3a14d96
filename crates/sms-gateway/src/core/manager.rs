use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{error, info, warn};

use sms_proto::Msg;

use super::device::DeviceEngine;
use super::history::History;
use crate::config::{DeviceConfig, WebhookConfig};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Registry of device engines, addressed by name or by region alias.
pub struct DeviceManager {
    engines: BTreeMap<String, Arc<DeviceEngine>>,
    continue_on_start_failure: bool,
}

impl DeviceManager {
    pub fn new(
        configs: &[DeviceConfig],
        history: Arc<History>,
        webhook: WebhookConfig,
        continue_on_start_failure: bool,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("failed to build webhook http client")?;

        let mut engines = BTreeMap::new();
        for config in configs {
            info!(
                "adding serial device: name={}, path={}, region={}",
                config.name, config.device_path, config.region
            );
            engines.insert(
                config.name.clone(),
                DeviceEngine::new(
                    config.clone(),
                    history.clone(),
                    webhook.clone(),
                    http.clone(),
                ),
            );
        }

        Ok(Self { engines, continue_on_start_failure })
    }

    /// Starts every engine. Default policy aborts at the first failure;
    /// with `continue_on_start_failure` the rest still come up and the
    /// failure is only logged.
    pub fn start_all(&self) -> Result<()> {
        for (name, engine) in &self.engines {
            if let Err(err) = engine.start() {
                if self.continue_on_start_failure {
                    error!("device start failed: name={}, error={:#}", name, err);
                } else {
                    return Err(err)
                        .with_context(|| format!("failed to start device {name}"));
                }
            }
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        for (name, engine) in &self.engines {
            if let Err(err) = engine.stop() {
                warn!("device stop failed: name={}, error={}", name, err);
            }
        }
    }

    /// Hands the envelopes to the engine named `target`, or, as the alias
    /// the HTTP layer relies on, to the first engine whose region matches
    /// case-insensitively.
    pub fn route(
        &self,
        target: &str,
        sender: &str,
        msgs: Vec<Msg>,
    ) -> Result<()> {
        let engine = self.engines.get(target).or_else(|| {
            self.engines
                .values()
                .find(|engine| engine.region().eq_ignore_ascii_case(target))
        });
        let Some(engine) = engine else {
            bail!("device {} not found", target);
        };
        engine.send(sender, msgs)
    }

    pub fn status(
        &self,
        name: &str,
    ) -> Result<bool> {
        self.engines
            .get(name)
            .map(|engine| engine.is_alive())
            .ok_or_else(|| anyhow!("device {} not found", name))
    }

    pub fn status_all(&self) -> BTreeMap<String, bool> {
        self.engines
            .iter()
            .map(|(name, engine)| (name.clone(), engine.is_alive()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sms_proto::{Msg, Sms, Tag};

    use super::super::history::History;
    use super::super::testkit::{read_data_msg, test_device_config};
    use super::DeviceManager;
    use crate::config::WebhookConfig;

    async fn test_manager(
        continue_on_start_failure: bool
    ) -> (DeviceManager, Arc<History>) {
        let history = Arc::new(History::open_in_memory().await);
        let configs = vec![
            test_device_config("cn-modem", "CN", "13800000000"),
            test_device_config("us-modem", "US", "12025550123"),
        ];
        let manager = DeviceManager::new(
            &configs,
            history.clone(),
            WebhookConfig::default(),
            continue_on_start_failure,
        )
        .expect("build manager");
        (manager, history)
    }

    fn outbound(text: &str) -> Vec<Msg> {
        Msg::batch(Tag::SmsSend, Sms::split_long("13800000000", text))
    }

    #[tokio::test]
    async fn route_to_unknown_device_fails() {
        let (manager, _history) = test_manager(false).await;
        let err = manager
            .route("eu-modem", "alice", outbound("test"))
            .expect_err("unknown device");
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn route_by_name_and_region_alias() {
        let (manager, _history) = test_manager(false).await;

        let engine = manager.engines.get("cn-modem").expect("engine");
        let (local, mut remote) = tokio::io::duplex(65536);
        engine
            .start_with_transport(
                local,
                || Err(std::io::Error::other("no reopen")),
                false,
            )
            .expect("start");

        manager.route("cn-modem", "alice", outbound("by name")).expect("route");
        let msg = read_data_msg(&mut remote).await;
        let sms = Sms::decode(msg.data.as_bytes()).expect("sms");
        assert_eq!(sms.message, "by name");

        manager.route("cn", "alice", outbound("by region")).expect("route");
        let msg = read_data_msg(&mut remote).await;
        let sms = Sms::decode(msg.data.as_bytes()).expect("sms");
        assert_eq!(sms.message, "by region");
    }

    #[tokio::test]
    async fn route_to_stopped_engine_surfaces_error() {
        let (manager, _history) = test_manager(false).await;
        let err = manager
            .route("cn-modem", "alice", outbound("test"))
            .expect_err("engine not running");
        assert!(err.to_string().contains("not running"));
    }

    #[tokio::test]
    async fn status_reports_liveness() {
        let (manager, _history) = test_manager(false).await;

        assert!(!manager.status("cn-modem").expect("status"));
        assert!(manager.status("eu-modem").is_err());

        let all = manager.status_all();
        assert_eq!(all.len(), 2);
        assert!(all.values().all(|alive| !alive));

        let engine = manager.engines.get("us-modem").expect("engine");
        let (local, _remote) = tokio::io::duplex(65536);
        engine
            .start_with_transport(
                local,
                || Err(std::io::Error::other("no reopen")),
                false,
            )
            .expect("start");

        assert!(manager.status("us-modem").expect("status"));
        manager.stop_all();
        assert!(!manager.status("us-modem").expect("status"));
    }

    #[tokio::test]
    async fn start_all_aborts_on_first_failure_by_default() {
        // The test configs point at device paths that cannot be opened, so
        // the first engine start fails.
        let (manager, _history) = test_manager(false).await;
        assert!(manager.start_all().is_err());
    }

    #[tokio::test]
    async fn start_all_can_continue_past_failures() {
        let (manager, _history) = test_manager(true).await;
        manager.start_all().expect("policy swallows per-device failures");
    }
}
