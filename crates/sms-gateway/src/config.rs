use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use sms_helpers::de;

/// Every modem is declared as its own `[serial-device-<name>]` table.
const DEVICE_SECTION_PREFIX: &str = "serial-device-";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_brand_name")]
    pub brand_name: String,
    #[serde(default)]
    pub prod: bool,
    #[serde(default)]
    pub continue_on_start_failure: bool,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(flatten)]
    sections: BTreeMap<String, toml::Value>,
    #[serde(skip)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| {
            format!("failed to read config file {}", path.display())
        })?;
        let mut config: Config =
            toml::from_str(&raw).with_context(|| {
                format!("failed to parse config {}", path.display())
            })?;
        config.collect_devices()?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.http_addr, self.server.http_port)
    }

    fn collect_devices(&mut self) -> Result<()> {
        let sections = std::mem::take(&mut self.sections);
        for (key, value) in sections {
            let Some(suffix) = key.strip_prefix(DEVICE_SECTION_PREFIX) else {
                bail!("unknown config section [{key}]");
            };
            let mut device: DeviceConfig =
                value.try_into().with_context(|| {
                    format!("invalid [{DEVICE_SECTION_PREFIX}{suffix}] section")
                })?;
            if device.name.trim().is_empty() {
                device.name = suffix.to_string();
            }
            self.devices.push(device);
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.brand_name = self.brand_name.trim().to_string();
        if self.brand_name.is_empty() {
            self.brand_name = default_brand_name();
        }

        self.server.http_addr = self.server.http_addr.trim().to_string();
        if self.server.http_addr.is_empty() {
            self.server.http_addr = default_http_addr();
        }

        self.session.normalize();

        for device in &mut self.devices {
            device.name = device.name.trim().to_string();
            device.device_path = device.device_path.trim().to_string();
            device.self_phone = device.self_phone.trim().to_string();
            device.region = device.region.trim().to_string();
            device.send_queue_size = device.send_queue_size.max(1);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            bail!("config missing `database.path`");
        }

        if self.security.username.trim().is_empty()
            || self.security.password.trim().is_empty()
        {
            bail!("config missing `security.username`/`security.password`");
        }
        if self.security.access_key.trim().is_empty() {
            bail!("config missing `security.access_key`");
        }

        if self.server.enable_https
            && (self.server.ssl_cert.as_os_str().is_empty()
                || self.server.ssl_key.as_os_str().is_empty())
        {
            bail!("https enabled but `server.ssl_cert`/`server.ssl_key` missing");
        }

        if self.log.log_to_file && self.log.file_path.as_os_str().is_empty() {
            bail!("`log.log_to_file` set but `log.file_path` missing");
        }

        let mut names = BTreeSet::new();
        for device in &self.devices {
            if device.device_path.is_empty() {
                bail!("device {} missing `device_path`", device.name);
            }
            if device.region.is_empty() {
                bail!("device {} missing `region`", device.name);
            }
            if device.heartbeat_send_interval.is_zero()
                || device.heartbeat_receive_timeout.is_zero()
            {
                bail!("device {} has a zero heartbeat interval", device.name);
            }
            if !names.insert(device.name.clone()) {
                bail!("duplicate device name {}", device.name);
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub enable_https: bool,
    #[serde(default)]
    pub ssl_cert: PathBuf,
    #[serde(default)]
    pub ssl_key: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            http_port: default_http_port(),
            enable_https: false,
            ssl_cert: PathBuf::new(),
            ssl_key: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_session_path")]
    pub path: String,
    #[serde(default = "default_session_name")]
    pub name: String,
    /// Cookie and server-side session lifetime, seconds.
    #[serde(default = "default_session_max_age")]
    pub max_age: i64,
}

impl SessionConfig {
    fn normalize(&mut self) {
        self.domain = self.domain.trim().to_string();
        self.path = self.path.trim().to_string();
        if self.path.is_empty() {
            self.path = default_session_path();
        }
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            self.name = default_session_name();
        }
        self.max_age = self.max_age.max(1);
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            path: default_session_path(),
            name: default_session_name(),
            max_age: default_session_max_age(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default)]
    pub file_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    pub username: String,
    pub password: String,
    pub access_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    #[serde(default = "default_reboot_url")]
    pub reboot_url: String,
    #[serde(default)]
    pub reboot_token: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            reboot_url: default_reboot_url(),
            reboot_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Defaults to the section name suffix.
    #[serde(default)]
    pub name: String,
    pub device_path: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_send_queue_size")]
    pub send_queue_size: usize,
    #[serde(
        default = "default_heartbeat_send_interval",
        deserialize_with = "de::deserialize_duration"
    )]
    pub heartbeat_send_interval: Duration,
    #[serde(
        default = "default_heartbeat_receive_timeout",
        deserialize_with = "de::deserialize_duration"
    )]
    pub heartbeat_receive_timeout: Duration,
    #[serde(default)]
    pub self_phone: String,
    pub region: String,
    #[serde(default = "default_send_retry_limit")]
    pub send_retry_limit: u32,
}

fn default_brand_name() -> String {
    "SMS Pusher".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_session_path() -> String {
    "/".to_string()
}

fn default_session_name() -> String {
    "sms_session".to_string()
}

fn default_session_max_age() -> i64 {
    86_400
}

fn default_reboot_url() -> String {
    "http://127.0.0.1/api/services/script/reboot_router".to_string()
}

fn default_baud() -> u32 {
    115_200
}

fn default_send_queue_size() -> usize {
    16
}

fn default_heartbeat_send_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_receive_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_send_retry_limit() -> u32 {
    10
}
