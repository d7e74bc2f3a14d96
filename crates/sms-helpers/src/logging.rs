use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
#[cfg(target_os = "linux")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(target_os = "linux")]
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes the process-wide subscriber.
///
/// Sink selection: an explicit log file when one is configured, journald
/// when running under systemd (linux), stderr formatter otherwise.
pub fn init_logging(
    default_filter: &str,
    env_key: &str,
    service_name: &str,
    log_file: Option<&Path>,
) {
    let env_filter = build_env_filter(default_filter, env_key);

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .init();
                return;
            }
            Err(err) => {
                eprintln!(
                    "{service_name}: failed to open log file {}, falling back to stderr formatter: {err}",
                    path.display()
                );
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        if is_running_under_systemd() {
            match tracing_journald::layer() {
                Ok(layer) => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(layer)
                        .init();
                    return;
                }
                Err(err) => {
                    eprintln!(
                        "{service_name}: journald init failed, falling back to stderr formatter: {err}"
                    );
                }
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    let _ = service_name;

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn build_env_filter(
    default_filter: &str,
    env_key: &str,
) -> EnvFilter {
    EnvFilter::try_from_env(env_key)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter))
}

#[cfg(target_os = "linux")]
#[inline]
fn is_running_under_systemd() -> bool {
    std::env::var_os("JOURNAL_STREAM").is_some()
        || std::env::var_os("INVOCATION_ID").is_some()
}
