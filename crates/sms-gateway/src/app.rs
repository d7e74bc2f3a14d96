use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::{DeviceManager, History};
use crate::http::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<DeviceManager>,
    pub history: Arc<History>,
    pub sessions: Arc<SessionStore>,
    pub shutdown: CancellationToken,
}
