mod handlers;
mod pages;
mod response;
mod session;
mod tls;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::app::AppState;
use crate::config::Config;

pub use session::SessionStore;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route(
            "/login",
            get(handlers::login_form).post(handlers::login_submit),
        )
        .route("/random_key", get(handlers::random_key))
        .route("/help", get(handlers::help))
        .route("/status", get(handlers::status))
        .route(
            "/send_sms",
            get(handlers::send_sms_cn_get).post(handlers::send_sms_cn_post),
        )
        .route(
            "/send_sms_cn",
            get(handlers::send_sms_cn_get).post(handlers::send_sms_cn_post),
        )
        .route(
            "/send_sms_us",
            get(handlers::send_sms_us_get).post(handlers::send_sms_us_post),
        )
        .route("/history", get(handlers::history_cn))
        .route("/history_cn", get(handlers::history_cn))
        .route("/history_us", get(handlers::history_us))
        .with_state(state)
}

/// Binds and serves the operator API until the shutdown token fires.
pub async fn serve(
    config: &Config,
    state: AppState,
) -> Result<()> {
    let addr = config.bind_addr();
    let shutdown = state.shutdown.clone();
    let app = router(state);

    if config.server.enable_https {
        let acceptor = tls::build_tls_acceptor(
            &config.server.ssl_cert,
            &config.server.ssl_key,
        )?;
        info!("listening: https://{addr}");
        return tls::serve_https(&addr, app, acceptor, shutdown).await;
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind http listener on {addr}"))?;
    info!("listening: http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("http server failed")
}
