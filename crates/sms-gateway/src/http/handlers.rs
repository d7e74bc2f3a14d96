use axum::Form;
use axum::extract::{Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use sms_proto::{Msg, Sms, Tag};

use crate::app::AppState;

use super::pages;
use super::response::{api_ok, invalid_input, not_authorized};

const DEFAULT_KEY_LENGTH: usize = 8;
const DEFAULT_KEY_CHARSET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

#[derive(Debug, Default, Deserialize)]
pub struct SendParams {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RandomKeyParams {
    pub length: Option<usize>,
    pub range: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct KeyParam {
    #[serde(default)]
    pub key: String,
}

pub async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Html<String> {
    if state.sessions.verify(&headers) {
        Html(pages::index_page(&state.config.brand_name))
    } else {
        Html(pages::login_page(&state.config.brand_name))
    }
}

pub async fn login_form(State(state): State<AppState>) -> Html<String> {
    Html(pages::login_page(&state.config.brand_name))
}

pub async fn login_submit(
    State(state): State<AppState>,
    Form(params): Form<LoginParams>,
) -> Response {
    let security = &state.config.security;
    if params.username != security.username
        || params.password != security.password
    {
        info!("login failed: username={}", params.username);
        return Redirect::to("/login").into_response();
    }

    info!("login successful: username={}", params.username);
    let mut response = Redirect::to("/").into_response();
    match state.sessions.issue().parse() {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        Err(err) => warn!("failed to build session cookie: error={err}"),
    }
    response
}

pub async fn send_sms_cn_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SendParams>,
) -> Response {
    send_sms_get(state, headers, params, "cn", "/send_sms_cn").await
}

pub async fn send_sms_cn_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<SendParams>,
) -> Response {
    submit_send(&state, &headers, params, "cn").await
}

pub async fn send_sms_us_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SendParams>,
) -> Response {
    send_sms_get(state, headers, params, "us", "/send_sms_us").await
}

pub async fn send_sms_us_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<SendParams>,
) -> Response {
    submit_send(&state, &headers, params, "us").await
}

/// GET on a send endpoint doubles as the operator form when no access key
/// is supplied; with a key it behaves like the API call.
async fn send_sms_get(
    state: AppState,
    headers: HeaderMap,
    params: SendParams,
    region: &str,
    action: &str,
) -> Response {
    if params.key.is_empty() {
        if state.sessions.verify(&headers) {
            return Html(pages::send_form_page(
                &state.config.brand_name,
                action,
            ))
            .into_response();
        }
        return Html(pages::login_page(&state.config.brand_name))
            .into_response();
    }
    submit_send(&state, &headers, params, region).await
}

async fn submit_send(
    state: &AppState,
    headers: &HeaderMap,
    params: SendParams,
    region: &str,
) -> Response {
    let authorized = params.key == state.config.security.access_key
        || state.sessions.verify(headers);
    if !authorized {
        return not_authorized("invalid access key");
    }

    let phone = params.phone.trim();
    let sender = params.sender.trim();
    if phone.is_empty() {
        return invalid_input("invalid phone number");
    }
    if params.message.is_empty() {
        return invalid_input("invalid message");
    }
    if sender.is_empty() {
        return invalid_input("invalid sender");
    }

    let msgs =
        Msg::batch(Tag::SmsSend, Sms::split_long(phone, &params.message));
    debug!(
        "send request: region={}, sender={}, segments={}",
        region,
        sender,
        msgs.len()
    );

    // Delivery is fire-and-forget from here; a missing or stopped device
    // is an operator problem surfaced in the logs, not a caller error.
    if let Err(err) = state.manager.route(region, sender, msgs) {
        warn!("send routing failed: region={}, error={}", region, err);
    }

    api_ok(Value::Null)
}

pub async fn history_cn(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    history_region(state, headers, "CN").await
}

pub async fn history_us(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    history_region(state, headers, "US").await
}

async fn history_region(
    state: AppState,
    headers: HeaderMap,
    region: &str,
) -> Response {
    if !state.sessions.verify(&headers) {
        return Html(pages::login_page(&state.config.brand_name))
            .into_response();
    }

    match state.history.get_all(region, true).await {
        Ok(records) => {
            Html(pages::history_page(region, &records)).into_response()
        }
        Err(err) => {
            warn!("history query failed: region={}, error={}", region, err);
            (StatusCode::INTERNAL_SERVER_ERROR, "history unavailable")
                .into_response()
        }
    }
}

pub async fn random_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RandomKeyParams>,
) -> Response {
    if !state.sessions.verify(&headers) {
        return Html(pages::login_page(&state.config.brand_name))
            .into_response();
    }

    let charset: Vec<char> = params
        .range
        .as_deref()
        .filter(|range| !range.is_empty())
        .unwrap_or(DEFAULT_KEY_CHARSET)
        .chars()
        .collect();
    let length = params.length.unwrap_or(DEFAULT_KEY_LENGTH);

    let mut rng = rand::thread_rng();
    let key: String = (0..length)
        .map(|_| charset[rng.gen_range(0..charset.len())])
        .collect();
    key.into_response()
}

pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<KeyParam>,
) -> Response {
    let authorized = params.key == state.config.security.access_key
        || state.sessions.verify(&headers);
    if !authorized {
        return not_authorized("invalid access key");
    }
    api_ok(json!(state.manager.status_all()))
}

pub async fn help(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if !state.sessions.verify(&headers) {
        return Html(pages::login_page(&state.config.brand_name))
            .into_response();
    }
    pages::help_text().into_response()
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::app::AppState;
    use crate::config::Config;
    use crate::core::{DeviceManager, History};
    use crate::http::SessionStore;

    const TEST_CONFIG: &str = r#"
[database]
path = "history.db"

[security]
username = "admin"
password = "secret"
access_key = "k3y"
"#;

    async fn test_state() -> AppState {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(TEST_CONFIG.as_bytes()).expect("write config");
        let config = Arc::new(Config::load(file.path()).expect("load config"));

        let history = Arc::new(History::open_in_memory().await);
        let manager = Arc::new(
            DeviceManager::new(
                &[],
                history.clone(),
                config.webhook.clone(),
                config.continue_on_start_failure,
            )
            .expect("manager"),
        );

        AppState {
            sessions: Arc::new(SessionStore::new(config.session.clone())),
            config,
            manager,
            history,
            shutdown: CancellationToken::new(),
        }
    }

    async fn test_app() -> Router {
        crate::http::router(test_state().await)
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("read body");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        serde_json::from_str(&body_string(response).await).expect("json body")
    }

    fn form_post(
        uri: &str,
        body: &str,
    ) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn login_cookie(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(form_post("/login", "username=admin&password=secret"))
            .await
            .expect("login");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("set-cookie")
            .to_str()
            .expect("cookie str")
            .to_string();
        cookie.split_once(';').map(|(kv, _)| kv.to_string()).expect("kv")
    }

    #[tokio::test]
    async fn send_with_access_key_returns_ok_envelope() {
        let app = test_app().await;
        let response = app
            .oneshot(form_post(
                "/send_sms_cn",
                "key=k3y&sender=alice&phone=13800000000&message=test",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], 0);
    }

    #[tokio::test]
    async fn send_with_wrong_key_is_unauthorized() {
        let app = test_app().await;
        let response = app
            .oneshot(form_post(
                "/send_sms_cn",
                "key=wrong&sender=alice&phone=13800000000&message=test",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], 2);
    }

    #[tokio::test]
    async fn send_without_phone_is_invalid_input() {
        let app = test_app().await;
        let response = app
            .oneshot(form_post(
                "/send_sms_us",
                "key=k3y&sender=alice&message=test",
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], 1);
        assert_eq!(body["msg"], "invalid phone number");
    }

    #[tokio::test]
    async fn generic_send_alias_accepts_key_via_get() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/send_sms?key=k3y&sender=alice&phone=13800000000&message=test")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], 0);
    }

    #[tokio::test]
    async fn history_without_session_shows_login_page() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/history_cn")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("action=\"/login\""));
    }

    #[tokio::test]
    async fn login_grants_access_to_history() {
        let app = test_app().await;
        let cookie = login_cookie(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/history_cn")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("<table"));
    }

    #[tokio::test]
    async fn wrong_password_sets_no_cookie() {
        let app = test_app().await;
        let response = app
            .oneshot(form_post("/login", "username=admin&password=nope"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn random_key_respects_length_and_charset() {
        let app = test_app().await;
        let cookie = login_cookie(&app).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/random_key?length=16&range=ab")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert_eq!(body.len(), 16);
        assert!(body.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[tokio::test]
    async fn status_reports_devices_with_key_auth() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/status?key=k3y")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], 0);
        assert!(body["data"].as_object().expect("map").is_empty());
    }

    #[tokio::test]
    async fn index_without_session_shows_login() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        let body = body_string(response).await;
        assert!(body.contains("action=\"/login\""));
    }
}
