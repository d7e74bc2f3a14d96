use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;

pub const CODE_OK: i32 = 0;
pub const CODE_INVALID_INPUT: i32 = 1;
pub const CODE_NOT_AUTHORIZED: i32 = 2;

/// Uniform JSON envelope for the API endpoints.
#[derive(Debug, Serialize)]
pub struct ApiEnvelope {
    pub code: i32,
    pub msg: String,
    pub data: Value,
}

pub fn api_ok(data: Value) -> Response {
    (
        StatusCode::OK,
        Json(ApiEnvelope { code: CODE_OK, msg: "ok".to_string(), data }),
    )
        .into_response()
}

pub fn invalid_input(msg: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiEnvelope {
            code: CODE_INVALID_INPUT,
            msg: msg.into(),
            data: Value::Null,
        }),
    )
        .into_response()
}

pub fn not_authorized(msg: impl Into<String>) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiEnvelope {
            code: CODE_NOT_AUTHORIZED,
            msg: msg.into(),
            data: Value::Null,
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use super::{api_ok, invalid_input, not_authorized};

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("parse body")
    }

    #[tokio::test]
    async fn ok_envelope_carries_data() {
        let response = api_ok(json!({"x": 1}));
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["code"], 0);
        assert_eq!(body["msg"], "ok");
        assert_eq!(body["data"]["x"], 1);
    }

    #[tokio::test]
    async fn invalid_input_is_400_code_1() {
        let response = invalid_input("invalid phone number");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], 1);
        assert_eq!(body["msg"], "invalid phone number");
        assert_eq!(body["data"], Value::Null);
    }

    #[tokio::test]
    async fn not_authorized_is_401_code_2() {
        let response = not_authorized("invalid access key");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], 2);
    }
}
