use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use uuid::Uuid;

use crate::config::SessionConfig;

/// In-memory session token store for the single operator account.
/// Sessions die with the process; the access key covers API callers.
pub struct SessionStore {
    config: SessionConfig,
    sessions: Mutex<HashMap<String, Instant>>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self { config, sessions: Mutex::new(HashMap::new()) }
    }

    /// Creates a session and returns the `Set-Cookie` header value.
    pub fn issue(&self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let max_age = self.config.max_age.max(1);
        let expires_at =
            Instant::now() + Duration::from_secs(max_age as u64);

        let mut sessions = self.sessions.lock().unwrap();
        let now = Instant::now();
        sessions.retain(|_, expiry| *expiry > now);
        sessions.insert(token.clone(), expires_at);

        let mut cookie = format!(
            "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
            self.config.name, token, self.config.path, max_age
        );
        if !self.config.domain.is_empty() {
            cookie.push_str("; Domain=");
            cookie.push_str(&self.config.domain);
        }
        cookie
    }

    /// True when the request carries a live session cookie.
    pub fn verify(
        &self,
        headers: &HeaderMap,
    ) -> bool {
        let Some(token) = self.extract_token(headers) else {
            return false;
        };

        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get(&token) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                sessions.remove(&token);
                false
            }
            None => false,
        }
    }

    fn extract_token(
        &self,
        headers: &HeaderMap,
    ) -> Option<String> {
        for value in headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            for pair in raw.split(';') {
                let pair = pair.trim();
                if let Some((name, token)) = pair.split_once('=') {
                    if name == self.config.name {
                        return Some(token.to_string());
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header::COOKIE};

    use crate::config::SessionConfig;

    use super::SessionStore;

    fn store() -> SessionStore {
        SessionStore::new(SessionConfig::default())
    }

    fn headers_with_cookie(raw: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(raw).expect("cookie"));
        headers
    }

    fn token_of(cookie: &str) -> String {
        cookie
            .split_once('=')
            .and_then(|(_, rest)| rest.split_once(';'))
            .map(|(token, _)| token.to_string())
            .expect("token")
    }

    #[test]
    fn issued_cookie_verifies() {
        let store = store();
        let cookie = store.issue();
        assert!(cookie.starts_with("sms_session="));
        assert!(cookie.contains("HttpOnly"));

        let headers = headers_with_cookie(&format!(
            "other=1; sms_session={}",
            token_of(&cookie)
        ));
        assert!(store.verify(&headers));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let store = store();
        store.issue();
        let headers = headers_with_cookie("sms_session=forged");
        assert!(!store.verify(&headers));
    }

    #[test]
    fn missing_cookie_is_rejected() {
        let store = store();
        assert!(!store.verify(&HeaderMap::new()));
    }

    #[test]
    fn expired_session_is_rejected() {
        let mut config = SessionConfig::default();
        config.max_age = 1;
        let store = SessionStore::new(config);
        let cookie = store.issue();
        let headers =
            headers_with_cookie(&format!("sms_session={}", token_of(&cookie)));

        assert!(store.verify(&headers));
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(!store.verify(&headers));
    }

    #[test]
    fn domain_attribute_is_optional() {
        let mut config = SessionConfig::default();
        config.domain = "sms.example.com".to_string();
        let store = SessionStore::new(config);
        assert!(store.issue().contains("Domain=sms.example.com"));
    }
}
