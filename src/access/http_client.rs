//! Remote allowlist over HTTP
//!
//! Speaks the allowlist REST API served by [`crate::api::allowlist_router`].

use super::{AccessError, AllowlistStore, LoginRequest, NewUser};
use crate::db::User;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error body returned by the allowlist API
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

pub struct HttpAllowlistClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAllowlistClient {
    pub fn new(base_url: &str) -> Result<Self, AccessError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AccessError::Store(format!("invalid allowlist URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(AccessError::Store(format!(
                "invalid allowlist URL {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AccessError::Store(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Turn a non-success response into an error
    async fn error_from(response: reqwest::Response) -> AccessError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let message = parsed
            .as_ref()
            .map_or_else(|| body.clone(), |b| b.message.clone());
        let code = parsed.and_then(|b| b.code);

        match (status, code.as_deref()) {
            (StatusCode::BAD_REQUEST, _) => AccessError::MissingId,
            (StatusCode::FORBIDDEN, _) => AccessError::AccessDenied(message),
            (_, Some("duplicate_user")) => AccessError::DuplicateUser(message),
            _ => AccessError::Store(format!("HTTP {status}: {message}")),
        }
    }
}

fn transport(e: &reqwest::Error) -> AccessError {
    AccessError::Store(format!("allowlist service unreachable: {e}"))
}

#[async_trait]
impl AllowlistStore for HttpAllowlistClient {
    async fn login(&self, id: &str, name: Option<&str>) -> Result<User, AccessError> {
        let body = LoginRequest {
            id: id.to_string(),
            name: name.map(String::from),
        };
        let response = self
            .client
            .post(self.url(&["api", "login"]))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response.json().await.map_err(|e| transport(&e))
    }

    async fn list_users(&self) -> Result<Vec<User>, AccessError> {
        let response = self
            .client
            .get(self.url(&["api", "users"]))
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response.json().await.map_err(|e| transport(&e))
    }

    async fn add_user(&self, user: &NewUser) -> Result<User, AccessError> {
        let response = self
            .client
            .post(self.url(&["api", "users"]))
            .json(user)
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response.json().await.map_err(|e| transport(&e))
    }

    async fn remove_user(&self, id: &str) -> Result<(), AccessError> {
        let response = self
            .client
            .delete(self.url(&["api", "users", id]))
            .send()
            .await
            .map_err(|e| transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(())
    }
}
