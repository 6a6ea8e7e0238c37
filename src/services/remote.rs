//! HTTP access to buildbot and the dashboard.
//!
//! Both servers are reached through the [`RemoteApi`] trait so the sync
//! logic can run against an in-memory double in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::error::RemoteError;

/// HTTP connect timeout for every remote.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Authenticated JSON/form access to one HTTP server.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Absolute URL for a server-relative path.
    fn url(&self, path: &str) -> String;

    async fn get_json(&self, path: &str) -> Result<Value, RemoteError>;

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, RemoteError>;

    /// POST `application/x-www-form-urlencoded` data, ignoring the response body.
    async fn post_form(&self, path: &str, fields: &[(String, String)]) -> Result<(), RemoteError>;

    /// GET a dashboard API endpoint and require `"status": "OK"`.
    async fn get_json_with_status(&self, path: &str) -> Result<Value, RemoteError> {
        let content = self.get_json(path).await?;
        check_status(path, content)
    }

    /// POST to a dashboard API endpoint and require `"status": "OK"`.
    async fn post_json_with_status(&self, path: &str, body: &Value) -> Result<Value, RemoteError> {
        let content = self.post_json(path, body).await?;
        check_status(path, content)
    }
}

fn check_status(path: &str, content: Value) -> Result<Value, RemoteError> {
    match content.get("status").and_then(Value::as_str) {
        Some("OK") => Ok(content),
        Some(status) => Err(RemoteError::Status {
            path: path.to_string(),
            status: status.to_string(),
        }),
        None => Err(RemoteError::Status {
            path: path.to_string(),
            status: "missing".to_string(),
        }),
    }
}

/// HTTP basic auth credentials.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: SecretString,
}

/// reqwest-backed [`RemoteApi`].
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    auth: Option<BasicAuth>,
    http_client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(
        base_url: &str,
        auth: Option<BasicAuth>,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| RemoteError::Transport {
                url: base_url.clone(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            base_url,
            auth,
            http_client,
        })
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some(ref auth) => {
                builder.basic_auth(&auth.username, Some(auth.password.expose_secret()))
            }
            None => builder,
        }
    }

    async fn send(
        &self,
        url: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = self
            .with_auth(builder)
            .send()
            .await
            .map_err(|e| RemoteError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn read_json(url: &str, response: reqwest::Response) -> Result<Value, RemoteError> {
        response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::InvalidJson {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, RemoteError> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self.send(&url, self.http_client.get(&url)).await?;
        Self::read_json(&url, response).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, RemoteError> {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self
            .send(&url, self.http_client.post(&url).json(body))
            .await?;
        Self::read_json(&url, response).await
    }

    async fn post_form(&self, path: &str, fields: &[(String, String)]) -> Result<(), RemoteError> {
        let url = self.url(path);
        debug!("POST {} ({} fields)", url, fields.len());
        let body = encode_form(fields);
        self.send(
            &url,
            self.http_client
                .post(&url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body),
        )
        .await?;
        Ok(())
    }
}

/// Encode fields as an `application/x-www-form-urlencoded` body.
pub fn encode_form(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
