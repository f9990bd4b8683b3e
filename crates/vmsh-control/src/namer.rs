use crate::gateway::{endpoint, parse_base_url};
use crate::{REQUEST_TIMEOUT, RemoteError};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

const RESULT_OK: &str = "OK";

/// Allocates, locks and frees pool name prefixes.
#[async_trait]
pub trait PrefixNamer: Send + Sync {
    /// Next free prefix, or `None` when the service has none to give.
    async fn next_prefix(&self) -> Result<Option<String>, RemoteError>;

    async fn lock_prefix(&self, prefix: &str) -> Result<(), RemoteError>;

    async fn unlock_prefix(&self, prefix: &str) -> Result<bool, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct PrefixItem {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PrefixReply {
    result: String,
    #[serde(default)]
    detail: Option<PrefixItem>,
}

#[derive(Debug, Deserialize)]
struct UnlockReply {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpNamer {
    client: reqwest::Client,
    api_url: Url,
}

impl HttpNamer {
    /// # Errors
    /// Returns `RemoteError::Transport` if `api_url` is not a usable URL or the
    /// HTTP client cannot be constructed.
    pub fn new(api_url: impl AsRef<str>) -> Result<Self, RemoteError> {
        let api_url = parse_base_url(api_url.as_ref())?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, api_url })
    }

    fn check(response: &reqwest::Response) -> Result<(), RemoteError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Rejected {
                status: status.as_u16(),
                body: status.canonical_reason().unwrap_or_default().to_string(),
            })
        }
    }
}

#[async_trait]
impl PrefixNamer for HttpNamer {
    async fn next_prefix(&self) -> Result<Option<String>, RemoteError> {
        let response = self
            .client
            .post(endpoint(&self.api_url, &["next"]))
            .send()
            .await?;
        Self::check(&response)?;
        let reply: PrefixReply = response.json().await?;
        debug!(result = %reply.result, "Prefix requested");
        if reply.result == RESULT_OK {
            Ok(reply.detail.map(|item| item.name))
        } else {
            Ok(None)
        }
    }

    async fn lock_prefix(&self, prefix: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(endpoint(&self.api_url, &["lock", prefix]))
            .send()
            .await?;
        Self::check(&response)
    }

    async fn unlock_prefix(&self, prefix: &str) -> Result<bool, RemoteError> {
        let response = self
            .client
            .put(endpoint(&self.api_url, &["unlock", prefix]))
            .send()
            .await?;
        Self::check(&response)?;
        let reply: UnlockReply = response.json().await?;
        Ok(reply.result.as_deref() == Some(RESULT_OK))
    }
}
