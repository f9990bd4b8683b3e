use crate::RemoteError;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use vmsh_core::{Pool, TaskStatus};

/// Per-request timeout for every call to the provisioning service.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

const STATUS_OK: &str = "OK";

/// Asynchronous transitions submitted with the full pool payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolAction {
    Plan,
    Apply,
    Destroy,
}

impl PoolAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PoolAction::Plan => "plan",
            PoolAction::Apply => "apply",
            PoolAction::Destroy => "destroy",
        }
    }
}

impl fmt::Display for PoolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoginReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Request/response contract of the provisioning service.
#[async_trait]
pub trait PoolGateway: Send + Sync {
    async fn login(&self, username: &str) -> Result<LoginReply, RemoteError>;

    async fn create_pool(
        &self,
        owner: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Pool, RemoteError>;

    /// Pool name to id index.
    async fn list_pools(&self) -> Result<BTreeMap<String, String>, RemoteError>;

    async fn get_pool(&self, name: &str) -> Result<Pool, RemoteError>;

    async fn delete_pool(&self, id: &str) -> Result<(), RemoteError>;

    async fn submit(&self, action: PoolAction, pool: &Pool) -> Result<Pool, RemoteError>;

    /// Legacy per-task status endpoint. Polling goes through [`PoolGateway::get_pool`].
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, RemoteError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: Option<String>,
    data: Option<T>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

impl<T> Envelope<T> {
    fn is_ok(&self) -> bool {
        self.status.as_deref() == Some(STATUS_OK)
    }

    fn describe(&self) -> String {
        match (&self.status, &self.detail) {
            (Some(status), Some(detail)) => format!("{status}: {detail}"),
            (Some(status), None) => status.clone(),
            (None, Some(detail)) => detail.to_string(),
            (None, None) => "no status".to_string(),
        }
    }

    fn into_data(self) -> Result<T, RemoteError> {
        self.data
            .ok_or_else(|| RemoteError::Decode("response carries no data".into()))
    }
}

#[derive(Debug, Deserialize)]
struct PoolIndex {
    #[serde(default)]
    pools: BTreeMap<String, String>,
}

/// Parse a service root that path segments can be appended to.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, RemoteError> {
    let url = Url::parse(raw)
        .map_err(|e| RemoteError::Transport(format!("invalid URL '{raw}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(RemoteError::Transport(format!("'{raw}' cannot be a base URL")));
    }
    Ok(url)
}

/// `base` followed by `segments`, each percent-encoded as a single path segment.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// [`PoolGateway`] over HTTP with JSON bodies.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGateway {
    /// Build a gateway rooted at `base_url` (for example `http://host/vms/api/v1`).
    ///
    /// # Errors
    /// Returns `RemoteError::Transport` if `base_url` is not a usable URL or the
    /// HTTP client cannot be constructed.
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, RemoteError> {
        let base_url = parse_base_url(base_url.as_ref())?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, segments: &[&str]) -> Url {
        endpoint(&self.base_url, segments)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() >= 400 {
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PoolGateway for HttpGateway {
    async fn login(&self, username: &str) -> Result<LoginReply, RemoteError> {
        debug!("Login as {username}");
        let response = self
            .client
            .post(self.url(&["login"]))
            .query(&[("username", username)])
            .send()
            .await?;
        Self::read(response).await
    }

    async fn create_pool(
        &self,
        owner: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Pool, RemoteError> {
        let mut params = vec![("owner", owner)];
        if let Some(name) = name {
            params.push(("name", name));
        }
        if let Some(description) = description {
            params.push(("description", description));
        }

        debug!(?name, "Create pool");
        let response = self
            .client
            .post(self.url(&["pool"]))
            .query(&params)
            .send()
            .await?;
        let envelope: Envelope<Pool> = Self::read(response).await?;
        if envelope.status.is_some() && !envelope.is_ok() {
            return Err(RemoteError::Refused(envelope.describe()));
        }
        envelope.into_data()
    }

    async fn list_pools(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        let response = self.client.get(self.url(&["pool", "all"])).send().await?;
        let envelope: Envelope<PoolIndex> = Self::read(response).await?;
        Ok(envelope.into_data()?.pools)
    }

    async fn get_pool(&self, name: &str) -> Result<Pool, RemoteError> {
        let response = self
            .client
            .get(self.url(&["pool", name]))
            .send()
            .await?;
        let envelope: Envelope<Pool> = Self::read(response).await?;
        if !envelope.is_ok() {
            debug!("Pool {name} not found: {}", envelope.describe());
            return Err(RemoteError::NotFound(name.to_string()));
        }
        envelope.into_data()
    }

    async fn delete_pool(&self, id: &str) -> Result<(), RemoteError> {
        debug!("Delete pool {id}");
        let response = self
            .client
            .delete(self.url(&["pool", id]))
            .send()
            .await?;
        let envelope: Envelope<serde_json::Value> = Self::read(response).await?;
        if envelope.is_ok() {
            Ok(())
        } else {
            Err(RemoteError::Refused(envelope.describe()))
        }
    }

    async fn submit(&self, action: PoolAction, pool: &Pool) -> Result<Pool, RemoteError> {
        debug!(%action, pool = pool.display_name(), items = pool.items.len(), "Submit pool");
        let response = self
            .client
            .post(self.url(&["pool", action.as_str()]))
            .json(pool)
            .send()
            .await?;
        let envelope: Envelope<Pool> = Self::read(response).await?;
        if envelope.status.is_some() && !envelope.is_ok() {
            return Err(RemoteError::Refused(envelope.describe()));
        }
        envelope.into_data()
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, RemoteError> {
        let response = self
            .client
            .get(self.url(&["tasks", task_id]))
            .send()
            .await?;
        Self::read(response).await
    }
}
