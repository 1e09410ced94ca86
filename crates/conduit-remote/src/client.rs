use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::{config::RemoteConfig, types::RemoteStatus};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    batch::StatusBatch,
    error::{RemoteError, Result},
};

/// An execution request as the remote system reports it.
///
/// Every field is optional on the wire; the reconciler decides what a
/// usable record needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteExecutionRecord {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub connector_name: Option<String>,
    #[serde(default)]
    pub query_name: Option<String>,
    #[serde(default)]
    pub execution_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl RemoteExecutionRecord {
    /// Queued, or not yet given a status at all.
    pub fn is_pending_remotely(&self) -> bool {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(s) => s.parse::<RemoteStatus>() == Ok(RemoteStatus::Queued),
        }
    }
}

/// The remote authority that issues execution requests and receives their
/// outcomes.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Executions for `connector` whose status is queued or unset.
    async fn list_pending(&self, connector: &str) -> Result<Vec<RemoteExecutionRecord>>;

    /// Deliver a whole batch in one call. Either all rows land or none do.
    async fn upload_status(&self, connector: &str, batch: &StatusBatch) -> Result<()>;
}

pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpRemoteClient {
    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| RemoteError::Parse(format!("invalid base_url '{}': {e}", cfg.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Parse(format!(
                "base_url '{}' cannot carry a path",
                cfg.base_url
            )));
        }
        Ok(Self {
            client,
            base_url,
            api_token: cfg.api_token.clone(),
        })
    }

    /// `<base>/connectors/<connector>/executions[/<tail>..]`, each segment
    /// percent-encoded.
    fn executions_url(&self, connector: &str, tail: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Parse(format!("base_url '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["connectors", connector, "executions"])
            .extend(tail);
        Ok(url)
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, "remote API error");
        Err(RemoteError::Api {
            status,
            message: text,
        })
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn list_pending(&self, connector: &str) -> Result<Vec<RemoteExecutionRecord>> {
        let url = self.executions_url(connector, &[])?;
        debug!(%url, "fetching pending remote executions");
        let builder = self.client.get(url).query(&[("status", "queued")]);
        let resp = Self::check(self.apply_auth(builder).send().await?).await?;
        let records: Vec<RemoteExecutionRecord> = resp
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        Ok(records
            .into_iter()
            .filter(RemoteExecutionRecord::is_pending_remotely)
            .collect())
    }

    async fn upload_status(&self, connector: &str, batch: &StatusBatch) -> Result<()> {
        let url = self.executions_url(connector, &["status"])?;
        debug!(%url, rows = batch.len(), "uploading status batch");
        let builder = self.client.post(url).json(batch);
        Self::check(self.apply_auth(builder).send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_or_missing_status_counts_as_pending() {
        let records: Vec<RemoteExecutionRecord> = serde_json::from_str(
            r#"[
                {"guid": "a", "query_name": "ledger", "status": "queued"},
                {"guid": "b", "query_name": "ledger"},
                {"guid": "c", "query_name": "ledger", "status": "ACCEPTED"},
                {"query_name": "ledger", "status": ""}
            ]"#,
        )
        .unwrap();
        let pending: Vec<_> = records
            .iter()
            .filter(|r| r.is_pending_remotely())
            .map(|r| r.guid.as_deref())
            .collect();
        assert_eq!(pending, vec![Some("a"), Some("b"), None]);
    }

    fn client_for(base_url: &str) -> Result<HttpRemoteClient> {
        HttpRemoteClient::new(&RemoteConfig {
            connector_name: "plant-7".into(),
            base_url: base_url.into(),
            api_token: None,
            executor_plugin: "file-sync".into(),
            poll_interval_secs: 300,
            request_timeout_secs: 5,
        })
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        for base in ["https://remote.example/api/", "https://remote.example/api"] {
            let client = client_for(base).unwrap();
            assert_eq!(
                client.executions_url("plant-7", &[]).unwrap().as_str(),
                "https://remote.example/api/connectors/plant-7/executions"
            );
        }
        let client = client_for("https://remote.example").unwrap();
        assert_eq!(
            client.executions_url("plant-7", &["status"]).unwrap().as_str(),
            "https://remote.example/connectors/plant-7/executions/status"
        );
    }

    #[test]
    fn connector_name_is_encoded_as_one_segment() {
        let client = client_for("https://remote.example/api/").unwrap();
        assert_eq!(
            client.executions_url("plant 7/b?x", &["status"]).unwrap().as_str(),
            "https://remote.example/api/connectors/plant%207%2Fb%3Fx/executions/status"
        );
    }

    #[test]
    fn unusable_base_url_is_rejected() {
        assert!(matches!(client_for("not a url"), Err(RemoteError::Parse(_))));
        assert!(matches!(client_for("mailto:ops@example.com"), Err(RemoteError::Parse(_))));
    }
}
