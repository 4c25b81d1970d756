//! Typed client for the ledger node REST API and the external signing service.
//!
//! The node exposes the application's key/value namespace, account balances and
//! the status of submitted transactions. Keys and values travel hex encoded.
//! Submissions are never signed here: they are handed to the signing service,
//! which signs with the requested identity, broadcasts and returns the
//! transaction id.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::http_client::HttpClient;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateEntry {
    /// Hex encoded key bytes
    pub key: String,
    /// Hex encoded value bytes
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplicationState {
    #[serde(rename = "app-id")]
    pub app_id: u64,
    #[serde(default)]
    pub entries: Vec<StateEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    /// Balance in micro-units
    pub amount: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PendingTransaction {
    #[serde(rename = "confirmed-round", default)]
    pub confirmed_round: Option<u64>,
    /// Non-empty when the node dropped the transaction from its pool
    #[serde(rename = "pool-error", default)]
    pub pool_error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(rename = "last-round")]
    pub last_round: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastResponse {
    #[serde(rename = "txId")]
    pub tx_id: String,
}

pub struct NodeClient {
    http: HttpClient,
}

impl NodeClient {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
        })
    }

    fn node_url(&self, path: &str) -> String {
        format!("{}{}", self.http.config().node_url, path)
    }

    async fn node_get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.node_url(path);
        debug!("GET {}", url);
        self.http.get_json(&url).await
    }

    pub async fn application_state(&self, app_id: u64) -> Result<ApplicationState> {
        self.node_get(&format!("/v2/applications/{}/state", app_id))
            .await
    }

    pub async fn account(&self, address: &str) -> Result<AccountInfo> {
        self.node_get(&format!("/v2/accounts/{}", address)).await
    }

    pub async fn pending_transaction(&self, tx_id: &str) -> Result<PendingTransaction> {
        self.node_get(&format!("/v2/transactions/pending/{}", tx_id))
            .await
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        self.node_get("/v2/status").await
    }

    /// Hand a submission to the signing service; returns the assigned transaction id.
    pub async fn broadcast<T: Serialize>(&self, submission: &T) -> Result<BroadcastResponse> {
        let url = format!("{}/v1/submit", self.http.config().signer_url);
        debug!("POST {}", url);
        self.http.post_json(&url, submission).await
    }
}
