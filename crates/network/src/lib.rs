//! HTTP clients for a ledger node REST API and for the external signing service
//! that signs and broadcasts submissions on the node's behalf.
//!
//! ```rust,no_run
//! use algocash_net::{Config, NodeClient};
//!
//! #[tokio::main]
//! async fn main() -> algocash_net::Result<()> {
//!     let config = Config::default().with_node_url("http://127.0.0.1:4001");
//!     let client = NodeClient::new(config)?;
//!
//!     let status = client.status().await?;
//!     println!("Node at round {}", status.last_round);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http_client;
pub mod node;

pub use config::{Config, DEFAULT_NODE_URL, DEFAULT_SIGNER_URL};
pub use error::{NetError, Result};
pub use http_client::HttpClient;
pub use node::{
    AccountInfo, ApplicationState, BroadcastResponse, NodeClient, NodeStatus, PendingTransaction,
    StateEntry,
};

pub fn node_client(node_url: &str, signer_url: &str) -> Result<NodeClient> {
    NodeClient::new(
        Config::default()
            .with_node_url(node_url)
            .with_signer_url(signer_url),
    )
}
