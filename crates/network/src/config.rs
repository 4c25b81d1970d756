pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1:4001";
pub const DEFAULT_SIGNER_URL: &str = "http://127.0.0.1:7070";

/// Header carrying the node API token, when the node requires one.
pub const API_TOKEN_HEADER: &str = "X-Ledger-API-Token";

#[derive(Clone, Debug)]
pub struct Config {
    pub node_url: String,
    pub signer_url: String,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_url: DEFAULT_NODE_URL.to_string(),
            signer_url: DEFAULT_SIGNER_URL.to_string(),
            api_token: None,
            timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn with_node_url(mut self, url: &str) -> Self {
        self.node_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_signer_url(mut self, url: &str) -> Self {
        self.signer_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_token(mut self, token: &str) -> Self {
        self.api_token = Some(token.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}
