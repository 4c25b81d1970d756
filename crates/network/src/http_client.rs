use std::time::Duration;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{Config, API_TOKEN_HEADER};
use crate::error::{NetError, Result};

pub struct HttpClient {
    client: Client,
    config: Config,
}

impl HttpClient {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NetError::Config(format!("Failed to build client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => builder.header(API_TOKEN_HEADER, token),
            None => builder,
        }
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| classify_send_error("GET", e))?;
        ensure_success(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        response
            .json()
            .await
            .map_err(|e| NetError::Decode(format!("JSON parse failed: {}", e)))
    }

    pub async fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<Response> {
        let response = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| classify_send_error("POST", e))?;
        ensure_success(response).await
    }

    pub async fn post_json<T: Serialize, R: DeserializeOwned>(&self, url: &str, body: &T) -> Result<R> {
        let response = self.post(url, body).await?;
        response
            .json()
            .await
            .map_err(|e| NetError::Decode(format!("JSON parse failed: {}", e)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn classify_send_error(method: &str, e: reqwest::Error) -> NetError {
    if e.is_connect() || e.is_timeout() {
        NetError::Connection(format!("{} request failed: {}", method, e))
    } else {
        NetError::Http(format!("{} request failed: {}", method, e))
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NetError::Status {
        status: status.as_u16(),
        body,
    })
}
