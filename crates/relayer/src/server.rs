use algocash_sdk::{
    Amount, CustodialPayout, HttpLedger, LedgerGateway, LiquidityPool, MemoryLedger,
    MemoryLedgerConfig, Outstanding, PayoutSource, PoolStatus, SignerLanes, VoucherStore,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::{LedgerBackend, PayoutMode, RelayerConfig};
use crate::error::{RelayerError, Result};

pub struct RelayerState {
    pub config: RelayerConfig,
    pub ledger: Arc<dyn LedgerGateway>,
    pub pool: Arc<LiquidityPool>,
    pub store: Arc<VoucherStore>,
}

impl RelayerState {
    pub async fn new(config: RelayerConfig) -> anyhow::Result<Self> {
        let ledger: Arc<dyn LedgerGateway> = match config.backend {
            LedgerBackend::Memory => {
                let ledger = MemoryLedger::new(MemoryLedgerConfig {
                    conditional_writes: config.conditional_writes,
                    ..MemoryLedgerConfig::default()
                });
                ledger
                    .fund(&config.custodial_address, config.memory_seed_balance)
                    .await;
                info!(
                    "Using in-memory ledger, {} seeded with {}",
                    config.custodial_address, config.memory_seed_balance
                );
                Arc::new(ledger)
            }
            LedgerBackend::Http => {
                let client = algocash_net::NodeClient::new(config.net_config())?;
                info!(
                    "Using ledger node {} (app {}), signer {}",
                    config.node_url, config.app_id, config.signer_url
                );
                Arc::new(
                    HttpLedger::new(client, config.app_id)
                        .with_conditional_writes(config.conditional_writes)
                        .with_confirmation_rounds(config.confirmation_rounds),
                )
            }
        };

        Ok(Self::with_ledger(config, ledger))
    }

    pub fn with_ledger(config: RelayerConfig, ledger: Arc<dyn LedgerGateway>) -> Self {
        let lanes = Arc::new(SignerLanes::new());
        let pool = Arc::new(LiquidityPool::new(
            config.pool_config(),
            ledger.clone(),
            lanes.clone(),
        ));

        let funding: Arc<dyn PayoutSource> = match config.payout_mode {
            PayoutMode::Pool => pool.clone(),
            PayoutMode::Custodial => Arc::new(
                CustodialPayout::new(config.custodial_address.as_str(), ledger.clone(), lanes.clone())
                    .with_reserve(config.pool_reserve),
            ),
        };

        let store = Arc::new(VoucherStore::new(
            config.store_config(),
            ledger.clone(),
            funding,
            lanes,
        ));

        Self {
            config,
            ledger,
            pool,
            store,
        }
    }
}

pub fn routes(state: Arc<RelayerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(get_info))
        .route("/notes", post(mint_note).get(list_notes))
        .route("/notes/:code", get(verify_note))
        .route("/notes/:code/redeem", post(redeem_note))
        .route("/redemptions", get(get_history))
        .route("/redemptions/pending", get(get_pending))
        .route("/redemptions/:code/resume", post(resume_redemption))
        .route("/pool", get(get_pool))
        .route("/pool/replenish", post(replenish_pool))
        .with_state(state)
}

pub async fn run(state: Arc<RelayerState>) -> anyhow::Result<()> {
    // 10 requests per second per IP
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(10)
        .burst_size(20)
        .key_extractor(tower_governor::key_extractor::SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?;

    let app = routes(state.clone())
        .layer(GovernorLayer {
            config: Arc::new(governor_conf),
        })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Relayer listening on {} (rate limited: 10 req/s per IP)", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct InfoResponse {
    /// Allowed denominations, e.g. "1,2,5,10" or "0.1..0.9"
    denominations: String,
    custodial_address: String,
    pool_address: String,
    payout_address: String,
    conditional_writes: bool,
}

#[derive(Deserialize)]
struct MintRequest {
    /// Base-currency units, e.g. 5 or 0.5
    amount: f64,
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    include_spent: bool,
}

#[derive(Deserialize)]
struct RedeemRequest {
    destination: String,
}

#[derive(Serialize)]
struct PoolResponse {
    #[serde(flatten)]
    status: PoolStatus,
    outstanding: Outstanding,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_info(State(state): State<Arc<RelayerState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        denominations: state.config.denominations.to_string(),
        custodial_address: state.config.custodial_address.clone(),
        pool_address: state.config.pool_address.clone(),
        payout_address: state.store.payout_address().to_string(),
        conditional_writes: state.ledger.supports_conditional_writes(),
    })
}

async fn mint_note(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<MintRequest>,
) -> Result<Json<ApiResponse<algocash_sdk::MintReceipt>>> {
    let amount = Amount::from_units_f64(req.amount)?;
    let receipt = state.store.mint(amount).await?;
    Ok(ok(receipt))
}

async fn list_notes(
    State(state): State<Arc<RelayerState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<algocash_sdk::Voucher>>>> {
    Ok(ok(state.store.list_all(query.include_spent).await?))
}

async fn verify_note(
    State(state): State<Arc<RelayerState>>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<algocash_sdk::Verification>>> {
    Ok(ok(state.store.verify(&code).await?))
}

async fn redeem_note(
    State(state): State<Arc<RelayerState>>,
    Path(code): Path<String>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<ApiResponse<algocash_sdk::Redemption>>> {
    let destination = req.destination.trim();
    if destination.is_empty() {
        return Err(RelayerError::InvalidRequest("destination is required".into()));
    }
    Ok(ok(state.store.redeem(&code, destination).await?))
}

async fn get_history(
    State(state): State<Arc<RelayerState>>,
) -> Result<Json<ApiResponse<Vec<algocash_sdk::RedemptionRecord>>>> {
    Ok(ok(state.store.history().await?))
}

async fn get_pending(
    State(state): State<Arc<RelayerState>>,
) -> Result<Json<ApiResponse<Vec<algocash_sdk::PendingRedemption>>>> {
    Ok(ok(state.store.pending_redemptions().await?))
}

async fn resume_redemption(
    State(state): State<Arc<RelayerState>>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<algocash_sdk::Redemption>>> {
    Ok(ok(state.store.resume(&code).await?))
}

async fn get_pool(State(state): State<Arc<RelayerState>>) -> Result<Json<ApiResponse<PoolResponse>>> {
    let status = state.pool.status().await?;
    let outstanding = state.store.outstanding().await?;
    Ok(ok(PoolResponse {
        status,
        outstanding,
    }))
}

async fn replenish_pool(
    State(state): State<Arc<RelayerState>>,
) -> Result<Json<ApiResponse<algocash_sdk::ReplenishOutcome>>> {
    Ok(ok(state.pool.replenish_if_needed().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn test_state() -> (Arc<MemoryLedger>, Arc<RelayerState>) {
        let config = RelayerConfig::from_lookup(|_| None).unwrap();
        let ledger = Arc::new(MemoryLedger::default());
        ledger
            .fund(&config.custodial_address, Amount::from_units(100))
            .await;
        ledger.fund(&config.pool_address, Amount::from_units(20)).await;
        let state = Arc::new(RelayerState::with_ledger(config, ledger.clone()));
        (ledger, state)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_mint_verify_redeem_over_http() {
        let (ledger, state) = test_state().await;
        let app = routes(state);
        let destination = algocash_sdk::encode_address(&[4u8; 32]);

        let (status, minted) = call(&app, "POST", "/notes", Some(serde_json::json!({"amount": 5}))).await;
        assert_eq!(status, StatusCode::OK);
        let code = minted["data"]["code"].as_str().unwrap().to_string();
        assert_eq!(minted["data"]["amount"], 5);

        let (_, verified) = call(&app, "GET", &format!("/notes/{}", code), None).await;
        assert_eq!(verified["data"]["valid"], true);
        assert_eq!(verified["data"]["amount"], 5);

        let (status, redeemed) = call(
            &app,
            "POST",
            &format!("/notes/{}/redeem", code),
            Some(serde_json::json!({ "destination": destination })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(redeemed["data"]["amount"], 5);
        assert_eq!(ledger.balance(&destination).await.unwrap(), Amount::from_units(5));

        let (status, again) = call(
            &app,
            "POST",
            &format!("/notes/{}/redeem", code),
            Some(serde_json::json!({ "destination": destination })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(again["success"], false);

        let (_, history) = call(&app, "GET", "/redemptions", None).await;
        assert_eq!(history["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_http_errors() {
        let (_ledger, state) = test_state().await;
        let app = routes(state);

        let (status, body) = call(&app, "GET", "/notes/NOPE", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["reason"], "not found");

        let (status, _) = call(&app, "POST", "/notes", Some(serde_json::json!({"amount": -1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "POST", "/notes", Some(serde_json::json!({"amount": 3}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            "POST",
            "/notes/ABCDEFGHIJKL/redeem",
            Some(serde_json::json!({"destination": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "POST", "/redemptions/ABCDEFGHIJKL/resume", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_pool_endpoints() {
        let (_ledger, state) = test_state().await;
        let app = routes(state);

        let (status, pool) = call(&app, "GET", "/pool", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pool["data"]["balance"], 20);
        assert_eq!(pool["data"]["low"], false);
        assert_eq!(pool["data"]["outstanding"]["count"], 0);

        let (_, outcome) = call(&app, "POST", "/pool/replenish", None).await;
        assert_eq!(outcome["data"]["outcome"], "above_threshold");

        let (_, info) = call(&app, "GET", "/info", None).await;
        assert_eq!(info["denominations"], "1,2,5,10");
        assert_eq!(info["payout_address"], "POOL");
    }
}
