//! REST API server for chain5470
//!
//! HTTP endpoints for ledger queries, transaction submission, mining control
//! and network introspection. The API holds the same shared chain instance as
//! the gossip layer, so every surface observes one ledger.

use axum::{
    extract::{Path, Query, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::Blockchain;
use crate::crypto::{Address, KeyPair, Sha256Hash};
use crate::error::ChainError;
use crate::miner;
use crate::network::NetworkNode;
use crate::transaction::Transaction;

const DEFAULT_API_PORT: u16 = 8080;

/// Shared node handle behind the API: the chain, the gossip node, and the
/// mining controls.
#[derive(Clone)]
pub struct Node {
    pub blockchain: Arc<RwLock<Blockchain>>,
    pub network: Arc<NetworkNode>,
    pub state: Option<Arc<RwLock<crate::node::NodeState>>>,
    is_mining: Arc<AtomicBool>,
    /// Set to abandon the in-flight proof-of-work attempt.
    mining_cancel: Arc<AtomicBool>,
    blocks_mined: Arc<AtomicU64>,
    mining_task: Arc<RwLock<Option<JoinHandle<()>>>>,
    api_stats: Arc<RwLock<ApiStats>>,
}

#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    mining_starts: u64,
    mining_stops: u64,
    transactions_submitted: u64,
    start_time: Option<Instant>,
}

impl ApiStats {
    fn new() -> Self {
        ApiStats {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

impl Node {
    /// Create a standalone node instance with its own network handle.
    pub fn new(blockchain: Blockchain) -> Self {
        let blockchain = Arc::new(RwLock::new(blockchain));
        let network = Arc::new(NetworkNode::new(Arc::clone(&blockchain)));
        Self::new_shared(blockchain, network, None)
    }

    /// Create an API node sharing the chain and network of an orchestrator,
    /// so both services observe the same in-memory ledger and peer list.
    pub fn new_shared(
        blockchain: Arc<RwLock<Blockchain>>,
        network: Arc<NetworkNode>,
        state: Option<Arc<RwLock<crate::node::NodeState>>>,
    ) -> Self {
        Self {
            blockchain,
            network,
            state,
            is_mining: Arc::new(AtomicBool::new(false)),
            mining_cancel: Arc::new(AtomicBool::new(false)),
            blocks_mined: Arc::new(AtomicU64::new(0)),
            mining_task: Arc::new(RwLock::new(None)),
            api_stats: Arc::new(RwLock::new(ApiStats::new())),
        }
    }

    pub fn is_mining(&self) -> bool {
        self.is_mining.load(Ordering::Relaxed)
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }

    /// Mines one block on a blocking thread and commits it. The candidate is
    /// built from a snapshot; if the chain advances while the proof is being
    /// searched, validation rejects the stale block and the error surfaces.
    pub async fn mine_once(&self, beneficiary: Address) -> Result<u64, ApiError> {
        // A cancel request left over from an earlier stop must not abort this
        // fresh attempt.
        self.mining_cancel.store(false, Ordering::SeqCst);

        let (candidate, difficulty_bits) = {
            let mut chain = self.blockchain.write().await;
            let candidate = chain.build_candidate(beneficiary)?;
            (candidate, chain.params.difficulty_bits)
        };

        let cancel = Arc::clone(&self.mining_cancel);
        let mined = tokio::task::spawn_blocking(move || {
            miner::mine_block(candidate, difficulty_bits, &cancel)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("mining task panicked: {}", e)))??;

        let height = {
            let mut chain = self.blockchain.write().await;
            chain.apply_block(mined.clone())?;
            chain.height()
        };
        self.blocks_mined.fetch_add(1, Ordering::SeqCst);
        self.network.broadcast_block(mined).await;
        Ok(height)
    }

    /// Start the continuous mining loop.
    pub async fn start_mining(&self, beneficiary: Address) -> Result<(), ApiError> {
        if self
            .is_mining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ApiError::MiningAlreadyRunning);
        }
        self.mining_cancel.store(false, Ordering::SeqCst);

        {
            let mut stats = self.api_stats.write().await;
            stats.mining_starts += 1;
        }

        let node = self.clone();
        let task = tokio::spawn(async move {
            tracing::info!(beneficiary = %beneficiary, "mining started");

            while node.is_mining.load(Ordering::Relaxed) {
                match node.mine_once(beneficiary).await {
                    Ok(height) => {
                        tracing::info!(height, "mined block");
                    }
                    Err(ApiError::Chain(e)) if e.is_rejection() => {
                        // Stale candidate (a peer's block landed first) or a
                        // cancelled attempt; rebuild and continue.
                        tracing::debug!("mining attempt discarded: {}", e);
                    }
                    Err(e) => {
                        tracing::error!("mining error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            node.is_mining.store(false, Ordering::SeqCst);
            tracing::info!("mining stopped");
        });

        *self.mining_task.write().await = Some(task);
        Ok(())
    }

    /// Stop mining, abandoning the in-flight proof-of-work attempt.
    pub async fn stop_mining(&self) -> Result<(), ApiError> {
        if self
            .is_mining
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ApiError::MiningNotRunning);
        }
        self.mining_cancel.store(true, Ordering::SeqCst);

        {
            let mut stats = self.api_stats.write().await;
            stats.mining_stops += 1;
        }

        if let Some(task) = self.mining_task.write().await.take() {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !task.is_finished() {
                task.abort();
            }
        }
        Ok(())
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Chain(ChainError),
    InvalidInput(String),
    NotFound(String),
    MiningAlreadyRunning,
    MiningNotRunning,
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Chain(e) => e.fmt(f),
            ApiError::InvalidInput(msg) | ApiError::NotFound(msg) | ApiError::Internal(msg) => {
                f.write_str(msg)
            }
            ApiError::MiningAlreadyRunning => f.write_str("mining is already running"),
            ApiError::MiningNotRunning => f.write_str("mining is not running"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Chain(e) => match e {
                ChainError::Rejected(_) | ChainError::MempoolFull => StatusCode::BAD_REQUEST,
                ChainError::Collaborator(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MiningAlreadyRunning | ApiError::MiningNotRunning => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Chain(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
struct BalanceQuery {
    address: String,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
    pub nonce: u64,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub hash: String,
}

#[derive(Deserialize)]
pub struct MineRequest {
    pub beneficiary_address: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub height: u64,
    pub difficulty_bits: u32,
    pub mempool_size: usize,
    pub total_issued: u64,
    pub is_mining: bool,
    pub blocks_mined: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub transactions_submitted: u64,
    pub uptime_seconds: u64,
}

#[derive(Serialize)]
struct WalletResponse {
    address: String,
    public_key: String,
    private_key: String,
}

#[derive(Serialize)]
struct SuccessResponse {
    message: String,
}

fn parse_address(s: &str) -> Result<Address, ApiError> {
    Address::from_str(s).map_err(|e| ApiError::InvalidInput(format!("invalid address: {}", e)))
}

fn parse_hash(hash_str: &str) -> Result<Sha256Hash, ApiError> {
    let bytes = hex::decode(hash_str)
        .map_err(|e| ApiError::InvalidInput(format!("invalid hex hash: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| ApiError::InvalidInput("hash must be a 64-character hex string".to_string()))
}

// ============================================================================
// Middleware
// ============================================================================

async fn stats_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    let success = response.status().is_success();
    let mut stats = node.api_stats.write().await;
    stats.record_request(success);
    response
}

async fn logging_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let node_state = match &node.state {
        Some(s) => format!("{:?}", *s.read().await),
        None => "unknown".to_string(),
    };
    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        node_state = %node_state,
        "api.request"
    );
    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints (also used by tests).
pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        // Ledger endpoints
        .route("/chain", get(get_chain))
        .route("/chain/block/:index", get(get_block_by_index))
        .route("/balance", get(get_balance))
        // Transaction endpoints
        .route("/tx", post(submit_transaction))
        .route("/tx/:hash", get(get_transaction))
        .route("/mempool", get(get_mempool))
        // Mining endpoints
        .route("/mine", post(mine_block_once))
        .route("/mining/start", post(start_mining))
        .route("/mining/stop", post(stop_mining))
        .route("/mining/status", get(get_mining_status))
        // Network endpoints
        .route("/network/peers", get(get_peers))
        // Wallet endpoints
        .route("/wallet/create", post(create_wallet))
        // System endpoints
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(
            node.clone(),
            logging_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            node.clone(),
            stats_middleware,
        ))
        .with_state(node)
        .layer(cors)
}

pub async fn run_api_server(node: Arc<Node>, port: Option<u16>) -> Result<(), ChainError> {
    let app = build_api_router(node);
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(DEFAULT_API_PORT)));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ChainError::Network(format!("failed to bind api port: {}", e)))?;

    tracing::info!(%addr, "api server listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| ChainError::Network(format!("api server failed: {}", e)))?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Arc<Node>>) -> Response {
    let (healthy, node_state) = match &node.state {
        Some(s) => {
            let state = *s.read().await;
            (
                matches!(state, crate::node::NodeState::Ready),
                format!("{:?}", state),
            )
        }
        None => (true, "standalone".to_string()),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "node_state": node_state,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

async fn get_chain(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let chain = node.blockchain.read().await;
    Json(serde_json::json!({
        "height": chain.height(),
        "blocks": chain.blocks,
    }))
}

async fn get_block_by_index(
    State(node): State<Arc<Node>>,
    Path(index): Path<u64>,
) -> Result<Response, ApiError> {
    let chain = node.blockchain.read().await;
    let block = chain
        .blocks
        .get(index as usize)
        .ok_or_else(|| ApiError::NotFound(format!("block {} not found", index)))?;
    Ok(Json(block).into_response())
}

async fn get_balance(
    State(node): State<Arc<Node>>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let address = parse_address(&query.address)?;
    let chain = node.blockchain.read().await;
    Ok(Json(BalanceResponse {
        address: address.to_checksum_hex(),
        balance: chain.state.balance(&address),
        nonce: chain.state.next_nonce(&address),
    }))
}

async fn submit_transaction(
    State(node): State<Arc<Node>>,
    Json(tx): Json<Transaction>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let hash = {
        let mut chain = node.blockchain.write().await;
        chain.submit_transaction(tx.clone())?
    };

    {
        let mut stats = node.api_stats.write().await;
        stats.transactions_submitted += 1;
    }
    node.network.broadcast_transaction(tx).await;

    Ok(Json(SubmitResponse {
        hash: hex::encode(hash),
    }))
}

async fn get_transaction(
    State(node): State<Arc<Node>>,
    Path(hash_str): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = parse_hash(&hash_str)?;
    let chain = node.blockchain.read().await;

    for block in &chain.blocks {
        for tx in &block.transactions {
            if tx.hash() == target {
                return Ok(Json(serde_json::json!({
                    "transaction": tx,
                    "block_index": block.index,
                })));
            }
        }
    }
    if let Some(tx) = chain.mempool.get(&target) {
        return Ok(Json(serde_json::json!({
            "transaction": tx,
            "block_index": null,
        })));
    }
    Err(ApiError::NotFound(format!(
        "transaction {} not found",
        hash_str
    )))
}

async fn get_mempool(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let chain = node.blockchain.read().await;
    let transactions = chain.mempool.snapshot();
    Json(serde_json::json!({
        "count": transactions.len(),
        "transactions": transactions,
    }))
}

async fn mine_block_once(
    State(node): State<Arc<Node>>,
    Json(req): Json<MineRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let beneficiary = parse_address(&req.beneficiary_address)?;
    let height = node.mine_once(beneficiary).await?;
    Ok(Json(serde_json::json!({
        "message": "block mined",
        "height": height,
    })))
}

async fn start_mining(
    State(node): State<Arc<Node>>,
    Json(req): Json<MineRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let beneficiary = parse_address(&req.beneficiary_address)?;
    node.start_mining(beneficiary).await?;
    Ok(Json(SuccessResponse {
        message: "mining started".to_string(),
    }))
}

async fn stop_mining(State(node): State<Arc<Node>>) -> Result<Json<SuccessResponse>, ApiError> {
    node.stop_mining().await?;
    Ok(Json(SuccessResponse {
        message: "mining stopped".to_string(),
    }))
}

async fn get_mining_status(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "is_mining": node.is_mining(),
        "blocks_mined": node.blocks_mined(),
    }))
}

async fn get_peers(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let peers = node.network.list_peers().await;
    Json(serde_json::json!({
        "count": peers.len(),
        "peers": peers,
    }))
}

async fn create_wallet() -> Result<Json<WalletResponse>, ApiError> {
    let keypair = KeyPair::generate()
        .map_err(|e| ApiError::Internal(format!("failed to generate keypair: {}", e)))?;
    Ok(Json(WalletResponse {
        address: keypair.address().to_checksum_hex(),
        public_key: hex::encode(keypair.public_key_bytes()),
        private_key: hex::encode(keypair.secret_key_bytes()),
    }))
}

async fn get_stats(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let chain = node.blockchain.read().await;
    let stats = node.api_stats.read().await;
    Json(StatsResponse {
        height: chain.height(),
        difficulty_bits: chain.params.difficulty_bits,
        mempool_size: chain.mempool.len(),
        total_issued: chain.state.issued,
        is_mining: node.is_mining(),
        blocks_mined: node.blocks_mined(),
        total_requests: stats.total_requests,
        successful_requests: stats.successful_requests,
        failed_requests: stats.failed_requests,
        transactions_submitted: stats.transactions_submitted,
        uptime_seconds: stats.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0),
    })
}
