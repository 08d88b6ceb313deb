//! Axum router and HTTP handlers.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use veiling_core::error::AdmissionError;
use veiling_core::reveal::{HiddenKind, RevealOutcome};
use veiling_core::store::ListingFilter;
use veiling_core::types::{Listing, ListingStatus};
use veiling_node::admission::ListingSubmission;

use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/listings", get(list_listings).post(create_listing))
        .route("/listings/:id", get(get_listing))
        .route("/listings/:id/current-psbt", get(current_psbt))
        .route("/address/:addr", get(address_listings))
        .with_state(state)
        .layer(cors)
}

// ---------------------------------------------------------------------------
// API views
// ---------------------------------------------------------------------------

/// Listing metadata as served over the API. The PSBT schedule is never part
/// of this shape; unrevealed steps stay server-side.
#[derive(Serialize)]
struct ListingView {
    id: u64,
    asset_name: String,
    asset_qty: String,
    asset_divisible: bool,
    utxo_txid: String,
    utxo_vout: u32,
    start_block: u64,
    end_block: u64,
    blocks_after_end: u64,
    start_price_sats: u64,
    end_price_sats: u64,
    price_decrement: u64,
    status: ListingStatus,
    seller: String,
    spent_txid: Option<String>,
    spent_block: Option<u64>,
    spent_at: Option<DateTime<Utc>>,
    recipient: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<Listing> for ListingView {
    fn from(listing: Listing) -> Self {
        let spend = listing.spend;
        ListingView {
            id: listing.id,
            asset_name: listing.asset_name,
            asset_qty: listing.asset_qty.to_string(),
            asset_divisible: listing.asset_qty.is_divisible(),
            utxo_txid: listing.utxo.txid.to_string(),
            utxo_vout: listing.utxo.vout,
            start_block: listing.start_block,
            end_block: listing.end_block,
            blocks_after_end: listing.blocks_after_end,
            start_price_sats: listing.start_price_sats,
            end_price_sats: listing.end_price_sats,
            price_decrement: listing.price_decrement,
            status: listing.status,
            seller: listing.seller,
            spent_txid: spend.as_ref().map(|s| s.txid.to_string()),
            spent_block: spend.as_ref().map(|s| s.block_height),
            spent_at: spend.as_ref().map(|s| s.spent_at),
            recipient: spend.and_then(|s| s.recipient),
            created_at: listing.created_at,
        }
    }
}

#[derive(Serialize)]
struct StepView {
    block_number: u64,
    price_sats: u64,
    psbt_data: String,
}

#[derive(Serialize)]
struct RevealView {
    listing_id: u64,
    status: ListingStatus,
    psbt: Option<StepView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<HiddenKind>,
}

impl RevealView {
    fn new(listing_id: u64, outcome: RevealOutcome) -> Self {
        RevealView {
            listing_id,
            status: outcome.status,
            psbt: outcome.step.map(|step| StepView {
                block_number: step.block_number,
                price_sats: step.price_sats,
                psbt_data: step.psbt_data,
            }),
            kind: outcome.kind,
        }
    }
}

/// Parse a comma-separated status list (OR semantics).
fn parse_statuses(raw: &str) -> Result<Vec<ListingStatus>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — liveness plus the oracle's view of the tip.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.broker.tip().await {
        Ok(tip) => (StatusCode::OK, Json(json!({ "status": "ok", "tip": tip }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "error": e.to_string() })),
        ),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
}

/// `GET /listings?status=a,b` — filtered listing metadata.
async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let mut filter = ListingFilter::default();
    if let Some(raw) = &query.status {
        match parse_statuses(raw) {
            Ok(statuses) => filter.statuses = Some(statuses),
            Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))),
        }
    }
    match state.broker.listings(&filter) {
        Ok(listings) => {
            let views: Vec<ListingView> = listings.into_iter().map(ListingView::from).collect();
            (StatusCode::OK, Json(json!({ "listings": views })))
        }
        Err(e) => {
            warn!("listing query failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "storage error" })))
        }
    }
}

/// `POST /listings` — admission. Requires the `X-Api-Key` header.
async fn create_listing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid api key" })));
    }

    // Deserialized by hand so field-level problems report as a 400 shape
    // failure rather than the extractor's 422.
    let submission: ListingSubmission = match serde_json::from_value(body) {
        Ok(submission) => submission,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid submission: {e}") })),
            );
        }
    };

    // Store-level contention is retried once; everything else is a verdict.
    let mut outcome = state.broker.admit(submission.clone()).await;
    if matches!(outcome, Err(AdmissionError::Store(_))) {
        outcome = state.broker.admit(submission).await;
    }

    match outcome {
        Ok(listing) => {
            info!(id = listing.id, asset = %listing.asset_name, "listing admitted");
            (StatusCode::CREATED, Json(json!(ListingView::from(listing))))
        }
        Err(e) => admission_response(e),
    }
}

fn admission_response(err: AdmissionError) -> (StatusCode, Json<serde_json::Value>) {
    let code = match &err {
        AdmissionError::Shape(_)
        | AdmissionError::Schedule(_)
        | AdmissionError::NotInFuture { .. }
        | AdmissionError::UtxoUnavailable(_)
        | AdmissionError::AssetMismatch(_) => StatusCode::BAD_REQUEST,
        AdmissionError::UtxoInUse(_) => StatusCode::CONFLICT,
        AdmissionError::Oracle(e) => {
            warn!("admission oracle failure: {e}");
            StatusCode::SERVICE_UNAVAILABLE
        }
        AdmissionError::Store(e) => {
            warn!("admission store failure: {e}");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (code, Json(json!({ "error": err.to_string() })))
}

/// `GET /listings/{id}` — single listing metadata.
async fn get_listing(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    match state.broker.listing(id) {
        Ok(Some(listing)) => (StatusCode::OK, Json(json!(ListingView::from(listing)))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown listing" }))),
        Err(e) => {
            warn!(id, "listing lookup failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "storage error" })))
        }
    }
}

/// `GET /listings/{id}/current-psbt` — the revelation result: at most the
/// step the current tip has reached.
async fn current_psbt(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    match state.broker.current_psbt(id).await {
        Ok(Some(outcome)) => (StatusCode::OK, Json(json!(RevealView::new(id, outcome)))),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "unknown listing" }))),
        Err(e) => {
            warn!(id, "revelation failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": e.to_string() })))
        }
    }
}

#[derive(Deserialize)]
struct AddressQuery {
    role: Option<String>,
    status: Option<String>,
}

/// `GET /address/{addr}?role=seller|buyer&status=…` — listings where the
/// address sold (default) or bought.
async fn address_listings(
    State(state): State<AppState>,
    Path(addr): Path<String>,
    Query(query): Query<AddressQuery>,
) -> impl IntoResponse {
    let mut filter = ListingFilter::default();
    match query.role.as_deref().unwrap_or("seller") {
        "seller" => filter.seller = Some(addr),
        "buyer" => filter.recipient = Some(addr),
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("unknown role: {other}") })),
            );
        }
    }
    if let Some(raw) = &query.status {
        match parse_statuses(raw) {
            Ok(statuses) => filter.statuses = Some(statuses),
            Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))),
        }
    }
    match state.broker.listings(&filter) {
        Ok(listings) => {
            let views: Vec<ListingView> = listings.into_iter().map(ListingView::from).collect();
            (StatusCode::OK, Json(json!({ "listings": views })))
        }
        Err(e) => {
            warn!("address query failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "storage error" })))
        }
    }
}
