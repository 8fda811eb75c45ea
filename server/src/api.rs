//! HTTP surface. Handlers only authenticate and decode; the work happens on
//! [`AppState`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use dealhub_common::cart::CartItem;
use dealhub_common::listing::ListingId;
use dealhub_common::seller::{SellerAccountKind, SellerId};
use dealhub_common::settlement::SettlementId;

use crate::approval::{ApprovalReport, ListingView, LockReport};
use crate::error::{ApiError, ApiResult};
use crate::processor::PaymentProcessor;
use crate::promotion::{ActivationReport, PromotionActivation, PromotionPurchase, PromotionQuote};
use crate::routing::{PayoutOnboarding, PayoutStatus};
use crate::settlement::{
    ConfirmationReport, ReceiptEmailUpdate, SettlementRequest, SettlementResponse,
};
use crate::state::AppState;
use crate::stock::StockReservation;
use crate::store::DocumentStore;

type Shared<S, P> = State<Arc<AppState<S, P>>>;

/// Decode a JSON body, reporting malformed input as a validation error.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

// ─── Settlement ─────────────────────────────────────────────────────────────

async fn create_settlement<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    headers: HeaderMap,
    payload: Result<Json<SettlementRequest>, JsonRejection>,
) -> ApiResult<Json<SettlementResponse>> {
    let request = body(payload)?;
    let caller = state.authenticate_optional(&headers).await?;
    let response = state
        .create_or_reuse_settlement(request, caller.as_ref())
        .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptEmailRequest {
    settlement_id: SettlementId,
    email: String,
}

async fn receipt_email<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    payload: Result<Json<ReceiptEmailRequest>, JsonRejection>,
) -> ApiResult<Json<ReceiptEmailUpdate>> {
    let request = body(payload)?;
    let update = state
        .set_receipt_email(&request.settlement_id, &request.email)
        .await?;
    Ok(Json(update))
}

// ─── Stock ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockVerifyRequest {
    #[serde(default)]
    settlement_id: Option<SettlementId>,
    #[serde(default)]
    items: Vec<CartItem>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum StockVerification {
    Settlement(ConfirmationReport),
    Items { stock: Vec<StockReservation> },
}

/// With a settlement id this is purchase verification against the processor.
/// A bare item list adjusts stock directly and is reserved for admins.
async fn verify_stock<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    headers: HeaderMap,
    payload: Result<Json<StockVerifyRequest>, JsonRejection>,
) -> ApiResult<Json<StockVerification>> {
    let request = body(payload)?;
    if let Some(settlement_id) = request.settlement_id {
        let report = state.confirm_settlement(&settlement_id).await?;
        return Ok(Json(StockVerification::Settlement(report)));
    }
    if request.items.is_empty() {
        return Err(ApiError::validation("settlementId or items required"));
    }
    let caller = state.authenticate(&headers).await?;
    caller.require_privileged()?;
    let mut stock = Vec::with_capacity(request.items.len());
    for item in &request.items {
        stock.push(
            state
                .reserve_and_decrement(&item.listing_id, item.quantity)
                .await?,
        );
    }
    Ok(Json(StockVerification::Items { stock }))
}

// ─── Promotion ──────────────────────────────────────────────────────────────

async fn purchase_promotion<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    headers: HeaderMap,
    payload: Result<Json<PromotionPurchase>, JsonRejection>,
) -> ApiResult<Json<PromotionQuote>> {
    let purchase = body(payload)?;
    let caller = state.authenticate(&headers).await?;
    Ok(Json(state.purchase_promotion(&caller, purchase).await?))
}

async fn activate_promotion<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    payload: Result<Json<PromotionActivation>, JsonRejection>,
) -> ApiResult<Json<ActivationReport>> {
    let activation = body(payload)?;
    Ok(Json(state.activate_promotion(activation).await?))
}

// ─── Sellers ────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PayoutAccountRequest {
    #[serde(default)]
    account_kind: Option<SellerAccountKind>,
}

async fn open_payout_account<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    Path(seller_id): Path<String>,
    headers: HeaderMap,
    raw: Bytes,
) -> ApiResult<Json<PayoutOnboarding>> {
    let seller_id = SellerId(seller_id);
    let caller = state.authenticate(&headers).await?;
    caller.require_seller_or_admin(&seller_id)?;
    // The body is optional.
    let request: PayoutAccountRequest = if raw.iter().all(u8::is_ascii_whitespace) {
        PayoutAccountRequest::default()
    } else {
        serde_json::from_slice(&raw).map_err(|e| ApiError::validation(e.to_string()))?
    };
    let onboarding = state
        .resolve_or_create_payout_account(&seller_id, request.account_kind)
        .await?;
    Ok(Json(onboarding))
}

async fn payout_status<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    Path(seller_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<PayoutStatus>> {
    let seller_id = SellerId(seller_id);
    let caller = state.authenticate(&headers).await?;
    caller.require_seller_or_admin(&seller_id)?;
    Ok(Json(state.payout_status(&seller_id).await?))
}

async fn approve_seller<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    Path(seller_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ApprovalReport>> {
    let caller = state.authenticate(&headers).await?;
    Ok(Json(
        state.approve_seller(&caller, &SellerId(seller_id)).await?,
    ))
}

async fn lock_seller<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    Path(seller_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<LockReport>> {
    let caller = state.authenticate(&headers).await?;
    Ok(Json(state.lock_seller(&caller, &SellerId(seller_id)).await?))
}

// ─── Listings & health ──────────────────────────────────────────────────────

async fn get_listing<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
    Path(listing_id): Path<String>,
) -> ApiResult<Json<ListingView>> {
    Ok(Json(state.listing_view(&ListingId(listing_id)).await?))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    processor: &'static str,
}

async fn health<S: DocumentStore, P: PaymentProcessor>(
    State(state): Shared<S, P>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        processor: state.processor.name(),
    })
}

pub fn router<S: DocumentStore, P: PaymentProcessor>(state: Arc<AppState<S, P>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/settlement/intent", post(create_settlement::<S, P>))
        .route("/settlement/receipt-email", post(receipt_email::<S, P>))
        .route("/stock/verify", post(verify_stock::<S, P>))
        .route("/promotion/purchase", post(purchase_promotion::<S, P>))
        .route("/promotion/activate", post(activate_promotion::<S, P>))
        .route(
            "/sellers/{id}/payout-account",
            post(open_payout_account::<S, P>).get(payout_status::<S, P>),
        )
        .route("/sellers/{id}/approve", post(approve_seller::<S, P>))
        .route("/sellers/{id}/lock", post(lock_seller::<S, P>))
        .route("/listings/{id}", get(get_listing::<S, P>))
        .route("/health", get(health::<S, P>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
