//! Settlement Intent Manager.
//!
//! Turns a multi-seller cart into one payable processor intent and, once the
//! processor reports the payment as succeeded, applies stock and pays each
//! seller their share.
//!
//! The cart pointer lookup only saves a round trip. Duplicate creation is
//! prevented by the processor idempotency key, which is derived from the cart
//! fingerprint and the session it replaces.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dealhub_common::cart::{Buyer, BuyerId, CartItem};
use dealhub_common::currency::{format_amount, normalize_currency};
use dealhub_common::fingerprint::CartFingerprint;
use dealhub_common::listing::ListingId;
use dealhub_common::seller::{PayoutAccountId, SellerId};
use dealhub_common::settlement::{
    compute_totals, group_by_seller, SettlementId, SettlementSession, SettlementStatus,
};

use crate::error::{bounded, ApiError, ApiResult};
use crate::identity::Caller;
use crate::processor::{CreateIntent, CreateTransfer, IntentUpdate, PaymentProcessor};
use crate::state::AppState;
use crate::stock::StockReservation;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub buyer: Option<Buyer>,
    /// Client-chosen idempotency key, used verbatim instead of the fingerprint.
    #[serde(default)]
    pub cart_id: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub client_secret: String,
    pub settlement_id: SettlementId,
    pub cart_fingerprint: CartFingerprint,
    pub reused: bool,
    pub subtotal: u64,
    pub shipping_fee: u64,
    pub platform_fee_total: u64,
    pub total_amount: u64,
    pub currency: String,
}

impl SettlementResponse {
    fn from_session(session: &SettlementSession, client_secret: String, reused: bool) -> Self {
        Self {
            client_secret,
            settlement_id: session.id.clone(),
            cart_fingerprint: session.cart_fingerprint.clone(),
            reused,
            subtotal: session.subtotal,
            shipping_fee: session.shipping_fee,
            platform_fee_total: session.platform_fee_total,
            total_amount: session.total_amount,
            currency: session.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEmailUpdate {
    pub settlement_id: SettlementId,
    pub receipt_email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferState {
    Sent,
    AlreadySent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOutcome {
    pub seller_id: SellerId,
    pub payout_account_id: PayoutAccountId,
    pub amount: u64,
    pub state: TransferState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationReport {
    pub settlement_id: SettlementId,
    pub status: SettlementStatus,
    /// Stock applied by this call. Empty when stock was applied earlier.
    pub stock: Vec<StockReservation>,
    /// Paid lines that could not be taken out of stock. Their sellers are not
    /// paid for them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unfulfilled: Vec<ListingId>,
    pub transfers: Vec<TransferOutcome>,
}

fn intent_metadata(session: &SettlementSession) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("subtotal".to_string(), session.subtotal.to_string());
    metadata.insert(
        "platform_fee_total".to_string(),
        session.platform_fee_total.to_string(),
    );
    metadata.insert("shipping_fee".to_string(), session.shipping_fee.to_string());
    metadata.insert(
        "cart_fingerprint".to_string(),
        session.cart_fingerprint.to_string(),
    );
    if let Some(buyer) = &session.buyer_id {
        metadata.insert("buyer_id".to_string(), buyer.0.clone());
    }
    if let Some(email) = &session.buyer_email {
        metadata.insert("buyer_email".to_string(), email.clone());
    }
    metadata
}

impl<S: DocumentStore, P: PaymentProcessor> AppState<S, P> {
    /// Create a payable settlement for a cart, or hand back the live one
    /// already created for the same cart fingerprint.
    pub async fn create_or_reuse_settlement(
        &self,
        request: SettlementRequest,
        caller: Option<&Caller>,
    ) -> ApiResult<SettlementResponse> {
        if request.items.is_empty() {
            return Err(ApiError::validation("cart has no items"));
        }
        let buyer = request.buyer.unwrap_or_default();
        let buyer_id = caller
            .map(|c| BuyerId(c.claims.sub.clone()))
            .or(buyer.id);
        let buyer_email = buyer
            .email
            .filter(|e| !e.trim().is_empty())
            .or_else(|| caller.and_then(|c| c.claims.email.clone()));
        let requested_currency = match request.currency.as_deref() {
            Some(code) => Some(
                normalize_currency(code)
                    .ok_or_else(|| ApiError::validation(format!("unsupported currency {code:?}")))?,
            ),
            None => None,
        };
        let currency = requested_currency
            .clone()
            .unwrap_or_else(|| self.settings.currency.clone());

        let fingerprint =
            CartFingerprint::resolve(request.cart_id.as_deref(), &request.items, buyer_id.as_ref());

        let mut previous: Option<SettlementId> = None;
        if let Some(pointer) = bounded(
            self.remote_timeout,
            "cart pointer lookup",
            self.store.get_cart_pointer(&fingerprint),
        )
        .await?
        {
            match bounded(
                self.remote_timeout,
                "settlement lookup",
                self.store.get_session(&pointer),
            )
            .await?
            {
                Some(session) => {
                    let intent = bounded(
                        self.remote_timeout,
                        "payment intent lookup",
                        self.processor.retrieve_payment_intent(&session.id.0),
                    )
                    .await?;
                    let status = intent.status.settlement_status();
                    if status.is_payable() {
                        if let Some(requested) = &requested_currency {
                            if *requested != session.currency {
                                return Err(ApiError::validation(format!(
                                    "cart already has an open {} payment; cancel it before paying in {requested}",
                                    session.currency
                                )));
                            }
                        }
                        info!(settlement_id = %session.id, %fingerprint, "reusing live settlement");
                        return Ok(SettlementResponse::from_session(
                            &session,
                            intent.client_secret,
                            true,
                        ));
                    }
                    bounded(
                        self.remote_timeout,
                        "settlement status sync",
                        self.store.update_session(&session.id, |s| {
                            if s.status.can_transition_to(status) {
                                s.status = status;
                            }
                        }),
                    )
                    .await?;
                    debug!(settlement_id = %session.id, ?status, "previous settlement closed");
                }
                None => warn!(settlement_id = %pointer, %fingerprint, "cart pointer to missing settlement"),
            }
            previous = Some(pointer);
        }

        let report = self.resolve_cart(&request.items).await?;
        let totals = compute_totals(&report.lines, &self.settings)
            .map_err(|err| ApiError::validation(err.to_string()))?;

        let mut session = SettlementSession {
            id: SettlementId(String::new()),
            cart_fingerprint: fingerprint.clone(),
            currency: currency.clone(),
            line_items: report.lines,
            skipped: report.skipped,
            subtotal: totals.subtotal,
            shipping_fee: totals.shipping_fee,
            platform_fee_total: totals.platform_fee_total,
            total_amount: totals.total,
            status: SettlementStatus::RequiresPayment,
            buyer_id,
            buyer_email,
            stock_applied: false,
            unfulfilled: Vec::new(),
            transfers: BTreeMap::new(),
            created_at: Utc::now(),
        };

        let idempotency_key = format!(
            "settle:{fingerprint}:{}",
            previous.as_ref().map_or("new", |p| p.0.as_str())
        );
        let intent = bounded(
            self.remote_timeout,
            "payment intent creation",
            self.processor.create_payment_intent(CreateIntent {
                amount: session.total_amount,
                currency: currency.clone(),
                idempotency_key,
                description: Some(format!(
                    "Marketplace order, {} line(s), {}",
                    session.line_items.len(),
                    format_amount(session.total_amount, &currency)
                )),
                receipt_email: session.buyer_email.clone(),
                metadata: intent_metadata(&session),
            }),
        )
        .await?;

        if intent.transfer_group.as_deref() != Some(intent.id.as_str()) {
            bounded(
                self.remote_timeout,
                "payment intent update",
                self.processor.update_payment_intent(
                    &intent.id,
                    IntentUpdate {
                        transfer_group: Some(intent.id.clone()),
                        ..Default::default()
                    },
                ),
            )
            .await?;
        }

        session.id = SettlementId(intent.id.clone());
        bounded(
            self.remote_timeout,
            "settlement write",
            self.store.put_session(session.clone()),
        )
        .await?;
        bounded(
            self.remote_timeout,
            "cart pointer write",
            self.store
                .put_cart_pointer(fingerprint.clone(), session.id.clone()),
        )
        .await?;

        info!(
            settlement_id = %session.id,
            %fingerprint,
            total = session.total_amount,
            lines = session.line_items.len(),
            skipped = session.skipped.len(),
            "settlement created"
        );
        Ok(SettlementResponse::from_session(
            &session,
            intent.client_secret,
            false,
        ))
    }

    /// Point the processor's receipt at `email`. Safe to repeat.
    pub async fn set_receipt_email(
        &self,
        settlement_id: &SettlementId,
        email: &str,
    ) -> ApiResult<ReceiptEmailUpdate> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ApiError::validation("a valid email is required"));
        }
        if bounded(
            self.remote_timeout,
            "settlement lookup",
            self.store.get_session(settlement_id),
        )
        .await?
        .is_none()
        {
            return Err(ApiError::not_found(format!(
                "settlement {settlement_id} not found"
            )));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("buyer_email".to_string(), email.to_string());
        bounded(
            self.remote_timeout,
            "payment intent update",
            self.processor.update_payment_intent(
                &settlement_id.0,
                IntentUpdate {
                    metadata,
                    receipt_email: Some(email.to_string()),
                    transfer_group: None,
                },
            ),
        )
        .await?;
        let stored = email.to_string();
        bounded(
            self.remote_timeout,
            "settlement write",
            self.store
                .update_session(settlement_id, move |s| s.buyer_email = Some(stored)),
        )
        .await?;

        debug!(%settlement_id, "receipt email updated");
        Ok(ReceiptEmailUpdate {
            settlement_id: settlement_id.clone(),
            receipt_email: email.to_string(),
        })
    }

    /// Reconcile a settlement with the processor's view of its payment.
    ///
    /// Only a processor-confirmed success advances the session. Stock is taken
    /// at most once per settlement; seller transfers carry per-seller
    /// idempotency keys and the ones still missing are retried on every call.
    pub async fn confirm_settlement(
        &self,
        settlement_id: &SettlementId,
    ) -> ApiResult<ConfirmationReport> {
        let mut session = bounded(
            self.remote_timeout,
            "settlement lookup",
            self.store.get_session(settlement_id),
        )
        .await?
        .ok_or_else(|| ApiError::not_found(format!("settlement {settlement_id} not found")))?;

        let intent = bounded(
            self.remote_timeout,
            "payment intent lookup",
            self.processor.retrieve_payment_intent(&settlement_id.0),
        )
        .await?;
        if intent.amount != session.total_amount || intent.currency != session.currency {
            return Err(ApiError::Upstream(format!(
                "payment intent {} does not match settlement total",
                intent.id
            )));
        }

        let mut report = ConfirmationReport {
            settlement_id: settlement_id.clone(),
            status: session.status,
            stock: Vec::new(),
            unfulfilled: Vec::new(),
            transfers: Vec::new(),
        };

        match intent.status.settlement_status() {
            SettlementStatus::RequiresPayment => {
                debug!(%settlement_id, status = ?intent.status, "payment not completed yet");
                return Ok(report);
            }
            SettlementStatus::Canceled => {
                let status = bounded(
                    self.remote_timeout,
                    "settlement status write",
                    self.store.update_session(settlement_id, |s| {
                        if s.status.can_transition_to(SettlementStatus::Canceled) {
                            s.status = SettlementStatus::Canceled;
                        }
                        s.status
                    }),
                )
                .await?
                .unwrap_or(SettlementStatus::Canceled);
                info!(%settlement_id, "settlement canceled at processor");
                report.status = status;
                return Ok(report);
            }
            SettlementStatus::Succeeded => {}
        }

        let claimed = bounded(
            self.remote_timeout,
            "settlement status write",
            self.store.update_session(settlement_id, |s| {
                if s.status.can_transition_to(SettlementStatus::Succeeded) {
                    s.status = SettlementStatus::Succeeded;
                }
                let claim = s.status == SettlementStatus::Succeeded && !s.stock_applied;
                if claim {
                    s.stock_applied = true;
                }
                (s.status, claim, s.transfers.clone(), s.unfulfilled.clone())
            }),
        )
        .await?;
        let Some((status, stock_claimed, done_transfers, unfulfilled)) = claimed else {
            return Err(ApiError::not_found(format!(
                "settlement {settlement_id} not found"
            )));
        };
        report.status = status;
        if status != SettlementStatus::Succeeded {
            warn!(%settlement_id, ?status, "processor reports success for a closed settlement");
            return Ok(report);
        }

        session.unfulfilled = unfulfilled;
        if stock_claimed {
            let mut short = Vec::new();
            for (index, line) in session.line_items.iter().enumerate() {
                let reservation = self
                    .reserve_and_decrement(&line.listing_id, line.quantity)
                    .await?;
                if !reservation.ok {
                    short.push(index);
                }
                report.stock.push(reservation);
            }
            if !short.is_empty() {
                warn!(
                    %settlement_id,
                    lines = short.len(),
                    "paid lines could not be fulfilled; sellers are not paid for them"
                );
                let record = short.clone();
                bounded(
                    self.remote_timeout,
                    "unfulfilled lines write",
                    self.store.update_session(settlement_id, move |s| {
                        s.unfulfilled = record;
                    }),
                )
                .await?;
            }
            session.unfulfilled = short;
        }
        report.unfulfilled = session
            .unfulfilled
            .iter()
            .filter_map(|index| session.line_items.get(*index))
            .map(|line| line.listing_id.clone())
            .collect();

        let transfer_group = intent.transfer_group.unwrap_or_else(|| intent.id.clone());
        for payout in group_by_seller(&session.fulfilled_lines()) {
            if let Some(existing) = done_transfers.get(&payout.seller_id) {
                report.transfers.push(TransferOutcome {
                    seller_id: payout.seller_id,
                    payout_account_id: payout.payout_account_id,
                    amount: payout.amount,
                    state: TransferState::AlreadySent,
                    transfer_id: Some(existing.clone()),
                    error: None,
                });
                continue;
            }
            if payout.amount == 0 {
                continue;
            }

            let result = bounded(
                self.remote_timeout,
                "seller transfer",
                self.processor.create_transfer(CreateTransfer {
                    amount: payout.amount,
                    currency: session.currency.clone(),
                    destination: payout.payout_account_id.0.clone(),
                    transfer_group: transfer_group.clone(),
                    idempotency_key: format!("transfer:{settlement_id}:{}", payout.seller_id),
                }),
            )
            .await;
            match result {
                Ok(transfer) => {
                    let seller = payout.seller_id.clone();
                    let transfer_id = transfer.id.clone();
                    bounded(
                        self.remote_timeout,
                        "transfer record write",
                        self.store.update_session(settlement_id, move |s| {
                            s.transfers.insert(seller, transfer_id);
                        }),
                    )
                    .await?;
                    info!(
                        %settlement_id,
                        seller_id = %payout.seller_id,
                        amount = payout.amount,
                        "seller paid"
                    );
                    report.transfers.push(TransferOutcome {
                        seller_id: payout.seller_id,
                        payout_account_id: payout.payout_account_id,
                        amount: payout.amount,
                        state: TransferState::Sent,
                        transfer_id: Some(transfer.id),
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(
                        %settlement_id,
                        seller_id = %payout.seller_id,
                        error = %err,
                        "seller transfer failed; will retry on next verification"
                    );
                    report.transfers.push(TransferOutcome {
                        seller_id: payout.seller_id,
                        payout_account_id: payout.payout_account_id,
                        amount: payout.amount,
                        state: TransferState::Failed,
                        transfer_id: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        Ok(report)
    }
}
