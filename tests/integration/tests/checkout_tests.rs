use serde_json::json;

use dealhub_common::listing::ListingId;
use dealhub_server::processor::IntentStatus;
use dealhub_server::store::DocumentStore;

use dealhub_integration::harness::TestHarness;
use dealhub_integration::{make_approved_seller, make_listing};

async fn market() -> TestHarness {
    let h = TestHarness::start().await;
    h.onboarded_seller("s-bakery").await;
    h.onboarded_seller("s-florist").await;
    h.put_seller(make_approved_seller("s-unpaid", None)).await;
    h.put_listing(make_listing("d-bread", "s-bakery", 400, 10)).await;
    h.put_listing(make_listing("d-roses", "s-florist", 1200, 3)).await;
    h.put_listing(make_listing("d-jam", "s-unpaid", 300, 10)).await;
    h
}

#[tokio::test]
async fn same_cart_reuses_settlement() {
    let h = market().await;
    let first = h
        .post(
            "/settlement/intent",
            &json!({
                "items": [{"id": "d-bread", "quantity": 1}, {"id": "d-roses", "quantity": "2"}],
                "buyer": {"id": "buyer-7"}
            }),
            None,
        )
        .await;
    assert_eq!(first.status, 200, "{}", first.body);
    assert_eq!(first.body["reused"], false);

    let second = h
        .post(
            "/settlement/intent",
            &json!({
                "items": [{"id": "d-roses", "quantity": 2}, {"id": "d-bread"}],
                "buyer": {"id": "buyer-7"}
            }),
            None,
        )
        .await;
    assert_eq!(second.status, 200);
    assert_eq!(second.body["reused"], true);
    assert_eq!(second.body["settlementId"], first.body["settlementId"]);
    assert_eq!(second.body["cartFingerprint"], first.body["cartFingerprint"]);
    assert_eq!(h.state.processor.intent_creations(), 1);
}

#[tokio::test]
async fn partial_cart_settles_only_payable_lines() {
    let h = market().await;
    let reply = h
        .post(
            "/settlement/intent",
            &json!({"items": [{"id": "d-roses", "quantity": 1}, {"id": "d-jam", "quantity": 1}]}),
            None,
        )
        .await;
    assert_eq!(reply.status, 200, "{}", reply.body);
    assert_eq!(reply.body["subtotal"], 1200);
    assert_eq!(reply.body["shippingFee"], 0);
    assert_eq!(reply.body["totalAmount"], 1200);
}

#[tokio::test]
async fn unpayable_cart_is_rejected_without_intent() {
    let h = market().await;
    let reply = h
        .post(
            "/settlement/intent",
            &json!({"items": [{"id": "d-jam", "quantity": 1}, {"id": "d-gone", "quantity": 1}]}),
            None,
        )
        .await;
    assert_eq!(reply.status, 400);
    assert!(reply.body["error"].as_str().unwrap().contains("no payable items"));
    assert_eq!(h.state.processor.intent_creations(), 0);

    let malformed = h
        .post("/settlement/intent", &json!({"items": "nope"}), None)
        .await;
    assert_eq!(malformed.status, 400);
    assert!(malformed.body["error"].is_string());
}

#[tokio::test]
async fn shipping_applies_below_threshold() {
    let h = TestHarness::start().await;
    h.onboarded_seller("s-1").await;
    h.put_listing(make_listing("d-499", "s-1", 499, 5)).await;
    h.put_listing(make_listing("d-500", "s-1", 500, 5)).await;

    let below = h
        .post("/settlement/intent", &json!({"items": [{"id": "d-499"}]}), None)
        .await;
    assert_eq!(below.body["shippingFee"], 99);
    assert_eq!(below.body["totalAmount"], 598);

    let at = h
        .post("/settlement/intent", &json!({"items": [{"id": "d-500"}]}), None)
        .await;
    assert_eq!(at.body["shippingFee"], 0);
    assert_eq!(at.body["totalAmount"], 500);
}

#[tokio::test]
async fn verified_payment_applies_stock_and_pays_sellers() {
    let h = market().await;
    let created = h
        .post(
            "/settlement/intent",
            &json!({"items": [{"id": "d-bread", "quantity": 2}, {"id": "d-roses", "quantity": 1}]}),
            None,
        )
        .await;
    let settlement_id = created.body["settlementId"].as_str().unwrap().to_string();

    let early = h
        .post("/stock/verify", &json!({"settlementId": settlement_id}), None)
        .await;
    assert_eq!(early.status, 200);
    assert_eq!(early.body["status"], "requires_payment");
    assert_eq!(early.body["stock"].as_array().unwrap().len(), 0);

    h.state
        .processor
        .set_status(&settlement_id, IntentStatus::Succeeded);
    let verified = h
        .post("/stock/verify", &json!({"settlementId": settlement_id}), None)
        .await;
    assert_eq!(verified.status, 200, "{}", verified.body);
    assert_eq!(verified.body["status"], "succeeded");
    assert_eq!(verified.body["stock"].as_array().unwrap().len(), 2);
    let transfers = verified.body["transfers"].as_array().unwrap();
    assert_eq!(transfers.len(), 2);
    assert!(transfers.iter().all(|t| t["state"] == "sent"));

    let replay = h
        .post("/stock/verify", &json!({"settlementId": settlement_id}), None)
        .await;
    assert_eq!(replay.body["stock"].as_array().unwrap().len(), 0);
    assert!(replay.body["transfers"]
        .as_array()
        .unwrap()
        .iter()
        .all(|t| t["state"] == "alreadySent"));
    assert_eq!(h.state.processor.transfers().len(), 2);

    let bread = h.get("/listings/d-bread", None).await;
    assert_eq!(bread.body["availableQuantity"], 8);
    let roses = h
        .state
        .store
        .get_listing(&ListingId("d-roses".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(roses.available_quantity, 2);
}

#[tokio::test]
async fn receipt_email_can_be_set_repeatedly() {
    let h = market().await;
    let created = h
        .post("/settlement/intent", &json!({"items": [{"id": "d-roses"}]}), None)
        .await;
    let settlement_id = created.body["settlementId"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let reply = h
            .post(
                "/settlement/receipt-email",
                &json!({"settlementId": settlement_id, "email": "buyer@example.com"}),
                None,
            )
            .await;
        assert_eq!(reply.status, 200, "{}", reply.body);
    }
    let intent = h.state.processor.intent(&settlement_id).unwrap();
    assert_eq!(intent.receipt_email.as_deref(), Some("buyer@example.com"));

    let missing = h
        .post(
            "/settlement/receipt-email",
            &json!({"settlementId": "pi_unknown", "email": "buyer@example.com"}),
            None,
        )
        .await;
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn direct_stock_adjustment_needs_admin() {
    let h = market().await;
    let items = json!({"items": [{"id": "d-roses", "quantity": 5}]});

    assert_eq!(h.post("/stock/verify", &items, None).await.status, 401);
    let buyer = h.token("buyer-1", None);
    assert_eq!(h.post("/stock/verify", &items, Some(&buyer)).await.status, 403);

    let admin = h.token("ops", Some("admin"));
    let reply = h.post("/stock/verify", &items, Some(&admin)).await;
    assert_eq!(reply.status, 200, "{}", reply.body);
    let line = &reply.body["stock"][0];
    assert_eq!(line["ok"], false);
    assert_eq!(line["remaining"], 3);
}
