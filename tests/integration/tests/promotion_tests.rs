use chrono::{Duration, Utc};
use serde_json::json;

use dealhub_common::promotion::{PromotionKind, PromotionWindow};
use dealhub_server::processor::IntentStatus;

use dealhub_integration::harness::TestHarness;
use dealhub_integration::{make_approved_seller, make_listing};

async fn boosted(h: &TestHarness, id: &str, kind: PromotionKind, started_hours_ago: i64) {
    let mut listing = make_listing(id, "s-1", 1000, 1);
    listing.promotion_window = Some(PromotionWindow::starting_at(
        kind,
        Utc::now() - Duration::hours(started_hours_ago),
        24,
        None,
    ));
    h.put_listing(listing).await;
}

#[tokio::test]
async fn fourth_floating_boost_hits_capacity() {
    let h = TestHarness::start().await;
    h.put_seller(make_approved_seller("s-1", None)).await;
    for id in ["d-1", "d-2", "d-3"] {
        boosted(&h, id, PromotionKind::Floating, 1).await;
    }
    boosted(&h, "d-ended", PromotionKind::Floating, 30).await;
    h.put_listing(make_listing("d-4", "s-1", 1000, 1)).await;

    let token = h.token("s-1", None);
    let reply = h
        .post(
            "/promotion/purchase",
            &json!({"listingId": "d-4", "kind": "floating", "durationHours": 12}),
            Some(&token),
        )
        .await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.body["reason"], "capacity_reached");
    assert_eq!(reply.body["capacity"], 3);
    assert_eq!(reply.body["active"], 3);

    let banner = h
        .post(
            "/promotion/purchase",
            &json!({"listingId": "d-4", "kind": "banner", "durationHours": 12}),
            Some(&token),
        )
        .await;
    assert_eq!(banner.status, 200, "{}", banner.body);
    assert_eq!(banner.body["amount"], 960);
}

#[tokio::test]
async fn unpaid_quotes_hold_slots() {
    let h = TestHarness::start().await;
    h.put_seller(make_approved_seller("s-1", None)).await;
    let token = h.token("s-1", None);
    let mut intents = Vec::new();
    for id in ["d-1", "d-2", "d-3", "d-4"] {
        h.put_listing(make_listing(id, "s-1", 1000, 1)).await;
    }
    for id in ["d-1", "d-2", "d-3"] {
        let quote = h
            .post(
                "/promotion/purchase",
                &json!({"listingId": id, "kind": "floating", "durationHours": 3}),
                Some(&token),
            )
            .await;
        assert_eq!(quote.status, 200, "{}", quote.body);
        intents.push(quote.body["paymentIntentId"].as_str().unwrap().to_string());
    }

    let fourth = json!({"listingId": "d-4", "kind": "floating", "durationHours": 3});
    let full = h.post("/promotion/purchase", &fourth, Some(&token)).await;
    assert_eq!(full.status, 400);
    assert_eq!(full.body["reason"], "capacity_reached");
    assert_eq!(full.body["active"], 0);
    assert_eq!(full.body["reserved"], 3);

    h.state.processor.set_status(&intents[0], IntentStatus::Canceled);
    let admitted = h.post("/promotion/purchase", &fourth, Some(&token)).await;
    assert_eq!(admitted.status, 200, "{}", admitted.body);
    assert_eq!(admitted.body["admission"]["reserved"], 2);
}

#[tokio::test]
async fn paid_boost_activates_once() {
    let h = TestHarness::start().await;
    h.put_seller(make_approved_seller("s-1", None)).await;
    h.put_listing(make_listing("d-1", "s-1", 1000, 1)).await;
    let token = h.token("s-1", None);

    let quote = h
        .post(
            "/promotion/purchase",
            &json!({"listingId": "d-1", "kind": "floating", "durationHours": 6}),
            Some(&token),
        )
        .await;
    assert_eq!(quote.status, 200, "{}", quote.body);
    let intent_id = quote.body["paymentIntentId"].as_str().unwrap().to_string();
    assert_eq!(
        h.get("/listings/d-1", None).await.body["promotionState"],
        "pendingPayment"
    );

    let activation = json!({
        "listingId": "d-1", "kind": "floating", "durationHours": 6, "paymentIntentId": intent_id
    });
    let unpaid = h.post("/promotion/activate", &activation, None).await;
    assert_eq!(unpaid.status, 400);

    h.state.processor.set_status(&intent_id, IntentStatus::Succeeded);
    let active = h.post("/promotion/activate", &activation, None).await;
    assert_eq!(active.status, 200, "{}", active.body);
    assert_eq!(active.body["replayed"], false);

    let replay = h.post("/promotion/activate", &activation, None).await;
    assert_eq!(replay.body["replayed"], true);
    assert_eq!(replay.body["window"], active.body["window"]);

    let view = h.get("/listings/d-1", None).await;
    assert_eq!(view.body["promotionState"], "active");

    let again = h
        .post(
            "/promotion/purchase",
            &json!({"listingId": "d-1", "kind": "floating", "durationHours": 6}),
            Some(&token),
        )
        .await;
    assert_eq!(again.status, 400);
}

#[tokio::test]
async fn purchase_requires_owner_credentials() {
    let h = TestHarness::start().await;
    h.put_seller(make_approved_seller("s-1", None)).await;
    h.put_listing(make_listing("d-1", "s-1", 1000, 1)).await;
    let body = json!({"listingId": "d-1", "kind": "banner", "durationHours": 2});

    assert_eq!(h.post("/promotion/purchase", &body, None).await.status, 401);
    assert_eq!(
        h.post("/promotion/purchase", &body, Some("garbage.token")).await.status,
        401
    );
    let stranger = h.token("s-2", None);
    assert_eq!(
        h.post("/promotion/purchase", &body, Some(&stranger)).await.status,
        403
    );
}
