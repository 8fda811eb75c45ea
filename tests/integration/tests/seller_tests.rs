use serde_json::json;

use dealhub_integration::harness::TestHarness;
use dealhub_integration::{make_listing, make_pending_seller};

#[tokio::test]
async fn approval_is_admin_only_and_idempotent() {
    let h = TestHarness::start().await;
    h.put_seller(make_pending_seller("s-1")).await;
    h.put_listing(make_listing("d-1", "s-1", 800, 4)).await;

    assert_eq!(h.get("/listings/d-1", None).await.body["visible"], false);

    let seller = h.token("s-1", None);
    let denied = h.post("/sellers/s-1/approve", &json!({}), Some(&seller)).await;
    assert_eq!(denied.status, 403);
    assert!(denied.body["error"].is_string());

    let admin = h.token("ops-1", Some("admin"));
    let first = h.post("/sellers/s-1/approve", &json!({}), Some(&admin)).await;
    assert_eq!(first.status, 200, "{}", first.body);
    assert_eq!(first.body["outcome"], "approved");

    let root = h.token("root", Some("superadmin"));
    let second = h.post("/sellers/s-1/approve", &json!({}), Some(&root)).await;
    assert_eq!(second.status, 200);
    assert_eq!(second.body["outcome"], "alreadyApproved");
    assert_eq!(second.body["approvedAt"], first.body["approvedAt"]);
    assert_eq!(second.body["approvedBy"], "ops-1");

    assert_eq!(h.get("/listings/d-1", None).await.body["visible"], true);

    let ghost = h.post("/sellers/ghost/approve", &json!({}), Some(&admin)).await;
    assert_eq!(ghost.status, 404);
}

#[tokio::test]
async fn lock_skips_approved_sellers() {
    let h = TestHarness::start().await;
    h.put_seller(make_pending_seller("s-pending")).await;
    h.onboarded_seller("s-live").await;
    let admin = h.token("ops", Some("admin"));

    let locked = h.post("/sellers/s-pending/lock", &json!({}), Some(&admin)).await;
    assert_eq!(locked.body["outcome"], "locked");
    let again = h.post("/sellers/s-pending/lock", &json!({}), Some(&admin)).await;
    assert_eq!(again.body["outcome"], "alreadyLocked");
    let skipped = h.post("/sellers/s-live/lock", &json!({}), Some(&admin)).await;
    assert_eq!(skipped.body["outcome"], "skipped");
}

#[tokio::test]
async fn locked_seller_is_shut_out() {
    let h = TestHarness::start().await;
    h.put_seller(make_pending_seller("s-1")).await;
    h.put_listing(make_listing("d-1", "s-1", 800, 4)).await;
    let seller = h.token("s-1", None);
    let admin = h.token("ops", Some("admin"));

    let locked = h.post("/sellers/s-1/lock", &json!({}), Some(&admin)).await;
    assert_eq!(locked.body["locked"], true);

    let onboarding = h
        .post("/sellers/s-1/payout-account", &json!({}), Some(&seller))
        .await;
    assert_eq!(onboarding.status, 403);
    assert!(onboarding.body["error"].as_str().unwrap().contains("locked"));
    let boost = h
        .post(
            "/promotion/purchase",
            &json!({"listingId": "d-1", "kind": "banner", "durationHours": 2}),
            Some(&seller),
        )
        .await;
    assert_eq!(boost.status, 403);
    assert_eq!(h.state.processor.account_creations(), 0);
    assert_eq!(h.state.processor.intent_creations(), 0);

    let on_behalf = h
        .post("/sellers/s-1/payout-account", &json!({}), Some(&admin))
        .await;
    assert_eq!(on_behalf.status, 200, "{}", on_behalf.body);
}

#[tokio::test]
async fn payout_onboarding_is_reentrant() {
    let h = TestHarness::start().await;
    h.put_seller(make_pending_seller("s-1")).await;
    let seller = h.token("s-1", None);

    let first = h
        .post("/sellers/s-1/payout-account", &json!({"accountKind": "company"}), Some(&seller))
        .await;
    assert_eq!(first.status, 200, "{}", first.body);
    assert_eq!(first.body["created"], true);
    assert!(first.body["onboardingUrl"].as_str().unwrap().contains("s-1"));

    let second = h
        .post("/sellers/s-1/payout-account", &json!({}), Some(&seller))
        .await;
    assert_eq!(second.body["created"], false);
    assert_eq!(second.body["payoutAccountId"], first.body["payoutAccountId"]);
    assert_eq!(h.state.processor.account_creations(), 1);

    let status = h.get("/sellers/s-1/payout-account", Some(&seller)).await;
    assert_eq!(status.status, 200);
    assert_eq!(status.body["payoutsEnabled"], false);

    let other = h.token("s-2", None);
    let forbidden = h
        .post("/sellers/s-1/payout-account", &json!({}), Some(&other))
        .await;
    assert_eq!(forbidden.status, 403);
}

#[tokio::test]
async fn health_reports_processor() {
    let h = TestHarness::start().await;
    let reply = h.get("/health", None).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["status"], "ok");
    assert_eq!(reply.body["processor"], "mock");
}
