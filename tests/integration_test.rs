//! Integration tests against live infrastructure.
//!
//! These tests exercise the database-backed pipeline properties:
//! 1. Idempotent daily ingestion gate (update-else-insert, cancel)
//! 2. Forbidden-word synchronization (upsert + soft-delete diff)
//! 3. Wildcard category matching on active-word lookup
//! 4. Claim exclusivity on the request queue
//! 5. Retry bookkeeping (PENDING reset, terminal finalization)
//!
//! Note: this requires a running PostgreSQL instance configured via
//! environment variables, and it rewrites the forbidden-word set.
//! Run with: cargo test --test integration_test -- --ignored

use goods_inspect::{
    db::{self, batch_queries, forbidden_word_queries},
    models::batch::{BatchStatus, IngestStatus, InspectionStatus, NewBatchRequest},
    models::forbidden_word::{ForbiddenWordFilter, WordRecord},
};
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");

    let pool = db::init_pool(&database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

fn word(term: &str, lgroup: Option<&str>, mgroup: Option<&str>) -> WordRecord {
    WordRecord {
        word: term.to_string(),
        lgroup: lgroup.map(str::to_string),
        mgroup: mgroup.map(str::to_string),
        sgroup: None,
        dgroup: None,
        reason: None,
    }
}

fn request(goods_code: &str) -> NewBatchRequest {
    NewBatchRequest {
        goods_code: goods_code.to_string(),
        goods_name: format!("test goods {goods_code}"),
        mobile_goods_name: String::new(),
        sale_price: 1000,
        buy_price: 800,
        goods_info: String::new(),
        image_html: String::new(),
        representative_file: String::new(),
        lgroup: Some("10".to_string()),
        lgroup_name: None,
        mgroup: Some("20".to_string()),
        mgroup_name: None,
        sgroup: None,
        sgroup_name: None,
        dgroup: None,
        dgroup_name: None,
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn ingestion_gate_is_idempotent_within_a_day() {
    let pool = test_pool().await;
    let today = goods_inspect::services::processor::today_stamp();

    // Start from a clean day
    batch_queries::cancel_daily_status(&pool, &today)
        .await
        .expect("cancel failed");
    assert_eq!(
        batch_queries::daily_status(&pool, &today).await.unwrap(),
        IngestStatus::None
    );

    // First writer of the day creates the row
    assert!(batch_queries::record_daily_status(&pool, IngestStatus::Pending)
        .await
        .unwrap());
    assert_eq!(
        batch_queries::daily_status(&pool, &today).await.unwrap(),
        IngestStatus::Pending
    );

    // Later writer transitions it in place: still exactly one row
    assert!(batch_queries::record_daily_status(&pool, IngestStatus::Success)
        .await
        .unwrap());
    assert_eq!(
        batch_queries::daily_status(&pool, &today).await.unwrap(),
        IngestStatus::Success
    );

    // A no-file day resets to NONE so the next tick can retry
    batch_queries::cancel_daily_status(&pool, &today)
        .await
        .expect("cancel failed");
    assert_eq!(
        batch_queries::daily_status(&pool, &today).await.unwrap(),
        IngestStatus::None
    );
}

#[tokio::test]
#[ignore]
async fn sync_replaces_the_active_set_without_emptying_it() {
    let pool = test_pool().await;

    let first = vec![word("담배", None, Some("10")), word("술", Some("20"), None)];
    forbidden_word_queries::sync_all(&pool, &first)
        .await
        .expect("first sync failed");

    let all = ForbiddenWordFilter::default();
    let active: Vec<String> = forbidden_word_queries::find_active(&pool, &all)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.word)
        .collect();
    assert!(active.contains(&"담배".to_string()));
    assert!(active.contains(&"술".to_string()));

    // Second sync drops 술: it must be deactivated, 담배 must survive, and
    // at no point is the active set empty for a supplied word.
    let second = vec![word("담배", None, Some("10"))];
    forbidden_word_queries::sync_all(&pool, &second)
        .await
        .expect("second sync failed");

    let active: Vec<String> = forbidden_word_queries::find_active(&pool, &all)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.word)
        .collect();
    assert!(active.contains(&"담배".to_string()));
    assert!(!active.contains(&"술".to_string()));
}

#[tokio::test]
#[ignore]
async fn stored_null_groups_act_as_wildcards_at_lookup() {
    let pool = test_pool().await;

    forbidden_word_queries::sync_all(&pool, &[word("담배", None, Some("10"))])
        .await
        .expect("sync failed");

    // lgroup is NULL on the stored word: any request lgroup matches
    let matching = ForbiddenWordFilter {
        lgroup: Some("99".to_string()),
        mgroup: Some("10".to_string()),
        ..Default::default()
    };
    let words = forbidden_word_queries::find_active(&pool, &matching)
        .await
        .unwrap();
    assert!(words.iter().any(|w| w.word == "담배"));

    // mgroup is scoped to 10: a request in mgroup 20 must not see it
    let non_matching = ForbiddenWordFilter {
        lgroup: Some("99".to_string()),
        mgroup: Some("20".to_string()),
        ..Default::default()
    };
    let words = forbidden_word_queries::find_active(&pool, &non_matching)
        .await
        .unwrap();
    assert!(!words.iter().any(|w| w.word == "담배"));
}

#[tokio::test]
#[ignore]
async fn claimed_requests_are_invisible_to_a_second_claim() {
    let pool = test_pool().await;
    let job_id = Uuid::new_v4().to_string();

    let requests: Vec<NewBatchRequest> =
        (0..5).map(|i| request(&format!("CLAIM{i:04}"))).collect();
    batch_queries::insert_requests(&pool, &job_id, &requests)
        .await
        .expect("insert failed");

    let claimed = batch_queries::find_pending(&pool, 1000).await.unwrap();
    let claimed_ids: Vec<i64> = claimed
        .iter()
        .filter(|r| r.batch_job_id == job_id)
        .map(|r| r.request_id)
        .collect();
    assert_eq!(claimed_ids.len(), 5);

    batch_queries::mark_processing(&pool, &claimed_ids)
        .await
        .expect("claim failed");

    // A second claim pass (deliberately racing against nothing here — the
    // update has committed) must see none of the claimed ids.
    let (second, third) = futures::join!(
        batch_queries::find_pending(&pool, 1000),
        batch_queries::find_pending(&pool, 1000),
    );
    for pass in [second.unwrap(), third.unwrap()] {
        assert!(pass.iter().all(|r| !claimed_ids.contains(&r.request_id)));
    }

    // Retry resets one row to PENDING, making it claimable again
    batch_queries::reset_for_retry(&pool, claimed_ids[0], "provider timeout")
        .await
        .expect("retry reset failed");

    let retried = batch_queries::find_pending(&pool, 1000).await.unwrap();
    let retried_row = retried
        .iter()
        .find(|r| r.request_id == claimed_ids[0])
        .expect("retried row should be pending again");
    assert_eq!(retried_row.retries, 1);
    assert_eq!(retried_row.error_message.as_deref(), Some("provider timeout"));

    // Terminal finalization takes the rest out of circulation for good
    for id in &claimed_ids[1..] {
        batch_queries::update_final_status(
            &pool,
            *id,
            BatchStatus::Completed,
            InspectionStatus::Completed,
            None,
            None,
        )
        .await
        .expect("finalize failed");
    }

    let last = batch_queries::find_pending(&pool, 1000).await.unwrap();
    assert!(last
        .iter()
        .all(|r| !claimed_ids[1..].contains(&r.request_id)));
}
