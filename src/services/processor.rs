use chrono::Local;
use std::future::Future;
use std::path::Path;
use std::time::Instant;

use crate::app_state::AppState;
use crate::db::{batch_queries, forbidden_word_queries};
use crate::models::batch::{BatchRequest, BatchStatus, IngestStatus, InspectionStatus};
use crate::models::forbidden_word::ForbiddenWordFilter;
use crate::models::goods::Goods;
use crate::models::verdict::InspectionVerdict;
use crate::services::images::ImagePart;
use crate::services::importer::{self, ArchiveRole};
use crate::services::inspector::{InspectError, Inspector};

/// Terminal error messages are capped at this many characters.
const ERROR_MESSAGE_MAX: usize = 200;

pub fn today_stamp() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// One ingestion-gate pass: pull today's export archives at most once per
/// outcome. Re-triggerable while nothing is ready, and never propagates an
/// error to the scheduler — failure is recorded in the gate itself.
pub async fn run_ingestion_tick(state: &AppState) {
    let today = today_stamp();
    tracing::info!(day = %today, "Ingestion tick started");

    let status = match batch_queries::daily_status(&state.db, &today).await {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read ingestion gate");
            return;
        }
    };

    if status != IngestStatus::None {
        tracing::info!(%status, "Ingestion already recorded for today, skipping");
        return;
    }

    if let Err(e) = batch_queries::record_daily_status(&state.db, IngestStatus::Pending).await {
        tracing::error!(error = %e, "Failed to record PENDING gate status");
        return;
    }

    match gather_archives(state, &today).await {
        Ok(imported) if imported > 0 => {
            if let Err(e) =
                batch_queries::record_daily_status(&state.db, IngestStatus::Success).await
            {
                tracing::error!(error = %e, "Failed to record SUCCESS gate status");
            }
            tracing::info!(files = imported, "Ingestion complete, gate set to SUCCESS");
        }
        Ok(_) => {
            // Nothing was ready yet. Clearing the row lets the next tick in
            // today's polling window see NONE and try again.
            if let Err(e) = batch_queries::cancel_daily_status(&state.db, &today).await {
                tracing::error!(error = %e, "Failed to reset gate after empty poll");
            }
            tracing::info!("No archives ready, gate reset for retry");
        }
        Err(e) => {
            tracing::error!(error = %e, "Ingestion failed");
            if let Err(e) =
                batch_queries::record_daily_status(&state.db, IngestStatus::Failed).await
            {
                tracing::error!(error = %e, "Failed to record FAILED gate status");
            }
        }
    }
}

/// List today's archives under the export prefix and import each one.
/// Returns the number of archives imported; any failure aborts the pass and
/// leaves the source objects in the store for the next window.
async fn gather_archives(state: &AppState, today: &str) -> Result<usize, ProcessError> {
    let objects = state.storage.list(&state.config.s3_prefix).await?;
    tracing::info!(
        count = objects.len(),
        prefix = %state.config.s3_prefix,
        "Listed export objects"
    );

    let data_dir = Path::new(&state.config.data_dir);
    let mut imported_files = 0;

    for object in objects {
        let key = &object.key;
        if key == &state.config.s3_prefix {
            continue;
        }
        if !key.to_lowercase().ends_with(".zip") {
            tracing::debug!(key = %key, "Not a ZIP archive, skipping");
            continue;
        }
        if !key.contains(today) {
            tracing::debug!(key = %key, "Not today's archive, skipping");
            continue;
        }
        if ArchiveRole::from_key(key).is_none() {
            tracing::debug!(key = %key, "No recognized role token, skipping");
            continue;
        }

        tracing::info!(key = %key, size = object.size, "Downloading archive");
        let data = state.storage.download(key).await?;
        importer::import_archive(&state.db, data_dir, &data, key).await?;
        imported_files += 1;
    }

    Ok(imported_files)
}

/// One processing-tick pass over the request queue: claim up to
/// `batch_count` PENDING rows, drive each to an outcome, then report the
/// whole batch.
pub async fn process_pending_requests(state: &AppState, batch_count: i64) {
    let today = today_stamp();
    match batch_queries::daily_status(&state.db, &today).await {
        Ok(IngestStatus::Success) => {}
        Ok(status) => {
            tracing::debug!(%status, "Ingestion gate is not SUCCESS, skipping processing tick");
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read ingestion gate, skipping processing tick");
            return;
        }
    }

    let batch_count = clamp_batch_count(batch_count);
    tracing::info!(batch_count, "Processing tick started");

    let mut claimed = match batch_queries::find_pending(&state.db, batch_count).await {
        Ok(requests) => requests,
        Err(e) => {
            tracing::error!(error = %e, "Failed to fetch pending requests");
            return;
        }
    };
    if claimed.is_empty() {
        tracing::info!("No pending inspection requests");
        return;
    }

    let ids: Vec<i64> = claimed.iter().map(|r| r.request_id).collect();
    match batch_queries::mark_processing(&state.db, &ids).await {
        Ok(count) => tracing::info!(claimed = count, "Requests moved to PROCESSING"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to claim requests");
            return;
        }
    }

    metrics::counter!("inspection_requests_total").increment(claimed.len() as u64);

    for request in claimed.iter_mut() {
        tracing::debug!(request_id = request.request_id, "Inspection started");
        handle_request(state, request).await;
        tracing::info!(request_id = request.request_id, "Inspection finished");
    }

    state.dispatcher.send_batch_result(&claimed).await;
    tracing::info!("Processing tick finished");
}

/// Shared inspection orchestration: resolve nothing here — the caller has
/// already produced the term list. An empty list finalizes immediately with
/// no provider call; otherwise the images are loaded and the inspector runs.
pub async fn inspect_request<I, F, Fut>(
    inspector: &I,
    goods: &Goods,
    forbidden_terms: &str,
    load_images: F,
) -> Result<Option<InspectionVerdict>, InspectError>
where
    I: Inspector,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Vec<ImagePart>>,
{
    if forbidden_terms.is_empty() {
        return Ok(None);
    }

    let images = load_images().await;
    let started = Instant::now();
    let verdict = inspector.inspect(goods, &images, forbidden_terms).await?;
    metrics::histogram!("inspection_provider_seconds").record(started.elapsed().as_secs_f64());
    Ok(Some(verdict))
}

async fn attempt_inspection(
    state: &AppState,
    request: &BatchRequest,
) -> Result<Option<InspectionVerdict>, AttemptError> {
    let filter = ForbiddenWordFilter {
        lgroup: request.lgroup.clone(),
        mgroup: request.mgroup.clone(),
        sgroup: request.sgroup.clone(),
        dgroup: request.dgroup.clone(),
    };
    let words = forbidden_word_queries::find_active(&state.db, &filter).await?;
    let forbidden_terms = words
        .iter()
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let goods = request.to_goods();
    let verdict = inspect_request(state.inspector.as_ref(), &goods, &forbidden_terms, || {
        state.images.collect_parts(request)
    })
    .await?;

    Ok(verdict)
}

async fn handle_request(state: &AppState, request: &mut BatchRequest) {
    match attempt_inspection(state, request).await {
        Ok(None) => {
            // No applicable forbidden words: nothing to check for.
            finalize(
                state,
                request,
                InspectionStatus::Completed,
                None,
                Some("금칙어가 없습니다.".to_string()),
            )
            .await;
            metrics::counter!("inspection_approved_total").increment(1);
        }
        Ok(Some(verdict)) if verdict.approved => {
            finalize(state, request, InspectionStatus::Completed, None, None).await;
            metrics::counter!("inspection_approved_total").increment(1);
        }
        Ok(Some(verdict)) => {
            // Rejection is a normal business outcome, terminal and never retried.
            finalize(
                state,
                request,
                InspectionStatus::Failed,
                verdict.forbidden_word.clone(),
                Some(verdict.reason.clone()),
            )
            .await;
            metrics::counter!("inspection_rejected_total").increment(1);
        }
        Err(error) => match failure_disposition(request.retries, state.config.max_retries) {
            FailureDisposition::Retry => {
                let message = truncate_error(&error.to_string());
                tracing::info!(
                    request_id = request.request_id,
                    attempt = request.retries + 1,
                    error = %error,
                    "Inspection failed, resetting to PENDING for retry"
                );
                if let Err(e) =
                    batch_queries::reset_for_retry(&state.db, request.request_id, &message).await
                {
                    tracing::error!(request_id = request.request_id, error = %e, "Failed to reset request for retry");
                }
                request.status = BatchStatus::Pending;
                request.retries += 1;
                request.error_message = Some(message);
            }
            FailureDisposition::Terminal => {
                let message = final_error_message(&error);
                tracing::error!(
                    request_id = request.request_id,
                    retries = request.retries,
                    error_message = %message,
                    "Inspection failed terminally"
                );
                if let Err(e) = batch_queries::update_final_status(
                    &state.db,
                    request.request_id,
                    BatchStatus::Failed,
                    InspectionStatus::Failed,
                    None,
                    Some(&message),
                )
                .await
                {
                    tracing::error!(request_id = request.request_id, error = %e, "Failed to record terminal failure");
                }
                request.status = BatchStatus::Failed;
                request.inspection_status = Some(InspectionStatus::Failed);
                request.error_message = Some(message);
                metrics::counter!("inspection_failed_total").increment(1);
            }
        },
    }
}

async fn finalize(
    state: &AppState,
    request: &mut BatchRequest,
    inspection_status: InspectionStatus,
    forbidden_word: Option<String>,
    error_message: Option<String>,
) {
    if let Err(e) = batch_queries::update_final_status(
        &state.db,
        request.request_id,
        BatchStatus::Completed,
        inspection_status,
        forbidden_word.as_deref(),
        error_message.as_deref(),
    )
    .await
    {
        tracing::error!(request_id = request.request_id, error = %e, "Failed to finalize request");
    }

    request.status = BatchStatus::Completed;
    request.inspection_status = Some(inspection_status);
    request.forbidden_word = forbidden_word;
    request.error_message = error_message;
}

/// Garbage-collect finished batch jobs past the retention window: remove any
/// leftover scratch directories, then delete the rows.
pub async fn remove_old_records(state: &AppState, days: i32) {
    let job_ids = match batch_queries::find_expired_jobs(&state.db, days).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(error = %e, "Failed to look up expired batch jobs");
            return;
        }
    };
    if job_ids.is_empty() {
        tracing::debug!("No expired batch jobs");
        return;
    }

    for job_id in &job_ids {
        let dir = Path::new(&state.config.data_dir).join("batch").join(job_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => tracing::info!(batch_job_id = %job_id, "Removed batch job directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(batch_job_id = %job_id, "No directory left to remove");
            }
            Err(e) => {
                tracing::error!(batch_job_id = %job_id, error = %e, "Failed to remove batch job directory");
            }
        }
    }

    match batch_queries::delete_expired_jobs(&state.db, days).await {
        Ok(deleted) => tracing::info!(jobs = job_ids.len(), rows = deleted, "Expired batch jobs removed"),
        Err(e) => tracing::error!(error = %e, "Failed to delete expired batch rows"),
    }
}

/// A per-minute claim size outside (0, 1000] falls back to 100.
pub(crate) fn clamp_batch_count(batch_count: i64) -> i64 {
    if batch_count <= 0 || batch_count > 1000 {
        100
    } else {
        batch_count
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FailureDisposition {
    Retry,
    Terminal,
}

pub(crate) fn failure_disposition(retries: i32, max_retries: i32) -> FailureDisposition {
    if retries < max_retries {
        FailureDisposition::Retry
    } else {
        FailureDisposition::Terminal
    }
}

/// Terminal error text: prefer the provider's structured `error.message`
/// over raw body or exception text, capped at 200 characters.
fn final_error_message(error: &AttemptError) -> String {
    if let AttemptError::Inspect(InspectError::Provider { body, .. }) = error {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(message) = value.pointer("/error/message").and_then(|m| m.as_str()) {
                return truncate_error(message);
            }
        }
        if !body.is_empty() {
            return truncate_error(body);
        }
    }
    truncate_error(&error.to_string())
}

fn truncate_error(message: &str) -> String {
    if message.chars().count() > ERROR_MESSAGE_MAX {
        let mut truncated: String = message.chars().take(ERROR_MESSAGE_MAX - 5).collect();
        truncated.push_str("...");
        truncated
    } else {
        message.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Inspect(#[from] InspectError),
}

#[derive(Debug, thiserror::Error)]
enum ProcessError {
    #[error(transparent)]
    Storage(#[from] crate::services::storage::StorageError),

    #[error(transparent)]
    Import(#[from] crate::services::importer::ImportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockInspector {
        calls: AtomicUsize,
    }

    impl MockInspector {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Inspector for MockInspector {
        fn id(&self) -> &str {
            "mock"
        }

        async fn inspect(
            &self,
            _goods: &Goods,
            _images: &[ImagePart],
            _forbidden_terms: &str,
        ) -> Result<InspectionVerdict, InspectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InspectionVerdict::approve("mock"))
        }
    }

    fn goods() -> Goods {
        Goods {
            goods_code: "G001".into(),
            goods_name: "사과 3kg".into(),
            mobile_goods_name: "사과".into(),
            sale_price: 12000,
            buy_price: 9000,
            goods_info: String::new(),
            lgroup: Some("10".into()),
            mgroup: None,
            sgroup: None,
            dgroup: None,
        }
    }

    #[test]
    fn batch_count_is_clamped_to_the_valid_range() {
        assert_eq!(clamp_batch_count(0), 100);
        assert_eq!(clamp_batch_count(-5), 100);
        assert_eq!(clamp_batch_count(1001), 100);
        assert_eq!(clamp_batch_count(1), 1);
        assert_eq!(clamp_batch_count(1000), 1000);
    }

    #[tokio::test]
    async fn empty_term_list_skips_the_provider_entirely() {
        let inspector = MockInspector::new();
        let images_loaded = AtomicUsize::new(0);

        let verdict = inspect_request(&inspector, &goods(), "", || async {
            images_loaded.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        })
        .await
        .unwrap();

        assert!(verdict.is_none());
        assert_eq!(inspector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(images_loaded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_empty_terms_invoke_the_provider_once() {
        let inspector = MockInspector::new();

        let verdict = inspect_request(&inspector, &goods(), "담배,술", || async { Vec::new() })
            .await
            .unwrap();

        assert!(verdict.unwrap().approved);
        assert_eq!(inspector.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn four_consecutive_failures_end_terminal_with_three_retries() {
        let max_retries = 3;
        let mut retries = 0;
        let mut terminal = false;

        for _ in 0..4 {
            match failure_disposition(retries, max_retries) {
                FailureDisposition::Retry => retries += 1,
                FailureDisposition::Terminal => terminal = true,
            }
        }

        assert!(terminal);
        assert_eq!(retries, 3);
    }

    #[test]
    fn long_error_messages_are_truncated_to_the_cap() {
        let long = "금".repeat(300);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.chars().count(), ERROR_MESSAGE_MAX - 5 + 3);
        assert!(truncated.ends_with("..."));

        let short = "짧은 메시지";
        assert_eq!(truncate_error(short), short);
    }

    #[test]
    fn provider_error_message_is_preferred_over_the_raw_body() {
        let error = AttemptError::Inspect(InspectError::Provider {
            status: 400,
            body: r#"{"error":{"message":"Provided image is not valid.","code":400}}"#.into(),
        });
        assert_eq!(final_error_message(&error), "Provided image is not valid.");
    }

    #[test]
    fn unparseable_provider_body_is_used_verbatim() {
        let error = AttemptError::Inspect(InspectError::Provider {
            status: 503,
            body: "upstream unavailable".into(),
        });
        assert_eq!(final_error_message(&error), "upstream unavailable");
    }

    #[test]
    fn empty_provider_body_falls_back_to_the_error_text() {
        let error = AttemptError::Inspect(InspectError::Provider {
            status: 500,
            body: String::new(),
        });
        assert!(final_error_message(&error).contains("500"));
    }
}
