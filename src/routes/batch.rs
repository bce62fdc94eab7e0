use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::db::batch_queries;
use crate::models::batch::{ApiResponse, BatchRequest, ResultQuery};
use crate::services::processor;

/// GET /goods-batch/inspect — manually re-run the ingestion tick.
///
/// The tick runs in the background; the gate itself guarantees a repeat
/// trigger on an already-ingested day is a no-op.
pub async fn trigger_ingestion(State(state): State<AppState>) -> Json<ApiResponse<()>> {
    tokio::spawn(async move {
        processor::run_ingestion_tick(&state).await;
    });

    Json(ApiResponse::accepted(
        "배치 처리 요청이 성공적으로 접수되었습니다. 처리 완료 후 결과를 확인하세요.",
    ))
}

/// GET /goods-batch/get-results — query processed requests by day, status,
/// and category filters.
pub async fn get_results(
    State(state): State<AppState>,
    Query(query): Query<ResultQuery>,
) -> Result<Json<ApiResponse<Vec<BatchRequest>>>, StatusCode> {
    query.validate().map_err(|_| StatusCode::BAD_REQUEST)?;

    let results = batch_queries::search_results(&state.db, &query)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Result query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(ApiResponse::success(
        "상품 검수 결과를 성공적으로 조회했습니다.",
        results,
    )))
}
