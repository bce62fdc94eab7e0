use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};

use crate::models::batch::{
    BatchRequest, BatchStatus, IngestStatus, InspectionStatus, NewBatchRequest, ResultQuery,
};

/// Rows inserted per statement when bulk-loading a batch job.
const INSERT_CHUNK: usize = 100;

fn map_request(row: &PgRow) -> Result<BatchRequest, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let inspection_status: Option<String> = row.try_get("inspection_status")?;

    Ok(BatchRequest {
        request_id: row.try_get("request_id")?,
        batch_job_id: row.try_get("batch_job_id")?,
        status: status.parse::<BatchStatus>().unwrap_or(BatchStatus::Pending),
        inspection_status: inspection_status.and_then(|s| s.parse::<InspectionStatus>().ok()),
        goods_code: row.try_get("goods_code")?,
        goods_name: row.try_get("goods_name")?,
        mobile_goods_name: row.try_get("mobile_goods_name")?,
        sale_price: row.try_get("sale_price")?,
        buy_price: row.try_get("buy_price")?,
        goods_info: row.try_get("goods_info")?,
        image_html: row.try_get("image_html")?,
        representative_file: row.try_get("representative_file")?,
        lgroup: row.try_get("lgroup")?,
        lgroup_name: row.try_get("lgroup_name")?,
        mgroup: row.try_get("mgroup")?,
        mgroup_name: row.try_get("mgroup_name")?,
        sgroup: row.try_get("sgroup")?,
        sgroup_name: row.try_get("sgroup_name")?,
        dgroup: row.try_get("dgroup")?,
        dgroup_name: row.try_get("dgroup_name")?,
        forbidden_word: row.try_get("forbidden_word")?,
        error_message: row.try_get("error_message")?,
        retries: row.try_get("retries")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Bulk-insert the rows of one batch job as PENDING requests.
pub async fn insert_requests(
    pool: &PgPool,
    batch_job_id: &str,
    requests: &[NewBatchRequest],
) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;

    for chunk in requests.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO goods_batch_request (\
             batch_job_id, status, goods_code, goods_name, mobile_goods_name, \
             sale_price, buy_price, goods_info, image_html, representative_file, \
             lgroup, lgroup_name, mgroup, mgroup_name, sgroup, sgroup_name, \
             dgroup, dgroup_name) ",
        );

        qb.push_values(chunk, |mut b, request| {
            b.push_bind(batch_job_id)
                .push_bind(BatchStatus::Pending.to_string())
                .push_bind(&request.goods_code)
                .push_bind(&request.goods_name)
                .push_bind(&request.mobile_goods_name)
                .push_bind(request.sale_price)
                .push_bind(request.buy_price)
                .push_bind(&request.goods_info)
                .push_bind(&request.image_html)
                .push_bind(&request.representative_file)
                .push_bind(&request.lgroup)
                .push_bind(&request.lgroup_name)
                .push_bind(&request.mgroup)
                .push_bind(&request.mgroup_name)
                .push_bind(&request.sgroup)
                .push_bind(&request.sgroup_name)
                .push_bind(&request.dgroup)
                .push_bind(&request.dgroup_name);
        });

        let result = qb.build().execute(pool).await?;
        inserted += result.rows_affected();
    }

    Ok(inserted)
}

/// Fetch up to `limit` PENDING requests in ascending product-code order.
pub async fn find_pending(pool: &PgPool, limit: i64) -> Result<Vec<BatchRequest>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM goods_batch_request
        WHERE status = 'PENDING'
        ORDER BY goods_code ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_request).collect()
}

/// Claim a set of requests by moving them PENDING -> PROCESSING in one
/// statement. This is the queue's only mutual-exclusion mechanism; two
/// invocations racing between the read and this update can still claim the
/// same rows, which the pipeline tolerates (finalization is last-write-wins).
pub async fn mark_processing(pool: &PgPool, ids: &[i64]) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE goods_batch_request
        SET status = 'PROCESSING', updated_at = NOW()
        WHERE request_id = ANY($1) AND status = 'PENDING'
        "#,
    )
    .bind(ids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Write a terminal (or rejected) outcome for one request.
pub async fn update_final_status(
    pool: &PgPool,
    request_id: i64,
    status: BatchStatus,
    inspection_status: InspectionStatus,
    forbidden_word: Option<&str>,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE goods_batch_request
        SET status = $1,
            inspection_status = $2,
            forbidden_word = $3,
            error_message = $4,
            updated_at = NOW()
        WHERE request_id = $5
        "#,
    )
    .bind(status.to_string())
    .bind(inspection_status.to_string())
    .bind(forbidden_word)
    .bind(error_message)
    .bind(request_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Bump the retry counter and put the request back on the queue so the next
/// run picks it up.
pub async fn reset_for_retry(
    pool: &PgPool,
    request_id: i64,
    error_message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE goods_batch_request
        SET retries = retries + 1,
            status = 'PENDING',
            error_message = $1,
            updated_at = NOW()
        WHERE request_id = $2
        "#,
    )
    .bind(error_message)
    .bind(request_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Batch jobs whose rows are all older than the retention window.
pub async fn find_expired_jobs(pool: &PgPool, days: i32) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT a.batch_job_id
        FROM goods_batch_request a
        WHERE a.created_at <= NOW() - make_interval(days => $1)
          AND NOT EXISTS (
              SELECT 1 FROM goods_batch_request aa
              WHERE aa.batch_job_id = a.batch_job_id
                AND aa.created_at > NOW() - make_interval(days => $1)
          )
        "#,
    )
    .bind(days)
    .fetch_all(pool)
    .await?;

    rows.iter().map(|r| r.try_get("batch_job_id")).collect()
}

/// Delete the rows of every expired batch job.
pub async fn delete_expired_jobs(pool: &PgPool, days: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM goods_batch_request a
        WHERE a.created_at <= NOW() - make_interval(days => $1)
          AND NOT EXISTS (
              SELECT 1 FROM goods_batch_request aa
              WHERE aa.batch_job_id = a.batch_job_id
                AND aa.created_at > NOW() - make_interval(days => $1)
          )
        "#,
    )
    .bind(days)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Read the ingestion gate for one day.
///
/// More than one usable row for a day is an invariant breach and is
/// surfaced as `Error`, never repaired here. Unrecognized stored values
/// also map to `Error` so the pipeline fails closed.
pub async fn daily_status(pool: &PgPool, yyyymmdd: &str) -> Result<IngestStatus, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT status FROM goods_batch_in
        WHERE use_yn = 'Y' AND yyyymmdd = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(yyyymmdd)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(IngestStatus::None);
    }
    if rows.len() > 1 {
        return Ok(IngestStatus::Error);
    }

    let status: String = rows[0].try_get("status")?;
    Ok(match status.to_uppercase().as_str() {
        "PENDING" => IngestStatus::Pending,
        "SUCCESS" => IngestStatus::Success,
        _ => IngestStatus::Error,
    })
}

/// Record today's gate status with an update-else-insert sequence.
///
/// The first writer of the day inserts the row; later writers transition it
/// out of PENDING/FAILED. Deliberately not a single atomic upsert — the gate
/// accepts the narrow duplicate-insert window and surfaces it via
/// `daily_status` returning `Error`.
pub async fn record_daily_status(pool: &PgPool, status: IngestStatus) -> Result<bool, sqlx::Error> {
    if !matches!(
        status,
        IngestStatus::Pending | IngestStatus::Success | IngestStatus::Failed
    ) {
        return Ok(false);
    }

    let updated = sqlx::query(
        r#"
        UPDATE goods_batch_in
        SET status = $1, modified_at = NOW()
        WHERE yyyymmdd = TO_CHAR(NOW(), 'YYYYMMDD')
          AND use_yn = 'Y'
          AND status IN ('PENDING', 'FAILED')
        "#,
    )
    .bind(status.to_string())
    .execute(pool)
    .await?;

    if updated.rows_affected() > 0 {
        return Ok(true);
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO goods_batch_in (yyyymmdd, use_yn, status)
        VALUES (TO_CHAR(NOW(), 'YYYYMMDD'), 'Y', $1)
        "#,
    )
    .bind(status.to_string())
    .execute(pool)
    .await?;

    Ok(inserted.rows_affected() > 0)
}

/// Drop the day's gate row entirely so the next tick within the same day's
/// polling window sees `None` and retries. Used only when an import ran but
/// found nothing ready.
pub async fn cancel_daily_status(pool: &PgPool, yyyymmdd: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM goods_batch_in WHERE yyyymmdd = $1 AND use_yn = 'Y'")
        .bind(yyyymmdd)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn push_opt_eq(qb: &mut QueryBuilder<'_, sqlx::Postgres>, column: &str, value: &Option<String>) {
    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
        qb.push(" AND ")
            .push(column)
            .push(" = ")
            .push_bind(v.to_owned());
    }
}

fn push_opt_like(qb: &mut QueryBuilder<'_, sqlx::Postgres>, column: &str, value: &Option<String>) {
    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
        qb.push(" AND ")
            .push(column)
            .push(" LIKE ")
            .push_bind(format!("%{v}%"));
    }
}

/// Query processed requests by day/status/category filters. Every optional
/// filter becomes a bound parameter, never interpolated text.
pub async fn search_results(
    pool: &PgPool,
    query: &ResultQuery,
) -> Result<Vec<BatchRequest>, sqlx::Error> {
    let mut qb: QueryBuilder<sqlx::Postgres> =
        QueryBuilder::new("SELECT * FROM goods_batch_request WHERE 1 = 1");

    if let Some(day) = query.yyyymmdd.as_deref().filter(|d| !d.is_empty()) {
        qb.push(" AND TO_CHAR(created_at, 'YYYYMMDD') = ")
            .push_bind(day.to_owned());
    }
    push_opt_eq(&mut qb, "status", &query.status);
    push_opt_eq(&mut qb, "inspection_status", &query.inspection_status);
    push_opt_eq(&mut qb, "lgroup", &query.lgroup);
    push_opt_eq(&mut qb, "mgroup", &query.mgroup);
    push_opt_eq(&mut qb, "sgroup", &query.sgroup);
    push_opt_eq(&mut qb, "dgroup", &query.dgroup);
    push_opt_like(&mut qb, "forbidden_word", &query.forbidden_word);
    push_opt_eq(&mut qb, "goods_code", &query.goods_code);
    push_opt_like(&mut qb, "goods_name", &query.goods_name);

    qb.push(" ORDER BY goods_code ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(map_request).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_builder_binds_only_present_filters() {
        let query = ResultQuery {
            yyyymmdd: Some("20250926".into()),
            status: Some("COMPLETED".into()),
            goods_name: Some("담배".into()),
            ..Default::default()
        };

        let mut qb: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT * FROM goods_batch_request WHERE 1 = 1");
        if let Some(day) = query.yyyymmdd.as_deref() {
            qb.push(" AND TO_CHAR(created_at, 'YYYYMMDD') = ")
                .push_bind(day.to_owned());
        }
        push_opt_eq(&mut qb, "status", &query.status);
        push_opt_eq(&mut qb, "lgroup", &query.lgroup);
        push_opt_like(&mut qb, "goods_name", &query.goods_name);

        let sql = qb.sql();
        assert!(sql.contains("TO_CHAR(created_at, 'YYYYMMDD') = $1"));
        assert!(sql.contains("status = $2"));
        assert!(sql.contains("goods_name LIKE $3"));
        assert!(!sql.contains("lgroup"));
    }

    #[test]
    fn empty_filter_values_add_no_predicates() {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT 1 WHERE 1 = 1");
        push_opt_eq(&mut qb, "status", &Some(String::new()));
        push_opt_like(&mut qb, "goods_name", &None);
        assert_eq!(qb.sql(), "SELECT 1 WHERE 1 = 1");
    }
}
