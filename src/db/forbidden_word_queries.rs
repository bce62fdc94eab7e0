use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};

use crate::models::forbidden_word::{
    never_expires, ForbiddenWord, ForbiddenWordFilter, WordRecord,
};

fn map_word(row: &PgRow) -> Result<ForbiddenWord, sqlx::Error> {
    Ok(ForbiddenWord {
        forbidden_word_id: row.try_get("forbidden_word_id")?,
        word: row.try_get("word")?,
        company_code: row.try_get("company_code")?,
        lgroup: row.try_get("lgroup")?,
        mgroup: row.try_get("mgroup")?,
        sgroup: row.try_get("sgroup")?,
        dgroup: row.try_get("dgroup")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// NULL-safe equality: a stored NULL matches only an incoming NULL. Used to
/// find the already-active row for the same key during synchronization.
fn push_null_safe_eq(
    qb: &mut QueryBuilder<'_, sqlx::Postgres>,
    column: &str,
    value: Option<&str>,
) {
    qb.push(" AND ")
        .push(column)
        .push(" IS NOT DISTINCT FROM ")
        .push_bind(value.map(str::to_owned));
}

/// Wildcard match: a stored NULL matches any request value. Used when
/// resolving the words that apply to a listing. A request without a value at
/// some level adds no predicate for that level at all.
fn push_wildcard_eq(
    qb: &mut QueryBuilder<'_, sqlx::Postgres>,
    column: &str,
    value: Option<&str>,
) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        qb.push(" AND (")
            .push(column)
            .push(" IS NULL OR ")
            .push(column)
            .push(" = ")
            .push_bind(v.to_owned())
            .push(")");
    }
}

/// Replace the currently-active word set with `words`, preserving history.
///
/// Runs as one transaction: a batch timestamp is read from the database
/// clock, each incoming word either refreshes its already-active row
/// (NULL-safe key match on word + all four group levels) or is inserted
/// fresh, and finally every active word the batch did not touch is
/// soft-deleted by moving its end date to yesterday. Rolling back on any
/// error means a failed sync leaves the previous active set intact.
pub async fn sync_all(pool: &PgPool, words: &[WordRecord]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    // Database clock, not the application clock: updated_at comparisons
    // below must not be skewed against NOW() on the server.
    let batch_start: DateTime<Utc> = sqlx::query_scalar("SELECT CURRENT_TIMESTAMP")
        .fetch_one(&mut *tx)
        .await?;

    for word in words {
        let mut qb: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("UPDATE forbidden_words SET end_date = ");
        qb.push_bind(never_expires())
            .push(", reason = ")
            .push_bind(word.reason.clone())
            .push(", updated_at = ")
            .push_bind(batch_start)
            .push(" WHERE word = ")
            .push_bind(word.word.clone())
            .push(" AND end_date > CURRENT_DATE AND start_date <= CURRENT_DATE");
        push_null_safe_eq(&mut qb, "lgroup", word.lgroup.as_deref());
        push_null_safe_eq(&mut qb, "mgroup", word.mgroup.as_deref());
        push_null_safe_eq(&mut qb, "sgroup", word.sgroup.as_deref());
        push_null_safe_eq(&mut qb, "dgroup", word.dgroup.as_deref());

        let updated = qb.build().execute(&mut *tx).await?;
        if updated.rows_affected() > 0 {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO forbidden_words
                (word, company_code, lgroup, mgroup, sgroup, dgroup,
                 start_date, end_date, reason, created_at, updated_at)
            VALUES ($1, NULL, $2, $3, $4, $5, CURRENT_DATE, $6, $7, $8, $8)
            "#,
        )
        .bind(&word.word)
        .bind(&word.lgroup)
        .bind(&word.mgroup)
        .bind(&word.sgroup)
        .bind(&word.dgroup)
        .bind(never_expires())
        .bind(&word.reason)
        .bind(batch_start)
        .execute(&mut *tx)
        .await?;
    }

    // Everything active that this batch did not touch is no longer on the
    // list: soft-delete it. Runs after all upserts so the active set never
    // has a false-empty moment.
    sqlx::query(
        r#"
        UPDATE forbidden_words
        SET end_date = CURRENT_DATE - 1
        WHERE updated_at < $1
          AND end_date >= CURRENT_DATE
          AND start_date <= CURRENT_DATE
        "#,
    )
    .bind(batch_start)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Active words applicable to a listing's category scope. Stored NULLs act
/// as wildcards; levels the listing itself lacks are not constrained.
pub async fn find_active(
    pool: &PgPool,
    filter: &ForbiddenWordFilter,
) -> Result<Vec<ForbiddenWord>, sqlx::Error> {
    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        "SELECT * FROM forbidden_words \
         WHERE start_date <= CURRENT_DATE AND end_date >= CURRENT_DATE",
    );
    push_wildcard_eq(&mut qb, "lgroup", filter.lgroup.as_deref());
    push_wildcard_eq(&mut qb, "mgroup", filter.mgroup.as_deref());
    push_wildcard_eq(&mut qb, "sgroup", filter.sgroup.as_deref());
    push_wildcard_eq(&mut qb, "dgroup", filter.dgroup.as_deref());

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(map_word).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_safe_predicate_matches_null_against_null_only() {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("UPDATE t SET x = 1 WHERE 1 = 1");
        push_null_safe_eq(&mut qb, "lgroup", None);
        push_null_safe_eq(&mut qb, "mgroup", Some("10"));

        let sql = qb.sql();
        // both levels always constrain, NULL included
        assert!(sql.contains("lgroup IS NOT DISTINCT FROM $1"));
        assert!(sql.contains("mgroup IS NOT DISTINCT FROM $2"));
    }

    #[test]
    fn wildcard_predicate_lets_stored_null_match_anything() {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT 1 WHERE 1 = 1");
        push_wildcard_eq(&mut qb, "lgroup", Some("99"));
        push_wildcard_eq(&mut qb, "mgroup", Some("10"));

        let sql = qb.sql();
        assert!(sql.contains("(lgroup IS NULL OR lgroup = $1)"));
        assert!(sql.contains("(mgroup IS NULL OR mgroup = $2)"));
    }

    #[test]
    fn wildcard_predicate_skips_unscoped_request_levels() {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT 1 WHERE 1 = 1");
        push_wildcard_eq(&mut qb, "lgroup", None);
        push_wildcard_eq(&mut qb, "sgroup", Some(""));
        assert_eq!(qb.sql(), "SELECT 1 WHERE 1 = 1");
    }
}
