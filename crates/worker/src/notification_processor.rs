//! Notification Outbox Processor
//!
//! Drains `notification_outbox` rows written by the API and delivers them
//! through Resend, retrying failed sends with a back-off window.

use fleetseat_api::email::ResendMailer;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Rows claimed per run
const BATCH_SIZE: i64 = 10;

/// What a failed send leaves behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Picked up again after the back-off window
    Retry,
    /// Out of attempts, left as `failed` for inspection
    GiveUp,
}

/// `attempts` already counts the send that just failed
pub fn failure_disposition(attempts: i32, max_attempts: i32) -> FailureDisposition {
    if attempts >= max_attempts {
        FailureDisposition::GiveUp
    } else {
        FailureDisposition::Retry
    }
}

pub type OutboxRow = (Uuid, String, String, Option<String>, Value, i32, i32);

/// Claim up to `BATCH_SIZE` deliverable rows and mark them `processing`.
///
/// A row left in `processing` by a worker that died mid-send is claimable
/// again once its back-off window has passed, while attempts remain.
pub async fn claim_batch(pool: &PgPool) -> Result<Vec<OutboxRow>, sqlx::Error> {
    // Claim and mark in one statement so concurrent workers never share a row
    sqlx::query_as(
        r#"
        UPDATE notification_outbox
        SET status = 'processing', last_attempt_at = NOW(), attempts = attempts + 1
        WHERE id IN (
            SELECT id FROM notification_outbox
            WHERE (
                    status = 'pending'
                    OR (status IN ('failed', 'processing') AND attempts < max_attempts)
                  )
              AND (last_attempt_at IS NULL OR last_attempt_at < NOW() - INTERVAL '5 minutes')
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, template_key, recipient, bcc, template_data, attempts, max_attempts
        "#,
    )
    .bind(BATCH_SIZE)
    .fetch_all(pool)
    .await
}

/// Deliver pending notifications from the outbox
pub async fn process_notification_outbox(pool: &PgPool, mailer: &ResendMailer) {
    let rows = match claim_batch(pool).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Failed to claim notifications from outbox");
            return;
        }
    };

    if rows.is_empty() {
        return;
    }

    info!(count = rows.len(), "Delivering notifications from outbox");

    for (id, template_key, recipient, bcc, data, attempts, max_attempts) in rows {
        match mailer
            .send(&template_key, &data, &recipient, bcc.as_deref())
            .await
        {
            Ok(()) => {
                if let Err(e) = sqlx::query(
                    "UPDATE notification_outbox SET status = 'completed', processed_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .execute(pool)
                .await
                {
                    error!(notification_id = %id, error = %e, "Failed to mark notification as completed");
                }
            }
            Err(e) => {
                let error_msg = e.to_string();
                let disposition = failure_disposition(attempts, max_attempts);
                // Only terminal failures get a processed_at, which the cleanup job keys on
                let query = match disposition {
                    FailureDisposition::Retry => {
                        "UPDATE notification_outbox SET status = 'failed', last_error = $1 WHERE id = $2"
                    }
                    FailureDisposition::GiveUp => {
                        "UPDATE notification_outbox SET status = 'failed', last_error = $1, processed_at = NOW() WHERE id = $2"
                    }
                };
                if let Err(e) = sqlx::query(query)
                    .bind(&error_msg)
                    .bind(id)
                    .execute(pool)
                    .await
                {
                    error!(notification_id = %id, error = %e, "Failed to mark notification as failed");
                }

                match disposition {
                    FailureDisposition::GiveUp => error!(
                        notification_id = %id,
                        template_key = %template_key,
                        attempts = attempts,
                        error = %error_msg,
                        "Notification permanently failed after max retries"
                    ),
                    FailureDisposition::Retry => warn!(
                        notification_id = %id,
                        template_key = %template_key,
                        attempts = attempts,
                        max_attempts = max_attempts,
                        error = %error_msg,
                        "Notification delivery failed, will retry"
                    ),
                }
            }
        }
    }
}

/// Delete delivered and abandoned notifications older than the retention window
pub async fn cleanup_old_notifications(pool: &PgPool, retention_days: i32) {
    let result = sqlx::query(
        r#"
        DELETE FROM notification_outbox
        WHERE (processed_at < NOW() - ($1 || ' days')::INTERVAL
               AND status IN ('completed', 'failed'))
           -- Crashed mid-send on the final attempt
           OR (status = 'processing'
               AND attempts >= max_attempts
               AND last_attempt_at < NOW() - ($1 || ' days')::INTERVAL)
        "#,
    )
    .bind(retention_days.to_string())
    .execute(pool)
    .await;

    match result {
        Ok(rows) if rows.rows_affected() > 0 => {
            info!(
                deleted = rows.rows_affected(),
                retention_days = retention_days,
                "Cleaned up old outbox entries"
            );
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to clean up notification outbox"),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serial_test::serial;

    #[test]
    fn test_failure_disposition() {
        assert_eq!(failure_disposition(1, 5), FailureDisposition::Retry);
        assert_eq!(failure_disposition(4, 5), FailureDisposition::Retry);
        assert_eq!(failure_disposition(5, 5), FailureDisposition::GiveUp);
        assert_eq!(failure_disposition(6, 5), FailureDisposition::GiveUp);
    }

    async fn test_pool() -> PgPool {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set to run outbox tests");
        let pool = fleetseat_shared::create_pool(&database_url, 2).await.unwrap();
        fleetseat_shared::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn insert_row(pool: &PgPool, status: &str, attempts: i32, minutes_ago: i32) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notification_outbox
                (id, template_key, recipient, status, attempts, last_attempt_at, created_at)
            VALUES ($1, 'invitation-accepted', 'owner@example.com', $2, $3,
                    NOW() - ($4 || ' minutes')::INTERVAL, NOW() - INTERVAL '1 day')
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(attempts)
        .bind(minutes_ago.to_string())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    #[ignore = "Requires DATABASE_URL"]
    #[serial(sqlx_db)]
    async fn test_stale_processing_rows_are_reclaimed() {
        let pool = test_pool().await;
        let stale = insert_row(&pool, "processing", 1, 10).await;
        let in_flight = insert_row(&pool, "processing", 1, 1).await;
        let exhausted = insert_row(&pool, "processing", 5, 10).await;

        let claimed = claim_batch(&pool).await.unwrap();
        let claimed_ids: Vec<Uuid> = claimed.iter().map(|row| row.0).collect();

        assert!(claimed_ids.contains(&stale));
        assert!(!claimed_ids.contains(&in_flight));
        assert!(!claimed_ids.contains(&exhausted));
        let attempts = claimed.iter().find(|row| row.0 == stale).unwrap().5;
        assert_eq!(attempts, 2);

        sqlx::query("DELETE FROM notification_outbox WHERE id = ANY($1)")
            .bind(vec![stale, in_flight, exhausted])
            .execute(&pool)
            .await
            .unwrap();
    }
}
