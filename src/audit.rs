//! Append-only trail of who changed what.

use serde_json::Value;
use uuid::Uuid;

use crate::db::DbPool;

/// Writes one audit row. Failures are logged and swallowed so they never
/// fail the request that triggered them.
pub async fn record(
    pool: &DbPool,
    user_id: Option<Uuid>,
    action: &str,
    resource: &str,
    metadata: Value,
) {
    let inserted = sqlx::query(
        "INSERT INTO audit_logs (user_id, action, resource, metadata) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(action)
    .bind(resource)
    .bind(&metadata)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => tracing::debug!(action, resource, "audit recorded"),
        Err(err) => tracing::warn!(error = %err, action, resource, "audit log failed"),
    }
}
