//! The public activity feed: one row per `created` / `pushed` / `joined` /
//! `published` event, attributed to the user who caused it.

use sqlx::PgPool;
use uuid::Uuid;

pub struct ActivityEntry<'a> {
    pub user_id: Uuid,
    pub verb: &'a str,
    pub subject_type: &'a str,
    pub subject_id: &'a str,
    pub content: Option<&'a str>,
}

/// Record an activity. Failures are logged but never propagated — a lost
/// feed entry must not fail the request that produced it.
pub async fn write_activity(pool: &PgPool, entry: &ActivityEntry<'_>) {
    let result = sqlx::query!(
        r#"
        INSERT INTO activities (user_id, verb, subject_type, subject_id, content)
        VALUES ($1, $2, $3, $4, $5)
        "#,
        entry.user_id,
        entry.verb,
        entry.subject_type,
        entry.subject_id,
        entry.content,
    )
    .execute(pool)
    .await;

    if let Err(err) = result {
        tracing::warn!(error = %err, verb = entry.verb, "failed to record activity");
    }
}
