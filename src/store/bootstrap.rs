use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::password;

/// First-run setup: if no users exist yet, create a single admin account
/// so there's a way into the platform at all. No-op on every later start.
#[tracing::instrument(skip(pool, admin_password), err)]
pub async fn run(pool: &PgPool, admin_password: Option<&str>) -> anyhow::Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if count > 0 {
        tracing::info!("bootstrap skipped — users already exist");
        return Ok(());
    }

    tracing::info!("first run detected — creating admin account");

    let password = admin_password.unwrap_or("admin");
    let password_hash = password::hash_password(password)?;
    let admin_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, handle, email, password_hash, is_admin)
         VALUES ($1, 'admin', 'admin@localhost', $2, true)",
    )
    .bind(admin_id)
    .bind(&password_hash)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %admin_id, "admin user created");

    Ok(())
}
