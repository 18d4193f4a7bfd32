use crate::models::ChannelRow;
use sqlx::PgPool;

pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>(
        r#"
        SELECT id, ping_interval, max_token_age, created_at
        FROM channels
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Insert the channel unless it exists, then return the stored row. An
/// existing channel keeps its settings.
pub async fn get_or_create(
    pool: &PgPool,
    id: &str,
    ping_interval: i64,
    max_token_age: i64,
) -> Result<ChannelRow, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO channels (id, ping_interval, max_token_age)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(ping_interval)
    .bind(max_token_age)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, ChannelRow>(
        r#"
        SELECT id, ping_interval, max_token_age, created_at
        FROM channels
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
}
