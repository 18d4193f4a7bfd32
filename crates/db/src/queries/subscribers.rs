use crate::models::SubscriberRow;
use sqlx::PgPool;

pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<SubscriberRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriberRow>(
        r#"
        SELECT id, channel_id, name, current_token, token_issued,
               last_ping, last_pong, created_at
        FROM subscribers
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list_by_channel(
    pool: &PgPool,
    channel_id: &str,
) -> Result<Vec<SubscriberRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriberRow>(
        r#"
        SELECT id, channel_id, name, current_token, token_issued,
               last_ping, last_pong, created_at
        FROM subscribers
        WHERE channel_id = $1
        ORDER BY id
        "#,
    )
    .bind(channel_id)
    .fetch_all(pool)
    .await
}

/// Insert a subscriber, or return the row already stored under its id.
/// The flag is true when this call created the row.
pub async fn insert_or_get(
    pool: &PgPool,
    row: &SubscriberRow,
) -> Result<(SubscriberRow, bool), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query_as::<_, SubscriberRow>(
        r#"
        INSERT INTO subscribers
            (id, channel_id, name, current_token, token_issued,
             last_ping, last_pong, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO NOTHING
        RETURNING id, channel_id, name, current_token, token_issued,
                  last_ping, last_pong, created_at
        "#,
    )
    .bind(&row.id)
    .bind(&row.channel_id)
    .bind(&row.name)
    .bind(&row.current_token)
    .bind(row.token_issued)
    .bind(row.last_ping)
    .bind(row.last_pong)
    .bind(row.created_at)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(inserted) = inserted {
        tx.commit().await?;
        return Ok((inserted, true));
    }

    let existing = sqlx::query_as::<_, SubscriberRow>(
        r#"
        SELECT id, channel_id, name, current_token, token_issued,
               last_ping, last_pong, created_at
        FROM subscribers
        WHERE id = $1
        "#,
    )
    .bind(&row.id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok((existing, false))
}

/// Write the mutable session columns of existing subscribers in one
/// transaction. Rows that no longer exist are left absent.
pub async fn update_sessions(pool: &PgPool, rows: &[SubscriberRow]) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for row in rows {
        update_session(&mut *tx, row).await?;
    }
    tx.commit().await
}

async fn update_session<'e, E>(executor: E, row: &SubscriberRow) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        UPDATE subscribers
        SET current_token = $2, token_issued = $3, last_ping = $4, last_pong = $5
        WHERE id = $1
        "#,
    )
    .bind(&row.id)
    .bind(&row.current_token)
    .bind(row.token_issued)
    .bind(row.last_ping)
    .bind(row.last_pong)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn delete_many(pool: &PgPool, ids: &[String]) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM subscribers
        WHERE id = ANY($1)
        "#,
    )
    .bind(ids)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
