use sqlx::{Row, SqlitePool};

use crate::identity::PlayerId;
use crate::session::Outcome;

/// Create all tables if they don't exist.
pub async fn init_db(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            github_id TEXT UNIQUE NOT NULL,
            username TEXT UNIQUE NOT NULL,
            avatar_url TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS stats (
            user_id INTEGER PRIMARY KEY,
            wins INTEGER NOT NULL DEFAULT 0,
            losses INTEGER NOT NULL DEFAULT 0,
            draws INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or update a user from the login flow. Returns the local user id.
pub async fn upsert_user(
    pool: &SqlitePool,
    github_id: &str,
    username: &str,
    avatar_url: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query(
        "INSERT INTO users (github_id, username, avatar_url)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(github_id) DO UPDATE SET username = ?2, avatar_url = ?3",
    )
    .bind(github_id)
    .bind(username)
    .bind(avatar_url)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT id FROM users WHERE github_id = ?1")
        .bind(github_id)
        .fetch_one(pool)
        .await?;
    let id = row.get::<i64, _>("id");

    // New players start with a zeroed stats row.
    sqlx::query("INSERT OR IGNORE INTO stats (user_id) VALUES (?1)")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(id)
}

/// Create a new session token for the given user. Returns the token string.
pub async fn create_session(pool: &SqlitePool, user_id: i64) -> Result<String, sqlx::Error> {
    let token: String = {
        use rand::RngExt;
        let mut rng = rand::rng();
        (0..64)
            .map(|_| {
                let idx = rng.random_range(0..36u8);
                if idx < 10 {
                    (b'0' + idx) as char
                } else {
                    (b'a' + idx - 10) as char
                }
            })
            .collect()
    };

    // Expire in 30 days
    sqlx::query(
        "INSERT INTO sessions (token, user_id, expires_at)
         VALUES (?1, ?2, datetime('now', '+30 days'))",
    )
    .bind(&token)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(token)
}

/// Look up the user behind an unexpired session token.
pub async fn get_session_user(
    pool: &SqlitePool,
    token: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT u.id, u.github_id, u.username, u.avatar_url FROM sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(user_from_row))
}

/// Revoke a session token. Returns whether a token was removed.
pub async fn delete_session(pool: &SqlitePool, token: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE token = ?1")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Get a user by id.
#[cfg(test)]
pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<UserRow>, sqlx::Error> {
    let row = sqlx::query("SELECT id, github_id, username, avatar_url FROM users WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(user_from_row))
}

/// Bump one counter for a finished game.
pub async fn record_outcome(
    pool: &SqlitePool,
    player: PlayerId,
    outcome: Outcome,
) -> Result<(), sqlx::Error> {
    let (wins, losses, draws) = match outcome {
        Outcome::Win => (1, 0, 0),
        Outcome::Loss => (0, 1, 0),
        Outcome::Draw => (0, 0, 1),
    };

    sqlx::query(
        "INSERT INTO stats (user_id, wins, losses, draws)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            wins = wins + excluded.wins,
            losses = losses + excluded.losses,
            draws = draws + excluded.draws",
    )
    .bind(player)
    .bind(wins)
    .bind(losses)
    .bind(draws)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_stats(pool: &SqlitePool, player: PlayerId) -> Result<Option<StatsRow>, sqlx::Error> {
    let row = sqlx::query("SELECT user_id, wins, losses, draws FROM stats WHERE user_id = ?1")
        .bind(player)
        .fetch_optional(pool)
        .await?;

    // Counters that no longer fit a u32 are a decode error, not a wrap.
    row.map(|r| -> Result<StatsRow, sqlx::Error> {
        Ok(StatsRow {
            user_id: r.try_get("user_id")?,
            wins: r.try_get("wins")?,
            losses: r.try_get("losses")?,
            draws: r.try_get("draws")?,
        })
    })
    .transpose()
}

fn user_from_row(r: sqlx::sqlite::SqliteRow) -> UserRow {
    UserRow {
        id: r.get("id"),
        github_id: r.get("github_id"),
        username: r.get("username"),
        avatar_url: r.get("avatar_url"),
    }
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub github_id: String,
    pub username: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone)]
pub struct StatsRow {
    pub user_id: i64,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_db(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_account() {
        let pool = pool().await;
        let first = upsert_user(&pool, "gh-7", "carol", "").await.unwrap();
        let second = upsert_user(&pool, "gh-7", "carol2", "https://a/c.png")
            .await
            .unwrap();
        assert_eq!(first, second);

        let user = get_user(&pool, first).await.unwrap().unwrap();
        assert_eq!(user.username, "carol2");
        assert_eq!(user.avatar_url, "https://a/c.png");
    }

    #[tokio::test]
    async fn outcomes_accumulate() {
        let pool = pool().await;
        let id = upsert_user(&pool, "gh-1", "dave", "").await.unwrap();

        let fresh = get_stats(&pool, id).await.unwrap().unwrap();
        assert_eq!((fresh.wins, fresh.losses, fresh.draws), (0, 0, 0));

        record_outcome(&pool, id, Outcome::Win).await.unwrap();
        record_outcome(&pool, id, Outcome::Win).await.unwrap();
        record_outcome(&pool, id, Outcome::Draw).await.unwrap();
        record_outcome(&pool, id, Outcome::Loss).await.unwrap();

        let stats = get_stats(&pool, id).await.unwrap().unwrap();
        assert_eq!((stats.wins, stats.losses, stats.draws), (2, 1, 1));
        assert!(get_stats(&pool, id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_counters_fail_instead_of_wrapping() {
        let pool = pool().await;
        let id = upsert_user(&pool, "gh-3", "frank", "").await.unwrap();
        sqlx::query("UPDATE stats SET wins = ?1 WHERE user_id = ?2")
            .bind(i64::from(u32::MAX) + 1)
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();

        assert!(get_stats(&pool, id).await.is_err());
    }

    #[tokio::test]
    async fn deleted_sessions_stop_resolving() {
        let pool = pool().await;
        let id = upsert_user(&pool, "gh-2", "erin", "").await.unwrap();
        let token = create_session(&pool, id).await.unwrap();
        assert_eq!(token.len(), 64);

        assert_eq!(get_session_user(&pool, &token).await.unwrap().unwrap().id, id);
        assert!(delete_session(&pool, &token).await.unwrap());
        assert!(get_session_user(&pool, &token).await.unwrap().is_none());
        assert!(!delete_session(&pool, &token).await.unwrap());
    }
}
