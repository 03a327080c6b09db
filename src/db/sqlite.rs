use crate::db::models::DbSession;
use crate::db::schema::SQLITE_INIT;
use crate::error::AutoPulseError;
use crate::types::Session;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

pub type SqlitePool = Pool<Sqlite>;

#[derive(Clone)]
pub struct SessionStorage {
    pool: SqlitePool,
}

impl SessionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url` and make
    /// sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, AutoPulseError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_opts)
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the schema by executing the bundled DDL.
    pub async fn init_schema(&self) -> Result<(), AutoPulseError> {
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Upsert the session stored under `key`.
    pub async fn save(&self, key: &str, session: &Session) -> Result<(), AutoPulseError> {
        let row = DbSession::from_session(key, session.clone());
        sqlx::query(
            r#"
            INSERT INTO auth_sessions (
                storage_key, user_id, email, access_token, refresh_token,
                expires_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(storage_key) DO UPDATE SET
                user_id=excluded.user_id,
                email=excluded.email,
                access_token=excluded.access_token,
                refresh_token=excluded.refresh_token,
                expires_at=excluded.expires_at,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(row.storage_key)
        .bind(row.user_id)
        .bind(row.email)
        .bind(row.access_token)
        .bind(row.refresh_token)
        .bind(row.expires_at.map(|t| t.to_rfc3339()))
        .bind(row.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load(&self, key: &str) -> Result<Option<Session>, AutoPulseError> {
        let row = sqlx::query(
            r#"SELECT storage_key, user_id, email, access_token, refresh_token,
               expires_at, updated_at
               FROM auth_sessions WHERE storage_key = ?"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_model)
            .transpose()
            .map(|m| m.map(Session::from))
    }

    pub async fn delete(&self, key: &str) -> Result<(), AutoPulseError> {
        sqlx::query("DELETE FROM auth_sessions WHERE storage_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_model(row: SqliteRow) -> Result<DbSession, AutoPulseError> {
        let expires_str: Option<String> = row.try_get("expires_at")?;
        let updated_str: String = row.try_get("updated_at")?;

        Ok(DbSession {
            storage_key: row.try_get("storage_key")?,
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            expires_at: expires_str.as_deref().map(parse_rfc3339).transpose()?,
            updated_at: parse_rfc3339(&updated_str)?,
        })
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, AutoPulseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;

    fn session(token: &str) -> Session {
        Session {
            access_token: token.to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            user: Identity {
                id: "u1".to_string(),
                email: Some("driver@example.com".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn save_overwrites_and_delete_forgets() {
        let storage = SessionStorage::connect("sqlite::memory:")
            .await
            .expect("in-memory db");
        assert_eq!(storage.load("key").await.unwrap(), None);

        storage.save("key", &session("first")).await.unwrap();
        storage.save("key", &session("second")).await.unwrap();
        assert_eq!(storage.load("key").await.unwrap(), Some(session("second")));
        assert_eq!(storage.load("other").await.unwrap(), None);

        storage.delete("key").await.unwrap();
        assert_eq!(storage.load("key").await.unwrap(), None);
    }
}
