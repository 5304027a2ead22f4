//! SQLite durable backend.
//!
//! Wraps SQLite access via sqlx. Snowflake ids are stored as `INTEGER`
//! (bit-preserving `u64` to `i64` casts) and member metadata as JSON text.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_core::{
    ChannelId, GroupId, GroupRegistrationConfig, MemberMetadata, MemberProfile, RoleId, UserId,
};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use super::{GroupConfigStore, MemberStore, StoreError};

/// Durable store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    ///
    /// Runs migrations automatically to ensure schema is up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Configuration(format!("Failed to create db directory: {}", e).into())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite performs best with single writer
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to :memory: is a separate database, so pin one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations first.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl GroupConfigStore for SqliteStore {
    async fn init_group(&self, config: &GroupRegistrationConfig) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO registration_groups (
                group_id, channel_id, role_id, init_user_id,
                registered_message, admin_channel_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(to_sql(config.group_id.get()))
        .bind(to_sql(config.channel_id.get()))
        .bind(to_sql(config.role_id.get()))
        .bind(to_sql(config.init_user_id.get()))
        .bind(&config.registered_message)
        .bind(config.admin_channel_id.map(|c| to_sql(c.get())))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        Ok(())
    }

    async fn group_config(&self, group: GroupId) -> Result<GroupRegistrationConfig, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT group_id, channel_id, role_id, init_user_id, registered_message, admin_channel_id
            FROM registration_groups
            WHERE group_id = ?1
            "#,
        )
        .bind(to_sql(group.get()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        parse_group_row(&row)
    }

    async fn set_admin_channel(
        &self,
        group: GroupId,
        channel: Option<ChannelId>,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE registration_groups SET admin_channel_id = ?2 WHERE group_id = ?1")
                .bind(to_sql(group.get()))
                .bind(channel.map(|c| to_sql(c.get())))
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_group(&self, group: GroupId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM members WHERE group_id = ?1")
            .bind(to_sql(group.get()))
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM registration_groups WHERE group_id = ?1")
            .bind(to_sql(group.get()))
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MemberStore for SqliteStore {
    async fn member(&self, group: GroupId, user: UserId) -> Result<MemberProfile, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT group_id, user_id, metadata, registered_at
            FROM members
            WHERE group_id = ?1 AND user_id = ?2
            "#,
        )
        .bind(to_sql(group.get()))
        .bind(to_sql(user.get()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        parse_member_row(&row)
    }

    async fn register_member(&self, profile: &MemberProfile) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&profile.metadata)?;

        // The primary key turns a concurrent second registration into a
        // unique violation, reported as AlreadyExists
        sqlx::query(
            r#"
            INSERT INTO members (group_id, user_id, email, metadata, registered_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(to_sql(profile.group_id.get()))
        .bind(to_sql(profile.user_id.get()))
        .bind(profile.metadata.email.as_str())
        .bind(metadata)
        .bind(profile.registered_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        Ok(())
    }

    async fn unregister_member(&self, group: GroupId, user: UserId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM members WHERE group_id = ?1 AND user_id = ?2")
            .bind(to_sql(group.get()))
            .bind(to_sql(user.get()))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// =========================================================================
// Row helpers
// =========================================================================

fn to_sql(id: u64) -> i64 {
    id as i64
}

fn from_sql(id: i64) -> u64 {
    id as u64
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        // 1555 = SQLITE_CONSTRAINT_PRIMARYKEY, 2067 = SQLITE_CONSTRAINT_UNIQUE
        if db.is_unique_violation() || matches!(db.code().as_deref(), Some("1555" | "2067")) {
            return StoreError::AlreadyExists;
        }
    }
    StoreError::Database(err)
}

fn parse_group_row(row: &SqliteRow) -> Result<GroupRegistrationConfig, StoreError> {
    Ok(GroupRegistrationConfig {
        group_id: GroupId(from_sql(row.try_get("group_id")?)),
        channel_id: ChannelId(from_sql(row.try_get("channel_id")?)),
        role_id: RoleId(from_sql(row.try_get("role_id")?)),
        init_user_id: UserId(from_sql(row.try_get("init_user_id")?)),
        registered_message: row.try_get("registered_message")?,
        admin_channel_id: row
            .try_get::<Option<i64>, _>("admin_channel_id")?
            .map(|c| ChannelId(from_sql(c))),
    })
}

fn parse_member_row(row: &SqliteRow) -> Result<MemberProfile, StoreError> {
    let metadata: String = row.try_get("metadata")?;
    let metadata: MemberMetadata = serde_json::from_str(&metadata)?;

    let registered_at: String = row.try_get("registered_at")?;
    let registered_at = DateTime::parse_from_rfc3339(&registered_at)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc);

    Ok(MemberProfile {
        group_id: GroupId(from_sql(row.try_get("group_id")?)),
        user_id: UserId(from_sql(row.try_get("user_id")?)),
        metadata,
        registered_at,
    })
}
