// SQLite-backed moderation store.
//
// Tables:
// - module_config: per-chat per-module mode and parameters
// - approvals: per-module exemption rows
// - violations: per chat/user/category counters
// - chat_locks: classifier-driven lock tags
//
// Violation counting is a single upsert-increment statement, so concurrent
// strikes against the same key cannot lose updates.

use crate::core::enforcement::locks::LockTag;
use crate::core::enforcement::stores::{
    ApprovalEntry, ApprovalStore, ConfigStore, LockStore, Module, ModuleConfig, StoreError,
    ViolationLedger, ViolationRecord,
};
use crate::core::enforcement::tier::EnforcementMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(storage_err)
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS module_config (
                chat_id INTEGER NOT NULL,
                module TEXT NOT NULL,
                mode TEXT NOT NULL,
                long_limit INTEGER NOT NULL DEFAULT 200,
                PRIMARY KEY (chat_id, module)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS approvals (
                chat_id INTEGER NOT NULL,
                module TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                granted_by INTEGER,
                granted_at TEXT NOT NULL,
                PRIMARY KEY (chat_id, module, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS violations (
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT NOT NULL,
                PRIMARY KEY (chat_id, user_id, category)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_locks (
                chat_id INTEGER NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (chat_id, tag)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

#[async_trait]
impl ConfigStore for SqliteModerationStore {
    async fn get_config(&self, chat_id: i64, module: Module) -> Result<ModuleConfig, StoreError> {
        let row = sqlx::query(
            "SELECT mode, long_limit FROM module_config WHERE chat_id = ? AND module = ?",
        )
        .bind(chat_id)
        .bind(module.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else {
            return Ok(ModuleConfig::default_for(module));
        };
        let mode: String = row.get("mode");
        let mode: EnforcementMode = mode.parse().map_err(storage_err)?;
        let long_limit: i64 = row.get("long_limit");
        Ok(ModuleConfig {
            mode,
            long_limit: long_limit as u32,
        })
    }

    async fn set_mode(
        &self,
        chat_id: i64,
        module: Module,
        mode: EnforcementMode,
    ) -> Result<(), StoreError> {
        let defaults = ModuleConfig::default_for(module);
        sqlx::query(
            r#"
            INSERT INTO module_config (chat_id, module, mode, long_limit)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (chat_id, module) DO UPDATE SET mode = excluded.mode
            "#,
        )
        .bind(chat_id)
        .bind(module.as_str())
        .bind(mode.as_str())
        .bind(defaults.long_limit as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn set_long_limit(&self, chat_id: i64, limit: u32) -> Result<(), StoreError> {
        let defaults = ModuleConfig::default_for(Module::AntiLong);
        sqlx::query(
            r#"
            INSERT INTO module_config (chat_id, module, mode, long_limit)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (chat_id, module) DO UPDATE SET long_limit = excluded.long_limit
            "#,
        )
        .bind(chat_id)
        .bind(Module::AntiLong.as_str())
        .bind(defaults.mode.as_str())
        .bind(limit as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for SqliteModerationStore {
    async fn approve(
        &self,
        chat_id: i64,
        module: Module,
        user_id: i64,
        granted_by: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO approvals (chat_id, module, user_id, granted_by, granted_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (chat_id, module, user_id) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(module.as_str())
        .bind(user_id)
        .bind(granted_by)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn unapprove(
        &self,
        chat_id: i64,
        module: Module,
        user_id: i64,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM approvals WHERE chat_id = ? AND module = ? AND user_id = ?")
                .bind(chat_id)
                .bind(module.as_str())
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_approved(
        &self,
        chat_id: i64,
        module: Module,
        user_id: i64,
    ) -> Result<bool, StoreError> {
        let row =
            sqlx::query("SELECT 1 FROM approvals WHERE chat_id = ? AND module = ? AND user_id = ?")
                .bind(chat_id)
                .bind(module.as_str())
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(row.is_some())
    }

    async fn list_approved(
        &self,
        chat_id: i64,
        module: Module,
    ) -> Result<Vec<ApprovalEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, granted_by, granted_at
            FROM approvals
            WHERE chat_id = ? AND module = ?
            ORDER BY granted_at
            "#,
        )
        .bind(chat_id)
        .bind(module.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter()
            .map(|row| {
                let granted_at: String = row.get("granted_at");
                Ok(ApprovalEntry {
                    chat_id,
                    user_id: row.get("user_id"),
                    granted_by: row.get("granted_by"),
                    granted_at: parse_timestamp(&granted_at)?,
                })
            })
            .collect()
    }

    async fn revoke_all(&self, chat_id: i64, user_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM approvals WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ViolationLedger for SqliteModerationStore {
    async fn record(
        &self,
        chat_id: i64,
        user_id: i64,
        category: &str,
    ) -> Result<u32, StoreError> {
        // Atomic upsert-increment: the count can never lose a concurrent
        // strike to a read-then-write race.
        let row = sqlx::query(
            r#"
            INSERT INTO violations (chat_id, user_id, category, count, last_seen)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT (chat_id, user_id, category)
            DO UPDATE SET count = count + 1, last_seen = excluded.last_seen
            RETURNING count
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(category)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        let count: i64 = row.get("count");
        Ok(count as u32)
    }

    async fn violations(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Vec<ViolationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT category, count, last_seen
            FROM violations
            WHERE chat_id = ? AND user_id = ?
            ORDER BY count DESC
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter()
            .map(|row| {
                let last_seen: String = row.get("last_seen");
                let count: i64 = row.get("count");
                Ok(ViolationRecord {
                    chat_id,
                    user_id,
                    category: row.get("category"),
                    count: count as u32,
                    last_seen: parse_timestamp(&last_seen)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl LockStore for SqliteModerationStore {
    async fn insert_lock(&self, chat_id: i64, tag: LockTag) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_locks (chat_id, tag) VALUES (?, ?)
            ON CONFLICT (chat_id, tag) DO NOTHING
            "#,
        )
        .bind(chat_id)
        .bind(tag.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_lock(&self, chat_id: i64, tag: LockTag) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM chat_locks WHERE chat_id = ? AND tag = ?")
            .bind(chat_id)
            .bind(tag.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_locks(&self, chat_id: i64) -> Result<HashSet<LockTag>, StoreError> {
        let rows = sqlx::query("SELECT tag FROM chat_locks WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let tag: String = row.get("tag");
                // Tags written by newer builds may be unknown here; skip
                // them rather than failing the whole read.
                LockTag::parse(&tag)
            })
            .collect())
    }
}
