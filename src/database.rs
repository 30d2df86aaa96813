//! SQLite scope store: per-scope settings and the per-user violation ledger.
//!
//! Settings rows hold a JSON object of overrides that is written as a merge
//! patch, so an edit of one key never clobbers a concurrent edit of another.
//! Violation counts are incremented with a single upsert statement.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;

use crate::error::{MokoshError, Result};
use crate::settings::Settings;

/// Upper bound on cached scope settings.
const SETTINGS_CACHE_CAPACITY: u64 = 10_000;

/// Cached settings are re-read after this long, picking up writes from
/// other processes sharing the file.
const SETTINGS_CACHE_TTL: Duration = Duration::from_secs(300);

/// Database connection pool wrapper with a settings cache.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    settings_cache: Cache<i64, Settings>,
    /// One lock per scope, held for every settings write and cache fill.
    scope_locks: Cache<i64, Arc<Mutex<()>>>,
}

impl Database {
    /// Open (or create) the database file and initialize the schema.
    pub async fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MokoshError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| MokoshError::Database(format!("Failed to connect to database: {}", e)))?;

        let db = Self::with_pool(pool);
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| MokoshError::Database(format!("Failed to create in-memory db: {}", e)))?;

        let db = Self::with_pool(pool);
        db.initialize_schema().await?;

        Ok(db)
    }

    fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            settings_cache: Cache::builder()
                .max_capacity(SETTINGS_CACHE_CAPACITY)
                .time_to_live(SETTINGS_CACHE_TTL)
                .build(),
            scope_locks: Cache::builder().build(),
        }
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| MokoshError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MokoshError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    // ========== Settings ==========

    /// Settings for a scope: defaults overlaid with stored overrides.
    pub async fn get_settings(&self, scope_id: i64) -> Result<Settings> {
        if let Some(settings) = self.settings_cache.get(&scope_id).await {
            return Ok(settings);
        }

        // Fill under the scope lock so a slow read cannot cache over a newer write.
        let lock = self.scope_lock(scope_id).await;
        let _guard = lock.lock().await;

        if let Some(settings) = self.settings_cache.get(&scope_id).await {
            return Ok(settings);
        }

        let settings = self.load_settings(scope_id).await?;
        self.settings_cache.insert(scope_id, settings.clone()).await;
        Ok(settings)
    }

    /// Merge `patch` into the stored overrides and return the resulting settings.
    ///
    /// Keys absent from `patch` keep whatever value was stored before.
    pub async fn patch_settings(
        &self,
        scope_id: i64,
        patch: &Map<String, Value>,
    ) -> Result<Settings> {
        let lock = self.scope_lock(scope_id).await;
        let _guard = lock.lock().await;

        self.write_patch(scope_id, patch).await
    }

    /// Read the stored settings, build a patch from them and write it, with no
    /// other settings write for the scope in between.
    pub async fn update_settings<F>(&self, scope_id: i64, build_patch: F) -> Result<Settings>
    where
        F: FnOnce(&Settings) -> Map<String, Value>,
    {
        let lock = self.scope_lock(scope_id).await;
        let _guard = lock.lock().await;

        let current = self.load_settings(scope_id).await?;
        let patch = build_patch(&current);
        self.write_patch(scope_id, &patch).await
    }

    /// Drop a cached settings entry.
    pub async fn invalidate_settings_cache(&self, scope_id: i64) {
        self.settings_cache.invalidate(&scope_id).await;
    }

    async fn scope_lock(&self, scope_id: i64) -> Arc<Mutex<()>> {
        self.scope_locks
            .get_with(scope_id, async { Arc::new(Mutex::new(())) })
            .await
    }

    async fn load_settings(&self, scope_id: i64) -> Result<Settings> {
        let row = sqlx::query("SELECT settings FROM scope_settings WHERE scope_id = ?")
            .bind(scope_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MokoshError::Database(format!("Failed to get settings: {}", e)))?;

        Ok(match row {
            Some(row) => parse_stored(scope_id, &row.get::<String, _>("settings")),
            None => Settings::default(),
        })
    }

    /// Caller holds the scope lock.
    async fn write_patch(&self, scope_id: i64, patch: &Map<String, Value>) -> Result<Settings> {
        let patch_json = serde_json::to_string(patch)?;

        let row = sqlx::query(
            "INSERT INTO scope_settings (scope_id, settings)
             VALUES (?, ?)
             ON CONFLICT(scope_id) DO UPDATE SET
                settings = json_patch(scope_settings.settings, excluded.settings)
             RETURNING settings",
        )
        .bind(scope_id)
        .bind(&patch_json)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MokoshError::Database(format!("Failed to save settings: {}", e)))?;

        let settings = parse_stored(scope_id, &row.get::<String, _>("settings"));
        self.settings_cache.insert(scope_id, settings.clone()).await;

        Ok(settings)
    }

    // ========== Violation ledger ==========

    /// Current violation count, 0 when the user has no record.
    pub async fn violation_count(&self, scope_id: i64, user_id: i64) -> Result<i64> {
        let count = sqlx::query("SELECT count FROM violations WHERE scope_id = ? AND user_id = ?")
            .bind(scope_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MokoshError::Database(format!("Failed to get violations: {}", e)))?
            .map(|row| row.get::<i64, _>("count"))
            .unwrap_or(0);

        Ok(count)
    }

    /// Atomically add one violation and return the new count.
    pub async fn record_violation(&self, scope_id: i64, user_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO violations (scope_id, user_id, count)
             VALUES (?, ?, 1)
             ON CONFLICT(scope_id, user_id) DO UPDATE SET count = count + 1
             RETURNING count",
        )
        .bind(scope_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MokoshError::Database(format!("Failed to record violation: {}", e)))?;

        Ok(row.get::<i64, _>("count"))
    }

    /// Reset a user's count to zero.
    pub async fn reset_violations(&self, scope_id: i64, user_id: i64) -> Result<()> {
        sqlx::query("UPDATE violations SET count = 0 WHERE scope_id = ? AND user_id = ?")
            .bind(scope_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MokoshError::Database(format!("Failed to reset violations: {}", e)))?;

        Ok(())
    }
}

/// Decode a stored overrides blob, falling back to defaults for anything unusable.
fn parse_stored(scope_id: i64, raw: &str) -> Settings {
    let overrides = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!(scope_id, "Stored settings are not an object, using defaults");
            Map::new()
        }
        Err(e) => {
            tracing::warn!(scope_id, error = %e, "Stored settings are not valid JSON, using defaults");
            Map::new()
        }
    };

    let (settings, rejected) = Settings::from_overrides(&overrides);
    if !rejected.is_empty() {
        tracing::warn!(scope_id, keys = ?rejected, "Ignoring stored settings with invalid values");
    }
    settings
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scope_settings (
    scope_id INTEGER PRIMARY KEY,
    settings TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS violations (
    scope_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (scope_id, user_id)
);
"#;
