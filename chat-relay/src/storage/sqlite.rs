//! SQLite storage backend for chat-relay.

use super::{BackupStore, Invite, InviteState, InviteStore, PreKeyStore};
use crate::config::StorageConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use chat_types::{DeviceId, PreKeyBundle, PublishPreKeyRequest, UserId};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Delay before the first retry of a conflicting transaction; doubles per attempt.
const RETRY_BACKOFF_MS: u64 = 10;

/// Upper bound on a single retry delay.
const RETRY_BACKOFF_MAX_MS: u64 = 500;

/// Length of a generated invite code.
const INVITE_CODE_LEN: usize = 16;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        user_id TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        device_id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        device_key TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS signed_prekeys (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        identity_key TEXT NOT NULL,
        signed_prekey_id INTEGER NOT NULL,
        signed_prekey TEXT NOT NULL,
        signed_prekey_sig TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS one_time_prekeys (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        key_id INTEGER NOT NULL,
        public_key TEXT NOT NULL,
        consumed INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        consumed_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS backups (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL,
        payload BLOB NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invites (
        code TEXT PRIMARY KEY,
        owner_user_id TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        consumed INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_signed_prekeys_owner ON signed_prekeys(user_id, device_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_one_time_prekeys_available ON one_time_prekeys(user_id, device_id, consumed, id)",
    "CREATE INDEX IF NOT EXISTS idx_backups_user ON backups(user_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_invites_expires ON invites(expires_at)",
];

/// SQLite-based storage for prekeys, backups and invites.
///
/// Uses WAL mode for concurrent reads/writes. Every multi-statement
/// operation runs in one transaction and is retried as a whole when SQLite
/// reports a lock conflict.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    max_attempts: u32,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("pool_size", &self.pool.size())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl SqliteStorage {
    /// Open (creating if missing) the database described by `config`.
    pub async fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let storage = Self {
            pool,
            max_attempts: config.max_attempts.max(1),
        };
        storage.run_migrations().await?;
        tracing::info!("Opened database at {}", config.database.display());
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    ///
    /// Holds a single connection for its whole lifetime; the database
    /// disappears with it.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let storage = Self {
            pool,
            max_attempts: StorageConfig::default().max_attempts,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Check that the database answers a trivial query.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool; later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retry
    /// budget is spent.
    ///
    /// Each call of `attempt` must run a complete transaction; a failed
    /// attempt has already been rolled back when its transaction dropped.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempts < self.max_attempts => {
                    tracing::debug!("{}: transient conflict (attempt {}): {}", op, attempts, e);
                    tokio::time::sleep(retry_delay(attempts)).await;
                }
                Err(e) if is_transient(&e) => {
                    tracing::warn!("{}: giving up after {} attempts: {}", op, attempts, e);
                    return Err(StorageError::Transient {
                        attempts,
                        source: e,
                    });
                }
                Err(e) => return Err(StorageError::Database(e)),
            }
        }
    }

    async fn try_publish(
        &self,
        user: &UserId,
        device: &DeviceId,
        req: &PublishPreKeyRequest,
    ) -> Result<(), sqlx::Error> {
        let now = current_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?1, ?2)")
            .bind(user.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        // First write wins: a known device keeps its original key.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO devices (device_id, user_id, device_key, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(device.as_str())
        .bind(user.as_str())
        .bind(&req.device_key)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO signed_prekeys
                (user_id, device_id, identity_key, signed_prekey_id, signed_prekey, signed_prekey_sig, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(user.as_str())
        .bind(device.as_str())
        .bind(&req.identity_key)
        .bind(i64::from(req.signed_pre_key_id))
        .bind(&req.signed_pre_key)
        .bind(&req.signed_pre_key_sig)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for key in &req.one_time_pre_keys {
            sqlx::query(
                r#"
                INSERT INTO one_time_prekeys (user_id, device_id, key_id, public_key, consumed, created_at)
                VALUES (?1, ?2, ?3, ?4, 0, ?5)
                "#,
            )
            .bind(user.as_str())
            .bind(device.as_str())
            .bind(i64::from(key.key_id))
            .bind(&key.public_key)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    async fn try_get_bundle(
        &self,
        user: &UserId,
        device: Option<&DeviceId>,
    ) -> Result<Option<PreKeyBundle>, sqlx::Error> {
        let device = device.map(DeviceId::as_str);
        let mut tx = self.pool.begin().await?;

        // The claim is the first statement, so the transaction takes the write
        // lock up front and queues on busy_timeout instead of failing to
        // upgrade a stale read snapshot. The compare-and-swap on `consumed`
        // means two transactions can never both flip the same row.
        let claimed = sqlx::query_as::<_, OneTimeKeyRow>(
            r#"
            UPDATE one_time_prekeys
            SET consumed = 1, consumed_at = ?3
            WHERE id = (
                SELECT id FROM one_time_prekeys
                WHERE user_id = ?1 AND consumed = 0 AND device_id = (
                    SELECT device_id FROM signed_prekeys
                    WHERE user_id = ?1 AND (?2 IS NULL OR device_id = ?2)
                    ORDER BY id DESC
                    LIMIT 1
                )
                ORDER BY id ASC
                LIMIT 1
            )
            AND consumed = 0
            RETURNING key_id, public_key
            "#,
        )
        .bind(user.as_str())
        .bind(device)
        .bind(current_millis())
        .fetch_optional(&mut *tx)
        .await?;

        let signed = sqlx::query_as::<_, SignedPreKeyRow>(
            r#"
            SELECT device_id, identity_key, signed_prekey_id, signed_prekey, signed_prekey_sig
            FROM signed_prekeys
            WHERE user_id = ?1 AND (?2 IS NULL OR device_id = ?2)
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(user.as_str())
        .bind(device)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(signed.map(|signed| signed.into_bundle(user, claimed)))
    }

    async fn try_consume_invite(&self, code: &str) -> Result<Redemption, sqlx::Error> {
        let now = current_millis();
        let mut tx = self.pool.begin().await?;

        let owner: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE invites SET consumed = 1
            WHERE code = ?1 AND consumed = 0 AND expires_at > ?2
            RETURNING owner_user_id
            "#,
        )
        .bind(code)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(owner) = owner {
            tx.commit().await?;
            return Ok(Redemption::Redeemed(owner));
        }

        let row = sqlx::query_as::<_, InviteRow>(
            "SELECT code, owner_user_id, expires_at, consumed FROM invites WHERE code = ?1",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(match row {
            Some(row) => Redemption::Rejected(row.into_invite(now).state),
            None => Redemption::Missing,
        })
    }
}

#[async_trait]
impl PreKeyStore for SqliteStorage {
    async fn publish(&self, req: &PublishPreKeyRequest) -> Result<(), StorageError> {
        let user = UserId::parse(&req.user_id)?;
        let device = DeviceId::parse(&req.device_id)?;

        let (user_ref, device_ref) = (&user, &device);
        self.with_retry("publish", move || self.try_publish(user_ref, device_ref, req))
            .await?;

        tracing::debug!(
            "Published signed prekey {} and {} one-time keys for {}/{}",
            req.signed_pre_key_id,
            req.one_time_pre_keys.len(),
            user,
            device
        );
        Ok(())
    }

    async fn get_bundle(
        &self,
        user_id: &str,
        device_id: Option<&str>,
    ) -> Result<PreKeyBundle, StorageError> {
        let user = UserId::parse(user_id)?;
        let device = device_id
            .filter(|d| !d.trim().is_empty())
            .map(DeviceId::parse)
            .transpose()?;

        let (user_ref, device_ref) = (&user, device.as_ref());
        let bundle = self
            .with_retry("get_bundle", move || self.try_get_bundle(user_ref, device_ref))
            .await?
            .ok_or_else(|| StorageError::NotFound {
                what: format!("prekeys for {user}"),
            })?;

        tracing::debug!(
            "Served bundle for {}/{} (one-time key: {:?})",
            bundle.user_id,
            bundle.device_id,
            bundle.one_time_pre_key_id
        );
        Ok(bundle)
    }

    async fn available_one_time_keys(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM one_time_prekeys
            WHERE user_id = ?1 AND device_id = ?2 AND consumed = 0
            "#,
        )
        .bind(user_id.trim())
        .bind(device_id.trim())
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }
}

#[async_trait]
impl BackupStore for SqliteStorage {
    async fn put(&self, owner: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let owner = UserId::parse(owner)?;
        let id = uuid::Uuid::new_v4().to_string();

        let (owner_ref, id_ref) = (&owner, id.as_str());
        self.with_retry("backup_put", move || async move {
            sqlx::query(
                "INSERT INTO backups (id, user_id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(id_ref)
            .bind(owner_ref.as_str())
            .bind(bytes)
            .bind(current_millis())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await?;

        tracing::debug!("Stored backup {} for {} ({} bytes)", id, owner, bytes.len());
        Ok(id)
    }

    async fn get_latest(&self, owner: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let payload: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT payload FROM backups WHERE user_id = ?1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(owner.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(payload)
    }
}

#[async_trait]
impl InviteStore for SqliteStorage {
    async fn create_invite(&self, owner: &str, ttl: Duration) -> Result<Invite, StorageError> {
        let owner = UserId::parse(owner)?;
        let code: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(INVITE_CODE_LEN)
            .collect();
        let now = current_millis();
        let expires_at = now + ttl.as_millis() as i64;

        let (owner_ref, code_ref) = (&owner, code.as_str());
        self.with_retry("create_invite", move || async move {
            sqlx::query(
                r#"
                INSERT INTO invites (code, owner_user_id, expires_at, consumed, created_at)
                VALUES (?1, ?2, ?3, 0, ?4)
                "#,
            )
            .bind(code_ref)
            .bind(owner_ref.as_str())
            .bind(expires_at)
            .bind(now)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await?;

        Ok(Invite {
            code,
            owner: owner.into_inner(),
            expires_at,
            state: InviteState::Pending,
        })
    }

    async fn consume_invite(&self, code: &str) -> Result<String, StorageError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(StorageError::Validation {
                field: "code",
                reason: "must not be blank".to_string(),
            });
        }

        match self
            .with_retry("consume_invite", move || self.try_consume_invite(code))
            .await?
        {
            Redemption::Redeemed(owner) => Ok(owner),
            Redemption::Missing => Err(StorageError::NotFound {
                what: format!("invite {code}"),
            }),
            Redemption::Rejected(InviteState::Consumed) => Err(StorageError::AlreadyConsumed {
                code: code.to_string(),
            }),
            Redemption::Rejected(_) => Err(StorageError::Expired {
                code: code.to_string(),
            }),
        }
    }

    async fn invite(&self, code: &str) -> Result<Option<Invite>, StorageError> {
        let row = sqlx::query_as::<_, InviteRow>(
            "SELECT code, owner_user_id, expires_at, consumed FROM invites WHERE code = ?1",
        )
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| row.into_invite(current_millis())))
    }

    async fn purge_expired_invites(&self, retention: Duration) -> Result<u64, StorageError> {
        let cutoff = current_millis() - retention.as_millis() as i64;

        let result = sqlx::query("DELETE FROM invites WHERE expires_at <= ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Outcome of one invite redemption attempt.
enum Redemption {
    Redeemed(String),
    Missing,
    Rejected(InviteState),
}

/// Whether a failed statement may succeed if the transaction is retried.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
        // (BUSY_RECOVERY, LOCKED_SHAREDCACHE, BUSY_SNAPSHOT).
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517"))
                || db.message().contains("database is locked")
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Exponential backoff after the given number of failed attempts.
fn retry_delay(attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(16);
    Duration::from_millis((RETRY_BACKOFF_MS << shift).min(RETRY_BACKOFF_MAX_MS))
}

fn current_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Internal row type for the latest signed prekey.
#[derive(sqlx::FromRow)]
struct SignedPreKeyRow {
    device_id: String,
    identity_key: String,
    signed_prekey_id: i64,
    signed_prekey: String,
    signed_prekey_sig: String,
}

/// Internal row type for a claimed one-time key.
#[derive(sqlx::FromRow)]
struct OneTimeKeyRow {
    key_id: i64,
    public_key: String,
}

impl SignedPreKeyRow {
    fn into_bundle(self, user: &UserId, claimed: Option<OneTimeKeyRow>) -> PreKeyBundle {
        let (one_time_pre_key_id, one_time_pre_key) = match claimed {
            Some(key) => (Some(key.key_id as i32), Some(key.public_key)),
            None => (None, None),
        };
        PreKeyBundle {
            user_id: user.to_string(),
            device_id: self.device_id,
            identity_key: self.identity_key,
            signed_pre_key_id: self.signed_prekey_id as i32,
            signed_pre_key: self.signed_prekey,
            signed_pre_key_sig: self.signed_prekey_sig,
            one_time_pre_key_id,
            one_time_pre_key,
        }
    }
}

/// Internal row type for invites.
#[derive(sqlx::FromRow)]
struct InviteRow {
    code: String,
    owner_user_id: String,
    expires_at: i64,
    consumed: bool,
}

impl InviteRow {
    fn into_invite(self, now: i64) -> Invite {
        let state = if self.consumed {
            InviteState::Consumed
        } else if self.expires_at <= now {
            InviteState::Expired
        } else {
            InviteState::Pending
        };
        Invite {
            code: self.code,
            owner: self.owner_user_id,
            expires_at: self.expires_at,
            state,
        }
    }
}
