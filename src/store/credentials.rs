//! CredentialStore — providers, models, and API-key credentials.
//!
//! Owns the operator-facing configuration surface (add/update/delete/toggle)
//! and the pipeline-facing bookkeeping (error/success reporting). Activation
//! is transactional: at most one credential has `is_active = 1` at any time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tracing::debug;

use crate::error::DatabaseError;
use crate::store::db::Database;

/// A named AI vendor endpoint. Operator-managed; read-only to the pipeline.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub base_url: String,
    pub is_enabled: bool,
    pub priority: i64,
}

/// A model belonging to one provider.
#[derive(Debug, Clone)]
pub struct Model {
    pub id: i64,
    pub provider_id: i64,
    pub name: String,
    pub display_name: String,
    pub max_tokens: u32,
    pub is_enabled: bool,
    pub is_default: bool,
}

/// A usable (provider, model, secret) triple plus bookkeeping, joined with
/// provider/model names for call routing and operator display.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: i64,
    pub provider_id: i64,
    pub model_id: i64,
    pub api_key: SecretString,
    pub label: String,
    pub is_active: bool,
    pub is_enabled: bool,
    pub error_count: i64,
    pub last_error: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub provider_name: String,
    pub provider_display: String,
    pub model_name: String,
    pub model_display: String,
    pub max_tokens: u32,
}

/// Columns selected for a joined credential row; keep in sync with `row_to_credential`.
const CREDENTIAL_COLUMNS: &str = "c.id, c.provider_id, c.model_id, c.api_key, c.label, \
     c.is_active, c.is_enabled, c.error_count, c.last_error, c.last_used_at, c.last_success_at, \
     p.name, p.display_name, m.name, m.display_name, m.max_tokens";

/// Persistent credential storage.
pub struct CredentialStore {
    db: Arc<Database>,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // ── Providers & models ──────────────────────────────────────────

    /// All providers, highest priority first.
    pub async fn list_providers(&self) -> Result<Vec<Provider>, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT id, name, display_name, base_url, is_enabled, priority
                 FROM providers ORDER BY priority DESC, display_name ASC",
                (),
            )
            .await
            .map_err(query_err)?;

        let mut providers = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            providers.push(Provider {
                id: row.get(0).map_err(query_err)?,
                name: row.get(1).map_err(query_err)?,
                display_name: row.get(2).map_err(query_err)?,
                base_url: row.get(3).map_err(query_err)?,
                is_enabled: row.get::<i64>(4).map_err(query_err)? != 0,
                priority: row.get(5).map_err(query_err)?,
            });
        }
        Ok(providers)
    }

    /// Models of one provider, defaults first.
    pub async fn list_models(&self, provider_id: i64) -> Result<Vec<Model>, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT id, provider_id, name, display_name, max_tokens, is_enabled, is_default
                 FROM models WHERE provider_id = ?1
                 ORDER BY is_default DESC, display_name ASC",
                libsql::params![provider_id],
            )
            .await
            .map_err(query_err)?;

        let mut models = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            models.push(Model {
                id: row.get(0).map_err(query_err)?,
                provider_id: row.get(1).map_err(query_err)?,
                name: row.get(2).map_err(query_err)?,
                display_name: row.get(3).map_err(query_err)?,
                max_tokens: row.get::<i64>(4).map_err(query_err)? as u32,
                is_enabled: row.get::<i64>(5).map_err(query_err)? != 0,
                is_default: row.get::<i64>(6).map_err(query_err)? != 0,
            });
        }
        Ok(models)
    }

    /// Create a provider. Returns its id.
    pub async fn add_provider(
        &self,
        name: &str,
        display_name: &str,
        base_url: &str,
        priority: i64,
    ) -> Result<i64, DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO providers (name, display_name, base_url, priority) VALUES (?1, ?2, ?3, ?4)",
            libsql::params![name, display_name, base_url, priority],
        )
        .await
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Create a model under a provider. Returns its id.
    pub async fn add_model(
        &self,
        provider_id: i64,
        name: &str,
        display_name: &str,
        max_tokens: u32,
        is_default: bool,
    ) -> Result<i64, DatabaseError> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO models (provider_id, name, display_name, max_tokens, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            libsql::params![provider_id, name, display_name, max_tokens as i64, is_default as i64],
        )
        .await
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Enable or disable a provider.
    pub async fn set_provider_enabled(&self, id: i64, enabled: bool) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "UPDATE providers SET is_enabled = ?1, updated_at = datetime('now') WHERE id = ?2",
                libsql::params![enabled as i64, id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Enable or disable a model.
    pub async fn set_model_enabled(&self, id: i64, enabled: bool) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "UPDATE models SET is_enabled = ?1 WHERE id = ?2",
                libsql::params![enabled as i64, id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Credentials ─────────────────────────────────────────────────

    /// All credentials, active first, newest first.
    pub async fn list_credentials(&self) -> Result<Vec<Credential>, DatabaseError> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS}
             FROM credentials c
             JOIN providers p ON c.provider_id = p.id
             JOIN models m ON c.model_id = m.id
             ORDER BY c.is_active DESC, c.created_at DESC"
        );
        let mut rows = self.db.conn().query(&sql, ()).await.map_err(query_err)?;

        let mut credentials = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            credentials.push(row_to_credential(&row)?);
        }
        Ok(credentials)
    }

    /// The credential where active=1, enabled=1, and its provider is enabled.
    ///
    /// Callers should go through `ActiveCredentialCache` instead of hitting
    /// this on every message.
    pub async fn get_active(&self) -> Result<Credential, DatabaseError> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS}
             FROM credentials c
             JOIN providers p ON c.provider_id = p.id
             JOIN models m ON c.model_id = m.id
             WHERE c.is_active = 1 AND c.is_enabled = 1 AND p.is_enabled = 1
             LIMIT 1"
        );
        let mut rows = self.db.conn().query(&sql, ()).await.map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => row_to_credential(&row),
            None => Err(DatabaseError::NoActiveCredential),
        }
    }

    /// Rotation candidates: every enabled credential whose provider is
    /// enabled, in failover order — provider priority descending, error count
    /// ascending, never-used before used, oldest-used first.
    pub async fn rotation_candidates(&self) -> Result<Vec<Credential>, DatabaseError> {
        let sql = format!(
            "SELECT {CREDENTIAL_COLUMNS}
             FROM credentials c
             JOIN providers p ON c.provider_id = p.id
             JOIN models m ON c.model_id = m.id
             WHERE c.is_enabled = 1 AND p.is_enabled = 1
             ORDER BY
                 p.priority DESC,
                 c.error_count ASC,
                 CASE WHEN c.last_used_at IS NULL THEN 0 ELSE 1 END ASC,
                 c.last_used_at ASC"
        );
        let mut rows = self.db.conn().query(&sql, ()).await.map_err(query_err)?;

        let mut candidates = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            candidates.push(row_to_credential(&row)?);
        }
        Ok(candidates)
    }

    /// Add a credential for an existing provider+model pair. Returns its id.
    pub async fn add_credential(
        &self,
        provider_id: i64,
        model_id: i64,
        api_key: &str,
        label: &str,
    ) -> Result<i64, DatabaseError> {
        if !self.provider_exists(provider_id).await? {
            return Err(DatabaseError::NotFound {
                entity: "provider".into(),
                id: provider_id.to_string(),
            });
        }
        if !self.model_exists(model_id, provider_id).await? {
            return Err(DatabaseError::NotFound {
                entity: "model".into(),
                id: model_id.to_string(),
            });
        }

        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO credentials (provider_id, model_id, api_key, label, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            libsql::params![provider_id, model_id, api_key, label],
        )
        .await
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Add a credential naming a model by string; the model row is created
    /// with default limits when it does not exist yet.
    pub async fn add_credential_with_custom_model(
        &self,
        provider_id: i64,
        model_name: &str,
        api_key: &str,
        label: &str,
    ) -> Result<i64, DatabaseError> {
        if !self.provider_exists(provider_id).await? {
            return Err(DatabaseError::NotFound {
                entity: "provider".into(),
                id: provider_id.to_string(),
            });
        }

        let conn = self.db.conn();
        let mut rows = conn
            .query(
                "SELECT id FROM models WHERE provider_id = ?1 AND name = ?2",
                libsql::params![provider_id, model_name],
            )
            .await
            .map_err(query_err)?;

        let model_id = match rows.next().await.map_err(query_err)? {
            Some(row) => row.get(0).map_err(query_err)?,
            None => {
                self.add_model(provider_id, model_name, model_name, 8192, false)
                    .await?
            }
        };

        self.add_credential(provider_id, model_id, api_key, label).await
    }

    /// Update a credential's key, label, and enabled flag.
    pub async fn update_credential(
        &self,
        id: i64,
        api_key: &str,
        label: &str,
        enabled: bool,
    ) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "UPDATE credentials
                 SET api_key = ?1, label = ?2, is_enabled = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                libsql::params![api_key, label, enabled as i64, id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Delete a credential.
    pub async fn delete_credential(&self, id: i64) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute("DELETE FROM credentials WHERE id = ?1", libsql::params![id])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Atomically make `id` the only active credential: inside one
    /// transaction, clear active on all rows, then set it on the chosen one.
    ///
    /// Callers that hold a cache must invalidate it after this returns.
    pub async fn activate(&self, id: i64) -> Result<(), DatabaseError> {
        let tx = self
            .db
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to begin transaction: {e}")))?;

        tx.execute("UPDATE credentials SET is_active = 0", ())
            .await
            .map_err(query_err)?;
        tx.execute(
            "UPDATE credentials SET is_active = 1, updated_at = datetime('now') WHERE id = ?1",
            libsql::params![id],
        )
        .await
        .map_err(query_err)?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("Failed to commit activation: {e}")))?;
        debug!(credential_id = id, "Credential activated");
        Ok(())
    }

    /// Record a failed call: bump the error counter, keep the error text,
    /// stamp last-used.
    pub async fn report_error(&self, id: i64, error: &str) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "UPDATE credentials
                 SET error_count = error_count + 1,
                     last_error = ?1,
                     last_used_at = datetime('now'),
                     updated_at = datetime('now')
                 WHERE id = ?2",
                libsql::params![error, id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Record a successful call: stamp last-used and last-success.
    pub async fn report_success(&self, id: i64) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "UPDATE credentials
                 SET last_used_at = datetime('now'),
                     last_success_at = datetime('now'),
                     updated_at = datetime('now')
                 WHERE id = ?1",
                libsql::params![id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    /// Operator action: clear a credential's error counter and last error.
    pub async fn reset_error_count(&self, id: i64) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute(
                "UPDATE credentials
                 SET error_count = 0, last_error = NULL, updated_at = datetime('now')
                 WHERE id = ?1",
                libsql::params![id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn provider_exists(&self, id: i64) -> Result<bool, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT COUNT(*) FROM providers WHERE id = ?1",
                libsql::params![id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(query_err)? > 0),
            None => Ok(false),
        }
    }

    async fn model_exists(&self, id: i64, provider_id: i64) -> Result<bool, DatabaseError> {
        let mut rows = self
            .db
            .conn()
            .query(
                "SELECT COUNT(*) FROM models WHERE id = ?1 AND provider_id = ?2",
                libsql::params![id, provider_id],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(query_err)? > 0),
            None => Ok(false),
        }
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

fn query_err(e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Parse an RFC 3339 or SQLite datetime string.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_credential(row: &libsql::Row) -> Result<Credential, DatabaseError> {
    let api_key: String = row.get(3).map_err(query_err)?;
    let last_used: Option<String> = row.get(9).ok();
    let last_success: Option<String> = row.get(10).ok();

    Ok(Credential {
        id: row.get(0).map_err(query_err)?,
        provider_id: row.get(1).map_err(query_err)?,
        model_id: row.get(2).map_err(query_err)?,
        api_key: SecretString::from(api_key),
        label: row.get(4).map_err(query_err)?,
        is_active: row.get::<i64>(5).map_err(query_err)? != 0,
        is_enabled: row.get::<i64>(6).map_err(query_err)? != 0,
        error_count: row.get(7).map_err(query_err)?,
        last_error: row.get(8).ok(),
        last_used_at: last_used.as_deref().map(parse_datetime),
        last_success_at: last_success.as_deref().map(parse_datetime),
        provider_name: row.get(11).map_err(query_err)?,
        provider_display: row.get(12).map_err(query_err)?,
        model_name: row.get(13).map_err(query_err)?,
        model_display: row.get(14).map_err(query_err)?,
        max_tokens: row.get::<i64>(15).map_err(query_err)? as u32,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> CredentialStore {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let store = CredentialStore::new(db);
        let gemini = store.add_provider("gemini", "Google Gemini", "", 10).await.unwrap();
        let groq = store.add_provider("groq", "Groq", "", 5).await.unwrap();
        let flash = store
            .add_model(gemini, "gemini-2.0-flash", "Gemini 2.0 Flash", 8192, true)
            .await
            .unwrap();
        let llama = store
            .add_model(groq, "llama-3.3-70b", "Llama 3.3 70B", 8192, true)
            .await
            .unwrap();
        store.add_credential(gemini, flash, "key-gemini-1", "gemini main").await.unwrap();
        store.add_credential(groq, llama, "key-groq-1", "groq backup").await.unwrap();
        store
    }

    #[tokio::test]
    async fn get_active_requires_activation() {
        let store = seeded_store().await;
        let err = store.get_active().await.unwrap_err();
        assert!(matches!(err, DatabaseError::NoActiveCredential));

        store.activate(1).await.unwrap();
        let active = store.get_active().await.unwrap();
        assert_eq!(active.id, 1);
        assert_eq!(active.provider_name, "gemini");
        assert_eq!(active.max_tokens, 8192);
    }

    #[tokio::test]
    async fn activate_keeps_single_active_invariant() {
        let store = seeded_store().await;
        store.activate(1).await.unwrap();
        store.activate(2).await.unwrap();
        store.activate(1).await.unwrap();

        let active: Vec<_> = store
            .list_credentials()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);
    }

    #[tokio::test]
    async fn get_active_ignores_disabled_provider() {
        let store = seeded_store().await;
        store.activate(1).await.unwrap();
        store.set_provider_enabled(1, false).await.unwrap();

        let err = store.get_active().await.unwrap_err();
        assert!(matches!(err, DatabaseError::NoActiveCredential));
    }

    #[tokio::test]
    async fn rotation_candidates_order_priority_then_errors() {
        let store = seeded_store().await;
        // groq (priority 5) credential accumulates errors; gemini (priority 10) stays first
        store.report_error(2, "429 rate limit").await.unwrap();

        let candidates = store.rotation_candidates().await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].provider_name, "gemini");
        assert_eq!(candidates[1].error_count, 1);
        assert_eq!(candidates[1].last_error.as_deref(), Some("429 rate limit"));
    }

    #[tokio::test]
    async fn rotation_candidates_never_used_before_used() {
        let store = seeded_store().await;
        // Two gemini credentials at equal priority and error count
        let third = store.add_credential(1, 1, "key-gemini-2", "gemini spare").await.unwrap();
        store.report_success(1).await.unwrap();

        let candidates = store.rotation_candidates().await.unwrap();
        let gemini: Vec<_> = candidates.iter().filter(|c| c.provider_name == "gemini").collect();
        assert_eq!(gemini[0].id, third, "never-used credential sorts first");
        assert_eq!(gemini[1].id, 1);
    }

    #[tokio::test]
    async fn add_credential_rejects_unknown_provider() {
        let store = seeded_store().await;
        let err = store.add_credential(99, 1, "k", "bad").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn custom_model_is_created_once() {
        let store = seeded_store().await;
        store
            .add_credential_with_custom_model(1, "gemini-exp", "k1", "exp a")
            .await
            .unwrap();
        store
            .add_credential_with_custom_model(1, "gemini-exp", "k2", "exp b")
            .await
            .unwrap();

        let models = store.list_models(1).await.unwrap();
        let exp: Vec<_> = models.iter().filter(|m| m.name == "gemini-exp").collect();
        assert_eq!(exp.len(), 1);
    }

    #[tokio::test]
    async fn report_and_reset_error_count() {
        let store = seeded_store().await;
        store.report_error(1, "boom").await.unwrap();
        store.report_error(1, "boom again").await.unwrap();

        let creds = store.list_credentials().await.unwrap();
        let c = creds.iter().find(|c| c.id == 1).unwrap();
        assert_eq!(c.error_count, 2);
        assert_eq!(c.last_error.as_deref(), Some("boom again"));
        assert!(c.last_used_at.is_some());

        store.reset_error_count(1).await.unwrap();
        let creds = store.list_credentials().await.unwrap();
        let c = creds.iter().find(|c| c.id == 1).unwrap();
        assert_eq!(c.error_count, 0);
        assert!(c.last_error.is_none());
    }

    #[tokio::test]
    async fn delete_credential_removes_row() {
        let store = seeded_store().await;
        store.delete_credential(2).await.unwrap();
        let creds = store.list_credentials().await.unwrap();
        assert_eq!(creds.len(), 1);
    }
}
