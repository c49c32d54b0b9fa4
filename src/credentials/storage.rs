//! Encrypted credential storage using SQLite.

use super::{Credential, CredentialStore, TokenCipher};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed [`CredentialStore`].
///
/// # Schema
/// ```sql
/// CREATE TABLE slack_credentials (
///     id INTEGER PRIMARY KEY,
///     local_user_id TEXT NOT NULL,
///     team_id TEXT NOT NULL,
///     team_name TEXT,
///     platform_user_id TEXT,
///     access_token TEXT NOT NULL,   -- sealed
///     refresh_token TEXT,           -- sealed (optional)
///     expires_at TEXT,              -- RFC 3339 (optional)
///     scopes TEXT NOT NULL,         -- comma separated
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(local_user_id, team_id)
/// );
/// ```
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

impl SqliteCredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher =
            TokenCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS slack_credentials (
                id INTEGER PRIMARY KEY,
                local_user_id TEXT NOT NULL,
                team_id TEXT NOT NULL,
                team_name TEXT,
                platform_user_id TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT,
                scopes TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(local_user_id, team_id)
            );
            CREATE INDEX IF NOT EXISTS idx_credentials_user
                ON slack_credentials(local_user_id, updated_at);
            "#,
        )
        .context("Failed to create credentials schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential database lock poisoned"))
    }

    fn decode_row(&self, row: &Row<'_>) -> Result<Credential> {
        let access_token: String = row.get("access_token")?;
        let refresh_token: Option<String> = row.get("refresh_token")?;
        let expires_at: Option<String> = row.get("expires_at")?;
        let scopes: String = row.get("scopes")?;

        let expires_at = expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("Failed to parse expires_at timestamp")?;

        Ok(Credential {
            local_user_id: row.get("local_user_id")?,
            team_id: row.get("team_id")?,
            team_name: row.get("team_name")?,
            platform_user_id: row.get("platform_user_id")?,
            access_token: self
                .cipher
                .open(&access_token)
                .context("Failed to decrypt access token")?,
            refresh_token: refresh_token
                .map(|t| self.cipher.open(&t))
                .transpose()
                .context("Failed to decrypt refresh token")?,
            expires_at,
            scopes: scopes
                .split(',')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        })
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, local_user_id: &str) -> Result<Option<Credential>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT local_user_id, team_id, team_name, platform_user_id,
                       access_token, refresh_token, expires_at, scopes
                FROM slack_credentials
                WHERE local_user_id = ?1
                ORDER BY updated_at DESC, id DESC
                LIMIT 1
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![local_user_id])
            .context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => self.decode_row(row).map(Some),
            None => Ok(None),
        }
    }

    fn upsert(&self, credential: &Credential) -> Result<()> {
        let access_token = self
            .cipher
            .seal(&credential.access_token)
            .context("Failed to encrypt access token")?;
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.seal(t))
            .transpose()
            .context("Failed to encrypt refresh token")?;
        let expires_at = credential.expires_at.map(|dt| dt.to_rfc3339());
        let scopes = credential.scopes.join(",");
        // Nanosecond precision keeps same-second writes ordered for `get`
        let now = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);

        self.conn()?
            .execute(
                r#"
                INSERT INTO slack_credentials (
                    local_user_id, team_id, team_name, platform_user_id,
                    access_token, refresh_token, expires_at, scopes,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                ON CONFLICT(local_user_id, team_id) DO UPDATE SET
                    team_name = excluded.team_name,
                    platform_user_id = excluded.platform_user_id,
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_at = excluded.expires_at,
                    scopes = excluded.scopes,
                    updated_at = excluded.updated_at
                "#,
                params![
                    credential.local_user_id,
                    credential.team_id,
                    credential.team_name,
                    credential.platform_user_id,
                    access_token,
                    refresh_token,
                    expires_at,
                    scopes,
                    now,
                ],
            )
            .context("Failed to store credentials")?;

        Ok(())
    }

    fn delete(&self, local_user_id: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM slack_credentials WHERE local_user_id = ?1",
                params![local_user_id],
            )
            .context("Failed to delete credentials")?;

        Ok(rows_affected > 0)
    }
}

#[cfg(test)]
impl SqliteCredentialStore {
    /// Number of workspaces the user has connected.
    fn count_for_user(&self, local_user_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(*) FROM slack_credentials WHERE local_user_id = ?1",
                params![local_user_id],
                |row| row.get(0),
            )
            .context("Failed to count credentials")?;
        Ok(count as usize)
    }
}
