use std::future::Future;
use std::io;
use std::path::PathBuf;

use fs_err as fs;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// How long a user token is valid from issue, in epoch milliseconds.
pub const USER_TOKEN_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Refresh a user token once it is this close to expiry.
const REFRESH_THRESHOLD_MS: i64 = 3 * 24 * 60 * 60 * 1000;

/// Tokens prefixed with this are CI tokens and never expire.
const CI_TOKEN_PREFIX: &str = "ci_";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to parse auth record")]
    Malformed(#[from] serde_json::Error),
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    User,
    Ci,
}

/// The persisted registry session (`auth.json`).
///
/// Logout is modeled as a record with an empty token, not a deleted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub org_id: String,
    pub token_type: TokenType,
    /// Epoch milliseconds; `None` for CI tokens, which never expire.
    pub expires_at: Option<i64>,
}

impl AuthRecord {
    /// Classify a token and stamp its expiry.
    pub fn new(token: String, org_id: String, email: Option<String>) -> Self {
        let token_type = classify(&token);
        let expires_at = match token_type {
            TokenType::Ci => None,
            TokenType::User => Some(Timestamp::now().as_millisecond() + USER_TOKEN_TTL_MS),
        };
        Self {
            token,
            email,
            org_id,
            token_type,
            expires_at,
        }
    }

    fn logged_out(org_id: String) -> Self {
        Self {
            token: String::new(),
            email: None,
            org_id,
            token_type: TokenType::User,
            expires_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Timestamp::now().as_millisecond() >= expires_at,
            None => false,
        }
    }

    fn expires_within(&self, threshold_ms: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => Timestamp::now().as_millisecond() + threshold_ms >= expires_at,
            None => false,
        }
    }
}

/// `ci_`-prefixed tokens belong to CI; everything else is a user session.
pub(crate) fn classify(token: &str) -> TokenType {
    if token.starts_with(CI_TOKEN_PREFIX) {
        TokenType::Ci
    } else {
        TokenType::User
    }
}

/// Token lifecycle over the single-file `auth.json` store.
#[derive(Debug)]
pub struct AuthManager {
    path: PathBuf,
    /// Serializes refreshes; concurrent requests that all observe an
    /// expiring token coalesce onto one exchange.
    refresh_lock: Mutex<()>,
}

impl AuthManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The stored record, if the file exists and parses.
    pub fn load(&self) -> Result<Option<AuthRecord>, AuthError> {
        match fs::read(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn store(&self, record: &AuthRecord) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(record)?)?;
        Ok(())
    }

    /// Overwrite the record with an empty token, keeping the org for the
    /// next login.
    pub fn logout(&self) -> Result<(), AuthError> {
        let org_id = self
            .load()?
            .map(|record| record.org_id)
            .unwrap_or_default();
        self.store(&AuthRecord::logged_out(org_id))
    }

    /// A non-empty, non-expired token is an authenticated session.
    pub fn is_authenticated(&self) -> bool {
        self.load()
            .ok()
            .flatten()
            .is_some_and(|record| !record.token.is_empty() && !record.is_expired())
    }

    /// The token to attach to requests, if any.
    pub fn token(&self) -> Option<String> {
        self.load()
            .ok()
            .flatten()
            .filter(|record| !record.token.is_empty() && !record.is_expired())
            .map(|record| record.token)
    }

    /// Exchange a user token nearing expiry for a fresh one.
    ///
    /// The exchange itself is an opaque callable; this method owns the
    /// single-flight discipline and the re-persist. Returns the token to
    /// use for the next request.
    pub async fn refresh_if_needed<F, Fut>(&self, exchange: F) -> Result<Option<String>, AuthError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<String, AuthError>>,
    {
        let Some(record) = self.load()? else {
            return Ok(None);
        };
        if record.token.is_empty() || record.token_type == TokenType::Ci {
            return Ok(Some(record.token).filter(|token| !token.is_empty()));
        }
        if !record.expires_within(REFRESH_THRESHOLD_MS) {
            return Ok(Some(record.token));
        }

        let _guard = self.refresh_lock.lock().await;

        // Someone else may have refreshed while we waited for the lock.
        let Some(record) = self.load()? else {
            return Ok(None);
        };
        if !record.expires_within(REFRESH_THRESHOLD_MS) {
            return Ok(Some(record.token));
        }

        debug!("Refreshing registry token for {}", record.org_id);
        let token = exchange(record.token.clone()).await?;
        let refreshed = AuthRecord::new(token.clone(), record.org_id, record.email);
        self.store(&refreshed)?;
        Ok(Some(token))
    }
}
