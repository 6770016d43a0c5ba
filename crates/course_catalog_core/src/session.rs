//! crates/course_catalog_core/src/session.rs
//!
//! Administrator credentials, the login session, and per-client sessions.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::Group;
use crate::ports::LocalStorage;

/// Local-storage key the authenticated group is persisted under.
pub const SESSION_STORAGE_KEY: &str = "l3AuthGroup";

/// Passwords the source deployment shipped with. Only used when nothing is
/// configured.
const DEFAULT_PASSWORDS: [(Group, &str); 3] = [
    (Group::G1, "adminG1pass"),
    (Group::G2, "adminG2pass"),
    (Group::G3, "adminG3pass"),
];

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Invalid password hash for {group}: {reason}")]
    InvalidHash { group: Group, reason: String },
    #[error("Failed to hash password for {group}: {reason}")]
    Hashing { group: Group, reason: String },
}

//=========================================================================================
// Credential Store
//=========================================================================================

/// Maps each group to its administrator's argon2 password hash.
#[derive(Clone, Debug, Default)]
pub struct CredentialStore {
    hashes: HashMap<Group, String>,
}

impl CredentialStore {
    /// Builds the store from PHC-formatted argon2 hashes, validating each one.
    pub fn from_hashes(hashes: HashMap<Group, String>) -> Result<Self, CredentialError> {
        for (group, hash) in &hashes {
            PasswordHash::new(hash).map_err(|e| CredentialError::InvalidHash {
                group: *group,
                reason: e.to_string(),
            })?;
        }
        Ok(Self { hashes })
    }

    /// Hashes plain passwords once, at construction.
    pub fn from_passwords<'a>(
        passwords: impl IntoIterator<Item = (Group, &'a str)>,
    ) -> Result<Self, CredentialError> {
        let mut hashes = HashMap::new();
        for (group, password) in passwords {
            hashes.insert(group, hash_password(group, password)?);
        }
        Ok(Self { hashes })
    }

    /// The source deployment's credentials.
    pub fn defaults() -> Result<Self, CredentialError> {
        warn!("Using the built-in administrator passwords; configure ADMIN_PASSWORD_HASH_* for real deployments.");
        Self::from_passwords(DEFAULT_PASSWORDS)
    }

    pub fn has_credential(&self, group: Group) -> bool {
        self.hashes.contains_key(&group)
    }

    /// True iff `password` matches the credential on file for `group`.
    /// A group without a credential never verifies.
    pub fn verify(&self, group: Group, password: &str) -> bool {
        let Some(hash) = self.hashes.get(&group) else {
            return false;
        };
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

/// Produces an argon2 PHC string for a password.
pub fn hash_password(group: Group, password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CredentialError::Hashing {
            group,
            reason: e.to_string(),
        })
}

//=========================================================================================
// Session Manager
//=========================================================================================

/// Holds one authenticated group, mirrored to local storage under its own key
/// so it survives restarts.
pub struct SessionManager {
    credentials: Arc<CredentialStore>,
    storage: Arc<dyn LocalStorage>,
    storage_key: String,
    current: RwLock<Option<Group>>,
}

impl SessionManager {
    /// Creates the manager over [`SESSION_STORAGE_KEY`], restoring a
    /// previously persisted group if the stored value is still a valid one.
    pub async fn restore(credentials: CredentialStore, storage: Arc<dyn LocalStorage>) -> Self {
        Self::restore_at(Arc::new(credentials), storage, SESSION_STORAGE_KEY).await
    }

    /// Like [`SessionManager::restore`], persisting under `storage_key`.
    pub async fn restore_at(
        credentials: Arc<CredentialStore>,
        storage: Arc<dyn LocalStorage>,
        storage_key: impl Into<String>,
    ) -> Self {
        let storage_key = storage_key.into();
        let restored = match storage.get(&storage_key).await {
            Ok(Some(value)) => match value.parse::<Group>() {
                Ok(group) => {
                    info!("Restored administrator session for {}", group);
                    Some(group)
                }
                Err(e) => {
                    warn!("Ignoring persisted session: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load session from local storage: {}", e);
                None
            }
        };

        Self {
            credentials,
            storage,
            storage_key,
            current: RwLock::new(restored),
        }
    }

    fn logged_out(
        credentials: Arc<CredentialStore>,
        storage: Arc<dyn LocalStorage>,
        storage_key: String,
    ) -> Self {
        Self {
            credentials,
            storage,
            storage_key,
            current: RwLock::new(None),
        }
    }

    pub async fn current_group(&self) -> Option<Group> {
        *self.current.read().await
    }

    /// Logs `group` in if the password matches. A failed attempt leaves the
    /// session exactly as it was.
    pub async fn login(&self, group: Group, password: &str) -> bool {
        if !self.credentials.verify(group, password) {
            info!("Rejected login attempt for {}", group);
            return false;
        }

        // The guard stays held until the record is written so memory and
        // storage never disagree.
        let mut current = self.current.write().await;
        *current = Some(group);
        if let Err(e) = self.storage.set(&self.storage_key, group.as_str()).await {
            warn!("Logged in as {} but failed to persist the session: {}", group, e);
        }
        info!("Administrator logged in for {}", group);
        true
    }

    pub async fn logout(&self) {
        let mut current = self.current.write().await;
        let previous = current.take();
        if let Err(e) = self.storage.remove(&self.storage_key).await {
            warn!("Failed to clear persisted session: {}", e);
        }
        if let Some(group) = previous {
            info!("Administrator logged out of {}", group);
        }
    }
}

//=========================================================================================
// Client Sessions
//=========================================================================================

/// Local-storage key holding the live client session tokens and their expiry.
pub const CLIENT_SESSIONS_KEY: &str = "adminSessions";

/// How long a client session stays valid after login.
pub const SESSION_TTL_DAYS: i64 = 30;

fn client_session_key(token: &str) -> String {
    format!("adminSession:{}", token)
}

/// A logged-in client as seen by a request.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub token: String,
    pub group: Group,
    pub expires_at: DateTime<Utc>,
    ended: CancellationToken,
}

impl ActiveSession {
    /// Resolves once the session is logged out or found expired.
    pub async fn ended(&self) {
        self.ended.cancelled().await
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }
}

struct ClientSession {
    manager: SessionManager,
    expires_at: DateTime<Utc>,
    ended: CancellationToken,
}

/// Administrator sessions keyed by an opaque per-client token. Each token
/// owns a [`SessionManager`], so one client's login never authorizes another.
pub struct SessionRegistry {
    credentials: Arc<CredentialStore>,
    storage: Arc<dyn LocalStorage>,
    sessions: Mutex<HashMap<String, ClientSession>>,
}

impl SessionRegistry {
    /// Creates the registry, restoring every persisted token that has not
    /// expired and still names a valid group.
    pub async fn restore(credentials: CredentialStore, storage: Arc<dyn LocalStorage>) -> Self {
        let credentials = Arc::new(credentials);
        let index: HashMap<String, DateTime<Utc>> = match storage.get(CLIENT_SESSIONS_KEY).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable session index: {}", e);
                HashMap::new()
            }),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Failed to load session index from local storage: {}", e);
                HashMap::new()
            }
        };

        let now = Utc::now();
        let mut sessions = HashMap::new();
        for (token, expires_at) in index {
            let key = client_session_key(&token);
            let manager =
                SessionManager::restore_at(credentials.clone(), storage.clone(), key).await;
            if expires_at <= now || manager.current_group().await.is_none() {
                manager.logout().await;
                continue;
            }
            sessions.insert(
                token,
                ClientSession {
                    manager,
                    expires_at,
                    ended: CancellationToken::new(),
                },
            );
        }
        if !sessions.is_empty() {
            info!("Restored {} administrator sessions", sessions.len());
        }

        let registry = Self {
            credentials,
            storage,
            sessions: Mutex::new(sessions),
        };
        {
            let sessions = registry.sessions.lock().await;
            registry.persist_index(&sessions).await;
        }
        registry
    }

    /// Starts a new client session if the password matches the group's
    /// credential.
    pub async fn login(&self, group: Group, password: &str) -> Option<ActiveSession> {
        let token = Uuid::new_v4().simple().to_string();
        let manager = SessionManager::logged_out(
            self.credentials.clone(),
            self.storage.clone(),
            client_session_key(&token),
        );
        if !manager.login(group, password).await {
            return None;
        }

        let session = ClientSession {
            manager,
            expires_at: Utc::now() + Duration::days(SESSION_TTL_DAYS),
            ended: CancellationToken::new(),
        };
        let active = ActiveSession {
            token: token.clone(),
            group,
            expires_at: session.expires_at,
            ended: session.ended.clone(),
        };

        let mut sessions = self.sessions.lock().await;
        sessions.insert(token, session);
        self.persist_index(&sessions).await;
        Some(active)
    }

    /// The session behind `token`, if it is live. Expired sessions are ended
    /// and forgotten here.
    pub async fn resolve(&self, token: &str) -> Option<ActiveSession> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get(token)?;
        let group = session.manager.current_group().await;
        let expires_at = session.expires_at;
        let ended = session.ended.clone();

        if let Some(group) = group.filter(|_| expires_at > Utc::now()) {
            return Some(ActiveSession {
                token: token.to_string(),
                group,
                expires_at,
                ended,
            });
        }

        if let Some(expired) = sessions.remove(token) {
            debug!("Administrator session expired");
            expired.manager.logout().await;
            expired.ended.cancel();
        }
        self.persist_index(&sessions).await;
        None
    }

    /// Ends the session behind `token` only. Returns the group it was for.
    pub async fn logout(&self, token: &str) -> Option<Group> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.remove(token)?;
        let group = session.manager.current_group().await;
        session.manager.logout().await;
        session.ended.cancel();
        self.persist_index(&sessions).await;
        group
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn persist_index(&self, sessions: &HashMap<String, ClientSession>) {
        let index: HashMap<&str, DateTime<Utc>> = sessions
            .iter()
            .map(|(token, session)| (token.as_str(), session.expires_at))
            .collect();
        let result = match serde_json::to_string(&index) {
            Ok(raw) => self.storage.set(CLIENT_SESSIONS_KEY, &raw).await,
            Err(e) => {
                warn!("Failed to encode session index: {}", e);
                return;
            }
        };
        if let Err(e) = result {
            warn!("Failed to persist session index: {}", e);
        }
    }
}
