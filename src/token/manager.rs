//! Token Manager
//!
//! Owns the credential record: persistence, validity checks and the
//! coalesced refresh shared by the 401 path and the background monitor.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::{Clock, SystemClock};
use crate::error::{IdentityError, TokenError};
use crate::token::{
    AuthEvent, CredentialStore, EventRegistry, TokenRefresher, DEFAULT_STORAGE_KEY,
};
use crate::types::CredentialRecord;

type SharedRefresh = Shared<BoxFuture<'static, Result<CredentialRecord, IdentityError>>>;

/// Token manager configuration.
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    /// Key under which the record is stored.
    pub storage_key: String,
}

impl Default for TokenManagerConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

enum Cached {
    Unloaded,
    Loaded(Option<CredentialRecord>),
}

struct ManagerState {
    config: TokenManagerConfig,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Arc<dyn Clock>,
    events: EventRegistry,
    cache: RwLock<Cached>,
}

/// Credential lifecycle manager.
///
/// At most one refresh is in flight per manager; concurrent callers of
/// [`TokenManager::refresh`] share its outcome.
pub struct TokenManager {
    state: Arc<ManagerState>,
    in_flight: Mutex<Option<SharedRefresh>>,
}

impl TokenManager {
    /// Create new token manager.
    pub fn new(
        config: TokenManagerConfig,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self::with_clock(config, store, refresher, Arc::new(SystemClock))
    }

    /// Create token manager with an explicit clock.
    pub fn with_clock(
        config: TokenManagerConfig,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Arc::new(ManagerState {
                config,
                store,
                refresher,
                clock,
                events: EventRegistry::new(),
                cache: RwLock::new(Cached::Unloaded),
            }),
            in_flight: Mutex::new(None),
        }
    }

    /// Emit events through `events` instead of a private registry.
    pub fn with_events(mut self, events: EventRegistry) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.events = events;
        }
        self
    }

    /// Registry on which lifecycle events are emitted.
    pub fn events(&self) -> &EventRegistry {
        &self.state.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.state.clock
    }

    /// Persist `record`, replacing any existing one.
    ///
    /// Persistence failures are logged and swallowed; the in-memory view is
    /// updated regardless.
    pub async fn set_tokens(&self, record: CredentialRecord) -> Result<(), IdentityError> {
        record.validate()?;
        self.state.replace(record).await;
        Ok(())
    }

    /// Current access token, if any. Does not check expiry.
    pub async fn get_access_token(&self) -> Result<Option<String>, IdentityError> {
        Ok(self.state.load().await?.map(|r| r.access_token))
    }

    /// Current refresh token, if any.
    pub async fn get_refresh_token(&self) -> Result<Option<String>, IdentityError> {
        Ok(self.state.load().await?.map(|r| r.refresh_token))
    }

    /// Full credential record, if any.
    pub async fn get_token_data(&self) -> Result<Option<CredentialRecord>, IdentityError> {
        self.state.load().await
    }

    /// Remove the record. Safe when none is stored.
    pub async fn clear_tokens(&self) {
        self.state.clear().await;
    }

    /// True when a record exists and has not reached its expiry.
    pub async fn has_valid_tokens(&self) -> Result<bool, IdentityError> {
        let now = self.state.clock.now_ms();
        Ok(self
            .state
            .load()
            .await?
            .map_or(false, |r| r.is_valid_at(now)))
    }

    /// True when a record exists and expires within `threshold`.
    pub async fn needs_refresh(&self, threshold: Duration) -> Result<bool, IdentityError> {
        let now = self.state.clock.now_ms();
        Ok(self
            .state
            .load()
            .await?
            .map_or(false, |r| r.expires_within(now, threshold)))
    }

    /// Refresh the credentials, joining a refresh already in flight.
    ///
    /// On failure the stored credentials are cleared before the error is
    /// returned to every waiter.
    pub async fn refresh(&self) -> Result<CredentialRecord, IdentityError> {
        let shared = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight credential refresh");
                    existing.clone()
                }
                None => {
                    let state = self.state.clone();
                    let refresh = async move { state.perform_refresh().await }
                        .boxed()
                        .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = shared.clone().await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().map_or(false, |current| current.ptr_eq(&shared)) {
            *slot = None;
        }

        result
    }

    /// Check whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight.lock().is_some()
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("storage_key", &self.state.config.storage_key)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl ManagerState {
    async fn load(&self) -> Result<Option<CredentialRecord>, IdentityError> {
        {
            let cache = self.cache.read().await;
            if let Cached::Loaded(record) = &*cache {
                return Ok(record.clone());
            }
        }

        let mut cache = self.cache.write().await;
        if let Cached::Loaded(record) = &*cache {
            return Ok(record.clone());
        }

        let raw = self
            .store
            .get_item(&self.config.storage_key)
            .await
            .map_err(|e| TokenError::StorageRead {
                message: e.to_string(),
            })?;

        let record = match raw {
            Some(raw) => match serde_json::from_str::<CredentialRecord>(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable stored credentials");
                    None
                }
            },
            None => None,
        };

        *cache = Cached::Loaded(record.clone());
        Ok(record)
    }

    async fn replace(&self, record: CredentialRecord) {
        let mut cache = self.cache.write().await;
        match serde_json::to_string(&record) {
            Ok(serialized) => {
                if let Err(e) = self
                    .store
                    .set_item(&self.config.storage_key, &serialized)
                    .await
                {
                    warn!(error = %e, "Failed to persist credentials");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize credentials"),
        }
        *cache = Cached::Loaded(Some(record));
    }

    async fn clear(&self) {
        let mut cache = self.cache.write().await;
        if let Err(e) = self.store.remove_item(&self.config.storage_key).await {
            warn!(error = %e, "Failed to remove stored credentials");
        }
        *cache = Cached::Loaded(None);
    }

    async fn perform_refresh(&self) -> Result<CredentialRecord, IdentityError> {
        let outcome = match self.load().await {
            Ok(Some(record)) => self.refresher.refresh(&record.refresh_token).await,
            Ok(None) => Err(TokenError::NoRefreshToken.into()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(record) => {
                self.replace(record.clone()).await;
                info!(expires_at = record.expires_at, "Credentials refreshed");
                self.events.emit(&AuthEvent::TokensRefreshed {
                    expires_at: record.expires_at,
                });
                Ok(record)
            }
            Err(error) => {
                warn!(error = %error, "Credential refresh failed, clearing credentials");
                self.clear().await;
                self.events.emit(&AuthEvent::RefreshFailed {
                    reason: error.to_string(),
                });
                Err(error)
            }
        }
    }
}

/// Create token manager backed by the given store and refresher.
pub fn create_token_manager(
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
) -> TokenManager {
    TokenManager::new(TokenManagerConfig::default(), store, refresher)
}
