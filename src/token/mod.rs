//! Token Management
//!
//! Credential lifecycle management including storage, refresh and events.
//!
//! This module provides:
//!
//! - **Credential Storage**: Pluggable stores for the credential record
//! - **Token Manager**: Credential lifecycle with coalesced refresh
//! - **Token Refresher**: Refresh-token exchange against the identity service
//! - **Refresh Monitor**: Background refresh ahead of expiry
//! - **Events**: Observer registry for lifecycle events

pub mod events;
pub mod manager;
pub mod monitor;
pub mod refresher;
pub mod storage;

// Credential Storage
pub use storage::{
    create_in_memory_credential_store, create_mock_credential_store, CredentialStore,
    FileCredentialStore, InMemoryCredentialStore, MockCredentialStore, StorageKind,
    DEFAULT_STORAGE_KEY,
};

// Token Manager
pub use manager::{create_token_manager, TokenManager, TokenManagerConfig};

// Token Refresher
pub use refresher::{
    create_mock_token_refresher, HttpTokenRefresher, MockTokenRefresher, TokenRefresher,
};

// Refresh Monitor
pub use monitor::{RefreshMonitor, DEFAULT_REFRESH_INTERVAL, DEFAULT_REFRESH_THRESHOLD};

// Events
pub use events::{AuthEvent, EventRegistry, Subscription};
