//! Authentication Types
//!
//! Sign-in request and outcome types.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

use crate::types::{CredentialRecord, TokenResponse};

/// Email/password sign-in credentials.
#[derive(Clone, Serialize)]
pub struct SignInCredentials {
    pub email: String,
    #[serde(serialize_with = "expose_secret")]
    pub password: SecretString,
}

impl SignInCredentials {
    /// Create new sign-in credentials.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::new(password.into()),
        }
    }
}

impl std::fmt::Debug for SignInCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInCredentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

fn expose_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Body sent to complete an MFA challenge.
#[derive(Clone, Debug, Serialize)]
pub struct MfaVerification {
    pub challenge_id: String,
    pub code: String,
}

/// Authenticated user profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Wire shape of the sign-in response, discriminated by the server's `type` field.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignInResponse {
    Authenticated {
        user: User,
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        expires_in: u64,
    },
    MfaChallenge {
        challenge_id: String,
        #[serde(default)]
        methods: Vec<String>,
    },
}

/// Result of a sign-in attempt.
#[derive(Clone, Debug)]
pub enum SignInOutcome {
    /// Credentials accepted and stored.
    Authenticated {
        user: User,
        tokens: CredentialRecord,
    },
    /// A second factor is required before tokens are issued.
    MfaChallenge {
        challenge_id: String,
        methods: Vec<String>,
    },
}

impl SignInOutcome {
    /// Check if sign-in completed.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

impl SignInResponse {
    /// Token portion of an authenticated response.
    pub fn token_response(&self) -> Option<TokenResponse> {
        match self {
            Self::Authenticated {
                access_token,
                refresh_token,
                expires_in,
                ..
            } => Some(TokenResponse {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
                expires_in: *expires_in,
            }),
            Self::MfaChallenge { .. } => None,
        }
    }
}
