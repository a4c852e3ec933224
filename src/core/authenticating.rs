//! Authenticating Transport
//!
//! Attaches the bearer credential to outgoing requests and recovers from a
//! single 401 by refreshing the credentials and replaying the request once.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::error::{
    create_error_from_response, ConfigurationError, IdentityError, ProtocolError,
};
use crate::token::TokenManager;

/// A request against the identity service, relative to the configured base URL.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Send without credentials and never refresh on 401.
    pub skip_auth: bool,
}

impl ApiRequest {
    /// Create new request.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HashMap::new(),
            body: None,
            skip_auth: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, IdentityError> {
        let body = serde_json::to_string(body).map_err(|e| ProtocolError::InvalidJson {
            message: e.to_string(),
        })?;
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.body = Some(body);
        Ok(self)
    }

    /// Send without credentials.
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }
}

/// Progress of a single request through the refresh-and-replay cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttemptState {
    FirstAttempt,
    RetryAfterRefresh,
}

/// Transport that authenticates requests with the managed credentials.
pub struct AuthenticatingTransport {
    http: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    base_url: Url,
    timeout: Option<Duration>,
}

impl AuthenticatingTransport {
    /// Create new authenticating transport.
    pub fn new(http: Arc<dyn HttpTransport>, tokens: Arc<TokenManager>, base_url: Url) -> Self {
        Self {
            http,
            tokens,
            base_url: normalize_base(base_url),
            timeout: None,
        }
    }

    /// Set a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token_manager(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Resolve `path` against the base URL.
    ///
    /// Absolute URLs are accepted only on the base URL's origin, so managed
    /// credentials are never sent to another host.
    pub fn resolve(&self, path: &str, query: &[(String, String)]) -> Result<Url, IdentityError> {
        let mut url = join_path(&self.base_url, path)?;
        if url.origin() != self.base_url.origin() {
            warn!(url = %url, "Rejecting request outside the identity service origin");
            return Err(ConfigurationError::InvalidEndpoint {
                url: url.to_string(),
            }
            .into());
        }

        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }

        Ok(url)
    }

    /// Send a request, returning the response when its status is 2xx.
    ///
    /// A 401 triggers one coalesced credential refresh followed by exactly one
    /// replay; a second 401 or a failed refresh yields an authentication error.
    /// When the credentials were already replaced while the request was in
    /// flight, the replay uses them without another refresh.
    pub async fn send(&self, request: ApiRequest) -> Result<HttpResponse, IdentityError> {
        let url = self.resolve(&request.path, &request.query)?;
        let mut state = AttemptState::FirstAttempt;

        loop {
            let token = if request.skip_auth {
                None
            } else {
                self.tokens.get_access_token().await?
            };

            let response = self
                .http
                .send(self.build_request(&request, &url, token.as_deref()))
                .await?;

            if response.status != 401 || request.skip_auth {
                return Self::into_result(response);
            }

            match state {
                AttemptState::RetryAfterRefresh => {
                    warn!(url = %url, "Request rejected again after credential refresh");
                    return Err(Self::authentication_error(&response));
                }
                AttemptState::FirstAttempt => {
                    let current = self.tokens.get_access_token().await?;
                    if current.is_some() && current != token {
                        debug!(url = %url, "Received 401 for replaced credentials, replaying");
                    } else {
                        debug!(url = %url, "Received 401, refreshing credentials");
                        if let Err(error) = self.tokens.refresh().await {
                            return Err(IdentityError::Authentication {
                                message: format!("Session expired: {}", error),
                            });
                        }
                    }
                    state = AttemptState::RetryAfterRefresh;
                }
            }
        }
    }

    /// Send a request and deserialize the 2xx JSON body.
    ///
    /// An empty body is read as JSON `null`.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, IdentityError> {
        let response = self.send(request).await?;
        let body = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| {
            ProtocolError::InvalidJson {
                message: e.to_string(),
            }
            .into()
        })
    }

    fn build_request(&self, request: &ApiRequest, url: &Url, token: Option<&str>) -> HttpRequest {
        let mut headers = request.headers.clone();
        headers
            .entry("accept".to_string())
            .or_insert_with(|| "application/json".to_string());
        if let Some(token) = token {
            headers.insert("authorization".to_string(), format!("Bearer {}", token));
        }

        HttpRequest {
            method: request.method,
            url: url.to_string(),
            headers,
            body: request.body.clone(),
            timeout: self.timeout,
        }
    }

    fn into_result(response: HttpResponse) -> Result<HttpResponse, IdentityError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(create_error_from_response(
                response.status,
                &response.headers,
                &response.body,
            ))
        }
    }

    fn authentication_error(response: &HttpResponse) -> IdentityError {
        create_error_from_response(401, &response.headers, &response.body)
    }
}

impl std::fmt::Debug for AuthenticatingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatingTransport")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Resolve `path` under `base`, keeping any path prefix `base` carries.
pub fn join_path(base: &Url, path: &str) -> Result<Url, IdentityError> {
    normalize_base(base.clone())
        .join(path.trim_start_matches('/'))
        .map_err(|_| {
            ConfigurationError::InvalidEndpoint {
                url: path.to_string(),
            }
            .into()
        })
}
