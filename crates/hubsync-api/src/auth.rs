// Hub authentication service client
//
// Password login and cookie-based refresh against `/auth/login` and
// `/auth/refresh`. The refresh credential lives in a secure cookie held by
// the client's jar; the access token returned by both calls is a JWT used
// as bearer token for the directory and as the message bus password.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Default port of the hub authentication service.
pub const DEFAULT_AUTH_PORT: u16 = 8881;

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    login: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct JwtClaims {
    #[serde(default)]
    exp: Option<i64>,
}

// ── SessionTokens ───────────────────────────────────────────────────

/// Process-scoped access token cache keyed by account id.
///
/// Every `AuthClient` created with the same cache restores the token
/// stored for its account, so re-creating clients (on reconnect or account
/// switch back) does not force a new login. Nothing is written to disk.
#[derive(Debug, Clone, Default)]
pub struct SessionTokens {
    inner: Arc<DashMap<String, SecretString>>,
}

impl SessionTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: &str) -> Option<SecretString> {
        self.inner.get(account_id).map(|t| t.value().clone())
    }

    pub fn insert(&self, account_id: &str, token: SecretString) {
        self.inner.insert(account_id.to_owned(), token);
    }

    pub fn remove(&self, account_id: &str) {
        self.inner.remove(account_id);
    }
}

// ── AuthClient ──────────────────────────────────────────────────────

/// Client for a hub authentication service.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: Url,
    account_id: String,
    sessions: SessionTokens,
}

impl AuthClient {
    /// Create a client for the auth service at `base_url`.
    ///
    /// A cookie jar is added to the transport when it has none, since
    /// refresh depends on the cookie set by login.
    pub fn new(
        account_id: impl Into<String>,
        base_url: Url,
        transport: &TransportConfig,
        sessions: SessionTokens,
    ) -> Result<Self, Error> {
        let http = if transport.cookie_jar.is_some() {
            transport.build_client()?
        } else {
            transport.clone().with_cookie_jar().build_client()?
        };

        Ok(Self {
            http,
            base_url,
            account_id: account_id.into(),
            sessions,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The token currently held for this account, if any.
    pub fn access_token(&self) -> Option<SecretString> {
        self.sessions.get(&self.account_id)
    }

    /// Forget the held token.
    pub fn clear(&self) {
        self.sessions.remove(&self.account_id);
    }

    /// Log in with a login id and password.
    ///
    /// With `remember_me` the service also sets a refresh cookie used by
    /// [`refresh`](Self::refresh). On failure the previously held token
    /// is left in place.
    pub async fn login(
        &self,
        login_id: &str,
        password: &SecretString,
        remember_me: bool,
    ) -> Result<SecretString, Error> {
        let url = self.base_url.join(LOGIN_PATH)?;
        debug!(%url, login_id, "logging in");

        let body = LoginRequest {
            login: login_id,
            password: password.expose_secret(),
            remember_me,
        };

        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!(login_id, "login rejected");
            return Err(Error::Unauthorized {
                status: status.as_u16(),
                message: "Authentication Error".into(),
            });
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(Error::Unauthorized {
                status: status.as_u16(),
                message: format!("Authentication failed: {status}"),
            });
        }

        let token = self.store_token(resp).await?;
        debug!(login_id, "login successful");
        Ok(token)
    }

    /// Obtain a new access token using the refresh cookie.
    ///
    /// Fails with [`Error::Unauthorized`] when the service holds no valid
    /// refresh credential; callers then fall back to password login.
    pub async fn refresh(&self) -> Result<SecretString, Error> {
        let url = self.base_url.join(REFRESH_PATH)?;
        debug!(%url, account_id = %self.account_id, "refreshing access token");

        let resp = self.http.post(url).send().await?;
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(Error::Unauthorized {
                status: status.as_u16(),
                message: "Authentication Error".into(),
            });
        }

        let token = self.store_token(resp).await?;
        debug!(account_id = %self.account_id, "access token refreshed");
        Ok(token)
    }

    /// Seconds until the held token expires, `0` when there is no token,
    /// it carries no `exp` claim, or it already expired.
    pub fn remaining_validity_secs(&self) -> u64 {
        self.access_token()
            .map_or(0, |t| token_remaining_secs(t.expose_secret(), chrono::Utc::now().timestamp()))
    }

    async fn store_token(&self, resp: reqwest::Response) -> Result<SecretString, Error> {
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Err(Error::Response {
                message: "empty response from auth service".into(),
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        let token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Response {
                message: "auth response has no accessToken".into(),
            })?;

        let token = SecretString::from(token);
        self.sessions.insert(&self.account_id, token.clone());
        Ok(token)
    }
}

// ── JWT expiry ──────────────────────────────────────────────────────

/// Remaining validity of a JWT relative to `now` (unix seconds).
///
/// The signature is not verified; only the `exp` claim is read.
pub fn token_remaining_secs(token: &str, now: i64) -> u64 {
    let Some(payload) = token.split('.').nth(1) else {
        return 0;
    };
    let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return 0;
    };
    let Ok(claims) = serde_json::from_slice::<JwtClaims>(&bytes) else {
        return 0;
    };

    claims
        .exp
        .map_or(0, |exp| u64::try_from(exp.saturating_sub(now)).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user","exp":{exp}}}"#));
        format!("{header}.{claims}.signature")
    }

    #[test]
    fn remaining_secs_counts_down() {
        let token = jwt_with_exp(1_000_600);
        assert_eq!(token_remaining_secs(&token, 1_000_000), 600);
    }

    #[test]
    fn expired_token_is_zero() {
        let token = jwt_with_exp(1_000_000);
        assert_eq!(token_remaining_secs(&token, 2_000_000), 0);
    }

    #[test]
    fn malformed_tokens_are_zero() {
        assert_eq!(token_remaining_secs("", 0), 0);
        assert_eq!(token_remaining_secs("not-a-jwt", 0), 0);
        assert_eq!(token_remaining_secs("a.!!!.c", 0), 0);
        let no_exp = format!("h.{}.s", URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#));
        assert_eq!(token_remaining_secs(&no_exp, 0), 0);
    }

    #[test]
    fn session_tokens_are_shared_between_clones() {
        let tokens = SessionTokens::new();
        let other = tokens.clone();
        tokens.insert("acct", SecretString::from("abc".to_owned()));
        assert_eq!(
            other.get("acct").map(|t| t.expose_secret().to_owned()),
            Some("abc".to_owned())
        );
        other.remove("acct");
        assert!(tokens.get("acct").is_none());
    }
}
