#![forbid(unsafe_code)]

//! OAuth2 authorization-code flow for an installed application.
//!
//! The first run prints an authorization URL, waits for the operator to paste
//! back the code and stores the resulting token under the token directory.
//! Later runs reuse that token and refresh it when it expires. Everything that
//! needs a bearer token goes through [`CredentialProvider`], so tests and the
//! `ENGAGE_ACCESS_TOKEN` override can plug in a fixed token instead.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::AuthError;
use crate::security::{redact, restrict_to_owner};

pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Key under which the single account's token is stored.
pub const DEFAULT_USER: &str = "user";

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Anything that can hand out a bearer token for API calls.
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self) -> Result<String, AuthError>;
}

/// A token supplied from outside (environment, tests). Never refreshed.
#[derive(Debug, Clone)]
pub struct PreProvisionedToken(String);

impl PreProvisionedToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for PreProvisionedToken {
    fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

/// Parsed client-secret descriptor as downloaded from the Google console.
#[derive(Debug, Clone)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: Url,
    pub token_uri: String,
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<SecretsBody>,
    web: Option<SecretsBody>,
}

#[derive(Deserialize)]
struct SecretsBody {
    client_id: String,
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        if !path.is_file() {
            return Err(AuthError::MissingClientSecrets {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path).map_err(|source| AuthError::Store {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &raw)
    }

    fn parse(path: &Path, raw: &str) -> Result<Self, AuthError> {
        let invalid = |reason: String| AuthError::InvalidClientSecrets {
            path: path.to_path_buf(),
            reason,
        };
        let file: SecretsFile = serde_json::from_str(raw).map_err(|err| invalid(err.to_string()))?;
        let body = file
            .installed
            .or(file.web)
            .ok_or_else(|| invalid("expected an \"installed\" or \"web\" section".into()))?;
        let auth_uri = body.auth_uri.as_deref().unwrap_or(DEFAULT_AUTH_URI);
        let auth_uri = Url::parse(auth_uri).map_err(|err| invalid(format!("auth_uri: {err}")))?;
        Ok(Self {
            client_id: body.client_id,
            client_secret: body.client_secret,
            auth_uri,
            token_uri: body
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            redirect_uris: body.redirect_uris,
        })
    }

    /// Out-of-band unless the descriptor lists its own redirect URIs.
    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .iter()
            .map(String::as_str)
            .find(|uri| !uri.is_empty())
            .unwrap_or(OOB_REDIRECT_URI)
    }
}

/// Token material as persisted in the token directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl StoredToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(EXPIRY_SKEW_SECS) <= now,
            None => false,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl TokenResponse {
    /// Google omits the refresh token on refresh responses, so the previous
    /// one carries over.
    fn into_stored(self, now: DateTime<Utc>, previous_refresh: Option<String>) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self.expires_in.map(|secs| now + Duration::seconds(secs)),
            scope: self.scope,
        }
    }
}

#[derive(Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

fn token_error_reason(status: u16, body: &str) -> String {
    match serde_json::from_str::<TokenErrorBody>(body) {
        Ok(TokenErrorBody {
            error_description: Some(description),
            ..
        }) => format!("HTTP {status}: {description}"),
        Ok(TokenErrorBody {
            error: Some(error), ..
        }) => format!("HTTP {status}: {error}"),
        _ => format!("HTTP {status}: {}", body.trim()),
    }
}

/// Directory of per-user token files.
#[derive(Debug, Clone)]
pub struct TokenStore {
    dir: PathBuf,
}

impl TokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{user}.json"))
    }

    /// Returns `None` when nothing is stored. A corrupt file counts as
    /// "nothing stored" so the interactive flow can replace it.
    pub fn load(&self, user: &str) -> Result<Option<StoredToken>, AuthError> {
        let path = self.path_for(user);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|source| AuthError::Store {
            path: path.clone(),
            source,
        })?;
        match serde_json::from_str(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!("ignoring unreadable token file {}: {err}", path.display());
                Ok(None)
            }
        }
    }

    /// Writes the token atomically and restricts it to the owner.
    pub fn save(&self, user: &str, token: &StoredToken) -> Result<(), AuthError> {
        let store_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| AuthError::Store { path, source }
        };
        fs::create_dir_all(&self.dir).map_err(store_err(&self.dir))?;
        let path = self.path_for(user);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(token).map_err(|err| AuthError::Store {
            path: path.clone(),
            source: err.into(),
        })?;
        fs::write(&tmp_path, body).map_err(store_err(&tmp_path))?;
        restrict_to_owner(&tmp_path).map_err(store_err(&tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(store_err(&path))?;
        debug!("stored token at {}", path.display());
        Ok(())
    }
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        Self::from_verifier(random_urlsafe(32))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Pulls the code out of whatever the operator pasted: either the bare code
/// or the full redirect URL carrying a `code` query parameter.
pub fn extract_code(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(trimmed)
        && url.has_host()
    {
        return url
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .filter(|code| !code.is_empty());
    }
    Some(trimmed.to_string())
}

/// Client-side half of the authorization-code grant.
#[derive(Clone)]
pub struct OAuthFlow {
    secrets: ClientSecrets,
    scope: String,
    agent: ureq::Agent,
}

impl OAuthFlow {
    pub fn new(secrets: ClientSecrets, scope: impl Into<String>, agent: ureq::Agent) -> Self {
        Self {
            secrets,
            scope: scope.into(),
            agent,
        }
    }

    pub fn authorization_url(&self, pkce: &Pkce, state: &str) -> String {
        let mut url = self.secrets.auth_uri.clone();
        url.query_pairs_mut()
            .append_pair("client_id", self.secrets.client_id.as_str())
            .append_pair("redirect_uri", self.secrets.redirect_uri())
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scope)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        url.into()
    }

    pub fn exchange_code(&self, code: &str, pkce: &Pkce) -> Result<StoredToken, AuthError> {
        let now = Utc::now();
        let response = self
            .agent
            .post(&self.secrets.token_uri)
            .send_form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("redirect_uri", self.secrets.redirect_uri()),
                ("code_verifier", pkce.verifier.as_str()),
            ]);
        match response {
            Ok(response) => {
                let parsed: TokenResponse =
                    response
                        .into_json()
                        .map_err(|err| AuthError::CodeRejected {
                            code: code.to_string(),
                            reason: format!("unreadable token response: {err}"),
                        })?;
                Ok(parsed.into_stored(now, None))
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(AuthError::CodeRejected {
                    code: code.to_string(),
                    reason: token_error_reason(status, &body),
                })
            }
            Err(err) => Err(AuthError::Transport {
                reason: err.to_string(),
            }),
        }
    }

    pub fn refresh(&self, token: &StoredToken) -> Result<StoredToken, AuthError> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NoRefreshToken)?;
        let now = Utc::now();
        let response = self
            .agent
            .post(&self.secrets.token_uri)
            .send_form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
            ]);
        match response {
            Ok(response) => {
                let parsed: TokenResponse =
                    response
                        .into_json()
                        .map_err(|err| AuthError::RefreshFailed {
                            reason: format!("unreadable token response: {err}"),
                        })?;
                Ok(parsed.into_stored(now, token.refresh_token.clone()))
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(AuthError::RefreshFailed {
                    reason: token_error_reason(status, &body),
                })
            }
            Err(err) => Err(AuthError::Transport {
                reason: err.to_string(),
            }),
        }
    }
}

/// Stored token that refreshes itself (and the stored copy) on expiry.
pub struct RefreshingCredential {
    flow: OAuthFlow,
    store: TokenStore,
    user: String,
    token: Mutex<StoredToken>,
}

impl RefreshingCredential {
    pub fn new(flow: OAuthFlow, store: TokenStore, user: &str, token: StoredToken) -> Self {
        Self {
            flow,
            store,
            user: user.to_string(),
            token: Mutex::new(token),
        }
    }

    pub fn snapshot(&self) -> StoredToken {
        self.token.lock().clone()
    }
}

impl CredentialProvider for RefreshingCredential {
    fn access_token(&self) -> Result<String, AuthError> {
        let mut token = self.token.lock();
        if token.is_expired_at(Utc::now()) {
            debug!("access token {} expired; refreshing", redact(&token.access_token));
            let refreshed = self.flow.refresh(&token)?;
            self.store.save(&self.user, &refreshed)?;
            *token = refreshed;
        }
        Ok(token.access_token.clone())
    }
}

/// Produces a [`RefreshingCredential`], from storage when possible and via
/// the interactive manual-code flow otherwise.
pub struct Authenticator {
    flow: OAuthFlow,
    store: TokenStore,
    user: String,
}

impl Authenticator {
    /// Fails with [`AuthError::MissingClientSecrets`] when the descriptor is
    /// absent.
    pub fn new(
        client_secrets: &Path,
        tokens_dir: &Path,
        scope: &str,
        agent: ureq::Agent,
    ) -> Result<Self, AuthError> {
        let secrets = ClientSecrets::load(client_secrets)?;
        Ok(Self::from_parts(
            OAuthFlow::new(secrets, scope, agent),
            TokenStore::new(tokens_dir),
        ))
    }

    pub fn from_parts(flow: OAuthFlow, store: TokenStore) -> Self {
        Self {
            flow,
            store,
            user: DEFAULT_USER.to_string(),
        }
    }

    pub fn authorize<R, W>(self, input: &mut R, output: &mut W) -> Result<RefreshingCredential, AuthError>
    where
        R: BufRead,
        W: Write,
    {
        if let Some(token) = self.usable_stored_token()? {
            info!("using stored credentials from {}", self.store.path_for(&self.user).display());
            return Ok(RefreshingCredential::new(self.flow, self.store, &self.user, token));
        }

        let token = self.run_interactive(input, output)?;
        self.store.save(&self.user, &token)?;
        info!("authorization stored at {}", self.store.path_for(&self.user).display());
        Ok(RefreshingCredential::new(self.flow, self.store, &self.user, token))
    }

    /// The stored token when it is still valid or can be refreshed now. A
    /// refresh the token endpoint rejects counts as nothing stored.
    fn usable_stored_token(&self) -> Result<Option<StoredToken>, AuthError> {
        let Some(token) = self.store.load(&self.user)? else {
            return Ok(None);
        };
        if !token.is_expired_at(Utc::now()) {
            return Ok(Some(token));
        }
        if token.refresh_token.is_none() {
            return Ok(None);
        }
        match self.flow.refresh(&token) {
            Ok(refreshed) => {
                self.store.save(&self.user, &refreshed)?;
                Ok(Some(refreshed))
            }
            Err(AuthError::RefreshFailed { reason }) => {
                warn!(
                    "stored credentials at {} could not be refreshed ({reason}); authorizing again",
                    self.store.path_for(&self.user).display()
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn run_interactive<R, W>(&self, input: &mut R, output: &mut W) -> Result<StoredToken, AuthError>
    where
        R: BufRead,
        W: Write,
    {
        let pkce = Pkce::generate();
        let state = random_urlsafe(16);
        let url = self.flow.authorization_url(&pkce, &state);

        writeln!(output, "Please open the following URL in your browser to authorize the application:")
            .and_then(|_| writeln!(output, "{url}"))
            .and_then(|_| write!(output, "Enter the authorization code: "))
            .and_then(|_| output.flush())
            .map_err(AuthError::Prompt)?;

        let mut line = String::new();
        input.read_line(&mut line).map_err(AuthError::Prompt)?;
        let code = extract_code(&line).ok_or(AuthError::EmptyCode)?;
        self.flow.exchange_code(&code, &pkce)
    }
}
