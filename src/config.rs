#![forbid(unsafe_code)]

//! Runtime configuration. File locations come from CLI overrides, the process
//! environment or a `.env` file (in that order); the engagement parameters
//! themselves are compiled-in constants gathered in [`EngagementConfig`].

use anyhow::{Context, Result};
use chrono::Duration;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CLIENT_SECRETS: &str = "client_secrets.json";
pub const DEFAULT_TOKENS_DIR: &str = "tokens";

pub const CLIENT_SECRETS_KEY: &str = "ENGAGE_CLIENT_SECRETS";
pub const TOKENS_DIR_KEY: &str = "ENGAGE_TOKENS_DIR";
pub const ACCESS_TOKEN_KEY: &str = "ENGAGE_ACCESS_TOKEN";

/// Full read/write access over TLS; covers search, rating, subscriptions and
/// comments.
pub const FORCE_SSL_SCOPE: &str = "https://www.googleapis.com/auth/youtube.force-ssl";

pub const DEFAULT_QUERIES: [&str; 6] = [
    "spawnpk giveaway",
    "spawnpk ga",
    "giveaway spawnpk",
    "ga spawnpk",
    "spawnpk collection log",
    "collection log spawnpk",
];

pub const DEFAULT_COMMENT_TEXT: &str = "ign: adam200214";
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Hard cap the search endpoint applies to a single page.
pub const MAX_SEARCH_RESULTS: usize = 50;

/// Whether the comment step looks for an existing comment by the acting
/// account before posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommentPolicy {
    /// Post on every run, even when a comment by this account already exists.
    Always,
    /// Post only when a fresh check finds no top-level comment by this account.
    #[default]
    SkipIfPresent,
}

/// Parameters shared by discovery and the engagement processor.
#[derive(Debug, Clone)]
pub struct EngagementConfig {
    pub queries: Vec<String>,
    pub comment_text: String,
    pub lookback: Duration,
    pub scope: String,
    pub comment_policy: CommentPolicy,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            queries: DEFAULT_QUERIES.iter().map(|query| query.to_string()).collect(),
            comment_text: DEFAULT_COMMENT_TEXT.to_string(),
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
            scope: FORCE_SSL_SCOPE.to_string(),
            comment_policy: CommentPolicy::default(),
        }
    }
}

/// Where credentials live on disk, plus an optional pre-provisioned token.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub client_secrets: PathBuf,
    pub tokens_dir: PathBuf,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub client_secrets: Option<PathBuf>,
    pub tokens_dir: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn load_runtime_paths() -> Result<RuntimePaths> {
    resolve_runtime_paths(RuntimeOverrides::default())
}

pub fn resolve_runtime_paths(overrides: RuntimeOverrides) -> Result<RuntimePaths> {
    resolve_runtime_paths_with(overrides, env_var_string)
}

fn resolve_runtime_paths_with(
    overrides: RuntimeOverrides,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimePaths> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_runtime_paths(&file_vars, env_lookup, overrides))
}

fn build_runtime_paths(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimePaths {
    let client_secrets = overrides
        .client_secrets
        .or_else(|| lookup_value(CLIENT_SECRETS_KEY, file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIENT_SECRETS));
    let tokens_dir = overrides
        .tokens_dir
        .or_else(|| lookup_value(TOKENS_DIR_KEY, file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKENS_DIR));
    let access_token = lookup_value(ACCESS_TOKEN_KEY, file_vars, &env_lookup);
    RuntimePaths {
        client_secrets,
        tokens_dir,
        access_token,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Parses a dotenv-style file. A missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    Ok(content.lines().filter_map(parse_env_line).collect())
}

fn parse_env_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let assignment = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, raw) = assignment.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let raw = raw.trim();
    let value = ['"', '\'']
        .iter()
        .find_map(|quote| raw.strip_prefix(*quote)?.strip_suffix(*quote))
        .unwrap_or(raw);
    Some((key.to_string(), value.to_string()))
}
