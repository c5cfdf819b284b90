#![forbid(unsafe_code)]

//! Start-up plumbing shared by the binaries: logging and choosing where the
//! bearer token comes from.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::auth::{Authenticator, CredentialProvider, PreProvisionedToken};
use crate::config::{ACCESS_TOKEN_KEY, RuntimePaths};
use crate::youtube::{YouTubeClient, build_agent};

/// Installs `env_logger` at `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Picks the credential source: a pre-provisioned token when one is
/// configured, otherwise the stored or interactively obtained OAuth token.
pub fn credential_provider(
    paths: &RuntimePaths,
    scope: &str,
    agent: &ureq::Agent,
) -> Result<Arc<dyn CredentialProvider>> {
    if let Some(token) = &paths.access_token {
        info!("using pre-provisioned token from {ACCESS_TOKEN_KEY}");
        return Ok(Arc::new(PreProvisionedToken::new(token.clone())));
    }
    let authenticator = Authenticator::new(&paths.client_secrets, &paths.tokens_dir, scope, agent.clone())
        .context("loading OAuth client secrets")?;
    let stdin = io::stdin();
    let credential = authenticator
        .authorize(&mut stdin.lock(), &mut io::stdout())
        .context("authorizing with YouTube")?;
    Ok(Arc::new(credential))
}

/// Authenticated API client ready for discovery and processing.
pub fn open_client(paths: &RuntimePaths, scope: &str) -> Result<YouTubeClient> {
    let agent = build_agent();
    let credentials = credential_provider(paths, scope, &agent)?;
    Ok(YouTubeClient::new(agent, credentials))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use std::path::PathBuf;

    #[test]
    fn pre_provisioned_token_skips_client_secrets() {
        let paths = RuntimePaths {
            client_secrets: PathBuf::from("/definitely/missing.json"),
            tokens_dir: PathBuf::from("/definitely/missing"),
            access_token: Some("ya29.test".into()),
        };
        let provider = credential_provider(&paths, "scope", &build_agent()).unwrap();
        assert_eq!(provider.access_token().unwrap(), "ya29.test");
    }

    #[test]
    fn missing_client_secrets_is_fatal_and_named() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("client_secrets.json");
        let paths = RuntimePaths {
            client_secrets: missing.clone(),
            tokens_dir: dir.path().join("tokens"),
            access_token: None,
        };
        let err = credential_provider(&paths, "scope", &build_agent())
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains(&missing.display().to_string()));
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::MissingClientSecrets { .. })
        ));
    }
}
