#![forbid(unsafe_code)]

//! Command-line runner: discovers recent videos for the configured queries and
//! subscribes, likes and comments wherever that has not happened yet.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tube_engage::config::{
    CommentPolicy, EngagementConfig, RuntimeOverrides, resolve_runtime_paths,
};
use tube_engage::discovery::Discovery;
use tube_engage::engagement::{EngagementProcessor, RunMode, run_sequential};
use tube_engage::session::{init_logging, open_client};

#[derive(Debug, Parser)]
#[command(
    name = "engage",
    version,
    about = "Subscribe to, like and comment on recent videos matching the built-in queries"
)]
struct EngageArgs {
    /// OAuth client-secret descriptor (overrides ENGAGE_CLIENT_SECRETS).
    #[arg(long, value_name = "PATH")]
    client_secrets: Option<PathBuf>,

    /// Directory holding persisted tokens (overrides ENGAGE_TOKENS_DIR).
    #[arg(long, value_name = "DIR")]
    tokens_dir: Option<PathBuf>,

    /// Alternate dotenv file to read settings from.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Only report each video's state; never subscribe, like or comment.
    #[arg(long)]
    check_only: bool,

    /// Post the comment even when this account already commented.
    #[arg(long)]
    always_comment: bool,
}

impl EngageArgs {
    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            client_secrets: self.client_secrets.clone(),
            tokens_dir: self.tokens_dir.clone(),
            env_path: self.env_file.clone(),
        }
    }

    fn engagement_config(&self) -> EngagementConfig {
        EngagementConfig {
            comment_policy: if self.always_comment {
                CommentPolicy::Always
            } else {
                CommentPolicy::SkipIfPresent
            },
            ..EngagementConfig::default()
        }
    }

    fn mode(&self) -> RunMode {
        if self.check_only {
            RunMode::CheckOnly
        } else {
            RunMode::Process
        }
    }
}

fn main() -> Result<()> {
    init_logging();
    let args = EngageArgs::parse();
    let paths = resolve_runtime_paths(args.overrides())?;
    let config = args.engagement_config();

    println!("===================================");
    println!("YouTube Engagement Runner");
    println!("===================================");
    println!("Client secrets: {}", paths.client_secrets.display());
    println!("Token directory: {}", paths.tokens_dir.display());
    println!("Queries: {}", config.queries.join(", "));
    println!();

    let client = open_client(&paths, &config.scope)?;

    let videos = Discovery::new(&client, &config)
        .discover_all()
        .context("discovering videos")?;
    println!("Found {} unique videos", videos.len());
    if videos.is_empty() {
        return Ok(());
    }

    let processor = EngagementProcessor::new(client, config)?;
    let summary = run_sequential(&processor, &videos, args.mode(), &mut io::stdout())?;

    println!();
    println!("===================================");
    println!("Run complete!");
    println!("===================================");
    println!("Videos checked: {}", summary.videos);
    println!("Already complete: {}", summary.already_complete);
    if args.mode() == RunMode::Process {
        println!("Subscriptions added: {}", summary.subscribed);
        println!("Likes added: {}", summary.liked);
        println!("Comments posted: {}", summary.commented);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_process_and_gate_comments() {
        let args = EngageArgs::try_parse_from(["engage"]).unwrap();
        assert_eq!(args.mode(), RunMode::Process);
        assert_eq!(
            args.engagement_config().comment_policy,
            CommentPolicy::SkipIfPresent
        );
        let overrides = args.overrides();
        assert!(overrides.client_secrets.is_none());
        assert!(overrides.tokens_dir.is_none());
    }

    #[test]
    fn flags_map_onto_overrides_and_modes() {
        let args = EngageArgs::try_parse_from([
            "engage",
            "--client-secrets",
            "/s/client.json",
            "--tokens-dir",
            "/s/tokens",
            "--check-only",
            "--always-comment",
        ])
        .unwrap();
        assert_eq!(args.mode(), RunMode::CheckOnly);
        assert_eq!(
            args.engagement_config().comment_policy,
            CommentPolicy::Always
        );
        let overrides = args.overrides();
        assert_eq!(overrides.client_secrets, Some(PathBuf::from("/s/client.json")));
        assert_eq!(overrides.tokens_dir, Some(PathBuf::from("/s/tokens")));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(EngageArgs::try_parse_from(["engage", "--frobnicate"]).is_err());
    }
}
