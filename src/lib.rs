#![forbid(unsafe_code)]

//! Shared building blocks for the engagement binaries: OAuth credentials, the
//! YouTube Data API client, discovery and the subscribe/like/comment
//! processor.

pub mod auth;
pub mod config;
pub mod discovery;
pub mod engagement;
pub mod error;
pub mod metadata;
pub mod security;
pub mod session;
pub mod youtube;
