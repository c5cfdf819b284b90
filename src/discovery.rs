#![forbid(unsafe_code)]

//! Runs the configured search queries and merges their hits into one ordered,
//! duplicate-free list.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;

use crate::config::{EngagementConfig, MAX_SEARCH_RESULTS};
use crate::metadata::VideoRecord;
use crate::youtube::YouTubeApi;

pub struct Discovery<'a, A: YouTubeApi + ?Sized> {
    api: &'a A,
    config: &'a EngagementConfig,
}

impl<'a, A: YouTubeApi + ?Sized> Discovery<'a, A> {
    pub fn new(api: &'a A, config: &'a EngagementConfig) -> Self {
        Self { api, config }
    }

    /// One search request; at most [`MAX_SEARCH_RESULTS`] records.
    pub fn search(&self, query: &str, published_after: DateTime<Utc>) -> Result<Vec<VideoRecord>> {
        let mut records = self
            .api
            .search_videos(query, published_after, MAX_SEARCH_RESULTS)
            .with_context(|| format!("searching for {query:?}"))?;
        records.truncate(MAX_SEARCH_RESULTS);
        Ok(records)
    }

    /// Runs every configured query with a window ending now.
    pub fn discover_all(&self) -> Result<Vec<VideoRecord>> {
        self.discover_all_at(Utc::now())
    }

    /// Runs every configured query in order against a single
    /// `now - lookback` cutoff. The first occurrence of a video id wins; later
    /// duplicates are dropped. Any failed query aborts the whole run.
    pub fn discover_all_at(&self, now: DateTime<Utc>) -> Result<Vec<VideoRecord>> {
        let published_after = now - self.config.lookback;
        let mut seen = HashSet::new();
        let mut videos = Vec::new();

        for query in &self.config.queries {
            let hits = self.search(query, published_after)?;
            let total = hits.len();
            let before = videos.len();
            videos.extend(
                hits.into_iter()
                    .filter(|video| seen.insert(video.video_id.clone())),
            );
            info!(
                "query {query:?}: {total} result(s), {} new",
                videos.len() - before
            );
        }

        Ok(videos)
    }
}
