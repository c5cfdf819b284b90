#![forbid(unsafe_code)]

//! State checks and the subscribe / like / comment sequence for a single
//! video.
//!
//! Every decision is made on state read immediately before acting. Subscribe
//! and like are idempotent; commenting is only as idempotent as the configured
//! [`CommentPolicy`] makes it.

use anyhow::{Context, Result};
use log::info;

use crate::config::{CommentPolicy, EngagementConfig};
use crate::metadata::{EngagementState, Rating, VideoRecord};
use crate::youtube::YouTubeApi;

/// Comment-thread pages inspected before concluding the account has not
/// commented.
pub const COMMENT_PAGE_LIMIT: usize = 10;

/// Read-only view over the three engagement checks.
pub struct StateChecker<'a, A: YouTubeApi + ?Sized> {
    api: &'a A,
}

impl<'a, A: YouTubeApi + ?Sized> StateChecker<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    pub fn check_state(
        &self,
        video: &VideoRecord,
        self_channel_id: Option<&str>,
    ) -> Result<EngagementState> {
        Ok(EngagementState {
            is_subscribed: self.is_subscribed(video)?,
            is_liked: self.is_liked(video)?,
            has_own_comment: self.has_own_comment(video, self_channel_id)?,
        })
    }

    pub fn is_subscribed(&self, video: &VideoRecord) -> Result<bool> {
        self.api
            .is_subscribed(&video.channel_id)
            .with_context(|| format!("checking subscription to {}", video.channel_id))
    }

    pub fn is_liked(&self, video: &VideoRecord) -> Result<bool> {
        let rating = self
            .api
            .rating(&video.video_id)
            .with_context(|| format!("reading rating of {}", video.video_id))?;
        Ok(rating == Rating::Like)
    }

    /// False when the account has no channel; a comment cannot be attributed
    /// to it then.
    pub fn has_own_comment(
        &self,
        video: &VideoRecord,
        self_channel_id: Option<&str>,
    ) -> Result<bool> {
        let Some(self_channel_id) = self_channel_id else {
            return Ok(false);
        };
        self.scan_comments(video, self_channel_id, None)
    }

    /// Looks among threads matching `text` before falling back to the plain
    /// scan. The narrowed listing reaches the account's comment on videos
    /// whose newest [`COMMENT_PAGE_LIMIT`] pages no longer hold it.
    pub fn has_own_comment_with_text(
        &self,
        video: &VideoRecord,
        self_channel_id: Option<&str>,
        text: &str,
    ) -> Result<bool> {
        let Some(self_channel_id) = self_channel_id else {
            return Ok(false);
        };
        Ok(self.scan_comments(video, self_channel_id, Some(text))?
            || self.scan_comments(video, self_channel_id, None)?)
    }

    fn scan_comments(
        &self,
        video: &VideoRecord,
        self_channel_id: &str,
        search_terms: Option<&str>,
    ) -> Result<bool> {
        let mut page_token: Option<String> = None;
        for _ in 0..COMMENT_PAGE_LIMIT {
            let page = self
                .api
                .comment_threads(&video.video_id, search_terms, page_token.as_deref())
                .with_context(|| format!("listing comments on {}", video.video_id))?;
            if page.author_channel_ids.iter().any(|id| id == self_channel_id) {
                return Ok(true);
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(false),
            }
        }
        Ok(false)
    }
}

/// What `process` did for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Performed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessReport {
    pub subscribe: Outcome,
    pub like: Outcome,
    pub comment: Outcome,
}

impl ProcessReport {
    /// True when every action was already satisfied.
    pub fn nothing_done(&self) -> bool {
        [self.subscribe, self.like, self.comment]
            .iter()
            .all(|outcome| *outcome == Outcome::Skipped)
    }
}

pub struct EngagementProcessor<A: YouTubeApi> {
    api: A,
    config: EngagementConfig,
    self_channel_id: Option<String>,
}

impl<A: YouTubeApi> EngagementProcessor<A> {
    /// Resolves the acting account's channel once for the whole run.
    pub fn new(api: A, config: EngagementConfig) -> Result<Self> {
        let self_channel_id = api.my_channel_id().context("looking up own channel")?;
        match &self_channel_id {
            Some(id) => info!("acting as channel {id}"),
            None => info!("account has no channel; own comments cannot be detected"),
        }
        Ok(Self::with_self_channel(api, config, self_channel_id))
    }

    pub fn with_self_channel(
        api: A,
        config: EngagementConfig,
        self_channel_id: Option<String>,
    ) -> Self {
        Self {
            api,
            config,
            self_channel_id,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn self_channel_id(&self) -> Option<&str> {
        self.self_channel_id.as_deref()
    }

    fn checker(&self) -> StateChecker<'_, A> {
        StateChecker::new(&self.api)
    }

    pub fn check_state(&self, video: &VideoRecord) -> Result<EngagementState> {
        self.checker()
            .check_state(video, self.self_channel_id.as_deref())
    }

    /// Subscribes, likes and comments as needed, in that order. Stops at the
    /// first failing request; whatever already succeeded stays in place.
    pub fn process(&self, video: &VideoRecord) -> Result<ProcessReport> {
        let checker = self.checker();

        let subscribe = if checker.is_subscribed(video)? {
            info!("Already subscribed to channel: {}", video.channel_title);
            Outcome::Skipped
        } else {
            self.api
                .subscribe(&video.channel_id)
                .with_context(|| format!("subscribing to {}", video.channel_id))?;
            info!("Subscribed to channel: {}", video.channel_title);
            Outcome::Performed
        };

        let like = if checker.is_liked(video)? {
            info!("Already liked video: {}", video.title);
            Outcome::Skipped
        } else {
            self.api
                .rate(&video.video_id, Rating::Like)
                .with_context(|| format!("liking {}", video.video_id))?;
            info!("Liked video: {}", video.title);
            Outcome::Performed
        };

        let already_commented = match self.config.comment_policy {
            CommentPolicy::Always => false,
            CommentPolicy::SkipIfPresent => checker.has_own_comment_with_text(
                video,
                self.self_channel_id.as_deref(),
                &self.config.comment_text,
            )?,
        };
        let comment = if already_commented {
            info!("Already commented on video: {}", video.title);
            Outcome::Skipped
        } else {
            self.api
                .post_comment(&video.video_id, &self.config.comment_text)
                .with_context(|| format!("commenting on {}", video.video_id))?;
            info!("Commented on video: {}", video.title);
            Outcome::Performed
        };

        Ok(ProcessReport {
            subscribe,
            like,
            comment,
        })
    }
}

/// How [`run_sequential`] treats each video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Process,
    /// Report state only; no writes.
    CheckOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub videos: usize,
    pub subscribed: usize,
    pub liked: usize,
    pub commented: usize,
    pub already_complete: usize,
}

impl RunSummary {
    fn record(&mut self, report: &ProcessReport) {
        let performed = |outcome: Outcome| usize::from(outcome == Outcome::Performed);
        self.subscribed += performed(report.subscribe);
        self.liked += performed(report.like);
        self.commented += performed(report.comment);
        if report.nothing_done() {
            self.already_complete += 1;
        }
    }
}

/// Walks the discovered list one video at a time, writing a progress line per
/// video to `out`. The first failure ends the run.
pub fn run_sequential<A, W>(
    processor: &EngagementProcessor<A>,
    videos: &[VideoRecord],
    mode: RunMode,
    out: &mut W,
) -> Result<RunSummary>
where
    A: YouTubeApi,
    W: std::io::Write,
{
    let mut summary = RunSummary::default();
    for (index, video) in videos.iter().enumerate() {
        writeln!(
            out,
            "[{}/{}] Checking video: {} ({})",
            index + 1,
            videos.len(),
            video.title,
            video.watch_url()
        )?;
        match mode {
            RunMode::CheckOnly => {
                let state = processor.check_state(video)?;
                writeln!(
                    out,
                    "    subscribed: {}, liked: {}, commented: {}",
                    state.is_subscribed, state.is_liked, state.has_own_comment
                )?;
                if state.is_complete() {
                    summary.already_complete += 1;
                }
            }
            RunMode::Process => {
                let report = processor
                    .process(video)
                    .with_context(|| format!("processing {}", video.watch_url()))?;
                summary.record(&report);
            }
        }
        summary.videos += 1;
    }
    Ok(summary)
}

/// In-memory stand-in for the platform used across the crate's unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};

    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;

    use crate::error::ApiError;
    use crate::metadata::{Rating, VideoRecord};
    use crate::youtube::{CommentPage, YouTubeApi};

    pub fn video(id: &str, channel: &str) -> VideoRecord {
        VideoRecord {
            video_id: id.to_string(),
            title: format!("Video {id}"),
            channel_id: channel.to_string(),
            channel_title: format!("Channel {channel}"),
            thumbnail_url: format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg"),
        }
    }

    /// Writes the fake has seen, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Write {
        Subscribe(String),
        Like(String),
        Comment(String, String),
    }

    #[derive(Default)]
    struct State {
        results: HashMap<String, Vec<VideoRecord>>,
        failing_queries: HashSet<String>,
        searches: Vec<(String, DateTime<Utc>)>,
        self_channel: Option<String>,
        subscriptions: HashSet<String>,
        ratings: HashMap<String, Rating>,
        /// Per video, newest first: (author channel, text).
        comments: HashMap<String, Vec<(String, String)>>,
        comment_page_size: Option<usize>,
        comment_list_calls: usize,
        fail_likes: bool,
        writes: Vec<Write>,
    }

    #[derive(Default)]
    pub struct FakeApi {
        state: Mutex<State>,
    }

    impl FakeApi {
        pub fn with_self_channel(channel: &str) -> Self {
            let api = Self::default();
            api.state.lock().self_channel = Some(channel.to_string());
            api
        }

        pub fn add_search(&self, query: &str, videos: Vec<VideoRecord>) {
            self.state.lock().results.insert(query.to_string(), videos);
        }

        pub fn fail_search(&self, query: &str) {
            self.state.lock().failing_queries.insert(query.to_string());
        }

        pub fn searches(&self) -> Vec<(String, DateTime<Utc>)> {
            self.state.lock().searches.clone()
        }

        pub fn set_subscribed(&self, channel: &str) {
            self.state.lock().subscriptions.insert(channel.to_string());
        }

        pub fn set_rating(&self, video_id: &str, rating: Rating) {
            self.state.lock().ratings.insert(video_id.to_string(), rating);
        }

        pub fn add_comment(&self, video_id: &str, author_channel: &str) {
            self.add_comment_text(video_id, author_channel, "");
        }

        pub fn add_comment_text(&self, video_id: &str, author_channel: &str, text: &str) {
            self.state
                .lock()
                .comments
                .entry(video_id.to_string())
                .or_default()
                .push((author_channel.to_string(), text.to_string()));
        }

        pub fn set_comment_page_size(&self, size: usize) {
            self.state.lock().comment_page_size = Some(size);
        }

        pub fn comment_list_calls(&self) -> usize {
            self.state.lock().comment_list_calls
        }

        pub fn fail_likes(&self) {
            self.state.lock().fail_likes = true;
        }

        pub fn writes(&self) -> Vec<Write> {
            self.state.lock().writes.clone()
        }

        fn refused(endpoint: &str) -> ApiError {
            ApiError::Status {
                endpoint: endpoint.to_string(),
                status: 500,
                message: "injected failure".to_string(),
            }
        }
    }

    impl YouTubeApi for FakeApi {
        fn search_videos(
            &self,
            query: &str,
            published_after: DateTime<Utc>,
            _max_results: usize,
        ) -> Result<Vec<VideoRecord>, ApiError> {
            let mut state = self.state.lock();
            state.searches.push((query.to_string(), published_after));
            if state.failing_queries.contains(query) {
                return Err(Self::refused("search"));
            }
            Ok(state.results.get(query).cloned().unwrap_or_default())
        }

        fn my_channel_id(&self) -> Result<Option<String>, ApiError> {
            Ok(self.state.lock().self_channel.clone())
        }

        fn is_subscribed(&self, channel_id: &str) -> Result<bool, ApiError> {
            Ok(self.state.lock().subscriptions.contains(channel_id))
        }

        fn subscribe(&self, channel_id: &str) -> Result<(), ApiError> {
            let mut state = self.state.lock();
            state.subscriptions.insert(channel_id.to_string());
            state.writes.push(Write::Subscribe(channel_id.to_string()));
            Ok(())
        }

        fn rating(&self, video_id: &str) -> Result<Rating, ApiError> {
            Ok(self
                .state
                .lock()
                .ratings
                .get(video_id)
                .copied()
                .unwrap_or(Rating::None))
        }

        fn rate(&self, video_id: &str, rating: Rating) -> Result<(), ApiError> {
            let mut state = self.state.lock();
            if state.fail_likes {
                return Err(Self::refused("videos/rate"));
            }
            state.ratings.insert(video_id.to_string(), rating);
            state.writes.push(Write::Like(video_id.to_string()));
            Ok(())
        }

        fn comment_threads(
            &self,
            video_id: &str,
            search_terms: Option<&str>,
            page_token: Option<&str>,
        ) -> Result<CommentPage, ApiError> {
            let mut state = self.state.lock();
            state.comment_list_calls += 1;
            let authors: Vec<String> = state
                .comments
                .get(video_id)
                .into_iter()
                .flatten()
                .filter(|(_, text)| search_terms.is_none_or(|terms| text.contains(terms)))
                .map(|(author, _)| author.clone())
                .collect();
            let page_size = state.comment_page_size.unwrap_or(usize::MAX);
            let start: usize = page_token.map_or(0, |token| token.parse().unwrap_or(0));
            let end = start.saturating_add(page_size).min(authors.len());
            Ok(CommentPage {
                author_channel_ids: authors[start.min(end)..end].to_vec(),
                next_page_token: (end < authors.len()).then(|| end.to_string()),
            })
        }

        fn post_comment(&self, video_id: &str, text: &str) -> Result<(), ApiError> {
            let mut state = self.state.lock();
            let author = state.self_channel.clone().unwrap_or_default();
            state
                .comments
                .entry(video_id.to_string())
                .or_default()
                .push((author, text.to_string()));
            state
                .writes
                .push(Write::Comment(video_id.to_string(), text.to_string()));
            Ok(())
        }
    }
}
