#![forbid(unsafe_code)]

//! In-memory records passed between discovery, the state checker and the
//! presentation layers. Nothing here is persisted.

use serde::{Deserialize, Serialize};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// One search hit, normalized from the API's `search#result` item.
///
/// Identity is `video_id`; discovery guarantees no two records in its output
/// share one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thumbnail_url: String,
}

impl VideoRecord {
    /// Canonical watch page for the video.
    pub fn watch_url(&self) -> String {
        format!("{WATCH_URL_PREFIX}{}", self.video_id)
    }
}

/// Point-in-time view of what the acting account has already done for a
/// video. Always computed fresh; never cached across checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngagementState {
    pub is_subscribed: bool,
    pub is_liked: bool,
    pub has_own_comment: bool,
}

impl EngagementState {
    /// True when no further action is needed for the video.
    pub fn is_complete(&self) -> bool {
        self.is_subscribed && self.is_liked && self.has_own_comment
    }
}

/// Rating the authenticated account has left on a video, as reported by
/// `videos/getRating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Like,
    Dislike,
    None,
    #[serde(other)]
    Unspecified,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Like => "like",
            Rating::Dislike => "dislike",
            Rating::None => "none",
            Rating::Unspecified => "unspecified",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> VideoRecord {
        VideoRecord {
            video_id: "dQw4w9WgXcQ".into(),
            title: "Giveaway!".into(),
            channel_id: "UC123".into(),
            channel_title: "Some Channel".into(),
            thumbnail_url: String::new(),
        }
    }

    #[test]
    fn watch_url_uses_video_id() {
        assert_eq!(
            sample_record().watch_url(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn state_is_complete_only_when_all_actions_done() {
        let mut state = EngagementState {
            is_subscribed: true,
            is_liked: true,
            has_own_comment: false,
        };
        assert!(!state.is_complete());
        state.has_own_comment = true;
        assert!(state.is_complete());
        assert!(!EngagementState::default().is_complete());
    }

    #[test]
    fn rating_deserializes_unknown_values_as_unspecified() {
        let rating: Rating = serde_json::from_str("\"like\"").unwrap();
        assert_eq!(rating, Rating::Like);
        let rating: Rating = serde_json::from_str("\"something-new\"").unwrap();
        assert_eq!(rating, Rating::Unspecified);
    }

    #[test]
    fn record_serialization_omits_empty_thumbnail() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert!(json.get("thumbnail_url").is_none());
        assert_eq!(json["video_id"], "dQw4w9WgXcQ");
    }
}
