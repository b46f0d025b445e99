//! Core types for adsync

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;
use uuid::Uuid;

/// Unique identifier for a player instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One playable item.
///
/// A source is never mutated after it has been committed to the pipeline;
/// replacing it means committing a whole new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Primary media locator
    pub uri: Url,
    /// Request headers sent with media requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Ad tag handed to the ad-decision service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_tag_uri: Option<String>,
}

impl Source {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            headers: None,
            ad_tag_uri: None,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_ad_tag(mut self, ad_tag_uri: impl Into<String>) -> Self {
        self.ad_tag_uri = Some(ad_tag_uri.into());
        self
    }

    /// Ad tag, if one is set and non-empty
    pub fn ad_tag(&self) -> Option<&str> {
        self.ad_tag_uri.as_deref().filter(|tag| !tag.trim().is_empty())
    }
}

/// Player status exposed to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    /// No media, or playback stopped or finished
    Idle,
    /// Media is buffering
    Loading,
    /// Media can play without waiting
    ReadyToPlay,
    /// The pipeline reported an error
    Error,
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Idle => write!(f, "idle"),
            PlaybackStatus::Loading => write!(f, "loading"),
            PlaybackStatus::ReadyToPlay => write!(f, "readyToPlay"),
            PlaybackStatus::Error => write!(f, "error"),
        }
    }
}

/// Error carried alongside [`PlaybackStatus::Error`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackError {
    pub code: i32,
    pub message: String,
}

impl From<&crate::pipeline::PipelineError> for PlaybackError {
    fn from(err: &crate::pipeline::PipelineError) -> Self {
        Self {
            code: err.code,
            message: err.to_string(),
        }
    }
}

/// Progress reported to the ad-decision service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ProgressUpdate {
    /// Duration is not known yet
    NotReady,
    /// Current position and total duration in milliseconds
    Progress { current_ms: u64, duration_ms: u64 },
}

impl ProgressUpdate {
    pub fn new(current_ms: u64, duration_ms: u64) -> Self {
        ProgressUpdate::Progress {
            current_ms,
            duration_ms,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ProgressUpdate::Progress { .. })
    }

    pub fn current_ms(&self) -> Option<u64> {
        match self {
            ProgressUpdate::Progress { current_ms, .. } => Some(*current_ms),
            ProgressUpdate::NotReady => None,
        }
    }
}

/// Periodic time update payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeUpdate {
    /// Current position in seconds
    pub current_time: f64,
    /// Distance from the live edge in seconds (live streams only)
    pub current_offset_from_live: Option<f64>,
    /// Wall-clock time of the current position in epoch milliseconds
    pub current_live_timestamp: Option<i64>,
    /// Buffered position in seconds, -1 when no media is set
    pub buffered_position: f64,
}

/// Speed and pitch applied by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackParameters {
    pub speed: f32,
    pub pitch: f32,
}

impl PlaybackParameters {
    pub fn new(speed: f32, pitch: f32) -> Self {
        Self { speed, pitch }
    }
}

impl Default for PlaybackParameters {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
        }
    }
}

/// How the player's audio mixes with other apps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioMixingMode {
    #[default]
    Auto,
    MixWithOthers,
    DuckOthers,
    DoNotMix,
}

/// Subtitle track reported by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    pub id: String,
    pub language: Option<String>,
    pub label: String,
}

/// Track groups reported by the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracks {
    pub subtitle_tracks: Vec<SubtitleTrack>,
    pub current_subtitle_track: Option<SubtitleTrack>,
    pub audio_languages: Vec<String>,
}

/// Identifies one ad creative handed over by the ad-decision service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdMediaHandle {
    pub id: String,
    pub uri: Url,
}

impl AdMediaHandle {
    pub fn new(id: impl Into<String>, uri: Url) -> Self {
        Self { id: id.into(), uri }
    }
}

/// Position of an ad inside its pod
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdPodInfo {
    /// Index of the pod, -1 for post-roll
    pub pod_index: i32,
    /// 1-based position of the ad in the pod
    pub ad_position: u32,
    pub total_ads: u32,
    /// Scheduled content offset in seconds, -1 for post-roll
    pub time_offset: f64,
}

/// Ad break lifecycle for the current source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdBreakState {
    #[default]
    NoAdsRequested,
    AdsRequested,
    PlayingAd,
    AllAdsCompleted,
}

impl std::fmt::Display for AdBreakState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdBreakState::NoAdsRequested => write!(f, "no_ads_requested"),
            AdBreakState::AdsRequested => write!(f, "ads_requested"),
            AdBreakState::PlayingAd => write!(f, "playing_ad"),
            AdBreakState::AllAdsCompleted => write!(f, "all_ads_completed"),
        }
    }
}

/// Stores `new` and returns the previous value if it differs.
pub(crate) fn replace_if_changed<T: PartialEq>(slot: &mut T, new: T) -> Option<T> {
    if *slot == new {
        return None;
    }
    Some(std::mem::replace(slot, new))
}
