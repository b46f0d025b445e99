//! Playback pipeline capability
//!
//! The coordination core never talks to a platform media stack directly.
//! Each platform provides one thin [`PlaybackPipeline`] implementation and
//! pushes its state changes into the owning player's [`Mailbox`] as
//! [`PipelineReport`]s.
//!
//! Content and ads take turns on one pipeline, so a report can still be in
//! the mailbox when its media item has already been replaced. Every report
//! carries the media generation it was produced under; the player drops
//! item-scoped reports from a generation that is no longer current.

#[cfg(feature = "simulated")]
pub mod simulated;

use crate::mailbox::Mailbox;
use crate::types::{PlaybackParameters, Tracks};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

#[cfg(feature = "simulated")]
pub use simulated::{SimulatedControl, SimulatedPipeline};

/// Raw state reported by the underlying pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawPlayerState {
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// Coarse classification of pipeline failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineErrorKind {
    Unsupported,
    TimedOut,
    Network,
    Decoder,
    Unknown,
}

/// Error signalled by the pipeline for content or ad media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub code: i32,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}

/// Media item handed to the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub uri: Url,
    pub headers: BTreeMap<String, String>,
}

impl MediaItem {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            headers: BTreeMap::new(),
        }
    }
}

impl From<&crate::types::Source> for MediaItem {
    fn from(source: &crate::types::Source) -> Self {
        Self {
            uri: source.uri.clone(),
            headers: source.headers.clone().unwrap_or_default(),
        }
    }
}

/// Why the pipeline moved to another media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaItemTransitionReason {
    /// The same item started over because of looping
    Repeat,
    /// Playback advanced on its own
    Auto,
    Seek,
    /// The media item was replaced
    PlaylistChanged,
}

/// Callbacks a pipeline delivers to its attached mailbox
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged(RawPlayerState),
    /// `None` once a previously reported error is cleared
    ErrorChanged(Option<PipelineError>),
    IsPlayingChanged(bool),
    VolumeChanged(f32),
    PlaybackParametersChanged(PlaybackParameters),
    TracksChanged(Tracks),
    MediaItemTransition(MediaItemTransitionReason),
}

impl PipelineEvent {
    /// Describes the media item rather than the pipeline as a whole
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            PipelineEvent::StateChanged(_)
                | PipelineEvent::ErrorChanged(_)
                | PipelineEvent::TracksChanged(_)
                | PipelineEvent::MediaItemTransition(_)
        )
    }

    pub fn stamped(self, generation: u64) -> PipelineReport {
        PipelineReport {
            generation,
            event: self,
        }
    }
}

/// A [`PipelineEvent`] stamped with the media generation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub generation: u64,
    pub event: PipelineEvent,
}

/// Platform media pipeline shared by content and ads.
///
/// Implementations must not block; state changes are reported
/// asynchronously through the attached mailbox, each stamped with
/// [`PlaybackPipeline::media_generation`] as it was when the change happened.
pub trait PlaybackPipeline: Send {
    /// Start delivering [`PipelineEvent`]s to `events`
    fn attach(&mut self, events: Mailbox);

    /// Stop delivering events
    fn detach(&mut self);

    fn set_media(&mut self, item: MediaItem);

    fn clear_media(&mut self);

    fn has_media(&self) -> bool;

    /// Identity of the current media item; changes on every `set_media` and `clear_media`
    fn media_generation(&self) -> u64;

    fn prepare(&mut self);

    fn set_play_when_ready(&mut self, play_when_ready: bool);

    fn play(&mut self);

    fn pause(&mut self);

    fn stop(&mut self);

    fn seek_to(&mut self, position_ms: u64);

    fn state(&self) -> RawPlayerState;

    fn error(&self) -> Option<PipelineError>;

    fn current_position_ms(&self) -> u64;

    /// `None` while the duration is unknown
    fn duration_ms(&self) -> Option<u64>;

    fn buffered_position_ms(&self) -> u64;

    fn is_live(&self) -> bool;

    /// Distance from the live edge in milliseconds
    fn live_offset_ms(&self) -> Option<u64> {
        None
    }

    /// Wall-clock start of the live window in epoch milliseconds
    fn window_start_time_ms(&self) -> Option<i64> {
        None
    }

    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);

    fn set_playback_parameters(&mut self, parameters: PlaybackParameters);

    /// Free decoder and network resources; the pipeline is unusable afterwards
    fn release(&mut self);
}

/// Device audio output levels
pub trait AudioOutput: Send {
    fn stream_volume(&self) -> u32;

    fn max_stream_volume(&self) -> u32;
}

/// Audio output with fixed levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAudioOutput {
    pub current: u32,
    pub max: u32,
}

impl FixedAudioOutput {
    pub fn new(current: u32, max: u32) -> Self {
        Self { current, max }
    }
}

impl Default for FixedAudioOutput {
    fn default() -> Self {
        Self { current: 15, max: 15 }
    }
}

impl AudioOutput for FixedAudioOutput {
    fn stream_volume(&self) -> u32 {
        self.current
    }

    fn max_stream_volume(&self) -> u32 {
        self.max
    }
}
