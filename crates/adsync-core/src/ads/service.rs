//! Contract with the ad-decision service

use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::pipeline::PipelineError;
use crate::types::{AdMediaHandle, AdPodInfo, ProgressUpdate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Stage at which the ad service failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdErrorKind {
    /// Ads could not be fetched or parsed; no break will play
    Load,
    /// An ad failed while playing
    Playback,
}

/// Failure reported by the ad service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?} ad error: {message}")]
pub struct AdError {
    pub kind: AdErrorKind,
    pub message: String,
}

impl AdError {
    pub fn load(message: impl Into<String>) -> Self {
        Self {
            kind: AdErrorKind::Load,
            message: message.into(),
        }
    }

    pub fn playback(message: impl Into<String>) -> Self {
        Self {
            kind: AdErrorKind::Playback,
            message: message.into(),
        }
    }
}

/// Lifecycle events from the ad service
#[derive(Debug, Clone, PartialEq)]
pub enum AdEvent {
    /// The ad schedule was fetched; the service may be started
    Loaded,
    Started(AdMediaHandle),
    /// A break is about to play; content must yield the pipeline
    ContentPauseRequested,
    /// The break is over; content may resume
    ContentResumeRequested,
    AdProgress,
    /// No further breaks will play for this source
    AllAdsCompleted,
    Error(AdError),
}

/// Requests from the ad service to the video ad surface
#[derive(Debug, Clone, PartialEq)]
pub enum AdPlayerCommand {
    Load { ad: AdMediaHandle, pod: AdPodInfo },
    Play(AdMediaHandle),
    Pause(AdMediaHandle),
    Stop(AdMediaHandle),
}

/// Notifications from the video ad surface back to the ad service.
///
/// Invoked on the player's owner task. Implementations must not block and
/// must not call back into the player synchronously; post to the mailbox
/// instead.
pub trait AdPlayerCallback: Send + Sync {
    fn on_loaded(&self, _ad: &AdMediaHandle) {}

    fn on_play(&self, _ad: &AdMediaHandle) {}

    fn on_resume(&self, _ad: &AdMediaHandle) {}

    fn on_pause(&self, _ad: &AdMediaHandle) {}

    fn on_buffering(&self, _ad: &AdMediaHandle) {}

    fn on_ad_progress(&self, ad: &AdMediaHandle, progress: ProgressUpdate);

    fn on_ended(&self, ad: &AdMediaHandle);

    fn on_error(&self, ad: &AdMediaHandle, error: &PipelineError);

    /// Content finished playing; post-rolls may start
    fn on_content_complete(&self);
}

/// Read-only view of content progress for the ad service.
///
/// Safe to query from any thread: the value is published by the owner task
/// and read through a watch channel, never by touching the pipeline.
#[derive(Debug, Clone)]
pub struct ContentProgressProvider {
    rx: watch::Receiver<ProgressUpdate>,
}

impl ContentProgressProvider {
    pub fn new(rx: watch::Receiver<ProgressUpdate>) -> Self {
        Self { rx }
    }

    /// Latest content progress; `NotReady` until the duration is known
    pub fn content_progress(&self) -> ProgressUpdate {
        *self.rx.borrow()
    }

    /// Wait until a new value is published; returns false once the player is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Everything an ad service needs to schedule breaks for one source
#[derive(Debug, Clone)]
pub struct AdsRequest {
    pub ad_tag_uri: String,
    pub progress: ContentProgressProvider,
    /// Where [`AdEvent`]s and [`AdPlayerCommand`]s are posted
    pub events: Mailbox,
}

/// External ad-decision service (IMA-style)
pub trait AdDecisionService: Send {
    /// Callback the player notifies while ads play
    fn ad_player_callback(&self) -> Arc<dyn AdPlayerCallback>;

    /// Request ads for a newly committed source.
    ///
    /// The schedule is fetched asynchronously; success is reported later as
    /// [`AdEvent::Loaded`]. An error here means no ads will play.
    fn request_ads(&mut self, request: AdsRequest) -> Result<()>;

    /// Start playing the loaded schedule
    fn start(&mut self);

    /// Drop the remainder of the current break
    fn discard_ad_break(&mut self);

    /// Release the loaded schedule; no further events are posted for it
    fn destroy(&mut self);
}
