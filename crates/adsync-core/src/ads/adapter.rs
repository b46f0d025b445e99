//! Video ad surface over the shared pipeline
//!
//! Ads reuse the content pipeline. While an ad occupies it, raw state and
//! error reports are interpreted as ad lifecycle and forwarded to the
//! registered [`AdPlayerCallback`]s instead of reaching the content status.

use super::service::AdPlayerCallback;
use crate::clock::ProgressClock;
use crate::mailbox::{Mailbox, PlayerMessage};
use crate::pipeline::{AudioOutput, MediaItem, PipelineError, PipelineErrorKind, PlaybackPipeline, RawPlayerState};
use crate::types::{AdMediaHandle, AdPodInfo, ProgressUpdate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a pipeline report meant for the ad flow
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterSignal {
    None,
    /// The ad in the pipeline played to the end
    AdEnded(AdMediaHandle),
    /// The ad in the pipeline failed
    AdFailed(AdMediaHandle, PipelineError),
    /// Content (not an ad) reached its end
    ContentEnded,
}

/// Adapts the pipeline to the ad service's video ad player contract
pub struct AdPlayerAdapter {
    audio: Box<dyn AudioOutput>,
    callbacks: Vec<Arc<dyn AdPlayerCallback>>,
    clock: ProgressClock,
    loaded_ad: Option<AdMediaHandle>,
    pod: Option<AdPodInfo>,
    /// An ad currently occupies the pipeline
    active: bool,
    awaiting_first_ready: bool,
    ad_duration_ms: u64,
    saved_ad_position_ms: u64,
}

impl AdPlayerAdapter {
    pub fn new(audio: Box<dyn AudioOutput>, mailbox: Mailbox, progress_interval: Duration) -> Self {
        Self {
            audio,
            callbacks: Vec::new(),
            clock: ProgressClock::new("ad_progress", progress_interval, mailbox, || {
                PlayerMessage::AdProgressTick
            }),
            loaded_ad: None,
            pod: None,
            active: false,
            awaiting_first_ready: false,
            ad_duration_ms: 0,
            saved_ad_position_ms: 0,
        }
    }

    /// Register a callback; registering the same callback twice is a no-op
    pub fn add_callback(&mut self, callback: Arc<dyn AdPlayerCallback>) {
        if !self.callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
            self.callbacks.push(callback);
        }
    }

    /// Unregister a callback
    pub fn remove_callback(&mut self, callback: &Arc<dyn AdPlayerCallback>) {
        self.callbacks.retain(|c| !Arc::ptr_eq(c, callback));
    }

    /// Number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Get the ad loaded into the surface
    pub fn loaded_ad(&self) -> Option<&AdMediaHandle> {
        self.loaded_ad.as_ref()
    }

    /// Get pod info of the loaded ad
    pub fn pod(&self) -> Option<&AdPodInfo> {
        self.pod.as_ref()
    }

    /// Whether an ad currently occupies the pipeline
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Duration of the loaded ad, known once it was first ready
    pub fn ad_duration_ms(&self) -> u64 {
        self.ad_duration_ms
    }

    /// Position to resume the loaded ad from, 0 when starting fresh
    pub fn saved_ad_position_ms(&self) -> u64 {
        self.saved_ad_position_ms
    }

    /// Check if the ad progress clock is running
    pub fn is_tracking_progress(&self) -> bool {
        self.clock.is_running()
    }

    pub fn load_ad(&mut self, ad: AdMediaHandle, pod: AdPodInfo) {
        info!(ad_id = %ad.id, pod_index = pod.pod_index, ad_position = pod.ad_position, "Loading ad");
        if self.loaded_ad.as_ref() != Some(&ad) {
            self.saved_ad_position_ms = 0;
        }
        for callback in &self.callbacks {
            callback.on_loaded(&ad);
        }
        self.loaded_ad = Some(ad);
        self.pod = Some(pod);
    }

    /// Put the ad into the pipeline and prepare it.
    ///
    /// Playback starts once the pipeline first reports ready, resuming from
    /// the saved ad position if the ad was paused earlier.
    pub fn play_ad(&mut self, ad: AdMediaHandle, pipeline: &mut dyn PlaybackPipeline) {
        if self.loaded_ad.as_ref() != Some(&ad) {
            warn!(ad_id = %ad.id, "Playing an ad that was not loaded");
            self.saved_ad_position_ms = 0;
            self.loaded_ad = Some(ad.clone());
        }

        let resuming = self.saved_ad_position_ms > 0;
        debug!(ad_id = %ad.id, resume_at_ms = self.saved_ad_position_ms, "Playing ad");

        pipeline.set_media(MediaItem::new(ad.uri.clone()));
        pipeline.set_play_when_ready(false);
        pipeline.prepare();
        self.active = true;
        self.awaiting_first_ready = true;

        for callback in &self.callbacks {
            if resuming {
                callback.on_resume(&ad);
            } else {
                callback.on_play(&ad);
            }
        }
    }

    pub fn pause_ad(&mut self, ad: &AdMediaHandle, pipeline: &mut dyn PlaybackPipeline) {
        if !self.active {
            debug!(ad_id = %ad.id, "Pause ignored, no ad in the pipeline");
            return;
        }
        self.saved_ad_position_ms = pipeline.current_position_ms();
        pipeline.pause();
        self.clock.stop();
        for callback in &self.callbacks {
            callback.on_pause(ad);
        }
    }

    pub fn stop_ad(&mut self, ad: &AdMediaHandle) {
        debug!(ad_id = %ad.id, "Stopping ad");
        self.clock.stop();
    }

    /// Ad progress; `NotReady` unless an ad occupies the pipeline
    pub fn ad_progress(&self, pipeline: &dyn PlaybackPipeline) -> ProgressUpdate {
        if !self.active || self.loaded_ad.is_none() {
            return ProgressUpdate::NotReady;
        }
        ProgressUpdate::new(pipeline.current_position_ms(), self.ad_duration_ms)
    }

    /// Device volume as a fraction of the maximum
    pub fn volume(&self) -> f32 {
        let max = self.audio.max_stream_volume();
        if max == 0 {
            return 0.0;
        }
        self.audio.stream_volume() as f32 / max as f32
    }

    /// Stop tracking; the pipeline itself is owned by the player
    pub fn release(&mut self) {
        self.clock.stop();
    }

    /// Periodic ad progress tick
    pub fn on_progress_tick(&self, pipeline: &dyn PlaybackPipeline) {
        if !self.clock.is_running() {
            return;
        }
        let Some(ad) = &self.loaded_ad else {
            return;
        };
        let progress = self.ad_progress(pipeline);
        for callback in &self.callbacks {
            callback.on_ad_progress(ad, progress);
        }
    }

    /// Interpret a raw state report
    pub fn on_pipeline_state(&mut self, raw: RawPlayerState, pipeline: &mut dyn PlaybackPipeline) -> AdapterSignal {
        if !self.active {
            return match raw {
                RawPlayerState::Ended => AdapterSignal::ContentEnded,
                _ => AdapterSignal::None,
            };
        }
        let Some(ad) = self.loaded_ad.clone() else {
            return AdapterSignal::None;
        };

        match raw {
            RawPlayerState::Ready if self.awaiting_first_ready => {
                self.awaiting_first_ready = false;
                self.ad_duration_ms = pipeline.duration_ms().unwrap_or(0);
                if self.saved_ad_position_ms > 0 {
                    pipeline.seek_to(self.saved_ad_position_ms);
                }
                pipeline.play();
                self.clock.start();
                AdapterSignal::None
            }
            RawPlayerState::Buffering => {
                for callback in &self.callbacks {
                    callback.on_buffering(&ad);
                }
                AdapterSignal::None
            }
            RawPlayerState::Ended => {
                info!(ad_id = %ad.id, "Ad ended");
                self.saved_ad_position_ms = 0;
                self.clock.stop();
                for callback in &self.callbacks {
                    callback.on_ended(&ad);
                }
                AdapterSignal::AdEnded(ad)
            }
            _ => AdapterSignal::None,
        }
    }

    /// Interpret a pipeline error; only ad errors are consumed here
    pub fn on_pipeline_error(&mut self, err: &PipelineError) -> AdapterSignal {
        if !self.active {
            return AdapterSignal::None;
        }
        let Some(ad) = self.loaded_ad.clone() else {
            return AdapterSignal::None;
        };

        match err.kind {
            PipelineErrorKind::Unsupported => error!(ad_id = %ad.id, code = err.code, "Ad media format unsupported: {}", err.message),
            PipelineErrorKind::TimedOut => error!(ad_id = %ad.id, code = err.code, "Ad media timed out: {}", err.message),
            _ => error!(ad_id = %ad.id, code = err.code, "Ad playback failed: {}", err.message),
        }

        self.clock.stop();
        for callback in &self.callbacks {
            callback.on_error(&ad, err);
        }
        AdapterSignal::AdFailed(ad, err.clone())
    }

    /// Content takes the pipeline back
    pub fn yield_pipeline(&mut self) {
        self.active = false;
        self.awaiting_first_ready = false;
        self.clock.stop();
    }

    /// Content finished; lets the service schedule post-rolls
    pub fn notify_content_complete(&self) {
        info!("Content complete");
        for callback in &self.callbacks {
            callback.on_content_complete();
        }
    }
}

impl std::fmt::Debug for AdPlayerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdPlayerAdapter")
            .field("callbacks", &self.callbacks.len())
            .field("loaded_ad", &self.loaded_ad)
            .field("active", &self.active)
            .field("ad_duration_ms", &self.ad_duration_ms)
            .field("saved_ad_position_ms", &self.saved_ad_position_ms)
            .finish()
    }
}
