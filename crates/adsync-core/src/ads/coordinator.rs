//! Ad break coordination
//!
//! Pauses content when the ad service requests a break, restores it at the
//! saved position afterwards, and tracks the per-source break lifecycle:
//!
//! ```text
//! NoAdsRequested ──► AdsRequested ──► PlayingAd ──► AdsRequested ──► AllAdsCompleted
//!                         │               ▲              │
//!                         │               └──────────────┘
//!                         └──────────────────────────────────────────► AllAdsCompleted
//! ```

use super::adapter::AdPlayerAdapter;
use super::service::{AdDecisionService, AdError, AdErrorKind, AdEvent, AdsRequest, ContentProgressProvider};
use crate::error::{Error, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::mailbox::Mailbox;
use crate::pipeline::{MediaItem, PlaybackPipeline};
use crate::types::{AdBreakState, ProgressUpdate, Source};
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace, warn};

/// Player state the coordinator operates on, borrowed for one call
pub struct ContentContext<'a> {
    pub pipeline: &'a mut dyn PlaybackPipeline,
    pub adapter: &'a mut AdPlayerAdapter,
    pub bus: &'a mut EventBus,
    /// Committed content source, if any
    pub source: Option<&'a Source>,
    pub play_when_ready: bool,
}

impl ContentContext<'_> {
    /// Shorter-lived copy, for handing the context on while keeping it
    pub fn reborrow(&mut self) -> ContentContext<'_> {
        ContentContext {
            pipeline: &mut *self.pipeline,
            adapter: &mut *self.adapter,
            bus: &mut *self.bus,
            source: self.source,
            play_when_ready: self.play_when_ready,
        }
    }
}

/// Coordinates content with the ad service for one player
pub struct AdBreakCoordinator {
    service: Option<Box<dyn AdDecisionService>>,
    mailbox: Mailbox,
    state: AdBreakState,
    /// Content position to restore once the break ends
    saved_position_ms: Option<u64>,
    /// The service holds a loaded schedule that must be destroyed
    schedule_loaded: bool,
    content_complete_sent: bool,
    progress_tx: watch::Sender<ProgressUpdate>,
}

impl AdBreakCoordinator {
    pub fn new(service: Option<Box<dyn AdDecisionService>>, mailbox: Mailbox) -> Self {
        let (progress_tx, _) = watch::channel(ProgressUpdate::NotReady);
        Self {
            service,
            mailbox,
            state: AdBreakState::NoAdsRequested,
            saved_position_ms: None,
            schedule_loaded: false,
            content_complete_sent: false,
            progress_tx,
        }
    }

    /// Check if an ad service is configured
    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    /// Get break lifecycle state
    pub fn state(&self) -> AdBreakState {
        self.state
    }

    /// Saved content position while paused for ads
    pub fn saved_position_ms(&self) -> Option<u64> {
        self.saved_position_ms
    }

    /// Check if content yielded the pipeline to a break
    pub fn is_paused_for_ads(&self) -> bool {
        self.saved_position_ms.is_some()
    }

    /// Content progress view handed to the ad service
    pub fn progress_provider(&self) -> ContentProgressProvider {
        ContentProgressProvider::new(self.progress_tx.subscribe())
    }

    /// Publish content progress for the ad service.
    ///
    /// Progress is `NotReady` while the duration is unknown or zero.
    pub fn publish_progress(&self, pipeline: &dyn PlaybackPipeline) {
        let progress = match pipeline.duration_ms() {
            Some(duration) if duration > 0 => ProgressUpdate::new(pipeline.current_position_ms(), duration),
            _ => ProgressUpdate::NotReady,
        };
        self.progress_tx.send_if_modified(|current| {
            if *current == progress {
                return false;
            }
            *current = progress;
            true
        });
    }

    /// Start a new content lifetime: drop any schedule and break state of the previous source
    pub fn reset(&mut self, bus: &mut EventBus) {
        self.destroy_schedule();
        self.saved_position_ms = None;
        self.content_complete_sent = false;
        self.progress_tx.send_replace(ProgressUpdate::NotReady);
        self.set_state(AdBreakState::NoAdsRequested, bus);
    }

    /// Ask the service for ads for a freshly committed source.
    ///
    /// On failure content plays without ads: the break state moves straight
    /// to `AllAdsCompleted` and the error is returned for reporting.
    #[instrument(skip(self, bus))]
    pub fn request_ads(&mut self, ad_tag_uri: &str, bus: &mut EventBus) -> Result<()> {
        self.set_state(AdBreakState::AdsRequested, bus);

        let request = AdsRequest {
            ad_tag_uri: ad_tag_uri.to_string(),
            progress: self.progress_provider(),
            events: self.mailbox.clone(),
        };
        let result = match self.service.as_mut() {
            Some(service) => service.request_ads(request),
            None => Err(Error::ad_request("no ad-decision service configured")),
        };

        if let Err(err) = &result {
            warn!(error = %err, "Ad request failed, playing content without ads");
            self.set_state(AdBreakState::AllAdsCompleted, bus);
        }
        result
    }

    /// Handle an event posted by the ad service
    pub fn handle_ad_event(&mut self, event: AdEvent, ctx: ContentContext<'_>) {
        match event {
            AdEvent::Loaded => {
                info!("Ad schedule loaded");
                self.schedule_loaded = true;
                if let Some(service) = self.service.as_mut() {
                    service.start();
                }
            }
            AdEvent::Started(ad) => debug!(ad_id = %ad.id, "Ad started"),
            AdEvent::ContentPauseRequested => self.pause_content_for_ads(ctx),
            AdEvent::ContentResumeRequested => self.resume_content(ctx),
            AdEvent::AdProgress => trace!("Ad progress"),
            AdEvent::AllAdsCompleted => self.on_all_ads_completed(ctx),
            AdEvent::Error(err) => self.on_ad_error(err, ctx),
        }
    }

    /// Save the content position and yield the pipeline to ads.
    ///
    /// Repeating the call only re-saves the position while content still
    /// occupies the pipeline.
    pub fn pause_content_for_ads(&mut self, ctx: ContentContext<'_>) {
        if self.saved_position_ms.is_none() || !ctx.adapter.is_active() {
            self.publish_progress(ctx.pipeline);
            let position = ctx.pipeline.current_position_ms();
            info!(position_ms = position, "Pausing content for ads");
            self.saved_position_ms = Some(position);
        }
        ctx.pipeline.stop();
        self.set_state(AdBreakState::PlayingAd, ctx.bus);
    }

    /// Put content back into the pipeline at the saved position and play it.
    ///
    /// After a post-roll the content already finished: it is restored
    /// without playing and `PlayedToEnd` is emitted instead. A no-op when
    /// content was not paused for ads.
    pub fn resume_content(&mut self, ctx: ContentContext<'_>) {
        let post_roll = self.content_complete_sent;
        let play = ctx.play_when_ready && !post_roll;
        if !self.restore_content(ctx.pipeline, ctx.adapter, ctx.source, play) {
            return;
        }
        if post_roll {
            ctx.bus.emit(PlayerEvent::PlayedToEnd);
        }
        if self.state == AdBreakState::PlayingAd {
            self.set_state(AdBreakState::AdsRequested, ctx.bus);
        }
    }

    /// Content reached its end; notifies the ad service once per source
    pub fn on_content_ended(&mut self, adapter: &AdPlayerAdapter) {
        if self.state == AdBreakState::NoAdsRequested || self.content_complete_sent {
            return;
        }
        self.content_complete_sent = true;
        adapter.notify_content_complete();
    }

    /// Tear down at player close; no events are emitted
    pub fn shutdown(&mut self) {
        self.destroy_schedule();
        self.saved_position_ms = None;
    }

    fn on_all_ads_completed(&mut self, mut ctx: ContentContext<'_>) {
        info!("All ads completed");
        self.resume_content(ctx.reborrow());
        self.destroy_schedule();
        ctx.adapter.release();
        self.set_state(AdBreakState::AllAdsCompleted, ctx.bus);
    }

    fn on_ad_error(&mut self, err: AdError, mut ctx: ContentContext<'_>) {
        warn!(error = %err, "Ad service reported an error");
        match err.kind {
            AdErrorKind::Load => {
                self.resume_content(ctx.reborrow());
                self.destroy_schedule();
                self.set_state(AdBreakState::AllAdsCompleted, ctx.bus);
            }
            AdErrorKind::Playback => {
                if let Some(service) = self.service.as_mut() {
                    service.discard_ad_break();
                }
                self.resume_content(ctx);
            }
        }
    }

    fn restore_content(
        &mut self,
        pipeline: &mut dyn PlaybackPipeline,
        adapter: &mut AdPlayerAdapter,
        source: Option<&Source>,
        play: bool,
    ) -> bool {
        let Some(position) = self.saved_position_ms.take() else {
            debug!("Resume ignored, content was not paused for ads");
            return false;
        };
        adapter.yield_pipeline();

        let Some(source) = source else {
            pipeline.clear_media();
            return true;
        };
        info!(position_ms = position, play, "Resuming content");
        pipeline.set_media(MediaItem::from(source));
        pipeline.set_play_when_ready(play);
        pipeline.prepare();
        pipeline.seek_to(position);
        true
    }

    fn destroy_schedule(&mut self) {
        if !self.schedule_loaded {
            return;
        }
        self.schedule_loaded = false;
        if let Some(service) = self.service.as_mut() {
            debug!("Destroying ad schedule");
            service.destroy();
        }
    }

    fn set_state(&mut self, state: AdBreakState, bus: &mut EventBus) {
        if let Some(old_state) = crate::types::replace_if_changed(&mut self.state, state) {
            info!(from = %old_state, to = %state, "Ad break state");
            bus.emit(PlayerEvent::AdBreakStateChanged { state, old_state });
        }
    }
}

impl std::fmt::Debug for AdBreakCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdBreakCoordinator")
            .field("has_service", &self.service.is_some())
            .field("state", &self.state)
            .field("saved_position_ms", &self.saved_position_ms)
            .field("schedule_loaded", &self.schedule_loaded)
            .field("content_complete_sent", &self.content_complete_sent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::service::AdPlayerCallback;
    use crate::events::PlayerListener;
    use crate::pipeline::simulated::PipelineCall;
    use crate::pipeline::{FixedAudioOutput, PipelineError, SimulatedControl, SimulatedPipeline};
    use crate::types::{AdMediaHandle, PlayerId};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<PlayerEvent>>,
    }

    impl PlayerListener for Recorder {
        fn on_event(&self, _player_id: PlayerId, event: &PlayerEvent) {
            self.events.lock().push(event.clone());
        }
    }

    impl Recorder {
        fn break_states(&self) -> Vec<AdBreakState> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| match e {
                    PlayerEvent::AdBreakStateChanged { state, .. } => Some(*state),
                    _ => None,
                })
                .collect()
        }
    }

    #[derive(Default)]
    struct FakeService {
        log: Arc<Mutex<Vec<&'static str>>>,
        fail_request: bool,
    }

    struct NoopCallback;

    impl AdPlayerCallback for NoopCallback {
        fn on_ad_progress(&self, _ad: &AdMediaHandle, _progress: ProgressUpdate) {}
        fn on_ended(&self, _ad: &AdMediaHandle) {}
        fn on_error(&self, _ad: &AdMediaHandle, _error: &PipelineError) {}
        fn on_content_complete(&self) {}
    }

    impl AdDecisionService for FakeService {
        fn ad_player_callback(&self) -> Arc<dyn AdPlayerCallback> {
            Arc::new(NoopCallback)
        }

        fn request_ads(&mut self, _request: AdsRequest) -> Result<()> {
            self.log.lock().push("request");
            if self.fail_request {
                return Err(Error::ad_request("bad tag"));
            }
            Ok(())
        }

        fn start(&mut self) {
            self.log.lock().push("start");
        }

        fn discard_ad_break(&mut self) {
            self.log.lock().push("discard");
        }

        fn destroy(&mut self) {
            self.log.lock().push("destroy");
        }
    }

    struct Fixture {
        coordinator: AdBreakCoordinator,
        pipeline: SimulatedPipeline,
        control: SimulatedControl,
        adapter: AdPlayerAdapter,
        bus: EventBus,
        source: Source,
        recorder: Arc<Recorder>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Fixture {
        fn new(fail_request: bool) -> Self {
            let id = PlayerId::new();
            let (mailbox, _rx) = Mailbox::channel(id);
            let log = Arc::new(Mutex::new(Vec::new()));
            let service = FakeService {
                log: log.clone(),
                fail_request,
            };
            let (pipeline, control) = SimulatedPipeline::new();
            let source = Source::new(Url::parse("https://cdn.example.com/movie.m3u8").unwrap())
                .with_ad_tag("https://ads.example.com/vmap");
            control.register_media(&source.uri, 600_000);

            let mut bus = EventBus::new(id);
            let recorder = Arc::new(Recorder::default());
            bus.add_listener(recorder.clone());

            Self {
                coordinator: AdBreakCoordinator::new(Some(Box::new(service)), mailbox.clone()),
                pipeline,
                control,
                adapter: AdPlayerAdapter::new(Box::new(FixedAudioOutput::default()), mailbox, Duration::from_millis(250)),
                bus,
                source,
                recorder,
                log,
            }
        }

        fn ctx(&mut self) -> (&mut AdBreakCoordinator, ContentContext<'_>) {
            (
                &mut self.coordinator,
                ContentContext {
                    pipeline: &mut self.pipeline,
                    adapter: &mut self.adapter,
                    bus: &mut self.bus,
                    source: Some(&self.source),
                    play_when_ready: true,
                },
            )
        }

        fn event(&mut self, event: AdEvent) {
            let (coordinator, ctx) = self.ctx();
            coordinator.handle_ad_event(event, ctx);
        }

        fn start_content_at(&mut self, position_ms: u64) {
            self.pipeline.set_media(MediaItem::from(&self.source));
            self.pipeline.prepare();
            self.control.complete_buffering();
            self.pipeline.play();
            self.control.advance(position_ms);
        }
    }

    #[test]
    fn test_pause_and_resume_restores_position() {
        let mut fx = Fixture::new(false);
        fx.coordinator.request_ads("https://ads.example.com/vmap", &mut fx.bus).unwrap();
        fx.start_content_at(42_000);

        fx.event(AdEvent::ContentPauseRequested);
        assert_eq!(fx.coordinator.saved_position_ms(), Some(42_000));
        assert!(fx.control.calls().contains(&PipelineCall::Stop));

        fx.control.clear_calls();
        fx.event(AdEvent::ContentResumeRequested);
        assert_eq!(fx.coordinator.saved_position_ms(), None);
        assert_eq!(
            fx.control.calls(),
            vec![
                PipelineCall::SetMedia(fx.source.uri.clone()),
                PipelineCall::Prepare,
                PipelineCall::SeekTo(42_000),
            ]
        );
        assert_eq!(
            fx.recorder.break_states(),
            vec![AdBreakState::AdsRequested, AdBreakState::PlayingAd, AdBreakState::AdsRequested]
        );
    }

    #[test]
    fn test_pause_twice_keeps_first_position() {
        let mut fx = Fixture::new(false);
        fx.start_content_at(10_000);

        fx.event(AdEvent::ContentPauseRequested);
        fx.event(AdEvent::ContentPauseRequested);
        assert_eq!(fx.coordinator.saved_position_ms(), Some(10_000));
        assert_eq!(fx.coordinator.state(), AdBreakState::PlayingAd);
    }

    #[test]
    fn test_resume_without_pause_is_noop() {
        let mut fx = Fixture::new(false);
        fx.start_content_at(5_000);
        fx.control.clear_calls();

        fx.event(AdEvent::ContentResumeRequested);
        assert!(fx.control.calls().is_empty());
        assert!(fx.recorder.break_states().is_empty());
    }

    #[test]
    fn test_failed_request_falls_back_to_content() {
        let mut fx = Fixture::new(true);
        let err = fx.coordinator.request_ads("https://ads.example.com/vmap", &mut fx.bus).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(fx.coordinator.state(), AdBreakState::AllAdsCompleted);
        assert_eq!(
            fx.recorder.break_states(),
            vec![AdBreakState::AdsRequested, AdBreakState::AllAdsCompleted]
        );
    }

    #[test]
    fn test_no_service_falls_back_to_content() {
        let mut fx = Fixture::new(false);
        fx.coordinator.service = None;
        assert!(fx.coordinator.request_ads("https://ads.example.com/vmap", &mut fx.bus).is_err());
        assert_eq!(fx.coordinator.state(), AdBreakState::AllAdsCompleted);
    }

    #[test]
    fn test_playback_error_discards_break_and_resumes() {
        let mut fx = Fixture::new(false);
        fx.coordinator.request_ads("https://ads.example.com/vmap", &mut fx.bus).unwrap();
        fx.event(AdEvent::Loaded);
        fx.start_content_at(3_000);
        fx.event(AdEvent::ContentPauseRequested);

        fx.event(AdEvent::Error(AdError::playback("creative 404")));
        assert_eq!(*fx.log.lock(), vec!["request", "start", "discard"]);
        assert!(!fx.coordinator.is_paused_for_ads());
        assert_eq!(fx.control.position_ms(), 3_000);
        assert_eq!(fx.coordinator.state(), AdBreakState::AdsRequested);
    }

    #[test]
    fn test_all_ads_completed_destroys_schedule() {
        let mut fx = Fixture::new(false);
        fx.coordinator.request_ads("https://ads.example.com/vmap", &mut fx.bus).unwrap();
        fx.event(AdEvent::Loaded);
        fx.event(AdEvent::AllAdsCompleted);

        assert_eq!(*fx.log.lock(), vec!["request", "start", "destroy"]);
        assert_eq!(fx.coordinator.state(), AdBreakState::AllAdsCompleted);

        // a new source starts over
        fx.coordinator.reset(&mut fx.bus);
        assert_eq!(fx.coordinator.state(), AdBreakState::NoAdsRequested);
        assert_eq!(fx.log.lock().len(), 3);
    }

    #[test]
    fn test_post_roll_restores_content_without_playing() {
        let mut fx = Fixture::new(false);
        fx.coordinator.request_ads("https://ads.example.com/vmap", &mut fx.bus).unwrap();
        fx.start_content_at(600_000);
        fx.coordinator.on_content_ended(&fx.adapter);

        fx.event(AdEvent::ContentPauseRequested);
        fx.event(AdEvent::AllAdsCompleted);

        assert!(!fx.coordinator.is_paused_for_ads());
        assert!(!fx.control.calls().ends_with(&[PipelineCall::Play]));
        assert_eq!(fx.control.position_ms(), 600_000);
        assert!(fx.recorder.events.lock().contains(&PlayerEvent::PlayedToEnd));
    }

    #[test]
    fn test_post_roll_resume_request_does_not_replay() {
        let mut fx = Fixture::new(false);
        fx.coordinator.request_ads("https://ads.example.com/vmap", &mut fx.bus).unwrap();
        fx.start_content_at(600_000);
        fx.coordinator.on_content_ended(&fx.adapter);
        fx.coordinator.on_content_ended(&fx.adapter);

        fx.event(AdEvent::ContentPauseRequested);
        fx.event(AdEvent::ContentResumeRequested);
        fx.event(AdEvent::AllAdsCompleted);

        assert!(!fx.control.is_playing());
        let ends = fx
            .recorder
            .events
            .lock()
            .iter()
            .filter(|e| **e == PlayerEvent::PlayedToEnd)
            .count();
        assert_eq!(ends, 1);
        assert_eq!(
            fx.recorder.break_states(),
            vec![
                AdBreakState::AdsRequested,
                AdBreakState::PlayingAd,
                AdBreakState::AdsRequested,
                AdBreakState::AllAdsCompleted,
            ]
        );
    }

    #[test]
    fn test_progress_not_ready_until_duration_known() {
        let mut fx = Fixture::new(false);
        let provider = fx.coordinator.progress_provider();
        fx.pipeline.set_media(MediaItem::from(&fx.source));
        fx.pipeline.prepare();
        fx.coordinator.publish_progress(&fx.pipeline);
        assert_eq!(provider.content_progress(), ProgressUpdate::NotReady);

        fx.control.complete_buffering();
        fx.coordinator.publish_progress(&fx.pipeline);
        assert_eq!(provider.content_progress(), ProgressUpdate::new(0, 600_000));
    }
}
