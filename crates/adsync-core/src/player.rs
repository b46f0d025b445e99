//! Video Player - owner-task orchestrator for one playback
//!
//! Coordinates:
//! - Source commit and replacement
//! - Status tracking from raw pipeline state
//! - Ad playback through the shared pipeline
//! - Content pause and resume around ad breaks
//! - Event emission to listeners and the external sink
//!
//! A `VideoPlayer` is not shared: it lives on one task and every input
//! reaches it through [`VideoPlayer::dispatch`].

use crate::{
    ads::{AdBreakCoordinator, AdDecisionService, AdPlayerAdapter, AdPlayerCommand, AdapterSignal, AdEvent, ContentContext},
    clock::ProgressClock,
    config::PlayerConfig,
    driver::PlayerCommand,
    error::{Error, Result},
    events::{EventBus, EventSink, PlayerEvent, PlayerListener},
    mailbox::{AppLifecycle, Mailbox, PlayerMessage},
    pipeline::{AudioOutput, FixedAudioOutput, MediaItem, MediaItemTransitionReason, PipelineError, PipelineEvent, PipelineReport, PlaybackPipeline, RawPlayerState},
    registry::PlayerRegistry,
    status::{MediaMetrics, PlaybackStatusMachine, StatusChange},
    types::*,
};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

/// Point-in-time view of a player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub status: PlaybackStatus,
    pub error: Option<PlaybackError>,
    pub is_playing: bool,
    pub volume: f32,
    pub muted: bool,
    pub playback_rate: f32,
    pub current_time: f64,
    pub duration: f64,
    pub is_live: bool,
    pub ad_break_state: AdBreakState,
    pub playing_ad: bool,
    pub saved_content_position_ms: Option<u64>,
    pub source: Option<Source>,
}

/// Builder for [`VideoPlayer`]
pub struct PlayerBuilder {
    config: PlayerConfig,
    pipeline: Box<dyn PlaybackPipeline>,
    audio: Box<dyn AudioOutput>,
    ad_service: Option<Box<dyn AdDecisionService>>,
    registry: Option<PlayerRegistry>,
    sink: Option<Arc<dyn EventSink>>,
    source: Option<Source>,
}

impl PlayerBuilder {
    pub fn new(pipeline: impl PlaybackPipeline + 'static) -> Self {
        Self {
            config: PlayerConfig::default(),
            pipeline: Box::new(pipeline),
            audio: Box::new(FixedAudioOutput::default()),
            ad_service: None,
            registry: None,
            sink: None,
            source: None,
        }
    }

    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn audio_output(mut self, audio: impl AudioOutput + 'static) -> Self {
        self.audio = Box::new(audio);
        self
    }

    pub fn ad_service(mut self, service: impl AdDecisionService + 'static) -> Self {
        self.ad_service = Some(Box::new(service));
        self
    }

    /// Register the player for app lifecycle notifications
    pub fn registry(mut self, registry: PlayerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Source committed right after construction
    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Build the player and the receiver its owner task must drain.
    ///
    /// Periodic time updates run on the current tokio runtime; with
    /// `time_update_interval_ms > 0` this fails with `InvalidState` when
    /// called outside of one.
    pub fn build(self) -> Result<(VideoPlayer, mpsc::UnboundedReceiver<PlayerMessage>)> {
        self.config.validate()?;
        if self.config.time_update_interval().is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::invalid_state("time updates need a tokio runtime"));
        }

        let id = PlayerId::new();
        let (mailbox, rx) = Mailbox::channel(id);

        let mut pipeline = self.pipeline;
        pipeline.attach(mailbox.clone());
        pipeline.set_volume(self.config.initial_volume);

        let mut adapter = AdPlayerAdapter::new(self.audio, mailbox.clone(), self.config.ad_progress_interval());
        if let Some(service) = &self.ad_service {
            adapter.add_callback(service.ad_player_callback());
        }
        let coordinator = AdBreakCoordinator::new(self.ad_service, mailbox.clone());

        let time_clock = ProgressClock::new(
            "time_update",
            self.config.time_update_interval().unwrap_or(Duration::ZERO),
            mailbox.clone(),
            || PlayerMessage::TimeUpdateTick,
        );

        let mut bus = EventBus::new(id);
        bus.set_sink(self.sink);

        if let Some(registry) = &self.registry {
            registry.register(id, mailbox.clone());
        }

        info!(player_id = %id, "Player created");

        let mut player = VideoPlayer {
            id,
            preserves_pitch: self.config.preserves_pitch,
            stays_active_in_background: self.config.stays_active_in_background,
            volume: self.config.initial_volume,
            user_volume: self.config.initial_volume,
            config: self.config,
            pipeline,
            mailbox,
            bus,
            status: PlaybackStatusMachine::new(),
            adapter,
            coordinator,
            time_clock,
            registry: self.registry,
            uncommitted_source: None,
            last_loaded_source: None,
            playing: false,
            muted: false,
            playback_parameters: PlaybackParameters::default(),
            audio_mixing_mode: AudioMixingMode::default(),
            paused_by_lifecycle: false,
            tracks: Tracks::default(),
            closed: false,
        };

        if player.config.time_update_interval().is_some() {
            player.time_clock.start();
        }
        if let Some(source) = self.source {
            player.replace(Some(source));
        }
        Ok((player, rx))
    }

    /// Build the player and run it on its own task
    pub fn spawn(self) -> Result<crate::driver::PlayerHandle> {
        let (player, rx) = self.build()?;
        Ok(crate::driver::spawn(player, rx))
    }
}

/// Single-owner video player coordinating content and ads
pub struct VideoPlayer {
    /// Unique player ID
    id: PlayerId,
    /// Player configuration
    config: PlayerConfig,
    /// Platform pipeline shared by content and ads
    pipeline: Box<dyn PlaybackPipeline>,
    /// Own mailbox, handed to clocks and the ad service
    mailbox: Mailbox,
    /// Listeners and the external sink
    bus: EventBus,
    /// Content status
    status: PlaybackStatusMachine,
    /// Video ad surface
    adapter: AdPlayerAdapter,
    /// Ad break lifecycle
    coordinator: AdBreakCoordinator,
    /// Periodic time updates
    time_clock: ProgressClock,
    /// Lifecycle registry this player is registered with
    registry: Option<PlayerRegistry>,
    /// Set but not yet committed
    uncommitted_source: Option<Source>,
    /// Committed to the pipeline
    last_loaded_source: Option<Source>,
    playing: bool,
    volume: f32,
    /// Volume restored on unmute
    user_volume: f32,
    muted: bool,
    playback_parameters: PlaybackParameters,
    preserves_pitch: bool,
    audio_mixing_mode: AudioMixingMode,
    stays_active_in_background: bool,
    /// Paused because the app went to the background
    paused_by_lifecycle: bool,
    tracks: Tracks,
    closed: bool,
}

impl VideoPlayer {
    pub fn builder(pipeline: impl PlaybackPipeline + 'static) -> PlayerBuilder {
        PlayerBuilder::new(pipeline)
    }

    /// Get player ID
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Get mailbox
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Get configuration
    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Get content status
    pub fn status(&self) -> PlaybackStatus {
        self.status.status()
    }

    /// Error behind an `Error` status
    pub fn playback_error(&self) -> Option<&PlaybackError> {
        self.status.error()
    }

    /// Whether the pipeline is rendering frames
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Get user volume (0.0 - 1.0)
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Check if muted
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Get playback rate
    pub fn playback_rate(&self) -> f32 {
        self.playback_parameters.speed
    }

    /// Get speed and pitch
    pub fn playback_parameters(&self) -> PlaybackParameters {
        self.playback_parameters
    }

    /// Check if pitch is kept at 1.0 regardless of rate
    pub fn preserves_pitch(&self) -> bool {
        self.preserves_pitch
    }

    /// Get audio mixing mode
    pub fn audio_mixing_mode(&self) -> AudioMixingMode {
        self.audio_mixing_mode
    }

    /// Check if playback continues in the background
    pub fn stays_active_in_background(&self) -> bool {
        self.stays_active_in_background
    }

    /// Current position in seconds
    pub fn current_time(&self) -> f64 {
        self.pipeline.current_position_ms() as f64 / 1000.0
    }

    /// Duration of the ready media in seconds
    pub fn duration(&self) -> f64 {
        self.status.duration_secs()
    }

    /// Check if the ready media is a live stream
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// Get available tracks
    pub fn tracks(&self) -> &Tracks {
        &self.tracks
    }

    /// Get ad break lifecycle state
    pub fn ad_break_state(&self) -> AdBreakState {
        self.coordinator.state()
    }

    /// Check if the pipeline is lent to an ad
    pub fn is_playing_ad(&self) -> bool {
        self.adapter.is_active()
    }

    /// Content position to restore after the current break
    pub fn saved_content_position_ms(&self) -> Option<u64> {
        self.coordinator.saved_position_ms()
    }

    /// Progress of the ad in the pipeline
    pub fn ad_progress(&self) -> ProgressUpdate {
        self.adapter.ad_progress(self.pipeline.as_ref())
    }

    /// Device volume as seen by the ad service
    pub fn ad_volume(&self) -> f32 {
        self.adapter.volume()
    }

    /// Source set but not yet committed, else the committed one
    pub fn current_source(&self) -> Option<&Source> {
        self.uncommitted_source.as_ref().or(self.last_loaded_source.as_ref())
    }

    /// Get committed source
    pub fn last_loaded_source(&self) -> Option<&Source> {
        self.last_loaded_source.as_ref()
    }

    /// Source whose metadata (e.g. for a media session) describes what is playing
    pub fn metadata_source(&self) -> Result<&Source> {
        self.current_source()
            .ok_or_else(|| Error::invalid_state("no source has been set"))
    }

    /// Check if closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Capture current player state
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            status: self.status(),
            error: self.playback_error().cloned(),
            is_playing: self.playing,
            volume: self.volume,
            muted: self.muted,
            playback_rate: self.playback_rate(),
            current_time: self.current_time(),
            duration: self.duration(),
            is_live: self.is_live(),
            ad_break_state: self.ad_break_state(),
            playing_ad: self.is_playing_ad(),
            saved_content_position_ms: self.saved_content_position_ms(),
            source: self.last_loaded_source.clone(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn PlayerListener>) -> bool {
        self.bus.add_listener(listener)
    }

    pub fn remove_listener(&mut self, listener: Arc<dyn PlayerListener>) -> bool {
        self.bus.remove_listener(listener)
    }

    pub fn set_event_sink(&mut self, sink: Option<Arc<dyn EventSink>>) {
        self.bus.set_sink(sink);
    }

    /// Set a source without committing it; [`VideoPlayer::prepare`] commits
    pub fn set_source(&mut self, source: Option<Source>) {
        self.uncommitted_source = source;
    }

    /// Set and commit a source; `None` clears the pipeline
    pub fn replace(&mut self, source: Option<Source>) {
        match source {
            Some(source) => {
                self.uncommitted_source = Some(source);
                self.prepare();
            }
            None => {
                self.uncommitted_source = None;
                self.commit(None);
            }
        }
    }

    /// Commit the pending source to the pipeline
    pub fn prepare(&mut self) {
        if self.closed {
            return;
        }
        match self.uncommitted_source.take() {
            Some(source) => self.commit(Some(source)),
            None if self.last_loaded_source.is_none() => self.pipeline.clear_media(),
            None => debug!(player_id = %self.id, "No pending source to commit"),
        }
    }

    #[instrument(skip(self, source), fields(player_id = %self.id))]
    fn commit(&mut self, source: Option<Source>) {
        self.coordinator.reset(&mut self.bus);
        self.adapter.yield_pipeline();
        self.status.reset_media_metrics();

        let Some(source) = source else {
            info!("Clearing source");
            self.pipeline.clear_media();
            self.set_last_loaded_source(None);
            return;
        };

        info!(uri = %source.uri, ads = source.ad_tag().is_some(), "Committing source");
        self.pipeline.set_media(MediaItem::from(&source));
        self.pipeline.set_play_when_ready(self.config.play_when_ready);
        self.pipeline.prepare();

        let ad_tag = source.ad_tag().map(str::to_string);
        self.set_last_loaded_source(Some(source));

        if let Some(ad_tag) = ad_tag {
            if let Err(err) = self.coordinator.request_ads(&ad_tag, &mut self.bus) {
                warn!(error = %err, code = err.error_code(), "Continuing without ads");
            }
        }
    }

    fn set_last_loaded_source(&mut self, source: Option<Source>) {
        if let Some(old_source) = replace_if_changed(&mut self.last_loaded_source, source.clone()) {
            self.bus.emit(PlayerEvent::SourceChanged { source, old_source });
        }
    }

    pub fn play(&mut self) {
        self.paused_by_lifecycle = false;
        self.pipeline.play();
    }

    pub fn pause(&mut self) {
        self.paused_by_lifecycle = false;
        self.pipeline.pause();
    }

    /// Seek content; rejected while an ad occupies the pipeline
    pub fn seek_to(&mut self, position_ms: u64) -> Result<()> {
        if self.adapter.is_active() {
            return Err(Error::invalid_state("cannot seek while an ad is playing"));
        }
        self.pipeline.seek_to(position_ms);
        self.coordinator.publish_progress(self.pipeline.as_ref());
        Ok(())
    }

    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            warn!(player_id = %self.id, volume, "Ignoring invalid volume");
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        self.user_volume = volume;
        if let Some(old_volume) = replace_if_changed(&mut self.volume, volume) {
            if !self.muted {
                self.pipeline.set_volume(volume);
            }
            self.bus.emit(PlayerEvent::VolumeChanged { volume, old_volume });
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        if let Some(old_muted) = replace_if_changed(&mut self.muted, muted) {
            self.pipeline.set_volume(if muted { 0.0 } else { self.user_volume });
            self.bus.emit(PlayerEvent::MutedChanged { muted, old_muted });
        }
    }

    pub fn set_playback_rate(&mut self, rate: f32) {
        if !(rate > 0.0 && rate.is_finite()) {
            warn!(player_id = %self.id, rate, "Ignoring invalid playback rate");
            return;
        }
        self.apply_playback_parameters(PlaybackParameters::new(rate, self.playback_parameters.pitch));
    }

    pub fn set_preserves_pitch(&mut self, preserves_pitch: bool) {
        self.preserves_pitch = preserves_pitch;
        self.apply_playback_parameters(self.playback_parameters);
    }

    fn apply_playback_parameters(&mut self, parameters: PlaybackParameters) {
        let pitch = if self.preserves_pitch { 1.0 } else { parameters.speed };
        let parameters = PlaybackParameters::new(parameters.speed, pitch);
        if let Some(old_parameters) = replace_if_changed(&mut self.playback_parameters, parameters) {
            self.pipeline.set_playback_parameters(parameters);
            self.bus.emit(PlayerEvent::PlaybackParametersChanged {
                parameters,
                old_parameters,
            });
            if old_parameters.speed != parameters.speed {
                self.bus.emit(PlayerEvent::PlaybackRateChanged {
                    rate: parameters.speed,
                    old_rate: old_parameters.speed,
                });
            }
        }
    }

    pub fn set_audio_mixing_mode(&mut self, mode: AudioMixingMode) {
        if let Some(old_mode) = replace_if_changed(&mut self.audio_mixing_mode, mode) {
            self.bus.emit(PlayerEvent::AudioMixingModeChanged { mode, old_mode });
        }
    }

    pub fn set_stays_active_in_background(&mut self, stays_active: bool) {
        self.stays_active_in_background = stays_active;
    }

    /// Change the time update interval; 0 disables time updates
    pub fn set_time_update_interval(&mut self, interval_ms: u64) {
        self.config.time_update_interval_ms = interval_ms;
        match self.config.time_update_interval() {
            Some(interval) => {
                self.time_clock.set_interval(interval);
                self.time_clock.start();
            }
            None => self.time_clock.stop(),
        }
    }

    /// Handle one message on the owner task; `Break` once the player closed
    pub fn dispatch(&mut self, message: PlayerMessage) -> ControlFlow<()> {
        if self.closed {
            if let PlayerMessage::Close(Some(ack)) = message {
                let _ = ack.send(());
            }
            return ControlFlow::Break(());
        }

        match message {
            PlayerMessage::Pipeline(report) => self.handle_pipeline_report(report),
            PlayerMessage::Ad(event) => self.handle_ad_event(event),
            PlayerMessage::AdPlayer(command) => self.handle_ad_player_command(command),
            PlayerMessage::AdProgressTick => self.adapter.on_progress_tick(self.pipeline.as_ref()),
            PlayerMessage::TimeUpdateTick => self.on_time_update_tick(),
            PlayerMessage::Lifecycle(lifecycle) => self.on_lifecycle(lifecycle),
            PlayerMessage::Command(command) => self.handle_command(command),
            PlayerMessage::Close(ack) => {
                self.close();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: PlayerCommand) {
        match command {
            PlayerCommand::SetSource(source) => self.set_source(source),
            PlayerCommand::Prepare => self.prepare(),
            PlayerCommand::Replace(source) => self.replace(source),
            PlayerCommand::Play => self.play(),
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::SeekTo(position_ms) => {
                if let Err(err) = self.seek_to(position_ms) {
                    warn!(player_id = %self.id, error = %err, "Seek rejected");
                }
            }
            PlayerCommand::SetVolume(volume) => self.set_volume(volume),
            PlayerCommand::SetMuted(muted) => self.set_muted(muted),
            PlayerCommand::SetPlaybackRate(rate) => self.set_playback_rate(rate),
            PlayerCommand::SetPreservesPitch(preserves) => self.set_preserves_pitch(preserves),
            PlayerCommand::SetAudioMixingMode(mode) => self.set_audio_mixing_mode(mode),
            PlayerCommand::SetStaysActiveInBackground(stays) => self.set_stays_active_in_background(stays),
            PlayerCommand::SetTimeUpdateInterval(interval_ms) => self.set_time_update_interval(interval_ms),
            PlayerCommand::AddListener(listener) => {
                self.add_listener(listener);
            }
            PlayerCommand::RemoveListener(listener) => {
                self.remove_listener(listener);
            }
            PlayerCommand::SetEventSink(sink) => self.set_event_sink(sink),
            PlayerCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Route a pipeline callback, dropping item-scoped reports about a media
    /// item that has since been replaced
    pub fn handle_pipeline_report(&mut self, report: PipelineReport) {
        let current = self.pipeline.media_generation();
        if report.generation != current && report.event.is_item_scoped() {
            trace!(
                player_id = %self.id,
                generation = report.generation,
                current,
                event = ?report.event,
                "Dropping stale pipeline event"
            );
            return;
        }
        self.handle_pipeline_event(report.event);
    }

    fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::StateChanged(raw) => self.on_pipeline_state(raw),
            PipelineEvent::ErrorChanged(error) => self.on_pipeline_error(error),
            PipelineEvent::IsPlayingChanged(is_playing) => {
                if let Some(old_is_playing) = replace_if_changed(&mut self.playing, is_playing) {
                    self.bus.emit(PlayerEvent::IsPlayingChanged {
                        is_playing,
                        old_is_playing,
                    });
                }
            }
            PipelineEvent::VolumeChanged(volume) => {
                // while muted the pipeline volume is 0 and does not reflect the user's
                if !self.muted {
                    self.set_volume(volume);
                }
            }
            PipelineEvent::PlaybackParametersChanged(parameters) => {
                if let Some(old_parameters) = replace_if_changed(&mut self.playback_parameters, parameters) {
                    self.bus.emit(PlayerEvent::PlaybackParametersChanged {
                        parameters,
                        old_parameters,
                    });
                    if old_parameters.speed != parameters.speed {
                        self.bus.emit(PlayerEvent::PlaybackRateChanged {
                            rate: parameters.speed,
                            old_rate: old_parameters.speed,
                        });
                    }
                }
            }
            PipelineEvent::TracksChanged(tracks) => self.on_tracks_changed(tracks),
            PipelineEvent::MediaItemTransition(reason) => {
                if reason == MediaItemTransitionReason::Repeat && !self.adapter.is_active() {
                    self.bus.emit(PlayerEvent::PlayedToEnd);
                }
            }
        }
    }

    fn on_pipeline_state(&mut self, raw: RawPlayerState) {
        let ad_active = self.adapter.is_active();
        // ad failures belong to the ad flow, never to the content status
        let error = if ad_active { None } else { self.pipeline.error() };
        let metrics = MediaMetrics::of(self.pipeline.as_ref());
        let change = self.status.on_underlying_state_changed(raw, error.as_ref(), metrics);
        self.emit_status_change(change);

        match self.adapter.on_pipeline_state(raw, self.pipeline.as_mut()) {
            AdapterSignal::ContentEnded if error.is_none() => {
                self.bus.emit(PlayerEvent::PlayedToEnd);
                self.coordinator.on_content_ended(&self.adapter);
            }
            AdapterSignal::AdEnded(ad) => debug!(player_id = %self.id, ad_id = %ad.id, "Ad left the pipeline"),
            _ => {}
        }

        if !self.adapter.is_active() {
            self.coordinator.publish_progress(self.pipeline.as_ref());
        }
    }

    fn on_pipeline_error(&mut self, error: Option<PipelineError>) {
        if let Some(err) = &error {
            if let AdapterSignal::AdFailed(ad, _) = self.adapter.on_pipeline_error(err) {
                debug!(player_id = %self.id, ad_id = %ad.id, "Ad error handed to the ad service");
                return;
            }
            warn!(player_id = %self.id, code = err.code, "Playback error: {}", err.message);
        }
        if self.adapter.is_active() {
            return;
        }
        let raw = self.pipeline.state();
        let metrics = MediaMetrics::of(self.pipeline.as_ref());
        let change = self.status.on_underlying_state_changed(raw, error.as_ref(), metrics);
        self.emit_status_change(change);
    }

    fn emit_status_change(&mut self, change: Option<StatusChange>) {
        if let Some(StatusChange {
            status,
            old_status,
            error,
        }) = change
        {
            self.bus.emit(PlayerEvent::StatusChanged {
                status,
                old_status,
                error,
            });
        }
    }

    fn on_tracks_changed(&mut self, tracks: Tracks) {
        let old = std::mem::replace(&mut self.tracks, tracks.clone());
        self.bus.emit(PlayerEvent::TracksChanged(tracks.clone()));
        if old.subtitle_tracks != tracks.subtitle_tracks {
            self.bus.emit(PlayerEvent::AvailableSubtitleTracksChanged {
                tracks: tracks.subtitle_tracks,
                old_tracks: old.subtitle_tracks,
            });
        }
        if old.current_subtitle_track != tracks.current_subtitle_track {
            self.bus.emit(PlayerEvent::SubtitleTrackChanged {
                track: tracks.current_subtitle_track,
                old_track: old.current_subtitle_track,
            });
        }
    }

    /// Route an ad service event to the coordinator
    pub fn handle_ad_event(&mut self, event: AdEvent) {
        let ctx = ContentContext {
            pipeline: self.pipeline.as_mut(),
            adapter: &mut self.adapter,
            bus: &mut self.bus,
            source: self.last_loaded_source.as_ref(),
            play_when_ready: self.config.play_when_ready,
        };
        self.coordinator.handle_ad_event(event, ctx);
    }

    /// Execute a request from the ad service against the pipeline
    pub fn handle_ad_player_command(&mut self, command: AdPlayerCommand) {
        match command {
            AdPlayerCommand::Load { ad, pod } => self.adapter.load_ad(ad, pod),
            AdPlayerCommand::Play(ad) => {
                if !self.coordinator.is_paused_for_ads() {
                    warn!(player_id = %self.id, ad_id = %ad.id, "Ad played while content was not paused");
                }
                self.adapter.play_ad(ad, self.pipeline.as_mut());
            }
            AdPlayerCommand::Pause(ad) => self.adapter.pause_ad(&ad, self.pipeline.as_mut()),
            AdPlayerCommand::Stop(ad) => self.adapter.stop_ad(&ad),
        }
    }

    fn on_time_update_tick(&mut self) {
        if !self.time_clock.is_running() {
            return;
        }
        let update = self.time_update();
        if !self.adapter.is_active() {
            self.coordinator.publish_progress(self.pipeline.as_ref());
        }
        self.bus.emit(PlayerEvent::TimeUpdated(update));
    }

    /// Snapshot of position, live offset and buffering
    pub fn time_update(&self) -> TimeUpdate {
        let pipeline = self.pipeline.as_ref();
        let position_ms = pipeline.current_position_ms();
        let buffered_position = if !pipeline.has_media() {
            -1.0
        } else if pipeline.state() == RawPlayerState::Buffering {
            0.0
        } else {
            pipeline.buffered_position_ms() as f64 / 1000.0
        };
        TimeUpdate {
            current_time: position_ms as f64 / 1000.0,
            current_offset_from_live: pipeline.live_offset_ms().map(|ms| ms as f64 / 1000.0),
            current_live_timestamp: pipeline
                .window_start_time_ms()
                .map(|start| start + position_ms as i64),
            buffered_position,
        }
    }

    fn on_lifecycle(&mut self, lifecycle: AppLifecycle) {
        match lifecycle {
            AppLifecycle::Background => {
                if !self.stays_active_in_background && self.playing {
                    debug!(player_id = %self.id, "Pausing for background");
                    self.pipeline.pause();
                    self.paused_by_lifecycle = true;
                }
            }
            AppLifecycle::Foreground => {
                if self.paused_by_lifecycle {
                    debug!(player_id = %self.id, "Resuming from background");
                    self.paused_by_lifecycle = false;
                    self.pipeline.play();
                }
            }
        }
    }

    /// Tear the player down. Idempotent; nothing is emitted afterwards.
    #[instrument(skip(self), fields(player_id = %self.id))]
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("Closing player");

        self.time_clock.stop();
        self.coordinator.shutdown();
        self.adapter.release();
        self.bus.detach_all();

        self.pipeline.detach();
        self.pipeline.release();

        if let Some(registry) = &self.registry {
            registry.unregister(self.id);
        }
        self.uncommitted_source = None;
        self.last_loaded_source = None;
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for VideoPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPlayer")
            .field("id", &self.id)
            .field("status", &self.status.status())
            .field("ad_break_state", &self.coordinator.state())
            .field("source", &self.last_loaded_source)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineErrorKind, SimulatedControl, SimulatedPipeline};
    use parking_lot::Mutex;
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
        fn names(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(PlayerEvent::name).collect()
        }

        fn statuses(&self) -> Vec<PlaybackStatus> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| match e {
                    PlayerEvent::StatusChanged { status, .. } => Some(*status),
                    _ => None,
                })
                .collect()
        }
    }

    struct Harness {
        player: VideoPlayer,
        rx: mpsc::UnboundedReceiver<PlayerMessage>,
        control: SimulatedControl,
        recorder: Arc<Recorder>,
    }

    impl Harness {
        fn new(config: PlayerConfig) -> Self {
            let (pipeline, control) = SimulatedPipeline::new();
            let (mut player, rx) = VideoPlayer::builder(pipeline).config(config).build().unwrap();
            let recorder = Arc::new(Recorder::default());
            player.add_listener(recorder.clone());
            Self {
                player,
                rx,
                control,
                recorder,
            }
        }

        fn pump(&mut self) {
            while let Ok(message) = self.rx.try_recv() {
                let _ = self.player.dispatch(message);
            }
        }
    }

    fn source(name: &str) -> Source {
        Source::new(Url::parse(&format!("https://cdn.example.com/{name}.m3u8")).unwrap())
    }

    #[test]
    fn test_commit_emits_source_and_loading() {
        let mut h = Harness::new(PlayerConfig::default());
        let movie = source("movie");
        h.control.register_media(&movie.uri, 120_000);

        h.player.replace(Some(movie.clone()));
        h.pump();
        assert_eq!(h.player.last_loaded_source(), Some(&movie));
        assert_eq!(h.player.status(), PlaybackStatus::Loading);

        h.control.complete_buffering();
        h.pump();
        assert_eq!(h.player.status(), PlaybackStatus::ReadyToPlay);
        assert!(h.player.is_playing());
        assert_eq!(h.player.duration(), 120.0);
        assert_eq!(h.recorder.statuses(), vec![PlaybackStatus::Loading, PlaybackStatus::ReadyToPlay]);
        assert!(h.recorder.names().contains(&"sourceChange"));
    }

    #[test]
    fn test_set_source_waits_for_prepare() {
        let mut h = Harness::new(PlayerConfig::default());
        let movie = source("movie");
        h.player.set_source(Some(movie.clone()));
        assert_eq!(h.player.current_source(), Some(&movie));
        assert!(h.player.last_loaded_source().is_none());
        assert_eq!(h.player.metadata_source().unwrap(), &movie);

        h.player.prepare();
        assert_eq!(h.player.last_loaded_source(), Some(&movie));
        assert_eq!(h.control.current_uri(), Some(movie.uri));
    }

    #[test]
    fn test_reports_about_replaced_media_are_dropped() {
        let mut h = Harness::new(PlayerConfig::default());
        let (first, second) = (source("first"), source("second"));
        h.control.register_media(&first.uri, 10_000);
        h.control.register_media(&second.uri, 20_000);

        h.player.replace(Some(first));
        h.control.complete_buffering();
        h.player.replace(Some(second));
        h.pump();

        assert_eq!(h.player.status(), PlaybackStatus::Loading);
        assert_eq!(h.recorder.statuses(), vec![PlaybackStatus::Loading]);
        assert!(!h.player.is_playing());

        h.control.complete_buffering();
        h.pump();
        assert_eq!(h.player.duration(), 20.0);
        assert_eq!(h.recorder.statuses(), vec![PlaybackStatus::Loading, PlaybackStatus::ReadyToPlay]);
    }

    #[test]
    fn test_error_status_carries_error() {
        let mut h = Harness::new(PlayerConfig::default());
        h.player.replace(Some(source("movie")));
        h.pump();

        h.control.fail(PipelineError::new(PipelineErrorKind::Network, 2001, "connection reset"));
        h.pump();
        assert_eq!(h.player.status(), PlaybackStatus::Error);
        assert_eq!(h.player.playback_error().map(|e| e.code), Some(2001));
        assert_eq!(h.recorder.statuses(), vec![PlaybackStatus::Loading, PlaybackStatus::Error]);
    }

    #[test]
    fn test_played_to_end_on_finish_and_repeat() {
        let mut h = Harness::new(PlayerConfig::default());
        let movie = source("movie");
        h.control.register_media(&movie.uri, 10_000);
        h.player.replace(Some(movie));
        h.control.complete_buffering();
        h.pump();

        h.control.advance(10_000);
        h.pump();
        assert_eq!(h.player.status(), PlaybackStatus::Idle);

        h.control.repeat();
        h.pump();
        let ends = h.recorder.names().iter().filter(|n| **n == "playToEnd").count();
        assert_eq!(ends, 2);
    }

    #[test]
    fn test_volume_and_mute() {
        let mut h = Harness::new(PlayerConfig::default());
        h.player.set_volume(0.4);
        h.pump();
        assert_eq!(h.control.volume(), 0.4);

        h.player.set_muted(true);
        h.pump();
        assert_eq!(h.control.volume(), 0.0);
        assert_eq!(h.player.volume(), 0.4);

        h.player.set_muted(false);
        h.pump();
        assert_eq!(h.control.volume(), 0.4);
        assert_eq!(h.recorder.names(), vec!["volumeChange", "mutedChange", "mutedChange"]);
    }

    #[test]
    fn test_non_finite_volume_is_ignored() {
        let mut h = Harness::new(PlayerConfig::default());
        h.player.set_volume(0.4);
        h.player.set_volume(f32::NAN);
        h.player.set_volume(f32::INFINITY);
        h.pump();
        assert_eq!(h.player.volume(), 0.4);
        assert_eq!(h.control.volume(), 0.4);
        assert_eq!(h.recorder.names(), vec!["volumeChange"]);
    }

    #[test]
    fn test_external_volume_change_is_reported() {
        let mut h = Harness::new(PlayerConfig::default());
        h.control.report_volume(0.25);
        h.pump();
        assert_eq!(h.player.volume(), 0.25);
        assert_eq!(h.recorder.names(), vec!["volumeChange"]);
    }

    #[test]
    fn test_playback_rate_and_pitch() {
        let mut h = Harness::new(PlayerConfig::default());
        h.player.set_playback_rate(1.5);
        h.pump();
        assert_eq!(h.control.parameters(), PlaybackParameters::new(1.5, 1.0));

        h.player.set_preserves_pitch(false);
        h.pump();
        assert_eq!(h.control.parameters(), PlaybackParameters::new(1.5, 1.5));
        assert_eq!(h.player.playback_rate(), 1.5);

        let rate_changes = h.recorder.names().iter().filter(|n| **n == "playbackRateChange").count();
        assert_eq!(rate_changes, 1);

        h.player.set_playback_rate(-1.0);
        assert_eq!(h.player.playback_rate(), 1.5);
    }

    #[test]
    fn test_subtitle_tracks() {
        let mut h = Harness::new(PlayerConfig::default());
        let english = SubtitleTrack {
            id: "sub-en".to_string(),
            language: Some("en".to_string()),
            label: "English".to_string(),
        };
        h.control.report_tracks(Tracks {
            subtitle_tracks: vec![english.clone()],
            current_subtitle_track: Some(english.clone()),
            audio_languages: vec!["en".to_string()],
        });
        h.pump();
        assert_eq!(
            h.recorder.names(),
            vec!["tracksChange", "availableSubtitleTracksChange", "subtitleTrackChange"]
        );

        // same tracks again: only the raw tracks event
        h.control.report_tracks(h.player.tracks().clone());
        h.pump();
        assert_eq!(h.recorder.names().len(), 4);
    }

    #[test]
    fn test_background_pauses_unless_configured() {
        let mut h = Harness::new(PlayerConfig::default());
        let movie = source("movie");
        h.control.register_media(&movie.uri, 60_000);
        h.player.replace(Some(movie));
        h.control.complete_buffering();
        h.pump();
        assert!(h.player.is_playing());

        let _ = h.player.dispatch(PlayerMessage::Lifecycle(AppLifecycle::Background));
        h.pump();
        assert!(!h.player.is_playing());

        let _ = h.player.dispatch(PlayerMessage::Lifecycle(AppLifecycle::Foreground));
        h.pump();
        assert!(h.player.is_playing());

        h.player.set_stays_active_in_background(true);
        let _ = h.player.dispatch(PlayerMessage::Lifecycle(AppLifecycle::Background));
        h.pump();
        assert!(h.player.is_playing());
    }

    #[test]
    fn test_audio_mixing_mode_change() {
        let mut h = Harness::new(PlayerConfig::default());
        h.player.set_audio_mixing_mode(AudioMixingMode::Auto);
        h.player.set_audio_mixing_mode(AudioMixingMode::DuckOthers);
        assert_eq!(h.recorder.names(), vec!["audioMixingModeChange"]);
    }

    #[test]
    fn test_close_is_idempotent_and_silent() {
        let mut h = Harness::new(PlayerConfig::default());
        h.player.replace(Some(source("movie")));
        h.pump();
        let before = h.recorder.events.lock().len();

        h.player.close();
        h.player.close();
        assert!(h.control.is_released());
        assert!(!h.control.is_attached());

        h.control.complete_buffering();
        assert!(h.player.dispatch(PlayerMessage::TimeUpdateTick).is_break());
        assert_eq!(h.recorder.events.lock().len(), before);
    }

    #[test]
    fn test_seek_updates_position() {
        let mut h = Harness::new(PlayerConfig::default());
        let movie = source("movie");
        h.control.register_media(&movie.uri, 60_000);
        h.player.replace(Some(movie));
        h.control.complete_buffering();
        h.pump();

        h.player.seek_to(20_000).unwrap();
        assert_eq!(h.player.current_time(), 20.0);
        assert_eq!(h.player.time_update().buffered_position, 60.0);
    }

    #[test]
    fn test_metadata_source_requires_a_source() {
        let h = Harness::new(PlayerConfig::default());
        let err = h.player.metadata_source().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
    }

    #[test]
    fn test_time_update_without_media() {
        let h = Harness::new(PlayerConfig::default());
        let update = h.player.time_update();
        assert_eq!(update.buffered_position, -1.0);
        assert_eq!(update.current_offset_from_live, None);
    }

    #[test]
    fn test_time_updates_need_a_runtime() {
        let config = PlayerConfig {
            time_update_interval_ms: 250,
            ..Default::default()
        };
        let (pipeline, _control) = SimulatedPipeline::new();
        let err = VideoPlayer::builder(pipeline).config(config).build().err().unwrap();
        assert_eq!(err.error_code(), "INVALID_STATE");

        let (pipeline, _control) = SimulatedPipeline::new();
        assert!(VideoPlayer::builder(pipeline).config(PlayerConfig::default()).build().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_updates_start_inside_a_runtime() {
        let config = PlayerConfig {
            time_update_interval_ms: 250,
            ..Default::default()
        };
        let (pipeline, _control) = SimulatedPipeline::new();
        let (_player, mut rx) = VideoPlayer::builder(pipeline).config(config).build().unwrap();
        tokio::time::sleep(Duration::from_millis(260)).await;
        let mut ticks = 0;
        while let Ok(message) = rx.try_recv() {
            if matches!(message, PlayerMessage::TimeUpdateTick) {
                ticks += 1;
            }
        }
        assert_eq!(ticks, 1);
    }
}
