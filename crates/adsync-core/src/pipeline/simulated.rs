//! In-memory pipeline
//!
//! Models the state progression of a real media stack (idle → buffering →
//! ready → ended) without decoding anything. The [`SimulatedPipeline`] is
//! handed to a player; the paired [`SimulatedControl`] drives buffering,
//! playback progress, end-of-stream and failures from the outside.

use super::{
    MediaItem, MediaItemTransitionReason, PipelineError, PipelineEvent, PlaybackPipeline,
    RawPlayerState,
};
use crate::mailbox::Mailbox;
use crate::types::{PlaybackParameters, Tracks};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Duration and liveness of a media locator known to the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaProfile {
    pub duration_ms: u64,
    pub is_live: bool,
}

/// Pipeline operation recorded for inspection
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCall {
    SetMedia(Url),
    ClearMedia,
    Prepare,
    Play,
    Pause,
    Stop,
    SeekTo(u64),
    Release,
}

#[derive(Debug)]
struct SimState {
    events: Option<Mailbox>,
    catalog: HashMap<Url, MediaProfile>,
    media: Option<MediaItem>,
    generation: u64,
    state: RawPlayerState,
    error: Option<PipelineError>,
    position_ms: u64,
    buffered_ms: u64,
    duration_known: bool,
    play_when_ready: bool,
    is_playing: bool,
    volume: f32,
    parameters: PlaybackParameters,
    released: bool,
    calls: Vec<PipelineCall>,
}

impl SimState {
    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.post(event.stamped(self.generation));
        }
    }

    fn set_state(&mut self, state: RawPlayerState) {
        if self.state != state {
            self.state = state;
            self.emit(PipelineEvent::StateChanged(state));
        }
    }

    fn set_playing(&mut self, is_playing: bool) {
        if self.is_playing != is_playing {
            self.is_playing = is_playing;
            self.emit(PipelineEvent::IsPlayingChanged(is_playing));
        }
    }

    fn profile(&self) -> Option<MediaProfile> {
        self.media
            .as_ref()
            .and_then(|item| self.catalog.get(&item.uri).copied())
    }

    fn duration_ms(&self) -> Option<u64> {
        if !self.duration_known {
            return None;
        }
        self.profile().filter(|p| !p.is_live).map(|p| p.duration_ms)
    }
}

/// Pipeline half owned by the player
#[derive(Debug)]
pub struct SimulatedPipeline {
    inner: Arc<Mutex<SimState>>,
}

/// Test and CLI half that drives the simulation
#[derive(Debug, Clone)]
pub struct SimulatedControl {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedPipeline {
    /// Create a pipeline and its control handle
    pub fn new() -> (Self, SimulatedControl) {
        let inner = Arc::new(Mutex::new(SimState {
            events: None,
            catalog: HashMap::new(),
            media: None,
            generation: 0,
            state: RawPlayerState::Idle,
            error: None,
            position_ms: 0,
            buffered_ms: 0,
            duration_known: false,
            play_when_ready: false,
            is_playing: false,
            volume: 1.0,
            parameters: PlaybackParameters::default(),
            released: false,
            calls: Vec::new(),
        }));
        (
            Self {
                inner: inner.clone(),
            },
            SimulatedControl { inner },
        )
    }
}

impl PlaybackPipeline for SimulatedPipeline {
    fn attach(&mut self, events: Mailbox) {
        self.inner.lock().events = Some(events);
    }

    fn detach(&mut self) {
        self.inner.lock().events = None;
    }

    fn set_media(&mut self, item: MediaItem) {
        let mut sim = self.inner.lock();
        sim.calls.push(PipelineCall::SetMedia(item.uri.clone()));
        sim.set_playing(false);
        sim.generation += 1;
        sim.media = Some(item);
        sim.position_ms = 0;
        sim.buffered_ms = 0;
        sim.duration_known = false;
        sim.emit(PipelineEvent::MediaItemTransition(
            MediaItemTransitionReason::PlaylistChanged,
        ));
    }

    fn clear_media(&mut self) {
        let mut sim = self.inner.lock();
        sim.calls.push(PipelineCall::ClearMedia);
        sim.set_playing(false);
        sim.generation += 1;
        sim.media = None;
        sim.position_ms = 0;
        sim.buffered_ms = 0;
        sim.duration_known = false;
        sim.set_state(RawPlayerState::Idle);
    }

    fn has_media(&self) -> bool {
        self.inner.lock().media.is_some()
    }

    fn media_generation(&self) -> u64 {
        self.inner.lock().generation
    }

    fn prepare(&mut self) {
        let mut sim = self.inner.lock();
        sim.calls.push(PipelineCall::Prepare);
        if sim.media.is_none() || sim.released {
            return;
        }
        if sim.error.take().is_some() {
            sim.emit(PipelineEvent::ErrorChanged(None));
        }
        sim.set_state(RawPlayerState::Buffering);
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        let mut sim = self.inner.lock();
        sim.play_when_ready = play_when_ready;
        if sim.state == RawPlayerState::Ready {
            sim.set_playing(play_when_ready);
        }
    }

    fn play(&mut self) {
        let mut sim = self.inner.lock();
        sim.calls.push(PipelineCall::Play);
        sim.play_when_ready = true;
        if sim.state == RawPlayerState::Ready {
            sim.set_playing(true);
        }
    }

    fn pause(&mut self) {
        let mut sim = self.inner.lock();
        sim.calls.push(PipelineCall::Pause);
        sim.play_when_ready = false;
        sim.set_playing(false);
    }

    fn stop(&mut self) {
        let mut sim = self.inner.lock();
        sim.calls.push(PipelineCall::Stop);
        sim.set_playing(false);
        sim.set_state(RawPlayerState::Idle);
    }

    fn seek_to(&mut self, position_ms: u64) {
        let mut sim = self.inner.lock();
        sim.calls.push(PipelineCall::SeekTo(position_ms));
        let clamped = match sim.profile() {
            Some(profile) if !profile.is_live => position_ms.min(profile.duration_ms),
            _ => position_ms,
        };
        sim.position_ms = clamped;
        sim.buffered_ms = sim.buffered_ms.max(clamped);
    }

    fn state(&self) -> RawPlayerState {
        self.inner.lock().state
    }

    fn error(&self) -> Option<PipelineError> {
        self.inner.lock().error.clone()
    }

    fn current_position_ms(&self) -> u64 {
        self.inner.lock().position_ms
    }

    fn duration_ms(&self) -> Option<u64> {
        self.inner.lock().duration_ms()
    }

    fn buffered_position_ms(&self) -> u64 {
        self.inner.lock().buffered_ms
    }

    fn is_live(&self) -> bool {
        self.inner.lock().profile().is_some_and(|p| p.is_live)
    }

    fn live_offset_ms(&self) -> Option<u64> {
        let sim = self.inner.lock();
        sim.profile().filter(|p| p.is_live).map(|_| 0)
    }

    fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    fn set_volume(&mut self, volume: f32) {
        let mut sim = self.inner.lock();
        if sim.volume != volume {
            sim.volume = volume;
            sim.emit(PipelineEvent::VolumeChanged(volume));
        }
    }

    fn set_playback_parameters(&mut self, parameters: PlaybackParameters) {
        let mut sim = self.inner.lock();
        if sim.parameters != parameters {
            sim.parameters = parameters;
            sim.emit(PipelineEvent::PlaybackParametersChanged(parameters));
        }
    }

    fn release(&mut self) {
        let mut sim = self.inner.lock();
        sim.calls.push(PipelineCall::Release);
        sim.events = None;
        sim.media = None;
        sim.is_playing = false;
        sim.state = RawPlayerState::Idle;
        sim.released = true;
    }
}

impl SimulatedControl {
    /// Declare the duration of a locator before it is loaded
    pub fn register_media(&self, uri: &Url, duration_ms: u64) {
        self.inner.lock().catalog.insert(
            uri.clone(),
            MediaProfile {
                duration_ms,
                is_live: false,
            },
        );
    }

    pub fn register_live_media(&self, uri: &Url) {
        self.inner.lock().catalog.insert(
            uri.clone(),
            MediaProfile {
                duration_ms: 0,
                is_live: true,
            },
        );
    }

    /// Finish buffering: buffering → ready, and start playing if requested
    pub fn complete_buffering(&self) -> bool {
        let mut sim = self.inner.lock();
        if sim.state != RawPlayerState::Buffering {
            return false;
        }
        sim.duration_known = true;
        let buffered_to = sim.duration_ms().unwrap_or(sim.position_ms);
        sim.buffered_ms = buffered_to;
        sim.set_state(RawPlayerState::Ready);
        if sim.play_when_ready {
            sim.set_playing(true);
        }
        true
    }

    /// Re-enter buffering from ready (stall)
    pub fn stall(&self) {
        let mut sim = self.inner.lock();
        if sim.state == RawPlayerState::Ready {
            sim.set_state(RawPlayerState::Buffering);
        }
    }

    /// Advance the playhead while playing; reaching the end ends the stream
    pub fn advance(&self, elapsed_ms: u64) {
        let mut sim = self.inner.lock();
        if !sim.is_playing {
            return;
        }
        sim.position_ms += elapsed_ms;
        if let Some(duration) = sim.duration_ms() {
            if sim.position_ms >= duration {
                sim.position_ms = duration;
                sim.set_playing(false);
                sim.set_state(RawPlayerState::Ended);
            }
        }
    }

    /// Jump straight to end-of-stream
    pub fn finish(&self) {
        let mut sim = self.inner.lock();
        if let Some(duration) = sim.duration_ms() {
            sim.position_ms = duration;
        }
        sim.set_playing(false);
        sim.set_state(RawPlayerState::Ended);
    }

    /// Signal a pipeline failure; the pipeline drops to idle
    pub fn fail(&self, error: PipelineError) {
        let mut sim = self.inner.lock();
        debug!(error = %error, "Simulated pipeline failure");
        sim.error = Some(error.clone());
        sim.set_playing(false);
        sim.emit(PipelineEvent::ErrorChanged(Some(error)));
        sim.set_state(RawPlayerState::Idle);
    }

    pub fn report_tracks(&self, tracks: Tracks) {
        self.inner.lock().emit(PipelineEvent::TracksChanged(tracks));
    }

    /// Loop back to the start of the current item
    pub fn repeat(&self) {
        let mut sim = self.inner.lock();
        sim.position_ms = 0;
        sim.emit(PipelineEvent::MediaItemTransition(MediaItemTransitionReason::Repeat));
    }

    /// Volume change originating outside the player (e.g. hardware keys)
    pub fn report_volume(&self, volume: f32) {
        let mut sim = self.inner.lock();
        sim.volume = volume;
        sim.emit(PipelineEvent::VolumeChanged(volume));
    }

    pub fn current_uri(&self) -> Option<Url> {
        self.inner.lock().media.as_ref().map(|item| item.uri.clone())
    }

    pub fn state(&self) -> RawPlayerState {
        self.inner.lock().state
    }

    pub fn position_ms(&self) -> u64 {
        self.inner.lock().position_ms
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().is_playing
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    pub fn parameters(&self) -> PlaybackParameters {
        self.inner.lock().parameters
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().events.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().released
    }

    /// Operations performed on the pipeline so far
    pub fn calls(&self) -> Vec<PipelineCall> {
        self.inner.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::PlayerMessage;
    use crate::types::PlayerId;

    fn content_url() -> Url {
        Url::parse("https://cdn.example.com/content.mp4").unwrap()
    }

    #[test]
    fn test_prepare_and_buffering() {
        let (mut pipeline, control) = SimulatedPipeline::new();
        let (mailbox, mut rx) = Mailbox::channel(PlayerId::new());
        pipeline.attach(mailbox);
        control.register_media(&content_url(), 10_000);

        pipeline.set_media(MediaItem::new(content_url()));
        pipeline.set_play_when_ready(true);
        pipeline.prepare();
        assert_eq!(pipeline.duration_ms(), None);
        assert!(control.complete_buffering());

        assert_eq!(pipeline.state(), RawPlayerState::Ready);
        assert_eq!(pipeline.duration_ms(), Some(10_000));
        assert!(control.is_playing());

        let mut events = Vec::new();
        while let Ok(PlayerMessage::Pipeline(report)) = rx.try_recv() {
            assert_eq!(report.generation, 1);
            events.push(report.event);
        }
        assert_eq!(
            events,
            vec![
                PipelineEvent::MediaItemTransition(MediaItemTransitionReason::PlaylistChanged),
                PipelineEvent::StateChanged(RawPlayerState::Buffering),
                PipelineEvent::StateChanged(RawPlayerState::Ready),
                PipelineEvent::IsPlayingChanged(true),
            ]
        );
    }

    #[test]
    fn test_advance_reaches_end() {
        let (mut pipeline, control) = SimulatedPipeline::new();
        control.register_media(&content_url(), 1_000);
        pipeline.set_media(MediaItem::new(content_url()));
        pipeline.play();
        pipeline.prepare();
        control.complete_buffering();

        control.advance(600);
        assert_eq!(pipeline.current_position_ms(), 600);
        control.advance(600);
        assert_eq!(pipeline.current_position_ms(), 1_000);
        assert_eq!(pipeline.state(), RawPlayerState::Ended);
        assert!(!control.is_playing());
    }

    #[test]
    fn test_media_changes_bump_generation() {
        let (mut pipeline, control) = SimulatedPipeline::new();
        let (mailbox, mut rx) = Mailbox::channel(PlayerId::new());
        pipeline.attach(mailbox);
        assert_eq!(pipeline.media_generation(), 0);

        pipeline.set_media(MediaItem::new(content_url()));
        pipeline.prepare();
        control.complete_buffering();
        pipeline.clear_media();
        assert_eq!(pipeline.media_generation(), 2);

        let mut generations = Vec::new();
        while let Ok(PlayerMessage::Pipeline(report)) = rx.try_recv() {
            if report.event.is_item_scoped() {
                generations.push((report.generation, report.event));
            }
        }
        assert_eq!(generations.first().map(|(g, _)| *g), Some(1));
        assert_eq!(
            generations.last(),
            Some(&(2, PipelineEvent::StateChanged(RawPlayerState::Idle)))
        );
    }

    #[test]
    fn test_seek_is_clamped_to_duration() {
        let (mut pipeline, control) = SimulatedPipeline::new();
        control.register_media(&content_url(), 5_000);
        pipeline.set_media(MediaItem::new(content_url()));
        pipeline.seek_to(9_000);
        assert_eq!(pipeline.current_position_ms(), 5_000);
        assert_eq!(control.calls().last(), Some(&PipelineCall::SeekTo(9_000)));
    }
}
