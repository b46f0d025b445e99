//! Domain events and their delivery
//!
//! Events fan out to two kinds of receivers:
//! - native listeners, held weakly so a dropped listener silently stops
//!   receiving and is pruned on the next emission
//! - one external sink (the UI layer), which receives a named JSON payload
//!   for externally visible events only
//!
//! Delivery is synchronous and unordered across listeners. There is no
//! queuing: a slow listener delays the emission that follows it.

use crate::types::{
    AdBreakState, AudioMixingMode, PlaybackError, PlaybackParameters, PlaybackStatus, PlayerId,
    Source, SubtitleTrack, TimeUpdate, Tracks,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::trace;

/// Events emitted by a player
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StatusChanged {
        status: PlaybackStatus,
        old_status: PlaybackStatus,
        error: Option<PlaybackError>,
    },
    IsPlayingChanged {
        is_playing: bool,
        old_is_playing: bool,
    },
    VolumeChanged {
        volume: f32,
        old_volume: f32,
    },
    MutedChanged {
        muted: bool,
        old_muted: bool,
    },
    SourceChanged {
        source: Option<Source>,
        old_source: Option<Source>,
    },
    PlaybackRateChanged {
        rate: f32,
        old_rate: f32,
    },
    /// Native only: speed and pitch as applied to the pipeline
    PlaybackParametersChanged {
        parameters: PlaybackParameters,
        old_parameters: PlaybackParameters,
    },
    TimeUpdated(TimeUpdate),
    TracksChanged(Tracks),
    AvailableSubtitleTracksChanged {
        tracks: Vec<SubtitleTrack>,
        old_tracks: Vec<SubtitleTrack>,
    },
    SubtitleTrackChanged {
        track: Option<SubtitleTrack>,
        old_track: Option<SubtitleTrack>,
    },
    PlayedToEnd,
    AudioMixingModeChanged {
        mode: AudioMixingMode,
        old_mode: AudioMixingMode,
    },
    AdBreakStateChanged {
        state: AdBreakState,
        old_state: AdBreakState,
    },
}

impl PlayerEvent {
    /// Event name used by the external sink
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::StatusChanged { .. } => "statusChange",
            PlayerEvent::IsPlayingChanged { .. } => "playingChange",
            PlayerEvent::VolumeChanged { .. } => "volumeChange",
            PlayerEvent::MutedChanged { .. } => "mutedChange",
            PlayerEvent::SourceChanged { .. } => "sourceChange",
            PlayerEvent::PlaybackRateChanged { .. } => "playbackRateChange",
            PlayerEvent::PlaybackParametersChanged { .. } => "playbackParametersChange",
            PlayerEvent::TimeUpdated(_) => "timeUpdate",
            PlayerEvent::TracksChanged(_) => "tracksChange",
            PlayerEvent::AvailableSubtitleTracksChanged { .. } => "availableSubtitleTracksChange",
            PlayerEvent::SubtitleTrackChanged { .. } => "subtitleTrackChange",
            PlayerEvent::PlayedToEnd => "playToEnd",
            PlayerEvent::AudioMixingModeChanged { .. } => "audioMixingModeChange",
            PlayerEvent::AdBreakStateChanged { .. } => "adBreakStateChange",
        }
    }

    /// Whether the external sink receives this event
    pub fn is_external(&self) -> bool {
        !matches!(self, PlayerEvent::PlaybackParametersChanged { .. })
    }

    /// Serializable payload for the external sink
    pub fn payload(&self) -> serde_json::Value {
        match self {
            PlayerEvent::StatusChanged {
                status,
                old_status,
                error,
            } => json!({ "status": status, "oldStatus": old_status, "error": error }),
            PlayerEvent::IsPlayingChanged {
                is_playing,
                old_is_playing,
            } => json!({ "isPlaying": is_playing, "oldIsPlaying": old_is_playing }),
            PlayerEvent::VolumeChanged { volume, old_volume } => {
                json!({ "volume": volume, "oldVolume": old_volume })
            }
            PlayerEvent::MutedChanged { muted, old_muted } => {
                json!({ "muted": muted, "oldMuted": old_muted })
            }
            PlayerEvent::SourceChanged { source, old_source } => {
                json!({ "source": source, "oldSource": old_source })
            }
            PlayerEvent::PlaybackRateChanged { rate, old_rate } => {
                json!({ "playbackRate": rate, "oldPlaybackRate": old_rate })
            }
            PlayerEvent::PlaybackParametersChanged {
                parameters,
                old_parameters,
            } => json!({ "parameters": parameters, "oldParameters": old_parameters }),
            PlayerEvent::TimeUpdated(update) => json!(update),
            PlayerEvent::TracksChanged(tracks) => json!({ "tracks": tracks }),
            PlayerEvent::AvailableSubtitleTracksChanged { tracks, old_tracks } => json!({
                "availableSubtitleTracks": tracks,
                "oldAvailableSubtitleTracks": old_tracks,
            }),
            PlayerEvent::SubtitleTrackChanged { track, old_track } => {
                json!({ "subtitleTrack": track, "oldSubtitleTrack": old_track })
            }
            PlayerEvent::PlayedToEnd => json!({}),
            PlayerEvent::AudioMixingModeChanged { mode, old_mode } => {
                json!({ "audioMixingMode": mode, "oldAudioMixingMode": old_mode })
            }
            PlayerEvent::AdBreakStateChanged { state, old_state } => {
                json!({ "state": state, "oldState": old_state })
            }
        }
    }
}

/// Native event listener.
///
/// Callbacks run on the player's owner task and must return quickly.
pub trait PlayerListener: Send + Sync {
    fn on_event(&self, player_id: PlayerId, event: &PlayerEvent);
}

/// Record delivered to the external sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub player_id: PlayerId,
    /// Per-player emission counter, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub payload: serde_json::Value,
}

/// The single UI-facing emission channel
pub trait EventSink: Send + Sync {
    fn send(&self, event: ExternalEvent);
}

/// Sink forwarding records over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ExternalEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExternalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: ExternalEvent) {
        let _ = self.tx.send(event);
    }
}

/// Weakly-held native listeners keyed by identity
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Vec<Weak<dyn PlayerListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns false if it was already registered.
    ///
    /// Only a weak reference is kept: the caller owns the listener.
    pub fn add(&mut self, listener: Arc<dyn PlayerListener>) -> bool {
        let key = Arc::as_ptr(&listener) as *const ();
        if self.position(key).is_some() {
            return false;
        }
        self.entries.push(Arc::downgrade(&listener));
        true
    }

    /// Unregister a listener; returns false if it was not registered
    pub fn remove(&mut self, listener: Arc<dyn PlayerListener>) -> bool {
        let key = Arc::as_ptr(&listener) as *const ();
        match self.position(key) {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Live listeners; dead entries are pruned along the way
    pub fn live(&mut self) -> Vec<Arc<dyn PlayerListener>> {
        let mut live = Vec::with_capacity(self.entries.len());
        self.entries.retain(|entry| match entry.upgrade() {
            Some(listener) => {
                live.push(listener);
                true
            }
            None => false,
        });
        live
    }

    /// Number of entries, including dead ones not yet pruned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, key: *const ()) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.strong_count() > 0 && Weak::as_ptr(entry) as *const () == key)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Per-player event fan-out
pub struct EventBus {
    player_id: PlayerId,
    listeners: ListenerRegistry,
    sink: Option<Arc<dyn EventSink>>,
    sequence: u64,
}

impl EventBus {
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            listeners: ListenerRegistry::new(),
            sink: None,
            sequence: 0,
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn PlayerListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&mut self, listener: Arc<dyn PlayerListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Install or replace the external sink
    pub fn set_sink(&mut self, sink: Option<Arc<dyn EventSink>>) {
        self.sink = sink;
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Drop every listener and the sink
    pub fn detach_all(&mut self) {
        self.listeners.clear();
        self.sink = None;
    }

    pub fn emit(&mut self, event: PlayerEvent) {
        trace!(player_id = %self.player_id, event = event.name(), "Emitting event");

        for listener in self.listeners.live() {
            listener.on_event(self.player_id, &event);
        }

        if !event.is_external() {
            return;
        }
        if let Some(sink) = &self.sink {
            self.sequence += 1;
            sink.send(ExternalEvent {
                player_id: self.player_id,
                sequence: self.sequence,
                timestamp: Utc::now(),
                name: event.name().to_string(),
                payload: event.payload(),
            });
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("player_id", &self.player_id)
            .field("listeners", &self.listeners)
            .field("has_sink", &self.sink.is_some())
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<PlayerEvent>>,
    }

    impl PlayerListener for Recorder {
        fn on_event(&self, _player_id: PlayerId, event: &PlayerEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn volume_event() -> PlayerEvent {
        PlayerEvent::VolumeChanged {
            volume: 0.5,
            old_volume: 1.0,
        }
    }

    #[test]
    fn test_delivers_to_live_listeners() {
        let mut bus = EventBus::new(PlayerId::new());
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        bus.add_listener(first.clone());
        bus.add_listener(second.clone());

        bus.emit(PlayerEvent::PlayedToEnd);

        assert_eq!(first.events.lock().len(), 1);
        assert_eq!(second.events.lock().len(), 1);
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let mut bus = EventBus::new(PlayerId::new());
        let listener = Arc::new(Recorder::default());
        assert!(bus.add_listener(listener.clone()));
        assert!(!bus.add_listener(listener.clone()));

        bus.emit(PlayerEvent::PlayedToEnd);
        assert_eq!(listener.events.lock().len(), 1);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let mut bus = EventBus::new(PlayerId::new());
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        bus.add_listener(kept.clone());
        bus.add_listener(dropped.clone());
        drop(dropped);

        bus.emit(volume_event());
        bus.emit(volume_event());

        assert_eq!(kept.events.lock().len(), 2);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_remove_listener() {
        let mut bus = EventBus::new(PlayerId::new());
        let listener = Arc::new(Recorder::default());
        bus.add_listener(listener.clone());
        assert!(bus.remove_listener(listener.clone()));
        assert!(!bus.remove_listener(listener.clone()));

        bus.emit(PlayerEvent::PlayedToEnd);
        assert!(listener.events.lock().is_empty());
    }

    #[test]
    fn test_sink_receives_external_events_only() {
        let mut bus = EventBus::new(PlayerId::new());
        let (sink, mut rx) = ChannelSink::new();
        bus.set_sink(Some(Arc::new(sink)));

        bus.emit(PlayerEvent::PlaybackParametersChanged {
            parameters: PlaybackParameters::new(2.0, 1.0),
            old_parameters: PlaybackParameters::default(),
        });
        bus.emit(volume_event());

        let record = rx.try_recv().unwrap();
        assert_eq!(record.name, "volumeChange");
        assert_eq!(record.sequence, 1);
        assert_eq!(record.payload["oldVolume"], json!(1.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_status_payload_shape() {
        let event = PlayerEvent::StatusChanged {
            status: PlaybackStatus::Error,
            old_status: PlaybackStatus::Loading,
            error: Some(PlaybackError {
                code: 2001,
                message: "connection reset".to_string(),
            }),
        };
        let payload = event.payload();
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["oldStatus"], "loading");
        assert_eq!(payload["error"]["message"], "connection reset");
    }

    #[test]
    fn test_detach_all() {
        let mut bus = EventBus::new(PlayerId::new());
        let listener = Arc::new(Recorder::default());
        let (sink, mut rx) = ChannelSink::new();
        bus.add_listener(listener.clone());
        bus.set_sink(Some(Arc::new(sink)));

        bus.detach_all();
        bus.emit(PlayerEvent::PlayedToEnd);

        assert!(listener.events.lock().is_empty());
        assert!(rx.try_recv().is_err());
        assert!(!bus.has_sink());
    }
}
