//! Player status derived from raw pipeline state

use crate::pipeline::{PipelineError, PlaybackPipeline, RawPlayerState};
use crate::types::{PlaybackError, PlaybackStatus};
use tracing::debug;

/// Duration and liveness read from the pipeline when it becomes ready
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaMetrics {
    pub duration_ms: Option<u64>,
    pub is_live: bool,
}

impl MediaMetrics {
    pub fn of(pipeline: &dyn PlaybackPipeline) -> Self {
        Self {
            duration_ms: pipeline.duration_ms(),
            is_live: pipeline.is_live(),
        }
    }
}

/// A status transition to announce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: PlaybackStatus,
    pub old_status: PlaybackStatus,
    pub error: Option<PlaybackError>,
}

/// Tracks one player's [`PlaybackStatus`].
///
/// Only transitions to a different status are reported, so consumers never
/// see the same status twice in a row.
#[derive(Debug, Clone)]
pub struct PlaybackStatusMachine {
    status: PlaybackStatus,
    error: Option<PlaybackError>,
    duration_secs: f64,
    is_live: bool,
}

impl PlaybackStatusMachine {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            error: None,
            duration_secs: 0.0,
            is_live: false,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// Error attached to the current status; always `None` unless in Error
    pub fn error(&self) -> Option<&PlaybackError> {
        self.error.as_ref()
    }

    /// Duration of the ready media in seconds, 0 when unknown
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    /// Map a raw pipeline state to a status. An error always wins.
    pub fn map_state(raw: RawPlayerState, error: Option<&PipelineError>) -> PlaybackStatus {
        if error.is_some() {
            return PlaybackStatus::Error;
        }
        match raw {
            RawPlayerState::Idle | RawPlayerState::Ended => PlaybackStatus::Idle,
            RawPlayerState::Buffering => PlaybackStatus::Loading,
            RawPlayerState::Ready => PlaybackStatus::ReadyToPlay,
        }
    }

    /// Feed a raw state report; returns the transition if the status changed
    pub fn on_underlying_state_changed(
        &mut self,
        raw: RawPlayerState,
        error: Option<&PipelineError>,
        metrics: MediaMetrics,
    ) -> Option<StatusChange> {
        let status = Self::map_state(raw, error);

        match status {
            PlaybackStatus::ReadyToPlay => {
                self.duration_secs = metrics.duration_ms.map_or(0.0, |ms| ms as f64 / 1000.0);
                self.is_live = metrics.is_live;
            }
            PlaybackStatus::Idle | PlaybackStatus::Error => self.reset_media_metrics(),
            PlaybackStatus::Loading => {}
        }

        self.set_status(status, error.map(PlaybackError::from))
    }

    /// Forget duration and live flag, e.g. when the media item changes
    pub fn reset_media_metrics(&mut self) {
        self.duration_secs = 0.0;
        self.is_live = false;
    }

    fn set_status(&mut self, status: PlaybackStatus, error: Option<PlaybackError>) -> Option<StatusChange> {
        if status == PlaybackStatus::Error {
            self.error = error.clone();
        } else {
            self.error = None;
        }

        if status == self.status {
            return None;
        }

        let old_status = std::mem::replace(&mut self.status, status);
        debug!(from = %old_status, to = %status, "Status transition");
        Some(StatusChange {
            status,
            old_status,
            error,
        })
    }
}

impl Default for PlaybackStatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineErrorKind;

    const RAW_STATES: [RawPlayerState; 4] = [
        RawPlayerState::Idle,
        RawPlayerState::Buffering,
        RawPlayerState::Ready,
        RawPlayerState::Ended,
    ];

    fn network_error() -> PipelineError {
        PipelineError::new(PipelineErrorKind::Network, 2001, "connection reset")
    }

    fn ready_metrics() -> MediaMetrics {
        MediaMetrics {
            duration_ms: Some(90_000),
            is_live: false,
        }
    }

    #[test]
    fn test_mapping() {
        use PlaybackStatus::*;
        assert_eq!(PlaybackStatusMachine::map_state(RawPlayerState::Idle, None), Idle);
        assert_eq!(PlaybackStatusMachine::map_state(RawPlayerState::Buffering, None), Loading);
        assert_eq!(PlaybackStatusMachine::map_state(RawPlayerState::Ready, None), ReadyToPlay);
        assert_eq!(PlaybackStatusMachine::map_state(RawPlayerState::Ended, None), Idle);

        let err = network_error();
        for raw in RAW_STATES {
            assert_eq!(PlaybackStatusMachine::map_state(raw, Some(&err)), Error);
        }
    }

    #[test]
    fn test_normal_playback_sequence() {
        let mut machine = PlaybackStatusMachine::new();

        let loading = machine
            .on_underlying_state_changed(RawPlayerState::Buffering, None, MediaMetrics::default())
            .unwrap();
        assert_eq!(loading.old_status, PlaybackStatus::Idle);
        assert_eq!(loading.status, PlaybackStatus::Loading);

        let ready = machine
            .on_underlying_state_changed(RawPlayerState::Ready, None, ready_metrics())
            .unwrap();
        assert_eq!(ready.status, PlaybackStatus::ReadyToPlay);
        assert_eq!(machine.duration_secs(), 90.0);
    }

    #[test]
    fn test_leaving_ready_resets_metrics() {
        let mut machine = PlaybackStatusMachine::new();
        machine.on_underlying_state_changed(
            RawPlayerState::Ready,
            None,
            MediaMetrics {
                duration_ms: None,
                is_live: true,
            },
        );
        assert!(machine.is_live());

        machine.on_underlying_state_changed(RawPlayerState::Ended, None, MediaMetrics::default());
        assert!(!machine.is_live());
        assert_eq!(machine.duration_secs(), 0.0);
    }

    #[test]
    fn test_error_is_carried_and_discarded() {
        let mut machine = PlaybackStatusMachine::new();
        let err = network_error();

        let change = machine
            .on_underlying_state_changed(RawPlayerState::Idle, Some(&err), MediaMetrics::default())
            .unwrap();
        assert_eq!(change.status, PlaybackStatus::Error);
        assert_eq!(change.error.as_ref().map(|e| e.code), Some(2001));
        assert!(machine.error().is_some());

        // idle while the error is still active does not leave Error
        assert!(machine
            .on_underlying_state_changed(RawPlayerState::Idle, Some(&err), MediaMetrics::default())
            .is_none());

        let change = machine
            .on_underlying_state_changed(RawPlayerState::Buffering, None, MediaMetrics::default())
            .unwrap();
        assert_eq!(change.old_status, PlaybackStatus::Error);
        assert!(change.error.is_none());
        assert!(machine.error().is_none());
    }

    #[test]
    fn test_no_duplicate_changes_for_any_sequence() {
        // every sequence of four raw reports, each with or without an error
        let err = network_error();
        let inputs: Vec<(RawPlayerState, bool)> = RAW_STATES
            .iter()
            .flat_map(|raw| [(*raw, false), (*raw, true)])
            .collect();

        for a in &inputs {
            for b in &inputs {
                for c in &inputs {
                    for d in &inputs {
                        let mut machine = PlaybackStatusMachine::new();
                        let mut last = machine.status();
                        for (raw, failed) in [a, b, c, d] {
                            let error = failed.then_some(&err);
                            let expected = PlaybackStatusMachine::map_state(*raw, error);
                            match machine.on_underlying_state_changed(*raw, error, ready_metrics()) {
                                Some(change) => {
                                    assert_ne!(change.status, change.old_status);
                                    assert_eq!(change.old_status, last);
                                    assert_eq!(change.status, expected);
                                    last = change.status;
                                }
                                None => assert_eq!(expected, last),
                            }
                        }
                    }
                }
            }
        }
    }
}
