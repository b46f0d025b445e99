//! Scripted ad-decision service
//!
//! Plays a fixed schedule of pre-roll, mid-roll and post-roll breaks. It
//! behaves like a real ad SDK towards the player (events and ad player
//! commands arrive through the mailbox) and records what it was asked to
//! do for inspection.

use super::service::{
    AdDecisionService, AdError, AdEvent, AdPlayerCallback, AdPlayerCommand, AdsRequest,
    ContentProgressProvider,
};
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::pipeline::PipelineError;
use crate::types::{AdMediaHandle, AdPodInfo, ProgressUpdate};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Where a break sits on the content timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "offsetMs")]
pub enum BreakOffset {
    Preroll,
    Midroll(u64),
    Postroll,
}

/// One scheduled ad break
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdBreakPlan {
    pub offset: BreakOffset,
    pub ads: Vec<AdMediaHandle>,
}

impl AdBreakPlan {
    pub fn new(offset: BreakOffset, ads: Vec<AdMediaHandle>) -> Self {
        Self { offset, ads }
    }
}

/// What the service was asked to do or was told
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptLogEntry {
    Requested(String),
    Started,
    BreakStarted(BreakOffset),
    AdEnded(String),
    AdFailed(String),
    BreakDiscarded,
    ContentComplete,
    Destroyed,
}

#[derive(Debug)]
struct ActiveBreak {
    plan: AdBreakPlan,
    pod_index: i32,
    index: usize,
}

#[derive(Debug, Default)]
struct ScriptState {
    pending: VecDeque<AdBreakPlan>,
    request_failure: Option<String>,
    events: Option<Mailbox>,
    progress: Option<ContentProgressProvider>,
    active: Option<ActiveBreak>,
    breaks_played: i32,
    started: bool,
    completed: bool,
    progress_reports: usize,
    log: Vec<ScriptLogEntry>,
}

impl ScriptState {
    fn post(&self, message: impl Into<crate::mailbox::PlayerMessage>) {
        if let Some(events) = &self.events {
            events.post(message);
        }
    }

    fn begin_break(&mut self) {
        let Some(plan) = self.pending.pop_front() else {
            return;
        };
        let pod_index = match plan.offset {
            BreakOffset::Postroll => -1,
            _ => self.breaks_played,
        };
        self.breaks_played += 1;
        info!(offset = ?plan.offset, ads = plan.ads.len(), "Starting ad break");
        self.log.push(ScriptLogEntry::BreakStarted(plan.offset));
        self.post(AdEvent::ContentPauseRequested);
        self.active = Some(ActiveBreak {
            plan,
            pod_index,
            index: 0,
        });
        self.play_current();
    }

    fn play_current(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let Some(ad) = active.plan.ads.get(active.index).cloned() else {
            self.end_break();
            return;
        };
        let pod = AdPodInfo {
            pod_index: active.pod_index,
            ad_position: active.index as u32 + 1,
            total_ads: active.plan.ads.len() as u32,
            time_offset: match active.plan.offset {
                BreakOffset::Preroll => 0.0,
                BreakOffset::Midroll(ms) => ms as f64 / 1000.0,
                BreakOffset::Postroll => -1.0,
            },
        };
        self.post(AdPlayerCommand::Load { ad: ad.clone(), pod });
        self.post(AdPlayerCommand::Play(ad.clone()));
        self.post(AdEvent::Started(ad));
    }

    fn end_break(&mut self) {
        self.active = None;
        self.post(AdEvent::ContentResumeRequested);
        self.complete_if_done();
    }

    fn complete_if_done(&mut self) {
        if self.active.is_none() && self.pending.is_empty() && !self.completed {
            self.completed = true;
            self.post(AdEvent::AllAdsCompleted);
        }
    }

    /// Start the next mid-roll once content has reached its offset
    fn poll_midroll(&mut self) -> bool {
        if !self.started || self.active.is_some() {
            return false;
        }
        let Some(BreakOffset::Midroll(offset_ms)) = self.pending.front().map(|plan| plan.offset) else {
            return false;
        };
        let reached = match self.progress.as_ref().map(ContentProgressProvider::content_progress) {
            Some(ProgressUpdate::Progress { current_ms, .. }) => current_ms >= offset_ms,
            _ => false,
        };
        if reached {
            self.begin_break();
        }
        reached
    }
}

/// Ad service half owned by the player
#[derive(Debug)]
pub struct ScriptedAdService {
    state: Arc<Mutex<ScriptState>>,
    callback: Arc<ScriptedCallback>,
}

/// Handle for driving mid-rolls and inspecting the service
#[derive(Debug, Clone)]
pub struct ScriptedAdControl {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Debug)]
struct ScriptedCallback {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedAdService {
    /// Create a service playing `breaks` in timeline order
    pub fn new(mut breaks: Vec<AdBreakPlan>) -> (Self, ScriptedAdControl) {
        breaks.sort_by_key(|plan| match plan.offset {
            BreakOffset::Preroll => (0, 0),
            BreakOffset::Midroll(ms) => (1, ms),
            BreakOffset::Postroll => (2, 0),
        });
        let state = Arc::new(Mutex::new(ScriptState {
            pending: breaks.into(),
            ..ScriptState::default()
        }));
        (
            Self {
                state: state.clone(),
                callback: Arc::new(ScriptedCallback { state: state.clone() }),
            },
            ScriptedAdControl { state },
        )
    }

    /// Make the next ad request fail with `message`
    pub fn fail_requests(self, message: impl Into<String>) -> Self {
        self.state.lock().request_failure = Some(message.into());
        self
    }
}

impl AdDecisionService for ScriptedAdService {
    fn ad_player_callback(&self) -> Arc<dyn AdPlayerCallback> {
        self.callback.clone()
    }

    fn request_ads(&mut self, request: AdsRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.log.push(ScriptLogEntry::Requested(request.ad_tag_uri.clone()));
        if let Some(message) = &state.request_failure {
            return Err(Error::ad_request(message.clone()));
        }
        state.events = Some(request.events);
        state.progress = Some(request.progress);
        state.post(AdEvent::Loaded);
        Ok(())
    }

    fn start(&mut self) {
        let mut state = self.state.lock();
        state.log.push(ScriptLogEntry::Started);
        state.started = true;
        match state.pending.front().map(|plan| plan.offset) {
            Some(BreakOffset::Preroll) => state.begin_break(),
            _ => state.complete_if_done(),
        }
    }

    fn discard_ad_break(&mut self) {
        let mut state = self.state.lock();
        if state.active.take().is_some() {
            debug!("Discarding remainder of ad break");
            state.log.push(ScriptLogEntry::BreakDiscarded);
        }
        state.complete_if_done();
    }

    fn destroy(&mut self) {
        let mut state = self.state.lock();
        state.log.push(ScriptLogEntry::Destroyed);
        state.events = None;
        state.progress = None;
        state.active = None;
        state.started = false;
    }
}

impl AdPlayerCallback for ScriptedCallback {
    fn on_ad_progress(&self, _ad: &AdMediaHandle, _progress: ProgressUpdate) {
        let mut state = self.state.lock();
        state.progress_reports += 1;
        state.post(AdEvent::AdProgress);
    }

    fn on_ended(&self, ad: &AdMediaHandle) {
        let mut state = self.state.lock();
        state.log.push(ScriptLogEntry::AdEnded(ad.id.clone()));
        let Some(active) = state.active.as_mut() else {
            return;
        };
        active.index += 1;
        state.play_current();
    }

    fn on_error(&self, ad: &AdMediaHandle, error: &PipelineError) {
        let mut state = self.state.lock();
        state.log.push(ScriptLogEntry::AdFailed(ad.id.clone()));
        state.post(AdEvent::Error(AdError::playback(format!("ad {} failed: {}", ad.id, error))));
    }

    fn on_content_complete(&self) {
        let mut state = self.state.lock();
        state.log.push(ScriptLogEntry::ContentComplete);
        if !state.started {
            return;
        }
        // mid-rolls the content never reached are skipped
        while matches!(state.pending.front().map(|p| p.offset), Some(BreakOffset::Midroll(_))) {
            state.pending.pop_front();
        }
        match state.pending.front().map(|plan| plan.offset) {
            Some(BreakOffset::Postroll) if state.active.is_none() => state.begin_break(),
            _ => state.complete_if_done(),
        }
    }
}

impl ScriptedAdControl {
    /// Check content progress and start a due mid-roll; returns true if one started
    pub fn poll(&self) -> bool {
        self.state.lock().poll_midroll()
    }

    pub fn log(&self) -> Vec<ScriptLogEntry> {
        self.state.lock().log.clone()
    }

    /// Content progress as last published by the player
    pub fn content_progress(&self) -> ProgressUpdate {
        self.state
            .lock()
            .progress
            .as_ref()
            .map_or(ProgressUpdate::NotReady, ContentProgressProvider::content_progress)
    }

    pub fn progress_reports(&self) -> usize {
        self.state.lock().progress_reports
    }

    pub fn remaining_breaks(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_in_break(&self) -> bool {
        self.state.lock().active.is_some()
    }
}
