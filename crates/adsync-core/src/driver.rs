//! Owner task and the handle used to talk to it

use crate::error::{Error, Result};
use crate::events::{EventSink, PlayerListener};
use crate::mailbox::{Mailbox, PlayerMessage};
use crate::player::{PlayerSnapshot, VideoPlayer};
use crate::types::{AudioMixingMode, PlayerId, Source};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Request from outside the owner task
pub enum PlayerCommand {
    SetSource(Option<Source>),
    Prepare,
    Replace(Option<Source>),
    Play,
    Pause,
    SeekTo(u64),
    SetVolume(f32),
    SetMuted(bool),
    SetPlaybackRate(f32),
    SetPreservesPitch(bool),
    SetAudioMixingMode(AudioMixingMode),
    SetStaysActiveInBackground(bool),
    SetTimeUpdateInterval(u64),
    AddListener(Arc<dyn PlayerListener>),
    RemoveListener(Arc<dyn PlayerListener>),
    SetEventSink(Option<Arc<dyn EventSink>>),
    Snapshot(oneshot::Sender<PlayerSnapshot>),
}

impl std::fmt::Debug for PlayerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerCommand::SetSource(source) => f.debug_tuple("SetSource").field(source).finish(),
            PlayerCommand::Prepare => f.write_str("Prepare"),
            PlayerCommand::Replace(source) => f.debug_tuple("Replace").field(source).finish(),
            PlayerCommand::Play => f.write_str("Play"),
            PlayerCommand::Pause => f.write_str("Pause"),
            PlayerCommand::SeekTo(ms) => f.debug_tuple("SeekTo").field(ms).finish(),
            PlayerCommand::SetVolume(v) => f.debug_tuple("SetVolume").field(v).finish(),
            PlayerCommand::SetMuted(m) => f.debug_tuple("SetMuted").field(m).finish(),
            PlayerCommand::SetPlaybackRate(r) => f.debug_tuple("SetPlaybackRate").field(r).finish(),
            PlayerCommand::SetPreservesPitch(p) => f.debug_tuple("SetPreservesPitch").field(p).finish(),
            PlayerCommand::SetAudioMixingMode(m) => f.debug_tuple("SetAudioMixingMode").field(m).finish(),
            PlayerCommand::SetStaysActiveInBackground(s) => {
                f.debug_tuple("SetStaysActiveInBackground").field(s).finish()
            }
            PlayerCommand::SetTimeUpdateInterval(ms) => f.debug_tuple("SetTimeUpdateInterval").field(ms).finish(),
            PlayerCommand::AddListener(_) => f.write_str("AddListener"),
            PlayerCommand::RemoveListener(_) => f.write_str("RemoveListener"),
            PlayerCommand::SetEventSink(sink) => f.debug_tuple("SetEventSink").field(&sink.is_some()).finish(),
            PlayerCommand::Snapshot(_) => f.write_str("Snapshot"),
        }
    }
}

/// Run `player` on its own task until it is closed
pub fn spawn(player: VideoPlayer, rx: mpsc::UnboundedReceiver<PlayerMessage>) -> PlayerHandle {
    let id = player.id();
    let mailbox = player.mailbox().clone();
    let task = tokio::spawn(run(player, rx));
    PlayerHandle {
        id,
        mailbox,
        task: Arc::new(parking_lot::Mutex::new(Some(task))),
    }
}

async fn run(mut player: VideoPlayer, mut rx: mpsc::UnboundedReceiver<PlayerMessage>) {
    info!(player_id = %player.id(), "Player task started");
    while let Some(message) = rx.recv().await {
        if player.dispatch(message).is_break() {
            break;
        }
    }
    player.close();
    debug!(player_id = %player.id(), "Player task finished");
}

/// Cloneable handle to a player running on its owner task
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    id: PlayerId,
    mailbox: Mailbox,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl PlayerHandle {
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Mailbox for pipelines and ad services feeding this player
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Queue a command for the owner task
    pub fn send(&self, command: PlayerCommand) -> Result<()> {
        if self.mailbox.post(command) {
            Ok(())
        } else {
            Err(Error::PlayerClosed(self.id.to_string()))
        }
    }

    pub fn replace(&self, source: Option<Source>) -> Result<()> {
        self.send(PlayerCommand::Replace(source))
    }

    pub fn play(&self) -> Result<()> {
        self.send(PlayerCommand::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(PlayerCommand::Pause)
    }

    pub fn seek_to(&self, position_ms: u64) -> Result<()> {
        self.send(PlayerCommand::SeekTo(position_ms))
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.send(PlayerCommand::SetVolume(volume))
    }

    pub fn set_muted(&self, muted: bool) -> Result<()> {
        self.send(PlayerCommand::SetMuted(muted))
    }

    pub fn set_playback_rate(&self, rate: f32) -> Result<()> {
        self.send(PlayerCommand::SetPlaybackRate(rate))
    }

    pub fn add_listener(&self, listener: Arc<dyn PlayerListener>) -> Result<()> {
        self.send(PlayerCommand::AddListener(listener))
    }

    pub fn set_event_sink(&self, sink: Option<Arc<dyn EventSink>>) -> Result<()> {
        self.send(PlayerCommand::SetEventSink(sink))
    }

    /// Current player state, read on the owner task
    pub async fn snapshot(&self) -> Result<PlayerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(PlayerCommand::Snapshot(tx))?;
        rx.await.map_err(|_| Error::PlayerClosed(self.id.to_string()))
    }

    /// Close the player and wait for its teardown to finish
    pub async fn close(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.post(PlayerMessage::Close(Some(tx))) {
            // an already closing player drops the sender; both outcomes mean closed
            let _ = rx.await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        Ok(())
    }
}
