//! Owner-context message delivery
//!
//! Every input to a player (pipeline callbacks, ad service events, clock
//! ticks, commands) is posted to its mailbox and handled on the single task
//! that owns the player.

use crate::ads::{AdEvent, AdPlayerCommand};
use crate::driver::PlayerCommand;
use crate::pipeline::PipelineReport;
use crate::types::PlayerId;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// OS lifecycle notification fanned out by the player registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Background,
    Foreground,
}

/// Message handled on the player's owner task
#[derive(Debug)]
pub enum PlayerMessage {
    Pipeline(PipelineReport),
    Ad(AdEvent),
    AdPlayer(AdPlayerCommand),
    AdProgressTick,
    TimeUpdateTick,
    Lifecycle(AppLifecycle),
    Command(PlayerCommand),
    /// Tear the player down; the sender is notified once teardown finished
    Close(Option<oneshot::Sender<()>>),
}

impl From<PipelineReport> for PlayerMessage {
    fn from(report: PipelineReport) -> Self {
        PlayerMessage::Pipeline(report)
    }
}

impl From<AdEvent> for PlayerMessage {
    fn from(event: AdEvent) -> Self {
        PlayerMessage::Ad(event)
    }
}

impl From<AdPlayerCommand> for PlayerMessage {
    fn from(command: AdPlayerCommand) -> Self {
        PlayerMessage::AdPlayer(command)
    }
}

impl From<PlayerCommand> for PlayerMessage {
    fn from(command: PlayerCommand) -> Self {
        PlayerMessage::Command(command)
    }
}

/// Sending half of a player's message queue
#[derive(Debug, Clone)]
pub struct Mailbox {
    player_id: PlayerId,
    tx: mpsc::UnboundedSender<PlayerMessage>,
}

impl Mailbox {
    /// Create a mailbox and the receiver the owner task drains
    pub fn channel(player_id: PlayerId) -> (Self, mpsc::UnboundedReceiver<PlayerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { player_id, tx }, rx)
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Queue a message; returns false once the owner task is gone
    pub fn post(&self, message: impl Into<PlayerMessage>) -> bool {
        match self.tx.send(message.into()) {
            Ok(()) => true,
            Err(err) => {
                trace!(player_id = %self.player_id, message = ?err.0, "Mailbox closed, message dropped");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
