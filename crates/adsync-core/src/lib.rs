//! Adsync Core - Playback and ad-break coordination
//!
//! This crate provides the platform-agnostic core of a video player with
//! client-side ad insertion:
//! - Playback status derived from raw pipeline state
//! - A video ad surface driving the shared pipeline for ads
//! - Content pause and resume around ad breaks
//! - Event emission to native listeners and one external sink
//! - Periodic ad progress and time updates
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Adsync Core                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │  Ad Service  │  │   Platform   │  │   Progress   │           │
//! │  │  (IMA-style) │  │   Pipeline   │  │    Clocks    │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └────────── Mailbox (owner task) ───┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │   Video     │                              │
//! │                    │   Player    │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │  Ad Player   │  │   Status    │  │    Event     │            │
//! │  │   Adapter    │  │   Machine   │  │     Bus      │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! │        Ad Break Coordinator                                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod pipeline;
pub mod mailbox;
pub mod clock;
pub mod status;
pub mod events;
pub mod ads;
pub mod player;
pub mod driver;
pub mod registry;

pub use error::{Error, Result};
pub use types::*;
pub use config::PlayerConfig;
pub use pipeline::{PlaybackPipeline, PipelineError, PipelineErrorKind, PipelineEvent, PipelineReport, RawPlayerState};
pub use mailbox::{AppLifecycle, Mailbox, PlayerMessage};
pub use clock::ProgressClock;
pub use status::PlaybackStatusMachine;
pub use events::{ChannelSink, EventBus, EventSink, ExternalEvent, PlayerEvent, PlayerListener};
pub use ads::{AdBreakCoordinator, AdDecisionService, AdEvent, AdPlayerAdapter, AdPlayerCallback, AdPlayerCommand};
pub use player::{PlayerBuilder, PlayerSnapshot, VideoPlayer};
pub use driver::{PlayerCommand, PlayerHandle};
pub use registry::PlayerRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
pub fn init() {
    tracing::info!(version = VERSION, "Adsync Core initialized");
}
