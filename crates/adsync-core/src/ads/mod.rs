//! Client-side ad insertion
//!
//! An external ad-decision service (IMA-style) decides when breaks play.
//! It talks to the player through three seams:
//! - [`AdEvent`]s it posts to the player's mailbox
//! - [`AdPlayerCommand`]s asking the player to load or play an ad creative
//! - [`AdPlayerCallback`]s the player invokes as the ad plays
//!
//! The [`AdPlayerAdapter`] drives the shared pipeline while an ad occupies
//! it, and the [`AdBreakCoordinator`] pauses and restores content around
//! each break.

pub mod adapter;
pub mod coordinator;
#[cfg(feature = "simulated")]
pub mod scripted;
pub mod service;

pub use adapter::{AdPlayerAdapter, AdapterSignal};
pub use coordinator::{AdBreakCoordinator, ContentContext};
#[cfg(feature = "simulated")]
pub use scripted::{AdBreakPlan, BreakOffset, ScriptLogEntry, ScriptedAdControl, ScriptedAdService};
pub use service::{
    AdDecisionService, AdError, AdErrorKind, AdEvent, AdPlayerCallback, AdPlayerCommand,
    AdsRequest, ContentProgressProvider,
};
