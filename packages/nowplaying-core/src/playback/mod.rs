//! Playback domain: data model, handler contract, and the manager.

mod handler;
pub mod library;
mod manager;
mod types;

pub use handler::{
    HandlerConfig, HandlerEvent, HandlerEvents, HandlerFactory, HandlerKind, HandlerState,
    PlaybackHandler,
};
pub use manager::{PlaybackManager, ReconnectPolicy};
pub use types::{
    clamp_volume, Capability, CapabilitySet, CommandResult, Device, Identified, LibraryItem,
    Page, PageRequest, PlaybackContext, PlaybackData, RepeatMode, TrackDuration, TrackInfo,
    TrackItem,
};
