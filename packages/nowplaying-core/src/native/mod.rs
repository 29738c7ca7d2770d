//! OS-native now-playing backend.

mod bridge;
mod handler;

pub use bridge::{ChannelBridge, NativeCommand, NativeNowPlaying, NowPlayingBridge};
pub use handler::{map_now_playing, NativeHandler};
