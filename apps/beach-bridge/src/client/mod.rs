pub mod api;
pub mod bridge;
pub mod buffer_guard;
pub mod directives;
pub mod modes;
pub mod renderer;
pub mod resize;
pub mod router;
pub mod status;

pub use bridge::{BridgeError, BridgeExit, BridgeInput, BridgeRuntime, BridgeServices};
