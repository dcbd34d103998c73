//! Communication between the policy engine and a user interface.
//!
//! - `protocol`: message types in both directions
//! - `channel`: bounded channel pair connecting the two sides
//! - `console`: line-oriented terminal UI

pub mod channel;
pub mod console;
pub mod protocol;

pub use channel::{EngineChannels, UiChannels, create_channel_pair};
pub use console::{ConsoleError, parse_command, render, run_console};
pub use protocol::{EngineToUi, UiToEngine};
