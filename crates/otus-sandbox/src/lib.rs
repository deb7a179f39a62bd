//! Named-handle sandbox manager and per-sandbox terminal multiplexer
//! (§4.6 sandbox manager, §4.7 terminal multiplexer).

mod error;
mod manager;
mod terminal;

pub use error::{SandboxError, SandboxResult};
pub use manager::{Sandbox, SandboxBootParams, SandboxInfo, SandboxManager};
pub use terminal::{
    TerminalMultiplexer, TerminalRead, TerminalSummary, DEFAULT_READ_LINES,
};
