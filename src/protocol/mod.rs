//! V8 debugger protocol: message envelopes, framing and the TCP client.

mod backtrace;
mod client;
mod message;

pub use backtrace::{decode_backtrace, Backtrace};
pub use client::{read_frame, write_frame, Debugger, Frame, TcpDebugger};
pub use message::{BreakEvent, DebuggerEvent, Event, Request, Response, V8Message};

use crate::config::InspectorConfig;
use crate::error::Result;

/// Open the debugger port named by `config`.
pub fn attach(config: &InspectorConfig) -> Result<TcpDebugger> {
    TcpDebugger::connect(
        &config.host,
        config.port,
        config.connect_attempts,
        config.connect_interval(),
        config.request_timeout(),
    )
}
