//! Records a line-by-line execution trace of a script running under a V8
//! debugger: function, line, visible variables and the heap they reach.

pub mod config;
pub mod debugger;
pub mod error;
pub mod protocol;
pub mod trace;

pub use config::InspectorConfig;
pub use error::{Error, Result};

use protocol::Debugger;
use trace::{ReferenceParser, TraceSequence};

/// Run a session over an established debugger connection until it closes.
pub fn trace_session<D: Debugger, P: ReferenceParser>(
    debugger: D,
    parser: P,
    config: &InspectorConfig,
) -> TraceSequence {
    debugger::TraceSession::new(debugger, parser, config).run()
}
