//! Trace records and their rendering.

mod formatter;
mod record;
mod reference;

pub use formatter::format_record;
pub use record::{TraceDocument, TraceEvent, TraceRecord, TraceSequence};
pub use reference::{OptReferenceParser, ReferenceParser, RenderedState};
