//! The trace-extraction engine: frame filtering, reference resolution and
//! the session state machine that drives them.

mod frames;
mod resolver;
mod session;
mod stepping;

pub use frames::{
    is_user_frame, is_user_script, BacktraceExtractor, Binding, BindingOrigin, Handle,
    PendingHandles, SourceDescriptor, StackFrame, VariableTable,
};
pub use resolver::{resolve, ResolvedStore};
pub use session::{SessionState, TraceSession};
pub use stepping::StepAction;
