use super::record::{TraceEvent, TraceRecord};
use super::reference::ReferenceParser;
use crate::debugger::{ResolvedStore, StackFrame, VariableTable};

/// Assemble the record for one break.
///
/// `innermost` supplies the function name and line even when it did not
/// contribute any bindings.
pub fn format_record<P: ReferenceParser + ?Sized>(
    parser: &P,
    event: TraceEvent,
    innermost: &StackFrame,
    variables: &VariableTable,
    store: &ResolvedStore,
) -> TraceRecord {
    let rendered = parser.render(store, &variables.visible());
    TraceRecord {
        event,
        func_name: innermost.func_name.clone(),
        line: innermost.line,
        variables: rendered.variable_dict,
        heap: rendered.heap,
    }
}
