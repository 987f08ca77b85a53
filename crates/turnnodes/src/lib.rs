//! Built-in handler library
//!
//! A handful of generic handlers for trying workflows out locally. Real
//! deployments register their own handlers next to (or instead of) these.

mod context;
mod debug;
mod time;
mod transform;

pub use context::{SetContextNode, CONTEXT_SET};
pub use debug::{DebugNode, DEBUG_LOG};
pub use time::{DelayNode, TIME_DELAY};
pub use transform::{EchoNode, TemplateNode, TRANSFORM_ECHO, TRANSFORM_TEMPLATE};
use turnruntime::HandlerTable;

use std::sync::Arc;

/// Register all built-in handlers with a table
pub fn register_all(table: &mut HandlerTable) {
    table.register_described(DEBUG_LOG, Arc::new(DebugNode), debug::metadata());
    table.register_described(TIME_DELAY, Arc::new(DelayNode), time::metadata());
    table.register_described(TRANSFORM_ECHO, Arc::new(EchoNode), transform::echo_metadata());
    table.register_described(TRANSFORM_TEMPLATE, Arc::new(TemplateNode), transform::template_metadata());
    table.register_described(CONTEXT_SET, Arc::new(SetContextNode), context::metadata());
}

/// A fresh table holding every built-in handler
pub fn builtin_handlers() -> HandlerTable {
    let mut table = HandlerTable::new();
    register_all(&mut table);
    table
}
