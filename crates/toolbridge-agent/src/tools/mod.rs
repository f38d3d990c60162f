//! Tool registry, executor and result types.

pub mod executor;
pub mod registry;
pub mod result;

pub use executor::{execute, execute_named};
pub use registry::{
    AuthContext, ToolDescriptor, ToolHandler, ToolRegistry, ToolRegistryBuilder, handler_fn,
};
pub use result::{StickyFields, ToolContent, ToolResult};
