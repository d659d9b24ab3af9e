pub mod emitter;
pub mod lifecycle;
pub mod sse;

pub use emitter::StreamEmitter;
pub use lifecycle::{ExecutionStatus, ToolExecution, ToolLifecycle};
pub use sse::SseEvent;
