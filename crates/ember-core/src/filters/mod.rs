//! 框架内置过滤器。
//!
//! - [`ExecutorFilter`]：把入站事件转移到有界工作池，保持会话内顺序；
//! - [`SecurityFilter`]：基于可插拔 [`SecurityEngine`] 的传输加密层；
//! - [`LoggingFilter`]：以 `tracing` 记录事件。

mod executor;
mod logging;
mod security;

pub use executor::{DEFAULT_MAX_WORKERS, ExecutorConfig, ExecutorFilter};
pub use logging::LoggingFilter;
pub use security::{SecurityEngine, SecurityEngineFactory, SecurityFilter};
