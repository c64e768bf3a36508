//! 常用类型的一站式导入：`use ember_core::prelude::*;`

pub use crate::buffer::{BufferError, ByteBuffer};
pub use crate::error::{CoreError, ErrorCategory, Result, codes};
pub use crate::filter::{Filter, FilterChain, NextFilter, WriteRequest};
pub use crate::filters::{
    ExecutorConfig, ExecutorFilter, LoggingFilter, SecurityEngine, SecurityEngineFactory,
    SecurityFilter,
};
pub use crate::handler::SessionHandler;
pub use crate::io::{TransportReader, TransportWriter};
pub use crate::marker::Marker;
pub use crate::service::{IoAcceptor, IoConnector, SessionInitializer, TransportKind};
pub use crate::session::{
    PendingSession, Session, SessionBuilder, SessionConfig, SessionId, SessionState,
    SessionStats,
};
