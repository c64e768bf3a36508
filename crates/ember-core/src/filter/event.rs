use std::fmt;

use crate::buffer::ByteBuffer;
use crate::error::CoreError;
use crate::marker::Marker;

/// 会话入站事件，经由会话串行点进入过滤器链。
pub(crate) enum SessionEvent {
    Opened,
    DataRead(ByteBuffer),
    DataWritten(Marker),
    Exception(CoreError),
    Closed,
}

impl SessionEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SessionEvent::Opened => "session_opened",
            SessionEvent::DataRead(_) => "data_read",
            SessionEvent::DataWritten(_) => "data_written",
            SessionEvent::Exception(_) => "exception_caught",
            SessionEvent::Closed => "session_closed",
        }
    }
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
