use tracing::Level;

use crate::buffer::ByteBuffer;
use crate::error::CoreError;
use crate::filter::{Filter, NextFilter, WriteRequest};
use crate::marker::Marker;
use crate::session::Session;

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        if $level == Level::ERROR {
            tracing::error!($($arg)+)
        } else if $level == Level::WARN {
            tracing::warn!($($arg)+)
        } else if $level == Level::INFO {
            tracing::info!($($arg)+)
        } else if $level == Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

/// 以 `tracing` 记录经过的每个事件，然后原样转发。
///
/// 异常事件固定以 `warn` 记录，其余事件使用构造时指定的级别。
#[derive(Clone, Debug)]
pub struct LoggingFilter {
    level: Level,
}

impl Default for LoggingFilter {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl LoggingFilter {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Filter for LoggingFilter {
    fn session_opened(&self, next: NextFilter, session: &Session) {
        log_at!(
            self.level,
            session = %session.id(),
            local = %session.local_addr(),
            remote = %session.remote_addr(),
            "OPENED"
        );
        next.session_opened(session);
    }

    fn data_read(&self, next: NextFilter, session: &Session, buffer: ByteBuffer) {
        log_at!(self.level, session = %session.id(), bytes = buffer.remaining(), "RECEIVED");
        next.data_read(session, buffer);
    }

    fn data_written(&self, next: NextFilter, session: &Session, marker: Marker) {
        log_at!(self.level, session = %session.id(), marker = ?marker, "SENT");
        next.data_written(session, marker);
    }

    fn exception_caught(&self, next: NextFilter, session: &Session, error: CoreError) {
        tracing::warn!(
            session = %session.id(),
            code = error.code(),
            error = %error,
            "EXCEPTION"
        );
        next.exception_caught(session, error);
    }

    fn session_closed(&self, next: NextFilter, session: &Session) {
        log_at!(self.level, session = %session.id(), "CLOSED");
        next.session_closed(session);
    }

    fn filter_write(&self, next: NextFilter, session: &Session, request: WriteRequest) {
        log_at!(
            self.level,
            session = %session.id(),
            bytes = request.buffer().remaining(),
            "WRITE"
        );
        next.filter_write(session, request);
    }

    fn filter_close(&self, next: NextFilter, session: &Session) {
        log_at!(self.level, session = %session.id(), "CLOSE");
        next.filter_close(session);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::service::IoConnector;
    use crate::test_stubs::{MemoryConnector, RecordingHandler};

    #[tokio::test]
    #[traced_test]
    async fn every_event_is_logged_and_forwarded() {
        let connector = MemoryConnector::loopback();
        connector
            .filter_chain()
            .add_last("logger", Arc::new(LoggingFilter::new(Level::DEBUG)))
            .expect("插入日志过滤器");
        let handler = RecordingHandler::new();
        let session = connector
            .connect("127.0.0.1:7".parse().expect("合法地址"), None, handler.clone(), None)
            .await
            .expect("内存连接");

        session
            .write(ByteBuffer::copy_from_slice(b"ping"), Marker::new(1u8))
            .expect("写入");
        assert!(
            handler
                .wait_for(Duration::from_secs(5), |events| events.len() >= 3)
                .await
        );
        session.close();
        assert!(handler.wait_closed(Duration::from_secs(5)).await);

        assert_eq!(handler.received(), b"ping".to_vec());
        for message in ["OPENED", "WRITE", "SENT", "RECEIVED", "CLOSE", "CLOSED"] {
            assert!(logs_contain(message), "缺少 {message} 日志");
        }
    }
}
