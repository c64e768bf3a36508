use tracing::warn;

use crate::buffer::ByteBuffer;
use crate::error::CoreError;
use crate::marker::Marker;
use crate::session::Session;

/// 应用层事件接收者，位于入站链的末端。
///
/// # 契约（What）
/// - 同一会话的回调按单一全序依次调用，不会并发；
/// - `data_read` 的缓冲区处于读模式，所有权移交给 Handler；
/// - `data_written` 恰好对每次完成的写调用一次，标记与提交时一致；
/// - 默认实现均为空操作，`exception_caught` 默认记录 `warn` 日志，不会 panic。
pub trait SessionHandler: Send + Sync + 'static {
    fn session_opened(&self, _session: &Session) {}

    fn data_read(&self, _session: &Session, _buffer: ByteBuffer) {}

    fn data_written(&self, _session: &Session, _marker: Marker) {}

    fn session_closed(&self, _session: &Session) {}

    fn exception_caught(&self, session: &Session, error: CoreError) {
        warn!(
            session = %session.id(),
            remote = %session.remote_addr(),
            code = error.code(),
            error = %error,
            "unhandled session exception"
        );
    }
}
