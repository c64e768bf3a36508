//! 过滤器契约与过滤器链。
//!
//! # 教案式说明
//!
//! ## 意图（Why）
//! - 横切能力（线程分派、加密、日志）以 [`Filter`] 形式插入会话的事件通路，
//!   既能观察、改写事件，也能截断事件或自行发起新事件；
//! - [`NextFilter`] 是“链路剩余部分”的显式续体，过滤器可以立即调用，也可以
//!   克隆后移交给其他线程稍后调用。
//!
//! ## 契约（What）
//! - 入站钩子默认原样转发给下一个过滤器（最终抵达 Handler）；
//! - 出站钩子默认原样转发给上一个过滤器（最终抵达传输写队列）；
//! - 拦截 `exception_caught` 的过滤器要么处理，要么继续转发。

mod chain;
mod event;
mod next;

pub use chain::FilterChain;
pub(crate) use event::SessionEvent;
pub use next::NextFilter;

use crate::buffer::ByteBuffer;
use crate::error::CoreError;
use crate::marker::Marker;
use crate::session::Session;

/// 出站写请求：待发送的缓冲区及其回执标记。
#[derive(Debug)]
pub struct WriteRequest {
    buffer: ByteBuffer,
    marker: Marker,
}

impl WriteRequest {
    pub fn new(buffer: ByteBuffer, marker: Marker) -> Self {
        Self { buffer, marker }
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    pub fn into_parts(self) -> (ByteBuffer, Marker) {
        (self.buffer, self.marker)
    }
}

/// 插入过滤器链的拦截器。
///
/// # 契约（What）
/// - 所有钩子在会话的事件串行点上被调用，同一会话不会并发进入同一过滤器；
///   不同会话可能并发进入，因此实现必须 `Send + Sync`；
/// - 不调用 `next` 即截断事件；多次调用即扇出；
/// - 钩子内部不得阻塞，耗时逻辑请借助 [`crate::filters::ExecutorFilter`]。
pub trait Filter: Send + Sync + 'static {
    fn session_opened(&self, next: NextFilter, session: &Session) {
        next.session_opened(session);
    }

    fn data_read(&self, next: NextFilter, session: &Session, buffer: ByteBuffer) {
        next.data_read(session, buffer);
    }

    fn data_written(&self, next: NextFilter, session: &Session, marker: Marker) {
        next.data_written(session, marker);
    }

    fn exception_caught(&self, next: NextFilter, session: &Session, error: CoreError) {
        next.exception_caught(session, error);
    }

    fn session_closed(&self, next: NextFilter, session: &Session) {
        next.session_closed(session);
    }

    fn filter_write(&self, next: NextFilter, session: &Session, request: WriteRequest) {
        next.filter_write(session, request);
    }

    fn filter_close(&self, next: NextFilter, session: &Session) {
        next.filter_close(session);
    }
}
