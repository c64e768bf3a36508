use std::fmt;
use std::sync::Arc;

use super::chain::{ChainSnapshot, FilterEntry};
use super::{SessionEvent, WriteRequest};
use crate::buffer::ByteBuffer;
use crate::error::CoreError;
use crate::marker::Marker;
use crate::session::Session;

/// 过滤器链剩余部分的续体。
///
/// # 教案式说明
/// - **意图（Why）**：过滤器需要把事件交给“下一个”处理者，而下一个是谁取决于事件方向：
///   入站朝链尾（Handler）前进，出站朝链首（传输层）前进。`NextFilter` 把两种方向都封装起来；
/// - **逻辑（How）**：持有事件派发时取到的链快照与当前过滤器下标，入站调用定位到 `index + 1`，
///   出站调用定位到 `index - 1`，越界即抵达终端；
/// - **契约（What）**：`NextFilter` 可克隆、可跨线程移动，调用时始终使用派发时的快照，
///   链的后续变更不影响它。
#[derive(Clone)]
pub struct NextFilter {
    snapshot: ChainSnapshot,
    index: usize,
}

impl NextFilter {
    pub fn session_opened(&self, session: &Session) {
        self.fire(session, SessionEvent::Opened);
    }

    pub fn data_read(&self, session: &Session, buffer: ByteBuffer) {
        self.fire(session, SessionEvent::DataRead(buffer));
    }

    pub fn data_written(&self, session: &Session, marker: Marker) {
        self.fire(session, SessionEvent::DataWritten(marker));
    }

    pub fn exception_caught(&self, session: &Session, error: CoreError) {
        self.fire(session, SessionEvent::Exception(error));
    }

    pub fn session_closed(&self, session: &Session) {
        self.fire(session, SessionEvent::Closed);
    }

    pub fn filter_write(&self, session: &Session, request: WriteRequest) {
        invoke_outbound(
            &self.snapshot,
            self.index.checked_sub(1),
            session,
            Outbound::Write(request),
        );
    }

    pub fn filter_close(&self, session: &Session) {
        invoke_outbound(
            &self.snapshot,
            self.index.checked_sub(1),
            session,
            Outbound::Close,
        );
    }

    pub(crate) fn fire(&self, session: &Session, event: SessionEvent) {
        invoke_inbound(&self.snapshot, self.index + 1, session, event);
    }
}

impl fmt::Debug for NextFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextFilter")
            .field("index", &self.index)
            .field("chain_len", &self.snapshot.len())
            .finish()
    }
}

pub(crate) enum Outbound {
    Write(WriteRequest),
    Close,
}

/// 把入站事件交给快照中下标为 `target` 的过滤器；越过链尾则交给 Handler。
pub(crate) fn invoke_inbound(
    snapshot: &ChainSnapshot,
    target: usize,
    session: &Session,
    event: SessionEvent,
) {
    let Some(entry) = snapshot.get(target) else {
        session.deliver_to_handler(event);
        return;
    };
    let next = NextFilter {
        snapshot: Arc::clone(snapshot),
        index: target,
    };
    let filter = entry.filter();
    match event {
        SessionEvent::Opened => filter.session_opened(next, session),
        SessionEvent::DataRead(buffer) => filter.data_read(next, session, buffer),
        SessionEvent::DataWritten(marker) => filter.data_written(next, session, marker),
        SessionEvent::Exception(error) => filter.exception_caught(next, session, error),
        SessionEvent::Closed => filter.session_closed(next, session),
    }
}

/// 把出站操作交给快照中下标为 `target` 的过滤器；`None` 表示已越过链首，交给传输写队列。
pub(crate) fn invoke_outbound(
    snapshot: &ChainSnapshot,
    target: Option<usize>,
    session: &Session,
    op: Outbound,
) {
    let entry: Option<(usize, &Arc<FilterEntry>)> =
        target.and_then(|index| snapshot.get(index).map(|entry| (index, entry)));
    let Some((index, entry)) = entry else {
        match op {
            Outbound::Write(request) => session.enqueue_write(request),
            Outbound::Close => session.enqueue_close(),
        }
        return;
    };
    let next = NextFilter {
        snapshot: Arc::clone(snapshot),
        index,
    };
    match op {
        Outbound::Write(request) => entry.filter().filter_write(next, session, request),
        Outbound::Close => entry.filter().filter_close(next, session),
    }
}
