#![deny(unsafe_code)]
#![allow(clippy::result_large_err)]
#![doc = r#"
# ember-core

## 设计动机（Why）
- **定位**：提供与具体传输无关的会话抽象，流式（TCP）与数据报（UDP）传输
  对上层呈现同一套 [`Session`]/[`SessionHandler`] 契约；
- **架构角色**：传输 crate 只负责把字节搬进搬出，事件顺序、写完成回执、
  过滤器链与会话生命周期全部收敛在本 crate；
- **扩展点**：线程分派、传输加密、日志等横切能力以 [`Filter`] 的形式挂入
  [`FilterChain`]，无需改动传输实现。

## 核心契约（What）
- 入站事件（`session_opened`/`data_read`/`data_written`/`exception_caught`/
  `session_closed`）按链表正序经过过滤器后抵达 Handler；
- 出站操作（`filter_write`/`filter_close`）按逆序经过过滤器后抵达传输层；
- 同一会话的事件存在单一全序，任意两个事件不会并发执行；
- 第 N 个写完成事件携带第 N 次 `write` 的 [`Marker`]。

## 实现策略（How）
- 过滤器链以 `arc-swap` 维护写时复制快照，事件派发时取快照，变更不会回溯
  影响在途事件；
- 每个会话持有一个“单活跃排空者”事件队列，传输读任务、写任务与应用线程
  提交的事件都经由它串行投递；
- 写请求进入 Tokio 无界通道，由会话专属写任务按序发送并回报完成。

## 风险与考量（Trade-offs）
- 事件回调是同步函数，耗时逻辑应通过 [`filters::ExecutorFilter`] 转移到
  工作池，否则会拖慢该会话所在的读任务；
- 传输失败后仍在队列中的写请求被丢弃且不产生完成事件，失败本身通过
  `exception_caught` 报告一次。
"#]

pub mod buffer;
pub mod error;
pub mod filter;
pub mod filters;
pub mod handler;
pub mod io;
pub mod marker;
pub mod port;
pub mod prelude;
pub mod service;
pub mod session;
/// 测试桩命名空间：内存传输、录制 Handler 与回显 Handler。
///
/// 传输 crate 的集成测试与本 crate 的契约测试共用这些桩，
/// 契约演进时只需在此处同步更新。
pub mod test_stubs;

pub use async_trait::async_trait;
pub use buffer::{BufferError, ByteBuffer};
pub use error::{CoreError, ErrorCategory, Result};
pub use filter::{Filter, FilterChain, NextFilter, WriteRequest};
pub use handler::SessionHandler;
pub use marker::Marker;
pub use service::{IoAcceptor, IoConnector, SessionInitializer, TransportKind};
pub use session::{Session, SessionConfig, SessionId, SessionState, SessionStats};
