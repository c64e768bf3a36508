#![doc = r#"
# ember-transport-tcp

## 设计动机（Why）
- 为 `ember-core` 的会话模型提供字节流传输：连接器与接收器交付的会话与内存、UDP
  传输遵循同一份事件顺序、写完成与关闭契约；
- 套接字选项（`SO_LINGER`、`TCP_NODELAY`、`SO_REUSEADDR`）集中在 [`TcpSocketConfig`]，
  避免调用方直接操作 `socket2`。

## 核心契约（What）
- [`TcpConnector`]：`connect(remote, local?, handler, initializer?)`，指定本地地址时在绑定前开启地址复用；
- [`TcpAcceptor`]：`bind`/`unbind`/`bound_addresses`，每个接入连接对应一个会话；
- 错误码遵循 `ember.transport.tcp.<操作>_failed`，分类沿用 `ember_core::error::categorize_io_error`。

## 实现策略（How）
- 连接建立后以 `into_split` 拆成独立读写半部，分别交给会话的读任务与写任务，实现真正的全双工；
- 关闭时写任务先发完已入队的数据，再 `shutdown` 写方向发送 FIN。

## 风险与考量（Trade-offs）
- 读缓冲大小由 `SessionConfig::read_buffer_size` 决定，过小会把一次对端写入拆成多个 `data_read`；
  字节流本就不保留消息边界，上层需自行分帧。
"#]
#![cfg_attr(
    not(feature = "runtime-tokio"),
    doc = r#"## 功能开关：`runtime-tokio`

默认启用 Tokio 实现；禁用默认特性时 crate 仅保留配置类型，不会链接实际传输代码。
"#
)]

mod config;

#[cfg(feature = "runtime-tokio")]
mod acceptor;
#[cfg(feature = "runtime-tokio")]
mod channel;
#[cfg(feature = "runtime-tokio")]
mod connector;
#[cfg(feature = "runtime-tokio")]
mod error;

pub use config::{DEFAULT_BACKLOG, TcpConfig, TcpSocketConfig};

#[cfg(feature = "runtime-tokio")]
pub use acceptor::TcpAcceptor;
#[cfg(feature = "runtime-tokio")]
pub use connector::TcpConnector;
