#![doc = r#"
# ember-transport-udp

## 模块使命（Why）
- 为 `ember-core` 的会话模型提供数据报传输：连接器、接收器交付的会话与 TCP 传输遵循同一份
  事件顺序、写完成与关闭契约，应用代码无需区分底层传输。

## 核心契约（What）
- [`DatagramConnector`]：把 UDP 套接字关联到固定远端，一个套接字对应一个会话；
- [`DatagramAcceptor`]：在一个监听套接字上按远端地址分发报文，每个远端一个会话；
- 每次写入发送一个数据报，每个收到的数据报产生一次 `data_read`，消息边界得以保留；
- 错误以 [`UdpError`] 描述，转换为 `CoreError` 时携带 `ember.transport.udp.<操作>_failed` 错误码。

## 实现策略（How）
- 套接字经 `socket2` 创建，以便在绑定前设置 `SO_REUSEADDR`，再交给 Tokio `UdpSocket`；
- 接收器的分发任务独占 `recv_from`，各会话的读任务从各自的通道取报文，写任务共享监听套接字 `send_to`。

## 风险与考量（Trade-offs）
- UDP 不保证送达与顺序：写完成只表示报文已交给内核；
- 数据报会话的 `close` 不产生任何网络交互，对端无从感知。
"#]
#![cfg_attr(
    not(feature = "runtime-tokio"),
    doc = r#"## 功能开关：`runtime-tokio`

默认启用 Tokio 实现；禁用默认特性时 crate 仅保留配置与错误类型。
"#
)]

mod config;
mod error;

#[cfg(feature = "runtime-tokio")]
mod acceptor;
#[cfg(feature = "runtime-tokio")]
mod channel;
#[cfg(feature = "runtime-tokio")]
mod connector;

pub use config::DatagramConfig;
pub use error::UdpError;

#[cfg(feature = "runtime-tokio")]
pub use acceptor::DatagramAcceptor;
#[cfg(feature = "runtime-tokio")]
pub use connector::DatagramConnector;
