//! 连接器、接收器与会话初始化器契约。

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::FilterChain;
use crate::handler::SessionHandler;
use crate::session::Session;

/// 底层传输类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// 字节流，不保留消息边界。
    Stream,
    /// 数据报，每个数据报对应一次 `data_read`。
    Datagram,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stream => f.write_str("stream"),
            TransportKind::Datagram => f.write_str("datagram"),
        }
    }
}

/// 会话初始化器：在任何事件抵达 Handler 之前恰好执行一次。
///
/// 典型用途是向会话自己的链插入过滤器、设置会话属性。返回错误时会话不会被建立，
/// `connect` 以 `ember.connector.initialization_failed` 失败，且不会产生任何事件。
pub trait SessionInitializer: Send + Sync {
    fn initialize_session(&self, session: &Session) -> Result<()>;
}

impl<F> SessionInitializer for F
where
    F: Fn(&Session) -> Result<()> + Send + Sync,
{
    fn initialize_session(&self, session: &Session) -> Result<()> {
        self(session)
    }
}

/// 主动建连方。
///
/// # 契约（What）
/// - `local` 为 `None` 时由系统分配临时端口；
/// - 每个新会话复制 [`filter_chain`](Self::filter_chain) 作为自己的链；
/// - 返回的会话已处于 `Open`，`session_opened` 已进入派发；
/// - 取消连接即丢弃返回的 Future。
#[async_trait]
pub trait IoConnector: Send + Sync {
    fn transport_kind(&self) -> TransportKind;

    /// 新会话的模板链。
    fn filter_chain(&self) -> &FilterChain;

    async fn connect(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        handler: Arc<dyn SessionHandler>,
        initializer: Option<Arc<dyn SessionInitializer>>,
    ) -> Result<Session>;
}

/// 被动接收方。
///
/// 流式接收器为每个接入连接创建一个会话，`unbind` 只停止接收新连接，已建立的会话不受影响；
/// 数据报接收器按远端地址区分会话，这些会话依附于绑定的套接字，随 `unbind` 一并结束。
#[async_trait]
pub trait IoAcceptor: Send + Sync {
    fn transport_kind(&self) -> TransportKind;

    /// 新会话的模板链。
    fn filter_chain(&self) -> &FilterChain;

    /// 绑定地址并开始接收，返回实际绑定的地址（端口为 0 时由系统分配）。
    async fn bind(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn SessionHandler>,
        initializer: Option<Arc<dyn SessionInitializer>>,
    ) -> Result<SocketAddr>;

    async fn unbind(&self, addr: SocketAddr) -> Result<()>;

    fn bound_addresses(&self) -> Vec<SocketAddr>;
}
