use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ember_core::prelude::{
    FilterChain, IoConnector, Session, SessionHandler, SessionInitializer, TransportKind,
};
use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

use crate::TcpConfig;
use crate::channel::open_session;
use crate::error::{self, map_io_error};

/// 主动发起 TCP 连接的连接器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 以 [`IoConnector`] 契约交付 TCP 会话，调用方无需接触 Tokio 具体类型。
///
/// ## 逻辑 (How)
/// - 未指定本地地址时直接 `TcpStream::connect`，由系统分配临时端口；
/// - 指定本地地址时先创建同族 `TcpSocket`，开启 `SO_REUSEADDR` 后绑定再连接，
///   刚释放、仍处于 `TIME_WAIT` 的本地端口因此可以复用；
/// - 连接建立后应用 [`TcpSocketConfig`](crate::TcpSocketConfig)，复制模板链并激活会话。
///
/// ## 契约 (What)
/// - 连接、绑定失败分别返回 `ember.transport.tcp.connect_failed` /
///   `ember.transport.tcp.bind_failed`；
/// - 初始化器失败返回 `ember.connector.initialization_failed`，连接随即释放。
///
/// ## 注意事项 (Trade-offs)
/// - 连接过程没有内建超时，需要时由调用方以 `tokio::time::timeout` 包裹并在超时后丢弃 Future。
#[derive(Default)]
pub struct TcpConnector {
    chain: FilterChain,
    config: TcpConfig,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self {
            chain: FilterChain::new(),
            config,
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    async fn establish(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
    ) -> ember_core::Result<TcpStream> {
        let Some(local) = local else {
            return TcpStream::connect(remote)
                .await
                .map_err(|err| map_io_error(error::CONNECT, err));
        };
        let socket = match local {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .set_reuseaddr(true)
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        socket
            .bind(local)
            .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .connect(remote)
            .await
            .map_err(|err| map_io_error(error::CONNECT, err))
    }
}

#[async_trait]
impl IoConnector for TcpConnector {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn filter_chain(&self) -> &FilterChain {
        &self.chain
    }

    async fn connect(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        handler: Arc<dyn SessionHandler>,
        initializer: Option<Arc<dyn SessionInitializer>>,
    ) -> ember_core::Result<Session> {
        let stream = self.establish(remote, local).await?;
        debug!(%remote, local = ?local, "tcp connection established");
        open_session(
            stream,
            remote,
            &self.chain,
            &self.config,
            handler,
            initializer.as_deref(),
        )
    }
}
