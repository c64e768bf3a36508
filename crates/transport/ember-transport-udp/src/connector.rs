use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use ember_core::prelude::{
    FilterChain, IoConnector, Session, SessionBuilder, SessionHandler, SessionInitializer,
    TransportKind,
};
use tracing::debug;

use crate::DatagramConfig;
use crate::channel::{ConnectedReader, ConnectedWriter, bind_socket};
use crate::error::UdpError;

/// 数据报连接器：把一个 UDP 套接字关联到固定远端，包装为会话。
///
/// # 教案式注释
///
/// ## 逻辑（How）
/// - 未指定本地地址时绑定到与远端同族的通配地址、端口 0；
/// - `connect` 只在内核登记远端，不产生任何网络交互，因此总是立即成功；
///   远端不可达通常表现为后续读取失败（ICMP 端口不可达），经 `exception_caught` 报告后会话关闭。
///
/// ## 契约（What）
/// - 每次写入发送一个数据报，每个收到的数据报产生一次 `data_read`，消息边界得以保留；
/// - 读缓冲默认 65507 字节，见 [`DatagramConfig`]。
#[derive(Default)]
pub struct DatagramConnector {
    chain: FilterChain,
    config: DatagramConfig,
}

impl DatagramConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DatagramConfig) -> Self {
        Self {
            chain: FilterChain::new(),
            config,
        }
    }

    pub fn config(&self) -> &DatagramConfig {
        &self.config
    }
}

fn wildcard_for(remote: SocketAddr) -> SocketAddr {
    let ip = match remote.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

#[async_trait]
impl IoConnector for DatagramConnector {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::Datagram
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
        let socket = bind_socket(
            local.unwrap_or_else(|| wildcard_for(remote)),
            self.config.reuse_address(),
        )?;
        socket
            .connect(remote)
            .await
            .map_err(|source| UdpError::Connect {
                addr: remote,
                source,
            })?;
        let local = socket.local_addr().map_err(UdpError::LocalAddr)?;
        debug!(%remote, %local, "udp socket associated");
        let socket = Arc::new(socket);
        let pending = SessionBuilder::new(TransportKind::Datagram, local, remote, handler)
            .chain(self.chain.duplicate())
            .config(self.config.session().clone())
            .build();
        pending.activate(
            ConnectedReader {
                socket: Arc::clone(&socket),
            },
            ConnectedWriter { socket },
            initializer.as_deref(),
        )
    }
}
