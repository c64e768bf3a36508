use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ember_core::prelude::{
    FilterChain, IoAcceptor, SessionBuilder, SessionHandler, SessionId, SessionInitializer,
    TransportKind,
};
use tokio::net::UdpSocket;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::DatagramConfig;
use crate::channel::{PeerReader, PeerWriter, bind_socket};
use crate::error::UdpError;

/// 接收失败后的退避时长。
const RECEIVE_BACKOFF: Duration = Duration::from_millis(10);

/// 对端地址到其会话读通道的映射；记录会话标识，清理时只移除自己登记的条目。
type PeerTable = DashMap<SocketAddr, (SessionId, mpsc::UnboundedSender<Vec<u8>>)>;

struct Binding {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

/// 数据报接收器：按远端地址把一个监听套接字上的报文分发到各自的会话。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - UDP 没有连接的概念，但应用仍希望以会话为单位处理“同一对端”的报文，
///   并与 TCP 共享 Handler、过滤器与初始化器。
///
/// ## 逻辑（How）
/// - 每个绑定地址一个分发任务，循环 `recv_from`；
/// - 首次见到的远端地址创建新会话（复制模板链、运行初始化器），之后该远端的报文经通道送入
///   会话的读任务；回复经共享套接字 `send_to` 发往该远端；
/// - 会话进入 `Closed` 后从对端表中移除，同一远端的下一个报文会创建新会话；
/// - `unbind` 停止分发任务并清空对端表，各会话的读通道随之关闭，会话依次结束。
///
/// ## 契约（What）
/// - 每个数据报恰好产生一次 `data_read`，消息边界得以保留；
/// - 初始化器拒绝的远端不会产生事件，触发它的报文被丢弃。
///
/// ## 风险与考量（Trade-offs）
/// - 对端表没有空闲超时，长期不活跃的对端需由应用自行 `close`。
#[derive(Default)]
pub struct DatagramAcceptor {
    chain: FilterChain,
    config: DatagramConfig,
    bindings: DashMap<SocketAddr, Binding>,
}

impl DatagramAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DatagramConfig) -> Self {
        Self {
            chain: FilterChain::new(),
            config,
            bindings: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DatagramConfig {
        &self.config
    }
}

struct Dispatcher {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    peers: Arc<PeerTable>,
    chain: FilterChain,
    config: DatagramConfig,
    handler: Arc<dyn SessionHandler>,
    initializer: Option<Arc<dyn SessionInitializer>>,
}

impl Dispatcher {
    async fn run(self, stop: Arc<Notify>) {
        let mut scratch = vec![0u8; self.config.session().read_buffer_size()];
        loop {
            let received = tokio::select! {
                biased;
                _ = stop.notified() => break,
                received = self.socket.recv_from(&mut scratch) => received,
            };
            match received {
                Ok((count, peer)) => self.route(peer, scratch[..count].to_vec()),
                Err(err) => {
                    let err: ember_core::CoreError = UdpError::Receive(err).into();
                    warn!(local = %self.local, code = err.code(), error = %err, "udp receive failed");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }
        }
        let peers = self.peers.len();
        self.peers.clear();
        debug!(local = %self.local, peers, "udp dispatcher stopped");
    }

    fn route(&self, peer: SocketAddr, datagram: Vec<u8>) {
        let datagram = match self.peers.get(&peer) {
            Some(entry) => match entry.1.send(datagram) {
                Ok(()) => return,
                // 会话已结束但清理尚未执行，视为新对端
                Err(mpsc::error::SendError(datagram)) => datagram,
            },
            None => datagram,
        };
        self.peers.remove(&peer);
        self.open(peer, datagram);
    }

    fn open(&self, peer: SocketAddr, datagram: Vec<u8>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending =
            SessionBuilder::new(TransportKind::Datagram, self.local, peer, Arc::clone(&self.handler))
                .chain(self.chain.duplicate())
                .config(self.config.session().clone())
                .build();
        let reader = PeerReader {
            datagrams: receiver,
        };
        let writer = PeerWriter {
            socket: Arc::clone(&self.socket),
            peer,
        };
        let session = match pending.activate(reader, writer, self.initializer.as_deref()) {
            Ok(session) => session,
            Err(err) => {
                warn!(%peer, code = err.code(), error = %err, "udp session rejected");
                return;
            }
        };
        debug!(session = %session.id(), %peer, "udp session created");
        // 读任务已退出时报文随接收端一起丢弃
        let _ = sender.send(datagram);
        self.peers.insert(peer, (session.id(), sender));

        let peers = Arc::clone(&self.peers);
        tokio::spawn(async move {
            session.closed().await;
            peers.remove_if(&peer, |_, (owner, _)| *owner == session.id());
        });
    }
}

#[async_trait]
impl IoAcceptor for DatagramAcceptor {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn filter_chain(&self) -> &FilterChain {
        &self.chain
    }

    async fn bind(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn SessionHandler>,
        initializer: Option<Arc<dyn SessionInitializer>>,
    ) -> ember_core::Result<SocketAddr> {
        let socket = bind_socket(addr, self.config.reuse_address())?;
        let local = socket.local_addr().map_err(UdpError::LocalAddr)?;
        let stop = Arc::new(Notify::new());
        let dispatcher = Dispatcher {
            socket: Arc::new(socket),
            local,
            peers: Arc::new(DashMap::new()),
            chain: self.chain.clone(),
            config: self.config.clone(),
            handler,
            initializer,
        };
        let task = tokio::spawn(dispatcher.run(Arc::clone(&stop)));
        self.bindings.insert(local, Binding { stop, task });
        info!(%local, "udp acceptor bound");
        Ok(local)
    }

    async fn unbind(&self, addr: SocketAddr) -> ember_core::Result<()> {
        let Some((_, binding)) = self.bindings.remove(&addr) else {
            return Err(UdpError::NotBound(addr).into());
        };
        binding.stop.notify_one();
        if let Err(err) = binding.task.await {
            debug!(%addr, error = %err, "udp dispatcher ended abnormally");
        }
        info!(%addr, "udp acceptor unbound");
        Ok(())
    }

    fn bound_addresses(&self) -> Vec<SocketAddr> {
        self.bindings.iter().map(|entry| *entry.key()).collect()
    }
}

impl Drop for DatagramAcceptor {
    fn drop(&mut self) {
        for entry in self.bindings.iter() {
            entry.value().stop.notify_one();
        }
    }
}
