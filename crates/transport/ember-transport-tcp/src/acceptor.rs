use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ember_core::prelude::{
    FilterChain, IoAcceptor, SessionHandler, SessionInitializer, TransportKind,
};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::TcpConfig;
use crate::channel::open_session;
use crate::error::{self, map_io_error, not_bound};

/// `accept` 失败（如文件描述符耗尽）后的退避时长。
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

struct Binding {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

/// 监听 TCP 地址、为每个接入连接创建会话的接收器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 与 [`TcpConnector`](crate::TcpConnector) 共享同一会话契约，服务端代码与客户端代码
///   使用同一套 Handler、过滤器与初始化器。
///
/// ## 逻辑 (How)
/// - `bind` 创建监听套接字（按配置开启 `SO_REUSEADDR`）并派生一个接收任务；
/// - 接收任务对每个连接应用套接字配置、复制模板链、运行初始化器并激活会话；
///   初始化失败只影响该连接；
/// - `unbind` 通知接收任务退出并等待其结束，监听套接字随之释放。
///
/// ## 契约 (What)
/// - `bind` 返回实际绑定地址，端口为 0 时由系统分配；
/// - `unbind` 不影响已建立的会话；对未绑定的地址返回 `ember.transport.tcp.unbind_failed`；
/// - 接收器被丢弃时全部接收任务随之停止。
///
/// ## 注意事项 (Trade-offs)
/// - `accept` 失败后固定退避 50ms 再继续，避免描述符耗尽时空转。
#[derive(Default)]
pub struct TcpAcceptor {
    chain: FilterChain,
    config: TcpConfig,
    bindings: DashMap<SocketAddr, Binding>,
}

impl TcpAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self {
            chain: FilterChain::new(),
            config,
            bindings: DashMap::new(),
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    fn listen(&self, addr: SocketAddr) -> ember_core::Result<TcpListener> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .set_reuseaddr(self.config.socket().reuse_address())
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        socket
            .bind(addr)
            .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .listen(self.config.backlog())
            .map_err(|err| map_io_error(error::BIND, err))
    }
}

async fn accept_loop(
    listener: TcpListener,
    stop: Arc<Notify>,
    chain: FilterChain,
    config: TcpConfig,
    handler: Arc<dyn SessionHandler>,
    initializer: Option<Arc<dyn SessionInitializer>>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    match open_session(
                        stream,
                        remote,
                        &chain,
                        &config,
                        Arc::clone(&handler),
                        initializer.as_deref(),
                    ) {
                        Ok(session) => {
                            debug!(session = %session.id(), %remote, "tcp session accepted");
                        }
                        Err(err) => {
                            warn!(%remote, code = err.code(), error = %err, "tcp session rejected");
                        }
                    }
                }
                Err(err) => {
                    let err = map_io_error(error::ACCEPT, err);
                    warn!(code = err.code(), error = %err, "tcp accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}

#[async_trait]
impl IoAcceptor for TcpAcceptor {
    fn transport_kind(&self) -> TransportKind {
        TransportKind::Stream
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
        let listener = self.listen(addr)?;
        let local = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        let stop = Arc::new(Notify::new());
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&stop),
            self.chain.clone(),
            self.config.clone(),
            handler,
            initializer,
        ));
        self.bindings.insert(local, Binding { stop, task });
        info!(%local, "tcp acceptor bound");
        Ok(local)
    }

    async fn unbind(&self, addr: SocketAddr) -> ember_core::Result<()> {
        let Some((_, binding)) = self.bindings.remove(&addr) else {
            return Err(not_bound(addr));
        };
        binding.stop.notify_one();
        if let Err(err) = binding.task.await {
            debug!(%addr, error = %err, "tcp accept task ended abnormally");
        }
        info!(%addr, "tcp acceptor unbound");
        Ok(())
    }

    fn bound_addresses(&self) -> Vec<SocketAddr> {
        self.bindings.iter().map(|entry| *entry.key()).collect()
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        for entry in self.bindings.iter() {
            entry.value().stop.notify_one();
        }
    }
}
