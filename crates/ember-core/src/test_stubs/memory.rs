use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::filter::FilterChain;
use crate::handler::SessionHandler;
use crate::io::{TransportReader, TransportWriter};
use crate::service::{IoConnector, SessionInitializer, TransportKind};
use crate::session::{Session, SessionBuilder, SessionConfig};

enum Inbound {
    Data(Vec<u8>),
    Eof,
    Error(io::ErrorKind),
}

struct LinkState {
    inbound: mpsc::UnboundedSender<Inbound>,
    written: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
    shut_down: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    loopback: bool,
}

/// 内存链路的控制端：注入读事件、观察写出的字节、制造故障。
#[derive(Clone)]
pub struct MemoryProbe {
    state: Arc<LinkState>,
}

impl MemoryProbe {
    /// 让读半部产出一段数据。
    pub fn inject(&self, bytes: &[u8]) {
        let _ = self.state.inbound.send(Inbound::Data(bytes.to_vec()));
    }

    /// 模拟对端关闭。
    pub fn hang_up(&self) {
        let _ = self.state.inbound.send(Inbound::Eof);
    }

    /// 让下一次读取以 `kind` 失败。
    pub fn fail_read(&self, kind: io::ErrorKind) {
        let _ = self.state.inbound.send(Inbound::Error(kind));
    }

    /// 之后的写入全部以 `BrokenPipe` 失败。
    pub fn fail_writes(&self) {
        self.state.fail_writes.store(true, Ordering::SeqCst);
    }

    /// 每次写入前等待 `delay`，用于让写队列产生积压。
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.state.write_delay.lock() = delay;
    }

    /// 写半部实际发送的每一段数据。
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }
}

struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    leftover: Vec<u8>,
}

#[async_trait]
impl TransportReader for MemoryReader {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        if self.leftover.is_empty() {
            match self.inbound.recv().await {
                Some(Inbound::Data(bytes)) => self.leftover = bytes,
                Some(Inbound::Error(kind)) => return Err(io::Error::from(kind)),
                Some(Inbound::Eof) | None => return Ok(None),
            }
        }
        let count = self.leftover.len().min(buf.len());
        buf[..count].copy_from_slice(&self.leftover[..count]);
        self.leftover.drain(..count);
        Ok(Some(count))
    }
}

struct MemoryWriter {
    state: Arc<LinkState>,
}

#[async_trait]
impl TransportWriter for MemoryWriter {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let delay = *self.state.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.state.written.lock().push(data.to_vec());
        if self.state.loopback {
            let _ = self.state.inbound.send(Inbound::Data(data.to_vec()));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.state.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// 不经网络的连接器。
///
/// `loopback` 模式下写出的数据立即作为读数据返回，相当于对端是回显服务；
/// `sink` 模式只记录写出的数据。每次 `connect` 的控制端通过 [`last_probe`](Self::last_probe) 取得。
pub struct MemoryConnector {
    chain: FilterChain,
    kind: TransportKind,
    config: SessionConfig,
    loopback: bool,
    probes: Mutex<Vec<MemoryProbe>>,
}

impl MemoryConnector {
    pub fn loopback() -> Self {
        Self::with_mode(true)
    }

    pub fn sink() -> Self {
        Self::with_mode(false)
    }

    fn with_mode(loopback: bool) -> Self {
        Self {
            chain: FilterChain::new(),
            kind: TransportKind::Stream,
            config: SessionConfig::default(),
            loopback,
            probes: Mutex::new(Vec::new()),
        }
    }

    /// 以数据报语义报告传输类别，读写行为不变。
    pub fn datagram(mut self) -> Self {
        self.kind = TransportKind::Datagram;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn last_probe(&self) -> Option<MemoryProbe> {
        self.probes.lock().last().cloned()
    }
}

fn ephemeral_addr() -> SocketAddr {
    static NEXT: AtomicU16 = AtomicU16::new(40_000);
    SocketAddr::from((Ipv4Addr::LOCALHOST, NEXT.fetch_add(1, Ordering::Relaxed)))
}

#[async_trait]
impl IoConnector for MemoryConnector {
    fn transport_kind(&self) -> TransportKind {
        self.kind
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
    ) -> Result<Session> {
        let (inbound, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(LinkState {
            inbound,
            written: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            write_delay: Mutex::new(None),
            loopback: self.loopback,
        });
        let local = local.unwrap_or_else(ephemeral_addr);
        let pending = SessionBuilder::new(self.kind, local, remote, handler)
            .chain(self.chain.duplicate())
            .config(self.config.clone())
            .build();
        let reader = MemoryReader {
            inbound: receiver,
            leftover: Vec::new(),
        };
        let writer = MemoryWriter {
            state: Arc::clone(&state),
        };
        self.probes.lock().push(MemoryProbe { state });
        pending.activate(reader, writer, initializer.as_deref())
    }
}
