use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ember_core::prelude::{CoreError, TransportReader, TransportWriter};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::UdpError;

/// 以 `socket2` 创建并绑定非阻塞 UDP 套接字，按需开启 `SO_REUSEADDR`。
pub(crate) fn bind_socket(addr: SocketAddr, reuse_address: bool) -> Result<UdpSocket, UdpError> {
    let bind_error = |source| UdpError::Bind { addr, source };
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_error)?;
    socket.set_reuse_address(reuse_address).map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    UdpSocket::from_std(socket.into()).map_err(bind_error)
}

/// 已关联远端的套接字读半部，每次读取一个完整数据报。
pub(crate) struct ConnectedReader {
    pub(crate) socket: Arc<UdpSocket>,
}

#[async_trait]
impl TransportReader for ConnectedReader {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.socket.recv(buf).await.map(Some)
    }

    fn map_error(&self, error: io::Error) -> CoreError {
        UdpError::Receive(error).into()
    }
}

/// 已关联远端的套接字写半部，每次写入发送一个数据报。
pub(crate) struct ConnectedWriter {
    pub(crate) socket: Arc<UdpSocket>,
}

#[async_trait]
impl TransportWriter for ConnectedWriter {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.socket.send(data).await.map(drop)
    }

    fn map_error(&self, error: io::Error) -> CoreError {
        UdpError::Send(error).into()
    }
}

/// 接收器侧单个对端的读半部：数据报由分发任务经通道送达，通道关闭即会话结束。
pub(crate) struct PeerReader {
    pub(crate) datagrams: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl TransportReader for PeerReader {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Some(datagram) = self.datagrams.recv().await else {
            return Ok(None);
        };
        // 与内核行为一致：超出读缓冲的部分被截断
        let count = datagram.len().min(buf.len());
        buf[..count].copy_from_slice(&datagram[..count]);
        Ok(Some(count))
    }

    fn map_error(&self, error: io::Error) -> CoreError {
        UdpError::Receive(error).into()
    }
}

/// 接收器侧单个对端的写半部，经共享的监听套接字回复。
pub(crate) struct PeerWriter {
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) peer: SocketAddr,
}

#[async_trait]
impl TransportWriter for PeerWriter {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.socket.send_to(data, self.peer).await.map(drop)
    }

    fn map_error(&self, error: io::Error) -> CoreError {
        UdpError::Send(error).into()
    }
}
