use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ember_core::prelude::{
    CoreError, FilterChain, Session, SessionBuilder, SessionHandler, SessionInitializer,
    TransportKind, TransportReader, TransportWriter,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::TcpConfig;
use crate::error::{self, map_io_error};

/// 连接的读半部。
struct TcpReader {
    inner: OwnedReadHalf,
}

#[async_trait]
impl TransportReader for TcpReader {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.inner.read(buf).await? {
            0 => Ok(None),
            count => Ok(Some(count)),
        }
    }

    fn map_error(&self, error: io::Error) -> CoreError {
        map_io_error(error::READ, error)
    }
}

/// 连接的写半部，`shutdown` 即发送 FIN。
struct TcpWriter {
    inner: OwnedWriteHalf,
}

#[async_trait]
impl TransportWriter for TcpWriter {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    fn map_error(&self, error: io::Error) -> CoreError {
        map_io_error(error::WRITE, error)
    }
}

/// 把已建立的连接包装为会话：应用套接字配置、复制模板链、运行初始化器并启动读写任务。
///
/// 初始化器失败时 `stream` 随之释放，对端观察到连接关闭。
pub(crate) fn open_session(
    stream: TcpStream,
    remote: SocketAddr,
    template: &FilterChain,
    config: &TcpConfig,
    handler: Arc<dyn SessionHandler>,
    initializer: Option<&dyn SessionInitializer>,
) -> ember_core::Result<Session> {
    config
        .socket()
        .apply(&stream)
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    let local = stream
        .local_addr()
        .map_err(|err| map_io_error(error::CONFIGURE, err))?;
    let pending = SessionBuilder::new(TransportKind::Stream, local, remote, handler)
        .chain(template.duplicate())
        .config(config.session().clone())
        .build();
    let (read_half, write_half) = stream.into_split();
    pending.activate(
        TcpReader { inner: read_half },
        TcpWriter { inner: write_half },
        initializer,
    )
}
