//! 会话与传输之间的读写驱动。
//!
//! # 教案式说明
//!
//! ## 意图（Why）
//! - 传输实现只需提供“读一段字节”和“写一段字节”两个动作（[`TransportReader`] /
//!   [`TransportWriter`]），会话激活、事件投递、写完成回执与关闭流程在此统一实现，
//!   流式与数据报传输因而共享同一套会话语义。
//!
//! ## 逻辑（How）
//! 1. [`PendingSession::activate`] 先运行初始化器，失败则静默作废会话；
//! 2. 成功后状态切换为 `Open`，投递 `session_opened`，再启动读任务与写任务；
//! 3. 读任务把每次读取的字节包装成读模式 [`ByteBuffer`] 投递 `data_read`；
//!    对端关闭或读失败时结束会话；
//! 4. 写任务按入队顺序逐个发送，每完成一个投递一次 `data_written(marker)`；
//!    收到关闭指令时先执行传输半关闭，再结束会话。
//!
//! ## 契约（What）
//! - 关闭指令之前入队的写请求全部发送完毕后才会进入 `Closed`；
//! - 传输失败时，失败通过 `exception_caught` 报告一次，队列中剩余的写请求被丢弃，
//!   不产生完成事件，丢弃数量以 `debug` 日志记录。

use std::io;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::buffer::ByteBuffer;
use crate::error::{CoreError, Result, categorize_io_error, codes};
use crate::filter::{SessionEvent, WriteRequest};
use crate::service::SessionInitializer;
use crate::session::{PendingSession, Session, SessionState};

/// 传输读半部。
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// 读取下一段数据写入 `buf`，返回写入的字节数；`Ok(None)` 表示对端已关闭。
    ///
    /// 数据报传输每次返回一个完整数据报。实现必须是取消安全的。
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// 将读失败映射为框架错误。
    fn map_error(&self, error: io::Error) -> CoreError {
        io_error(codes::TRANSPORT_IO, "transport read", error)
    }
}

/// 传输写半部。
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// 完整写出 `data`；数据报传输以一个数据报发送。
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// 关闭写方向；数据报传输无需动作。
    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// 将写失败映射为框架错误。
    fn map_error(&self, error: io::Error) -> CoreError {
        io_error(codes::TRANSPORT_IO, "transport write", error)
    }
}

fn io_error(code: &'static str, operation: &str, error: io::Error) -> CoreError {
    let category = categorize_io_error(&error);
    CoreError::new(code, format!("{operation}: {error}"))
        .with_category(category)
        .with_cause(error)
}

/// 写任务消费的指令。
pub(crate) enum WriteCommand {
    Write(WriteRequest),
    Close,
}

/// 会话写队列的消费端，只由写任务持有。
pub(crate) struct WriteQueue {
    receiver: mpsc::UnboundedReceiver<WriteCommand>,
}

impl WriteQueue {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<WriteCommand>) -> Self {
        Self { receiver }
    }

    async fn recv(&mut self) -> Option<WriteCommand> {
        self.receiver.recv().await
    }

    /// 关闭队列并丢弃积压的写请求，返回被丢弃的数量。
    fn discard(&mut self) -> usize {
        self.receiver.close();
        let mut discarded = 0;
        while let Ok(command) = self.receiver.try_recv() {
            if matches!(command, WriteCommand::Write(_)) {
                discarded += 1;
            }
        }
        discarded
    }
}

impl PendingSession {
    /// 运行初始化器、打开会话并启动读写任务。
    ///
    /// 必须在 Tokio 运行时内调用。初始化器失败，或初始化期间会话被关闭时，
    /// 返回 `ember.connector.initialization_failed`，不投递任何事件。
    pub fn activate<R, W>(
        self,
        reader: R,
        writer: W,
        initializer: Option<&dyn SessionInitializer>,
    ) -> Result<Session>
    where
        R: TransportReader,
        W: TransportWriter,
    {
        let PendingSession { session, queue } = self;
        if let Some(initializer) = initializer
            && let Err(error) = initializer.initialize_session(&session)
        {
            session.abandon();
            warn!(
                session = %session.id(),
                remote = %session.remote_addr(),
                code = error.code(),
                "session initializer failed"
            );
            return Err(CoreError::initialization_failed(error));
        }
        if !session.mark_open() {
            session.abandon();
            return Err(CoreError::initialization_failed(
                CoreError::session_closed(),
            ));
        }
        debug!(
            session = %session.id(),
            kind = %session.transport_kind(),
            local = %session.local_addr(),
            remote = %session.remote_addr(),
            "session opened"
        );
        session.dispatch(SessionEvent::Opened);
        tokio::spawn(read_loop(session.clone(), reader));
        tokio::spawn(write_loop(session.clone(), queue, writer));
        Ok(session)
    }
}

async fn read_loop<R: TransportReader>(session: Session, mut reader: R) {
    let mut scratch = vec![0u8; session.config().read_buffer_size()];
    loop {
        let outcome = tokio::select! {
            biased;
            _ = session.reader_stop().notified() => break,
            outcome = reader.read(&mut scratch) => outcome,
        };
        match outcome {
            Ok(Some(count)) => {
                session.stats().record_read(count);
                let buffer = ByteBuffer::copy_from_slice(&scratch[..count]);
                session.dispatch(SessionEvent::DataRead(buffer));
            }
            Ok(None) => {
                debug!(session = %session.id(), "peer closed the transport");
                session.finish_close();
                break;
            }
            Err(error) => {
                if session.state() == SessionState::Closed {
                    break;
                }
                let error = reader.map_error(error);
                warn!(
                    session = %session.id(),
                    code = error.code(),
                    error = %error,
                    "transport read failed"
                );
                session.dispatch(SessionEvent::Exception(error));
                session.finish_close();
                break;
            }
        }
    }
}

async fn write_loop<W: TransportWriter>(session: Session, mut queue: WriteQueue, mut writer: W) {
    loop {
        let command = tokio::select! {
            biased;
            _ = session.writer_stop().notified() => break,
            command = queue.recv() => command,
        };
        match command {
            Some(WriteCommand::Write(request)) => {
                let (buffer, marker) = request.into_parts();
                match writer.write(buffer.as_slice()).await {
                    Ok(()) => {
                        session.stats().record_written(buffer.remaining());
                        session.dispatch(SessionEvent::DataWritten(marker));
                    }
                    Err(error) => {
                        if session.state() == SessionState::Closed {
                            break;
                        }
                        let error = writer.map_error(error);
                        warn!(
                            session = %session.id(),
                            code = error.code(),
                            error = %error,
                            "transport write failed"
                        );
                        session.dispatch(SessionEvent::Exception(error));
                        session.finish_close();
                        break;
                    }
                }
            }
            Some(WriteCommand::Close) => {
                if let Err(error) = writer.shutdown().await {
                    debug!(session = %session.id(), error = %error, "transport shutdown failed");
                }
                session.finish_close();
                break;
            }
            None => break,
        }
    }
    let discarded = queue.discard();
    if discarded > 0 {
        debug!(session = %session.id(), discarded, "discarded undelivered writes");
    }
}
