use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::ByteBuffer;
use crate::error::{CoreError, ErrorCategory, Result, codes};
use crate::filter::{Filter, NextFilter, SessionEvent, WriteRequest};
use crate::marker::Marker;
use crate::session::{Session, SessionId};

/// 与 IO 解耦的安全引擎（sans-io）。
///
/// 引擎只在内存中变换字节：输入密文、产出明文，输入明文、产出待发送的密文记录。
/// 具体握手协议由实现决定，过滤器只依赖以下语义：
/// - `begin` 启动握手，主动方在此产生首个握手记录；
/// - `is_handshaking` 在握手完成前为 `true`；
/// - 所有需要发送的字节都经 `take_outbound` 取出。
pub trait SecurityEngine: Send + 'static {
    fn begin(&mut self) -> Result<()>;

    fn is_handshaking(&self) -> bool;

    /// 输入收到的密文，返回解出的应用明文（握手期间通常为空）。
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// 输入应用明文，对应密文随后由 `take_outbound` 取出。
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<()>;

    /// 产生关闭告警。
    fn close(&mut self);

    /// 取出全部待发送的密文。
    fn take_outbound(&mut self) -> Result<Vec<u8>>;
}

/// 为每个会话创建独立的引擎。
pub trait SecurityEngineFactory: Send + Sync + 'static {
    fn create_engine(&self, session: &Session) -> Result<Box<dyn SecurityEngine>>;
}

/// 过滤器自身发出的记录（握手、关闭告警）使用的内部标记，其写完成不向上传递。
struct SecurityRecord;

struct SecureSession {
    engine: Box<dyn SecurityEngine>,
    pending: VecDeque<WriteRequest>,
    started: bool,
    established: bool,
    failed: bool,
}

/// 传输加密过滤器。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 在不改动传输实现的前提下为会话加上加密层：位于其上的过滤器与 Handler 只看到明文，
///   位于其下的过滤器与传输只看到密文。
///
/// ## 逻辑（How）
/// - 会话打开（或本过滤器首次见到该会话）时由工厂创建引擎并启动握手；
/// - 入站密文交给引擎，握手记录经出站方向写回，握手完成后才把明文向上传递；
/// - 握手完成前提交的应用写请求暂存，握手完成时按提交顺序加密发送，保留原标记；
/// - 关闭时先写出关闭告警，再把关闭继续向下传递。
///
/// ## 契约（What）
/// - 握手完成先于第一个向上传递的 `data_read`；
/// - 应用写请求的完成事件携带其原始标记，顺序与提交顺序一致；
/// - 握手或引擎失败以 `exception_caught` 报告（握手期为 `ember.security.handshake_failed`），
///   随后会话被关闭。
pub struct SecurityFilter {
    factory: Arc<dyn SecurityEngineFactory>,
    sessions: DashMap<SessionId, Arc<Mutex<SecureSession>>>,
}

impl SecurityFilter {
    pub fn new(factory: Arc<dyn SecurityEngineFactory>) -> Self {
        Self {
            factory,
            sessions: DashMap::new(),
        }
    }

    /// 仍持有引擎状态的会话数。
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// 会话的握手是否已完成。
    pub fn is_secured(&self, session: &Session) -> bool {
        self.sessions
            .get(&session.id())
            .is_some_and(|state| state.lock().established)
    }

    fn state_of(
        &self,
        next: &NextFilter,
        session: &Session,
    ) -> Option<Arc<Mutex<SecureSession>>> {
        let state = match self.sessions.get(&session.id()) {
            Some(state) => Arc::clone(&state),
            // 已开始关闭的会话不再创建引擎，session_closed 之后无人清理
            None if session.is_closing() => return None,
            None => {
                let engine = match self.factory.create_engine(session) {
                    Ok(engine) => engine,
                    Err(error) => {
                        self.fail(session, error, true);
                        return None;
                    }
                };
                let fresh = Arc::new(Mutex::new(SecureSession {
                    engine,
                    pending: VecDeque::new(),
                    started: false,
                    established: false,
                    failed: false,
                }));
                self.sessions.entry(session.id()).or_insert(fresh).clone()
            }
        };
        let mut guard = state.lock();
        if guard.failed {
            return None;
        }
        if !guard.started {
            guard.started = true;
            let begun = guard
                .engine
                .begin()
                .and_then(|()| self.flush(&mut guard, next, session));
            if let Err(error) = begun {
                guard.failed = true;
                drop(guard);
                self.fail(session, error, true);
                return None;
            }
        }
        drop(guard);
        Some(state)
    }

    /// 写出引擎积压的记录；若握手恰好完成，按序发送暂存的应用写请求。
    fn flush(
        &self,
        state: &mut SecureSession,
        next: &NextFilter,
        session: &Session,
    ) -> Result<()> {
        let records = state.engine.take_outbound()?;
        if !records.is_empty() {
            next.filter_write(
                session,
                WriteRequest::new(ByteBuffer::wrap(records), Marker::new(SecurityRecord)),
            );
        }
        if !state.established && !state.engine.is_handshaking() {
            state.established = true;
            debug!(
                session = %session.id(),
                held = state.pending.len(),
                "security handshake complete"
            );
            while let Some(request) = state.pending.pop_front() {
                Self::seal(state, next, session, request)?;
            }
        }
        Ok(())
    }

    fn seal(
        state: &mut SecureSession,
        next: &NextFilter,
        session: &Session,
        request: WriteRequest,
    ) -> Result<()> {
        let (buffer, marker) = request.into_parts();
        state.engine.encrypt(buffer.as_slice())?;
        let records = state.engine.take_outbound()?;
        next.filter_write(session, WriteRequest::new(ByteBuffer::wrap(records), marker));
        Ok(())
    }

    fn fail(&self, session: &Session, cause: CoreError, handshaking: bool) {
        let code = if handshaking {
            codes::SECURITY_HANDSHAKE_FAILED
        } else {
            codes::SECURITY_ENGINE_FAILED
        };
        warn!(
            session = %session.id(),
            remote = %session.remote_addr(),
            code,
            error = %cause,
            "security layer failed, closing session"
        );
        let error = CoreError::new(code, format!("security layer failed: {}", cause.message()))
            .with_category(ErrorCategory::Security)
            .with_cause(cause);
        session.dispatch(SessionEvent::Exception(error));
        session.close();
    }
}

impl Filter for SecurityFilter {
    fn session_opened(&self, next: NextFilter, session: &Session) {
        next.session_opened(session);
        let _ = self.state_of(&next, session);
    }

    fn data_read(&self, next: NextFilter, session: &Session, buffer: ByteBuffer) {
        let Some(state) = self.state_of(&next, session) else {
            return;
        };
        let mut guard = state.lock();
        let handshaking = !guard.established;
        let outcome = guard
            .engine
            .decrypt(buffer.as_slice())
            .and_then(|plaintext| self.flush(&mut guard, &next, session).map(|()| plaintext));
        match outcome {
            Ok(plaintext) => {
                drop(guard);
                if !plaintext.is_empty() {
                    next.data_read(session, ByteBuffer::wrap(plaintext));
                }
            }
            Err(error) => {
                guard.failed = true;
                // 引擎可能已排队致命告警，先送出再关闭
                match guard.engine.take_outbound() {
                    Ok(records) if !records.is_empty() => next.filter_write(
                        session,
                        WriteRequest::new(ByteBuffer::wrap(records), Marker::new(SecurityRecord)),
                    ),
                    Ok(_) => {}
                    Err(alert_error) => {
                        debug!(session = %session.id(), error = %alert_error, "failure alert not sent");
                    }
                }
                drop(guard);
                self.fail(session, error, handshaking);
            }
        }
    }

    fn data_written(&self, next: NextFilter, session: &Session, marker: Marker) {
        if marker.downcast_ref::<SecurityRecord>().is_some() {
            return;
        }
        next.data_written(session, marker);
    }

    fn session_closed(&self, next: NextFilter, session: &Session) {
        if let Some((_, state)) = self.sessions.remove(&session.id()) {
            let held = state.lock().pending.len();
            if held > 0 {
                debug!(
                    session = %session.id(),
                    discarded = held,
                    "discarded writes held for handshake"
                );
            }
        }
        next.session_closed(session);
    }

    fn filter_write(&self, next: NextFilter, session: &Session, request: WriteRequest) {
        let Some(state) = self.state_of(&next, session) else {
            debug!(session = %session.id(), "write discarded, security layer unavailable");
            return;
        };
        let mut guard = state.lock();
        if !guard.established {
            guard.pending.push_back(request);
            return;
        }
        if let Err(error) = Self::seal(&mut guard, &next, session, request) {
            guard.failed = true;
            drop(guard);
            self.fail(session, error, false);
        }
    }

    fn filter_close(&self, next: NextFilter, session: &Session) {
        let state = self
            .sessions
            .get(&session.id())
            .map(|state| Arc::clone(&state));
        if let Some(state) = state {
            let mut guard = state.lock();
            if !guard.failed {
                guard.engine.close();
                match guard.engine.take_outbound() {
                    Ok(records) if !records.is_empty() => next.filter_write(
                        session,
                        WriteRequest::new(ByteBuffer::wrap(records), Marker::new(SecurityRecord)),
                    ),
                    Ok(_) => {}
                    Err(error) => {
                        debug!(session = %session.id(), error = %error, "closure alert not sent");
                    }
                }
            }
        }
        next.filter_close(session);
    }
}
