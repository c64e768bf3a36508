use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::io;
use std::time::Duration;

use crate::buffer::BufferError;

/// `CoreError` 是 ember 各层共享的稳定错误形态。
///
/// # 设计背景（Why）
/// - 传输、过滤器链、会话与安全层的故障最终都汇入 `exception_caught` 或同步返回值，
///   需要统一的错误码以便日志检索与自动化处置；
/// - 错误码 `code` 始终为 `'static` 字符串，遵循 `ember.<领域>.<语义>` 约定，
///   取值集中在 [`codes`] 模块。
///
/// # 契约说明（What）
/// - `message` 面向排障人员，不应包含敏感信息；
/// - `cause` 可选，承载底层原因并通过 [`Error::source`] 暴露；
/// - `category` 未显式设置时按错误码查默认分类，查不到则为 `NonRetryable`。
///
/// # 风险提示（Trade-offs）
/// - `cause` 以 `Box<dyn Error>` 持有，因此 `CoreError` 不实现 `Clone`；
///   需要广播同一错误时请自行重建。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

/// 底层原因，保持 `Send + Sync` 以便跨任务传递。
pub type ErrorCause = Box<dyn Error + Send + Sync + 'static>;

/// 框架统一的返回值别名。
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

impl CoreError {
    /// 以错误码与描述构造错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附加底层原因。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 覆盖默认分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 返回错误分类：显式设置优先，其次按错误码查默认表。
    pub fn category(&self) -> ErrorCategory {
        self.category
            .clone()
            .or_else(|| default_category(self.code))
            .unwrap_or(ErrorCategory::NonRetryable)
    }

    /// 会话已进入 `Closing`/`Closed`，拒绝新的写请求。
    pub fn session_closed() -> Self {
        Self::new(codes::SESSION_CLOSED, "session is closing or closed")
    }

    /// 初始化器失败，会话不会被建立。
    pub fn initialization_failed(cause: CoreError) -> Self {
        let message = format!("session initializer failed: {}", cause.message());
        Self::new(codes::INITIALIZATION_FAILED, message).with_cause(cause)
    }

    pub(crate) fn duplicate_name(name: &str) -> Self {
        Self::new(
            codes::CHAIN_DUPLICATE_NAME,
            format!("filter `{name}` already exists in chain"),
        )
    }

    pub(crate) fn not_found(name: &str) -> Self {
        Self::new(
            codes::CHAIN_NOT_FOUND,
            format!("filter `{name}` not found in chain"),
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

impl From<BufferError> for CoreError {
    fn from(error: BufferError) -> Self {
        let code = match error {
            BufferError::Overflow { .. } => codes::BUFFER_OVERFLOW,
            BufferError::Underflow { .. } => codes::BUFFER_UNDERFLOW,
            BufferError::InvalidPosition { .. } => codes::BUFFER_INVALID_POSITION,
            BufferError::InvalidLimit { .. } => codes::BUFFER_INVALID_LIMIT,
            BufferError::InvalidMark => codes::BUFFER_INVALID_MARK,
        };
        CoreError::new(code, error.to_string()).with_cause(error)
    }
}

/// 错误分类，驱动重试、关闭等自动化处置。
///
/// - `Retryable`：携带建议的退避时长；
/// - `Security`：握手或证书相关失败，不应自动重试；
/// - 其余分类语义与名称一致。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Retryable(Duration),
    NonRetryable,
    Security,
    ResourceExhausted,
    ProtocolViolation,
    Cancelled,
    Timeout,
}

fn default_category(code: &str) -> Option<ErrorCategory> {
    match code {
        codes::SECURITY_HANDSHAKE_FAILED => Some(ErrorCategory::Security),
        codes::SESSION_CLOSED => Some(ErrorCategory::Cancelled),
        codes::BUFFER_OVERFLOW => Some(ErrorCategory::ResourceExhausted),
        codes::BUFFER_UNDERFLOW
        | codes::BUFFER_INVALID_POSITION
        | codes::BUFFER_INVALID_LIMIT
        | codes::BUFFER_INVALID_MARK => Some(ErrorCategory::ProtocolViolation),
        _ => None,
    }
}

/// 将 IO 错误种类映射为分类，供各传输 crate 的错误表复用。
pub fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            ErrorCategory::Retryable(Duration::from_millis(5))
        }
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe => ErrorCategory::Retryable(Duration::from_millis(50)),
        ErrorKind::WriteZero => ErrorCategory::Retryable(Duration::from_millis(10)),
        ErrorKind::PermissionDenied | ErrorKind::Unsupported => ErrorCategory::NonRetryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// 稳定错误码集合，遵循 `ember.<领域>.<语义>` 命名。
///
/// 传输实现自带更细的 `ember.transport.<协议>.<操作>_failed` 码值，
/// 这里只登记跨传输共享的部分。
pub mod codes {
    /// 写入超出 `limit`。
    pub const BUFFER_OVERFLOW: &str = "ember.buffer.overflow";
    /// 读取超出 `limit`。
    pub const BUFFER_UNDERFLOW: &str = "ember.buffer.underflow";
    /// `position` 越界。
    pub const BUFFER_INVALID_POSITION: &str = "ember.buffer.invalid_position";
    /// `limit` 越界。
    pub const BUFFER_INVALID_LIMIT: &str = "ember.buffer.invalid_limit";
    /// 未设置 mark 即执行 reset。
    pub const BUFFER_INVALID_MARK: &str = "ember.buffer.invalid_mark";
    /// 过滤器名称重复。
    pub const CHAIN_DUPLICATE_NAME: &str = "ember.chain.duplicate_name";
    /// 过滤器不存在。
    pub const CHAIN_NOT_FOUND: &str = "ember.chain.not_found";
    /// 会话已关闭。
    pub const SESSION_CLOSED: &str = "ember.session.closed";
    /// 会话初始化失败。
    pub const INITIALIZATION_FAILED: &str = "ember.connector.initialization_failed";
    /// 未细分的传输 IO 失败。
    pub const TRANSPORT_IO: &str = "ember.transport.io";
    /// 安全握手失败。
    pub const SECURITY_HANDSHAKE_FAILED: &str = "ember.security.handshake_failed";
    /// 安全引擎在握手完成后失败（解密、加密）。
    pub const SECURITY_ENGINE_FAILED: &str = "ember.security.engine_failed";
    /// 过滤器或 Handler 在回调中 panic。
    pub const HANDLER_PANICKED: &str = "ember.handler.panicked";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_error_maps_to_stable_code() {
        let err: CoreError = BufferError::Overflow {
            requested: 4,
            remaining: 1,
        }
        .into();
        assert_eq!(err.code(), codes::BUFFER_OVERFLOW);
        assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
        assert!(err.source().is_some(), "底层 BufferError 应作为 source 保留");
    }

    #[test]
    fn explicit_category_wins_over_default() {
        let err = CoreError::new(codes::SECURITY_HANDSHAKE_FAILED, "bad record")
            .with_category(ErrorCategory::ProtocolViolation);
        assert_eq!(err.category(), ErrorCategory::ProtocolViolation);
    }

    #[test]
    fn initialization_failure_keeps_cause_chain() {
        let inner = CoreError::new("app.rejected", "nope");
        let err = CoreError::initialization_failed(inner);
        assert_eq!(err.code(), codes::INITIALIZATION_FAILED);
        let source = err.source().expect("应保留初始化器返回的错误");
        assert_eq!(source.to_string(), "[app.rejected] nope");
    }

    #[test]
    fn io_errors_are_classified() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(
            categorize_io_error(&reset),
            ErrorCategory::Retryable(_)
        ));
        let timeout = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(categorize_io_error(&timeout), ErrorCategory::Timeout);
    }
}
