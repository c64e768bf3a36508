use std::io;
use std::time::Duration;

use ember_core::error::{CoreError, ErrorCategory, categorize_io_error};
use rustls::{AlertDescription, Error as RustlsError};

/// TLS 引擎错误映射。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将 `rustls`/IO 层的错误统一映射到框架的 [`ErrorCategory`]，便于自动化决策（重试、关闭、
///   安全告警）；
/// - 提供稳定错误码与文案，排障时无需解析底层库细节。
///
/// ## 逻辑（How）
/// - `OperationKind` 描述一类操作（建连、收包、发包）的错误码与默认文案；
/// - `categorize_rustls_error` 把证书、完整性类失败归为 `Security`，资源类归为
///   `ResourceExhausted`，其余视作可重试；
/// - `alert_to_category` 针对对端发来的 TLS Alert 做进一步细化。
///
/// ## 风险与权衡（Trade-offs）
/// - `rustls::Error::General` 等泛型错误默认映射为重试类别，避免误判为安全事件；
/// - 未穷举的 Alert 视作可重试错误，后续若需更精确分类可在此集中扩展。
#[derive(Clone, Copy)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "ember.transport.tls.configure_failed",
    message: "tls connection setup",
};

pub(crate) const READ: OperationKind = OperationKind {
    code: "ember.transport.tls.read_failed",
    message: "tls read",
};

pub(crate) const WRITE: OperationKind = OperationKind {
    code: "ember.transport.tls.write_failed",
    message: "tls write",
};

/// 将 `rustls` 协议错误映射为框架级 [`CoreError`]。
pub(crate) fn map_rustls_error(kind: OperationKind, error: RustlsError) -> CoreError {
    let category = categorize_rustls_error(&error);
    CoreError::new(kind.code, format!("{}: {}", kind.message, error))
        .with_category(category)
        .with_cause(error)
}

/// 将引擎内存缓冲上的 `io::Error` 映射为框架级 [`CoreError`]。
///
/// `rustls` 在 `read_tls`/`write_tls` 中以 `io::Error` 包装自身错误，此处先尝试还原。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = match error
        .get_ref()
        .and_then(|source| source.downcast_ref::<RustlsError>())
    {
        Some(rustls_error) => categorize_rustls_error(rustls_error),
        None => categorize_io_error(&error),
    };
    CoreError::new(kind.code, format!("{}: {}", kind.message, error))
        .with_category(category)
        .with_cause(error)
}

fn categorize_rustls_error(error: &RustlsError) -> ErrorCategory {
    use RustlsError::*;
    match error {
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidEncryptedClientHello(_)
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | EncryptError
        | PeerSentOversizedRecord
        | NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType
        | NoApplicationProtocol => ErrorCategory::Security,
        PeerIncompatible(_) | HandshakeNotComplete | General(_) | Other(_) => {
            ErrorCategory::Retryable(Duration::from_millis(80))
        }
        FailedToGetCurrentTime
        | FailedToGetRandomBytes
        | BadMaxFragmentSize
        | InconsistentKeys(_) => ErrorCategory::ResourceExhausted,
        AlertReceived(alert) => alert_to_category(alert),
        _ => ErrorCategory::Retryable(Duration::from_millis(60)),
    }
}

fn alert_to_category(alert: &AlertDescription) -> ErrorCategory {
    use AlertDescription::*;
    match alert {
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | UnknownCA
        | NoCertificate
        | CertificateUnobtainable
        | CertificateRequired
        | AccessDenied
        | DecodeError
        | DecryptError
        | DecryptionFailed
        | HandshakeFailure
        | IllegalParameter
        | RecordOverflow
        | BadRecordMac
        | UnexpectedMessage
        | InsufficientSecurity
        | InternalError
        | InappropriateFallback
        | MissingExtension
        | UnsupportedExtension
        | UnrecognisedName
        | NoApplicationProtocol
        | ProtocolVersion => ErrorCategory::Security,
        DecompressionFailure => ErrorCategory::ResourceExhausted,
        _ => ErrorCategory::Retryable(Duration::from_millis(40)),
    }
}
