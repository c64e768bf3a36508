use ember_core::error::{CoreError, categorize_io_error};
use std::io;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "ember.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const UNBIND: OperationKind = OperationKind {
    code: "ember.transport.tcp.unbind_failed",
    message: "tcp unbind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "ember.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "ember.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "ember.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "ember.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "ember.transport.tcp.configure_failed",
    message: "tcp configure",
};

/// 将 IO 错误映射为框架级 CoreError，并附带错误分类。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = categorize_io_error(&error);
    CoreError::new(kind.code, format!("{}: {}", kind.message, error))
        .with_category(category)
        .with_cause(error)
}

/// 对未绑定地址执行 `unbind`。
pub(crate) fn not_bound(addr: std::net::SocketAddr) -> CoreError {
    CoreError::new(UNBIND.code, format!("{}: {addr} is not bound", UNBIND.message))
}
