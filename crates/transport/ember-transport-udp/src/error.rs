use std::net::SocketAddr;

use ember_core::error::{CoreError, categorize_io_error};
use thiserror::Error;

/// UDP 传输错误。
///
/// # 契约（What）
/// - 每个变体对应一个稳定错误码（[`UdpError::code`]），转换为 [`CoreError`] 时保留原始错误作为 `cause`；
/// - 分类沿用 `categorize_io_error`，未绑定地址属于调用方错误，归为不可重试。
#[derive(Debug, Error)]
pub enum UdpError {
    /// 绑定失败。
    #[error("无法绑定 UDP 套接字到 {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// 关联远端地址失败。
    #[error("无法关联 UDP 远端 {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// 查询本地地址失败。
    #[error("无法获取 UDP 套接字本地地址: {0}")]
    LocalAddr(#[source] std::io::Error),
    /// 接收失败。
    #[error("接收 UDP 报文失败: {0}")]
    Receive(#[source] std::io::Error),
    /// 发送失败。
    #[error("发送 UDP 报文失败: {0}")]
    Send(#[source] std::io::Error),
    /// 解绑未绑定的地址。
    #[error("UDP 地址 {0} 未绑定")]
    NotBound(SocketAddr),
}

impl UdpError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            UdpError::Bind { .. } => "ember.transport.udp.bind_failed",
            UdpError::Connect { .. } => "ember.transport.udp.connect_failed",
            UdpError::LocalAddr(_) => "ember.transport.udp.local_addr_failed",
            UdpError::Receive(_) => "ember.transport.udp.receive_failed",
            UdpError::Send(_) => "ember.transport.udp.send_failed",
            UdpError::NotBound(_) => "ember.transport.udp.unbind_failed",
        }
    }

    fn io(&self) -> Option<&std::io::Error> {
        match self {
            UdpError::Bind { source, .. } | UdpError::Connect { source, .. } => Some(source),
            UdpError::LocalAddr(source) | UdpError::Receive(source) | UdpError::Send(source) => {
                Some(source)
            }
            UdpError::NotBound(_) => None,
        }
    }
}

impl From<UdpError> for CoreError {
    fn from(error: UdpError) -> Self {
        let code = error.code();
        let category = error.io().map(categorize_io_error);
        let core = CoreError::new(code, error.to_string());
        let core = match category {
            Some(category) => core.with_category(category),
            None => core,
        };
        core.with_cause(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::ErrorCategory;
    use std::io;

    #[test]
    fn converts_with_code_and_category() {
        let error: CoreError =
            UdpError::Send(io::Error::from(io::ErrorKind::ConnectionRefused)).into();
        assert_eq!(error.code(), "ember.transport.udp.send_failed");
        assert!(matches!(error.category(), ErrorCategory::Retryable(_)));

        let addr: SocketAddr = "127.0.0.1:1".parse().expect("合法地址");
        let error: CoreError = UdpError::NotBound(addr).into();
        assert_eq!(error.code(), "ember.transport.udp.unbind_failed");
        assert_eq!(error.category(), ErrorCategory::NonRetryable);
    }
}
