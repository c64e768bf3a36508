//! 可用端口探测，主要服务于测试与示例中的“显式本地地址”场景。

use std::net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

/// 探测下限，避开特权端口。
pub const MIN_PORT: u16 = 1024;

/// 从 `from` 开始向上查找第一个 TCP 与 UDP 均可绑定的端口。
///
/// 探测结果只是瞬时快照，调用方在真正绑定前端口仍可能被其他进程占用。
pub fn next_available(from: u16) -> Option<u16> {
    (from.max(MIN_PORT)..=u16::MAX).find(|&port| is_available(port))
}

/// 端口是否同时可用于 TCP 监听与 UDP 绑定。
pub fn is_available(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    TcpListener::bind(addr).is_ok() && UdpSocket::bind(addr).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_port_at_or_above_lower_bound() {
        let port = next_available(20_000).expect("测试环境应存在空闲端口");
        assert!(port >= 20_000);
        assert!(is_available(port));
    }

    #[test]
    fn occupied_port_is_skipped() {
        let listener =
            TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("绑定临时端口");
        let taken = listener.local_addr().expect("本地地址").port();
        assert!(!is_available(taken));
        if let Some(found) = next_available(taken) {
            assert_ne!(found, taken);
        }
    }

    #[test]
    fn privileged_range_is_never_probed() {
        let port = next_available(1).expect("应存在空闲端口");
        assert!(port >= MIN_PORT);
    }
}
