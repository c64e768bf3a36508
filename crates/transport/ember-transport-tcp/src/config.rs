use std::time::Duration;

use ember_core::SessionConfig;
use serde::{Deserialize, Deserializer};

/// 监听队列默认长度。
pub const DEFAULT_BACKLOG: u32 = 1024;

/// TCP 套接字级配置项，实现对内核行为的显式控制。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将 `SO_LINGER`、`TCP_NODELAY`、`SO_REUSEADDR` 显式配置化，避免调用方直接操作
///   `socket2` 或平台相关常量。
///
/// ## 核心逻辑（How）
/// - `linger` 为 `Some(dur)` 时通过 `socket2::SockRef::set_linger` 设置 `SO_LINGER`，
///   `close`/`drop` 阶段在 `dur` 后仍未发送完毕就发送 RST；`None` 遵循内核默认策略；
/// - `nodelay` 控制 Nagle 算法；
/// - `reuse_address` 作用于监听套接字。主动连接一旦指定本地地址，总是在绑定前开启
///   `SO_REUSEADDR`，与该字段无关。
///
/// ## 契约说明（What）
/// - 可从 TOML 读取，缺省字段取默认值，`linger` 以毫秒表示：
///
/// ```toml
/// linger_ms = 500
/// nodelay = true
/// reuse_address = true
/// ```
///
/// ## 设计取舍与注意事项（Trade-offs）
/// - `SO_LINGER` 在不同平台的精度不同（Linux 取整到秒）；
/// - 若设置过小，仍在发送缓冲区的数据可能被丢弃并触发对端 `ECONNRESET`。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TcpSocketConfig {
    #[serde(rename = "linger_ms", deserialize_with = "millis")]
    linger: Option<Duration>,
    nodelay: bool,
    reuse_address: bool,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocketConfig {
    /// 创建默认配置：内核默认 linger、开启 `TCP_NODELAY`、监听端开启地址复用。
    pub const fn new() -> Self {
        Self {
            linger: None,
            nodelay: true,
            reuse_address: true,
        }
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_reuse_address(mut self, reuse_address: bool) -> Self {
        self.reuse_address = reuse_address;
        self
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn reuse_address(&self) -> bool {
        self.reuse_address
    }

    #[cfg(feature = "runtime-tokio")]
    pub(crate) fn apply(&self, stream: &tokio::net::TcpStream) -> std::io::Result<()> {
        let sock = socket2::SockRef::from(stream);
        sock.set_linger(self.linger)?;
        sock.set_tcp_nodelay(self.nodelay)
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

/// 连接器与接收器共用的完整配置。
///
/// ```toml
/// backlog = 512
///
/// [socket]
/// nodelay = false
///
/// [session]
/// read_buffer_size = 16384
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    socket: TcpSocketConfig,
    session: SessionConfig,
    backlog: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            socket: TcpSocketConfig::default(),
            session: SessionConfig::default(),
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl TcpConfig {
    pub fn with_socket(mut self, socket: TcpSocketConfig) -> Self {
        self.socket = socket;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// 设置监听队列长度，最小为 1。
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    pub fn socket(&self) -> &TcpSocketConfig {
        &self.socket
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn backlog(&self) -> u32 {
        self.backlog.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// TOML 中缺省的字段取默认值，`linger_ms` 转换为时长。
    #[test]
    fn loads_from_toml() {
        let config: TcpConfig = toml::from_str(
            r#"
            backlog = 16

            [socket]
            linger_ms = 1500
            nodelay = false

            [session]
            read_buffer_size = 4096
            "#,
        )
        .expect("合法配置");
        assert_eq!(config.backlog(), 16);
        assert_eq!(config.socket().linger(), Some(Duration::from_millis(1500)));
        assert!(!config.socket().nodelay());
        assert!(config.socket().reuse_address(), "未填写的字段应取默认值");
        assert_eq!(config.session().read_buffer_size(), 4096);

        let empty: TcpConfig = toml::from_str("").expect("空配置");
        assert_eq!(empty.backlog(), DEFAULT_BACKLOG);
        assert_eq!(empty.socket(), &TcpSocketConfig::default());
    }
}
