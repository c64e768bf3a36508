use ember_core::SessionConfig;
use serde::Deserialize;

/// 数据报连接器与接收器的配置。
///
/// 会话读缓冲默认取 [`SessionConfig::for_datagrams`]，保证任意 UDP 报文不被截断：
///
/// ```toml
/// reuse_address = false
///
/// [session]
/// read_buffer_size = 2048
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatagramConfig {
    session: SessionConfig,
    reuse_address: bool,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::for_datagrams(),
            reuse_address: true,
        }
    }
}

impl DatagramConfig {
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// 绑定前是否开启 `SO_REUSEADDR`。
    pub fn with_reuse_address(mut self, reuse_address: bool) -> Self {
        self.reuse_address = reuse_address;
        self
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn reuse_address(&self) -> bool {
        self.reuse_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::session::MAX_DATAGRAM_SIZE;

    #[test]
    fn defaults_fit_any_datagram() {
        let config: DatagramConfig = toml::from_str("reuse_address = false").expect("合法配置");
        assert!(!config.reuse_address());
        assert_eq!(config.session().read_buffer_size(), MAX_DATAGRAM_SIZE);
    }
}
