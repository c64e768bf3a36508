use serde::Deserialize;

/// 流式会话默认的单次读缓冲大小。
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;
/// IPv4 UDP 载荷上限，数据报会话按此分配读缓冲以避免截断。
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// 会话级配置。
///
/// 可由 TOML/JSON 等格式反序列化，缺省字段取默认值：
///
/// ```toml
/// read_buffer_size = 16384
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl SessionConfig {
    /// 数据报会话的默认配置。
    pub fn for_datagrams() -> Self {
        Self {
            read_buffer_size: MAX_DATAGRAM_SIZE,
        }
    }

    /// 设置单次读缓冲大小，最小为 1。
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.max(1)
    }
}
