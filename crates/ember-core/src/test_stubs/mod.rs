//! 官方维护的测试桩。
//!
//! - [`RecordingHandler`]：按序记录事件并检测同一会话的回调是否发生重叠；
//! - [`EchoHandler`]：把读到的数据原样写回；
//! - [`MemoryConnector`]：不经网络的连接器，可注入读数据、关闭或读写失败。

mod handlers;
mod memory;

pub use handlers::{EchoHandler, RecordedEvent, RecordingHandler};
pub use memory::{MemoryConnector, MemoryProbe};
