use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::buffer::ByteBuffer;
use crate::error::{CoreError, codes};
use crate::filter::{Filter, NextFilter, SessionEvent};
use crate::marker::Marker;
use crate::session::{SerialQueue, Session, SessionId};

/// 默认工作者上限。
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// 分派过滤器配置。
///
/// ```toml
/// max_workers = 32
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    max_workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl ExecutorConfig {
    /// 设置同时处理事件的会话数上限，最小为 1。
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers.max(1)
    }
}

struct SessionJobs {
    session: Session,
    jobs: SerialQueue<(NextFilter, SessionEvent)>,
}

/// 把入站事件转移到有界工作池执行的过滤器。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 读任务只负责搬运字节，Handler 中的耗时逻辑不应拖慢同一会话的后续读取；
/// - 挂在链首（`add_first`）时，其后的所有过滤器与 Handler 都运行在工作池中。
///
/// ## 逻辑（How）
/// - 每个会话一条 [`SerialQueue`]，首个入队者负责派生一个排空任务；
/// - 排空任务在执行前向信号量申请许可，许可总数即 `max_workers`，
///   同时处理事件的会话数因此有上限；
/// - `session_closed` 执行完毕后移除该会话的队列。
///
/// ## 契约（What）
/// - 同一会话的事件按到达顺序执行，任意两个不会并发；
/// - 不同会话的事件可以并发；
/// - 出站操作（`filter_write`/`filter_close`）在调用方线程直接向下传递。
///
/// ## 风险与考量（Trade-offs）
/// - 队列无界，上游读速度持续高于处理速度时内存会增长；
/// - 构造时若不在 Tokio 运行时内且未指定运行时，事件退化为在调用线程同步执行。
pub struct ExecutorFilter {
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    queues: Arc<DashMap<SessionId, Arc<SessionJobs>>>,
    runtime: Option<Handle>,
}

impl Default for ExecutorFilter {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl ExecutorFilter {
    /// 使用当前 Tokio 运行时创建过滤器。
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_workers())),
            config,
            queues: Arc::new(DashMap::new()),
            runtime: Handle::try_current().ok(),
        }
    }

    /// 指定承载工作任务的运行时。
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// 仍有事件队列的会话数。
    pub fn active_sessions(&self) -> usize {
        self.queues.len()
    }

    fn schedule(&self, next: NextFilter, session: &Session, event: SessionEvent) {
        let queue = self
            .queues
            .entry(session.id())
            .or_insert_with(|| {
                Arc::new(SessionJobs {
                    session: session.clone(),
                    jobs: SerialQueue::new(),
                })
            })
            .clone();
        if !queue.jobs.push((next, event)) {
            return;
        }
        let permits = Arc::clone(&self.permits);
        let queues = Arc::clone(&self.queues);
        match self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        {
            Some(runtime) => {
                runtime.spawn(async move {
                    // 信号量从不关闭，获取失败即运行时正在退出
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    drain(&queue, &queues);
                });
            }
            None => {
                warn!(session = %session.id(), "no tokio runtime available, running events inline");
                drain(&queue, &queues);
            }
        }
    }
}

fn drain(queue: &SessionJobs, queues: &DashMap<SessionId, Arc<SessionJobs>>) {
    loop {
        while let Some((next, event)) = queue.jobs.pop() {
            let closed = matches!(event, SessionEvent::Closed);
            let name = event.name();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                next.fire(&queue.session, event);
            }));
            if outcome.is_err() {
                error!(
                    session = %queue.session.id(),
                    event = name,
                    code = codes::HANDLER_PANICKED,
                    "filter or handler panicked on executor worker"
                );
            }
            if closed {
                queues.remove(&queue.session.id());
            }
        }
        if !queue.jobs.release() {
            break;
        }
    }
}

impl Filter for ExecutorFilter {
    fn session_opened(&self, next: NextFilter, session: &Session) {
        self.schedule(next, session, SessionEvent::Opened);
    }

    fn data_read(&self, next: NextFilter, session: &Session, buffer: ByteBuffer) {
        self.schedule(next, session, SessionEvent::DataRead(buffer));
    }

    fn data_written(&self, next: NextFilter, session: &Session, marker: Marker) {
        self.schedule(next, session, SessionEvent::DataWritten(marker));
    }

    fn exception_caught(&self, next: NextFilter, session: &Session, error: CoreError) {
        self.schedule(next, session, SessionEvent::Exception(error));
    }

    fn session_closed(&self, next: NextFilter, session: &Session) {
        self.schedule(next, session, SessionEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_loads_from_toml_with_defaults() {
        let config: ExecutorConfig = toml::from_str("max_workers = 4").expect("合法配置");
        assert_eq!(config.max_workers(), 4);
        let defaults: ExecutorConfig = toml::from_str("").expect("空配置取默认值");
        assert_eq!(defaults.max_workers(), DEFAULT_MAX_WORKERS);
        assert_eq!(ExecutorConfig::default().with_max_workers(0).max_workers(), 1);
    }
}
