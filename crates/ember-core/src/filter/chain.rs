use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::next::{Outbound, invoke_inbound, invoke_outbound};
use super::{Filter, SessionEvent, WriteRequest};
use crate::error::{CoreError, Result};
use crate::session::Session;

/// 派发期间使用的不可变链快照。
pub(crate) type ChainSnapshot = Arc<Vec<Arc<FilterEntry>>>;

/// 链中的一项：名称与过滤器实例。
pub(crate) struct FilterEntry {
    name: String,
    filter: Arc<dyn Filter>,
}

impl FilterEntry {
    pub(crate) fn filter(&self) -> &dyn Filter {
        self.filter.as_ref()
    }
}

/// 为过滤器链提供原子快照与 epoch 计数的缓冲区。
///
/// - 读路径 `load` 只做一次 `ArcSwap::load_full`，不与写路径竞争锁；
/// - 写路径由 [`FilterChain`] 的互斥锁串行化：复制当前向量、修改、`store`、`bump_epoch`；
/// - 旧快照被在途事件持有时继续有效，引用计数归零后释放。
struct EpochBuffer {
    snapshot: ArcSwap<Vec<Arc<FilterEntry>>>,
    epoch: AtomicU64,
}

impl EpochBuffer {
    fn new(entries: Vec<Arc<FilterEntry>>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(entries),
            epoch: AtomicU64::new(0),
        }
    }

    #[inline]
    fn load(&self) -> ChainSnapshot {
        self.snapshot.load_full()
    }

    #[inline]
    fn store(&self, snapshot: ChainSnapshot) {
        self.snapshot.store(snapshot);
    }

    #[inline]
    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    #[inline]
    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct ChainInner {
    buffer: EpochBuffer,
    mutation: Mutex<()>,
}

/// 有序、具名的过滤器链。
///
/// # 教案式说明
///
/// ## 意图（Why）
/// - 每个会话持有一条链；连接器/接收器持有一条“模板链”，会话创建时复制一份；
/// - 事件在途时允许增删过滤器，调用方无需暂停 IO。
///
/// ## 逻辑（How）
/// - 入站事件从链首（下标 0）走向链尾，再交给会话的 Handler；
/// - 出站操作从链尾走向链首，再交给会话写队列；
/// - 变更在互斥锁内完成“复制 → 修改 → 原子替换 → epoch 自增”，派发路径只读取快照。
///
/// ## 契约（What）
/// - 名称在同一条链内唯一，重复添加返回 `ember.chain.duplicate_name`；
/// - 删除、替换或以不存在的名称为基准插入时返回 `ember.chain.not_found`；
/// - 变更返回之后派发的事件可见新链；已经开始派发的事件继续使用旧快照，不会被回溯影响；
/// - 空链直接把事件交给 Handler 或写队列。
///
/// ## 风险与考量（Trade-offs）
/// - 每次变更复制整个向量，适合“读多写少”的链路；
/// - `FilterChain` 的克隆共享同一条链，需要独立副本时使用 [`duplicate`](Self::duplicate)。
#[derive(Clone)]
pub struct FilterChain {
    inner: Arc<ChainInner>,
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterChain {
    /// 创建空链。
    pub fn new() -> Self {
        Self::from_entries(Vec::new())
    }

    fn from_entries(entries: Vec<Arc<FilterEntry>>) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                buffer: EpochBuffer::new(entries),
                mutation: Mutex::new(()),
            }),
        }
    }

    /// 插入到链首，成为最先看到入站事件、最后看到出站操作的过滤器。
    pub fn add_first(&self, name: impl Into<String>, filter: Arc<dyn Filter>) -> Result<()> {
        let entry = new_entry(name.into(), filter);
        self.mutate(|entries| {
            ensure_unique(entries, &entry.name)?;
            entries.insert(0, entry);
            Ok(())
        })
    }

    /// 追加到链尾，紧邻 Handler。
    pub fn add_last(&self, name: impl Into<String>, filter: Arc<dyn Filter>) -> Result<()> {
        let entry = new_entry(name.into(), filter);
        self.mutate(|entries| {
            ensure_unique(entries, &entry.name)?;
            entries.push(entry);
            Ok(())
        })
    }

    /// 插入到名为 `base` 的过滤器之前。
    pub fn add_before(
        &self,
        base: &str,
        name: impl Into<String>,
        filter: Arc<dyn Filter>,
    ) -> Result<()> {
        let entry = new_entry(name.into(), filter);
        self.mutate(|entries| {
            ensure_unique(entries, &entry.name)?;
            let index = position_of(entries, base)?;
            entries.insert(index, entry);
            Ok(())
        })
    }

    /// 插入到名为 `base` 的过滤器之后。
    pub fn add_after(
        &self,
        base: &str,
        name: impl Into<String>,
        filter: Arc<dyn Filter>,
    ) -> Result<()> {
        let entry = new_entry(name.into(), filter);
        self.mutate(|entries| {
            ensure_unique(entries, &entry.name)?;
            let index = position_of(entries, base)?;
            entries.insert(index + 1, entry);
            Ok(())
        })
    }

    /// 移除并返回指定过滤器。
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Filter>> {
        self.mutate(|entries| {
            let index = position_of(entries, name)?;
            Ok(Arc::clone(&entries.remove(index).filter))
        })
    }

    /// 原位替换过滤器，返回旧实例。
    pub fn replace(&self, name: &str, filter: Arc<dyn Filter>) -> Result<Arc<dyn Filter>> {
        self.mutate(|entries| {
            let index = position_of(entries, name)?;
            let previous =
                std::mem::replace(&mut entries[index], new_entry(name.to_owned(), filter));
            Ok(Arc::clone(&previous.filter))
        })
    }

    /// 移除全部过滤器。
    pub fn clear(&self) {
        let _guard = self.inner.mutation.lock();
        self.inner.buffer.store(Arc::new(Vec::new()));
        self.inner.buffer.bump_epoch();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().iter().any(|entry| entry.name == name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Filter>> {
        self.snapshot()
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| Arc::clone(&entry.filter))
    }

    /// 按链首到链尾的顺序返回过滤器名称。
    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// 逻辑版本号，每次成功变更后自增。
    pub fn epoch(&self) -> u64 {
        self.inner.buffer.epoch()
    }

    /// 复制出一条独立的链：过滤器实例共享，后续增删互不影响。
    pub fn duplicate(&self) -> FilterChain {
        FilterChain::from_entries(Vec::clone(&self.snapshot()))
    }

    pub(crate) fn snapshot(&self) -> ChainSnapshot {
        self.inner.buffer.load()
    }

    pub(crate) fn fire_inbound(&self, session: &Session, event: SessionEvent) {
        invoke_inbound(&self.snapshot(), 0, session, event);
    }

    pub(crate) fn fire_write(&self, session: &Session, request: WriteRequest) {
        let snapshot = self.snapshot();
        let tail = snapshot.len().checked_sub(1);
        invoke_outbound(&snapshot, tail, session, Outbound::Write(request));
    }

    pub(crate) fn fire_close(&self, session: &Session) {
        let snapshot = self.snapshot();
        let tail = snapshot.len().checked_sub(1);
        invoke_outbound(&snapshot, tail, session, Outbound::Close);
    }

    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut Vec<Arc<FilterEntry>>) -> Result<R>,
    ) -> Result<R> {
        let _guard = self.inner.mutation.lock();
        let mut entries = Vec::clone(&self.inner.buffer.load());
        let outcome = apply(&mut entries)?;
        self.inner.buffer.store(Arc::new(entries));
        self.inner.buffer.bump_epoch();
        Ok(outcome)
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("names", &self.names())
            .field("epoch", &self.epoch())
            .finish()
    }
}

fn new_entry(name: String, filter: Arc<dyn Filter>) -> Arc<FilterEntry> {
    Arc::new(FilterEntry { name, filter })
}

fn ensure_unique(entries: &[Arc<FilterEntry>], name: &str) -> Result<()> {
    if entries.iter().any(|entry| entry.name == name) {
        return Err(CoreError::duplicate_name(name));
    }
    Ok(())
}

fn position_of(entries: &[Arc<FilterEntry>], name: &str) -> Result<usize> {
    entries
        .iter()
        .position(|entry| entry.name == name)
        .ok_or_else(|| CoreError::not_found(name))
}
