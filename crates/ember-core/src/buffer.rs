//! 定长字节缓冲区。
//!
//! # 教案式说明
//!
//! ## 意图（Why）
//! - 传输层读入的数据与应用写出的数据都以 [`ByteBuffer`] 在过滤器链中流转；
//! - 缓冲区采用“写模式 → `flip` → 读模式”的单次翻转协议，调用方在两种模式之间
//!   切换时恰好调用一次 [`ByteBuffer::flip`]。
//!
//! ## 契约（What）
//! - 始终满足 `0 ≤ mark ≤ position ≤ limit ≤ capacity`；
//! - 越界的 `put`/`get` 以 [`BufferError`] 失败，且失败时缓冲区状态不变；
//! - 缓冲区独占所有权，在组件之间以移动语义传递，内部不做同步。
//!
//! ## 实现（How）
//! - 底层存储为定长 `Box<[u8]>`，`capacity` 在构造后不可变；
//! - 实现 [`bytes::Buf`]，并可与 [`bytes::Bytes`] 相互转换。

use bytes::{Buf, Bytes};
use std::fmt;
use thiserror::Error;

/// 缓冲区操作失败的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer overflow: requested {requested} bytes, {remaining} remaining")]
    Overflow { requested: usize, remaining: usize },
    #[error("buffer underflow: requested {requested} bytes, {remaining} remaining")]
    Underflow { requested: usize, remaining: usize },
    #[error("position {position} exceeds limit {limit}")]
    InvalidPosition { position: usize, limit: usize },
    #[error("limit {limit} exceeds capacity {capacity}")]
    InvalidLimit { limit: usize, capacity: usize },
    #[error("reset without a mark")]
    InvalidMark,
}

/// 具备 `position`/`limit`/`mark` 游标的定长字节缓冲区。
#[derive(Clone)]
pub struct ByteBuffer {
    data: Box<[u8]>,
    position: usize,
    limit: usize,
    mark: Option<usize>,
}

impl ByteBuffer {
    /// 分配写模式缓冲区：`position = 0`，`limit = capacity`。
    pub fn allocate(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            position: 0,
            limit: capacity,
            mark: None,
        }
    }

    /// 以既有字节构造读模式缓冲区：`position = 0`，`limit = capacity = len`。
    pub fn wrap(bytes: Vec<u8>) -> Self {
        let limit = bytes.len();
        Self {
            data: bytes.into_boxed_slice(),
            position: 0,
            limit,
            mark: None,
        }
    }

    /// 复制切片内容并构造读模式缓冲区。
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self::wrap(bytes.to_vec())
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// `limit - position`。
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// 移动 `position`；超过 `limit` 时失败。位于新位置之后的 mark 被丢弃。
    pub fn set_position(&mut self, position: usize) -> Result<(), BufferError> {
        if position > self.limit {
            return Err(BufferError::InvalidPosition {
                position,
                limit: self.limit,
            });
        }
        self.position = position;
        if self.mark.is_some_and(|mark| mark > position) {
            self.mark = None;
        }
        Ok(())
    }

    /// 调整 `limit`；超过 `capacity` 时失败。`position` 会被截断到新 `limit`。
    pub fn set_limit(&mut self, limit: usize) -> Result<(), BufferError> {
        if limit > self.capacity() {
            return Err(BufferError::InvalidLimit {
                limit,
                capacity: self.capacity(),
            });
        }
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        if self.mark.is_some_and(|mark| mark > limit) {
            self.mark = None;
        }
        Ok(())
    }

    /// 写入单个字节。
    pub fn put(&mut self, byte: u8) -> Result<(), BufferError> {
        self.ensure_writable(1)?;
        self.data[self.position] = byte;
        self.position += 1;
        Ok(())
    }

    /// 写入整段切片；空间不足时整体失败，不会部分写入。
    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.ensure_writable(bytes.len())?;
        let end = self.position + bytes.len();
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    /// 把 `src` 的剩余字节全部写入本缓冲区，并推进 `src` 的 `position`。
    pub fn put_buffer(&mut self, src: &mut ByteBuffer) -> Result<(), BufferError> {
        self.put_slice(src.as_slice())?;
        src.position = src.limit;
        Ok(())
    }

    /// 读取单个字节。
    pub fn get(&mut self) -> Result<u8, BufferError> {
        self.ensure_readable(1)?;
        let byte = self.data[self.position];
        self.position += 1;
        Ok(byte)
    }

    /// 读满 `dst`；剩余不足时整体失败。
    pub fn get_slice(&mut self, dst: &mut [u8]) -> Result<(), BufferError> {
        self.ensure_readable(dst.len())?;
        let end = self.position + dst.len();
        dst.copy_from_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(())
    }

    /// 写模式切换到读模式：`limit = position`，`position = 0`。
    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
        self
    }

    /// 恢复为空的写模式缓冲区，内容不清零。
    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity();
        self.mark = None;
        self
    }

    /// 保持 `limit` 不变，从头重新读取。
    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self.mark = None;
        self
    }

    /// 把未读字节搬到开头并切回写模式，适合“读一部分、继续追加”的场景。
    pub fn compact(&mut self) -> &mut Self {
        let remaining = self.remaining();
        self.data.copy_within(self.position..self.limit, 0);
        self.position = remaining;
        self.limit = self.capacity();
        self.mark = None;
        self
    }

    /// 记录当前位置。
    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.position);
        self
    }

    /// 回到最近一次 [`mark`](Self::mark) 的位置。
    pub fn reset(&mut self) -> Result<(), BufferError> {
        let mark = self.mark.ok_or(BufferError::InvalidMark)?;
        self.position = mark;
        Ok(())
    }

    /// 推进 `position`，用于外部直接写入 [`unfilled_mut`](Self::unfilled_mut) 之后。
    pub fn advance_position(&mut self, count: usize) -> Result<(), BufferError> {
        self.ensure_writable(count)?;
        self.position += count;
        Ok(())
    }

    /// `position..limit` 区间的只读视图。
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// `position..limit` 区间的可写视图，配合 [`advance_position`](Self::advance_position) 使用。
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.position..self.limit]
    }

    /// 复制剩余字节。
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    fn ensure_writable(&self, requested: usize) -> Result<(), BufferError> {
        let remaining = self.remaining();
        if requested > remaining {
            return Err(BufferError::Overflow {
                requested,
                remaining,
            });
        }
        Ok(())
    }

    fn ensure_readable(&self, requested: usize) -> Result<(), BufferError> {
        let remaining = self.remaining();
        if requested > remaining {
            return Err(BufferError::Underflow {
                requested,
                remaining,
            });
        }
        Ok(())
    }
}

/// 只比较剩余字节，游标与容量不参与比较。
impl PartialEq for ByteBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteBuffer {}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Buf for ByteBuffer {
    fn remaining(&self) -> usize {
        ByteBuffer::remaining(self)
    }

    fn chunk(&self) -> &[u8] {
        self.as_slice()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= ByteBuffer::remaining(self),
            "cannot advance past the buffer limit"
        );
        self.position += cnt;
    }
}

impl From<Bytes> for ByteBuffer {
    fn from(bytes: Bytes) -> Self {
        ByteBuffer::wrap(bytes.to_vec())
    }
}

impl From<ByteBuffer> for Bytes {
    fn from(buffer: ByteBuffer) -> Self {
        Bytes::copy_from_slice(buffer.as_slice())
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        ByteBuffer::wrap(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_starts_in_write_mode() {
        let buf = ByteBuffer::allocate(16);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 16);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.remaining(), 16);
    }

    #[test]
    fn flip_exposes_written_bytes_exactly_once() {
        let mut buf = ByteBuffer::allocate(16);
        for i in 0..16u8 {
            buf.put(i).expect("容量足够");
        }
        buf.flip();
        assert_eq!(buf.remaining(), 16);
        assert_eq!(buf.as_slice(), (0..16u8).collect::<Vec<_>>().as_slice());
        assert_eq!(buf.get().expect("首字节"), 0);
        assert_eq!(buf.remaining(), 15);
    }

    #[test]
    fn put_past_limit_overflows_without_side_effects() {
        let mut buf = ByteBuffer::allocate(4);
        buf.put_slice(&[1, 2, 3]).expect("写入三个字节");
        let err = buf.put_slice(&[4, 5]).expect_err("剩余空间不足应失败");
        assert_eq!(
            err,
            BufferError::Overflow {
                requested: 2,
                remaining: 1
            }
        );
        assert_eq!(buf.position(), 3, "失败的写入不能推进 position");
        buf.put(4).expect("最后一个字节仍可写入");
        assert!(matches!(buf.put(5), Err(BufferError::Overflow { .. })));
    }

    #[test]
    fn get_past_limit_underflows() {
        let mut buf = ByteBuffer::copy_from_slice(&[9]);
        assert_eq!(buf.get().expect("有一个字节"), 9);
        assert!(matches!(buf.get(), Err(BufferError::Underflow { .. })));
        let mut dst = [0u8; 2];
        buf.rewind();
        assert!(matches!(
            buf.get_slice(&mut dst),
            Err(BufferError::Underflow {
                requested: 2,
                remaining: 1
            })
        ));
    }

    #[test]
    fn put_buffer_accumulates_and_drains_source() {
        let mut acc = ByteBuffer::allocate(8);
        let mut first = ByteBuffer::copy_from_slice(&[1, 2, 3]);
        let mut second = ByteBuffer::copy_from_slice(&[4, 5]);
        acc.put_buffer(&mut first).expect("第一段");
        acc.put_buffer(&mut second).expect("第二段");
        assert!(!first.has_remaining());
        assert!(!second.has_remaining());
        acc.flip();
        assert_eq!(acc, ByteBuffer::copy_from_slice(&[1, 2, 3, 4, 5]));
    }

    #[test]
    fn compact_moves_unread_bytes_to_front() {
        let mut buf = ByteBuffer::allocate(6);
        buf.put_slice(&[1, 2, 3, 4]).expect("写入");
        buf.flip();
        buf.get().expect("读走一个");
        buf.compact();
        assert_eq!(buf.position(), 3);
        assert_eq!(buf.limit(), 6);
        buf.put_slice(&[5, 6, 7]).expect("compact 后可继续写满");
        buf.flip();
        assert_eq!(buf.as_slice(), &[2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn mark_and_reset_respect_invariants() {
        let mut buf = ByteBuffer::copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(buf.reset(), Err(BufferError::InvalidMark));
        buf.get().expect("读");
        buf.mark();
        buf.get().expect("读");
        buf.get().expect("读");
        buf.reset().expect("回到 mark");
        assert_eq!(buf.position(), 1);

        buf.set_position(3).expect("合法位置");
        buf.mark();
        buf.set_limit(2).expect("缩小 limit");
        assert_eq!(buf.position(), 2, "position 被截断到 limit");
        assert_eq!(buf.reset(), Err(BufferError::InvalidMark), "越界 mark 被丢弃");
        assert!(matches!(
            buf.set_position(3),
            Err(BufferError::InvalidPosition { .. })
        ));
        assert!(matches!(
            buf.set_limit(5),
            Err(BufferError::InvalidLimit { .. })
        ));
    }

    #[test]
    fn equality_compares_remaining_bytes_only() {
        let mut a = ByteBuffer::allocate(32);
        a.put_slice(b"abc").expect("写入");
        a.flip();
        let b = ByteBuffer::wrap(b"abc".to_vec());
        assert_eq!(a, b);
        let mut c = ByteBuffer::wrap(b"zabc".to_vec());
        c.get().expect("跳过首字节");
        assert_eq!(a, c);
    }

    #[test]
    fn bytes_interop_uses_remaining_region() {
        let mut buf = ByteBuffer::copy_from_slice(b"hello");
        buf.get().expect("跳过 h");
        let bytes: Bytes = buf.clone().into();
        assert_eq!(&bytes[..], b"ello");
        let mut back = ByteBuffer::from(bytes);
        assert_eq!(Buf::remaining(&back), 4);
        assert_eq!(back.get_u8(), b'e');
        assert_eq!(back.chunk(), b"llo");
    }

    #[test]
    fn unfilled_region_supports_direct_reads() {
        let mut buf = ByteBuffer::allocate(8);
        buf.unfilled_mut()[..3].copy_from_slice(&[7, 8, 9]);
        buf.advance_position(3).expect("推进三个字节");
        buf.flip();
        assert_eq!(buf.as_slice(), &[7, 8, 9]);
    }
}
