use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 写请求携带的不透明回执标记。
///
/// # 契约（What）
/// - 调用方在 [`Session::write`](crate::Session::write) 时提交标记，框架不解释其内容；
/// - 对应的 `data_written` 事件原样交还同一个标记（指针相等），缺省标记交还的也是缺省；
/// - 第 N 个写完成事件携带第 N 次写入的标记。
///
/// # 实现（How）
/// - 以 `Option<Arc<dyn Any + Send + Sync>>` 擦除类型，克隆只增加引用计数；
/// - 取值通过 [`downcast_ref`](Self::downcast_ref) 还原具体类型。
#[derive(Clone, Default)]
pub struct Marker(Option<Arc<dyn Any + Send + Sync>>);

impl Marker {
    /// 缺省标记。
    pub const fn none() -> Self {
        Self(None)
    }

    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self(Some(Arc::new(value)))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }

    /// 还原为具体类型；类型不符或缺省时返回 `None`。
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|value| value.downcast_ref::<T>())
    }

    /// 两个标记是否为同一个实例（或同为缺省）。
    pub fn same_as(&self, other: &Marker) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("Marker(None)"),
            Some(_) => f.write_str("Marker(Some(..))"),
        }
    }
}

impl<T> From<Option<T>> for Marker
where
    T: Any + Send + Sync,
{
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Marker::none, Marker::new)
    }
}
