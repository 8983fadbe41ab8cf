//! Async pull cursors.
//!
//! Stages hand [`SharedCursor`] handles to each other. A handle serializes access to the
//! underlying cursor and mirrors its position and closed flag so those can be read without
//! waiting on an in-flight `next`.

mod array;
mod iterable;
mod writable;

pub use array::ArrayCursor;
pub use iterable::{CursorSource, IterableCursor};
pub use writable::{CursorWriter, WritableOutputCursor, writable_cursor};

use crate::errors::{ExprError, Result};
use crate::value::{Map, Value};
use async_trait::async_trait;
use futures::Stream;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

#[async_trait]
pub trait OutputCursor: Send {
    async fn has_next(&mut self) -> Result<bool>;

    /// The next item, `None` once exhausted or closed.
    async fn next(&mut self) -> Result<Option<Value>>;

    /// Stops the cursor and releases whatever feeds it.
    async fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Number of items handed out so far.
    fn position(&self) -> usize;

    fn name(&self) -> Option<String> {
        None
    }
}

struct Mirror {
    name: Option<String>,
    position: AtomicUsize,
    closed: AtomicBool,
}

/// Clonable handle to a cursor.
#[derive(Clone)]
pub struct SharedCursor {
    inner: Arc<Mutex<Box<dyn OutputCursor>>>,
    mirror: Arc<Mirror>,
}

impl std::fmt::Debug for SharedCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedCursor({:?})", self.name())
    }
}

impl SharedCursor {
    pub fn new<C: OutputCursor + 'static>(cursor: C) -> Self {
        let mirror = Mirror {
            name: cursor.name(),
            position: AtomicUsize::new(cursor.position()),
            closed: AtomicBool::new(cursor.is_closed()),
        };
        Self { inner: Arc::new(Mutex::new(Box::new(cursor))), mirror: Arc::new(mirror) }
    }

    fn sync(&self, cursor: &dyn OutputCursor) {
        self.mirror.position.store(cursor.position(), Ordering::Relaxed);
        self.mirror.closed.store(cursor.is_closed(), Ordering::Relaxed);
    }

    pub async fn has_next(&self) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        let out = guard.has_next().await;
        self.sync(&**guard);
        out
    }

    /// `has_next` for readers that may be running inside this cursor's own `next`.
    pub async fn try_has_next(&self) -> Result<bool> {
        let mut guard = self
            .inner
            .try_lock()
            .map_err(|_| ExprError::cursor("cursor is busy and cannot be peeked from inside its own evaluation"))?;
        let out = guard.has_next().await;
        self.sync(&**guard);
        out
    }

    pub async fn next(&self) -> Result<Option<Value>> {
        let mut guard = self.inner.lock().await;
        let out = guard.next().await;
        self.sync(&**guard);
        out
    }

    pub async fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let out = guard.close().await;
        self.sync(&**guard);
        out
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.mirror.closed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.mirror.position.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.mirror.name.as_deref()
    }

    /// A handle that does not keep the cursor alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakCursor {
        WeakCursor { inner: Arc::downgrade(&self.inner), mirror: Arc::downgrade(&self.mirror) }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &SharedCursor) -> bool {
        Arc::ptr_eq(&self.mirror, &other.mirror)
    }

    /// Plain object description of the cursor.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let mut map = Map::new();
        map.insert("object".into(), Value::from("cursor"));
        if let Some(name) = self.name() {
            map.insert("name".into(), Value::from(name));
        }
        map.insert("position".into(), Value::from(self.position()));
        map.insert("closed".into(), Value::Bool(self.is_closed()));
        Value::Object(map)
    }

    /// Drains the remaining items.
    pub async fn collect(&self) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(v) = self.next().await? {
            out.push(v);
        }
        Ok(out)
    }

    /// The remaining items as a stream.
    pub fn stream(&self) -> impl Stream<Item = Result<Value>> + Send + 'static {
        futures::stream::try_unfold(self.clone(), |cursor| async move {
            let item = cursor.next().await?;
            Ok::<_, ExprError>(item.map(|v| (v, cursor)))
        })
    }
}

/// Non-owning cursor handle, see [`SharedCursor::downgrade`].
#[derive(Clone)]
pub struct WeakCursor {
    inner: Weak<Mutex<Box<dyn OutputCursor>>>,
    mirror: Weak<Mirror>,
}

impl WeakCursor {
    #[must_use]
    pub fn upgrade(&self) -> Option<SharedCursor> {
        Some(SharedCursor { inner: self.inner.upgrade()?, mirror: self.mirror.upgrade()? })
    }
}

/// Turns a value into a cursor: cursors pass through, arrays iterate their elements, null and
/// undefined are empty and any other plain value is a single item.
pub fn cast_cursor(value: Value) -> Result<SharedCursor> {
    match value {
        Value::Cursor(cursor) => Ok(cursor),
        v if v.is_nullish() => Ok(SharedCursor::new(ArrayCursor::new(Vec::new()))),
        v if v.is_array() => Ok(SharedCursor::new(ArrayCursor::new(v.into_array()))),
        Value::Subject(_) | Value::Context(_) | Value::Memo(_) => {
            Err(ExprError::invalid_argument("Value cannot be cast to a cursor."))
        }
        v => Ok(SharedCursor::new(ArrayCursor::new(vec![v]))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn cast_and_drain() {
        let cursor = cast_cursor(Value::Array(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert!(cursor.has_next().await.unwrap());
        assert_eq!(cursor.next().await.unwrap(), Some(Value::Int(1)));
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.collect().await.unwrap(), vec![Value::Int(2)]);
        assert!(cursor.is_closed());
    }

    #[tokio::test]
    async fn stream_yields_remaining_items() {
        let cursor = cast_cursor(Value::from(bson::doc! { "a": 1 })).unwrap();
        let items: Vec<Value> = cursor.stream().try_collect().await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(cast_cursor(Value::Null).unwrap().collect().await.unwrap().is_empty());
    }

    #[test]
    fn weak_handles_do_not_keep_cursors_alive() {
        let cursor = cast_cursor(Value::Array(vec![Value::Int(1)])).unwrap();
        let weak = cursor.downgrade();
        assert!(weak.upgrade().is_some_and(|c| c.ptr_eq(&cursor)));
        drop(cursor);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = cast_cursor(Value::Array(vec![Value::Int(1)])).unwrap();
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        b.close().await.unwrap();
        assert!(a.is_closed());
        assert_eq!(a.next().await.unwrap(), None);
    }
}
