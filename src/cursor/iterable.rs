use super::OutputCursor;
use crate::errors::Result;
use crate::value::Value;
use async_trait::async_trait;

/// Pull side of an [`IterableCursor`]. Pipeline stages implement this to transform and filter
/// what they read from upstream.
#[async_trait]
pub trait CursorSource: Send {
    /// The next item, `None` when exhausted.
    async fn pull(&mut self) -> Result<Option<Value>>;

    /// Releases upstream resources. Called once, on close or exhaustion.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Cursor that queues one item ahead of a [`CursorSource`].
pub struct IterableCursor {
    name: String,
    source: Option<Box<dyn CursorSource>>,
    queued: Option<Value>,
    position: usize,
    closed: bool,
}

impl IterableCursor {
    pub fn new<S: CursorSource + 'static>(name: impl Into<String>, source: S) -> Self {
        Self { name: name.into(), source: Some(Box::new(source)), queued: None, position: 0, closed: false }
    }

    async fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.close().await {
                log::debug!("closing source of cursor {} failed: {e}", self.name);
            }
        }
    }

    async fn fill(&mut self) -> Result<()> {
        if self.queued.is_some() || self.closed {
            return Ok(());
        }
        let pulled = match self.source.as_mut() {
            Some(source) => source.pull().await,
            None => return Ok(()),
        };
        match pulled {
            Ok(Some(v)) => {
                self.queued = Some(v);
                Ok(())
            }
            Ok(None) => {
                self.release().await;
                Ok(())
            }
            Err(e) => {
                self.release().await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl OutputCursor for IterableCursor {
    async fn has_next(&mut self) -> Result<bool> {
        self.fill().await?;
        Ok(self.queued.is_some())
    }

    async fn next(&mut self) -> Result<Option<Value>> {
        self.fill().await?;
        let item = self.queued.take();
        if item.is_some() {
            self.position += 1;
        }
        Ok(item)
    }

    /// Close errors from the source are logged, never returned.
    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.queued = None;
        self.release().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || (self.source.is_none() && self.queued.is_none())
    }

    fn position(&self) -> usize {
        self.position
    }

    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{SharedCursor, cast_cursor};
    use crate::errors::ExprError;

    struct Evens {
        upstream: SharedCursor,
    }

    #[async_trait]
    impl CursorSource for Evens {
        async fn pull(&mut self) -> Result<Option<Value>> {
            while let Some(v) = self.upstream.next().await? {
                match v.as_i64() {
                    Some(i) if i < 0 => return Err(ExprError::invalid_argument("negative")),
                    Some(i) if i % 2 == 0 => return Ok(Some(v)),
                    _ => continue,
                }
            }
            Ok(None)
        }

        async fn close(&mut self) -> Result<()> {
            self.upstream.close().await
        }
    }

    fn numbers(values: &[i64]) -> SharedCursor {
        cast_cursor(Value::Array(values.iter().copied().map(Value::Int).collect())).unwrap()
    }

    #[tokio::test]
    async fn filters_and_counts_position() {
        let upstream = numbers(&[1, 2, 3, 4]);
        let cursor = SharedCursor::new(IterableCursor::new("evens", Evens { upstream: upstream.clone() }));
        assert_eq!(cursor.collect().await.unwrap(), vec![Value::Int(2), Value::Int(4)]);
        assert_eq!(cursor.position(), 2);
        assert!(cursor.is_closed());
        assert!(upstream.is_closed());
    }

    #[tokio::test]
    async fn close_reaches_upstream() {
        let upstream = numbers(&[2, 4, 6]);
        let cursor = SharedCursor::new(IterableCursor::new("evens", Evens { upstream: upstream.clone() }));
        assert_eq!(cursor.next().await.unwrap(), Some(Value::Int(2)));
        cursor.close().await.unwrap();
        assert!(upstream.is_closed());
        assert_eq!(cursor.next().await.unwrap(), None);
    }

    struct Stubborn;

    #[async_trait]
    impl CursorSource for Stubborn {
        async fn pull(&mut self) -> Result<Option<Value>> {
            Ok(Some(Value::Int(1)))
        }

        async fn close(&mut self) -> Result<()> {
            Err(ExprError::cursor("upstream refused to close"))
        }
    }

    #[tokio::test]
    async fn close_errors_stay_inside() {
        let cursor = SharedCursor::new(IterableCursor::new("stubborn", Stubborn));
        assert_eq!(cursor.next().await.unwrap(), Some(Value::Int(1)));
        cursor.close().await.unwrap();
        assert!(cursor.is_closed());
    }

    #[tokio::test]
    async fn errors_close_the_source() {
        let upstream = numbers(&[-1, 2]);
        let cursor = SharedCursor::new(IterableCursor::new("evens", Evens { upstream: upstream.clone() }));
        assert!(cursor.next().await.is_err());
        assert!(upstream.is_closed());
        assert_eq!(cursor.next().await.unwrap(), None);
    }
}
