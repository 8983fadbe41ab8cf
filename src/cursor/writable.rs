use super::OutputCursor;
use crate::errors::{ExprError, Result};
use crate::value::Value;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Producer half of a [`WritableOutputCursor`]. Dropping every writer ends the cursor.
#[derive(Clone)]
pub struct CursorWriter {
    tx: mpsc::Sender<Result<Value>>,
}

impl CursorWriter {
    /// Waits for room in the buffer; fails once the reader has closed.
    pub async fn write(&self, value: Value) -> Result<()> {
        self.tx.send(Ok(value)).await.map_err(|_| ExprError::cursor("output cursor is closed"))
    }

    /// Ends the cursor with `err`; the reader sees it on its next pull.
    pub async fn fail(&self, err: ExprError) -> Result<()> {
        self.tx.send(Err(err)).await.map_err(|_| ExprError::cursor("output cursor is closed"))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Push fed cursor backed by a bounded channel.
pub struct WritableOutputCursor {
    name: Option<String>,
    rx: mpsc::Receiver<Result<Value>>,
    queued: Option<Value>,
    position: usize,
    closed: bool,
    exhausted: bool,
}

/// Creates a cursor and the writer that feeds it. `capacity` bounds buffered items.
#[must_use]
pub fn writable_cursor(name: impl Into<String>, capacity: usize) -> (CursorWriter, WritableOutputCursor) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cursor = WritableOutputCursor {
        name: Some(name.into()),
        rx,
        queued: None,
        position: 0,
        closed: false,
        exhausted: false,
    };
    (CursorWriter { tx }, cursor)
}

impl WritableOutputCursor {
    async fn fill(&mut self) -> Result<()> {
        if self.queued.is_some() || self.closed || self.exhausted {
            return Ok(());
        }
        match self.rx.recv().await {
            Some(Ok(v)) => {
                self.queued = Some(v);
                Ok(())
            }
            Some(Err(e)) => {
                self.exhausted = true;
                self.rx.close();
                Err(e)
            }
            None => {
                self.exhausted = true;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl OutputCursor for WritableOutputCursor {
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

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.queued = None;
        self.rx.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || (self.exhausted && self.queued.is_none())
    }

    fn position(&self) -> usize {
        self.position
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }
}
