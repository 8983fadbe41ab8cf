use super::OutputCursor;
use crate::errors::Result;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::VecDeque;

/// Cursor over values already in memory.
pub struct ArrayCursor {
    items: VecDeque<Value>,
    position: usize,
    closed: bool,
    name: Option<String>,
}

impl ArrayCursor {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self { items: items.into(), position: 0, closed: false, name: None }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, items: Vec<Value>) -> Self {
        Self { name: Some(name.into()), ..Self::new(items) }
    }
}

#[async_trait]
impl OutputCursor for ArrayCursor {
    async fn has_next(&mut self) -> Result<bool> {
        Ok(!self.closed && !self.items.is_empty())
    }

    async fn next(&mut self) -> Result<Option<Value>> {
        if self.closed {
            return Ok(None);
        }
        let item = self.items.pop_front();
        if item.is_some() {
            self.position += 1;
        }
        Ok(item)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.items.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed || self.items.is_empty()
    }

    fn position(&self) -> usize {
        self.position
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }
}
