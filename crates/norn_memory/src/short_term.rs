use anyhow::Result;
use norn_core::store::{self, KvStore};
use norn_core::{Role, Turn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BUFFER_NAMESPACE: &str = "buffers";

/// Bounded per-user log of recent turns. Pushing past capacity drops the
/// oldest turn; consolidation is expected to fire before that happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermBuffer {
    pub user_id: String,
    pub turns: Vec<Turn>,
    max: usize,
}

impl ShortTermBuffer {
    pub fn new(user_id: impl Into<String>, max: usize) -> Self {
        Self {
            user_id: user_id.into(),
            turns: Vec::new(),
            max: max.max(1),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        self.turns.push(Turn::now(role, text));
        if self.turns.len() > self.max {
            let overflow = self.turns.len() - self.max;
            self.turns.drain(..overflow);
        }
    }

    /// True once the buffer has reached `threshold` (a fraction of max).
    pub fn over_threshold(&self, threshold: f32) -> bool {
        let trigger = (self.max as f32 * threshold).ceil() as usize;
        self.turns.len() >= trigger.max(1)
    }

    /// Drop everything except the most recent `keep` turns, returning the
    /// removed prefix (oldest first).
    pub fn drain_older(&mut self, keep: usize) -> Vec<Turn> {
        if self.turns.len() <= keep {
            return Vec::new();
        }
        let cut = self.turns.len() - keep;
        self.turns.drain(..cut).collect()
    }
}

/// Buffer persistence over the shared key-value store. Buffers survive
/// restarts alongside profiles and states.
#[derive(Clone)]
pub struct BufferStore {
    store: Arc<dyn KvStore>,
    max: usize,
}

impl BufferStore {
    pub fn new(store: Arc<dyn KvStore>, max: usize) -> Self {
        Self { store, max }
    }

    pub async fn get_or_create(&self, user_id: &str) -> Result<ShortTermBuffer> {
        match store::load::<ShortTermBuffer>(self.store.as_ref(), BUFFER_NAMESPACE, user_id).await?
        {
            Some(buf) => Ok(buf),
            None => Ok(ShortTermBuffer::new(user_id, self.max)),
        }
    }

    pub async fn put(&self, buffer: &ShortTermBuffer) -> Result<()> {
        store::save(self.store.as_ref(), BUFFER_NAMESPACE, &buffer.user_id, buffer).await
    }
}
