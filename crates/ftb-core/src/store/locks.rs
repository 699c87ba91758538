use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{ChannelId, MessageId};

type BlockKey = (ChannelId, MessageId);

/// One async mutex per Block message.
///
/// Every read-modify-write of a Block body runs under its lock, so concurrent
/// mutations of the same Block serialize instead of overwriting each other.
#[derive(Default)]
pub struct BlockLocks {
    inner: Mutex<HashMap<BlockKey, Arc<Mutex<()>>>>,
}

impl BlockLocks {
    pub async fn lock_block(&self, channel: &ChannelId, id: MessageId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry((channel.clone(), id))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop the entry for a deleted Block.
    pub async fn forget(&self, channel: &ChannelId, id: MessageId) {
        self.inner.lock().await.remove(&(channel.clone(), id));
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
