//! Record store: categories, files and timers kept as text inside storage-channel
//! messages.
//!
//! Categories are packed into Blocks (one backend message each, at most
//! [`CATEGORIES_PER_BLOCK`] categories, never longer than the backend limit). New
//! Blocks are spread round-robin across the configured channels. Reads scan each
//! channel's recent history, so anything older than `history_limit` messages is
//! out of reach.

pub mod codec;
pub mod locks;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    backend::{text_len, ChannelBackend, StoredMessage},
    domain::{CategoryId, ChannelId, MessageId, UserId},
    errors::Error,
    timers::TimerRegistry,
    Result,
};

pub use codec::{
    Block, CategoryRecord, FileRecord, FileType, CATEGORIES_PER_BLOCK, MAX_CAPTION_LEN,
};
use locks::BlockLocks;

/// Id and display name, as listed by [`RecordStore::get_categories`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CategorySummary {
    pub id: CategoryId,
    pub name: String,
}

/// Result of a category mutation that did not hit a transport error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// The edited Block would exceed the message limit; nothing was written.
    TooLarge,
    NotFound,
}

#[derive(Clone, Debug)]
pub enum CategoryMutation {
    AddFile(FileRecord),
    SetTimer(u64),
}

/// Storage-agnostic view of the category records.
///
/// Callers that only need categories depend on this rather than on the
/// channel-backed implementation.
#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn create_category(&self, name: &str, created_by: UserId) -> Result<CategoryId>;
    async fn get_category(&self, id: &CategoryId) -> Option<CategoryRecord>;
    async fn list_categories(&self) -> Vec<CategorySummary>;
    async fn mutate_category(
        &self,
        id: &CategoryId,
        mutation: CategoryMutation,
    ) -> Result<MutationOutcome>;
    async fn delete_category(&self, id: &CategoryId) -> Result<bool>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockEdit {
    Edited,
    Deleted,
    Unchanged,
    TooLarge,
    Vanished,
}

struct LocatedBlock {
    channel: ChannelId,
    id: MessageId,
    block: Block,
}

pub struct RecordStore {
    backend: Arc<dyn ChannelBackend>,
    timers: Arc<TimerRegistry>,
    channels: Vec<ChannelId>,
    history_limit: usize,
    next_channel: AtomicUsize,
    locks: BlockLocks,
}

impl RecordStore {
    pub fn new(
        backend: Arc<dyn ChannelBackend>,
        timers: Arc<TimerRegistry>,
        channels: Vec<ChannelId>,
        history_limit: usize,
    ) -> Self {
        Self {
            backend,
            timers,
            channels,
            history_limit,
            next_channel: AtomicUsize::new(0),
            locks: BlockLocks::default(),
        }
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// Warm the timer registry from the channels (global record + TIMER lines).
    pub async fn load_timers(&self) {
        let mut global = None;
        let mut overrides = HashMap::new();

        for channel in &self.channels {
            for msg in self.history(channel).await {
                if global.is_none() {
                    if let Some(seconds) = codec::parse_global_timer(&msg.text) {
                        global = Some(seconds);
                        continue;
                    }
                }
                let Some(block) = Block::parse(&msg.text) else {
                    continue;
                };
                for rec in block.categories() {
                    if let Some(t) = rec.timer_seconds {
                        overrides.entry(rec.id).or_insert(t);
                    }
                }
            }
        }

        if let Some(seconds) = global {
            self.timers.set_global(seconds);
        }
        info!(
            global = self.timers.global(),
            overrides = overrides.len(),
            "timers loaded"
        );
        self.timers.load_overrides(overrides);
    }

    /// Fold one storage message seen outside a scan (e.g. a channel post) into the
    /// timer registry.
    pub fn observe_record(&self, text: &str) {
        if let Some(seconds) = codec::parse_global_timer(text) {
            self.timers.set_global(seconds);
            return;
        }
        let Some(block) = Block::parse(text) else {
            return;
        };
        for rec in block.categories() {
            if let Some(t) = rec.timer_seconds {
                self.timers.set_override(&rec.id, t);
            }
        }
    }

    pub async fn add_category(&self, name: &str, created_by: UserId) -> Result<CategoryId> {
        let blocks = self.scan_blocks().await;

        let mut id = CategoryId::generate();
        while blocks.iter().any(|b| b.block.contains(&id)) {
            id = CategoryId::generate();
        }
        let record = CategoryRecord::new(id.clone(), name, created_by);

        for located in blocks.iter().filter(|b| b.block.has_room()) {
            let rec = record.clone();
            let edit = self
                .edit_block(&located.channel, located.id, move |b| {
                    if !b.has_room() {
                        return false;
                    }
                    b.push_category(&rec);
                    true
                })
                .await?;
            if edit == BlockEdit::Edited {
                info!(
                    category = %id,
                    channel = %located.channel,
                    message_id = located.id.0,
                    "category appended to block"
                );
                return Ok(id);
            }
        }

        let channel = self.rotate_channel()?;
        let body = Block::with_category(&record).render();
        let len = text_len(&body);
        let limit = self.backend.max_message_len();
        if len > limit {
            return Err(Error::Capacity { len, limit });
        }
        let message_id = self.backend.send(&channel, &body).await?;
        info!(
            category = %id,
            channel = %channel,
            message_id = message_id.0,
            "category stored in new block"
        );
        Ok(id)
    }

    /// Every reachable category; the most recent Block wins on duplicate ids.
    pub async fn get_categories(&self) -> Vec<CategorySummary> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for located in self.scan_blocks().await {
            for rec in located.block.categories() {
                if seen.insert(rec.id.clone()) {
                    out.push(CategorySummary {
                        id: rec.id,
                        name: rec.name,
                    });
                }
            }
        }
        out
    }

    pub async fn get_category(&self, id: &CategoryId) -> Option<CategoryRecord> {
        for channel in &self.channels {
            for msg in self.history(channel).await {
                let Some(block) = Block::parse(&msg.text) else {
                    continue;
                };
                if let Some(rec) = block.category(id) {
                    return Some(rec);
                }
            }
        }
        None
    }

    /// Insert `file` first in the category's list.
    ///
    /// A category's files never spill into another Block: once its Block is full
    /// the outcome is [`MutationOutcome::TooLarge`].
    pub async fn add_file(&self, id: &CategoryId, file: &FileRecord) -> Result<MutationOutcome> {
        let outcome = self
            .mutate_located(id, |b| b.insert_file(id, file))
            .await?;
        debug!(category = %id, file_id = %file.file_id, ?outcome, "add file");
        Ok(outcome)
    }

    pub async fn delete_category(&self, id: &CategoryId) -> Result<bool> {
        for located in self.blocks_containing(id).await {
            match self
                .edit_block(&located.channel, located.id, |b| b.remove_category(id))
                .await?
            {
                BlockEdit::Edited | BlockEdit::Deleted => {
                    self.timers.forget(id);
                    info!(category = %id, channel = %located.channel, "category deleted");
                    return Ok(true);
                }
                _ => continue,
            }
        }
        Ok(false)
    }

    /// Retire every global timer record, then write exactly one to the primary channel.
    pub async fn save_global_timer(&self, seconds: u64) -> Result<()> {
        self.timers.set_global(seconds);

        for channel in &self.channels {
            for msg in self.history(channel).await {
                if !codec::is_global_timer(&msg.text) {
                    continue;
                }
                if let Err(e) = self.backend.delete(channel, msg.id).await {
                    warn!(
                        channel = %channel,
                        message_id = msg.id.0,
                        error = %e,
                        "failed to delete old global timer"
                    );
                }
            }
        }

        let primary = self
            .channels
            .first()
            .ok_or_else(|| Error::Config("no storage channels configured".to_string()))?;
        self.backend
            .send(primary, &codec::render_global_timer(seconds))
            .await?;
        info!(seconds, channel = %primary, "global timer saved");
        Ok(())
    }

    pub async fn save_category_timer(&self, id: &CategoryId, seconds: u64) -> Result<MutationOutcome> {
        let outcome = self
            .mutate_located(id, |b| b.set_timer(id, seconds))
            .await?;
        if outcome == MutationOutcome::Applied {
            self.timers.set_override(id, seconds);
            info!(category = %id, seconds, "category timer saved");
        }
        Ok(outcome)
    }

    async fn mutate_located<F>(&self, id: &CategoryId, f: F) -> Result<MutationOutcome>
    where
        F: Fn(&mut Block) -> bool + Send + Sync,
    {
        let mut too_large = false;
        for located in self.blocks_containing(id).await {
            match self.edit_block(&located.channel, located.id, &f).await? {
                BlockEdit::Edited | BlockEdit::Deleted => return Ok(MutationOutcome::Applied),
                BlockEdit::TooLarge => too_large = true,
                BlockEdit::Unchanged | BlockEdit::Vanished => {}
            }
        }
        Ok(if too_large {
            MutationOutcome::TooLarge
        } else {
            MutationOutcome::NotFound
        })
    }

    /// Read-modify-write of one Block under its lock.
    ///
    /// The body is re-read after the lock is taken; `f` returns whether it changed
    /// anything. An emptied Block is deleted rather than edited.
    async fn edit_block<F>(&self, channel: &ChannelId, id: MessageId, f: F) -> Result<BlockEdit>
    where
        F: FnOnce(&mut Block) -> bool + Send,
    {
        let _guard = self.locks.lock_block(channel, id).await;

        let Some(mut block) = self
            .history(channel)
            .await
            .into_iter()
            .find(|m| m.id == id)
            .and_then(|m| Block::parse(&m.text))
        else {
            return Ok(BlockEdit::Vanished);
        };

        if !f(&mut block) {
            return Ok(BlockEdit::Unchanged);
        }

        if block.is_empty() {
            self.backend.delete(channel, id).await?;
            self.locks.forget(channel, id).await;
            return Ok(BlockEdit::Deleted);
        }

        let body = block.render();
        let len = text_len(&body);
        if len > self.backend.max_message_len() {
            debug!(channel = %channel, message_id = id.0, len, "block edit exceeds limit");
            return Ok(BlockEdit::TooLarge);
        }

        self.backend.edit(channel, id, &body).await?;
        Ok(BlockEdit::Edited)
    }

    async fn blocks_containing(&self, id: &CategoryId) -> Vec<LocatedBlock> {
        self.scan_blocks()
            .await
            .into_iter()
            .filter(|b| b.block.contains(id))
            .collect()
    }

    async fn scan_blocks(&self) -> Vec<LocatedBlock> {
        let mut out = Vec::new();
        for channel in &self.channels {
            for msg in self.history(channel).await {
                if let Some(block) = Block::parse(&msg.text) {
                    out.push(LocatedBlock {
                        channel: channel.clone(),
                        id: msg.id,
                        block,
                    });
                }
            }
        }
        out
    }

    /// Failed scans degrade to an empty listing.
    async fn history(&self, channel: &ChannelId) -> Vec<StoredMessage> {
        match self.backend.history(channel, self.history_limit).await {
            Ok(v) => v,
            Err(e) => {
                warn!(channel = %channel, error = %e, "history scan failed");
                Vec::new()
            }
        }
    }

    fn rotate_channel(&self) -> Result<ChannelId> {
        if self.channels.is_empty() {
            return Err(Error::Config("no storage channels configured".to_string()));
        }
        let idx = self.next_channel.fetch_add(1, Ordering::SeqCst) % self.channels.len();
        Ok(self.channels[idx].clone())
    }
}

#[async_trait]
impl CategoryStore for RecordStore {
    async fn create_category(&self, name: &str, created_by: UserId) -> Result<CategoryId> {
        self.add_category(name, created_by).await
    }

    async fn get_category(&self, id: &CategoryId) -> Option<CategoryRecord> {
        RecordStore::get_category(self, id).await
    }

    async fn list_categories(&self) -> Vec<CategorySummary> {
        self.get_categories().await
    }

    async fn mutate_category(
        &self,
        id: &CategoryId,
        mutation: CategoryMutation,
    ) -> Result<MutationOutcome> {
        match mutation {
            CategoryMutation::AddFile(file) => self.add_file(id, &file).await,
            CategoryMutation::SetTimer(seconds) => self.save_category_timer(id, seconds).await,
        }
    }

    async fn delete_category(&self, id: &CategoryId) -> Result<bool> {
        RecordStore::delete_category(self, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, MAX_MESSAGE_LEN};

    fn chan(name: &str) -> ChannelId {
        ChannelId::new(name)
    }

    fn store_with(backend: Arc<MemoryBackend>, channels: &[&str]) -> RecordStore {
        RecordStore::new(
            backend,
            Arc::new(TimerRegistry::new(3600)),
            channels.iter().map(|c| chan(c)).collect(),
            100,
        )
    }

    async fn bodies(backend: &MemoryBackend, channel: &str) -> Vec<String> {
        backend
            .history(&chan(channel), usize::MAX)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect()
    }

    fn doc(id: &str) -> FileRecord {
        FileRecord::new(id, FileType::Document, format!("caption {id}"))
    }

    #[tokio::test]
    async fn created_category_reads_back() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone(), &["@a"]);

        let id = store.add_category("Lectures", UserId(7)).await.unwrap();
        let rec = store.get_category(&id).await.unwrap();
        assert_eq!(rec.name, "Lectures");
        assert_eq!(rec.created_by, UserId(7));
        assert_eq!(rec.timer_seconds, None);
        assert!(rec.files.is_empty());

        assert_eq!(
            store.get_categories().await,
            vec![CategorySummary {
                id: id.clone(),
                name: "Lectures".to_string()
            }]
        );
        assert_eq!(
            bodies(&backend, "@a").await,
            vec![format!(
                "CATEGORIES_BLOCK:\nCATEGORY:{id}\nNAME:Lectures\nCREATED_BY:7\nFILES:"
            )]
        );
    }

    #[tokio::test]
    async fn blocks_hold_at_most_ten_categories() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone(), &["@a"]);

        for i in 0..11 {
            store.add_category(&format!("cat {i}"), UserId(1)).await.unwrap();
        }

        let blocks = bodies(&backend, "@a").await;
        assert_eq!(blocks.len(), 2);
        let counts: Vec<usize> = blocks
            .iter()
            .map(|b| Block::parse(b).unwrap().category_count())
            .collect();
        assert_eq!(counts, vec![1, 10]);
        assert_eq!(store.get_categories().await.len(), 11);
    }

    #[tokio::test]
    async fn new_blocks_rotate_round_robin_across_channels() {
        // Small enough that a second category never fits into an existing Block.
        let backend = Arc::new(MemoryBackend::new(90, usize::MAX));
        let store = store_with(backend.clone(), &["@a", "@b", "@c"]);

        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(store.add_category(&format!("n{i}"), UserId(1)).await.unwrap());
        }

        assert_eq!(backend.len(&chan("@a")), 2);
        assert_eq!(backend.len(&chan("@b")), 1);
        assert_eq!(backend.len(&chan("@c")), 1);
        assert!(bodies(&backend, "@b").await[0].contains(ids[1].as_str()));
        assert!(bodies(&backend, "@c").await[0].contains(ids[2].as_str()));

        for ch in ["@a", "@b", "@c"] {
            for body in bodies(&backend, ch).await {
                assert!(text_len(&body) <= 90);
            }
        }
    }

    #[tokio::test]
    async fn delete_removes_only_the_target_range() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone(), &["@a"]);
        let a = store.add_category("A", UserId(1)).await.unwrap();
        let b = store.add_category("B", UserId(1)).await.unwrap();
        let c = store.add_category("C", UserId(1)).await.unwrap();
        store.add_file(&b, &doc("fb")).await.unwrap();

        assert!(store.delete_category(&b).await.unwrap());
        assert_eq!(
            bodies(&backend, "@a").await,
            vec![format!(
                "CATEGORIES_BLOCK:\nCATEGORY:{a}\nNAME:A\nCREATED_BY:1\nFILES:\nCATEGORY:{c}\nNAME:C\nCREATED_BY:1\nFILES:"
            )]
        );
        assert!(!store.delete_category(&b).await.unwrap());
        assert!(store.get_category(&b).await.is_none());
    }

    #[tokio::test]
    async fn deleting_the_last_category_deletes_the_message() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone(), &["@a"]);
        let id = store.add_category("Only", UserId(1)).await.unwrap();
        store.save_category_timer(&id, 5).await.unwrap();

        assert!(store.delete_category(&id).await.unwrap());
        assert!(backend.is_empty(&chan("@a")));
        assert_eq!(store.timers().override_for(&id), None);
        assert_eq!(store.locks.len().await, 0);
    }

    #[tokio::test]
    async fn files_are_listed_newest_first() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone(), &["@a"]);
        let id = store.add_category("Album", UserId(1)).await.unwrap();

        for f in ["f1", "f2", "f3"] {
            assert_eq!(
                store.add_file(&id, &doc(f)).await.unwrap(),
                MutationOutcome::Applied
            );
        }
        let files: Vec<_> = store
            .get_category(&id)
            .await
            .unwrap()
            .files
            .into_iter()
            .map(|f| f.file_id)
            .collect();
        assert_eq!(files, vec!["f3", "f2", "f1"]);

        assert_eq!(
            store
                .add_file(&CategoryId::from("missing"), &doc("x"))
                .await
                .unwrap(),
            MutationOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn overflowing_file_is_not_applied() {
        let backend = Arc::new(MemoryBackend::new(120, usize::MAX));
        let store = store_with(backend.clone(), &["@a"]);
        let id = store.add_category("Tiny", UserId(1)).await.unwrap();
        let before = bodies(&backend, "@a").await;

        let big = FileRecord::new("BIG", FileType::Video, "x".repeat(200));
        assert_eq!(
            store.add_file(&id, &big).await.unwrap(),
            MutationOutcome::TooLarge
        );
        assert_eq!(bodies(&backend, "@a").await, before);
    }

    #[tokio::test]
    async fn global_timer_has_a_single_live_record() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone(), &["@a", "@b"]);
        // A stale duplicate left in a secondary channel.
        backend
            .send(&chan("@b"), &codec::render_global_timer(99))
            .await
            .unwrap();

        store.save_global_timer(120).await.unwrap();
        store.save_global_timer(300).await.unwrap();

        assert_eq!(
            bodies(&backend, "@a").await,
            vec!["===== GLOBAL TIMER =====\n300".to_string()]
        );
        assert!(backend.is_empty(&chan("@b")));
        assert_eq!(store.timers().global(), 300);

        let fresh = store_with(backend.clone(), &["@a", "@b"]);
        fresh.load_timers().await;
        assert_eq!(fresh.timers().global(), 300);
    }

    #[tokio::test]
    async fn category_timer_override_scenario() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone(), &["@a"]);
        let id = store.add_category("Clips", UserId(1)).await.unwrap();
        assert_eq!(store.timers().resolve(&id), 3600);

        assert_eq!(
            store.save_category_timer(&id, 0).await.unwrap(),
            MutationOutcome::Applied
        );
        assert_eq!(store.get_category(&id).await.unwrap().timer_seconds, Some(0));
        assert_eq!(store.timers().resolve(&id), 0);

        let fresh = store_with(backend.clone(), &["@a"]);
        fresh.load_timers().await;
        assert_eq!(fresh.timers().override_for(&id), Some(0));
        assert_eq!(
            fresh
                .save_category_timer(&CategoryId::from("nope"), 1)
                .await
                .unwrap(),
            MutationOutcome::NotFound
        );
    }

    #[test]
    fn observed_records_update_the_registry() {
        let store = store_with(Arc::new(MemoryBackend::default()), &["@a"]);
        store.observe_record("===== GLOBAL TIMER =====\n45");
        store.observe_record("CATEGORIES_BLOCK:\nCATEGORY:c1\nNAME:x\nCREATED_BY:1\nTIMER:9\nFILES:");
        store.observe_record("just chatter");

        assert_eq!(store.timers().global(), 45);
        assert_eq!(store.timers().resolve(&CategoryId::from("c1")), 9);
    }

    #[tokio::test]
    async fn failed_scans_look_like_not_found() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store_with(backend.clone(), &["@a"]);
        let id = store.add_category("X", UserId(1)).await.unwrap();

        backend.set_offline(true);
        assert!(store.get_category(&id).await.is_none());
        assert!(store.get_categories().await.is_empty());
        assert!(!store.delete_category(&id).await.unwrap());

        backend.set_offline(false);
        assert!(store.get_category(&id).await.is_some());
    }

    #[tokio::test]
    async fn history_depth_bounds_reachability() {
        let backend = Arc::new(MemoryBackend::default());
        let store = RecordStore::new(
            backend.clone(),
            Arc::new(TimerRegistry::new(0)),
            vec![chan("@a")],
            2,
        );
        let old = store.add_category("old", UserId(1)).await.unwrap();
        backend.send(&chan("@a"), "unrelated 1").await.unwrap();
        backend.send(&chan("@a"), "unrelated 2").await.unwrap();

        assert!(store.get_category(&old).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_file_adds_to_one_block_are_not_lost() {
        let backend = Arc::new(MemoryBackend::default());
        let store = Arc::new(store_with(backend.clone(), &["@a"]));
        let id = store.add_category("Busy", UserId(1)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                store.add_file(&id, &doc(&format!("f{i}"))).await
            }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), MutationOutcome::Applied);
        }

        assert_eq!(store.get_category(&id).await.unwrap().files.len(), 16);
    }

    #[tokio::test]
    async fn category_store_trait_routes_mutations() {
        let backend = Arc::new(MemoryBackend::new(MAX_MESSAGE_LEN, usize::MAX));
        let store: Arc<dyn CategoryStore> = Arc::new(store_with(backend, &["@a"]));

        let id = store.create_category("Via trait", UserId(3)).await.unwrap();
        store
            .mutate_category(&id, CategoryMutation::AddFile(doc("f")))
            .await
            .unwrap();
        store
            .mutate_category(&id, CategoryMutation::SetTimer(42))
            .await
            .unwrap();

        let rec = store.get_category(&id).await.unwrap();
        assert_eq!(rec.files.len(), 1);
        assert_eq!(rec.timer_seconds, Some(42));
        assert_eq!(store.list_categories().await.len(), 1);
        assert!(store.delete_category(&id).await.unwrap());
    }
}
