//! Per-admin conversation state between commands.

use std::{collections::HashMap, sync::Mutex};

use tracing::warn;

use crate::{
    domain::{CategoryId, UserId},
    store::{CategoryMutation, CategoryStore, FileRecord, MutationOutcome},
    Result,
};

/// Files collected between `/upload` and `/finish_upload`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingUpload {
    pub category: CategoryId,
    pub files: Vec<FileRecord>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub added: usize,
    /// Files that no longer fit into the category's Block.
    pub rejected: usize,
    pub category_missing: bool,
}

impl PendingUpload {
    pub fn new(category: CategoryId) -> Self {
        Self {
            category,
            files: Vec::new(),
        }
    }

    /// Persist the buffered files in arrival order.
    pub async fn commit(&self, store: &dyn CategoryStore) -> Result<UploadReport> {
        let mut report = UploadReport::default();
        for file in &self.files {
            match store
                .mutate_category(&self.category, CategoryMutation::AddFile(file.clone()))
                .await?
            {
                MutationOutcome::Applied => report.added += 1,
                MutationOutcome::TooLarge => {
                    warn!(category = %self.category, file_id = %file.file_id, "file does not fit");
                    report.rejected += 1;
                }
                MutationOutcome::NotFound => {
                    report.category_missing = true;
                    break;
                }
            }
        }
        Ok(report)
    }
}

#[derive(Default)]
pub struct PendingActions {
    uploads: Mutex<HashMap<UserId, PendingUpload>>,
    timer_inputs: Mutex<HashMap<UserId, CategoryId>>,
}

impl PendingActions {
    /// Start collecting files for `category`; an unfinished upload is discarded.
    pub fn begin_upload(&self, user: UserId, category: CategoryId) {
        let mut uploads = self.uploads.lock().unwrap_or_else(|e| e.into_inner());
        uploads.insert(user, PendingUpload::new(category));
    }

    /// Buffer a file; returns the new count, or `None` without an active upload.
    pub fn push_file(&self, user: UserId, file: FileRecord) -> Option<usize> {
        let mut uploads = self.uploads.lock().unwrap_or_else(|e| e.into_inner());
        let upload = uploads.get_mut(&user)?;
        upload.files.push(file);
        Some(upload.files.len())
    }

    pub fn upload_in_progress(&self, user: UserId) -> bool {
        let uploads = self.uploads.lock().unwrap_or_else(|e| e.into_inner());
        uploads.contains_key(&user)
    }

    pub fn take_upload(&self, user: UserId) -> Option<PendingUpload> {
        let mut uploads = self.uploads.lock().unwrap_or_else(|e| e.into_inner());
        uploads.remove(&user)
    }

    pub fn await_timer(&self, user: UserId, category: CategoryId) {
        let mut inputs = self.timer_inputs.lock().unwrap_or_else(|e| e.into_inner());
        inputs.insert(user, category);
    }

    pub fn timer_target(&self, user: UserId) -> Option<CategoryId> {
        let inputs = self.timer_inputs.lock().unwrap_or_else(|e| e.into_inner());
        inputs.get(&user).cloned()
    }

    pub fn take_timer(&self, user: UserId) -> Option<CategoryId> {
        let mut inputs = self.timer_inputs.lock().unwrap_or_else(|e| e.into_inner());
        inputs.remove(&user)
    }

    /// Drop everything pending for `user`; true if anything was pending.
    pub fn clear(&self, user: UserId) -> bool {
        let upload = self.take_upload(user).is_some();
        let timer = self.take_timer(user).is_some();
        upload || timer
    }
}
