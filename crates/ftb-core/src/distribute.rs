use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    delivery::{expiry_notice, DeliveryRequest, DeliveryScheduler},
    domain::{CategoryId, ChatId, UserId},
    messaging::port::MessagingPort,
    store::CategoryStore,
    timers::TimerRegistry,
    Result,
};

/// Pause after a file that failed to send.
const FAILED_FILE_PAUSE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Unknown category or no files.
    Empty,
    /// Sent with a zero TTL; nothing will be deleted.
    Permanent { sent: usize },
    /// Sent and handed to the scheduler.
    Scheduled { sent: usize, ttl_seconds: u64 },
}

/// Sends a category's files to a recipient and arranges their expiry.
pub struct Distributor {
    store: Arc<dyn CategoryStore>,
    timers: Arc<TimerRegistry>,
    messenger: Arc<dyn MessagingPort>,
    scheduler: DeliveryScheduler,
    file_delay: Duration,
}

impl Distributor {
    pub fn new(
        store: Arc<dyn CategoryStore>,
        timers: Arc<TimerRegistry>,
        messenger: Arc<dyn MessagingPort>,
        scheduler: DeliveryScheduler,
        file_delay: Duration,
    ) -> Self {
        Self {
            store,
            timers,
            messenger,
            scheduler,
            file_delay,
        }
    }

    pub fn scheduler(&self) -> &DeliveryScheduler {
        &self.scheduler
    }

    pub async fn deliver(
        &self,
        chat_id: ChatId,
        recipient: UserId,
        id: &CategoryId,
    ) -> Result<DeliveryOutcome> {
        let Some(category) = self.store.get_category(id).await else {
            return Ok(DeliveryOutcome::Empty);
        };
        if category.files.is_empty() {
            return Ok(DeliveryOutcome::Empty);
        }

        self.messenger
            .send_text(chat_id, &format!("📤 Sending the files of '{}'...", category.name))
            .await?;

        let mut messages = Vec::with_capacity(category.files.len());
        for file in &category.files {
            match self
                .messenger
                .send_file(chat_id, file, &file.delivery_caption())
                .await
            {
                Ok(msg) => {
                    messages.push(msg.message_id);
                    sleep(self.file_delay).await;
                }
                Err(e) => {
                    warn!(
                        category = %id,
                        file_id = %file.file_id,
                        error = %e,
                        "file send failed"
                    );
                    sleep(FAILED_FILE_PAUSE).await;
                }
            }
        }
        let sent = messages.len();

        let ttl_seconds = self.timers.resolve(id);
        if ttl_seconds == 0 {
            self.messenger
                .send_text(chat_id, "✅ Files sent successfully.")
                .await?;
            info!(category = %id, recipient = recipient.0, sent, "delivered (permanent)");
            return Ok(DeliveryOutcome::Permanent { sent });
        }

        let status = self
            .messenger
            .send_text(chat_id, &expiry_notice(ttl_seconds))
            .await?;
        self.scheduler
            .start(DeliveryRequest {
                recipient,
                chat_id,
                messages,
                status: status.message_id,
                ttl_seconds,
            })
            .await;
        info!(
            category = %id,
            recipient = recipient.0,
            sent,
            ttl_seconds,
            "delivered (expiring)"
        );
        Ok(DeliveryOutcome::Scheduled { sent, ttl_seconds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::MemoryBackend,
        store::{FileRecord, FileType, RecordStore},
        testing::FakeMessenger,
    };

    struct Fixture {
        store: Arc<RecordStore>,
        fake: Arc<FakeMessenger>,
        distributor: Distributor,
    }

    fn fixture(global: u64) -> Fixture {
        let timers = Arc::new(TimerRegistry::new(global));
        let store = Arc::new(RecordStore::new(
            Arc::new(MemoryBackend::default()),
            timers.clone(),
            vec![crate::domain::ChannelId::new("@store")],
            100,
        ));
        let fake = Arc::new(FakeMessenger::default());
        let scheduler = DeliveryScheduler::new(fake.clone(), 10);
        let distributor = Distributor::new(
            store.clone(),
            timers,
            fake.clone(),
            scheduler,
            Duration::from_millis(500),
        );
        Fixture {
            store,
            fake,
            distributor,
        }
    }

    async fn category_with_files(store: &RecordStore, files: &[&str]) -> CategoryId {
        let id = store.add_category("Course", UserId(1)).await.unwrap();
        for f in files {
            store
                .add_file(&id, &FileRecord::new(*f, FileType::Document, format!("{f} caption")))
                .await
                .unwrap();
        }
        id
    }

    #[tokio::test(start_paused = true)]
    async fn expiring_delivery_is_tracked_and_cleaned_up() {
        let fx = fixture(30);
        let id = category_with_files(&fx.store, &["a", "b"]).await;

        let outcome = fx
            .distributor
            .deliver(ChatId(9), UserId(9), &id)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Scheduled {
                sent: 2,
                ttl_seconds: 30
            }
        );

        let files: Vec<String> = fx.fake.sent_files().into_iter().map(|(_, f, _)| f).collect();
        assert_eq!(files, vec!["b", "a"]);
        let texts = fx.fake.sent_texts();
        assert_eq!(texts.last().unwrap(), &expiry_notice(30));
        assert!(fx.distributor.scheduler().status(UserId(9)).await.is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let status_msg = fx.fake.sent().last().unwrap().0;
        let deleted = fx.fake.deletes();
        assert_eq!(deleted.len(), 3);
        assert_eq!(deleted.last().copied(), Some(status_msg));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_override_delivers_permanently() {
        let fx = fixture(3600);
        let id = category_with_files(&fx.store, &["a"]).await;
        assert_eq!(fx.store.timers().resolve(&id), 3600);
        fx.store.save_category_timer(&id, 0).await.unwrap();

        let outcome = fx
            .distributor
            .deliver(ChatId(5), UserId(5), &id)
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Permanent { sent: 1 });
        assert_eq!(fx.distributor.scheduler().active_count().await, 0);
        assert_eq!(
            fx.fake.sent_texts().last().map(String::as_str),
            Some("✅ Files sent successfully.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_or_empty_categories_send_nothing() {
        let fx = fixture(60);
        let empty = category_with_files(&fx.store, &[]).await;

        for id in [empty, CategoryId::from("deadbeef")] {
            let outcome = fx
                .distributor
                .deliver(ChatId(1), UserId(1), &id)
                .await
                .unwrap();
            assert_eq!(outcome, DeliveryOutcome::Empty);
        }
        assert!(fx.fake.sent().is_empty());
        assert!(fx.fake.sent_files().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn captions_are_truncated_for_delivery() {
        let fx = fixture(0);
        let id = fx.store.add_category("Long", UserId(1)).await.unwrap();
        let caption = "c".repeat(1500);
        fx.store
            .add_file(&id, &FileRecord::new("f", FileType::Photo, caption))
            .await
            .unwrap();

        fx.distributor
            .deliver(ChatId(1), UserId(1), &id)
            .await
            .unwrap();
        let (_, _, sent_caption) = fx.fake.sent_files().remove(0);
        assert_eq!(sent_caption.chars().count(), 1024);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_files_are_skipped() {
        let fx = fixture(0);
        let id = category_with_files(&fx.store, &["a", "b"]).await;
        fx.fake.fail_file_sends(true);

        let outcome = fx
            .distributor
            .deliver(ChatId(1), UserId(1), &id)
            .await
            .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Permanent { sent: 0 });
    }
}
