//! Long-polling loop feeding inbound messages to an [`IngestBot`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bot::IngestBot;
use crate::error::AppError;
use crate::traits::{
    AttributeExtractor, Fetcher, ListingStore, Messenger, ObjectStorage, UpdateSource,
};

/// Polls an [`UpdateSource`] and handles each message on its own task.
pub struct BotRunner<X, G, F, L, M, U>
where
    X: AttributeExtractor,
    G: ObjectStorage,
    F: Fetcher,
    L: ListingStore,
    M: Messenger,
    U: UpdateSource,
{
    bot: IngestBot<X, G, F, L, M>,
    source: U,
    /// Pause after a failed poll before trying again.
    error_backoff: Duration,
}

impl<X, G, F, L, M, U> BotRunner<X, G, F, L, M, U>
where
    X: AttributeExtractor + 'static,
    G: ObjectStorage + 'static,
    F: Fetcher + 'static,
    L: ListingStore + 'static,
    M: Messenger + 'static,
    U: UpdateSource,
{
    pub fn new(bot: IngestBot<X, G, F, L, M>, source: U) -> Self {
        Self {
            bot,
            source,
            error_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Run until `cancel_token` fires, then wait for in-flight messages.
    ///
    /// Messages already handed to a task are allowed to finish; a draft
    /// whose assembly is interrupted by process exit stays behind as is.
    pub async fn run(&self, cancel_token: CancellationToken) -> Result<(), AppError> {
        let tracker = TaskTracker::new();
        let mut offset: i64 = 0;
        tracing::info!("Bot runner started");

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            let polled = tokio::select! {
                () = cancel_token.cancelled() => break,
                polled = self.source.poll(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    tracing::debug!(count = updates.len(), offset, "Polled updates");
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let Some(message) = update.message else {
                            continue;
                        };
                        let bot = self.bot.clone();
                        tracker.spawn(async move {
                            if let Err(e) = bot.handle(&message).await {
                                tracing::error!(
                                    operator = %message.operator,
                                    error = %e,
                                    "Failed to handle message"
                                );
                            }
                        });
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to poll updates");
                    tokio::select! {
                        () = tokio::time::sleep(self.error_backoff) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        tracker.close();
        tracing::info!(in_flight = tracker.len(), "Bot runner stopping");
        tracker.wait().await;
        tracing::info!("Bot runner stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::assemble::ListingAssembler;
    use crate::config::IngestConfig;
    use crate::media::MediaAcquirer;
    use crate::models::{InboundUpdate, OperatorId, RawExtraction};
    use crate::testutil::*;

    fn bot(
        store: MemoryListingStore,
        messenger: MockMessenger,
    ) -> IngestBot<MockExtractor, MockStorage, MockFetcher, MemoryListingStore, MockMessenger> {
        let assembler = ListingAssembler::new(
            MockExtractor::new(RawExtraction {
                name: "Yamaha MT-07".into(),
                year: Some(2020),
                ..Default::default()
            }),
            MediaAcquirer::new(MockStorage::by_url(), MockFetcher::new("")),
            store,
            "RUB",
        );
        let config = IngestConfig {
            admin_ids: [OperatorId(1)].into_iter().collect(),
            ..Default::default()
        };
        IngestBot::new(assembler, messenger, Arc::new(config))
    }

    #[tokio::test(start_paused = true)]
    async fn handles_every_message_and_advances_offset() {
        let cancel = CancellationToken::new();
        let messenger = MockMessenger::new();
        let source = MockUpdateSource::new(vec![
            Ok(vec![
                text_update(10, 1, "/start"),
                text_update(11, 2, "/start"),
                InboundUpdate {
                    update_id: 12,
                    message: None,
                },
            ]),
            Err(AppError::NetworkError("connection reset".into())),
            Ok(vec![text_update(13, 2, "hello")]),
        ])
        .cancel_when_drained(cancel.clone());
        let runner = BotRunner::new(bot(MemoryListingStore::new(), messenger.clone()), source.clone())
            .with_error_backoff(Duration::from_millis(10));

        runner.run(cancel).await.unwrap();

        assert_eq!(messenger.texts().len(), 3);
        assert_eq!(*source.offsets.lock().unwrap(), vec![0, 13, 13, 14]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_assembly() {
        let cancel = CancellationToken::new();
        let store = MemoryListingStore::new();
        let messenger = MockMessenger::new();
        let source = MockUpdateSource::new(vec![Ok(vec![text_update(
            1,
            1,
            "https://jmmoto.ru/moto/7",
        )])])
        .cancel_when_drained(cancel.clone());
        let runner = BotRunner::new(bot(store.clone(), messenger.clone()), source);

        runner.run(cancel).await.unwrap();

        assert_eq!(store.listings().len(), 1);
        assert!(messenger.last_text().unwrap().contains("Yamaha MT-07 2020"));
    }

    #[tokio::test]
    async fn cancelled_runner_does_not_poll() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = MockUpdateSource::new(Vec::new());
        let runner = BotRunner::new(bot(MemoryListingStore::new(), MockMessenger::new()), source.clone());

        runner.run(cancel).await.unwrap();

        assert!(source.offsets.lock().unwrap().is_empty());
    }
}
