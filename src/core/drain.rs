use crate::core::processor::{Disposition, RequestProcessor, RequestState};
use crate::domain::model::BloodRequest;
use crate::domain::ports::{Delivery, Geocoder, InventoryStore, MessageQueue, Notifier};
use crate::utils::error::Result;
use crate::utils::timeout::with_timeout;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NotificationTemplate {
    pub subject: String,
    pub body: String,
}

impl Default for NotificationTemplate {
    fn default() -> Self {
        Self {
            subject: "Blood Request".to_string(),
            body: "The requested blood type found".to_string(),
        }
    }
}

/// Counters for one drain run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub fetched: u32,
    pub fulfilled: u32,
    pub requeued: u32,
    pub expired: u32,
    pub duplicates: u32,
    pub failed: u32,
    pub malformed: u32,
    pub returned: u32,
}

impl DrainReport {
    fn record(&mut self, state: RequestState) {
        match state {
            RequestState::Fulfilled => self.fulfilled += 1,
            RequestState::Retrying => self.requeued += 1,
            RequestState::Expired => self.expired += 1,
            RequestState::Duplicate => self.duplicates += 1,
            _ => self.failed += 1,
        }
    }
}

pub struct QueueDrainer<Q, S, G, N>
where
    Q: MessageQueue,
    S: InventoryStore,
    G: Geocoder,
    N: Notifier,
{
    queue: Q,
    processor: RequestProcessor<S, G>,
    notifier: N,
    template: NotificationTemplate,
    call_timeout: Duration,
}

impl<Q, S, G, N> QueueDrainer<Q, S, G, N>
where
    Q: MessageQueue,
    S: InventoryStore,
    G: Geocoder,
    N: Notifier,
{
    pub fn new(
        queue: Q,
        processor: RequestProcessor<S, G>,
        notifier: N,
        template: NotificationTemplate,
        call_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            notifier,
            template,
            call_timeout,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Processes every message that was waiting when the run started, one at
    /// a time. Messages requeued during the run wait for the next one.
    pub async fn drain(&self) -> Result<DrainReport> {
        let budget = with_timeout("queue depth", self.call_timeout, self.queue.depth()).await?;
        tracing::info!(pending = budget, "Starting queue drain");

        let mut report = DrainReport::default();
        for _ in 0..budget {
            let delivery = match with_timeout("queue fetch", self.call_timeout, self.queue.fetch()).await? {
                Some(delivery) => delivery,
                None => break,
            };
            report.fetched += 1;
            self.handle(delivery, &mut report).await?;
        }

        tracing::info!(
            fetched = report.fetched,
            fulfilled = report.fulfilled,
            requeued = report.requeued,
            expired = report.expired,
            duplicates = report.duplicates,
            failed = report.failed,
            malformed = report.malformed,
            "Queue drain finished"
        );
        Ok(report)
    }

    async fn handle(&self, delivery: Delivery, report: &mut DrainReport) -> Result<()> {
        let request = match BloodRequest::from_json(&delivery.payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(tag = delivery.tag, error = %e, "Malformed blood request, dropping");
                report.malformed += 1;
                return self.acknowledge(delivery.tag).await;
            }
        };
        tracing::info!(
            tag = delivery.tag,
            city = %request.selected_city,
            town = %request.selected_town,
            blood_type = %request.blood_type,
            units = request.units,
            duration = request.duration,
            "Received blood request"
        );

        let resolution = self.processor.process(&request).await;
        report.record(resolution.state);

        match resolution.disposition {
            Disposition::Acknowledge => {
                match resolution.state {
                    RequestState::Duplicate => tracing::info!("Message already processed, deleting from the queue"),
                    RequestState::Expired => {
                        tracing::info!("Blood search unsuccessful and no retries left, deleting from the queue")
                    }
                    state => tracing::warn!(%state, "Dropping blood request"),
                }
                self.acknowledge(delivery.tag).await
            }
            Disposition::NotifyAndAcknowledge(done) => {
                tracing::info!(email = %done.email, "Blood search successful");
                self.notify(&done.email).await;
                self.acknowledge(delivery.tag).await
            }
            Disposition::Requeue(next) => {
                tracing::info!(remaining = next.duration, "Blood search unsuccessful, re-queueing");
                match self.republish(&next).await {
                    Ok(()) => self.acknowledge(delivery.tag).await,
                    Err(e) => {
                        // The original message goes back unchanged.
                        tracing::error!(error = %e, "Could not re-queue request, returning original to the broker");
                        report.requeued -= 1;
                        report.returned += 1;
                        with_timeout("queue requeue", self.call_timeout, self.queue.requeue(delivery.tag)).await
                    }
                }
            }
        }
    }

    async fn republish(&self, request: &BloodRequest) -> Result<()> {
        let payload = request.to_json()?;
        with_timeout("queue publish", self.call_timeout, self.queue.publish(&payload)).await
    }

    async fn acknowledge(&self, tag: u64) -> Result<()> {
        with_timeout("queue ack", self.call_timeout, self.queue.ack(tag)).await
    }

    /// Failures are logged, never propagated.
    async fn notify(&self, to: &str) {
        let sent = with_timeout(
            "notify",
            self.call_timeout,
            self.notifier.send(to, &self.template.subject, &self.template.body),
        )
        .await;
        match sent {
            Ok(()) => tracing::info!(to, "Notification sent"),
            Err(e) => tracing::error!(to, error = %e, "Error sending notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{FixedGeocoder, InMemoryQueue, InMemoryStore, RecordingNotifier};
    use crate::core::geocoder::BranchLocator;
    use crate::core::processor::DEFAULT_MAX_DISTANCE_KM;
    use crate::domain::model::{Branch, Coordinate, Donor};
    use crate::utils::error::BloodSearchError;
    use async_trait::async_trait;

    type Drainer<Q> = QueueDrainer<Q, InMemoryStore, FixedGeocoder, RecordingNotifier>;

    fn request(duration: u32) -> BloodRequest {
        BloodRequest {
            selected_city: "A".to_string(),
            selected_town: "R".to_string(),
            blood_type: "O+".to_string(),
            units: 4,
            duration,
            email: "requester@example.com".to_string(),
            processed: false,
        }
    }

    fn store_with_units(units: i64) -> InMemoryStore {
        InMemoryStore::new(
            vec![Branch {
                id: 1,
                city: "A".to_string(),
                town: "X".to_string(),
            }],
            vec![Donor {
                id: 1,
                branch_id: 1,
                blood_type: "O+".to_string(),
                units_available: units,
            }],
        )
    }

    fn drainer<Q: MessageQueue>(queue: Q, store: InMemoryStore, notifier: RecordingNotifier) -> Drainer<Q> {
        let geocoder = FixedGeocoder::new(vec![
            ("A", "R", Coordinate::new(38.0, 27.0)),
            ("A", "X", Coordinate::new(38.09, 27.0)),
        ]);
        let processor = RequestProcessor::new(
            store,
            BranchLocator::new(geocoder),
            DEFAULT_MAX_DISTANCE_KM,
            Duration::from_secs(5),
        );
        QueueDrainer::new(
            queue,
            processor,
            notifier,
            NotificationTemplate::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_fulfilled_request_notifies_and_acknowledges() {
        let queue = InMemoryQueue::new();
        queue.seed(request(3).to_json().unwrap()).await;
        let notifier = RecordingNotifier::new();
        let store = store_with_units(10);

        let report = drainer(queue.clone(), store.clone(), notifier.clone()).drain().await.unwrap();

        assert_eq!(report.fulfilled, 1);
        assert_eq!(queue.acked_count(), 1);
        assert_eq!(queue.published_count(), 0);
        assert_eq!(queue.unacked_count().await, 0);
        assert_eq!(store.units_of(1).await, Some(6));

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "requester@example.com");
        assert_eq!(sent[0].subject, "Blood Request");
    }

    #[tokio::test]
    async fn test_processed_message_acknowledged_without_side_effects() {
        let queue = InMemoryQueue::new();
        let payload = serde_json::json!({
            "selectedCity": "A",
            "selectedTown": "R",
            "bloodType": "O+",
            "units": 4,
            "duration": 3,
            "email": "requester@example.com",
            "processed": true
        });
        queue.seed(serde_json::to_vec(&payload).unwrap()).await;
        let notifier = RecordingNotifier::new();
        let store = store_with_units(10);

        let report = drainer(queue.clone(), store.clone(), notifier.clone()).drain().await.unwrap();

        assert_eq!(report.duplicates, 1);
        assert_eq!(queue.acked_count(), 1);
        assert_eq!(queue.published_count(), 0);
        assert!(notifier.sent().await.is_empty());
        assert_eq!(store.units_of(1).await, Some(10));
        assert!(store.donor_queries().await.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_dropped_not_republished() {
        let queue = InMemoryQueue::new();
        queue.seed(request(0).to_json().unwrap()).await;
        let notifier = RecordingNotifier::new();

        let report = drainer(queue.clone(), store_with_units(1), notifier.clone()).drain().await.unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(queue.acked_count(), 1);
        assert_eq!(queue.published_count(), 0);
        assert!(queue.ready_messages().await.is_empty());
        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_request_republished_once_with_decremented_budget() {
        let queue = InMemoryQueue::new();
        let original = request(3);
        queue.seed(original.to_json().unwrap()).await;

        let report = drainer(queue.clone(), store_with_units(1), RecordingNotifier::new())
            .drain()
            .await
            .unwrap();

        assert_eq!(report.requeued, 1);
        assert_eq!(report.fetched, 1);
        assert_eq!(queue.acked_count(), 1);
        assert_eq!(queue.published_count(), 1);

        let ready = queue.ready_messages().await;
        assert_eq!(ready.len(), 1);
        let republished = BloodRequest::from_json(&ready[0]).unwrap();
        assert_eq!(
            republished,
            BloodRequest {
                duration: 2,
                ..original
            }
        );
    }

    #[tokio::test]
    async fn test_successive_runs_count_budget_down_to_expiry() {
        let queue = InMemoryQueue::new();
        queue.seed(request(2).to_json().unwrap()).await;
        let drainer = drainer(queue.clone(), store_with_units(0), RecordingNotifier::new());

        let mut states = Vec::new();
        for _ in 0..4 {
            let report = drainer.drain().await.unwrap();
            states.push((report.requeued, report.expired));
        }

        assert_eq!(states, vec![(1, 0), (1, 0), (0, 1), (0, 0)]);
        assert_eq!(queue.published_count(), 2);
        assert!(queue.ready_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_still_acknowledges() {
        let queue = InMemoryQueue::new();
        queue.seed(request(3).to_json().unwrap()).await;

        let report = drainer(queue.clone(), store_with_units(10), RecordingNotifier::failing())
            .drain()
            .await
            .unwrap();

        assert_eq!(report.fulfilled, 1);
        assert_eq!(queue.acked_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let queue = InMemoryQueue::new();
        queue.seed(b"not json".to_vec()).await;
        queue.seed(request(3).to_json().unwrap()).await;

        let report = drainer(queue.clone(), store_with_units(10), RecordingNotifier::new())
            .drain()
            .await
            .unwrap();

        assert_eq!(report.malformed, 1);
        assert_eq!(report.fulfilled, 1);
        assert_eq!(queue.acked_count(), 2);
    }

    /// Accepts everything except publishes.
    #[derive(Clone, Default)]
    struct NoPublishQueue {
        inner: InMemoryQueue,
    }

    #[async_trait]
    impl MessageQueue for NoPublishQueue {
        async fn depth(&self) -> Result<u32> {
            self.inner.depth().await
        }
        async fn fetch(&self) -> Result<Option<Delivery>> {
            self.inner.fetch().await
        }
        async fn ack(&self, tag: u64) -> Result<()> {
            self.inner.ack(tag).await
        }
        async fn requeue(&self, tag: u64) -> Result<()> {
            self.inner.requeue(tag).await
        }
        async fn publish(&self, _payload: &[u8]) -> Result<()> {
            Err(BloodSearchError::QueueError {
                message: "channel closed".to_string(),
            })
        }
        async fn purge(&self) -> Result<u32> {
            self.inner.purge().await
        }
    }

    #[tokio::test]
    async fn test_failed_republish_returns_original_to_queue() {
        let queue = NoPublishQueue::default();
        let original = request(3);
        queue.inner.seed(original.to_json().unwrap()).await;

        let report = drainer(queue.clone(), store_with_units(1), RecordingNotifier::new())
            .drain()
            .await
            .unwrap();

        assert_eq!(report.returned, 1);
        assert_eq!(report.requeued, 0);
        assert_eq!(queue.inner.acked_count(), 0);
        let ready = queue.inner.ready_messages().await;
        assert_eq!(BloodRequest::from_json(&ready[0]).unwrap(), original);
    }
}
