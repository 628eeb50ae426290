//! AlarmDispatcher - Fire-and-forget Alarm Notifications
//!
//! ## Responsibilities
//!
//! - Non-blocking hand-off of (frame, message) from the perception thread
//! - Bounded queue: excess alarms are dropped and counted, never buffered without limit
//! - Dedicated worker that uploads the frame and notifies the external endpoint
//! - Best-effort delivery: failures are logged, never retried, never surfaced
//!
//! No ordering guarantee between concurrently delivered alarms.

use crate::annotate::encode_png;
use crate::error::{Error, Result};
use crate::models::Frame;
use crate::storage::ImageStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default queue capacity (alarms waiting for the worker)
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Default cap on concurrently running deliveries
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// One alarm, owning an immutable copy of the frame
#[derive(Debug, Clone)]
pub struct AlarmEvent {
    pub alarm_id: Uuid,
    pub frame: Frame,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Result of a `fire` call, for callers that care (most don't)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Handed off to the worker queue
    Queued,
    /// Queue full, alarm discarded
    Dropped,
    /// Worker gone (shutdown)
    Closed,
}

/// Producer side, shared by every component that raises alarms
pub struct AlarmDispatcher {
    tx: mpsc::Sender<AlarmEvent>,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl AlarmDispatcher {
    /// Create a dispatcher and the receiving end for its worker
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AlarmEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                queued: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Hand off an alarm and return immediately
    pub fn fire(&self, frame: &Frame, message: impl Into<String>) -> FireOutcome {
        let event = AlarmEvent {
            alarm_id: Uuid::new_v4(),
            frame: frame.clone(),
            message: message.into(),
            raised_at: Utc::now(),
        };
        let alarm_id = event.alarm_id;

        match self.tx.try_send(event) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(alarm_id = %alarm_id, "Alarm queued");
                FireOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    alarm_id = %alarm_id,
                    message = %event.message,
                    dropped_total = dropped,
                    "Alarm queue full, dropping alarm"
                );
                FireOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(alarm_id = %alarm_id, "Alarm worker stopped, alarm discarded");
                FireOutcome::Closed
            }
        }
    }

    pub fn queued_count(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Notification endpoint
#[async_trait]
pub trait AlarmSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &AlarmEvent, image_url: Option<&str>) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct TriggerAlarmBody<'a> {
    image_url: Option<&'a str>,
    msg: &'a str,
}

/// POSTs `{image_url, msg}` to `<base_url>/triggerAlarm`
pub struct LineAlarmSink {
    client: reqwest::Client,
    base_url: String,
}

impl LineAlarmSink {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AlarmSink for LineAlarmSink {
    fn name(&self) -> &str {
        "line"
    }

    async fn deliver(&self, event: &AlarmEvent, image_url: Option<&str>) -> Result<()> {
        let url = format!("{}/triggerAlarm", self.base_url);
        let body = TriggerAlarmBody {
            image_url,
            msg: &event.message,
        };

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Alarm(format!(
                "alarm endpoint returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Consumer side: drains the queue and delivers alarms
pub struct AlarmWorker {
    rx: mpsc::Receiver<AlarmEvent>,
    storage: Arc<dyn ImageStorage>,
    sink: Option<Arc<dyn AlarmSink>>,
    in_flight: Arc<Semaphore>,
}

impl AlarmWorker {
    /// `sink = None` means alarms are disabled: they are logged and discarded
    pub fn new(
        rx: mpsc::Receiver<AlarmEvent>,
        storage: Arc<dyn ImageStorage>,
        sink: Option<Arc<dyn AlarmSink>>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            rx,
            storage,
            sink,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::info!(
            enabled = self.sink.is_some(),
            "Alarm worker started"
        );

        while let Some(event) = self.rx.recv().await {
            tracing::info!(
                alarm_id = %event.alarm_id,
                message = %event.message,
                "Alarm triggered"
            );

            let Some(sink) = self.sink.clone() else {
                continue;
            };

            let permit = match self.in_flight.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let storage = self.storage.clone();

            tokio::spawn(async move {
                let _permit = permit;
                Self::deliver(storage.as_ref(), sink.as_ref(), &event).await;
            });
        }

        tracing::info!("Alarm worker stopped");
    }

    async fn deliver(storage: &dyn ImageStorage, sink: &dyn AlarmSink, event: &AlarmEvent) {
        let image_url = match encode_png(&event.frame) {
            Ok(png) => match storage.upload(png).await {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(
                        alarm_id = %event.alarm_id,
                        storage = storage.name(),
                        error = %e,
                        "Alarm image upload failed"
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!(alarm_id = %event.alarm_id, error = %e, "Alarm image encode failed");
                None
            }
        };

        match sink.deliver(event, image_url.as_deref()).await {
            Ok(()) => tracing::info!(
                alarm_id = %event.alarm_id,
                sink = sink.name(),
                image_url = ?image_url,
                "Alarm delivered"
            ),
            Err(e) => tracing::error!(
                alarm_id = %event.alarm_id,
                sink = sink.name(),
                error = %e,
                "Alarm delivery failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct MemoryStorage;

    #[async_trait]
    impl ImageStorage for MemoryStorage {
        fn name(&self) -> &str {
            "memory"
        }

        async fn upload(&self, png: Vec<u8>) -> Result<String> {
            Ok(format!("mem://{}", png.len()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(String, Option<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl AlarmSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, event: &AlarmEvent, image_url: Option<&str>) -> Result<()> {
            self.delivered
                .lock()
                .push((event.message.clone(), image_url.map(str::to_string)));
            if self.fail {
                return Err(Error::Alarm("endpoint down".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fire_never_blocks_and_drops_when_full() {
        let (dispatcher, _rx) = AlarmDispatcher::new(2);
        let frame = Frame::new(4, 4);

        assert_eq!(dispatcher.fire(&frame, "a"), FireOutcome::Queued);
        assert_eq!(dispatcher.fire(&frame, "b"), FireOutcome::Queued);
        assert_eq!(dispatcher.fire(&frame, "c"), FireOutcome::Dropped);

        assert_eq!(dispatcher.queued_count(), 2);
        assert_eq!(dispatcher.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_fire_after_worker_gone() {
        let (dispatcher, rx) = AlarmDispatcher::new(2);
        drop(rx);
        assert_eq!(dispatcher.fire(&Frame::new(1, 1), "x"), FireOutcome::Closed);
    }

    #[tokio::test]
    async fn test_worker_delivers_with_uploaded_url() {
        let (dispatcher, rx) = AlarmDispatcher::new(4);
        let sink = Arc::new(RecordingSink::default());
        let worker = AlarmWorker::new(rx, Arc::new(MemoryStorage), Some(sink.clone()), 2);
        let handle = worker.spawn();

        dispatcher.fire(&Frame::new(8, 8), "Alice");
        drop(dispatcher);
        handle.await.unwrap();

        // deliveries run on detached tasks; give them a moment
        for _ in 0..50 {
            if !sink.delivered.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let delivered = sink.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "Alice");
        assert!(delivered[0].1.as_deref().unwrap().starts_with("mem://"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let (dispatcher, rx) = AlarmDispatcher::new(4);
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let handle = AlarmWorker::new(rx, Arc::new(MemoryStorage), Some(sink.clone()), 1).spawn();

        dispatcher.fire(&Frame::new(2, 2), "one");
        dispatcher.fire(&Frame::new(2, 2), "two");
        drop(dispatcher);
        handle.await.unwrap();

        for _ in 0..50 {
            if sink.delivered.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.delivered.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_worker_discards() {
        let (dispatcher, rx) = AlarmDispatcher::new(4);
        let handle = AlarmWorker::new(rx, Arc::new(MemoryStorage), None, 1).spawn();
        assert_eq!(dispatcher.fire(&Frame::new(2, 2), "quiet"), FireOutcome::Queued);
        drop(dispatcher);
        handle.await.unwrap();
    }
}
