//! Fire-and-forget click recording
//!
//! Redirect handlers enqueue a `ClickJob` with `try_send` and return at once.
//! A dispatcher task drains the bounded queue and runs at most `concurrency`
//! jobs at a time; each job resolves geolocation, inserts the click event and
//! bumps the link counter. Failures are logged and dropped, never retried.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, error, info, warn};

use crate::analytics::geo::GeoResolver;
use crate::analytics::models::ClickJob;
use crate::models::NewClick;
use crate::storage::Storage;

enum RecorderMessage {
    Record(ClickJob),
    /// Stop accepting work, finish everything queued, then acknowledge
    Shutdown(oneshot::Sender<()>),
}

struct ClickDispatcher {
    receiver: mpsc::Receiver<RecorderMessage>,
    storage: Arc<dyn Storage>,
    geo: GeoResolver,
    permits: Arc<Semaphore>,
    concurrency: u32,
}

impl ClickDispatcher {
    async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                RecorderMessage::Record(job) => self.dispatch(job).await,
                RecorderMessage::Shutdown(done) => {
                    self.drain().await;
                    let _ = done.send(());
                    return;
                }
            }
        }

        // Every sender dropped without an explicit shutdown
        self.drain().await;
    }

    async fn dispatch(&self, job: ClickJob) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let storage = Arc::clone(&self.storage);
        let geo = self.geo.clone();
        tokio::spawn(async move {
            process_click(storage.as_ref(), &geo, job).await;
            drop(permit);
        });
    }

    async fn drain(&mut self) {
        self.receiver.close();
        let mut drained = 0usize;
        while let Ok(msg) = self.receiver.try_recv() {
            if let RecorderMessage::Record(job) = msg {
                self.dispatch(job).await;
                drained += 1;
            }
        }

        // Wait for in-flight jobs by taking every permit back
        let _ = self.permits.acquire_many(self.concurrency).await;
        info!(drained, "Click recorder drained");
    }
}

/// Handle to the click recording pool. Cheap to clone.
#[derive(Clone)]
pub struct ClickRecorder {
    sender: mpsc::Sender<RecorderMessage>,
}

impl ClickRecorder {
    /// Spawn the dispatcher on the current runtime.
    pub fn spawn(
        storage: Arc<dyn Storage>,
        geo: GeoResolver,
        queue_capacity: usize,
        concurrency: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let concurrency = concurrency.clamp(1, 1024) as u32;

        let dispatcher = ClickDispatcher {
            receiver,
            storage,
            geo,
            permits: Arc::new(Semaphore::new(concurrency as usize)),
            concurrency,
        };

        tokio::spawn(dispatcher.run());

        Self { sender }
    }

    /// Queue a click. Never blocks; a full or closed queue drops the click.
    pub fn record(&self, job: ClickJob) {
        match self.sender.try_send(RecorderMessage::Record(job)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(RecorderMessage::Record(job))) => {
                warn!(link_id = job.link_id, ip = %job.ip, "Click queue full, dropping click");
            }
            Err(mpsc::error::TrySendError::Closed(RecorderMessage::Record(job))) => {
                warn!(link_id = job.link_id, ip = %job.ip, "Click recorder stopped, dropping click");
            }
            Err(_) => {}
        }
    }

    /// Finish all queued and in-flight clicks, then stop the dispatcher.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .sender
            .send(RecorderMessage::Shutdown(done_tx))
            .await
            .is_err()
        {
            debug!("Click recorder already stopped");
            return;
        }
        let _ = done_rx.await;
    }

    /// `shutdown` bounded by `limit`. Returns false if clicks were still pending
    /// when the limit ran out; those are abandoned.
    pub async fn shutdown_within(&self, limit: Duration) -> bool {
        match tokio::time::timeout(limit, self.shutdown()).await {
            Ok(()) => true,
            Err(_) => {
                error!(
                    timeout_secs = limit.as_secs_f64(),
                    "Click recorder did not drain in time, abandoning queued clicks"
                );
                false
            }
        }
    }
}

/// Record one click: geolocate, insert the event, then bump the counter.
///
/// The counter is only incremented once the event row exists.
pub async fn process_click(storage: &dyn Storage, geo: &GeoResolver, job: ClickJob) {
    let location = geo.resolve(&job.ip).await;

    let click = NewClick {
        link_id: job.link_id,
        clicked_at: job.occurred_at,
        ip_address: job.ip,
        user_agent: job.user_agent,
        country: location.country,
        region: location.region,
        city: location.city,
    };

    if let Err(e) = storage.record_click(&click).await {
        error!(
            link_id = click.link_id,
            ip = %click.ip_address,
            error = %e,
            "Failed to record click"
        );
        return;
    }

    if let Err(e) = storage.increment_clicks(click.link_id).await {
        error!(link_id = click.link_id, error = %e, "Failed to increment click counter");
    }
}
