//! Fire-and-forget visit recording
//!
//! The redirect handler hands a [`PendingVisit`] to [`VisitRecorder::record`],
//! which only enqueues it. A background actor resolves geolocation and
//! appends the finished [`VisitEvent`] to storage. Delivery is best-effort
//! and at-most-once: a full queue, a failed lookup or a failed append drops
//! or degrades the visit with a log line and is never retried.

use futures_util::stream::{FuturesOrdered, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::analytics::geoip::GeoResolver;
use crate::models::{Device, VisitEvent};
use crate::storage::{Storage, StorageError, StorageResult};

/// Lookups the actor keeps in flight before it stops draining the queue
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// A classified visit still waiting for geolocation
#[derive(Debug, Clone)]
pub struct PendingVisit {
    pub short_code: String,
    /// Epoch milliseconds, taken when the redirect was served
    pub timestamp: i64,
    pub device: Device,
    pub os: String,
    /// Normalized client address
    pub ip: String,
    pub referrer: String,
}

/// Message types for the recorder actor
enum RecorderMessage {
    Record(PendingVisit),
    /// Stop accepting work, finish what is queued
    Shutdown,
}

struct RecorderActor {
    receiver: mpsc::Receiver<RecorderMessage>,
    storage: Arc<dyn Storage>,
    geo: GeoResolver,
    max_in_flight: usize,
}

impl RecorderActor {
    /// Lookups run concurrently but complete in enqueue order, so appends
    /// keep the order visits were served in. Once `max_in_flight` lookups
    /// are pending the queue is left alone and fills up.
    async fn run(mut self) {
        let mut lookups = FuturesOrdered::new();
        let mut open = true;

        loop {
            tokio::select! {
                msg = self.receiver.recv(), if open && lookups.len() < self.max_in_flight => {
                    match msg {
                        Some(RecorderMessage::Record(visit)) => {
                            lookups.push_back(locate(self.geo.clone(), visit));
                        }
                        Some(RecorderMessage::Shutdown) => {
                            info!("Visit recorder received shutdown signal, draining queue...");
                            self.receiver.close();
                        }
                        None => open = false,
                    }
                }
                Some((short_code, event)) = lookups.next(), if !lookups.is_empty() => {
                    if let Err(e) = append(self.storage.as_ref(), &short_code, &event).await {
                        log_failure(&short_code, &e);
                    }
                }
                else => break,
            }
        }

        debug!("Visit recorder stopped");
    }
}

fn log_failure(short_code: &str, err: &StorageError) {
    match err {
        StorageError::NotFound => {
            warn!(short_code = %short_code, "link disappeared before its visit was recorded")
        }
        other => error!(short_code = %short_code, error = %other, "failed to record visit"),
    }
}

/// Geolocate a visit into the event that gets stored
async fn locate(geo: GeoResolver, visit: PendingVisit) -> (String, VisitEvent) {
    let point = geo.resolve(&visit.ip).await;

    let event = VisitEvent {
        timestamp: visit.timestamp,
        device: visit.device,
        os: visit.os,
        ip: visit.ip,
        location: point.location,
        region: point.region,
        latitude: point.latitude,
        longitude: point.longitude,
        referrer: visit.referrer,
    };
    (visit.short_code, event)
}

async fn append(storage: &dyn Storage, short_code: &str, event: &VisitEvent) -> StorageResult<()> {
    storage.append_visit(short_code, event).await?;
    debug!(short_code = %short_code, "visit recorded");
    Ok(())
}

/// Handle to the background recorder
pub struct VisitRecorder {
    sender: mpsc::Sender<RecorderMessage>,
    storage: Arc<dyn Storage>,
    geo: GeoResolver,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl VisitRecorder {
    /// Spawn the recorder actor. Must be called inside a tokio runtime.
    pub fn new(storage: Arc<dyn Storage>, geo: GeoResolver, buffer_size: usize) -> Self {
        Self::with_max_in_flight(storage, geo, buffer_size, DEFAULT_MAX_IN_FLIGHT)
    }

    /// Like [`VisitRecorder::new`], with an explicit cap on concurrent lookups
    pub fn with_max_in_flight(
        storage: Arc<dyn Storage>,
        geo: GeoResolver,
        buffer_size: usize,
        max_in_flight: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));

        let actor = RecorderActor {
            receiver,
            storage: Arc::clone(&storage),
            geo: geo.clone(),
            max_in_flight: max_in_flight.max(1),
        };
        let handle = tokio::spawn(actor.run());

        Self {
            sender,
            storage,
            geo,
            actor: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a visit without waiting. Drops the visit if the queue is full.
    pub fn record(&self, visit: PendingVisit) {
        if let Err(e) = self.sender.try_send(RecorderMessage::Record(visit)) {
            let short_code = match &e {
                mpsc::error::TrySendError::Full(RecorderMessage::Record(v))
                | mpsc::error::TrySendError::Closed(RecorderMessage::Record(v)) => {
                    v.short_code.as_str()
                }
                _ => "",
            };
            warn!(short_code = %short_code, "visit recorder unavailable or full, dropping visit");
        }
    }

    /// Resolve and append a visit inline, returning the outcome
    pub async fn record_now(&self, visit: PendingVisit) -> StorageResult<()> {
        let (short_code, event) = locate(self.geo.clone(), visit).await;
        append(self.storage.as_ref(), &short_code, &event).await
    }

    /// Stop the actor after it has written everything already queued
    pub async fn shutdown(&self) {
        let _ = self.sender.send(RecorderMessage::Shutdown).await;

        if let Some(handle) = self.actor.lock().await.take() {
            if let Err(e) = handle.await {
                error!("visit recorder task ended abnormally: {}", e);
            }
        }
    }
}
