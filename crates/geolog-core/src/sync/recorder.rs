//! Online-first recording with queue fallback.

use tokio::sync::watch;

use crate::api::LocationApi;
use crate::models::{CreateLocationRequest, LocationRecord, LocationSample};
use crate::services::SampleQueue;
use crate::Result;

/// Where a recorded sample ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Accepted by the server right away
    Delivered(LocationRecord),
    /// Stored locally for the next reconciliation
    Queued,
}

/// Submits samples directly while online and queues them otherwise.
pub struct LocationRecorder<A> {
    api: A,
    queue: SampleQueue,
    online: Option<watch::Receiver<bool>>,
}

impl<A: LocationApi> LocationRecorder<A> {
    /// Without a connectivity feed every sample is first tried online.
    pub const fn new(api: A, queue: SampleQueue) -> Self {
        Self {
            api,
            queue,
            online: None,
        }
    }

    #[must_use]
    pub fn with_connectivity(mut self, online: watch::Receiver<bool>) -> Self {
        self.online = Some(online);
        self
    }

    fn is_online(&self) -> bool {
        self.online.as_ref().is_none_or(|online| *online.borrow())
    }

    /// Deliver or queue one sample.
    ///
    /// An error means the sample could not be queued either and is lost.
    pub async fn record(&self, sample: &LocationSample) -> Result<RecordOutcome> {
        sample.validate()?;

        if self.is_online() {
            match self
                .api
                .create_location(&CreateLocationRequest::from(sample))
                .await
            {
                Ok(record) => {
                    tracing::debug!(sample = %sample.id, "Delivered sample");
                    if let Err(error) = self.queue.remember_delivered(sample).await {
                        tracing::warn!(sample = %sample.id, "Failed to keep local copy: {}", error);
                    }
                    return Ok(RecordOutcome::Delivered(record));
                }
                Err(error) => {
                    tracing::warn!(sample = %sample.id, "Direct submit failed, queueing: {}", error);
                }
            }
        }

        self.queue.enqueue(sample).await.map_err(|error| {
            tracing::error!(sample = %sample.id, "Sample lost: {}", error);
            error
        })?;
        Ok(RecordOutcome::Queued)
    }
}
