//! At most one sync operation per remote target.

use histsync_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

use crate::EndpointId;

/// Tracks which targets currently have an operation in flight.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    active: Arc<Mutex<HashSet<EndpointId>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `target`, failing with `Error::SyncInProgress` if it is taken.
    /// The claim lasts until the returned permit is dropped.
    pub fn try_acquire(&self, target: &EndpointId) -> Result<FlightPermit> {
        let mut active = self.active.lock();
        if !active.insert(target.clone()) {
            return Err(Error::SyncInProgress(target.0.clone()));
        }
        trace!(target = %target.0, "acquired sync permit");
        Ok(FlightPermit {
            target: target.clone(),
            active: self.active.clone(),
        })
    }

    pub fn is_busy(&self, target: &EndpointId) -> bool {
        self.active.lock().contains(target)
    }
}

#[derive(Debug)]
pub struct FlightPermit {
    target: EndpointId,
    active: Arc<Mutex<HashSet<EndpointId>>>,
}

impl FlightPermit {
    pub fn target(&self) -> &EndpointId {
        &self.target
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.active.lock().remove(&self.target);
        trace!(target = %self.target.0, "released sync permit");
    }
}
