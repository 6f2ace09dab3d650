//! Registry of pipe instances with broadcast fan-out

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::Result;
use crate::ipc::bounded;

use super::instance::PipeInstance;

/// Handle to a pipe instance shared between the manager and its caller
pub type SharedInstance = Arc<Mutex<PipeInstance>>;

/// Wrap an instance so it can be registered with a [`PipeManager`]
pub fn shared(instance: PipeInstance) -> SharedInstance {
    Arc::new(Mutex::new(instance))
}

/// Owns a set of pipe instances
///
/// Instances are identified by handle: registering the same `Arc` twice is
/// rejected, two handles to distinct instances are always distinct.
#[derive(Default)]
pub struct PipeManager {
    instances: Vec<SharedInstance>,
}

impl PipeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Whether `instance` is registered
    pub fn contains(&self, instance: &SharedInstance) -> bool {
        self.instances.iter().any(|i| Arc::ptr_eq(i, instance))
    }

    /// Registered instances, in no particular order
    pub fn instances(&self) -> &[SharedInstance] {
        &self.instances
    }

    /// Register `instance`, optionally starting it
    ///
    /// Returns `Ok(false)` for an instance that is already registered. If
    /// starting fails with an error the instance is deregistered again and
    /// the error returned. A start that reports `false` (companion could
    /// not be launched) leaves the instance registered but not initialized.
    pub async fn add(
        &mut self,
        instance: SharedInstance,
        start_on_add: bool,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if self.contains(&instance) {
            tracing::debug!("Instance already registered");
            return Ok(false);
        }
        self.instances.push(instance.clone());

        if start_on_add {
            let mut pipe = instance.lock().await;
            let started = pipe.start(timeout, cancel).await;
            match started {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(pipe = pipe.name(), "Registered pipe could not be started");
                }
                Err(e) => {
                    drop(pipe);
                    self.instances.retain(|i| !Arc::ptr_eq(i, &instance));
                    return Err(e);
                }
            }
        }
        Ok(true)
    }

    /// Deregister and dispose `instance`; whether it was registered
    pub async fn remove(&mut self, instance: &SharedInstance) -> bool {
        let Some(index) = self
            .instances
            .iter()
            .position(|i| Arc::ptr_eq(i, instance))
        else {
            return false;
        };

        let removed = self.instances.swap_remove(index);
        removed.lock().await.dispose().await;
        true
    }

    /// Send `text` to every initialized instance at once
    ///
    /// Each send is awaited on its own; the result is the number of
    /// instances that accepted the text. A failing instance is logged and
    /// does not affect the others. Instances that are not initialized are
    /// skipped.
    pub async fn broadcast(
        &self,
        text: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> usize {
        let sends = self.instances.iter().map(|instance| async move {
            // Waiting for a busy instance counts against the same deadline
            let outcome = bounded(timeout, cancel, async {
                let mut pipe = instance.lock().await;
                if !pipe.is_initialized() {
                    return Ok(false);
                }
                pipe.send(text, timeout, cancel).await.map(|()| true)
            })
            .await;
            match outcome {
                Ok(delivered) => delivered,
                Err(e) => {
                    tracing::warn!("Broadcast delivery failed: {}", e);
                    false
                }
            }
        });

        let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();
        tracing::debug!(
            delivered,
            registered = self.instances.len(),
            "Broadcast finished"
        );
        delivered
    }

    /// Dispose every instance and clear the registry
    pub async fn dispose(&mut self) {
        for instance in self.instances.drain(..) {
            let mut pipe = instance.lock().await;
            if !pipe.is_disposed() {
                pipe.dispose().await;
            }
        }
    }
}
