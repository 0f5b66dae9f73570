//! Bounded pool of rendering sessions
//!
//! Rendering contexts are the scarce resource, so every fetch checks out a
//! [`Session`] first. The slot goes back to the pool when the session is
//! dropped, whichever way the fetch ends.

use crate::error::{Error, Result};
use crate::renderer::{RenderedPage, Renderer};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

#[derive(Clone)]
pub struct SessionPool {
    renderer: Arc<dyn Renderer>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl SessionPool {
    pub fn new(renderer: Arc<dyn Renderer>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            renderer,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot and check out a session.
    pub async fn checkout(&self) -> Result<Session> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;

        Ok(Session {
            renderer: self.renderer.clone(),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Stop handing out sessions; pending and future checkouts fail.
    pub fn close(&self) {
        self.slots.close();
    }
}

/// A checked-out rendering session. Dropping it checks the slot back in.
pub struct Session {
    renderer: Arc<dyn Renderer>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub async fn render(&self, url: &Url) -> Result<RenderedPage> {
        self.renderer.render(url).await
    }
}
