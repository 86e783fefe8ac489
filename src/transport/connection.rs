use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};

use crate::frame::request::RequestFrame;
use crate::frame::response::ResponseFrame;
use crate::transport::errors::{ConnectionError, QueryError};

/// The per-connection I/O reactor and frame codec. Assumed to expose
/// `send_request` and connection-level keyspace tracking; wire format,
/// framing and compression are out of scope for this crate.
#[async_trait]
pub trait RawConnection: Send + Sync {
    async fn send_request(
        &self,
        frame: RequestFrame,
        timeout: Duration,
    ) -> Result<ResponseFrame, ConnectionError>;

    async fn close(&self);
}

/// A shared-completion handle for an in-flight `USE <keyspace>` switch:
/// multiple concurrent callers targeting the same keyspace on the same
/// connection clone this future and await it together.
pub(crate) type SwitchFuture = Shared<BoxFuture<'static, Result<(), Arc<QueryError>>>>;

/// A connection handle, owned by exactly one host's Connection Manager at
/// a time.
///
/// Carries the two attributes the Keyspace Switcher needs —
/// `pending_keyspace`/`pending_switch` — as a single guarded slot rather
/// than two separate fields, since they are always read and written
/// together.
pub struct Connection {
    raw: Arc<dyn RawConnection>,
    keyspace: RwLock<Option<String>>,
    pending_switch: StdMutex<Option<(String, SwitchFuture)>>,
}

impl Connection {
    pub fn new(raw: Arc<dyn RawConnection>) -> Self {
        Connection {
            raw,
            keyspace: RwLock::new(None),
            pending_switch: StdMutex::new(None),
        }
    }

    pub async fn send_request(
        &self,
        frame: RequestFrame,
        timeout: Duration,
    ) -> Result<ResponseFrame, ConnectionError> {
        self.raw.send_request(frame, timeout).await
    }

    pub async fn close(&self) {
        self.raw.close().await;
    }

    /// The keyspace this connection is currently `USE`'d into, if any.
    pub fn keyspace(&self) -> Option<String> {
        self.keyspace.read().unwrap().clone()
    }

    pub(crate) fn set_keyspace(&self, keyspace: String) {
        *self.keyspace.write().unwrap() = Some(keyspace);
    }

    /// Returns the in-flight switch future for `keyspace` if one already
    /// exists, otherwise installs the one `make` produces. The whole
    /// check-or-install happens under one lock so concurrent callers can
    /// never both win the "install" branch.
    pub(crate) fn get_or_install_pending_switch(
        &self,
        keyspace: &str,
        make: impl FnOnce() -> SwitchFuture,
    ) -> SwitchFuture {
        let mut guard = self.pending_switch.lock().unwrap();
        if let Some((ks, fut)) = guard.as_ref() {
            if ks == keyspace {
                return fut.clone();
            }
        }
        let fut = make();
        *guard = Some((keyspace.to_string(), fut.clone()));
        fut
    }

    /// Clears the pending-switch slot, but only if it still refers to
    /// `keyspace` — a later switch to a different keyspace may already
    /// have taken the slot by the time this runs.
    pub(crate) fn clear_pending_switch_if(&self, keyspace: &str) {
        let mut guard = self.pending_switch.lock().unwrap();
        if matches!(guard.as_ref(), Some((ks, _)) if ks == keyspace) {
            *guard = None;
        }
    }
}
