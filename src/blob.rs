use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::client::BlobHandle;
use crate::error::SqlRuntimeError;
use crate::guard::{ResourceGuard, SharedPermit};
use crate::lifecycle::{LifecycleState, StateCell};
use crate::transaction::TransactionInner;
use crate::types::BlobRef;

/// Largest segment the client library moves in one call.
pub const MAX_SEGMENT: usize = 0xFFFF;

const NOT_OPEN: &str = "Need to open blob";

struct BlobInner {
    transaction: Arc<TransactionInner>,
    handle: BlobHandle,
    blob: BlobRef,
    guard: ResourceGuard,
    state: StateCell,
}

/// An open large-object stream.
///
/// Ends either `Closed` (writes are flushed) or `Cancelled` (a new blob is
/// discarded).
#[derive(Clone)]
pub struct BlobStream {
    inner: Arc<BlobInner>,
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream")
            .field("handle", &self.inner.handle)
            .field("blob", &self.inner.blob)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl BlobStream {
    pub(crate) fn new(transaction: Arc<TransactionInner>, handle: BlobHandle, blob: BlobRef) -> Self {
        Self {
            inner: Arc::new(BlobInner {
                transaction,
                handle,
                blob,
                guard: ResourceGuard::new(),
                state: StateCell::new(LifecycleState::Active),
            }),
        }
    }

    #[must_use]
    pub fn blob_ref(&self) -> &BlobRef {
        &self.inner.blob
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    async fn ready(&self) -> Result<SharedPermit<'_>, SqlRuntimeError> {
        let permit = self.inner.guard.share().await;
        self.inner.state.ensure_active("blob stream", NOT_OPEN)?;
        Ok(permit)
    }

    /// Read the next segment of at most `max` bytes; `None` at the end of the blob.
    ///
    /// # Errors
    /// `AlreadyFinished` once closed or cancelled, or the native client's failure.
    pub async fn read(&self, max: usize) -> Result<Option<Vec<u8>>, SqlRuntimeError> {
        let _shared = self.ready().await?;
        let segment = self
            .inner
            .transaction
            .connection
            .client
            .native()
            .get_segment(self.inner.handle, max.clamp(1, MAX_SEGMENT))
            .await?;
        Ok(segment)
    }

    /// Read every remaining segment.
    ///
    /// # Errors
    /// Same as [`BlobStream::read`].
    pub async fn read_to_end(&self) -> Result<Vec<u8>, SqlRuntimeError> {
        let mut data = Vec::new();
        while let Some(segment) = self.read(MAX_SEGMENT).await? {
            data.extend_from_slice(&segment);
        }
        Ok(data)
    }

    /// Append `data`, split into segments the library accepts.
    ///
    /// # Errors
    /// `AlreadyFinished` once closed or cancelled, or the native client's failure.
    pub async fn write(&self, data: &[u8]) -> Result<(), SqlRuntimeError> {
        let _shared = self.ready().await?;
        let native = self.inner.transaction.connection.client.native();
        for chunk in data.chunks(MAX_SEGMENT) {
            native.put_segment(self.inner.handle, chunk).await?;
        }
        Ok(())
    }

    /// Total length of the blob in bytes.
    ///
    /// # Errors
    /// `AlreadyFinished` once closed or cancelled, or the native client's failure.
    pub async fn length(&self) -> Result<u64, SqlRuntimeError> {
        let _shared = self.ready().await?;
        let length = self
            .inner
            .transaction
            .connection
            .client
            .native()
            .blob_length(self.inner.handle)
            .await?;
        Ok(length)
    }

    /// Close the stream.
    ///
    /// # Errors
    /// `AlreadyFinished` when already closed or cancelled, or the native client's
    /// failure.
    pub async fn close(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.inner.state.ensure_active("blob stream", NOT_OPEN)?;
        self.inner
            .transaction
            .connection
            .client
            .native()
            .close_blob(self.inner.handle)
            .await?;
        self.finish(LifecycleState::Closed);
        debug!(blob = self.inner.handle.0, "blob closed");
        Ok(())
    }

    /// Abandon the stream without flushing.
    ///
    /// # Errors
    /// `AlreadyFinished` when already closed or cancelled, or the native client's
    /// failure.
    pub async fn cancel(&self) -> Result<(), SqlRuntimeError> {
        let _permit = self.inner.guard.acquire().await;
        self.inner.state.ensure_active("blob stream", NOT_OPEN)?;
        self.inner
            .transaction
            .connection
            .client
            .native()
            .cancel_blob(self.inner.handle)
            .await?;
        self.finish(LifecycleState::Cancelled);
        debug!(blob = self.inner.handle.0, "blob cancelled");
        Ok(())
    }

    fn finish(&self, state: LifecycleState) {
        self.inner.state.set(state);
        self.inner.transaction.blobs.release();
    }
}
