use std::fmt;
use std::sync::Arc;

use crate::blob::BlobStore;
use crate::integrity::CascadeDeleter;
use crate::store::EntityStore;

/// The two collaborators every operation works against. Cloning shares them.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn EntityStore>,
    blobs: Arc<dyn BlobStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn EntityStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn cascade(&self) -> CascadeDeleter<'_> {
        CascadeDeleter::new(self.store(), self.blobs())
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
