//! Per-camera single-flight guard for batch runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use framegate_core::types::CameraId;

/// Hands out at most one live permit per camera.
#[derive(Default)]
pub struct CameraGuards {
    slots: Mutex<HashMap<CameraId, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one batch run.
pub struct CameraPermit {
    _guard: OwnedMutexGuard<()>,
}

impl CameraGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the camera's permit, or `None` if a run already holds it.
    /// Never waits.
    pub fn try_acquire(&self, camera_id: &CameraId) -> Option<CameraPermit> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // A slot referenced only by the map has no live permit.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry(camera_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.try_lock_owned()
            .ok()
            .map(|guard| CameraPermit { _guard: guard })
    }

    /// Cameras currently holding a slot.
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
