//! Ownership hand-off of sample buffers to C callers.
//!
//! Every exported buffer is recorded by address together with a never-reused
//! export id. A release must present both, so a stale copy of a released
//! record cannot free a newer buffer that the allocator placed at the same
//! address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

struct Export {
    id: u64,
    len: usize,
}

static LIVE: Lazy<Mutex<HashMap<usize, Export>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Ids start at 1; 0 never names a live export.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Leak `samples` to the caller. The pointer stays valid until [`release`]
/// is called with it and the returned id.
pub(crate) fn export(samples: Vec<f32>) -> (*mut f32, u64) {
    let boxed: Box<[f32]> = samples.into_boxed_slice();
    let len = boxed.len();
    let ptr = Box::into_raw(boxed) as *mut f32;
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    LIVE.lock().insert(ptr as usize, Export { id, len });
    (ptr, id)
}

/// Free a buffer returned by [`export`]. Returns `false`, touching nothing,
/// unless `ptr` is a live export issued under `id`.
pub(crate) fn release(ptr: *mut f32, id: u64) -> bool {
    let key = ptr as usize;
    let len = {
        let mut live = LIVE.lock();
        if live.get(&key).map(|entry| entry.id) != Some(id) {
            return false;
        }
        live.remove(&key).map(|entry| entry.len)
    };
    let Some(len) = len else {
        return false;
    };
    // SAFETY: `ptr` and `len` come from `Box::into_raw` in `export` and the
    // registry entry was just removed, so this is the only reconstruction.
    unsafe {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)));
    }
    true
}
