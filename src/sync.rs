use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

/// Fixed pool of async mutexes addressed by key hash. Serializes work on
/// the same key (same user, same KOL wallet) without a lock per key;
/// distinct keys sharing a stripe serialize too, which is harmless.
pub struct StripedLock {
    stripes: Vec<Mutex<()>>,
}

impl StripedLock {
    pub fn new(stripes: usize) -> Self {
        assert!(stripes > 0);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[idx].lock().await
    }
}
