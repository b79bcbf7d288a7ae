//! Host-side clipboard of HRLs that applets have offered for cross-referencing.

use std::sync::Arc;

use tokio::sync::Mutex;

use weaverpc::Hrl;
use weaverpc::HrlWithContext;

#[derive(Clone, Debug, Default)]
pub struct Clipboard {
    items: Arc<Mutex<Vec<HrlWithContext>>>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item unless an identical one is already present.
    /// Returns whether the clipboard changed.
    pub async fn add(&self, item: HrlWithContext) -> bool {
        let mut items = self.items.lock().await;
        if items.contains(&item) {
            return false;
        }
        items.push(item);
        true
    }

    /// Removes every item pointing at `hrl`, whatever its context.
    pub async fn remove(&self, hrl: &Hrl) {
        self.items.lock().await.retain(|item| &item.hrl != hrl);
    }

    pub async fn items(&self) -> Vec<HrlWithContext> {
        self.items.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.items.lock().await.clear();
    }
}
