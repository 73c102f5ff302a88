

use std::sync::Arc;

use tracing::debug;

use super::{ShadowStore, Store};


/// Chooses between the live store and its dry-run shadow.
#[derive(Clone)]
pub struct RepositoryFactory {
    live: Arc<dyn Store>,
    shadow: Arc<ShadowStore>,
}

impl RepositoryFactory {

    pub fn new(live: Arc<dyn Store>) -> Self {
        let shadow = Arc::new(ShadowStore::new(Arc::clone(&live)));
        Self { live, shadow }
    }

    pub fn with_shadow(live: Arc<dyn Store>, shadow: Arc<ShadowStore>) -> Self {
        Self { live, shadow }
    }


    pub fn select(&self, dryrun: bool) -> Arc<dyn Store> {
        if dryrun {
            debug!("Using shadow store");
            self.shadow.clone()
        } else {
            Arc::clone(&self.live)
        }
    }

    pub fn live(&self) -> &Arc<dyn Store> {
        &self.live
    }

    pub fn shadow(&self) -> &Arc<ShadowStore> {
        &self.shadow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;

    #[test]
    fn test_select() {
        let factory = RepositoryFactory::new(Arc::new(InMemoryStore::named("primary")));
        assert_eq!(factory.select(false).name(), "primary");
        assert_eq!(factory.select(true).name(), "shadow");
    }
}
