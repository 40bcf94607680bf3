use std::sync::Arc;

use crate::mutation::Mutation;

/// Registered mutations in registration order.
#[derive(Clone, Default)]
pub(crate) struct MutationRegistry {
    items: Vec<Arc<dyn Mutation>>,
}

impl MutationRegistry {
    pub(crate) fn new(items: Vec<Arc<dyn Mutation>>) -> Self {
        Self { items }
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<dyn Mutation>> {
        self.items
            .iter()
            .find(|m| m.descriptor().id == id)
            .cloned()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<dyn Mutation>> {
        self.items.iter()
    }
}
