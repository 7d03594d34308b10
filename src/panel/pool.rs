//! Panels addressable by id

use std::collections::BTreeMap;
use std::sync::Arc;

use super::api::PanelApi;

/// Panel id → client
#[derive(Default, Clone)]
pub struct PanelPool {
    panels: BTreeMap<String, Arc<dyn PanelApi>>,
}

impl PanelPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, panel: Arc<dyn PanelApi>) {
        self.panels.insert(id.into(), panel);
    }

    pub fn with(mut self, id: impl Into<String>, panel: Arc<dyn PanelApi>) -> Self {
        self.insert(id, panel);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn PanelApi>> {
        self.panels.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn PanelApi>)> {
        self.panels.iter()
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}
