//! Static map from flow kind to flow implementation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FlowError;
use crate::flows::care_guide::CareGuide;
use crate::flows::machine::Flow;
use crate::flows::product_analysis::ProductAnalysis;
use crate::flows::profile_creation::ProfileCreation;
use crate::flows::skin_analysis::SkinAnalysis;
use crate::flows::FlowKind;

/// Registry of available flows.
#[derive(Default)]
pub struct FlowRegistry {
    flows: HashMap<FlowKind, Arc<dyn Flow>>,
}

impl FlowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in flow.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ProfileCreation));
        registry.register(Arc::new(SkinAnalysis));
        registry.register(Arc::new(ProductAnalysis));
        registry.register(Arc::new(CareGuide));
        registry
    }

    /// Register a flow, replacing any flow of the same kind.
    pub fn register(&mut self, flow: Arc<dyn Flow>) {
        let kind = flow.kind();
        if self.flows.insert(kind, flow).is_some() {
            tracing::warn!(flow = %kind, "Flow registered twice, replacing");
        }
    }

    pub fn get(&self, kind: FlowKind) -> Result<Arc<dyn Flow>, FlowError> {
        self.flows
            .get(&kind)
            .cloned()
            .ok_or(FlowError::NotRegistered(kind))
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<String> = self.flows.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        f.debug_struct("FlowRegistry").field("flows", &kinds).finish()
    }
}
