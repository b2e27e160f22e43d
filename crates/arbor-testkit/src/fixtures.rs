//! Tree fixtures
//!
//! [`TreeFixture`] builds hierarchies by name. Every controller is a
//! [`RecordingController`], the coordination thread is a [`ManualDispatcher`]
//! owned by the test thread, and exports are [`Service`] values labeled with
//! the name of the controller that composed them. Methods panic on failure.

use crate::controllers::RecordingController;
use crate::dispatcher::ManualDispatcher;
use crate::parts::{service_part, Service};
use arbor_composition::{Controller, HierarchyRoot, Node};
use arbor_core::{CoordinationThread, HierarchyConfig, ImportDefinition, PartRef, Scope};
use indexmap::IndexMap;
use std::sync::Arc;

/// Named controllers attached to one hierarchy
pub struct TreeFixture {
    /// Hierarchy under test
    pub root: HierarchyRoot,
    /// Coordination thread, pumped by the test thread
    pub dispatcher: Arc<ManualDispatcher>,
    controllers: IndexMap<String, Arc<RecordingController>>,
}

impl TreeFixture {
    /// Empty hierarchy with default configuration
    pub fn new() -> Self {
        Self::with_config(HierarchyConfig::default())
    }

    /// Empty hierarchy with the given configuration
    pub fn with_config(config: HierarchyConfig) -> Self {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let root = HierarchyRoot::builder()
            .config(config)
            .coordination_thread(Arc::clone(&dispatcher) as Arc<dyn CoordinationThread>)
            .build()
            .expect("hierarchy builds");
        Self {
            root,
            dispatcher,
            controllers: IndexMap::new(),
        }
    }

    /// Activate a module named `name`
    pub fn module(&mut self, name: &str) -> Arc<Node> {
        self.module_with(RecordingController::new(name))
    }

    /// Activate a preconfigured controller as a module
    pub fn module_with(&mut self, controller: Arc<RecordingController>) -> Arc<Node> {
        let node = self
            .root
            .activate_module(Arc::clone(&controller))
            .expect("module activates");
        self.controllers
            .insert(controller.name().to_string(), controller);
        node
    }

    /// Activate `name` beneath `parent`
    pub fn child(&mut self, name: &str, parent: &str) -> Arc<Node> {
        self.child_with(RecordingController::new(name), parent)
    }

    /// Activate a preconfigured controller beneath `parent`
    pub fn child_with(&mut self, controller: Arc<RecordingController>, parent: &str) -> Arc<Node> {
        let parent = Arc::clone(self.get(parent));
        let node = parent
            .context()
            .activate(Arc::clone(&controller) as Arc<dyn Controller>)
            .expect("child activates");
        self.controllers
            .insert(controller.name().to_string(), controller);
        node
    }

    /// Controller registered under `name`
    pub fn get(&self, name: &str) -> &Arc<RecordingController> {
        self.controllers
            .get(name)
            .unwrap_or_else(|| panic!("no controller named {name}"))
    }

    /// Node of the controller registered under `name`
    pub fn node(&self, name: &str) -> Arc<Node> {
        self.get(name)
            .context()
            .require_node()
            .expect("controller is activated")
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<String> {
        self.controllers.keys().cloned().collect()
    }

    /// Compose a [`Service`] labeled `name` on `name`'s node
    pub fn export(&self, name: &str, contract: &str, scope: Option<Scope>) -> PartRef {
        let part = service_part(contract, scope, name);
        self.get(name)
            .context()
            .add_part(Arc::clone(&part))
            .expect("part composes");
        part
    }

    /// Labels of every `contract` export visible from `from`, in
    /// resolution order
    pub fn visible(&self, from: &str, contract: &str) -> Vec<String> {
        self.get(from)
            .context()
            .query(&ImportDefinition::many(contract))
            .expect("query succeeds")
            .iter()
            .filter_map(|export| export.downcast::<Service>())
            .map(|service| service.label().to_string())
            .collect()
    }

    /// Deactivate `name` and forget it and its descendants
    pub fn detach(&mut self, name: &str) -> arbor_core::Result<()> {
        let node = self.node(name);
        let mut removed = vec![node.controller_id()];
        removed.extend(node.descendants().iter().map(|n| n.controller_id()));
        let result = self.get(name).context().deactivate();
        self.controllers
            .retain(|_, controller| !removed.contains(&controller.context().id()));
        result
    }
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}
