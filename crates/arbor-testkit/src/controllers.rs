//! Recording controllers
//!
//! [`RecordingController`] implements both [`Controller`] and [`Module`],
//! records every lifecycle call and change notification it receives, and can
//! be told to fail any of its hooks.

use arbor_composition::{Controller, ControllerContext, Module};
use arbor_core::{BoxError, ExportsChange};
use parking_lot::Mutex;
use std::sync::Arc;

/// Lifecycle calls observed by a [`RecordingController`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `on_activated` ran
    Activated,
    /// `initialize` ran
    Initialized,
    /// `on_deactivated` ran
    Deactivated,
    /// `on_exports_changed` ran with this change
    ExportsChanged(ExportsChange),
}

/// Ordered log shared between controllers, entries are `"<name>:<hook>"`
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, name: &str, hook: &str) {
        self.entries.lock().push(format!("{name}:{hook}"));
    }

    /// Entries so far
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries for one hook, names only
    pub fn names_for(&self, hook: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| entry.strip_suffix(&format!(":{hook}")).map(str::to_string))
            .collect()
    }
}

#[derive(Default)]
struct Failures {
    activated: Option<String>,
    initialize: Option<String>,
    deactivated: Option<String>,
}

/// Controller recording its lifecycle
pub struct RecordingController {
    context: ControllerContext,
    name: String,
    events: Mutex<Vec<LifecycleEvent>>,
    failures: Failures,
    journal: Option<Journal>,
}

/// Builder for [`RecordingController`]
pub struct RecordingControllerBuilder {
    name: String,
    failures: Failures,
    journal: Option<Journal>,
}

impl RecordingControllerBuilder {
    /// Fail `on_activated` with `message`
    pub fn fail_on_activated(mut self, message: impl Into<String>) -> Self {
        self.failures.activated = Some(message.into());
        self
    }

    /// Fail `initialize` with `message`
    pub fn fail_on_initialize(mut self, message: impl Into<String>) -> Self {
        self.failures.initialize = Some(message.into());
        self
    }

    /// Fail `on_deactivated` with `message`
    pub fn fail_on_deactivated(mut self, message: impl Into<String>) -> Self {
        self.failures.deactivated = Some(message.into());
        self
    }

    /// Also record hooks into a shared journal
    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    /// Finish the controller
    pub fn build(self) -> Arc<RecordingController> {
        Arc::new(RecordingController {
            context: ControllerContext::named(self.name.clone()),
            name: self.name,
            events: Mutex::new(Vec::new()),
            failures: self.failures,
            journal: self.journal,
        })
    }
}

impl RecordingController {
    /// Controller that never fails
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::builder(name).build()
    }

    /// Start configuring a controller
    pub fn builder(name: impl Into<String>) -> RecordingControllerBuilder {
        RecordingControllerBuilder {
            name: name.into(),
            failures: Failures::default(),
            journal: None,
        }
    }

    /// Controller name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every recorded event
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    /// Recorded change notifications
    pub fn changes(&self) -> Vec<ExportsChange> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LifecycleEvent::ExportsChanged(change) => Some(change.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of times `event` was recorded
    pub fn count(&self, event: &LifecycleEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Forget recorded events
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn hook(
        &self,
        event: LifecycleEvent,
        hook: &str,
        failure: &Option<String>,
    ) -> Result<(), BoxError> {
        self.events.lock().push(event);
        if let Some(journal) = &self.journal {
            journal.record(&self.name, hook);
        }
        match failure {
            Some(message) => Err(format!("{}: {message}", self.name).into()),
            None => Ok(()),
        }
    }
}

impl Controller for RecordingController {
    fn context(&self) -> &ControllerContext {
        &self.context
    }

    fn on_activated(&self) -> Result<(), BoxError> {
        self.hook(LifecycleEvent::Activated, "activated", &self.failures.activated)
    }

    fn on_deactivated(&self) -> Result<(), BoxError> {
        self.hook(LifecycleEvent::Deactivated, "deactivated", &self.failures.deactivated)
    }

    fn on_exports_changed(&self, change: &ExportsChange) {
        self.events
            .lock()
            .push(LifecycleEvent::ExportsChanged(change.clone()));
    }
}

impl Module for RecordingController {
    fn initialize(&self) -> Result<(), BoxError> {
        self.hook(LifecycleEvent::Initialized, "initialize", &self.failures.initialize)
    }
}

impl std::fmt::Debug for RecordingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingController")
            .field("name", &self.name)
            .field("activated", &self.context.is_activated())
            .finish()
    }
}
