//! Ready-made parts
//!
//! Small parts covering the common test needs: a labeled service, a part
//! whose disposal fails, and event listeners that record where they ran.

use arbor_composition::{EventListener, InstancePart};
use arbor_core::{ArborError, ExportDefinition, ExportValue, PartRef, Scope};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Labeled service value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service(pub String);

impl Service {
    /// Label given at creation
    pub fn label(&self) -> &str {
        &self.0
    }
}

fn definition(contract: &str, scope: Option<Scope>) -> ExportDefinition {
    let definition = ExportDefinition::new(contract);
    match scope {
        Some(scope) => definition.with_scope(scope),
        None => definition,
    }
}

/// Part exporting a [`Service`] under `contract`; `None` leaves it untagged
pub fn service_part(contract: &str, scope: Option<Scope>, label: &str) -> PartRef {
    InstancePart::builder()
        .export_value(
            definition(contract, scope),
            Arc::new(Service(label.to_string())) as ExportValue,
        )
        .build()
}

/// Public service part whose disposal fails with `message`
pub fn failing_part(contract: &str, message: &str) -> PartRef {
    let message = message.to_string();
    InstancePart::builder()
        .export_value(
            ExportDefinition::new(contract),
            Arc::new(Service(contract.to_string())) as ExportValue,
        )
        .on_dispose(move || Err(ArborError::composition(message.clone())))
        .build()
}

/// Part exporting `listener` for an event contract
pub fn listener_part(contract: &str, affine: bool, listener: EventListener) -> PartRef {
    let definition = if affine {
        ExportDefinition::new(contract).thread_affine()
    } else {
        ExportDefinition::new(contract)
    };
    InstancePart::builder()
        .export_value(definition, Arc::new(listener) as ExportValue)
        .build()
}

/// Calls seen by a listener from [`recording_listener`]
#[derive(Debug, Default)]
pub struct ListenerProbe {
    calls: AtomicUsize,
    threads: Mutex<Vec<ThreadId>>,
}

impl ListenerProbe {
    /// Number of deliveries
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Thread of each delivery, in order
    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().clone()
    }

    /// Whether every delivery ran on `thread`
    pub fn all_on(&self, thread: ThreadId) -> bool {
        self.threads.lock().iter().all(|t| *t == thread)
    }
}

/// Listener part that counts deliveries and records their threads
pub fn recording_listener(contract: &str, affine: bool) -> (PartRef, Arc<ListenerProbe>) {
    let probe = Arc::new(ListenerProbe::default());
    let sink = Arc::clone(&probe);
    let listener = EventListener::new(move |_event| {
        sink.threads.lock().push(std::thread::current().id());
        sink.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (listener_part(contract, affine, listener), probe)
}
