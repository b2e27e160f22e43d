//! Arbor Testing Infrastructure
//!
//! Shared fixtures for exercising the composition hierarchy: recording
//! controllers, ready-made parts and listeners, a manually pumped
//! coordination thread, tree builders and proptest strategies.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! ```rust,ignore
//! use arbor_core::Scope;
//! use arbor_testkit::{assert_not_visible, TreeFixture};
//!
//! #[test]
//! fn sibling_cannot_see_protected() {
//!     let mut tree = TreeFixture::new();
//!     tree.module("m");
//!     tree.child("a", "m");
//!     tree.child("b", "m");
//!     tree.export("a", "svc", Some(Scope::Protected));
//!     assert_not_visible!(tree, "b", "svc", "a");
//! }
//! ```

pub mod assertions;
pub mod controllers;
pub mod dispatcher;
pub mod fixtures;
pub mod parts;
pub mod strategies;

pub use controllers::{Journal, LifecycleEvent, RecordingController, RecordingControllerBuilder};
pub use dispatcher::ManualDispatcher;
pub use fixtures::TreeFixture;
pub use parts::{
    failing_part, listener_part, recording_listener, service_part, ListenerProbe, Service,
};
pub use strategies::{arb_scope, arb_tree_shape, TreeShape};

/// Install a test subscriber honoring `RUST_LOG`; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
