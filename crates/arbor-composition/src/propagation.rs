//! Attach and detach propagation
//!
//! Attaching a node links its local provider into the filters of every other
//! node, and theirs into its own, at the radius fixed by their relative
//! position. Seen from a holder H, a provider O lands in
//!
//! - the protected filter when O is an ancestor of H,
//! - the internal filter when O's parent is H or an ancestor of H,
//! - the public filter otherwise.
//!
//! Every link is recorded as an edge `(holder, provider) -> radius` so detach
//! can remove exactly what attach installed.

use crate::hierarchy::{HierarchyShared, TreeState};
use crate::node::Node;
use arbor_core::{AggregateError, NodeId, ScopeRadius};
use std::collections::HashSet;
use std::sync::{Arc, Weak};

fn link(tree: &mut TreeState, holder: &Arc<Node>, provider: &Arc<Node>, radius: ScopeRadius) {
    holder
        .filter(radius)
        .link(provider.id(), provider.local_as_provider());
    tree.edges.insert((holder.id(), provider.id()), radius);
    tracing::trace!(holder = %holder.id(), provider = %provider.id(), %radius, "linked");
}

fn link_both(
    tree: &mut TreeState,
    a: &Arc<Node>,
    b: &Arc<Node>,
    a_holds: ScopeRadius,
    b_holds: ScopeRadius,
) {
    link(tree, a, b, a_holds);
    link(tree, b, a, b_holds);
}

/// Cross-link a freshly created node with the rest of the tree
pub(crate) fn attach(tree: &mut TreeState, node: &Arc<Node>) {
    let mut top = Arc::clone(node);

    if let Some(parent) = node.parent() {
        link_both(tree, node, &parent, ScopeRadius::Protected, ScopeRadius::Internal);

        for sibling in parent.children() {
            if Arc::ptr_eq(&sibling, node) {
                continue;
            }
            link_both(tree, node, &sibling, ScopeRadius::Internal, ScopeRadius::Internal);
            for nephew in sibling.descendants() {
                link_both(tree, node, &nephew, ScopeRadius::Public, ScopeRadius::Internal);
            }
        }

        let mut below = Arc::clone(&parent);
        let mut ancestor = parent.parent();
        while let Some(current) = ancestor {
            link_both(tree, node, &current, ScopeRadius::Protected, ScopeRadius::Public);
            for other in current.children() {
                if Arc::ptr_eq(&other, &below) {
                    continue;
                }
                link_both(tree, node, &other, ScopeRadius::Internal, ScopeRadius::Public);
                for descendant in other.descendants() {
                    link_both(tree, node, &descendant, ScopeRadius::Public, ScopeRadius::Public);
                }
            }
            ancestor = current.parent();
            below = current;
        }
        top = below;
    }

    let modules = tree.modules.clone();
    for module in modules {
        if Arc::ptr_eq(&module, &top) {
            continue;
        }
        link_both(tree, node, &module, ScopeRadius::Public, ScopeRadius::Public);
        for descendant in module.descendants() {
            link_both(tree, node, &descendant, ScopeRadius::Public, ScopeRadius::Public);
        }
    }
}

/// Children before parents
fn post_order(node: &Arc<Node>, out: &mut Vec<Arc<Node>>) {
    for child in node.children() {
        post_order(&child, out);
    }
    out.push(Arc::clone(node));
}

fn unlink_subtree(tree: &mut TreeState, removed: &HashSet<NodeId>) {
    let TreeState { edges, registry, .. } = tree;
    edges.retain(|(holder, provider), radius| {
        if !removed.contains(holder) && !removed.contains(provider) {
            return true;
        }
        if !removed.contains(holder) {
            if let Some(survivor) = registry.get(holder).and_then(Weak::upgrade) {
                survivor.filter(*radius).unlink(*provider);
            }
        }
        false
    });
}

/// Detach `root` and its subtree, releasing every node's resources
///
/// Must run under the exclusive hierarchy lock. The tree state is only held
/// for the bookkeeping; filters and node resources are released after it is
/// dropped, so part disposal may call back into the hierarchy. Returns the
/// detached nodes, children before parents; resource failures land in
/// `failures`.
pub(crate) fn detach(
    shared: &HierarchyShared,
    root: &Arc<Node>,
    failures: &mut AggregateError,
) -> Vec<Arc<Node>> {
    let mut subtree = Vec::new();
    post_order(root, &mut subtree);

    {
        let mut tree = shared.tree.lock();
        for node in &subtree {
            node.mark_detaching();
            node.controller().context().release(node);
            tree.registry.shift_remove(&node.id());
        }

        let removed: HashSet<NodeId> = subtree.iter().map(|node| node.id()).collect();
        unlink_subtree(&mut tree, &removed);

        match root.parent() {
            Some(parent) => parent
                .children
                .write()
                .retain(|child| !Arc::ptr_eq(child, root)),
            None => tree.modules.retain(|module| !Arc::ptr_eq(module, root)),
        }
    }

    for node in &subtree {
        node.children.write().clear();
        for radius in ScopeRadius::all() {
            node.filter(radius).clear();
        }
        let released = node.release();
        if !released.is_empty() {
            tracing::warn!(
                node = %node.id(),
                failures = released.len(),
                "node released with failures"
            );
        }
        failures.extend(released);
    }
    subtree
}
