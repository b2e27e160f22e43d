//! Proptest strategies for hierarchy shapes and scopes

use crate::fixtures::TreeFixture;
use arbor_core::Scope;
use proptest::prelude::*;
use proptest::sample::Index;

/// Shape of a hierarchy: `parents[i]` is node i's parent, `None` for a module
///
/// Parents always precede their children, so building in index order is
/// valid. Node i is named `n{i}` in fixtures built from the shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeShape {
    /// Parent index of every node
    pub parents: Vec<Option<usize>>,
}

impl TreeShape {
    /// Number of nodes
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Whether the shape has no nodes
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Fixture name of node `index`
    pub fn name(index: usize) -> String {
        format!("n{index}")
    }

    /// Whether `node` is `root` or lies below it
    pub fn in_subtree(&self, node: usize, root: usize) -> bool {
        let mut current = Some(node);
        while let Some(index) = current {
            if index == root {
                return true;
            }
            current = self.parents[index];
        }
        false
    }

    /// Indices of `root` and its descendants
    pub fn subtree(&self, root: usize) -> Vec<usize> {
        (0..self.len())
            .filter(|&node| self.in_subtree(node, root))
            .collect()
    }

    /// Whether an export of `owner` tagged `scope` is visible from `from`
    pub fn expected_visible(&self, owner: usize, scope: Scope, from: usize) -> bool {
        match scope {
            Scope::Public => true,
            Scope::Internal => match self.parents[owner] {
                Some(parent) => self.in_subtree(from, parent),
                None => self.in_subtree(from, owner),
            },
            Scope::Protected => self.in_subtree(from, owner),
            Scope::Private => from == owner,
        }
    }

    /// Activate every node of the shape in a fresh fixture
    pub fn build(&self) -> TreeFixture {
        let mut fixture = TreeFixture::new();
        self.build_into(&mut fixture);
        fixture
    }

    /// Activate every node of the shape in an existing fixture
    pub fn build_into(&self, fixture: &mut TreeFixture) {
        for (index, parent) in self.parents.iter().enumerate() {
            match parent {
                Some(parent) => fixture.child(&Self::name(index), &Self::name(*parent)),
                None => fixture.module(&Self::name(index)),
            };
        }
    }
}

/// Hierarchies of 1 to `max_nodes` nodes, possibly with several modules
pub fn arb_tree_shape(max_nodes: usize) -> impl Strategy<Value = TreeShape> {
    (1..=max_nodes.max(1)).prop_flat_map(|len| {
        proptest::collection::vec(any::<Index>(), len).prop_map(|picks| TreeShape {
            parents: picks
                .iter()
                .enumerate()
                .map(|(i, pick)| {
                    let choice = pick.index(i + 1);
                    (choice < i).then_some(choice)
                })
                .collect(),
        })
    })
}

/// Any scope tag
pub fn arb_scope() -> impl Strategy<Value = Scope> {
    proptest::sample::select(Scope::all().to_vec())
}
