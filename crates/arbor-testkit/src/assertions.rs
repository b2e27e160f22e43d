//! Visibility assertions over a [`TreeFixture`](crate::TreeFixture)

/// Assert that `from` sees an export of `contract` labeled `owner`
#[macro_export]
macro_rules! assert_visible {
    ($tree:expr, $from:expr, $contract:expr, $owner:expr) => {{
        let labels = $tree.visible($from, $contract);
        assert!(
            labels.iter().any(|label| label == $owner),
            "expected {} to see {}'s '{}' export, saw {:?}",
            $from,
            $owner,
            $contract,
            labels
        );
    }};
}

/// Assert that `from` does not see an export of `contract` labeled `owner`
#[macro_export]
macro_rules! assert_not_visible {
    ($tree:expr, $from:expr, $contract:expr, $owner:expr) => {{
        let labels = $tree.visible($from, $contract);
        assert!(
            !labels.iter().any(|label| label == $owner),
            "expected {} not to see {}'s '{}' export, saw {:?}",
            $from,
            $owner,
            $contract,
            labels
        );
    }};
}
