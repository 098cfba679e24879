//! Property tests over the commit fold: determinism and version monotonicity.

use std::sync::Arc;

use proptest::prelude::*;

use flowgraph::channels::{ChannelDef, ChannelRegistry, ChannelSchema};
use flowgraph::state::{PendingWrite, StateContainer};
use flowgraph::value::ChannelValue;

fn schema() -> Arc<ChannelSchema> {
    let mut s = ChannelSchema::new();
    s.register(ChannelDef::last_value("scalar", ChannelValue::Int(0)))
        .unwrap();
    s.register(ChannelDef::append_slice("items")).unwrap();
    Arc::new(s)
}

fn raw_write_strategy() -> impl Strategy<Value = (&'static str, i64, &'static str)> {
    (
        prop_oneof![Just("scalar"), Just("items")],
        any::<i64>(),
        prop_oneof![Just("a"), Just("b"), Just("c")],
    )
}

/// Assign sequence numbers by staging position, as the barrier does for a
/// node's batch. Keys are unique, so the fold order is well defined.
fn materialize(raw: Vec<(&'static str, i64, &'static str)>) -> Vec<PendingWrite> {
    raw.into_iter()
        .enumerate()
        .map(|(i, (channel, value, task))| {
            PendingWrite::new(channel, ChannelValue::Int(value), task, i as u64)
        })
        .collect()
}

proptest! {
    /// The same batch committed twice (against fresh state) produces the
    /// same values and the same versions, regardless of staging order.
    #[test]
    fn commit_is_deterministic_under_reordering(
        raw in prop::collection::vec(raw_write_strategy(), 0..24),
        rotate in 0usize..24,
    ) {
        let schema = schema();
        let mut writes = materialize(raw);

        let mut state_a = StateContainer::seeded(&schema);
        let mut registry_a = ChannelRegistry::new(Arc::clone(&schema));
        state_a.commit(&mut registry_a, writes.clone()).unwrap();

        if !writes.is_empty() {
            let mid = rotate % writes.len();
            writes.rotate_left(mid);
        }
        let mut state_b = StateContainer::seeded(&schema);
        let mut registry_b = ChannelRegistry::new(Arc::clone(&schema));
        state_b.commit(&mut registry_b, writes).unwrap();

        prop_assert_eq!(state_a.values(), state_b.values());
        prop_assert_eq!(registry_a.versions(), registry_b.versions());
    }

    /// Versions advance by exactly one per commit that touches a channel
    /// and never move otherwise.
    #[test]
    fn versions_advance_once_per_commit(
        batches in prop::collection::vec(
            prop::collection::vec(raw_write_strategy(), 0..6),
            1..6,
        ),
    ) {
        let schema = schema();
        let mut state = StateContainer::seeded(&schema);
        let mut registry = ChannelRegistry::new(Arc::clone(&schema));

        for raw in batches {
            let batch = materialize(raw);
            let scalar_before = registry.version("scalar").unwrap();
            let items_before = registry.version("items").unwrap();
            let touches_scalar = batch.iter().any(|w| w.channel == "scalar");
            let touches_items = batch.iter().any(|w| w.channel == "items");

            state.commit(&mut registry, batch).unwrap();

            let scalar_after = registry.version("scalar").unwrap();
            let items_after = registry.version("items").unwrap();
            prop_assert_eq!(scalar_after, scalar_before + u64::from(touches_scalar));
            prop_assert_eq!(items_after, items_before + u64::from(touches_items));
        }
    }

    /// Append-slice keeps every write: the list length equals the total
    /// number of writes folded into the channel.
    #[test]
    fn append_slice_preserves_every_write(
        batches in prop::collection::vec(
            prop::collection::vec(raw_write_strategy(), 0..6),
            1..6,
        ),
    ) {
        let schema = schema();
        let mut state = StateContainer::seeded(&schema);
        let mut registry = ChannelRegistry::new(Arc::clone(&schema));

        let mut expected = 0usize;
        for raw in batches {
            let batch = materialize(raw);
            expected += batch.iter().filter(|w| w.channel == "items").count();
            state.commit(&mut registry, batch).unwrap();
        }
        let items = state
            .get("items")
            .and_then(ChannelValue::as_list)
            .map(<[ChannelValue]>::len)
            .unwrap_or(0);
        prop_assert_eq!(items, expected);
    }
}
