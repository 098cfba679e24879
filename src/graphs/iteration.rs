//! Deterministic traversal helpers over the static edge map.

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

use crate::types::NodeKind;

/// Kahn's algorithm with an ordered ready set for determinism.
///
/// `NodeKind`'s `Ord` puts `Start` first, `End` second, and user nodes in
/// name order, so peers at the same depth come out sorted. Nodes on a
/// static cycle never reach in-degree zero and are omitted; compile-time
/// validation reports such graphs separately.
#[must_use]
pub fn topological_sort(edges: &FxHashMap<NodeKind, Vec<NodeKind>>) -> Vec<NodeKind> {
    let mut in_degree: FxHashMap<NodeKind, usize> = FxHashMap::default();
    for (from, tos) in edges {
        in_degree.entry(from.clone()).or_insert(0);
        for to in tos {
            *in_degree.entry(to.clone()).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<NodeKind> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(k, _)| k.clone())
        .collect();
    let mut sorted = Vec::with_capacity(in_degree.len());

    while let Some(kind) = ready.iter().next().cloned() {
        ready.remove(&kind);
        if let Some(tos) = edges.get(&kind) {
            for to in tos {
                if let Some(d) = in_degree.get_mut(to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(to.clone());
                    }
                }
            }
        }
        sorted.push(kind);
    }

    // Pin the virtual endpoints to the expected positions: Start leads,
    // End trails, user nodes keep their relative order.
    sorted.sort_by_key(|k| match k {
        NodeKind::Start => 0u8,
        NodeKind::Custom(_) => 1,
        NodeKind::End => 2,
    });
    sorted
}

/// Detect whether the static edge graph (conditional edges excluded)
/// contains a cycle, returning one node on the cycle when it does.
#[must_use]
pub fn find_static_cycle(edges: &FxHashMap<NodeKind, Vec<NodeKind>>) -> Option<NodeKind> {
    let mut nodes: BTreeSet<NodeKind> = BTreeSet::new();
    for (from, tos) in edges {
        nodes.insert(from.clone());
        for to in tos {
            nodes.insert(to.clone());
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    let mut marks: FxHashMap<NodeKind, Mark> =
        nodes.iter().map(|n| (n.clone(), Mark::White)).collect();

    fn visit(
        node: &NodeKind,
        edges: &FxHashMap<NodeKind, Vec<NodeKind>>,
        marks: &mut FxHashMap<NodeKind, Mark>,
    ) -> Option<NodeKind> {
        marks.insert(node.clone(), Mark::Grey);
        if let Some(tos) = edges.get(node) {
            // Deterministic visit order for stable error reporting.
            let mut successors: Vec<NodeKind> = tos.clone();
            successors.sort();
            for next in successors {
                match marks.get(&next).copied().unwrap_or(Mark::White) {
                    Mark::Grey => return Some(next),
                    Mark::White => {
                        if let Some(found) = visit(&next, edges, marks) {
                            return Some(found);
                        }
                    }
                    Mark::Black => {}
                }
            }
        }
        marks.insert(node.clone(), Mark::Black);
        None
    }

    let ordered: Vec<NodeKind> = nodes.into_iter().collect();
    for node in &ordered {
        if marks.get(node) == Some(&Mark::White) {
            if let Some(found) = visit(node, edges, &mut marks) {
                return Some(found);
            }
        }
    }
    None
}
