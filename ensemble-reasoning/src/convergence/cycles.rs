//! Circular reasoning detection
//!
//! Nodes are thoughts. `builds_on` adds `thought -> earlier thought`; each
//! integration proposal links its reconciled ids (ascending) according to
//! [`ReconcileEdges`]. A depth-first search in id order reports one cycle
//! per back edge.

use std::collections::{BTreeSet, HashMap};

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::{depth_first_search, DfsEvent};

use crate::config::ReconcileEdges;
use crate::session::{ThoughtGraph, ThoughtId};

/// Build the reasoning graph for `graph`
pub fn reasoning_graph(graph: &ThoughtGraph, edges: ReconcileEdges) -> DiGraphMap<ThoughtId, ()> {
    let mut g = DiGraphMap::new();
    for thought in graph.thoughts() {
        g.add_node(thought.id);
    }
    for thought in graph.thoughts() {
        for &target in &thought.builds_on {
            g.add_edge(thought.id, target, ());
        }
    }
    for proposal in graph.integrations() {
        let ids: Vec<ThoughtId> = proposal
            .reconciles
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for pair in ids.windows(2) {
            g.add_edge(pair[0], pair[1], ());
            if edges == ReconcileEdges::Symmetric {
                g.add_edge(pair[1], pair[0], ());
            }
        }
    }
    g
}

/// Cycles as id lists rotated to their smallest id, deduplicated and sorted
pub fn find_cycles(graph: &ThoughtGraph, edges: ReconcileEdges) -> Vec<Vec<ThoughtId>> {
    let g = reasoning_graph(graph, edges);
    let mut parent: HashMap<ThoughtId, ThoughtId> = HashMap::new();
    let mut found: BTreeSet<Vec<ThoughtId>> = BTreeSet::new();

    let starts: Vec<ThoughtId> = graph.thoughts().iter().map(|t| t.id).collect();
    depth_first_search(&g, starts, |event| match event {
        DfsEvent::TreeEdge(from, to) => {
            parent.insert(to, from);
        }
        DfsEvent::BackEdge(from, to) => {
            // `to` is an ancestor of `from` on the current DFS path
            let mut path = vec![from];
            let mut node = from;
            while node != to {
                match parent.get(&node) {
                    Some(&p) => {
                        path.push(p);
                        node = p;
                    }
                    None => return,
                }
            }
            path.reverse();
            found.insert(normalize(path));
        }
        _ => {}
    });

    found.into_iter().collect()
}

/// Rotate so the smallest id comes first
fn normalize(mut cycle: Vec<ThoughtId>) -> Vec<ThoughtId> {
    if let Some(pos) = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(i, _)| i)
    {
        cycle.rotate_left(pos);
    }
    cycle
}
