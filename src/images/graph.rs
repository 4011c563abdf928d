//! Orders history replay during restoration.
//!
//! Each image with recorded operations is a node. A node depends on
//! every image its draws read. It is also depended on by a reader
//! whenever it has an operation recorded after that read, since the
//! reader must then see the source as it was mid-history. Components
//! are replayed dependencies first; a component with more than one
//! member, or with a self-read, replays its operations in global
//! submission order.

use ahash::AHashMap;
use slotmap::SlotMap;

use super::{Entry, ImageId};

/// A group of images whose histories are replayed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub images: Vec<ImageId>,
    /// Whether operations must be interleaved by sequence number.
    pub cyclic: bool,
}

pub(crate) fn plan(entries: &SlotMap<ImageId, Entry>) -> Vec<Step> {
    let nodes: Vec<ImageId> = entries
        .iter()
        .filter(|(_, entry)| !entry.history.is_empty())
        .map(|(id, _)| id)
        .collect();
    let index: AHashMap<ImageId, usize> = nodes.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let mut edges = vec![Vec::new(); nodes.len()];
    let mut self_loops = vec![false; nodes.len()];
    for (d, &id) in nodes.iter().enumerate() {
        for item in &entries[id].history {
            for src in item.sources() {
                let s = match index.get(&src) {
                    Some(&s) => s,
                    None => continue,
                };
                if s == d {
                    self_loops[d] = true;
                    continue;
                }
                edges[d].push(s);
                if entries[src].history.iter().any(|later| later.seq > item.seq) {
                    edges[s].push(d);
                }
            }
        }
    }
    for targets in &mut edges {
        targets.sort_unstable();
        targets.dedup();
    }

    strongly_connected_components(&edges)
        .into_iter()
        .map(|component| {
            let cyclic = component.len() > 1 || self_loops[component[0]];
            Step {
                images: component.into_iter().map(|i| nodes[i]).collect(),
                cyclic,
            }
        })
        .collect()
}

/// Tarjan's algorithm without recursion.
///
/// Components come out in reverse topological order: a component is
/// emitted only after every component it has edges to.
pub(crate) fn strongly_connected_components(edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;

    let n = edges.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut calls: Vec<(usize, usize)> = Vec::new();
    let mut components = Vec::new();
    let mut next = 0;

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        calls.push((root, 0));

        while let Some(frame) = calls.last_mut() {
            let v = frame.0;
            if let Some(&w) = edges[v].get(frame.1) {
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    calls.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }

            calls.pop();
            if let Some(&(parent, _)) = calls.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}
