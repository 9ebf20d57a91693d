//! Cycle detection via Tarjan's strongly connected components
//!
//! The compiler runs one SCC pass over the forward adjacency to find every
//! node that participates in a cycle: members of non-trivial components,
//! plus self-loops. Those nodes get the loop-safety default
//! (`skip_if_exists = false`) unless the author set it explicitly.

use super::Graph;
use std::collections::{HashMap, HashSet};

struct TarjanState<'g> {
    graph: &'g Graph,
    index: u64,
    indices: HashMap<String, u64>,
    lowlinks: HashMap<String, u64>,
    on_stack: HashSet<String>,
    stack: Vec<String>,
    components: Vec<Vec<String>>,
}

impl<'g> TarjanState<'g> {
    fn strongconnect(&mut self, node: &str) {
        self.indices.insert(node.to_string(), self.index);
        self.lowlinks.insert(node.to_string(), self.index);
        self.index += 1;
        self.stack.push(node.to_string());
        self.on_stack.insert(node.to_string());

        let successors: Vec<String> = self
            .graph
            .successors(node)
            .into_iter()
            .map(str::to_string)
            .collect();

        for succ in successors {
            if !self.indices.contains_key(&succ) {
                self.strongconnect(&succ);
                let low = self.lowlinks[&succ].min(self.lowlinks[node]);
                self.lowlinks.insert(node.to_string(), low);
            } else if self.on_stack.contains(&succ) {
                let low = self.indices[&succ].min(self.lowlinks[node]);
                self.lowlinks.insert(node.to_string(), low);
            }
        }

        if self.lowlinks[node] == self.indices[node] {
            let mut component = Vec::new();
            while let Some(top) = self.stack.pop() {
                self.on_stack.remove(&top);
                let done = top == node;
                component.push(top);
                if done {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

/// All strongly connected components of the graph.
pub fn strongly_connected_components(graph: &Graph, nodes: &[String]) -> Vec<Vec<String>> {
    let mut state = TarjanState {
        graph,
        index: 0,
        indices: HashMap::new(),
        lowlinks: HashMap::new(),
        on_stack: HashSet::new(),
        stack: Vec::new(),
        components: Vec::new(),
    };

    for node in nodes {
        if !state.indices.contains_key(node) {
            state.strongconnect(node);
        }
    }

    state.components
}

/// Names of every node that participates in a cycle.
pub fn cycle_members(graph: &Graph, nodes: &[String]) -> HashSet<String> {
    let mut members = HashSet::new();

    for component in strongly_connected_components(graph, nodes) {
        if component.len() > 1 {
            members.extend(component);
        } else if let Some(node) = component.first() {
            // Single-node component: a cycle only if it points at itself.
            if graph.successors(node).contains(&node.as_str()) {
                members.insert(node.clone());
            }
        }
    }

    members
}
