//! Update Scheduler
//!
//! [`UpdateScheduler`] owns every node of the graph and answers one question
//! for the runtime: when a source changes, which nodes are affected and in
//! what order must they be visited.
//!
//! # Ordering
//!
//! `mark_changed` walks the readers of the source depth-first and returns
//! the reverse post-order of that walk, which puts every node after all of
//! its affected inputs. Readers are walked back to front, so among
//! independent readers the one that subscribed first comes first.
//!
//! Derived nodes only get marked stale, so the order matters for one thing:
//! a memo must be stale before a reaction reading it is queued.

use std::collections::{HashMap, HashSet};

use super::node::{Node, NodeId, NodeKind};

pub struct UpdateScheduler {
    nodes: HashMap<NodeId, Node>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        for input in node.inputs() {
            if let Some(input) = self.nodes.get_mut(input) {
                input.unlink_reader(id);
            }
        }
        for reader in node.readers() {
            if let Some(reader) = self.nodes.get_mut(reader) {
                reader.unlink_input(id);
            }
        }
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Record that `reader` read `input`. Self edges and edges touching
    /// removed nodes are dropped.
    pub fn add_edge(&mut self, input: NodeId, reader: NodeId) {
        if input == reader || !self.contains(input) || !self.contains(reader) {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&input) {
            node.link_reader(reader);
        }
        if let Some(node) = self.nodes.get_mut(&reader) {
            node.link_input(input);
        }
    }

    pub fn remove_edge(&mut self, input: NodeId, reader: NodeId) {
        if let Some(node) = self.nodes.get_mut(&input) {
            node.unlink_reader(reader);
        }
        if let Some(node) = self.nodes.get_mut(&reader) {
            node.unlink_input(input);
        }
    }

    /// Forget everything `reader` read.
    pub fn clear_dependencies(&mut self, reader: NodeId) {
        let Some(inputs) = self.nodes.get_mut(&reader).map(Node::take_inputs) else {
            return;
        };
        for input in inputs {
            self.remove_edge(input, reader);
        }
    }

    /// Replace what `reader` depends on with `inputs`.
    pub fn set_dependencies<I>(&mut self, reader: NodeId, inputs: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        self.clear_dependencies(reader);
        for input in inputs {
            self.add_edge(input, reader);
        }
    }

    /// Every node reachable from `source` through reader edges, inputs
    /// before readers, with its kind.
    pub fn mark_changed(&self, source: NodeId) -> Vec<(NodeId, NodeKind)> {
        let Some(root) = self.nodes.get(&source) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut post_order = Vec::new();
        // (node, readers still to visit, counted from the back)
        let mut stack: Vec<(NodeId, usize)> = Vec::new();

        for &start in root.readers().iter().rev() {
            if !self.contains(start) || !seen.insert(start) {
                continue;
            }
            stack.push((start, self.reader_count(start)));

            while let Some((id, remaining)) = stack.last_mut() {
                if *remaining == 0 {
                    post_order.push(*id);
                    stack.pop();
                    continue;
                }
                *remaining -= 1;
                let next = self.nodes[&*id].readers()[*remaining];
                if self.contains(next) && seen.insert(next) {
                    let count = self.reader_count(next);
                    stack.push((next, count));
                }
            }
        }

        post_order
            .into_iter()
            .rev()
            .map(|id| (id, self.nodes[&id].kind()))
            .collect()
    }

    fn reader_count(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |node| node.readers().len())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(kinds: &[NodeKind]) -> (UpdateScheduler, Vec<NodeId>) {
        let mut scheduler = UpdateScheduler::new();
        let ids = kinds
            .iter()
            .map(|kind| scheduler.add_node(Node::fresh(*kind)))
            .collect();
        (scheduler, ids)
    }

    #[test]
    fn removing_a_node_drops_its_edges() {
        let (mut scheduler, ids) = graph_with(&[NodeKind::Source, NodeKind::Derived]);
        scheduler.add_edge(ids[0], ids[1]);

        scheduler.remove_node(ids[0]);
        assert_eq!(scheduler.node_count(), 1);
        assert!(!scheduler.contains(ids[0]));
        assert!(scheduler.get_node(ids[1]).unwrap().inputs().is_empty());
    }

    #[test]
    fn edges_to_unknown_nodes_are_ignored() {
        let (mut scheduler, ids) = graph_with(&[NodeKind::Source]);
        scheduler.add_edge(ids[0], NodeId::new());
        scheduler.add_edge(ids[0], ids[0]);
        assert!(scheduler.get_node(ids[0]).unwrap().readers().is_empty());
    }

    #[test]
    fn set_dependencies_replaces_old_edges() {
        let (mut scheduler, ids) =
            graph_with(&[NodeKind::Source, NodeKind::Source, NodeKind::Reaction]);
        let (a, b, reaction) = (ids[0], ids[1], ids[2]);

        scheduler.set_dependencies(reaction, [a]);
        assert!(scheduler.get_node(a).unwrap().readers().contains(&reaction));

        scheduler.set_dependencies(reaction, [b]);
        assert!(!scheduler.get_node(a).unwrap().readers().contains(&reaction));
        assert!(scheduler.get_node(b).unwrap().readers().contains(&reaction));
        assert_eq!(scheduler.get_node(reaction).unwrap().inputs().len(), 1);
    }

    #[test]
    fn memos_come_before_their_readers() {
        let (mut scheduler, ids) =
            graph_with(&[NodeKind::Source, NodeKind::Derived, NodeKind::Reaction]);
        let (source, memo, reaction) = (ids[0], ids[1], ids[2]);

        // The reaction reads the source directly and through the memo.
        scheduler.add_edge(source, reaction);
        scheduler.add_edge(source, memo);
        scheduler.add_edge(memo, reaction);

        assert_eq!(
            scheduler.mark_changed(source),
            vec![(memo, NodeKind::Derived), (reaction, NodeKind::Reaction)]
        );
    }

    #[test]
    fn independent_readers_keep_subscription_order() {
        let (mut scheduler, ids) = graph_with(&[
            NodeKind::Source,
            NodeKind::Reaction,
            NodeKind::Reaction,
            NodeKind::Reaction,
        ]);
        for &reaction in &ids[1..] {
            scheduler.add_edge(ids[0], reaction);
        }

        let order: Vec<_> = scheduler
            .mark_changed(ids[0])
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(order, ids[1..].to_vec());
    }

    #[test]
    fn cycles_terminate() {
        let (mut scheduler, ids) =
            graph_with(&[NodeKind::Source, NodeKind::Derived, NodeKind::Derived]);
        scheduler.add_edge(ids[0], ids[1]);
        scheduler.add_edge(ids[1], ids[2]);
        scheduler.add_edge(ids[2], ids[1]);

        let affected = scheduler.mark_changed(ids[0]);
        assert_eq!(affected.len(), 2);
        assert_eq!(affected[0].0, ids[1]);
    }

    #[test]
    fn unknown_source_affects_nothing() {
        let scheduler = UpdateScheduler::new();
        assert!(scheduler.mark_changed(NodeId::new()).is_empty());
    }
}
