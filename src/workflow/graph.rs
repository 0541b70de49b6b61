/// Workflow graph compilation
///
/// Builds a petgraph DAG from a workflow's node/edge lists once, at save or
/// load time, and rejects anything the evaluator cannot walk unambiguously.
/// The evaluator never re-reads the raw edge list.

use crate::data::events::RecordOperation;
use crate::errors::WorkflowError;
use crate::workflow::types::{Node, NodeKind, Workflow};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// Which outcome of the source node an edge follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Always,
    True,
    False,
}

impl Branch {
    fn parse(label: Option<&str>) -> Option<Self> {
        match label.map(|l| l.trim().to_ascii_lowercase()) {
            None => Some(Self::Always),
            Some(l) if l.is_empty() => Some(Self::Always),
            Some(l) if l == "true" => Some(Self::True),
            Some(l) if l == "false" => Some(Self::False),
            Some(_) => None,
        }
    }
}

/// A validated, execution-ready workflow
#[derive(Debug)]
pub struct CompiledWorkflow {
    pub workflow: Workflow,
    graph: DiGraph<Node, Branch>,
    trigger: NodeIndex,
}

fn invalid(message: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidGraph(message.into())
}

impl CompiledWorkflow {
    /// Validate the graph and build its DAG
    ///
    /// Rules: unique node ids, exactly one trigger with no incoming edges,
    /// edges between known nodes, no self loops, acyclic, at most one incoming
    /// edge per node, condition nodes with exactly one `true` and one `false`
    /// edge, unlabeled edges elsewhere, every node reachable from the trigger.
    pub fn compile(workflow: Workflow) -> Result<Self, WorkflowError> {
        if workflow.nodes.is_empty() {
            return Err(invalid("workflow has no nodes"));
        }

        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        for node in &workflow.nodes {
            if node.id.trim().is_empty() {
                return Err(invalid("node id must not be empty"));
            }
            if index.contains_key(&node.id) {
                return Err(invalid(format!("duplicate node id '{}'", node.id)));
            }
            index.insert(node.id.clone(), graph.add_node(node.clone()));
        }

        for edge in &workflow.edges {
            let source = *index
                .get(&edge.source)
                .ok_or_else(|| invalid(format!("edge references unknown node '{}'", edge.source)))?;
            let target = *index
                .get(&edge.target)
                .ok_or_else(|| invalid(format!("edge references unknown node '{}'", edge.target)))?;
            if source == target {
                return Err(invalid(format!("self loop on node '{}'", edge.source)));
            }
            let branch = Branch::parse(edge.label.as_deref()).ok_or_else(|| {
                invalid(format!(
                    "edge {} -> {} has unknown label '{}'",
                    edge.source,
                    edge.target,
                    edge.label.as_deref().unwrap_or_default()
                ))
            })?;
            graph.add_edge(source, target, branch);
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(WorkflowError::Cycle(graph[cycle.node_id()].id.clone()));
        }

        let triggers: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&i| matches!(graph[i].kind, NodeKind::Trigger(_)))
            .collect();
        let trigger = match triggers.as_slice() {
            [only] => *only,
            [] => return Err(invalid("workflow has no trigger node")),
            _ => return Err(invalid("workflow has more than one trigger node")),
        };

        for i in graph.node_indices() {
            let node = &graph[i];
            let incoming = graph.edges_directed(i, Direction::Incoming).count();
            if i == trigger && incoming > 0 {
                return Err(invalid(format!("trigger node '{}' has incoming edges", node.id)));
            }
            if incoming > 1 {
                return Err(invalid(format!("node '{}' has more than one incoming edge", node.id)));
            }

            let branches: Vec<Branch> = graph.edges_directed(i, Direction::Outgoing).map(|e| *e.weight()).collect();
            match node.kind {
                NodeKind::Condition(_) => {
                    let trues = branches.iter().filter(|b| **b == Branch::True).count();
                    let falses = branches.iter().filter(|b| **b == Branch::False).count();
                    if trues != 1 || falses != 1 || branches.len() != 2 {
                        return Err(invalid(format!(
                            "condition node '{}' needs exactly one true and one false edge",
                            node.id
                        )));
                    }
                }
                _ => {
                    if branches.iter().any(|b| *b != Branch::Always) {
                        return Err(invalid(format!(
                            "only condition nodes may have labeled edges ('{}' is a {})",
                            node.id,
                            node.kind.name()
                        )));
                    }
                }
            }
        }

        let compiled = Self {
            workflow,
            graph,
            trigger,
        };
        let reachable: HashSet<NodeIndex> = compiled.descendants(trigger).into_iter().collect();
        if let Some(orphan) = compiled
            .graph
            .node_indices()
            .find(|i| *i != trigger && !reachable.contains(i))
        {
            return Err(invalid(format!(
                "node '{}' is not reachable from the trigger",
                compiled.graph[orphan].id
            )));
        }

        Ok(compiled)
    }

    pub fn id(&self) -> Uuid {
        self.workflow.id
    }

    pub fn trigger(&self) -> NodeIndex {
        self.trigger
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Outgoing edges in declaration order
    pub fn successors(&self, index: NodeIndex) -> Vec<(Branch, NodeIndex)> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|e| (e.id().index(), *e.weight(), e.target()))
            .collect();
        edges.sort_by_key(|(order, _, _)| *order);
        edges.into_iter().map(|(_, branch, target)| (branch, target)).collect()
    }

    /// Every node below `index`, breadth-first
    pub fn descendants(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<NodeIndex> = self.successors(index).into_iter().map(|(_, t)| t).collect();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            order.push(current);
            queue.extend(self.successors(current).into_iter().map(|(_, t)| t));
        }
        order
    }

    /// Whether a change of `operation` on `table_id` starts this workflow
    pub fn matches(&self, table_id: Uuid, operation: RecordOperation) -> bool {
        self.workflow.is_active && self.workflow.table_id == table_id && self.workflow.trigger_type.matches(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{ConditionConfig, ConditionOperator, Edge, TriggerConfig, TriggerType};
    use chrono::Utc;
    use serde_json::json;

    fn trigger(id: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Trigger(TriggerConfig::default()),
        }
    }

    fn condition(id: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Condition(ConditionConfig {
                field: "price".to_string(),
                operator: ConditionOperator::GreaterThan,
                value: json!(1000),
            }),
        }
    }

    fn action(id: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: NodeKind::Action(crate::workflow::types::ActionConfig::Broadcast {
                channel: "alerts".to_string(),
                message: json!("hi"),
            }),
        }
    }

    fn edge(source: &str, target: &str, label: Option<&str>) -> Edge {
        Edge {
            id: None,
            source: source.to_string(),
            target: target.to_string(),
            label: label.map(str::to_string),
        }
    }

    fn workflow(nodes: Vec<Node>, edges: Vec<Edge>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            name: "wf".to_string(),
            description: None,
            trigger_type: TriggerType::RecordCreated,
            table_id: Uuid::new_v4(),
            is_active: true,
            nodes,
            edges,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn branching() -> Workflow {
        workflow(
            vec![trigger("t"), condition("c"), action("yes"), action("no")],
            vec![
                edge("t", "c", None),
                edge("c", "yes", Some("true")),
                edge("c", "no", Some("false")),
            ],
        )
    }

    #[test]
    fn compiles_a_branching_workflow() {
        let compiled = CompiledWorkflow::compile(branching()).unwrap();
        let c = compiled.successors(compiled.trigger())[0].1;
        assert_eq!(compiled.node(c).id, "c");
        let branches: Vec<(Branch, &str)> = compiled
            .successors(c)
            .into_iter()
            .map(|(b, i)| (b, compiled.node(i).id.as_str()))
            .collect();
        assert_eq!(branches, vec![(Branch::True, "yes"), (Branch::False, "no")]);
        assert_eq!(compiled.descendants(compiled.trigger()).len(), 3);
    }

    #[test]
    fn rejects_cycles() {
        let wf = workflow(
            vec![trigger("t"), action("a"), action("b")],
            vec![edge("t", "a", None), edge("a", "b", None), edge("b", "a", None)],
        );
        assert!(matches!(CompiledWorkflow::compile(wf), Err(WorkflowError::Cycle(_))));
    }

    #[test]
    fn rejects_structural_mistakes() {
        let cases = vec![
            // no trigger
            workflow(vec![action("a")], vec![]),
            // two triggers
            workflow(vec![trigger("t"), trigger("u")], vec![]),
            // dangling edge
            workflow(vec![trigger("t")], vec![edge("t", "ghost", None)]),
            // self loop
            workflow(vec![trigger("t"), action("a")], vec![edge("t", "a", None), edge("a", "a", None)]),
            // condition with one branch
            workflow(
                vec![trigger("t"), condition("c"), action("a")],
                vec![edge("t", "c", None), edge("c", "a", Some("true"))],
            ),
            // labeled edge out of an action
            workflow(
                vec![trigger("t"), action("a"), action("b")],
                vec![edge("t", "a", None), edge("a", "b", Some("true"))],
            ),
            // branches rejoin
            workflow(
                vec![trigger("t"), condition("c"), action("a"), action("b"), action("j")],
                vec![
                    edge("t", "c", None),
                    edge("c", "a", Some("true")),
                    edge("c", "b", Some("false")),
                    edge("a", "j", None),
                    edge("b", "j", None),
                ],
            ),
            // unreachable node
            workflow(vec![trigger("t"), action("a")], vec![]),
            // duplicate id
            workflow(vec![trigger("t"), action("t")], vec![]),
        ];

        for (i, wf) in cases.into_iter().enumerate() {
            assert!(
                matches!(CompiledWorkflow::compile(wf), Err(WorkflowError::InvalidGraph(_))),
                "case {i} should be rejected"
            );
        }
    }

    #[test]
    fn matching_respects_table_operation_and_activity() {
        let mut wf = branching();
        let table = wf.table_id;
        let compiled = CompiledWorkflow::compile(wf.clone()).unwrap();
        assert!(compiled.matches(table, RecordOperation::Insert));
        assert!(!compiled.matches(table, RecordOperation::Update));
        assert!(!compiled.matches(Uuid::new_v4(), RecordOperation::Insert));

        wf.is_active = false;
        let inactive = CompiledWorkflow::compile(wf).unwrap();
        assert!(!inactive.matches(table, RecordOperation::Insert));
    }
}
