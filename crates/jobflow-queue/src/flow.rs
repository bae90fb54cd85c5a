//! Flow construction.
//!
//! A [`JobSpec`] with nested `child_jobs` is expanded into a tree of
//! [`QueueEntryNode`]s. Ids come from an [`IdSequence`] that is passed down
//! the recursion by value and handed back with each built subtree, so the
//! builder keeps no shared counter.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::{JobError, QueueResult};
use crate::job::{Dependency, JobId, JobSpec, QueueEntryNode};

/// Source of job ids for one flow: `{flow_id}:{n}` with `n` counting up in
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSequence {
    flow_id: Uuid,
    next: u64,
}

impl IdSequence {
    /// Start a sequence for a fresh flow.
    pub fn new() -> Self {
        Self::for_flow(Uuid::new_v4())
    }

    /// Start a sequence for a known flow id.
    pub fn for_flow(flow_id: Uuid) -> Self {
        Self { flow_id, next: 0 }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.next
    }

    /// Take the next id and return the advanced sequence.
    pub fn issue(self) -> (JobId, IdSequence) {
        let id = format!("{}:{}", self.flow_id, self.next);
        (
            id,
            IdSequence {
                flow_id: self.flow_id,
                next: self.next + 1,
            },
        )
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Which synthetic dependencies the builder wires between siblings.
///
/// Read from the root spec and applied to every sibling group in the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainPolicy {
    /// Child `i > 0` depends on child `i - 1`.
    pub chain_siblings: bool,
    /// Child `0` depends on its parent.
    pub depend_on_parent: bool,
}

impl ChainPolicy {
    pub fn from_spec(spec: &JobSpec) -> Self {
        Self {
            chain_siblings: spec.enable_chain_results,
            depend_on_parent: spec.first_child_depends_on_parent(),
        }
    }
}

/// Expands job specs into submission-ready trees.
pub struct FlowBuilder;

impl FlowBuilder {
    /// Build a tree with a fresh flow id.
    pub fn build(spec: &JobSpec) -> QueueResult<QueueEntryNode> {
        Self::build_with(spec, IdSequence::new()).map(|(node, _)| node)
    }

    /// Build a tree drawing ids from `ids`, returning the advanced sequence.
    pub fn build_with(
        spec: &JobSpec,
        ids: IdSequence,
    ) -> QueueResult<(QueueEntryNode, IdSequence)> {
        spec.validate()?;

        let policy = ChainPolicy::from_spec(spec);
        let (root, ids) = Self::build_node(spec, None, policy, ids);
        Self::check_dependencies(&root)?;

        Ok((root, ids))
    }

    fn build_node(
        spec: &JobSpec,
        parent_id: Option<&JobId>,
        policy: ChainPolicy,
        ids: IdSequence,
    ) -> (QueueEntryNode, IdSequence) {
        let (id, mut ids) = ids.issue();

        let mut children: Vec<QueueEntryNode> = Vec::with_capacity(spec.child_jobs.len());
        for (index, child_spec) in spec.child_jobs.iter().enumerate() {
            let (mut child, next) = Self::build_node(child_spec, Some(&id), policy, ids);
            ids = next;

            let synthetic = if index == 0 {
                policy
                    .depend_on_parent
                    .then(|| Dependency::new(&spec.queue_name, &id))
            } else if policy.chain_siblings {
                children
                    .last()
                    .map(|prev| Dependency::new(&prev.queue_name, &prev.id))
            } else {
                None
            };

            if let Some(dependency) = synthetic {
                child.dependencies.insert(0, dependency);
            }
            children.push(child);
        }

        let node = QueueEntryNode {
            id,
            parent_id: parent_id.cloned(),
            queue_name: spec.queue_name.clone(),
            name: spec.name.clone(),
            data: spec.data.clone(),
            options: spec.options.clone(),
            dependencies: spec.depends_on.clone(),
            children,
        };

        (node, ids)
    }

    /// Reject self-dependencies and in-tree dependencies that do not precede
    /// the node in submission order. Anything that passes is acyclic.
    pub fn check_dependencies(root: &QueueEntryNode) -> QueueResult<()> {
        let nodes = root.iter();
        let all: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::with_capacity(all.len());

        for node in &nodes {
            for dep in &node.dependencies {
                if dep.job_id == node.id {
                    return Err(JobError::InvalidJobSpec(format!(
                        "job {} depends on itself",
                        node.id
                    )));
                }
                if all.contains(dep.job_id.as_str()) {
                    if !seen.contains(dep.job_id.as_str()) {
                        return Err(JobError::InvalidJobSpec(format!(
                            "job {} depends on {}, which is submitted after it",
                            node.id, dep.job_id
                        )));
                    }
                    if let Some(target) = root.find(&dep.job_id) {
                        if target.queue_name != dep.queue_name {
                            return Err(JobError::InvalidJobSpec(format!(
                                "job {} depends on {} in queue {}, but it lives in {}",
                                node.id, dep.job_id, dep.queue_name, target.queue_name
                            )));
                        }
                    }
                }
            }
            seen.insert(node.id.as_str());
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "flow_tests.rs"]
mod tests;
