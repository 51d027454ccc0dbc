//! DAG resolution for job dependencies.

use reflow_core::ids::JobId;
use reflow_core::workflow::WorkflowDefinition;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DagError {
    #[error("Cycle detected in job dependencies")]
    CycleDetected,
    #[error("Job {job} needs unknown job {dependency}")]
    UnknownDependency { job: String, dependency: String },
    #[error("Duplicate job id: {0}")]
    DuplicateJob(String),
    #[error("Workflow declares no jobs")]
    EmptyWorkflow,
}

impl From<DagError> for reflow_core::Error {
    fn from(err: DagError) -> Self {
        use reflow_core::Error;
        match err {
            DagError::CycleDetected => Error::CycleDetected,
            DagError::UnknownDependency { job, dependency } => {
                Error::UnknownDependency { job, dependency }
            }
            other => Error::InvalidWorkflow(other.to_string()),
        }
    }
}

/// Directed acyclic graph of job specs; edges point from a dependency to
/// its dependents.
#[derive(Debug, Clone)]
pub struct JobGraph {
    graph: DiGraph<JobId, ()>,
    index: HashMap<JobId, NodeIndex>,
}

impl JobGraph {
    /// Jobs that must finish before `job` can start.
    pub fn dependencies(&self, job: &JobId) -> Vec<&JobId> {
        self.index
            .get(job)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn topological_order(&self) -> Result<Vec<&JobId>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|_| DagError::CycleDetected)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

/// Builder for job graphs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, workflow: &WorkflowDefinition) -> Result<JobGraph, DagError> {
        if workflow.jobs.is_empty() {
            return Err(DagError::EmptyWorkflow);
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for job in &workflow.jobs {
            if index.contains_key(&job.id) {
                return Err(DagError::DuplicateJob(job.id.to_string()));
            }
            let idx = graph.add_node(job.id.clone());
            index.insert(job.id.clone(), idx);
        }

        for job in &workflow.jobs {
            let job_idx = index[&job.id];
            for dep in &job.needs {
                let dep_idx = index
                    .get(dep)
                    .ok_or_else(|| DagError::UnknownDependency {
                        job: job.id.to_string(),
                        dependency: dep.to_string(),
                    })?;
                graph.add_edge(*dep_idx, job_idx, ());
            }
        }

        let dag = JobGraph { graph, index };
        dag.topological_order()?;
        Ok(dag)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::workflow::JobSpec;

    fn job(id: &str, needs: &[&str]) -> JobSpec {
        let mut spec = JobSpec::new(id);
        spec.needs = needs.iter().map(|n| JobId::new(*n)).collect();
        spec
    }

    fn workflow(jobs: Vec<JobSpec>) -> WorkflowDefinition {
        WorkflowDefinition::new("ci", jobs)
    }

    #[test]
    fn test_diamond_dag() {
        let wf = workflow(vec![
            job("lint", &[]),
            job("unit", &["lint"]),
            job("integration", &["lint"]),
            job("publish", &["unit", "integration"]),
        ]);
        let dag = DagBuilder::new().build(&wf).unwrap();

        assert!(dag.dependencies(&JobId::new("lint")).is_empty());
        assert_eq!(dag.dependencies(&JobId::new("publish")).len(), 2);

        let order = dag.topological_order().unwrap();
        assert_eq!(order.first(), Some(&&JobId::new("lint")));
        assert_eq!(order.last(), Some(&&JobId::new("publish")));
    }

    #[test]
    fn test_cycle_detection() {
        let wf = workflow(vec![job("a", &["c"]), job("b", &["a"]), job("c", &["b"])]);
        assert_eq!(
            DagBuilder::new().build(&wf).unwrap_err(),
            DagError::CycleDetected
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let wf = workflow(vec![job("publish", &["build"])]);
        let err = DagBuilder::new().build(&wf).unwrap_err();
        assert!(matches!(err, DagError::UnknownDependency { .. }));
        assert!(matches!(
            reflow_core::Error::from(err),
            reflow_core::Error::UnknownDependency { .. }
        ));
    }

    #[test]
    fn test_duplicate_and_empty() {
        let wf = workflow(vec![job("lint", &[]), job("lint", &[])]);
        assert!(matches!(
            DagBuilder::new().build(&wf),
            Err(DagError::DuplicateJob(_))
        ));
        assert_eq!(
            DagBuilder::new().build(&workflow(vec![])).unwrap_err(),
            DagError::EmptyWorkflow
        );
    }
}
