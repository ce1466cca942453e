//! Task graph for one build run.
//!
//! Nodes are typed tasks with explicit predecessor edges, validated acyclic
//! as edges are added. Node order is construction order, which follows
//! pipeline order, so reports and logs are stable across runs.

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{GraphError, TaskError};
use crate::output::{clean_directory, collect_sources, write_outputs};
use crate::pipeline::{AssetClass, PipelineDefinition};
use crate::transform::adapter_for;

/// What a task does within its root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskRole {
    Clean,
    Compile(AssetClass),
    /// Waits on every compile task
    BuildAll,
}

/// Task identifier, e.g. `alpha/clean`, `alpha/compile:style`, `build-all`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId {
    root: Option<Arc<str>>,
    role: TaskRole,
}

impl TaskId {
    pub fn clean(root: &str) -> Self {
        Self {
            root: Some(Arc::from(root)),
            role: TaskRole::Clean,
        }
    }

    pub fn compile(root: &str, class: AssetClass) -> Self {
        Self {
            root: Some(Arc::from(root)),
            role: TaskRole::Compile(class),
        }
    }

    pub fn build_all() -> Self {
        Self {
            root: None,
            role: TaskRole::BuildAll,
        }
    }

    /// Compile task of a pipeline
    pub fn for_pipeline(pipeline: &PipelineDefinition) -> Self {
        Self::compile(&pipeline.root.name, pipeline.class)
    }

    #[inline]
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    #[inline]
    pub fn role(&self) -> TaskRole {
        self.role
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.root, self.role) {
            (Some(root), TaskRole::Clean) => write!(f, "{root}/clean"),
            (Some(root), TaskRole::Compile(class)) => write!(f, "{root}/compile:{class}"),
            (None, TaskRole::BuildAll) => f.write_str("build-all"),
            (None, role) => write!(f, "{role:?}"),
            (Some(root), TaskRole::BuildAll) => write!(f, "{root}/build-all"),
        }
    }
}

/// Files a task produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutput {
    pub written: Vec<PathBuf>,
    pub bytes: u64,
}

/// Work bound to a task node
#[derive(Debug, Clone)]
pub enum TaskAction {
    /// Remove a root's destination directories
    Clean(Vec<PathBuf>),
    /// Run one pipeline's transform chain and write its outputs
    Compile(Arc<PipelineDefinition>),
    Aggregate,
}

impl TaskAction {
    pub fn execute(&self) -> Result<TaskOutput, TaskError> {
        match self {
            TaskAction::Clean(dirs) => {
                for dir in dirs {
                    if clean_directory(dir)? {
                        tracing::debug!(dir = %dir.display(), "removed destination");
                    }
                }
                Ok(TaskOutput::default())
            }
            TaskAction::Compile(pipeline) => {
                let sources = collect_sources(pipeline)?;
                let outputs = adapter_for(pipeline).apply(&sources, pipeline.mode)?;
                let (_, bytes) = write_outputs(&pipeline.dest, &outputs)?;
                Ok(TaskOutput {
                    written: outputs
                        .iter()
                        .map(|o| pipeline.dest.join(&o.relative))
                        .collect(),
                    bytes,
                })
            }
            TaskAction::Aggregate => Ok(TaskOutput::default()),
        }
    }
}

/// A schedulable unit of work
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub action: TaskAction,
}

/// Directed acyclic graph of tasks. Edges point from a predecessor to the
/// task waiting on it.
#[derive(Debug, Default)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    node_map: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full build: per root a clean task preceding its compile tasks, plus
    /// `build-all` waiting on every compile task
    pub fn build(pipelines: &[PipelineDefinition]) -> Result<Self, GraphError> {
        let mut wanted: Vec<TaskId> = Vec::with_capacity(pipelines.len() * 2 + 1);
        for pipeline in pipelines {
            let clean = TaskId::clean(&pipeline.root.name);
            if !wanted.contains(&clean) {
                wanted.push(clean);
            }
            wanted.push(TaskId::for_pipeline(pipeline));
        }
        wanted.push(TaskId::build_all());

        Self::subset(pipelines, &wanted)
    }

    /// Only the listed tasks, with the edges among them. Used for
    /// incremental rebuilds.
    pub fn subset(pipelines: &[PipelineDefinition], ids: &[TaskId]) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        let mut compiles = Vec::new();

        for pipeline in pipelines {
            let clean = TaskId::clean(&pipeline.root.name);
            if ids.contains(&clean) && !graph.contains(&clean) {
                let dirs = pipelines
                    .iter()
                    .filter(|p| p.root.name == pipeline.root.name)
                    .map(|p| p.dest.clone())
                    .collect();
                graph.add_task(clean.clone(), TaskAction::Clean(dirs));
            }

            let compile = TaskId::for_pipeline(pipeline);
            if ids.contains(&compile) {
                graph.add_task(compile.clone(), TaskAction::Compile(Arc::new(pipeline.clone())));
                if graph.contains(&clean) {
                    graph.add_dependency(&compile, &clean)?;
                }
                compiles.push(compile);
            }
        }

        let build_all = TaskId::build_all();
        if ids.contains(&build_all) {
            graph.add_task(build_all.clone(), TaskAction::Aggregate);
            for compile in &compiles {
                graph.add_dependency(&build_all, compile)?;
            }
        }

        if let Some(missing) = ids.iter().find(|id| !graph.contains(id)) {
            return Err(GraphError::TaskNotFound(missing.to_string()));
        }

        Ok(graph)
    }

    /// Adds a task; an existing id keeps its original node
    pub fn add_task(&mut self, id: TaskId, action: TaskAction) -> NodeIndex {
        if let Some(idx) = self.node_map.get(&id) {
            return *idx;
        }
        let idx = self.graph.add_node(TaskNode {
            id: id.clone(),
            action,
        });
        self.node_map.insert(id, idx);
        idx
    }

    /// Adds an edge: `task` waits on `depends_on`
    pub fn add_dependency(&mut self, task: &TaskId, depends_on: &TaskId) -> Result<(), GraphError> {
        if task == depends_on {
            return Err(GraphError::SelfDependency(task.to_string()));
        }

        let task_idx = *self
            .node_map
            .get(task)
            .ok_or_else(|| GraphError::TaskNotFound(task.to_string()))?;
        let dep_idx = *self
            .node_map
            .get(depends_on)
            .ok_or_else(|| GraphError::TaskNotFound(depends_on.to_string()))?;

        let edge = self.graph.add_edge(dep_idx, task_idx, ());

        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(GraphError::CycleDetected(
                task.to_string(),
                depends_on.to_string(),
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.node_map.contains_key(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Task ids in construction order
    pub fn ids(&self) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].id.clone())
            .collect()
    }

    /// Direct predecessors of a task, in construction order
    pub fn predecessors(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a task, in construction order
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(idx) = self.node_map.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(*idx, direction).collect();
        found.sort();
        found.into_iter().map(|i| self.graph[i].id.clone()).collect()
    }

    /// Nodes with their position, predecessor count and dependent positions.
    /// Positions are construction order indices.
    pub(crate) fn into_schedule(self) -> Vec<(TaskNode, usize, Vec<usize>)> {
        let graph = self.graph;
        let links: Vec<(usize, Vec<usize>)> = graph
            .node_indices()
            .map(|idx| {
                let waiting = graph.neighbors_directed(idx, Direction::Incoming).count();
                let mut dependents: Vec<usize> = graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .map(NodeIndex::index)
                    .collect();
                dependents.sort_unstable();
                (waiting, dependents)
            })
            .collect();

        let (nodes, _) = graph.into_nodes_edges();
        nodes
            .into_iter()
            .zip(links)
            .map(|(node, (waiting, dependents))| (node.weight, waiting, dependents))
            .collect()
    }
}
