//! Script snapshots
//!
//! A `Script` is the serializable description of a task graph: the snapshot
//! written into a job directory so that a subprocess can reload the graph
//! and re-execute a single named node over a frame list.

use crate::error::GraphError;
use crate::graph::{NodeId, SystemCommand, TaskGraph, TaskList};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Node kinds expressible in a script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeKind {
    SystemCommand { command: String },
    TaskList,
}

/// One node definition: kind-specific fields plus upstream and downstream
/// references by node name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_tasks: Vec<String>,
}

/// Serializable description of a task graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    pub nodes: Vec<NodeDef>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: NodeDef) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Load a script from a JSON snapshot file.
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| GraphError::Script(format!("failed to parse {:?}: {}", path, e)))
    }

    /// Write the script as a JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| GraphError::Script(format!("failed to serialize script: {}", e)))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Build a `TaskGraph` from the definitions, resolving name references.
    /// Duplicate names and references to unknown nodes are errors.
    pub fn build(&self) -> Result<TaskGraph, GraphError> {
        let mut ids: BTreeMap<&str, NodeId> = BTreeMap::new();
        for (index, def) in self.nodes.iter().enumerate() {
            if ids.insert(def.name.as_str(), NodeId(index)).is_some() {
                return Err(GraphError::Script(format!(
                    "duplicate node name {:?}",
                    def.name
                )));
            }
        }

        let resolve = |def: &NodeDef, names: &[String]| -> Result<Vec<NodeId>, GraphError> {
            names
                .iter()
                .map(|name| {
                    ids.get(name.as_str()).copied().ok_or_else(|| {
                        GraphError::Script(format!(
                            "{:?} references unknown node {:?}",
                            def.name, name
                        ))
                    })
                })
                .collect()
        };

        let mut graph = TaskGraph::new();
        for def in &self.nodes {
            let pre_tasks = resolve(def, &def.pre_tasks)?;
            let post_tasks = resolve(def, &def.post_tasks)?;
            match &def.kind {
                NodeKind::SystemCommand { command } => {
                    graph.add(Box::new(
                        SystemCommand::new(def.name.as_str(), command.as_str())
                            .with_pre_tasks(pre_tasks)
                            .with_post_tasks(post_tasks),
                    ));
                }
                NodeKind::TaskList => {
                    graph.add(Box::new(
                        TaskList::new(def.name.as_str())
                            .with_pre_tasks(pre_tasks)
                            .with_post_tasks(post_tasks),
                    ));
                }
            }
        }

        graph.set_script(self.clone());
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_script() -> Script {
        let mut script = Script::new();
        script.add(NodeDef {
            name: "render".to_string(),
            kind: NodeKind::SystemCommand {
                command: "echo rendering ${frame}".to_string(),
            },
            pre_tasks: vec![],
            post_tasks: vec![],
        });
        script.add(NodeDef {
            name: "publish".to_string(),
            kind: NodeKind::TaskList,
            pre_tasks: vec!["render".to_string()],
            post_tasks: vec![],
        });
        script
    }

    #[test]
    fn test_build_resolves_references() {
        let graph = example_script().build().unwrap();
        assert_eq!(graph.len(), 2);
        let render = graph.by_name("render").unwrap();
        let publish = graph.by_name("publish").unwrap();
        assert_ne!(render, publish);
        assert!(graph.script().is_some());
    }

    #[test]
    fn test_build_rejects_unknown_reference() {
        let mut script = Script::new();
        script.add(NodeDef {
            name: "publish".to_string(),
            kind: NodeKind::TaskList,
            pre_tasks: vec!["missing".to_string()],
            post_tasks: vec![],
        });
        assert!(matches!(script.build(), Err(GraphError::Script(_))));
    }

    #[test]
    fn test_build_rejects_duplicate_names() {
        let mut script = Script::new();
        for _ in 0..2 {
            script.add(NodeDef {
                name: "render".to_string(),
                kind: NodeKind::TaskList,
                pre_tasks: vec![],
                post_tasks: vec![],
            });
        }
        assert!(matches!(script.build(), Err(GraphError::Script(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        let script = example_script();
        script.save(&path).unwrap();
        let loaded = Script::load(&path).unwrap();
        assert_eq!(loaded.nodes.len(), 2);
        assert_eq!(loaded.nodes[1].pre_tasks, vec!["render".to_string()]);
    }
}
