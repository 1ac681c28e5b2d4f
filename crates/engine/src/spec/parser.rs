//! Workflow YAML loader.

use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::spec::graph::TaskGraph;
use crate::spec::types::WorkflowSpec;

/// Parse a YAML string into a validated WorkflowSpec.
pub fn parse_workflow(yaml_content: &str) -> EngineResult<WorkflowSpec> {
    let spec: WorkflowSpec = serde_yaml::from_str(yaml_content)?;

    if spec.name.trim().is_empty() {
        return Err(EngineError::Definition(
            "Workflow name must not be empty".to_string(),
        ));
    }

    // Compiling the graph surfaces every structural definition error.
    TaskGraph::build(&spec)?;

    Ok(spec)
}

/// Read and parse a workflow file.
pub fn parse_workflow_file(path: &Path) -> EngineResult<WorkflowSpec> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Parse(format!("Failed to read {}: {}", path.display(), e))
    })?;
    parse_workflow(&content)
}
