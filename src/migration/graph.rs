//! Investigation graph variants and their builders.
//!
//! - **Clean**: fixed sequential pipeline through every domain agent
//! - **Orchestrator**: a central orchestrator dispatching to agents and tools
//! - **Hybrid**: orchestrator routing with safety and confidence gates

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::AgentDomain;
use crate::error::GraphBuildError;

/// Graph implementation used for an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphType {
    /// Sequential, known-good pipeline
    Clean,
    /// Orchestrator-driven graph
    Orchestrator,
    /// Orchestrator with intelligent routing and safety gates
    Hybrid,
}

impl GraphType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphType::Clean => "clean",
            GraphType::Orchestrator => "orchestrator",
            GraphType::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for GraphType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GraphType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clean" => Ok(GraphType::Clean),
            "orchestrator" => Ok(GraphType::Orchestrator),
            "hybrid" => Ok(GraphType::Hybrid),
            _ => Err(format!("Unknown graph type: {}", s)),
        }
    }
}

/// Role of a node in an investigation graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "domain", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Orchestrator,
    Agent(AgentDomain),
    Tools,
    SafetyGate,
    ConfidenceGate,
    Summary,
    End,
}

/// A node in an investigation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    /// Edge is taken only when the router chooses it
    pub conditional: bool,
}

/// A constructed investigation graph ready for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationGraph {
    pub graph_type: GraphType,
    pub investigation_id: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub built_at: DateTime<Utc>,
}

impl InvestigationGraph {
    fn new(graph_type: GraphType, investigation_id: &str) -> Self {
        Self {
            graph_type,
            investigation_id: investigation_id.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            built_at: Utc::now(),
        }
    }

    fn node(&mut self, id: impl Into<String>, kind: NodeKind) -> String {
        let id = id.into();
        self.nodes.push(GraphNode {
            id: id.clone(),
            kind,
        });
        id
    }

    fn edge(&mut self, from: &str, to: &str, conditional: bool) {
        self.edges.push(GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            conditional,
        });
    }

    /// Look up a node by id.
    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Agent domains present in the graph.
    pub fn agent_domains(&self) -> Vec<AgentDomain> {
        self.nodes
            .iter()
            .filter_map(|n| match n.kind {
                NodeKind::Agent(domain) => Some(domain),
                _ => None,
            })
            .collect()
    }

    /// Check that every edge references an existing node.
    fn validate(self) -> Result<Self, GraphBuildError> {
        for edge in &self.edges {
            if self.get_node(&edge.from).is_none() || self.get_node(&edge.to).is_none() {
                return Err(GraphBuildError::Construction {
                    graph_type: self.graph_type,
                    message: format!("dangling edge {} -> {}", edge.from, edge.to),
                });
            }
        }
        Ok(self)
    }
}

/// Builds one graph variant.
#[cfg_attr(test, mockall::automock)]
pub trait GraphBuilder: Send + Sync {
    /// The variant this builder produces.
    fn graph_type(&self) -> GraphType;

    /// Build a graph for an investigation.
    fn build(&self, investigation_id: &str) -> Result<InvestigationGraph, GraphBuildError>;
}

fn require_inputs(
    graph_type: GraphType,
    investigation_id: &str,
    domains: &[AgentDomain],
) -> Result<(), GraphBuildError> {
    if investigation_id.trim().is_empty() {
        return Err(GraphBuildError::Construction {
            graph_type,
            message: "investigation id is empty".to_string(),
        });
    }
    if domains.is_empty() {
        return Err(GraphBuildError::Construction {
            graph_type,
            message: "no agent domains configured".to_string(),
        });
    }
    Ok(())
}

/// Sequential pipeline: start → agents in order → summary → end.
#[derive(Debug, Clone)]
pub struct CleanGraphBuilder {
    domains: Vec<AgentDomain>,
}

impl CleanGraphBuilder {
    pub fn new(domains: Vec<AgentDomain>) -> Self {
        Self { domains }
    }
}

impl Default for CleanGraphBuilder {
    fn default() -> Self {
        Self::new(AgentDomain::ALL.to_vec())
    }
}

impl GraphBuilder for CleanGraphBuilder {
    fn graph_type(&self) -> GraphType {
        GraphType::Clean
    }

    fn build(&self, investigation_id: &str) -> Result<InvestigationGraph, GraphBuildError> {
        require_inputs(GraphType::Clean, investigation_id, &self.domains)?;

        let mut graph = InvestigationGraph::new(GraphType::Clean, investigation_id);
        let mut previous = graph.node("start", NodeKind::Start);
        for domain in &self.domains {
            let id = graph.node(domain.agent_name(), NodeKind::Agent(*domain));
            graph.edge(&previous, &id, false);
            previous = id;
        }
        let summary = graph.node("summary", NodeKind::Summary);
        graph.edge(&previous, &summary, false);
        let end = graph.node("end", NodeKind::End);
        graph.edge(&summary, &end, false);

        graph.validate()
    }
}

/// Hub-and-spoke graph around an orchestrator node.
#[derive(Debug, Clone)]
pub struct OrchestratorGraphBuilder {
    domains: Vec<AgentDomain>,
}

impl OrchestratorGraphBuilder {
    pub fn new(domains: Vec<AgentDomain>) -> Self {
        Self { domains }
    }
}

impl Default for OrchestratorGraphBuilder {
    fn default() -> Self {
        Self::new(AgentDomain::ALL.to_vec())
    }
}

fn build_hub(
    graph_type: GraphType,
    investigation_id: &str,
    domains: &[AgentDomain],
) -> InvestigationGraph {
    let mut graph = InvestigationGraph::new(graph_type, investigation_id);
    let start = graph.node("start", NodeKind::Start);
    let orchestrator = graph.node("orchestrator", NodeKind::Orchestrator);
    graph.edge(&start, &orchestrator, false);

    let tools = graph.node("tools", NodeKind::Tools);
    graph.edge(&orchestrator, &tools, true);
    graph.edge(&tools, &orchestrator, false);

    for domain in domains {
        let id = graph.node(domain.agent_name(), NodeKind::Agent(*domain));
        graph.edge(&orchestrator, &id, true);
        graph.edge(&id, &orchestrator, false);
    }
    graph
}

impl GraphBuilder for OrchestratorGraphBuilder {
    fn graph_type(&self) -> GraphType {
        GraphType::Orchestrator
    }

    fn build(&self, investigation_id: &str) -> Result<InvestigationGraph, GraphBuildError> {
        require_inputs(GraphType::Orchestrator, investigation_id, &self.domains)?;

        let mut graph = build_hub(GraphType::Orchestrator, investigation_id, &self.domains);
        let summary = graph.node("summary", NodeKind::Summary);
        graph.edge("orchestrator", &summary, true);
        let end = graph.node("end", NodeKind::End);
        graph.edge(&summary, &end, false);

        graph.validate()
    }
}

/// Orchestrator graph with confidence and safety gates before summary.
#[derive(Debug, Clone)]
pub struct HybridGraphBuilder {
    domains: Vec<AgentDomain>,
}

impl HybridGraphBuilder {
    pub fn new(domains: Vec<AgentDomain>) -> Self {
        Self { domains }
    }
}

impl Default for HybridGraphBuilder {
    fn default() -> Self {
        Self::new(AgentDomain::ALL.to_vec())
    }
}

impl GraphBuilder for HybridGraphBuilder {
    fn graph_type(&self) -> GraphType {
        GraphType::Hybrid
    }

    fn build(&self, investigation_id: &str) -> Result<InvestigationGraph, GraphBuildError> {
        require_inputs(GraphType::Hybrid, investigation_id, &self.domains)?;

        let mut graph = build_hub(GraphType::Hybrid, investigation_id, &self.domains);
        let confidence = graph.node("confidence_gate", NodeKind::ConfidenceGate);
        graph.edge("orchestrator", &confidence, true);
        let safety = graph.node("safety_gate", NodeKind::SafetyGate);
        graph.edge(&confidence, &safety, false);
        // Low confidence loops back for another routing decision.
        graph.edge(&confidence, "orchestrator", true);
        let summary = graph.node("summary", NodeKind::Summary);
        graph.edge(&safety, &summary, false);
        let end = graph.node("end", NodeKind::End);
        graph.edge(&summary, &end, false);

        graph.validate()
    }
}

/// Registry of builders keyed by graph type.
#[derive(Clone)]
pub struct GraphBuilders {
    builders: HashMap<GraphType, Arc<dyn GraphBuilder>>,
}

impl GraphBuilders {
    /// Empty registry.
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with the three standard builders over all domains.
    pub fn standard() -> Self {
        Self::empty()
            .with_builder(Arc::new(CleanGraphBuilder::default()))
            .with_builder(Arc::new(OrchestratorGraphBuilder::default()))
            .with_builder(Arc::new(HybridGraphBuilder::default()))
    }

    /// Register a builder, replacing any existing one for its type.
    pub fn with_builder(mut self, builder: Arc<dyn GraphBuilder>) -> Self {
        self.builders.insert(builder.graph_type(), builder);
        self
    }

    /// Build a graph of the given type.
    pub fn build(
        &self,
        graph_type: GraphType,
        investigation_id: &str,
    ) -> Result<InvestigationGraph, GraphBuildError> {
        let builder = self
            .builders
            .get(&graph_type)
            .ok_or(GraphBuildError::BuilderUnavailable { graph_type })?;
        builder.build(investigation_id)
    }

    /// Whether a builder is registered for the type.
    pub fn has(&self, graph_type: GraphType) -> bool {
        self.builders.contains_key(&graph_type)
    }
}

impl Default for GraphBuilders {
    fn default() -> Self {
        Self::standard()
    }
}
