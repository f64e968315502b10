//! The compiled element graph
//!
//! A [`ProcessGraph`] is the immutable, validated output of deployment
//! compilation. It is loaded once per process definition version and shared
//! read-only by the processing of every instance of that definition; nothing
//! in the engine ever mutates it.

use crate::error::EngineError;
use crate::types::Key;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The closed set of element types the engine can execute
///
/// The processor registry must cover every variant; an unmapped type at
/// dispatch time means the registry and this enum have drifted, which is a
/// programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// The root container of a process instance
    Process,
    /// An embedded sub-process
    SubProcess,
    /// A sub-process activated by an event within its scope
    EventSubProcess,
    /// A sub-process whose inner activities are activated on demand
    AdHocSubProcess,
    /// The implicit container wrapped around a multi-instance activity
    MultiInstanceBody,
    /// An activity that creates and awaits a child process instance
    CallActivity,
    /// An undefined task; completes immediately
    Task,
    /// A job-worker backed task
    ServiceTask,
    /// A task assigned to a human, backed by a job
    UserTask,
    /// A scripted task, backed by a job
    ScriptTask,
    /// A message-sending task, backed by a job
    SendTask,
    /// A task that waits for a message, backed by a job
    ReceiveTask,
    /// A decision task, backed by a job
    BusinessRuleTask,
    /// A task performed outside the engine; completes immediately
    ManualTask,
    /// A start event
    StartEvent,
    /// An end event
    EndEvent,
    /// An event that waits for an external trigger
    IntermediateCatchEvent,
    /// An event that fires and continues
    IntermediateThrowEvent,
    /// An event attached to the boundary of an activity
    BoundaryEvent,
    /// A gateway that routes to a single outgoing flow
    ExclusiveGateway,
    /// A gateway that forks and joins all flows
    ParallelGateway,
    /// A gateway that forks and joins a condition-selected subset of flows
    InclusiveGateway,
    /// A gateway whose outgoing route is picked by the first event to occur
    EventBasedGateway,
}

impl ElementType {
    /// Every element type, in registry order
    pub const ALL: [ElementType; 23] = [
        ElementType::Process,
        ElementType::SubProcess,
        ElementType::EventSubProcess,
        ElementType::AdHocSubProcess,
        ElementType::MultiInstanceBody,
        ElementType::CallActivity,
        ElementType::Task,
        ElementType::ServiceTask,
        ElementType::UserTask,
        ElementType::ScriptTask,
        ElementType::SendTask,
        ElementType::ReceiveTask,
        ElementType::BusinessRuleTask,
        ElementType::ManualTask,
        ElementType::StartEvent,
        ElementType::EndEvent,
        ElementType::IntermediateCatchEvent,
        ElementType::IntermediateThrowEvent,
        ElementType::BoundaryEvent,
        ElementType::ExclusiveGateway,
        ElementType::ParallelGateway,
        ElementType::InclusiveGateway,
        ElementType::EventBasedGateway,
    ];

    /// Whether instances of this type contain child element instances
    pub fn is_container(self) -> bool {
        matches!(
            self,
            ElementType::Process
                | ElementType::SubProcess
                | ElementType::EventSubProcess
                | ElementType::AdHocSubProcess
                | ElementType::MultiInstanceBody
                | ElementType::CallActivity
        )
    }

    /// Whether this type joins multiple incoming sequence flows
    pub fn is_joining_gateway(self) -> bool {
        matches!(self, ElementType::ParallelGateway | ElementType::InclusiveGateway)
    }
}

/// A value that is either fixed at deployment time or evaluated per instance
///
/// Dynamic values are written with a leading `=` followed by an expression
/// over the instance's effective variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpressionValue {
    /// A literal value
    Static(String),
    /// An expression evaluated against scope variables
    Expression(String),
}

impl ExpressionValue {
    /// Parse the deployment-time notation: `=expr` is dynamic, anything else
    /// is a literal.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('=') {
            Some(expression) => ExpressionValue::Expression(expression.to_string()),
            None => ExpressionValue::Static(raw.to_string()),
        }
    }
}

/// Job-worker configuration for job-backed tasks and execution listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWorkerProperties {
    /// The type workers subscribe to
    pub job_type: ExpressionValue,
    /// Remaining retries for the job
    pub retries: ExpressionValue,
}

impl JobWorkerProperties {
    /// Job-worker properties with a static type and three retries
    pub fn with_type(job_type: &str) -> Self {
        Self {
            job_type: ExpressionValue::parse(job_type),
            retries: ExpressionValue::Static("3".to_string()),
        }
    }
}

/// A side-effect hook around element activation or completion, realized as a
/// job completed by an external worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionListener {
    /// Worker configuration for the listener job
    pub job: JobWorkerProperties,
    /// When true, variables returned by the listener job are merged into the
    /// element instance's own scope instead of its flow scope.
    pub local: bool,
}

impl ExecutionListener {
    /// A listener with a static job type, merging results into the flow scope
    pub fn with_type(job_type: &str) -> Self {
        Self {
            job: JobWorkerProperties::with_type(job_type),
            local: false,
        }
    }
}

/// A variable mapping applied on activation (input) or completion (output)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMapping {
    /// Expression evaluated against the source scope
    pub source: String,
    /// Variable name written in the target scope
    pub target: String,
}

/// A directed edge between two elements in the same flow scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFlow {
    /// Id of the flow, unique within the process
    pub id: String,
    /// Id of the target element
    pub target: String,
    /// Optional condition; a flow without one is unconditionally taken
    pub condition: Option<String>,
}

impl SequenceFlow {
    /// An unconditional flow
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            condition: None,
        }
    }

    /// A flow guarded by a condition expression
    pub fn conditional(
        id: impl Into<String>,
        target: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            condition: Some(condition.into()),
        }
    }
}

/// Multi-instance configuration carried by a [`ElementType::MultiInstanceBody`] node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiInstanceProperties {
    /// Expression yielding the collection to iterate
    pub input_collection: String,
    /// Variable name the current item is bound to in each child scope
    pub input_element: String,
    /// Id of the inner activity instantiated once per item
    pub inner_element: String,
    /// Optional condition; when it evaluates truthy after a child completes,
    /// remaining children are terminated and the body completes.
    pub completion_condition: Option<String>,
}

/// One typed node of the compiled graph
///
/// The struct is intentionally flat: type-specific fields are optional and
/// only populated for the types that use them, which keeps a single shape
/// for the registry dispatch to work against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableNode {
    /// Element id, unique within the process
    pub id: String,
    /// The element's type tag
    pub element_type: ElementType,
    /// Listeners invoked around activation, in declaration order
    pub start_listeners: Vec<ExecutionListener>,
    /// Listeners invoked around completion, in declaration order
    pub end_listeners: Vec<ExecutionListener>,
    /// Ids of incoming sequence flows
    pub incoming: Vec<String>,
    /// Outgoing sequence flows, in declaration order
    pub outgoing: Vec<SequenceFlow>,
    /// Id of the enclosing container element, absent for the process root
    pub flow_scope: Option<String>,
    /// Direct child element ids, for container types
    pub children: Vec<String>,
    /// Worker configuration, for job-backed tasks
    pub job: Option<JobWorkerProperties>,
    /// Input variable mappings applied on activation
    pub input_mappings: Vec<VariableMapping>,
    /// Output variable mappings applied on completion
    pub output_mappings: Vec<VariableMapping>,
    /// Default flow id, for exclusive gateways
    pub default_flow: Option<String>,
    /// Id of the activity a boundary event is attached to
    pub attached_to: Option<String>,
    /// Whether a boundary event or event sub-process interrupts its scope
    pub interrupting: bool,
    /// Multi-instance configuration, for multi-instance bodies
    pub multi_instance: Option<MultiInstanceProperties>,
    /// Process id a call activity invokes
    pub called_process_id: Option<ExpressionValue>,
}

impl ExecutableNode {
    /// Create a bare node of the given type
    pub fn new(id: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            id: id.into(),
            element_type,
            start_listeners: Vec::new(),
            end_listeners: Vec::new(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
            flow_scope: None,
            children: Vec::new(),
            job: None,
            input_mappings: Vec::new(),
            output_mappings: Vec::new(),
            default_flow: None,
            attached_to: None,
            interrupting: false,
            multi_instance: None,
            called_process_id: None,
        }
    }

    /// Set the enclosing container
    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.flow_scope = Some(scope.into());
        self
    }

    /// Add an outgoing sequence flow
    pub fn with_outgoing(mut self, flow: SequenceFlow) -> Self {
        self.outgoing.push(flow);
        self
    }

    /// Add an incoming sequence flow id
    pub fn with_incoming(mut self, flow_id: impl Into<String>) -> Self {
        self.incoming.push(flow_id.into());
        self
    }

    /// Add a direct child element id
    pub fn with_child(mut self, child_id: impl Into<String>) -> Self {
        self.children.push(child_id.into());
        self
    }

    /// Configure the node as a job-backed task
    pub fn with_job(mut self, job: JobWorkerProperties) -> Self {
        self.job = Some(job);
        self
    }

    /// Add a start-phase execution listener
    pub fn with_start_listener(mut self, listener: ExecutionListener) -> Self {
        self.start_listeners.push(listener);
        self
    }

    /// Add an end-phase execution listener
    pub fn with_end_listener(mut self, listener: ExecutionListener) -> Self {
        self.end_listeners.push(listener);
        self
    }

    /// Configure multi-instance iteration
    pub fn with_multi_instance(mut self, properties: MultiInstanceProperties) -> Self {
        self.multi_instance = Some(properties);
        self
    }

    /// Listeners for the given phase
    pub fn listeners(&self, phase: ListenerPhase) -> &[ExecutionListener] {
        match phase {
            ListenerPhase::Start => &self.start_listeners,
            ListenerPhase::End => &self.end_listeners,
        }
    }
}

/// Which side of the element lifecycle a listener chain belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerPhase {
    /// Between activating and activated
    Start,
    /// Between completing and completed
    End,
}

/// A compiled, validated process definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessGraph {
    /// The modeled process id
    pub process_id: String,
    /// Key assigned to this definition version at deployment
    pub definition_key: Key,
    nodes: HashMap<String, ExecutableNode>,
}

impl ProcessGraph {
    /// Assemble a graph from its nodes and validate its referential
    /// integrity. The node whose id equals `process_id` is the root.
    pub fn new(
        process_id: impl Into<String>,
        definition_key: Key,
        nodes: Vec<ExecutableNode>,
    ) -> Result<Self, String> {
        let process_id = process_id.into();
        let mut by_id = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if by_id.insert(node.id.clone(), node).is_some() {
                return Err(format!("duplicate element id in process '{}'", process_id));
            }
        }
        let graph = Self {
            process_id,
            definition_key,
            nodes: by_id,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), String> {
        let root = self
            .nodes
            .get(&self.process_id)
            .ok_or_else(|| format!("process '{}' has no root element", self.process_id))?;
        if root.element_type != ElementType::Process {
            return Err(format!(
                "root element of '{}' must be a process, found {:?}",
                self.process_id, root.element_type
            ));
        }

        for node in self.nodes.values() {
            for flow in &node.outgoing {
                if !self.nodes.contains_key(&flow.target) {
                    return Err(format!(
                        "element '{}' has an outgoing flow to unknown element '{}'",
                        node.id, flow.target
                    ));
                }
            }
            if let Some(scope) = &node.flow_scope {
                match self.nodes.get(scope) {
                    Some(container) if container.element_type.is_container() => {}
                    Some(container) => {
                        return Err(format!(
                            "element '{}' is scoped to '{}', which is a {:?}, not a container",
                            node.id, scope, container.element_type
                        ));
                    }
                    None => {
                        return Err(format!(
                            "element '{}' is scoped to unknown element '{}'",
                            node.id, scope
                        ));
                    }
                }
            }
            for child in &node.children {
                if !self.nodes.contains_key(child) {
                    return Err(format!(
                        "container '{}' lists unknown child '{}'",
                        node.id, child
                    ));
                }
            }
            if let Some(attached_to) = &node.attached_to {
                if !self.nodes.contains_key(attached_to) {
                    return Err(format!(
                        "boundary event '{}' is attached to unknown element '{}'",
                        node.id, attached_to
                    ));
                }
            }
        }
        Ok(())
    }

    /// Look up an element by id
    pub fn element_by_id(&self, id: &str) -> Option<&ExecutableNode> {
        self.nodes.get(id)
    }

    /// Look up an element by id, failing fatally if it is missing. A miss
    /// here means the command log references a definition the compiler never
    /// produced.
    pub fn require_element(&self, id: &str) -> Result<&ExecutableNode, EngineError> {
        self.nodes.get(id).ok_or_else(|| EngineError::ElementNotFound {
            element_id: id.to_string(),
            definition_key: self.definition_key,
        })
    }

    /// The root process node
    pub fn root(&self) -> &ExecutableNode {
        // validated at construction
        &self.nodes[&self.process_id]
    }

    /// The none-start event of a container, if it has one
    pub fn start_event_of(&self, container_id: &str) -> Option<&ExecutableNode> {
        let container = self.nodes.get(container_id)?;
        container
            .children
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|node| node.element_type == ElementType::StartEvent)
    }

    /// Whether a directed path of sequence flows leads from `from` to `to`.
    ///
    /// Used by the inclusive-gateway join: the gateway may activate early
    /// when no currently-active element can still reach it. The traversal
    /// carries a visited set, so cyclic graphs terminate.
    pub fn can_reach(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(current) {
                for flow in &node.outgoing {
                    if flow.target == to {
                        return true;
                    }
                    stack.push(flow.target.as_str());
                }
            }
        }
        false
    }

    /// Number of elements in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no elements
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
