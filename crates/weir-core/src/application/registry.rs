//! The processor registry
//!
//! A closed dispatch table from element-type tag to processor instance,
//! built once at startup. The construction site matches on every variant of
//! [`ElementType`], so adding a type without mapping it fails to compile;
//! a miss at dispatch time can only mean the table and the compiled graph
//! drifted, which is fatal.

use crate::application::processor::{ContainerProcessor, ElementProcessor};
use crate::application::processors::call_activity::CallActivityProcessor;
use crate::application::processors::event::EventProcessor;
use crate::application::processors::gateway::GatewayProcessor;
use crate::application::processors::multi_instance::MultiInstanceBodyProcessor;
use crate::application::processors::process::ProcessProcessor;
use crate::application::processors::subprocess::{AdHocSubProcessProcessor, EmbeddedSubProcessProcessor};
use crate::application::processors::task::{JobWorkerTaskProcessor, PassThroughTaskProcessor};
use crate::domain::graph::ElementType;
use crate::error::EngineError;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-indexed lookup of processor instances
pub struct ProcessorRegistry {
    processors: HashMap<ElementType, Arc<dyn ElementProcessor>>,
    containers: HashMap<ElementType, Arc<dyn ContainerProcessor>>,
}

impl ProcessorRegistry {
    /// Build the standard table covering every element type
    pub fn standard() -> Self {
        let mut registry = Self {
            processors: HashMap::new(),
            containers: HashMap::new(),
        };

        let process = Arc::new(ProcessProcessor);
        let subprocess = Arc::new(EmbeddedSubProcessProcessor);
        let adhoc = Arc::new(AdHocSubProcessProcessor);
        let multi_instance = Arc::new(MultiInstanceBodyProcessor);
        let call_activity = Arc::new(CallActivityProcessor);
        let job_task = Arc::new(JobWorkerTaskProcessor);
        let pass_through = Arc::new(PassThroughTaskProcessor);
        let event = Arc::new(EventProcessor);
        let gateway = Arc::new(GatewayProcessor);

        for element_type in ElementType::ALL {
            match element_type {
                ElementType::Process => registry.register_container(element_type, process.clone()),
                ElementType::SubProcess | ElementType::EventSubProcess => {
                    registry.register_container(element_type, subprocess.clone())
                }
                ElementType::AdHocSubProcess => {
                    registry.register_container(element_type, adhoc.clone())
                }
                ElementType::MultiInstanceBody => {
                    registry.register_container(element_type, multi_instance.clone())
                }
                ElementType::CallActivity => {
                    registry.register_container(element_type, call_activity.clone())
                }
                ElementType::Task | ElementType::ManualTask => {
                    registry.register(element_type, pass_through.clone())
                }
                ElementType::ServiceTask
                | ElementType::UserTask
                | ElementType::ScriptTask
                | ElementType::SendTask
                | ElementType::ReceiveTask
                | ElementType::BusinessRuleTask => registry.register(element_type, job_task.clone()),
                ElementType::StartEvent
                | ElementType::EndEvent
                | ElementType::IntermediateCatchEvent
                | ElementType::IntermediateThrowEvent
                | ElementType::BoundaryEvent => registry.register(element_type, event.clone()),
                ElementType::ExclusiveGateway
                | ElementType::ParallelGateway
                | ElementType::InclusiveGateway
                | ElementType::EventBasedGateway => registry.register(element_type, gateway.clone()),
            }
        }

        registry
    }

    fn register(&mut self, element_type: ElementType, processor: Arc<dyn ElementProcessor>) {
        self.processors.insert(element_type, processor);
    }

    fn register_container<P>(&mut self, element_type: ElementType, processor: Arc<P>)
    where
        P: ContainerProcessor + 'static,
    {
        self.processors.insert(element_type, processor.clone());
        self.containers.insert(element_type, processor);
    }

    /// The processor for an element type
    pub fn get_processor(&self, element_type: ElementType) -> Result<&dyn ElementProcessor, EngineError> {
        self.processors
            .get(&element_type)
            .map(Arc::as_ref)
            .ok_or(EngineError::UnmappedElementType(element_type))
    }

    /// The container view of an element type's processor. Fails for types
    /// without container semantics.
    pub fn get_container_processor(
        &self,
        element_type: ElementType,
    ) -> Result<&dyn ContainerProcessor, EngineError> {
        match self.containers.get(&element_type) {
            Some(processor) => Ok(processor.as_ref()),
            None if self.processors.contains_key(&element_type) => {
                Err(EngineError::NotAContainer(element_type))
            }
            None => Err(EngineError::UnmappedElementType(element_type)),
        }
    }
}
