//! Processor capability traits
//!
//! Every element type is executed by an [`ElementProcessor`]. Types that
//! nest child instances additionally implement [`ContainerProcessor`]; the
//! registry only hands out the container view for types registered with it.
//! All hooks run synchronously within one command application; a hook that
//! needs to wait emits a job or a follow-up command and returns.

use crate::application::expression::ExpressionEvaluator;
use crate::application::output::OutputLog;
use crate::application::registry::ProcessorRegistry;
use crate::domain::context::ElementContext;
use crate::domain::graph::{ExecutableNode, ProcessGraph, SequenceFlow};
use crate::domain::state::{ProcessGraphProvider, RuntimeStateStore};
use crate::error::ProcessingError;
use crate::types::KeyGenerator;

/// Everything a processor may touch while handling one lifecycle step
///
/// The compiled graph and the registry are shared read-only; the state
/// store and the output log are exclusively owned by the current command
/// application.
pub struct StepServices<'a> {
    /// Runtime state of the partition
    pub state: &'a mut dyn RuntimeStateStore,
    /// All deployed definitions, for cross-definition lookups
    pub graphs: &'a dyn ProcessGraphProvider,
    /// The definition of the element being processed
    pub graph: &'a ProcessGraph,
    /// Dispatch table, for container hook routing
    pub registry: &'a ProcessorRegistry,
    /// Expression evaluation
    pub evaluator: &'a dyn ExpressionEvaluator,
    /// Follow-up records produced by this step
    pub output: &'a mut OutputLog,
    /// Key allocation
    pub keys: &'a mut KeyGenerator,
}

/// Result of a termination hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Termination can be finalized in this command application
    Done,
    /// Children are still winding down; a `ContinueTerminating` command
    /// will finish the job once the last child reports back
    Pending,
}

/// Lifecycle hooks of one element type
///
/// The default implementations give pass-through semantics: activate, run
/// listeners, complete, hand the token onward. Concrete processors override
/// the hooks their type needs.
pub trait ElementProcessor: Send + Sync {
    /// Type-specific setup: variable mappings, subscriptions, jobs
    fn on_activate(
        &self,
        _node: &ExecutableNode,
        _context: &ElementContext,
        _services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        Ok(())
    }

    /// Whether the fully activated element waits for an external trigger
    /// instead of completing on its own
    fn is_wait_state(&self, _node: &ExecutableNode) -> bool {
        false
    }

    /// Invoked once every start-phase listener has completed
    fn finalize_activation(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        let activated = services.transition_to_activated(context);
        if !self.is_wait_state(node) {
            services.complete_element(&activated);
        }
        Ok(())
    }

    /// Type-specific completion work: output mappings, closing subscriptions
    fn on_complete(
        &self,
        _node: &ExecutableNode,
        _context: &ElementContext,
        _services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        Ok(())
    }

    /// Which outgoing flows the completing element hands its token to
    fn outgoing_flows<'g>(
        &self,
        node: &'g ExecutableNode,
        _context: &ElementContext,
        _services: &mut StepServices<'_>,
    ) -> Result<Vec<&'g SequenceFlow>, ProcessingError> {
        Ok(node.outgoing.iter().collect())
    }

    /// Invoked once every end-phase listener has completed; removes the
    /// instance and routes the token onward
    fn finalize_completion(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        let flows = self.outgoing_flows(node, context, services)?;
        services.transition_to_completed(node, context, &flows)
    }

    /// Type-specific teardown. Containers return [`TerminateOutcome::Pending`]
    /// while children are still terminating.
    fn on_terminate(
        &self,
        _node: &ExecutableNode,
        _context: &ElementContext,
        _services: &mut StepServices<'_>,
    ) -> Result<TerminateOutcome, ProcessingError> {
        Ok(TerminateOutcome::Done)
    }

    /// Final step of termination: removes the instance and notifies the
    /// parent or triggers a pending interruption
    fn finalize_termination(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        services.transition_to_terminated(node, context)
    }
}

/// Child-coordination hooks of container types
pub trait ContainerProcessor: ElementProcessor {
    /// Runs before a child of this container fully activates
    fn on_child_activating(
        &self,
        _node: &ExecutableNode,
        _scope_context: &ElementContext,
        _child_context: &ElementContext,
        _services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        Ok(())
    }

    /// Runs before a child of this container completes
    fn on_child_completing(
        &self,
        _node: &ExecutableNode,
        _scope_context: &ElementContext,
        _child_context: &ElementContext,
        _services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        Ok(())
    }

    /// An execution path inside the container is about to finish. The
    /// returned boolean reports whether an aggregate completion condition
    /// is now satisfied.
    fn before_execution_path_completed(
        &self,
        _node: &ExecutableNode,
        _scope_context: &ElementContext,
        _child_context: &ElementContext,
        _services: &mut StepServices<'_>,
    ) -> Result<bool, ProcessingError> {
        Ok(false)
    }

    /// An execution path inside the container finished. Must not fail: an
    /// incident raised here would have nothing left to anchor to.
    fn after_execution_path_completed(
        &self,
        node: &ExecutableNode,
        scope_context: &ElementContext,
        child_context: &ElementContext,
        satisfies_completion_condition: bool,
        services: &mut StepServices<'_>,
    );

    /// A child of this container finished terminating
    fn on_child_terminated(
        &self,
        node: &ExecutableNode,
        scope_context: &ElementContext,
        child_context: &ElementContext,
        services: &mut StepServices<'_>,
    );
}
