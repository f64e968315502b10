use crate::application::processor::{ElementProcessor, StepServices};
use crate::domain::context::ElementContext;
use crate::domain::graph::{ElementType, ExecutableNode, SequenceFlow};
use crate::error::{Failure, FailureKind, ProcessingError};

/// Gateways
///
/// Join semantics live in the transition guard: a joining gateway's
/// activate command is only accepted once enough incoming flows were taken.
/// The processor's job is the fork side, picking which outgoing flows get
/// the token on completion.
pub struct GatewayProcessor;

impl ElementProcessor for GatewayProcessor {
    fn on_activate(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        if node.element_type == ElementType::EventBasedGateway {
            services.open_subscription(context);
        }
        Ok(())
    }

    fn is_wait_state(&self, node: &ExecutableNode) -> bool {
        node.element_type == ElementType::EventBasedGateway
    }

    fn on_complete(
        &self,
        node: &ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<(), ProcessingError> {
        if node.element_type == ElementType::EventBasedGateway {
            services.close_subscription(context);
        }
        Ok(())
    }

    fn outgoing_flows<'g>(
        &self,
        node: &'g ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<Vec<&'g SequenceFlow>, ProcessingError> {
        match node.element_type {
            ElementType::ExclusiveGateway => self.select_exclusive(node, context, services),
            ElementType::InclusiveGateway => self.select_inclusive(node, context, services),
            ElementType::EventBasedGateway => self.select_triggered(node, context),
            _ => Ok(node.outgoing.iter().collect()),
        }
    }
}

impl GatewayProcessor {
    /// First flow whose condition holds, in declaration order; the default
    /// flow is the fallback when every condition is false.
    fn select_exclusive<'g>(
        &self,
        node: &'g ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<Vec<&'g SequenceFlow>, ProcessingError> {
        let scope = services
            .state
            .effective_variables(context.element_instance_key);
        for flow in &node.outgoing {
            if node.default_flow.as_deref() == Some(flow.id.as_str()) {
                continue;
            }
            let taken = match &flow.condition {
                Some(condition) => services.evaluator.evaluate_bool(condition, &scope)?,
                None => true,
            };
            if taken {
                return Ok(vec![flow]);
            }
        }
        if let Some(default_id) = &node.default_flow {
            if let Some(flow) = node.outgoing.iter().find(|flow| &flow.id == default_id) {
                return Ok(vec![flow]);
            }
        }
        Err(Failure::new(
            FailureKind::Configuration,
            format!(
                "no outgoing sequence flow of exclusive gateway '{}' could be taken",
                node.id
            ),
        )
        .into())
    }

    /// Every flow whose condition holds; the default flow is the fallback
    /// when none does.
    fn select_inclusive<'g>(
        &self,
        node: &'g ExecutableNode,
        context: &ElementContext,
        services: &mut StepServices<'_>,
    ) -> Result<Vec<&'g SequenceFlow>, ProcessingError> {
        let scope = services
            .state
            .effective_variables(context.element_instance_key);
        let mut selected = Vec::new();
        for flow in &node.outgoing {
            if node.default_flow.as_deref() == Some(flow.id.as_str()) {
                continue;
            }
            let taken = match &flow.condition {
                Some(condition) => services.evaluator.evaluate_bool(condition, &scope)?,
                None => true,
            };
            if taken {
                selected.push(flow);
            }
        }
        if selected.is_empty() {
            if let Some(default_id) = &node.default_flow {
                if let Some(flow) = node.outgoing.iter().find(|flow| &flow.id == default_id) {
                    selected.push(flow);
                }
            }
        }
        if selected.is_empty() {
            return Err(Failure::new(
                FailureKind::Configuration,
                format!(
                    "no outgoing sequence flow of inclusive gateway '{}' could be taken",
                    node.id
                ),
            )
            .into());
        }
        Ok(selected)
    }

    /// The flow chosen by whichever event fired first, recorded on the
    /// completing command by the event system
    fn select_triggered<'g>(
        &self,
        node: &'g ExecutableNode,
        context: &ElementContext,
    ) -> Result<Vec<&'g SequenceFlow>, ProcessingError> {
        let triggered = context.triggered_flow_id.as_deref().ok_or_else(|| {
            Failure::new(
                FailureKind::Configuration,
                format!(
                    "event-based gateway '{}' completed without a triggering event",
                    node.id
                ),
            )
        })?;
        node.outgoing
            .iter()
            .find(|flow| flow.id == triggered)
            .map(|flow| vec![flow])
            .ok_or_else(|| {
                Failure::new(
                    FailureKind::Configuration,
                    format!(
                        "event-based gateway '{}' has no outgoing flow '{triggered}'",
                        node.id
                    ),
                )
                .into()
            })
    }
}
