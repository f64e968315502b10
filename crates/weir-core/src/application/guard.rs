//! The transition guard
//!
//! Commands for one element instance can originate from several logical
//! sources at once: user requests, timers, job completions, terminations
//! cascading down from a parent. The log totally orders them, so the guard
//! only has to compare the requested intent against persisted state to
//! detect the stale ones. A violation rejects the command before any
//! processor logic runs; nothing is mutated.

use crate::domain::context::{ElementContext, ElementIntent};
use crate::domain::graph::{ElementType, ExecutableNode, ProcessGraph};
use crate::domain::instance::{ElementInstance, Lifecycle};
use crate::domain::state::RuntimeStateStore;
use crate::error::Rejection;

/// Validates that a lifecycle command is consistent with persisted state
#[derive(Debug, Default)]
pub struct TransitionGuard;

impl TransitionGuard {
    /// Create a guard
    pub fn new() -> Self {
        Self
    }

    /// Check one command against the current runtime state
    pub fn is_valid_transition(
        &self,
        context: &ElementContext,
        node: &ExecutableNode,
        graph: &ProcessGraph,
        state: &dyn RuntimeStateStore,
    ) -> Result<(), Rejection> {
        match context.intent {
            ElementIntent::ActivateElement => self.check_activate(context, node, graph, state),
            ElementIntent::CompleteElement => self.check_complete(context, state),
            ElementIntent::TerminateElement => self.check_terminate(context, state),
            ElementIntent::ContinueTerminating => self.check_continue_terminating(context, state),
            ElementIntent::CompleteExecutionListener => self.check_complete_listener(context, state),
            other => Err(self.reject(
                context,
                format!("intent {other:?} is not a guarded lifecycle command"),
            )),
        }
    }

    fn check_activate(
        &self,
        context: &ElementContext,
        node: &ExecutableNode,
        graph: &ProcessGraph,
        state: &dyn RuntimeStateStore,
    ) -> Result<(), Rejection> {
        if !context.is_root() {
            let scope = state.flow_scope_instance(context).ok_or_else(|| {
                self.reject(
                    context,
                    format!(
                        "no flow scope instance {} to activate element '{}' in",
                        context.flow_scope_key, context.element_id
                    ),
                )
            })?;
            if scope.state != Lifecycle::Activated {
                return Err(self.reject(
                    context,
                    format!(
                        "flow scope '{}' is {:?}, expected Activated",
                        scope.element_id, scope.state
                    ),
                ));
            }
            if scope.is_interrupted_by_other(&context.element_id) {
                return Err(self.reject(
                    context,
                    format!(
                        "flow scope '{}' was interrupted by '{}'",
                        scope.element_id,
                        scope.interrupted_by.as_deref().unwrap_or_default()
                    ),
                ));
            }
        }

        // Re-processing the command of an existing, still-activating
        // instance happens when an incident raised during activation is
        // resolved. Any other pre-existing state is a stale command.
        if let Some(existing) = self.existing_instance(context, state) {
            return if existing.state == Lifecycle::Activating {
                Ok(())
            } else {
                Err(self.reject(
                    context,
                    format!(
                        "element instance {} is already {:?}",
                        existing.key, existing.state
                    ),
                ))
            };
        }

        match node.element_type {
            ElementType::ParallelGateway => self.check_parallel_join(context, node, state),
            ElementType::InclusiveGateway => self.check_inclusive_join(context, node, graph, state),
            _ => Ok(()),
        }
    }

    fn check_parallel_join(
        &self,
        context: &ElementContext,
        node: &ExecutableNode,
        state: &dyn RuntimeStateStore,
    ) -> Result<(), Rejection> {
        let required = node.incoming.len() as u32;
        let taken = state.taken_sequence_flows(context.flow_scope_key, &node.id);
        if taken >= required {
            Ok(())
        } else {
            Err(self.reject(
                context,
                format!(
                    "not all sequence flows to parallel gateway '{}' have been taken: {taken} of {required}",
                    node.id
                ),
            ))
        }
    }

    fn check_inclusive_join(
        &self,
        context: &ElementContext,
        node: &ExecutableNode,
        graph: &ProcessGraph,
        state: &dyn RuntimeStateStore,
    ) -> Result<(), Rejection> {
        let required = node.incoming.len() as u32;
        let taken = state.taken_sequence_flows(context.flow_scope_key, &node.id);
        if taken >= required {
            return Ok(());
        }
        if taken > 0 && !self.gateway_still_reachable(context, node, graph, state) {
            return Ok(());
        }
        Err(self.reject(
            context,
            format!(
                "inclusive gateway '{}' is still awaiting incoming tokens: {taken} of {required} flows taken",
                node.id
            ),
        ))
    }

    /// Whether some currently-active sibling of the gateway can still put a
    /// token on one of its incoming flows. Siblings whose only path into the
    /// gateway has already delivered are not distinguished here; the query
    /// asks about graph reachability from live elements.
    fn gateway_still_reachable(
        &self,
        context: &ElementContext,
        node: &ExecutableNode,
        graph: &ProcessGraph,
        state: &dyn RuntimeStateStore,
    ) -> bool {
        state
            .active_siblings(context.flow_scope_key)
            .iter()
            .filter(|sibling| sibling.element_id != node.id)
            .any(|sibling| graph.can_reach(&sibling.element_id, &node.id))
    }

    fn check_complete(
        &self,
        context: &ElementContext,
        state: &dyn RuntimeStateStore,
    ) -> Result<(), Rejection> {
        let instance = self.require_instance(context, state)?;
        if !matches!(instance.state, Lifecycle::Activated | Lifecycle::Completing) {
            return Err(self.reject(
                context,
                format!(
                    "element instance {} is {:?}, expected Activated or Completing",
                    instance.key, instance.state
                ),
            ));
        }
        if !context.is_root() {
            let scope = state.flow_scope_instance(context).ok_or_else(|| {
                self.reject(
                    context,
                    format!("flow scope instance {} no longer exists", context.flow_scope_key),
                )
            })?;
            if scope.state != Lifecycle::Activated {
                return Err(self.reject(
                    context,
                    format!(
                        "flow scope '{}' is {:?}, expected Activated",
                        scope.element_id, scope.state
                    ),
                ));
            }
            if scope.is_interrupted_by_other(&context.element_id) {
                return Err(self.reject(
                    context,
                    format!(
                        "flow scope '{}' was interrupted by '{}'",
                        scope.element_id,
                        scope.interrupted_by.as_deref().unwrap_or_default()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_terminate(
        &self,
        context: &ElementContext,
        state: &dyn RuntimeStateStore,
    ) -> Result<(), Rejection> {
        let instance = self.require_instance(context, state)?;
        if instance.state.is_active() {
            Ok(())
        } else {
            Err(self.reject(
                context,
                format!(
                    "element instance {} is {:?}, expected Activating, Activated or Completing",
                    instance.key, instance.state
                ),
            ))
        }
    }

    fn check_continue_terminating(
        &self,
        context: &ElementContext,
        state: &dyn RuntimeStateStore,
    ) -> Result<(), Rejection> {
        let instance = self.require_instance(context, state)?;
        if instance.state == Lifecycle::Terminating {
            Ok(())
        } else {
            Err(self.reject(
                context,
                format!(
                    "element instance {} is {:?}, expected Terminating",
                    instance.key, instance.state
                ),
            ))
        }
    }

    fn check_complete_listener(
        &self,
        context: &ElementContext,
        state: &dyn RuntimeStateStore,
    ) -> Result<(), Rejection> {
        let instance = self.require_instance(context, state)?;
        if !matches!(instance.state, Lifecycle::Activating | Lifecycle::Completing) {
            return Err(self.reject(
                context,
                format!(
                    "element instance {} is {:?}, expected Activating or Completing",
                    instance.key, instance.state
                ),
            ));
        }
        if let Some(index) = context.listener_index {
            if index != instance.listener_cursor {
                return Err(self.reject(
                    context,
                    format!(
                        "listener {index} completed out of order, the chain is at index {}",
                        instance.listener_cursor
                    ),
                ));
            }
        }
        Ok(())
    }

    fn existing_instance(
        &self,
        context: &ElementContext,
        state: &dyn RuntimeStateStore,
    ) -> Option<ElementInstance> {
        if context.element_instance_key.is_set() {
            state.element_instance(context.element_instance_key)
        } else {
            None
        }
    }

    fn require_instance(
        &self,
        context: &ElementContext,
        state: &dyn RuntimeStateStore,
    ) -> Result<ElementInstance, Rejection> {
        self.existing_instance(context, state).ok_or_else(|| {
            self.reject(
                context,
                format!(
                    "no element instance {} for element '{}'",
                    context.element_instance_key, context.element_id
                ),
            )
        })
    }

    fn reject(&self, context: &ElementContext, reason: String) -> Rejection {
        Rejection::new(context.intent, context.element_instance_key, reason)
    }
}
