//! Escalation routing.
//!
//! A failed node first offers its escalation to its own function's procedure,
//! then to each parallel owner up the tree. Nodes passed on the way are
//! cleared together with everything they instigated. An escalation no node
//! handles walks the global levels in [`EscalationLevel`] order; one that
//! reaches no handler at all tears the process down.

use core::sync::atomic::Ordering;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use cadre_core::escalation::{Escalation, EscalationLevel};
use cadre_core::function::{FunctionMetaData, Parameter};
use cadre_core::governance::DeactivationStrategy;

use crate::hooks::ExecutionEvent;
use crate::node::{ExecutionNode, FunctionState, NodeId};
use crate::thread::{Activation, Runner};

impl Runner<'_> {
    /// Routes `escalation` raised by node `failed`, returning the node to run next.
    pub(crate) fn escalate(&mut self, failed: NodeId, escalation: Escalation) -> Option<NodeId> {
        if self.thread.resource_failure.swap(false, Ordering::AcqRel) {
            tracing::debug!(error = %escalation, "asynchronous operation failed");
        }
        let origin = self
            .inner
            .nodes
            .get(failed)
            .map(|node| node.name().to_string())
            .unwrap_or_default();
        tracing::debug!(function = %origin, error = %escalation, "escalating");

        let mut current = failed;
        while let Some(node) = self.inner.nodes.get(current) {
            let function = Arc::clone(&node.function);
            let owner = node.parallel_owner;

            let found = catch_unwind(AssertUnwindSafe(|| {
                function.escalation_procedure().find(&escalation).copied()
            }));
            let handler = match found {
                Ok(handler) => handler,
                Err(_) => {
                    tracing::error!(
                        function = function.name(),
                        "escalation procedure panicked, framework state may be corrupt"
                    );
                    return self.set_handled(current);
                }
            };

            if let Some(handler) = handler {
                match self.office.metadata.function_by_id(handler).cloned() {
                    Some(handler) => return self.replace_with_handler(current, handler, &escalation, &origin),
                    None => tracing::warn!(%handler, "escalation handler is not registered"),
                }
            }

            match owner {
                Some(owner) => {
                    let head = self
                        .inner
                        .nodes
                        .get(owner)
                        .and_then(|owner| owner.parallel)
                        .unwrap_or(current);
                    self.clear_chain(head, &escalation);
                    if let Some(owner) = self.inner.nodes.get_mut(owner) {
                        owner.parallel = None;
                    }
                    current = owner;
                }
                None => {
                    self.clear_chain(current, &escalation);
                    break;
                }
            }
        }

        if let Some((callback, parent)) = self.inner.completion_callback.take() {
            tracing::debug!(error = %escalation, "escalation passed to instigating thread");
            parent.activate(Activation::Callback {
                callback,
                outcome: Some(escalation),
            });
            self.maybe_complete();
            return None;
        }
        self.escalate_globally(escalation, &origin)
    }

    fn set_handled(&mut self, id: NodeId) -> Option<NodeId> {
        self.inner.nodes.get_mut(id)?.state = FunctionState::ActivateNextInFlow;
        Some(id)
    }

    /// Puts a node for `handler` in place of node `id`.
    fn replace_with_handler(
        &mut self,
        id: NodeId,
        handler: Arc<FunctionMetaData>,
        escalation: &Escalation,
        origin: &str,
    ) -> Option<NodeId> {
        let (next, owner, parallel) = {
            let node = self.inner.nodes.get(id)?;
            (node.next, node.parallel_owner, node.parallel)
        };
        if let Some(parallel) = parallel {
            self.clear_chain(parallel, escalation);
        }

        let flow = self.inner.new_flow(None);
        let parameter: Parameter = Box::new(escalation.clone());
        let handler_name = handler.name().to_string();
        let mut node = ExecutionNode::new(handler, flow, Some(parameter));
        node.strategy = DeactivationStrategy::Disregard;
        node.next = next;
        node.parallel_owner = owner;
        let created = self.inner.insert(node);

        let owned = owner
            .and_then(|owner| self.inner.nodes.get_mut(owner))
            .filter(|owner| owner.parallel == Some(id));
        match owned {
            Some(owner) => owner.parallel = Some(created),
            None => {
                let predecessor = self
                    .inner
                    .nodes
                    .iter()
                    .find(|(_, node)| node.next == Some(id))
                    .map(|(predecessor, _)| predecessor);
                if let Some(predecessor) = predecessor.and_then(|id| self.inner.nodes.get_mut(id)) {
                    predecessor.next = Some(created);
                }
            }
        }

        if let Some(mut handled) = self.inner.nodes.remove(id) {
            handled.state = FunctionState::Failed;
            let objects = handled.take_objects();
            let flow = handled.flow;
            drop(handled);
            self.release(origin, objects);
            self.finish_flow(flow, None);
        }

        tracing::debug!(function = origin, handler = %handler_name, "escalation handled");
        let (function, cause) = (origin.to_string(), escalation.to_string());
        self.emit(|process| ExecutionEvent::Escalated {
            process,
            function,
            cause,
            handler: Some(handler_name),
            level: None,
        });
        Some(created)
    }

    /// Removes `start`, its successors and everything they instigated in parallel.
    fn clear_chain(&mut self, start: NodeId, escalation: &Escalation) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(mut node) = self.inner.nodes.remove(id) else {
                continue;
            };
            node.state = FunctionState::Failed;
            stack.extend(node.next);
            stack.extend(node.parallel);

            let function = node.name().to_string();
            let objects = node.take_objects();
            let flow = node.flow;
            drop(node);
            tracing::trace!(function = %function, "function cleared");
            self.release(&function, objects);
            self.emit(|process| ExecutionEvent::FunctionCleared { process, function });
            self.finish_flow(flow, Some(escalation.clone()));
        }
    }

    /// Offers an escalation no node handled to the global levels.
    fn escalate_globally(&mut self, escalation: Escalation, origin: &str) -> Option<NodeId> {
        let mut level = self.inner.escalation_level;
        while let Some(current) = level {
            level = current.next();
            let Some(handler) = self.global_handler(current, &escalation) else {
                continue;
            };
            self.inner.escalation_level = level;

            let flow = self.inner.new_flow(None);
            let handler_name = handler.name().to_string();
            let parameter: Parameter = Box::new(escalation.clone());
            let mut node = ExecutionNode::new(handler, flow, Some(parameter));
            node.strategy = DeactivationStrategy::Disregard;
            node.global_handler = Some(current);
            let created = self.inner.insert(node);

            tracing::debug!(function = origin, handler = %handler_name, level = %current, "escalation handled globally");
            let (function, cause) = (origin.to_string(), escalation.to_string());
            self.emit(|process| ExecutionEvent::Escalated {
                process,
                function,
                cause,
                handler: Some(handler_name),
                level: Some(current),
            });
            return Some(created);
        }

        self.inner.escalation_level = None;
        tracing::error!(function = origin, error = %escalation, "unhandled escalation, tearing process down");
        let (function, cause) = (origin.to_string(), escalation.to_string());
        self.emit(|process| ExecutionEvent::Escalated {
            process,
            function,
            cause,
            handler: None,
            level: None,
        });
        self.thread.process.tear_down(escalation);
        self.abandon();
        None
    }

    fn global_handler(&self, level: EscalationLevel, escalation: &Escalation) -> Option<Arc<FunctionMetaData>> {
        match level {
            EscalationLevel::Flow => {
                let metadata = &self.office.metadata;
                let found = catch_unwind(AssertUnwindSafe(|| metadata.procedure().find(escalation).copied()));
                match found {
                    Ok(handler) => handler.and_then(|id| metadata.function_by_id(id)).cloned(),
                    Err(_) => {
                        tracing::error!("office escalation procedure panicked");
                        None
                    }
                }
            }
            EscalationLevel::Office => self.office.office_handler.clone(),
            EscalationLevel::InvocationHandler => self.thread.process.invocation_handler.clone(),
            EscalationLevel::OfficeFloor => self.office.floor_handler.clone(),
        }
    }
}
