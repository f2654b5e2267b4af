//! Execution nodes and the arena holding them.
//!
//! A node is one pending or running function execution. Nodes of a thread
//! state form a tree: `next` links siblings of the same sequence, `parallel`
//! points at the first node that must finish before this one continues, and
//! `parallel_owner` points back at the node waiting on this one.
//!
//! ```text
//!   A ──parallel──► B ──next──► B'
//!   │               ▲
//!   next            └── parallel_owner = A
//!   ▼
//!   C
//! ```
//!
//! Links are [`NodeId`]s into a [`NodeArena`]. Ids carry a generation, so an
//! id held after its node was removed never resolves to a newer node in the
//! same slot.

use core::fmt;
use std::sync::Arc;

use cadre_core::escalation::{Escalation, EscalationLevel};
use cadre_core::function::{FlowCallback, FunctionMetaData, ManagedFunction, Parameter};
use cadre_core::governance::DeactivationStrategy;
use cadre_core::object::ManagedObjectContainer;
use hashbrown::HashMap;

// ─────────────────────────────────────────────────────────────────────────────
// NodeId / NodeArena
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a node in a [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// Slot of the node in its arena.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation of the slot when the node was inserted.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}v{}", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Generational arena.
pub struct NodeArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> NodeArena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, reusing a vacant slot when one exists.
    pub fn insert(&mut self, value: T) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = match slot {
                Slot::Vacant { generation } => generation.wrapping_add(1),
                Slot::Occupied { generation, .. } => *generation,
            };
            *slot = Slot::Occupied { generation, value };
            return NodeId { index, generation };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Returns the value for `id`, unless it has been removed.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&T> {
        match self.slots.get(id.index())? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        match self.slots.get_mut(id.index())? {
            Slot::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Returns `true` while `id` resolves.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Removes and returns the value for `id`.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation => {
                let vacant = Slot::Vacant {
                    generation: *generation,
                };
                let Slot::Occupied { value, .. } = core::mem::replace(slot, vacant) else {
                    return None;
                };
                self.free.push(id.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates stored values with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => Some((
                    NodeId {
                        index: u32::try_from(index).unwrap_or(u32::MAX),
                        generation: *generation,
                    },
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }
}

impl<T> fmt::Debug for NodeArena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeArena")
            .field("len", &self.len)
            .field("capacity", &self.slots.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flows
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of a flow within a thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId(pub(crate) u64);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow_{}", self.0)
    }
}

/// Group of nodes instigated together, completing as one.
pub(crate) struct Flow {
    /// Nodes of the flow still in the tree.
    pub live: usize,
    /// Run once `live` drops to zero, or when the flow is cleared.
    pub callback: Option<FlowCallback>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionNode
// ─────────────────────────────────────────────────────────────────────────────

/// Where a node is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionState {
    /// Sourcing required managed objects.
    LoadManagedObjects,
    /// Aligning active governance with the function's requirement.
    GovernManagedObjects,
    /// Handing loaded objects their dependencies.
    CoordinateManagedObjects,
    /// Running execution passes.
    Execute,
    /// Deciding the continuation after the completing pass.
    HandleCompletion,
    /// Unlinking the node and moving on.
    ActivateNextInFlow,
    /// Finished normally.
    Completed,
    /// Abandoned by escalation or teardown.
    Failed,
}

impl fmt::Display for FunctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadManagedObjects => "load",
            Self::GovernManagedObjects => "govern",
            Self::CoordinateManagedObjects => "coordinate",
            Self::Execute => "execute",
            Self::HandleCompletion => "handle-completion",
            Self::ActivateNextInFlow => "activate-next",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One function execution within a thread state.
pub(crate) struct ExecutionNode {
    pub function: Arc<FunctionMetaData>,
    pub flow: FlowId,
    pub state: FunctionState,
    pub started: bool,

    pub next: Option<NodeId>,
    pub parallel: Option<NodeId>,
    pub parallel_owner: Option<NodeId>,

    /// Function scoped containers, keyed by slot.
    pub objects: HashMap<usize, Arc<ManagedObjectContainer>>,
    pub object_cursor: usize,
    pub coordinate_cursor: usize,
    pub governance_cursor: usize,
    pub governed: bool,
    pub strategy: DeactivationStrategy,

    pub instance: Option<Box<dyn ManagedFunction>>,
    pub parameter: Option<Parameter>,
    pub result: Option<Parameter>,
    pub passes: usize,
    /// Last sequential flow instigated by this node.
    pub sequential_tail: Option<NodeId>,
    pub administered: bool,

    /// Escalation raised while the node was off the thread, handled on its next step.
    pub pending_failure: Option<Escalation>,
    pub suspended: bool,
    pub resumed: bool,
    /// Global level this node handles, for handler nodes created by global search.
    pub global_handler: Option<EscalationLevel>,
}

impl ExecutionNode {
    pub fn new(function: Arc<FunctionMetaData>, flow: FlowId, parameter: Option<Parameter>) -> Self {
        let state = if function.requires_preparation() {
            FunctionState::LoadManagedObjects
        } else {
            FunctionState::Execute
        };
        Self {
            function,
            flow,
            state,
            started: false,
            next: None,
            parallel: None,
            parallel_owner: None,
            objects: HashMap::new(),
            object_cursor: 0,
            coordinate_cursor: 0,
            governance_cursor: 0,
            governed: false,
            strategy: DeactivationStrategy::Enforce,
            instance: None,
            parameter,
            result: None,
            passes: 0,
            sequential_tail: None,
            administered: false,
            pending_failure: None,
            suspended: false,
            resumed: false,
            global_handler: None,
        }
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }

    /// Takes the function scoped containers out for release.
    pub fn take_objects(&mut self) -> Vec<Arc<ManagedObjectContainer>> {
        self.objects.drain().map(|(_, container)| container).collect()
    }
}

impl fmt::Debug for ExecutionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionNode")
            .field("function", &self.function.name())
            .field("flow", &self.flow)
            .field("state", &self.state)
            .field("next", &self.next)
            .field("parallel", &self.parallel)
            .field("parallel_owner", &self.parallel_owner)
            .finish_non_exhaustive()
    }
}
