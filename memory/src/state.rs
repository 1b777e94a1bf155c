// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{Error, MergeFailure, Result};
use crate::memory::Memory;
use crate::options::Options;
use crate::ownership::Ownership;
use crate::path_constraints::PathConstraints;
use crate::smt_solver::{check_with_soft_constraints, SmtModel, SmtSolver, SolverOutcome};
use crate::symbolic_value::{SymbolicValue, SymbolicValueTrait};
use crate::translator::TranslationSession;
use crate::utils::format_values;

use log_derive::logfn_inputs;
use rpds::VectorSync;
use serde_json::json;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// A program point: a method and a statement index within it.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Location {
    pub method: Arc<str>,
    pub statement: u32,
}

impl Location {
    pub fn new(method: &str, statement: u32) -> Location {
        Location {
            method: Arc::from(method),
            statement,
        }
    }
}

/// A node of the execution history. Every state points at the node of its current location;
/// nodes are shared by all the states that went through them.
#[derive(Debug)]
pub struct PathNode {
    pub location: Location,
    parent: Option<Arc<PathNode>>,
    depth: usize,
}

impl PathNode {
    pub fn root(location: Location) -> Arc<PathNode> {
        Arc::new(PathNode {
            location,
            parent: None,
            depth: 0,
        })
    }

    /// The node reached by stepping from node to location.
    pub fn advance(node: &Arc<PathNode>, location: Location) -> Arc<PathNode> {
        Arc::new(PathNode {
            location,
            parent: Some(node.clone()),
            depth: node.depth + 1,
        })
    }

    pub fn parent(&self) -> Option<&Arc<PathNode>> {
        self.parent.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    // Both nodes must be at the same location. The history of the result continues the
    // deeper of the two.
    fn join(left: &Arc<PathNode>, right: &Arc<PathNode>) -> Option<Arc<PathNode>> {
        if left.location != right.location {
            return None;
        }
        if left.depth >= right.depth {
            Some(left.clone())
        } else {
            Some(right.clone())
        }
    }
}

impl Drop for PathNode {
    fn drop(&mut self) {
        // Unlink iteratively so that long histories do not overflow the stack.
        let mut next = self.parent.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.parent.take(),
                Err(..) => break,
            }
        }
    }
}

/// An entry of the call stack.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CallFrame {
    pub method: Arc<str>,
    /// Where execution resumes in the caller. None for the entry method.
    pub return_site: Option<Location>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TerminationReason {
    Returned,
    Exception(Arc<str>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StateStatus {
    Active,
    Terminated(TerminationReason),
}

/// The children of a fork that survived the feasibility check.
#[derive(Debug)]
pub struct ForkResult {
    pub positive: Option<State>,
    pub negative: Option<State>,
}

/// A symbolic execution state: memory, path condition, call stack and history.
#[derive(Clone)]
pub struct State {
    id: u64,
    call_stack: VectorSync<CallFrame>,
    memory: Memory,
    path_constraints: PathConstraints,
    models: Vec<Arc<dyn SmtModel + Send + Sync>>,
    path_node: Arc<PathNode>,
    status: StateStatus,
}

impl Debug for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("location", &self.path_node.location)
            .field("status", &self.status)
            .field("path_constraints", &self.path_constraints)
            .field("models", &self.models.len())
            .finish()
    }
}

impl State {
    /// A state at the start of method entry with empty memory and a trivial path condition.
    pub fn new(entry: &str, options: &Options) -> State {
        let mut memory = Memory::new(options);
        memory.push_frame();
        State {
            id: NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed),
            call_stack: VectorSync::new_sync().push_back(CallFrame {
                method: Arc::from(entry),
                return_site: None,
            }),
            memory,
            path_constraints: PathConstraints::new(),
            models: Vec::new(),
            path_node: PathNode::root(Location::new(entry, 0)),
            status: StateStatus::Active,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ownership(&self) -> Ownership {
        self.memory.ownership()
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn path_constraints(&self) -> &PathConstraints {
        &self.path_constraints
    }

    /// Models known to satisfy the path constraints of this state.
    pub fn models(&self) -> &[Arc<dyn SmtModel + Send + Sync>] {
        &self.models
    }

    pub fn add_model(&mut self, model: Arc<dyn SmtModel + Send + Sync>) {
        self.models.push(model);
    }

    pub fn path_node(&self) -> &Arc<PathNode> {
        &self.path_node
    }

    pub fn location(&self) -> &Location {
        &self.path_node.location
    }

    pub fn call_stack(&self) -> Vec<&CallFrame> {
        self.call_stack.iter().collect()
    }

    pub fn status(&self) -> &StateStatus {
        &self.status
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.status, StateStatus::Terminated(..))
    }

    fn check_active(&self) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::Terminated);
        }
        Ok(())
    }

    /// Allocates a new object of the given dynamic type.
    pub fn allocate(&mut self, type_name: &str) -> Result<Arc<SymbolicValue>> {
        self.check_active()?;
        Ok(self.memory.allocate(type_name))
    }

    /// Conjoins constraint to the path condition. Models that do not satisfy it are dropped.
    pub fn add_constraint(&mut self, constraint: Arc<SymbolicValue>) {
        self.path_constraints.add(constraint.clone());
        if self.models.is_empty() {
            return;
        }
        if self.path_constraints.is_false() {
            self.models.clear();
            return;
        }
        match TranslationSession::default().translate(&constraint) {
            Ok(term) => self
                .models
                .retain(|model| model.evaluate(&term).and_then(|c| c.as_bool()) == Some(true)),
            Err(e) => {
                debug!("dropping models, constraint not translatable: {}", e);
                self.models.clear();
            }
        }
    }

    /// Moves to the next location within the current method.
    pub fn advance(&mut self, statement: u32) {
        let location = Location {
            method: self.path_node.location.method.clone(),
            statement,
        };
        self.path_node = PathNode::advance(&self.path_node, location);
    }

    /// Enters method, pushing a call frame and a register frame.
    pub fn call(&mut self, method: &str, return_site: u32) -> Result<()> {
        self.check_active()?;
        let return_site = Location {
            method: self.path_node.location.method.clone(),
            statement: return_site,
        };
        self.call_stack.push_back_mut(CallFrame {
            method: Arc::from(method),
            return_site: Some(return_site),
        });
        self.memory.push_frame();
        self.path_node = PathNode::advance(&self.path_node, Location::new(method, 0));
        Ok(())
    }

    /// Leaves the current method. Returning from the entry method terminates the state.
    pub fn return_from_method(&mut self) -> Result<()> {
        self.check_active()?;
        let return_site = self.call_stack.last().and_then(|f| f.return_site.clone());
        self.call_stack.drop_last_mut();
        self.memory.pop_frame();
        match return_site {
            Some(location) => {
                self.path_node = PathNode::advance(&self.path_node, location);
            }
            None => self.terminate(TerminationReason::Returned),
        }
        Ok(())
    }

    pub fn terminate(&mut self, reason: TerminationReason) {
        debug!("state {} terminated: {:?}", self.id, reason);
        self.status = StateStatus::Terminated(reason);
    }

    // A copy of this state with a fresh id and ownership token.
    fn child(&self) -> State {
        let mut result = self.clone();
        result.id = NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed);
        result.memory.renew_ownership();
        result
    }

    /// Splits this state on condition. The first child assumes condition, the second its
    /// negation. Both share all structures with this state but own none of them.
    #[logfn_inputs(TRACE)]
    pub fn fork(&self, condition: &Arc<SymbolicValue>) -> Result<(State, State)> {
        self.check_active()?;
        let mut positive = self.child();
        positive.add_constraint(condition.clone());
        let mut negative = self.child();
        negative.add_constraint(condition.logical_not());
        Ok((positive, negative))
    }

    /// Like fork, but only returns the children whose path condition the solver shows to be
    /// satisfiable. A child that already has a model is kept without a solver call. Children
    /// the solver cannot decide are dropped.
    pub fn fork_with_solver<S, T>(
        &self,
        condition: &Arc<SymbolicValue>,
        solver: &S,
        options: &Options,
    ) -> Result<ForkResult>
    where
        S: SmtSolver<T>,
        S::Model: Send + Sync + 'static,
    {
        let (positive, negative) = self.fork(condition)?;
        Ok(ForkResult {
            positive: Self::keep_if_feasible(positive, solver, options)?,
            negative: Self::keep_if_feasible(negative, solver, options)?,
        })
    }

    fn keep_if_feasible<S, T>(
        mut state: State,
        solver: &S,
        options: &Options,
    ) -> Result<Option<State>>
    where
        S: SmtSolver<T>,
        S::Model: Send + Sync + 'static,
    {
        if state.path_constraints.is_false() {
            return Ok(None);
        }
        if !state.models.is_empty() {
            return Ok(Some(state));
        }
        let mut session = TranslationSession::new(options);
        match check_with_soft_constraints(solver, &mut session, &state.path_constraints, options)? {
            SolverOutcome::Satisfiable(model) => {
                state.models.push(Arc::new(model));
                Ok(Some(state))
            }
            SolverOutcome::Unsatisfiable => Ok(None),
            SolverOutcome::Unknown => {
                debug!("state {} dropped: {}", state.id, Error::SolverUnknown);
                Ok(None)
            }
        }
    }

    /// Merges two states that are at the same location into one that behaves like self where
    /// guard holds and like other elsewhere.
    #[logfn_inputs(TRACE)]
    pub fn merge(
        &self,
        other: &State,
        guard: &Arc<SymbolicValue>,
    ) -> std::result::Result<State, MergeFailure> {
        if self.is_terminated() || other.is_terminated() {
            return Err(MergeFailure::Terminated);
        }
        let path_node =
            PathNode::join(&self.path_node, &other.path_node).ok_or(MergeFailure::Location)?;
        if self.call_stack != other.call_stack {
            return Err(MergeFailure::CallStack);
        }
        let (path_constraints, merge_guard) =
            self.path_constraints.merge(&other.path_constraints, guard)?;
        trace!("merge guard {:?}", merge_guard);
        let memory = self.memory.merge(&other.memory, guard, Ownership::new())?;
        let mut models = self.models.clone();
        models.extend(other.models.iter().cloned());
        Ok(State {
            id: NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed),
            call_stack: self.call_stack.clone(),
            memory,
            path_constraints,
            models,
            path_node,
            status: StateStatus::Active,
        })
    }

    /// A JSON rendering of this state for debugging.
    pub fn debug_dump(&self) -> serde_json::Value {
        let registers: Vec<serde_json::Value> = self
            .memory
            .current_frame()
            .map(|frame| frame.registers())
            .unwrap_or_default()
            .into_iter()
            .map(|(index, value)| json!({ "index": index, "value": format!("{:?}", value) }))
            .collect();
        let regions: Vec<String> = self
            .memory
            .regions()
            .iter()
            .map(|region| format!("{:?}", region))
            .collect();
        json!({
            "id": self.id,
            "status": format!("{:?}", self.status),
            "location": {
                "method": &*self.path_node.location.method,
                "statement": self.path_node.location.statement,
                "depth": self.path_node.depth,
            },
            "call_stack": self
                .call_stack
                .iter()
                .map(|frame| frame.method.to_string())
                .collect::<Vec<_>>(),
            "registers": registers,
            "allocated": self.memory.next_address() - 1,
            "regions": regions,
            "path_constraints": format_values(&self.path_constraints.constraints()),
            "models": self.models.len(),
        })
    }
}
