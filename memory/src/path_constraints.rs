// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constant_domain::ConstantDomain;
use crate::error::MergeFailure;
use crate::expression::Expression;
use crate::symbolic_value::{SymbolicValue, SymbolicValueTrait, FALSE, TRUE};

use log_derive::logfn_inputs;
use rpds::{HashTrieSetSync, VectorSync};
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter, Result};
use std::sync::Arc;

/// A persistent set of constraints that remembers insertion order.
#[derive(Clone)]
pub struct ConstraintSet {
    members: HashTrieSetSync<Arc<SymbolicValue>>,
    ordered: VectorSync<Arc<SymbolicValue>>,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        ConstraintSet {
            members: HashTrieSetSync::new_sync(),
            ordered: VectorSync::new_sync(),
        }
    }
}

impl Debug for ConstraintSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_list().entries(self.ordered.iter()).finish()
    }
}

impl PartialEq for ConstraintSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|c| other.contains(c))
    }
}

impl ConstraintSet {
    pub fn contains(&self, constraint: &Arc<SymbolicValue>) -> bool {
        self.members.contains(constraint)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SymbolicValue>> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    fn insert_mut(&mut self, constraint: Arc<SymbolicValue>) {
        if !self.members.contains(&constraint) {
            self.members.insert_mut(constraint.clone());
            self.ordered.push_back_mut(constraint);
        }
    }
}

/// The partition a constraint is stored in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConstraintKind {
    Logical,
    /// Integer comparisons and their negations.
    Numeric,
    /// Reference equalities and disequalities.
    Equality,
    /// Subtype tests and their negations.
    Type,
}

/// Classifies a constraint by the shape of its atom (the operand of a negation, or itself).
pub fn classify(constraint: &Arc<SymbolicValue>) -> ConstraintKind {
    let atom = match &constraint.expression {
        Expression::LogicalNot { operand } => operand,
        _ => constraint,
    };
    match &atom.expression {
        Expression::Equals { left, .. } if left.get_type().is_reference() => {
            ConstraintKind::Equality
        }
        Expression::Equals { left, .. } if left.get_type().is_integer() => ConstraintKind::Numeric,
        Expression::LessThan { .. } | Expression::LessOrEqual { .. } => ConstraintKind::Numeric,
        Expression::IsSubtype { .. } => ConstraintKind::Type,
        _ => ConstraintKind::Logical,
    }
}

/// The conditions added by a merge: `this_constraint = guard && L` and
/// `other_constraint = !guard && R`, where L and R are the constraints only one side had.
#[derive(Clone, Debug)]
pub struct MergeGuard {
    pub guard: Arc<SymbolicValue>,
    pub this_constraint: Arc<SymbolicValue>,
    pub other_constraint: Arc<SymbolicValue>,
}

/// The path condition of a state, split into four partitions. The conjunction of all
/// partitions is exactly the condition under which the state is reachable.
#[derive(Clone, Default)]
pub struct PathConstraints {
    logical: ConstraintSet,
    numeric: ConstraintSet,
    equality: ConstraintSet,
    type_constraints: ConstraintSet,
    unsat_core: Option<Arc<Vec<Arc<SymbolicValue>>>>,
}

impl Debug for PathConstraints {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if let Some(core) = &self.unsat_core {
            return write!(f, "contradiction {:?}", core);
        }
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PathConstraints {
    pub fn new() -> PathConstraints {
        PathConstraints::default()
    }

    /// True if a contradiction has been detected without consulting a solver.
    pub fn is_false(&self) -> bool {
        self.unsat_core.is_some()
    }

    /// The constraints that were found to contradict each other, if any.
    pub fn unsat_core(&self) -> Option<&[Arc<SymbolicValue>]> {
        self.unsat_core.as_ref().map(|core| core.as_slice())
    }

    pub fn logical(&self) -> &ConstraintSet {
        &self.logical
    }

    pub fn numeric(&self) -> &ConstraintSet {
        &self.numeric
    }

    pub fn equality(&self) -> &ConstraintSet {
        &self.equality
    }

    pub fn type_constraints(&self) -> &ConstraintSet {
        &self.type_constraints
    }

    fn partition_mut(&mut self, kind: ConstraintKind) -> &mut ConstraintSet {
        match kind {
            ConstraintKind::Logical => &mut self.logical,
            ConstraintKind::Numeric => &mut self.numeric,
            ConstraintKind::Equality => &mut self.equality,
            ConstraintKind::Type => &mut self.type_constraints,
        }
    }

    fn partition(&self, kind: ConstraintKind) -> &ConstraintSet {
        match kind {
            ConstraintKind::Logical => &self.logical,
            ConstraintKind::Numeric => &self.numeric,
            ConstraintKind::Equality => &self.equality,
            ConstraintKind::Type => &self.type_constraints,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<SymbolicValue>> {
        self.logical
            .iter()
            .chain(self.numeric.iter())
            .chain(self.equality.iter())
            .chain(self.type_constraints.iter())
    }

    fn contradiction(&mut self, core: Vec<Arc<SymbolicValue>>) {
        debug!("path constraints became contradicting: {:?}", core);
        self.unsat_core = Some(Arc::new(core));
    }

    /// Adds a constraint. Conjunctions are split and negations are pushed through
    /// disjunctions; the resulting atoms are dispatched to partitions by shape.
    #[logfn_inputs(TRACE)]
    pub fn add(&mut self, constraint: Arc<SymbolicValue>) {
        if self.is_false() {
            return;
        }
        match &constraint.expression {
            Expression::CompileTimeConstant(ConstantDomain::True) => return,
            Expression::CompileTimeConstant(ConstantDomain::False) => {
                self.contradiction(vec![constraint.clone()]);
                return;
            }
            Expression::And { left, right } => {
                self.add(left.clone());
                self.add(right.clone());
                return;
            }
            Expression::LogicalNot { operand } => {
                if let Expression::Or { left, right } = &operand.expression {
                    self.add(left.logical_not());
                    self.add(right.logical_not());
                    return;
                }
            }
            _ => {}
        }
        let kind = classify(&constraint);
        let negation = constraint.logical_not();
        if self.partition(kind).contains(&negation) {
            self.contradiction(vec![negation, constraint]);
            return;
        }
        self.partition_mut(kind).insert_mut(constraint);
        if kind == ConstraintKind::Equality {
            if let Some(core) = self.equality_contradiction() {
                self.contradiction(core);
            }
        }
    }

    /// Checks the reference (dis)equalities for a contradiction that follows from transitivity:
    /// two references in one equivalence class that are recorded as distinct, or that are
    /// different concrete addresses.
    fn equality_contradiction(&self) -> Option<Vec<Arc<SymbolicValue>>> {
        let mut parent: HashMap<Arc<SymbolicValue>, Arc<SymbolicValue>> = HashMap::new();
        fn find(
            parent: &HashMap<Arc<SymbolicValue>, Arc<SymbolicValue>>,
            value: &Arc<SymbolicValue>,
        ) -> Arc<SymbolicValue> {
            let mut current = value.clone();
            while let Some(next) = parent.get(&current) {
                current = next.clone();
            }
            current
        }
        let mut equalities = Vec::new();
        let mut disequalities = Vec::new();
        for constraint in self.equality.iter() {
            match &constraint.expression {
                Expression::Equals { left, right } => {
                    equalities.push(constraint.clone());
                    let (l, r) = (find(&parent, left), find(&parent, right));
                    if l != r {
                        // Constants stay representatives, so two distinct constants can only
                        // meet here.
                        if l.is_compile_time_constant() && r.is_compile_time_constant() {
                            return Some(equalities);
                        }
                        if l.is_compile_time_constant() {
                            parent.insert(r, l);
                        } else {
                            parent.insert(l, r);
                        }
                    }
                }
                Expression::LogicalNot { operand } => {
                    if let Expression::Equals { left, right } = &operand.expression {
                        disequalities.push((constraint.clone(), left.clone(), right.clone()));
                    }
                }
                _ => {}
            }
        }
        for (constraint, left, right) in disequalities {
            if find(&parent, &left) == find(&parent, &right) {
                let mut core = equalities.clone();
                core.push(constraint);
                return Some(core);
            }
        }
        None
    }

    /// The conjunction of all partitions, as a list of conjuncts.
    pub fn constraints(&self) -> Vec<Arc<SymbolicValue>> {
        if self.is_false() {
            return vec![FALSE.clone()];
        }
        self.iter().cloned().collect()
    }

    /// Hints that keep every integer variable mentioned by a numeric constraint within
    /// [-bound, bound]. They may be dropped if they make a query unsatisfiable.
    pub fn soft_constraints(&self, bound: i64) -> Vec<Arc<SymbolicValue>> {
        let mut variables = Vec::new();
        let mut visited = HashSet::new();
        for constraint in self.numeric.iter() {
            collect_integer_variables(constraint, &mut visited, &mut variables);
        }
        let mut result = Vec::new();
        for variable in variables {
            let var_type = variable.get_type().clone();
            let lower = SymbolicValue::make_integer(bound.wrapping_neg(), &var_type);
            let upper = SymbolicValue::make_integer(bound, &var_type);
            result.push(lower.less_or_equal(variable.clone()));
            result.push(variable.less_or_equal(upper));
        }
        result
    }

    /// Merges the path constraints of two states under guard. Constraints both sides have are
    /// kept; the rest become `(guard && L) || (!guard && R)`. Fails if the reference equality
    /// partitions differ or if either side is known to be infeasible.
    #[logfn_inputs(TRACE)]
    pub fn merge(
        &self,
        other: &PathConstraints,
        guard: &Arc<SymbolicValue>,
    ) -> std::result::Result<(PathConstraints, MergeGuard), MergeFailure> {
        if self.is_false() || other.is_false() {
            return Err(MergeFailure::Infeasible);
        }
        if self.equality != other.equality {
            return Err(MergeFailure::EqualityConstraints);
        }
        let mut merged = PathConstraints::new();
        let mut left_only = TRUE.clone();
        let mut right_only = TRUE.clone();
        for kind in [
            ConstraintKind::Logical,
            ConstraintKind::Numeric,
            ConstraintKind::Type,
        ] {
            let (left, right) = (self.partition(kind), other.partition(kind));
            for c in left.iter() {
                if right.contains(c) {
                    merged.add(c.clone());
                } else {
                    left_only = left_only.and(c.clone());
                }
            }
            for c in right.iter() {
                if !left.contains(c) {
                    right_only = right_only.and(c.clone());
                }
            }
        }
        for c in self.equality.iter() {
            merged.add(c.clone());
        }
        let this_constraint = guard.and(left_only);
        let other_constraint = guard.logical_not().and(right_only);
        merged.add(this_constraint.or(other_constraint.clone()));
        Ok((
            merged,
            MergeGuard {
                guard: guard.clone(),
                this_constraint,
                other_constraint,
            },
        ))
    }
}

fn collect_integer_variables(
    value: &Arc<SymbolicValue>,
    visited: &mut HashSet<Arc<SymbolicValue>>,
    variables: &mut Vec<Arc<SymbolicValue>>,
) {
    if !visited.insert(value.clone()) {
        return;
    }
    match &value.expression {
        Expression::Variable { var_type, .. } => {
            if var_type.is_integer() {
                variables.push(value.clone());
            }
        }
        Expression::Add { left, right }
        | Expression::Sub { left, right }
        | Expression::Equals { left, right }
        | Expression::LessThan { left, right }
        | Expression::LessOrEqual { left, right }
        | Expression::And { left, right }
        | Expression::Or { left, right } => {
            collect_integer_variables(left, visited, variables);
            collect_integer_variables(right, visited, variables);
        }
        Expression::LogicalNot { operand } => collect_integer_variables(operand, visited, variables),
        Expression::ConditionalExpression {
            condition,
            consequent,
            alternate,
        } => {
            collect_integer_variables(condition, visited, variables);
            collect_integer_variables(consequent, visited, variables);
            collect_integer_variables(alternate, visited, variables);
        }
        _ => {}
    }
}
