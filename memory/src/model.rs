// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::constant_domain::ConstantDomain;
use crate::error::Result;
use crate::expression::{Expression, ExpressionType};
use crate::memory::Memory;
use crate::region::MemoryRegion;
use crate::region_id::RegionId;
use crate::smt_solver::SmtModel;
use crate::symbolic_value::SymbolicValue;
use crate::translator::TranslationSession;
use crate::update_log::LocationKey;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

/// The interpretation of an uninterpreted array: explicit entries plus a default.
#[derive(Clone, Debug, Default)]
pub struct ArrayInterpretation {
    pub entries: HashMap<Vec<ConstantDomain>, ConstantDomain>,
    pub default: Option<ConstantDomain>,
}

/// A model given by explicit assignments: values of free variables, interpretations of base
/// arrays and the subtype facts that hold for input objects. Symbols without an assignment
/// take the default value of their sort.
#[derive(Clone, Debug, Default)]
pub struct ConcreteModel {
    variables: HashMap<Arc<str>, ConstantDomain>,
    arrays: HashMap<Arc<str>, ArrayInterpretation>,
    subtypes: HashSet<(ConstantDomain, Arc<str>)>,
}

impl ConcreteModel {
    pub fn new() -> ConcreteModel {
        ConcreteModel::default()
    }

    pub fn assign(&mut self, name: &str, value: ConstantDomain) {
        self.variables.insert(Arc::from(name), value);
    }

    /// Builder style `assign`.
    pub fn with(mut self, name: &str, value: ConstantDomain) -> ConcreteModel {
        self.assign(name, value);
        self
    }

    pub fn variable(&self, name: &str) -> Option<&ConstantDomain> {
        self.variables.get(name)
    }

    /// Sets `array[indices]` for the array constant with the given name.
    pub fn assign_array_entry(
        &mut self,
        array_name: &str,
        indices: Vec<ConstantDomain>,
        value: ConstantDomain,
    ) {
        self.arrays
            .entry(Arc::from(array_name))
            .or_default()
            .entries
            .insert(indices, value);
    }

    pub fn set_array_default(&mut self, array_name: &str, value: ConstantDomain) {
        self.arrays.entry(Arc::from(array_name)).or_default().default = Some(value);
    }

    /// Records that the input object at address has a dynamic type that is a subtype of type_name.
    pub fn add_subtype(&mut self, address: ConstantDomain, type_name: &str) {
        self.subtypes.insert((address, Arc::from(type_name)));
    }
}

impl SmtModel for ConcreteModel {
    fn evaluate(&self, term: &Arc<SymbolicValue>) -> Option<ConstantDomain> {
        Evaluator::new(self).eval(term)
    }
}

/// Evaluates terms under a ConcreteModel. Results are memoized per node for the duration of one
/// evaluation, except inside lambda bodies where they depend on the lambda arguments.
struct Evaluator<'m> {
    model: &'m ConcreteModel,
    cache: HashMap<*const SymbolicValue, ConstantDomain>,
    bindings: Vec<(Arc<str>, ConstantDomain)>,
}

impl<'m> Evaluator<'m> {
    fn new(model: &'m ConcreteModel) -> Evaluator<'m> {
        Evaluator {
            model,
            cache: HashMap::new(),
            bindings: Vec::new(),
        }
    }

    fn eval(&mut self, value: &Arc<SymbolicValue>) -> Option<ConstantDomain> {
        let key = Arc::as_ptr(value);
        if let Some(result) = self.cache.get(&key) {
            return Some(result.clone());
        }
        let result = self.eval_uncached(value)?;
        if result.is_bottom() {
            return None;
        }
        if self.bindings.is_empty() {
            self.cache.insert(key, result.clone());
        }
        Some(result)
    }

    fn eval_uncached(&mut self, value: &Arc<SymbolicValue>) -> Option<ConstantDomain> {
        match &value.expression {
            Expression::CompileTimeConstant(c) => Some(c.clone()),
            Expression::Variable { name, var_type } => {
                if var_type.is_array() {
                    return None;
                }
                Some(
                    self.model
                        .variables
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| ConstantDomain::default_for(var_type)),
                )
            }
            Expression::BoundVariable { name, .. } => self
                .bindings
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            Expression::Add { left, right } => Some(self.eval(left)?.add(&self.eval(right)?)),
            Expression::Sub { left, right } => Some(self.eval(left)?.sub(&self.eval(right)?)),
            Expression::Equals { left, right } => {
                Some(self.eval(left)?.equals(&self.eval(right)?))
            }
            Expression::LessThan { left, right } => {
                Some(self.eval(left)?.less_than(&self.eval(right)?))
            }
            Expression::LessOrEqual { left, right } => {
                Some(self.eval(left)?.less_or_equal(&self.eval(right)?))
            }
            Expression::And { left, right } => match self.eval(left)?.as_bool()? {
                false => Some(ConstantDomain::False),
                true => self.eval(right),
            },
            Expression::Or { left, right } => match self.eval(left)?.as_bool()? {
                true => Some(ConstantDomain::True),
                false => self.eval(right),
            },
            Expression::LogicalNot { operand } => Some(self.eval(operand)?.not()),
            Expression::ConditionalExpression {
                condition,
                consequent,
                alternate,
            } => {
                if self.eval(condition)?.as_bool()? {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expression::IsSubtype { operand, type_name } => {
                let address = self.eval(operand)?;
                Some(
                    self.model
                        .subtypes
                        .contains(&(address, type_name.clone()))
                        .into(),
                )
            }
            Expression::InputRead { region, key } => {
                let indices = self.eval_all(key)?;
                Some(self.lookup_array(
                    &region.base_array_name(),
                    &indices,
                    &region.value_sort(),
                ))
            }
            Expression::Select { array, indices } => {
                let indices = self.eval_all(indices)?;
                self.select(array, &indices)
            }
            Expression::ArrayConstant { .. }
            | Expression::ConstantArray { .. }
            | Expression::Store { .. }
            | Expression::ArrayLambda { .. } => None,
        }
    }

    fn eval_all(&mut self, values: &[Arc<SymbolicValue>]) -> Option<Vec<ConstantDomain>> {
        values.iter().map(|v| self.eval(v)).collect()
    }

    fn select(
        &mut self,
        array: &Arc<SymbolicValue>,
        indices: &[ConstantDomain],
    ) -> Option<ConstantDomain> {
        let mut current = array.clone();
        loop {
            let next = match &current.expression {
                Expression::ArrayConstant { name, array_type } => {
                    return Some(self.lookup_array(name, indices, array_type.array_range()));
                }
                Expression::Variable { name, var_type } if var_type.is_array() => {
                    return Some(self.lookup_array(name, indices, var_type.array_range()));
                }
                Expression::ConstantArray { value, .. } => return self.eval(value),
                Expression::Store {
                    array,
                    indices: stored_at,
                    value,
                } => {
                    if self.eval_all(stored_at)?.as_slice() == indices {
                        return self.eval(value);
                    }
                    array.clone()
                }
                Expression::ArrayLambda { parameters, body } => {
                    let depth = self.bindings.len();
                    for (parameter, index) in parameters.iter().zip(indices.iter()) {
                        if let Expression::BoundVariable { name, .. } = &parameter.expression {
                            self.bindings.push((name.clone(), index.clone()));
                        }
                    }
                    let result = self.eval(body);
                    self.bindings.truncate(depth);
                    return result;
                }
                Expression::ConditionalExpression {
                    condition,
                    consequent,
                    alternate,
                } => {
                    if self.eval(condition)?.as_bool()? {
                        consequent.clone()
                    } else {
                        alternate.clone()
                    }
                }
                _ => return None,
            };
            current = next;
        }
    }

    fn lookup_array(
        &self,
        name: &str,
        indices: &[ConstantDomain],
        range: &ExpressionType,
    ) -> ConstantDomain {
        self.model
            .arrays
            .get(name)
            .and_then(|array| {
                array
                    .entries
                    .get(indices)
                    .cloned()
                    .or_else(|| array.default.clone())
            })
            .unwrap_or_else(|| ConstantDomain::default_for(range))
    }
}

/// Decodes the contents of one region under a model, one location at a time. Nothing is
/// evaluated until a location is asked for, and every answer is cached.
pub struct LazyRegionDecoder<'a, M: SmtModel + ?Sized> {
    model: &'a M,
    region: MemoryRegion,
    session: Rc<RefCell<TranslationSession>>,
    cache: RefCell<HashMap<(ConstantDomain, Option<ConstantDomain>), Option<ConstantDomain>>>,
}

impl<'a, M: SmtModel + ?Sized> LazyRegionDecoder<'a, M> {
    pub fn new(
        model: &'a M,
        region: MemoryRegion,
        session: Rc<RefCell<TranslationSession>>,
    ) -> LazyRegionDecoder<'a, M> {
        LazyRegionDecoder {
            model,
            region,
            session,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn region_id(&self) -> &RegionId {
        self.region.id()
    }

    /// The number of distinct locations decoded so far.
    pub fn decoded_count(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Returns the value of the location at (address, secondary) in the model. address is a
    /// model level address: null, an allocated address or an input address.
    pub fn read(
        &self,
        address: &ConstantDomain,
        secondary: Option<&ConstantDomain>,
    ) -> Result<Option<ConstantDomain>> {
        let cache_key = (address.clone(), secondary.cloned());
        if let Some(result) = self.cache.borrow().get(&cache_key) {
            return Ok(result.clone());
        }
        let result = match address {
            ConstantDomain::Null => Some(ConstantDomain::default_for(&self.region.id().value_sort())),
            ConstantDomain::HeapAddress(..) | ConstantDomain::InputAddress(..) => {
                let key = LocationKey::new(
                    SymbolicValue::make_constant(address.clone()),
                    secondary.map(|s| SymbolicValue::make_constant(s.clone())),
                );
                // Input addresses classify as symbolic leaves and select from the input array.
                let term = self.session.borrow_mut().translate_read(&self.region, &key)?;
                self.model.evaluate(&term)
            }
            _ => None,
        };
        self.cache.borrow_mut().insert(cache_key, result.clone());
        Ok(result)
    }
}

/// A model together with the memory of the state it satisfies. Hands out region decoders on
/// demand and decodes registers and symbolic values.
pub struct DecodedMemory<'a, M: SmtModel + ?Sized> {
    model: &'a M,
    memory: &'a Memory,
    session: Rc<RefCell<TranslationSession>>,
    decoders: RefCell<HashMap<RegionId, Rc<LazyRegionDecoder<'a, M>>>>,
}

impl<'a, M: SmtModel + ?Sized> DecodedMemory<'a, M> {
    pub fn new(model: &'a M, memory: &'a Memory) -> DecodedMemory<'a, M> {
        DecodedMemory {
            model,
            memory,
            session: Rc::new(RefCell::new(TranslationSession::default())),
            decoders: RefCell::new(HashMap::new()),
        }
    }

    /// Evaluates a memory level symbolic value in the model.
    pub fn eval(&self, value: &Arc<SymbolicValue>) -> Result<Option<ConstantDomain>> {
        let term = self.session.borrow_mut().translate(value)?;
        Ok(self.model.evaluate(&term))
    }

    /// The model address a reference evaluates to.
    pub fn address_of(&self, reference: &Arc<SymbolicValue>) -> Result<Option<ConstantDomain>> {
        self.eval(reference)
    }

    /// The value of a register of the current frame, or None if it is not defined.
    pub fn register(&self, index: u32) -> Result<Option<ConstantDomain>> {
        match self.memory.read_register(index) {
            Some(value) => self.eval(&value),
            None => Ok(None),
        }
    }

    /// The decoder for region id. Decoders are created on first use and kept.
    pub fn decoder(&self, id: &RegionId) -> Rc<LazyRegionDecoder<'a, M>> {
        let mut decoders = self.decoders.borrow_mut();
        decoders
            .entry(id.clone())
            .or_insert_with(|| {
                Rc::new(LazyRegionDecoder::new(
                    self.model,
                    self.memory.region_for(id),
                    self.session.clone(),
                ))
            })
            .clone()
    }

    pub fn decoded_regions(&self) -> usize {
        self.decoders.borrow().len()
    }

    /// Decodes the location a memory level key denotes in the model.
    pub fn read(&self, id: &RegionId, key: &LocationKey) -> Result<Option<ConstantDomain>> {
        let address = match self.address_of(&key.address)? {
            Some(address) => address,
            None => return Ok(None),
        };
        let secondary = match &key.secondary {
            Some(s) => match self.eval(s)? {
                Some(c) => Some(c),
                None => return Ok(None),
            },
            None => None,
        };
        self.decoder(id).read(&address, secondary.as_ref())
    }
}
