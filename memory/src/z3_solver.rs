// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//

use crate::constant_domain::ConstantDomain;
use crate::expression::{Expression, ExpressionType};
use crate::smt_solver::{SmtModel, SmtResult, SmtSolver};
use crate::symbolic_value::SymbolicValue;

use lazy_static::lazy_static;
use log_derive::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt::{Debug, Formatter, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Z3ExpressionType = z3_sys::Z3_ast;

lazy_static! {
    static ref Z3_MUTEX: Mutex<()> = Mutex::new(());
}

/// Builds Z3 terms for translated symbolic values. Integers and references are mathematical
/// integers; references are ordinals (null is 0, allocated objects are positive and input
/// references are constrained to be non positive).
struct AstBuilder {
    z3_context: z3_sys::Z3_context,
    bool_sort: z3_sys::Z3_sort,
    int_sort: z3_sys::Z3_sort,
    cache: HashMap<Arc<SymbolicValue>, z3_sys::Z3_ast>,
    // Facts about the symbols introduced by translation, not yet handed to the solver.
    side_conditions: Vec<z3_sys::Z3_ast>,
}

impl AstBuilder {
    unsafe fn new(z3_context: z3_sys::Z3_context) -> AstBuilder {
        AstBuilder {
            z3_context,
            bool_sort: z3_sys::Z3_mk_bool_sort(z3_context),
            int_sort: z3_sys::Z3_mk_int_sort(z3_context),
            cache: HashMap::new(),
            side_conditions: Vec::new(),
        }
    }

    unsafe fn get_sort_for(&self, var_type: &ExpressionType) -> z3_sys::Z3_sort {
        match var_type {
            ExpressionType::Bool => self.bool_sort,
            ExpressionType::I32 | ExpressionType::I64 | ExpressionType::Reference => self.int_sort,
            ExpressionType::Array { domain, range } => {
                let domain_sorts: Vec<z3_sys::Z3_sort> =
                    domain.iter().map(|t| self.get_sort_for(t)).collect();
                let range_sort = self.get_sort_for(range);
                if domain_sorts.len() == 1 {
                    z3_sys::Z3_mk_array_sort(self.z3_context, domain_sorts[0], range_sort)
                } else {
                    z3_sys::Z3_mk_array_sort_n(
                        self.z3_context,
                        domain_sorts.len() as u32,
                        domain_sorts.as_ptr(),
                        range_sort,
                    )
                }
            }
        }
    }

    unsafe fn named_constant(&self, name: &str, sort: z3_sys::Z3_sort) -> z3_sys::Z3_ast {
        let name = CString::new(name).unwrap();
        let symbol = z3_sys::Z3_mk_string_symbol(self.z3_context, name.as_ptr());
        z3_sys::Z3_mk_const(self.z3_context, symbol, sort)
    }

    unsafe fn get_constant_as_ast(&self, value: &ConstantDomain) -> z3_sys::Z3_ast {
        match value {
            ConstantDomain::True => z3_sys::Z3_mk_true(self.z3_context),
            ConstantDomain::False => z3_sys::Z3_mk_false(self.z3_context),
            ConstantDomain::I32(v) => z3_sys::Z3_mk_int64(self.z3_context, i64::from(*v), self.int_sort),
            ConstantDomain::I64(v) => z3_sys::Z3_mk_int64(self.z3_context, *v, self.int_sort),
            ConstantDomain::Null | ConstantDomain::HeapAddress(..) | ConstantDomain::InputAddress(..) => {
                let ordinal = value.as_reference_ordinal().unwrap_or_default();
                z3_sys::Z3_mk_int64(self.z3_context, ordinal, self.int_sort)
            }
            ConstantDomain::Bottom => {
                let prefix = CString::new("bottom").unwrap();
                z3_sys::Z3_mk_fresh_const(self.z3_context, prefix.as_ptr(), self.int_sort)
            }
        }
    }

    unsafe fn non_positive(&mut self, reference: z3_sys::Z3_ast) {
        let zero = z3_sys::Z3_mk_int64(self.z3_context, 0, self.int_sort);
        self.side_conditions
            .push(z3_sys::Z3_mk_le(self.z3_context, reference, zero));
    }

    unsafe fn binary(
        &mut self,
        left: &Arc<SymbolicValue>,
        right: &Arc<SymbolicValue>,
        operation: unsafe extern "C" fn(
            c: z3_sys::Z3_context,
            num_args: std::os::raw::c_uint,
            args: *const z3_sys::Z3_ast,
        ) -> z3_sys::Z3_ast,
    ) -> z3_sys::Z3_ast {
        let args = vec![self.get_as_z3_ast(left), self.get_as_z3_ast(right)];
        operation(self.z3_context, 2, args.as_ptr())
    }

    unsafe fn relational(
        &mut self,
        left: &Arc<SymbolicValue>,
        right: &Arc<SymbolicValue>,
        operation: unsafe extern "C" fn(
            c: z3_sys::Z3_context,
            t1: z3_sys::Z3_ast,
            t2: z3_sys::Z3_ast,
        ) -> z3_sys::Z3_ast,
    ) -> z3_sys::Z3_ast {
        let left_ast = self.get_as_z3_ast(left);
        let right_ast = self.get_as_z3_ast(right);
        operation(self.z3_context, left_ast, right_ast)
    }

    unsafe fn get_as_z3_ast(&mut self, value: &Arc<SymbolicValue>) -> z3_sys::Z3_ast {
        if let Some(ast) = self.cache.get(value) {
            return *ast;
        }
        let ast = match &value.expression {
            Expression::CompileTimeConstant(c) => self.get_constant_as_ast(c),
            Expression::Variable { name, var_type } => {
                let ast = self.named_constant(name, self.get_sort_for(var_type));
                if var_type.is_reference() {
                    self.non_positive(ast);
                }
                ast
            }
            Expression::BoundVariable { name, var_type } => {
                self.named_constant(name, self.get_sort_for(var_type))
            }
            Expression::Add { left, right } => self.binary(left, right, z3_sys::Z3_mk_add),
            Expression::Sub { left, right } => self.binary(left, right, z3_sys::Z3_mk_sub),
            Expression::And { left, right } => self.binary(left, right, z3_sys::Z3_mk_and),
            Expression::Or { left, right } => self.binary(left, right, z3_sys::Z3_mk_or),
            Expression::Equals { left, right } => self.relational(left, right, z3_sys::Z3_mk_eq),
            Expression::LessThan { left, right } => {
                self.relational(left, right, z3_sys::Z3_mk_lt)
            }
            Expression::LessOrEqual { left, right } => {
                self.relational(left, right, z3_sys::Z3_mk_le)
            }
            Expression::LogicalNot { operand } => {
                let operand_ast = self.get_as_z3_ast(operand);
                z3_sys::Z3_mk_not(self.z3_context, operand_ast)
            }
            Expression::ConditionalExpression {
                condition,
                consequent,
                alternate,
            } => {
                let condition_ast = self.get_as_z3_ast(condition);
                let consequent_ast = self.get_as_z3_ast(consequent);
                let alternate_ast = self.get_as_z3_ast(alternate);
                z3_sys::Z3_mk_ite(
                    self.z3_context,
                    condition_ast,
                    consequent_ast,
                    alternate_ast,
                )
            }
            Expression::IsSubtype { operand, type_name } => {
                let operand_ast = self.get_as_z3_ast(operand);
                let name = CString::new(format!("subtype:{}", type_name)).unwrap();
                let symbol = z3_sys::Z3_mk_string_symbol(self.z3_context, name.as_ptr());
                let domain = [self.int_sort];
                let func =
                    z3_sys::Z3_mk_func_decl(self.z3_context, symbol, 1, domain.as_ptr(), self.bool_sort);
                let args = [operand_ast];
                z3_sys::Z3_mk_app(self.z3_context, func, 1, args.as_ptr())
            }
            Expression::InputRead { region, key } => {
                let array = self.named_constant(
                    &region.base_array_name(),
                    self.get_sort_for(&region.input_array_type()),
                );
                let result = self.select(array, key);
                if region.value_sort().is_reference() && !key.iter().any(has_bound_variable) {
                    self.non_positive(result);
                }
                result
            }
            Expression::ArrayConstant { name, array_type } => {
                self.named_constant(name, self.get_sort_for(array_type))
            }
            Expression::ConstantArray { value, array_type } => {
                let value_ast = self.get_as_z3_ast(value);
                let domain = array_type.array_domain();
                if domain.len() == 1 {
                    z3_sys::Z3_mk_const_array(
                        self.z3_context,
                        self.get_sort_for(&domain[0]),
                        value_ast,
                    )
                } else {
                    let mut bound = Vec::with_capacity(domain.len());
                    for t in domain.iter() {
                        let prefix = CString::new("c").unwrap();
                        let c = z3_sys::Z3_mk_fresh_const(
                            self.z3_context,
                            prefix.as_ptr(),
                            self.get_sort_for(t),
                        );
                        bound.push(z3_sys::Z3_to_app(self.z3_context, c));
                    }
                    z3_sys::Z3_mk_lambda_const(
                        self.z3_context,
                        bound.len() as u32,
                        bound.as_ptr(),
                        value_ast,
                    )
                }
            }
            Expression::Select { array, indices } => {
                let array_ast = self.get_as_z3_ast(array);
                let result = self.select(array_ast, indices);
                if let Expression::ArrayConstant { array_type, .. } = &array.expression {
                    if array_type.array_range().is_reference()
                        && !indices.iter().any(has_bound_variable)
                    {
                        self.non_positive(result);
                    }
                }
                result
            }
            Expression::Store {
                array,
                indices,
                value,
            } => {
                let array_ast = self.get_as_z3_ast(array);
                let index_asts: Vec<z3_sys::Z3_ast> =
                    indices.iter().map(|i| self.get_as_z3_ast(i)).collect();
                let value_ast = self.get_as_z3_ast(value);
                z3_sys::Z3_mk_store_n(
                    self.z3_context,
                    array_ast,
                    index_asts.len() as u32,
                    index_asts.as_ptr(),
                    value_ast,
                )
            }
            Expression::ArrayLambda { parameters, body } => {
                let bound: Vec<z3_sys::Z3_app> = parameters
                    .iter()
                    .map(|p| {
                        let ast = self.get_as_z3_ast(p);
                        z3_sys::Z3_to_app(self.z3_context, ast)
                    })
                    .collect();
                let body_ast = self.get_as_z3_ast(body);
                z3_sys::Z3_mk_lambda_const(
                    self.z3_context,
                    bound.len() as u32,
                    bound.as_ptr(),
                    body_ast,
                )
            }
        };
        self.cache.insert(value.clone(), ast);
        ast
    }

    unsafe fn select(
        &mut self,
        array: z3_sys::Z3_ast,
        indices: &[Arc<SymbolicValue>],
    ) -> z3_sys::Z3_ast {
        let index_asts: Vec<z3_sys::Z3_ast> =
            indices.iter().map(|i| self.get_as_z3_ast(i)).collect();
        z3_sys::Z3_mk_select_n(
            self.z3_context,
            array,
            index_asts.len() as u32,
            index_asts.as_ptr(),
        )
    }

    /// The Boolean term for a translated predicate, conjoined with the side conditions of the
    /// symbols it mentions. The cache only lives for one predicate so that every predicate
    /// carries its own side conditions, whatever was popped off the solver in between.
    unsafe fn get_as_predicate(&mut self, value: &Arc<SymbolicValue>) -> z3_sys::Z3_ast {
        self.cache.clear();
        self.side_conditions.clear();
        let ast = self.get_as_z3_ast(value);
        if self.side_conditions.is_empty() {
            return ast;
        }
        let mut conjuncts = std::mem::take(&mut self.side_conditions);
        conjuncts.push(ast);
        z3_sys::Z3_mk_and(self.z3_context, conjuncts.len() as u32, conjuncts.as_ptr())
    }
}

fn has_bound_variable(value: &Arc<SymbolicValue>) -> bool {
    match &value.expression {
        Expression::BoundVariable { .. } => true,
        Expression::Add { left, right }
        | Expression::Sub { left, right }
        | Expression::Equals { left, right }
        | Expression::LessThan { left, right }
        | Expression::LessOrEqual { left, right }
        | Expression::And { left, right }
        | Expression::Or { left, right } => has_bound_variable(left) || has_bound_variable(right),
        Expression::LogicalNot { operand } | Expression::IsSubtype { operand, .. } => {
            has_bound_variable(operand)
        }
        Expression::ConditionalExpression {
            condition,
            consequent,
            alternate,
        } => {
            has_bound_variable(condition)
                || has_bound_variable(consequent)
                || has_bound_variable(alternate)
        }
        _ => false,
    }
}

pub struct Z3Solver {
    z3_context: z3_sys::Z3_context,
    z3_solver: z3_sys::Z3_solver,
    builder: RefCell<AstBuilder>,
}

impl Debug for Z3Solver {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        "Z3Solver".fmt(f)
    }
}

impl Z3Solver {
    #[logfn_inputs(TRACE)]
    pub fn new() -> Z3Solver {
        unsafe {
            let _guard = Z3_MUTEX.lock().unwrap();
            let z3_sys_cfg = z3_sys::Z3_mk_config();
            let z3_context = z3_sys::Z3_mk_context(z3_sys_cfg);
            z3_sys::Z3_del_config(z3_sys_cfg);
            let z3_solver = z3_sys::Z3_mk_solver(z3_context);
            z3_sys::Z3_solver_inc_ref(z3_context, z3_solver);
            Z3Solver {
                z3_context,
                z3_solver,
                builder: RefCell::new(AstBuilder::new(z3_context)),
            }
        }
    }

    fn as_debug_string_helper(&self, expression: Z3ExpressionType) -> String {
        unsafe {
            let debug_str_bytes = z3_sys::Z3_ast_to_string(self.z3_context, expression);
            let debug_str = CStr::from_ptr(debug_str_bytes);
            String::from(debug_str.to_string_lossy())
        }
    }
}

impl Default for Z3Solver {
    #[logfn_inputs(TRACE)]
    fn default() -> Self {
        Z3Solver::new()
    }
}

impl SmtSolver<Z3ExpressionType> for Z3Solver {
    type Model = Z3Model;

    fn as_debug_string(&self, expression: &Z3ExpressionType) -> String {
        let _guard = Z3_MUTEX.lock().unwrap();
        self.as_debug_string_helper(*expression)
    }

    fn assert(&self, expression: &Z3ExpressionType) {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe {
            z3_sys::Z3_solver_assert(self.z3_context, self.z3_solver, *expression);
        }
    }

    #[logfn_inputs(TRACE)]
    fn backtrack(&self) {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe {
            z3_sys::Z3_solver_pop(self.z3_context, self.z3_solver, 1);
        }
    }

    #[logfn_inputs(TRACE)]
    fn get_as_smt_predicate(&self, expression: &Arc<SymbolicValue>) -> Z3ExpressionType {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe { self.builder.borrow_mut().get_as_predicate(expression) }
    }

    fn get_model(&self) -> Option<Z3Model> {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe {
            let model = z3_sys::Z3_solver_get_model(self.z3_context, self.z3_solver);
            if model.is_null() {
                return None;
            }
            z3_sys::Z3_model_inc_ref(self.z3_context, model);
            Some(Z3Model {
                z3_context: self.z3_context,
                model,
            })
        }
    }

    fn invert_predicate(&self, expression: &Z3ExpressionType) -> Z3ExpressionType {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe { z3_sys::Z3_mk_not(self.z3_context, *expression) }
    }

    fn interrupt(&self) {
        // Called while another thread holds the mutex inside solve.
        unsafe {
            z3_sys::Z3_interrupt(self.z3_context);
        }
    }

    #[logfn_inputs(TRACE)]
    fn set_backtrack_position(&self) {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe {
            z3_sys::Z3_solver_push(self.z3_context, self.z3_solver);
        }
    }

    #[logfn_inputs(TRACE)]
    fn solve(&self, timeout: Duration) -> SmtResult {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe {
            let params = z3_sys::Z3_mk_params(self.z3_context);
            z3_sys::Z3_params_inc_ref(self.z3_context, params);
            let time_out = CString::new("timeout").unwrap();
            let symbol = z3_sys::Z3_mk_string_symbol(self.z3_context, time_out.as_ptr());
            let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
            z3_sys::Z3_params_set_uint(self.z3_context, params, symbol, ms);
            z3_sys::Z3_solver_set_params(self.z3_context, self.z3_solver, params);
            z3_sys::Z3_params_dec_ref(self.z3_context, params);
            match z3_sys::Z3_solver_check(self.z3_context, self.z3_solver) {
                z3_sys::Z3_L_TRUE => SmtResult::Satisfiable,
                z3_sys::Z3_L_FALSE => SmtResult::Unsatisfiable,
                _ => {
                    debug!("z3 could not decide the query within {:?}", timeout);
                    SmtResult::Undefined
                }
            }
        }
    }
}

/// A model produced by Z3Solver. Terms are evaluated with model completion, so symbols the
/// model does not mention get an arbitrary value of their sort.
pub struct Z3Model {
    z3_context: z3_sys::Z3_context,
    model: z3_sys::Z3_model,
}

// All uses of the context are serialized by Z3_MUTEX.
unsafe impl Send for Z3Model {}
unsafe impl Sync for Z3Model {}

impl Debug for Z3Model {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe {
            let debug_str_bytes = z3_sys::Z3_model_to_string(self.z3_context, self.model);
            let debug_str = CStr::from_ptr(debug_str_bytes);
            f.write_str(&debug_str.to_string_lossy())
        }
    }
}

impl Drop for Z3Model {
    fn drop(&mut self) {
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe {
            z3_sys::Z3_model_dec_ref(self.z3_context, self.model);
        }
    }
}

impl SmtModel for Z3Model {
    fn evaluate(&self, term: &Arc<SymbolicValue>) -> Option<ConstantDomain> {
        let result_type = term.get_type().clone();
        if result_type.is_array() {
            return None;
        }
        let _guard = Z3_MUTEX.lock().unwrap();
        unsafe {
            let mut builder = AstBuilder::new(self.z3_context);
            let ast = builder.get_as_z3_ast(term);
            let mut value: z3_sys::Z3_ast = std::ptr::null_mut();
            if !z3_sys::Z3_model_eval(self.z3_context, self.model, ast, true, &mut value) {
                return None;
            }
            match result_type {
                ExpressionType::Bool => match z3_sys::Z3_get_bool_value(self.z3_context, value) {
                    z3_sys::Z3_L_TRUE => Some(ConstantDomain::True),
                    z3_sys::Z3_L_FALSE => Some(ConstantDomain::False),
                    _ => None,
                },
                _ => {
                    let mut n: i64 = 0;
                    if !z3_sys::Z3_get_numeral_int64(self.z3_context, value, &mut n) {
                        return None;
                    }
                    // Int is unbounded, so an i32 result may not fit.
                    match result_type {
                        ExpressionType::Reference => ConstantDomain::from_reference_ordinal(n),
                        ExpressionType::I32 => i32::try_from(n).ok().map(ConstantDomain::I32),
                        _ => Some(ConstantDomain::I64(n)),
                    }
                }
            }
        }
    }
}
