// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! AST to IR lowering
//!
//! Converts the typed Weft tree into the linear IR. One [`LoweringContext`]
//! per compilation unit: it owns the loop-frame stack and the counter that
//! mints value ids for synthetic fragments (coercions, promotions, shape
//! checks, loop scaffolding), so independent compilations never share
//! state.


use log::debug;

use crate::ast::{
    self, AssignTarget, BinaryOp, Block, Expr, ExprKind, GeneratorDomain, Item, Program, Stmt,
    StmtKind,
};
use crate::error::LoweringError;
use crate::mir::{
    CallArg, ConstValue, Fragment, GlobalDecl, Instr, IrFunction, IrUnit, LabelId, OperandShapes,
    TempId, TupleLayout, ValueId,
};
use crate::symbols::{Builtin, Method, SymbolId, SymbolTable, Variable};
use crate::types::{self, ScalarType, Shape, TupleType, Type};

type Result<T> = std::result::Result<T, LoweringError>;

/// Branch targets of the innermost enclosing loop form.
#[derive(Debug, Clone)]
struct LoopFrame {
    /// The loop statement's own id; break/continue resolve against it.
    loop_id: ValueId,
    /// Target of `continue`.
    continue_label: LabelId,
    /// Target of `break`.
    break_label: LabelId,
}

/// AST to IR lowering context. Construct one per compilation unit.
pub struct LoweringContext<'a> {
    /// Symbol table from the front end, read-only.
    symbols: &'a SymbolTable,

    /// Stack of enclosing loop forms for break/continue resolution.
    loop_stack: Vec<LoopFrame>,

    /// Next synthetic value/label/temp id. Initialized past the highest
    /// tree id so synthetic values never collide with node results.
    next_id: u32,
}

impl<'a> LoweringContext<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        LoweringContext {
            symbols,
            loop_stack: Vec::new(),
            next_id: 0,
        }
    }

    /// Create a context whose synthetic ids start at a known floor. Used
    /// when lowering fragments outside a whole program, where the floor
    /// cannot be computed from a tree root.
    pub fn with_first_synthetic_id(symbols: &'a SymbolTable, first: u32) -> Self {
        LoweringContext {
            symbols,
            loop_stack: Vec::new(),
            next_id: first,
        }
    }

    fn fresh_value(&mut self) -> ValueId {
        let id = ValueId(self.next_id);
        self.next_id += 1;
        id
    }

    fn fresh_label(&mut self) -> LabelId {
        let id = LabelId(self.next_id);
        self.next_id += 1;
        id
    }

    fn fresh_temp(&mut self) -> TempId {
        let id = TempId(self.next_id);
        self.next_id += 1;
        id
    }

    fn variable(&self, id: SymbolId, node: ValueId) -> Result<&'a Variable> {
        self.symbols
            .variable(id)
            .ok_or(LoweringError::NotAVariable { id, node })
    }

    fn method(&self, id: SymbolId, node: ValueId) -> Result<&'a Method> {
        self.symbols
            .method(id)
            .ok_or(LoweringError::NotAMethod { id, node })
    }

    fn tuple_type_of(&self, ty: &Type, node: ValueId) -> Result<TupleType> {
        match ty {
            Type::Tuple(tt) => Ok(tt.clone()),
            other => Err(LoweringError::NotATuple {
                ty: other.clone(),
                node,
            }),
        }
    }

    // -- program level -----------------------------------------------------

    /// Lower a whole compilation unit.
    pub fn lower_program(&mut self, program: &Program) -> Result<IrUnit> {
        self.next_id = self.next_id.max(program.max_result_id() + 1);

        let tuple_types = self
            .symbols
            .tuples()
            .iter()
            .map(|tt| TupleLayout {
                index: tt.index,
                fields: tt.fields.iter().map(|f| f.ty).collect(),
            })
            .collect();

        let mut globals = Vec::new();
        let mut startup = Vec::new();
        let mut functions = Vec::new();
        let mut entry = None;

        for item in &program.items {
            match item {
                Item::Global {
                    symbol,
                    init,
                    result_id,
                } => {
                    let var = self.variable(*symbol, *result_id)?;
                    let literal = init.as_ref().and_then(literal_const);
                    globals.push(GlobalDecl {
                        symbol: *symbol,
                        ty: var.ty.clone(),
                        literal: literal.clone(),
                    });
                    if literal.is_none() {
                        if let Some(init) = init {
                            let frag = self.store_into_variable(var, init, *result_id)?;
                            startup.extend(frag.instrs);
                        }
                    }
                }
                Item::Function {
                    symbol,
                    body,
                    result_id,
                } => {
                    let method = self.method(*symbol, *result_id)?;
                    debug!("lowering {}()", method.name);
                    let function = self.lower_function(method, body)?;
                    if method.name == "main" {
                        entry = Some(*symbol);
                    }
                    functions.push(function);
                }
            }
        }

        let entry = entry.ok_or(LoweringError::MissingEntryPoint)?;

        Ok(IrUnit {
            tuple_types,
            globals,
            startup,
            functions,
            entry,
        })
    }

    fn lower_function(&mut self, method: &Method, body: &Block) -> Result<IrFunction> {
        let mut instrs = self.lower_block(body)?;
        // Procedures may fall off their last statement; give them an
        // explicit return.
        if !matches!(instrs.last(), Some(Instr::Return { .. })) {
            instrs.push(Instr::Return { value: None });
        }
        Ok(IrFunction {
            symbol: method.id,
            params: method.params.iter().map(|p| p.id).collect(),
            body: instrs,
        })
    }

    // -- statements --------------------------------------------------------

    fn lower_block(&mut self, block: &Block) -> Result<Vec<Instr>> {
        let mut instrs = Vec::new();
        // Storage for every symbol declared in this block, in declaration
        // order, ahead of any statement: later statements may reference
        // storage allocated earlier in the same block.
        for symbol in &block.declared {
            let var = self.variable(*symbol, ValueId(0))?;
            instrs.push(Instr::LocalAlloc {
                symbol: *symbol,
                ty: var.ty.clone(),
            });
        }
        for stmt in &block.statements {
            instrs.extend(self.lower_statement(stmt)?);
        }
        Ok(instrs)
    }

    fn lower_statement(&mut self, stmt: &Stmt) -> Result<Vec<Instr>> {
        let node = stmt.result_id;
        match &stmt.kind {
            StmtKind::Declaration { symbol, init } => {
                let var = self.variable(*symbol, node)?;
                match init {
                    Some(init) => Ok(self.store_into_variable(var, init, node)?.instrs),
                    None => Ok(Vec::new()),
                }
            }

            StmtKind::Assignment { target, value } => {
                self.reject_const_destination(target, node)?;
                self.lower_assignment(target, value, node)
            }

            StmtKind::Expression { expr } => Ok(self.lower_expression(expr)?.instrs),

            StmtKind::If {
                condition,
                then_block,
                else_block,
            } => self.lower_if(condition, then_block, else_block.as_ref()),

            StmtKind::While { condition, body } => self.lower_while(condition, body, node),

            StmtKind::DoWhile { body, condition } => self.lower_do_while(body, condition, node),

            StmtKind::Loop { body } => self.lower_loop(body, node),

            StmtKind::Iterator { domains, body } => self.lower_iterator(domains, body, node),

            StmtKind::Break => {
                let frame = self
                    .loop_stack
                    .last()
                    .ok_or(LoweringError::LoopStackEmpty { node })?;
                debug!("break resolves to loop {:?}", frame.loop_id);
                Ok(vec![Instr::Jump(frame.break_label)])
            }

            StmtKind::Continue => {
                let frame = self
                    .loop_stack
                    .last()
                    .ok_or(LoweringError::LoopStackEmpty { node })?;
                debug!("continue resolves to loop {:?}", frame.loop_id);
                Ok(vec![Instr::Jump(frame.continue_label)])
            }

            StmtKind::Return { value } => self.lower_return(value.as_ref()),

            StmtKind::TupleUnpack { targets, tuple } => {
                self.lower_tuple_unpack(targets, tuple, node)
            }

            StmtKind::Print { value } => {
                let frag = self.lower_operand(value)?;
                let ty = self.operand_type(value);
                let mut instrs = frag.instrs;
                instrs.push(Instr::Print {
                    value: frag.result,
                    ty,
                });
                Ok(instrs)
            }

            StmtKind::Read { target } => self.lower_read(target, node),
        }
    }

    fn lower_if(
        &mut self,
        condition: &Expr,
        then_block: &Block,
        else_block: Option<&Block>,
    ) -> Result<Vec<Instr>> {
        let cond = self.lower_operand(condition)?;
        let then_label = self.fresh_label();
        let end_label = self.fresh_label();

        let mut instrs = cond.instrs;
        match else_block {
            None => {
                instrs.push(Instr::Branch {
                    cond: cond.result,
                    then_label,
                    else_label: end_label,
                });
                instrs.push(Instr::Label(then_label));
                instrs.extend(self.lower_block(then_block)?);
                instrs.push(Instr::Jump(end_label));
            }
            Some(else_block) => {
                let else_label = self.fresh_label();
                instrs.push(Instr::Branch {
                    cond: cond.result,
                    then_label,
                    else_label,
                });
                instrs.push(Instr::Label(then_label));
                instrs.extend(self.lower_block(then_block)?);
                instrs.push(Instr::Jump(end_label));
                instrs.push(Instr::Label(else_label));
                instrs.extend(self.lower_block(else_block)?);
                instrs.push(Instr::Jump(end_label));
            }
        }
        instrs.push(Instr::Label(end_label));
        Ok(instrs)
    }

    fn lower_while(&mut self, condition: &Expr, body: &Block, node: ValueId) -> Result<Vec<Instr>> {
        let check_label = self.fresh_label();
        let body_label = self.fresh_label();
        let end_label = self.fresh_label();

        let mut instrs = vec![Instr::Label(check_label)];
        let cond = self.lower_operand(condition)?;
        instrs.extend(cond.instrs);
        instrs.push(Instr::Branch {
            cond: cond.result,
            then_label: body_label,
            else_label: end_label,
        });
        instrs.push(Instr::Label(body_label));

        self.loop_stack.push(LoopFrame {
            loop_id: node,
            continue_label: check_label,
            break_label: end_label,
        });
        let body_instrs = self.lower_block(body);
        self.loop_stack.pop();

        instrs.extend(body_instrs?);
        instrs.push(Instr::Jump(check_label));
        instrs.push(Instr::Label(end_label));
        Ok(instrs)
    }

    fn lower_do_while(
        &mut self,
        body: &Block,
        condition: &Expr,
        node: ValueId,
    ) -> Result<Vec<Instr>> {
        let body_label = self.fresh_label();
        let check_label = self.fresh_label();
        let end_label = self.fresh_label();

        let mut instrs = vec![Instr::Label(body_label)];

        self.loop_stack.push(LoopFrame {
            loop_id: node,
            continue_label: check_label,
            break_label: end_label,
        });
        let body_instrs = self.lower_block(body);
        self.loop_stack.pop();
        instrs.extend(body_instrs?);

        instrs.push(Instr::Label(check_label));
        let cond = self.lower_operand(condition)?;
        instrs.extend(cond.instrs);
        instrs.push(Instr::Branch {
            cond: cond.result,
            then_label: body_label,
            else_label: end_label,
        });
        instrs.push(Instr::Label(end_label));
        Ok(instrs)
    }

    fn lower_loop(&mut self, body: &Block, node: ValueId) -> Result<Vec<Instr>> {
        let body_label = self.fresh_label();
        let end_label = self.fresh_label();

        let mut instrs = vec![Instr::Label(body_label)];

        self.loop_stack.push(LoopFrame {
            loop_id: node,
            continue_label: body_label,
            break_label: end_label,
        });
        let body_instrs = self.lower_block(body);
        self.loop_stack.pop();
        instrs.extend(body_instrs?);

        instrs.push(Instr::Jump(body_label));
        instrs.push(Instr::Label(end_label));
        Ok(instrs)
    }

    /// Domain iteration. Multiple bindings nest, first binding outermost;
    /// one loop frame covers the whole statement, so `break` leaves every
    /// level and `continue` advances the innermost.
    fn lower_iterator(
        &mut self,
        domains: &[GeneratorDomain],
        body: &Block,
        node: ValueId,
    ) -> Result<Vec<Instr>> {
        if domains.is_empty() {
            return Err(LoweringError::BadDomainArity { count: 0, node });
        }
        let break_label = self.fresh_label();
        let mut instrs = Vec::new();
        self.emit_domain_loop(&mut instrs, domains, 0, body, node, break_label)?;
        instrs.push(Instr::Label(break_label));
        Ok(instrs)
    }

    fn emit_domain_loop(
        &mut self,
        instrs: &mut Vec<Instr>,
        domains: &[GeneratorDomain],
        level: usize,
        body: &Block,
        node: ValueId,
        break_label: LabelId,
    ) -> Result<()> {
        let domain = &domains[level];
        let (vector, elem) = self.emit_domain_value(instrs, domain)?;

        let len = self.fresh_value();
        instrs.push(Instr::VectorLength { dest: len, vector });

        let counter = self.emit_counter_init(instrs);

        let check_label = self.fresh_label();
        let body_label = self.fresh_label();
        let incr_label = self.fresh_label();
        // The outermost level exits straight to the shared break label.
        let end_label = (level != 0).then(|| self.fresh_label());
        let exit = end_label.unwrap_or(break_label);

        instrs.push(Instr::Label(check_label));
        let cmp = self.emit_counter_check(instrs, counter, len);
        instrs.push(Instr::Branch {
            cond: cmp,
            then_label: body_label,
            else_label: exit,
        });
        instrs.push(Instr::Label(body_label));

        self.emit_domain_element(instrs, counter, vector, domain, elem)?;

        if level + 1 < domains.len() {
            self.emit_domain_loop(instrs, domains, level + 1, body, node, break_label)?;
        } else {
            self.loop_stack.push(LoopFrame {
                loop_id: node,
                continue_label: incr_label,
                break_label,
            });
            let body_instrs = self.lower_block(body);
            self.loop_stack.pop();
            instrs.extend(body_instrs?);
        }

        instrs.push(Instr::Label(incr_label));
        self.emit_counter_step(instrs, counter);
        instrs.push(Instr::Jump(check_label));
        if let Some(end) = end_label {
            instrs.push(Instr::Label(end));
        }
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expr>) -> Result<Vec<Instr>> {
        match value {
            None => Ok(vec![Instr::Return { value: None }]),
            Some(value) => {
                let frag = self.lower_operand(value)?;
                let ty = self.operand_type(value);
                let mut instrs = frag.instrs;
                let result = match &ty {
                    // A tuple result is materialized field by field into a
                    // fresh aggregate before returning.
                    Type::Tuple(tt) => {
                        let ret = self.fresh_value();
                        instrs.push(Instr::TupleAlloc {
                            dest: ret,
                            type_index: tt.index,
                        });
                        self.emit_tuple_copy(&mut instrs, frag.result, ret, tt);
                        ret
                    }
                    _ => frag.result,
                };
                instrs.push(Instr::Return {
                    value: Some(result),
                });
                Ok(instrs)
            }
        }
    }

    fn lower_tuple_unpack(
        &mut self,
        targets: &[SymbolId],
        tuple: &Expr,
        node: ValueId,
    ) -> Result<Vec<Instr>> {
        let frag = self.lower_operand(tuple)?;
        let ty = self.operand_type(tuple);
        let tt = self.tuple_type_of(&ty, node)?;
        let mut instrs = frag.instrs;
        for (position, (target, field)) in targets.iter().zip(&tt.fields).enumerate() {
            let value = self.fresh_value();
            instrs.push(Instr::TupleGetField {
                dest: value,
                tuple: frag.result,
                type_index: tt.index,
                field: position,
                elem: field.ty,
            });
            let var = self.variable(*target, node)?;
            instrs.push(Instr::StoreVar {
                symbol: *target,
                storage: var.storage_class(),
                src: value,
            });
        }
        Ok(instrs)
    }

    fn lower_read(&mut self, target: &AssignTarget, node: ValueId) -> Result<Vec<Instr>> {
        match target {
            AssignTarget::Variable { symbol } => {
                let var = self.variable(*symbol, node)?;
                let ty = var
                    .ty
                    .as_scalar()
                    .ok_or(LoweringError::UnsupportedReadTarget { node })?;
                Ok(vec![Instr::ReadVar {
                    symbol: *symbol,
                    storage: var.storage_class(),
                    ty,
                }])
            }
            AssignTarget::TupleField { symbol, field } => {
                let var = self.variable(*symbol, node)?;
                let tt = self.tuple_type_of(&var.ty, node)?;
                let field_ty = tt
                    .fields
                    .get(*field)
                    .ok_or(LoweringError::UnsupportedReadTarget { node })?
                    .ty;
                let tuple = self.fresh_value();
                Ok(vec![
                    Instr::LoadVar {
                        dest: tuple,
                        symbol: *symbol,
                        storage: var.storage_class(),
                    },
                    Instr::ReadTupleField {
                        tuple,
                        type_index: tt.index,
                        field: *field,
                        ty: field_ty,
                    },
                ])
            }
            _ => Err(LoweringError::UnsupportedReadTarget { node }),
        }
    }

    // -- assignment --------------------------------------------------------

    /// The front end rejects writes through const destinations before the
    /// tree reaches this crate; receiving one anyway is a broken contract,
    /// not a user error.
    fn reject_const_destination(&self, target: &AssignTarget, node: ValueId) -> Result<()> {
        let var = self.variable(target.symbol(), node)?;
        if var.is_const() {
            return Err(LoweringError::ConstDestination {
                name: var.name.clone(),
                node,
            });
        }
        Ok(())
    }

    fn lower_assignment(
        &mut self,
        target: &AssignTarget,
        value: &Expr,
        node: ValueId,
    ) -> Result<Vec<Instr>> {
        match target {
            AssignTarget::Variable { symbol } => {
                let var = self.variable(*symbol, node)?;
                Ok(self.store_into_variable(var, value, node)?.instrs)
            }

            AssignTarget::TupleField { symbol, field } => {
                let var = self.variable(*symbol, node)?;
                let tt = self.tuple_type_of(&var.ty, node)?;
                let field_ty = tt.fields[*field].ty;
                let frag = self.lower_operand(value)?;
                let value_ty = self.operand_type(value);
                let frag = self.widen_scalar_if_needed(frag, &value_ty, field_ty, node)?;
                let tuple = self.fresh_value();
                let mut instrs = frag.instrs;
                instrs.push(Instr::LoadVar {
                    dest: tuple,
                    symbol: *symbol,
                    storage: var.storage_class(),
                });
                instrs.push(Instr::TupleSetField {
                    tuple,
                    type_index: tt.index,
                    field: *field,
                    value: frag.result,
                    elem: field_ty,
                });
                Ok(instrs)
            }

            AssignTarget::VectorIndex { symbol, index } => {
                self.lower_vector_index_assign(*symbol, index, value, node)
            }

            AssignTarget::MatrixIndex {
                symbol,
                row,
                column,
            } => self.lower_matrix_index_assign(*symbol, row, column, value, node),
        }
    }

    fn lower_vector_index_assign(
        &mut self,
        symbol: SymbolId,
        index: &Expr,
        value: &Expr,
        node: ValueId,
    ) -> Result<Vec<Instr>> {
        let var = self.variable(symbol, node)?;
        let elem = match &var.ty {
            Type::Vector(e) => *e,
            other => return Err(not_indexable(other, node)),
        };

        let index_frag = self.lower_operand(index)?;
        let index_ty = self.operand_type(index);
        let index_frag = self.coerce_interval(index_frag, &index_ty);
        let index_is_scalar = index_ty.shape() == Shape::Scalar;

        let value_frag = self.lower_operand(value)?;
        let value_ty = self.operand_type(value);
        let value_is_scalar = value_ty.shape() == Shape::Scalar;
        let value_frag = if value_is_scalar {
            self.widen_scalar_if_needed(value_frag, &value_ty, elem, node)?
        } else {
            let value_frag = self.coerce_interval(value_frag, &value_ty);
            self.widen_container_if_needed(value_frag, &value_ty, elem)
        };

        let vector = self.fresh_value();
        let mut instrs = index_frag.instrs;
        let index_value = index_frag.result;
        let value_value = value_frag.result;
        instrs.extend(value_frag.instrs);
        instrs.push(Instr::LoadVar {
            dest: vector,
            symbol,
            storage: var.storage_class(),
        });
        if index_is_scalar {
            instrs.push(Instr::VectorSetElement {
                vector,
                index: index_value,
                value: value_value,
                elem,
            });
        } else if value_is_scalar {
            instrs.push(Instr::VectorScatterFill {
                vector,
                indices: index_value,
                value: value_value,
                elem,
            });
        } else {
            instrs.push(Instr::VectorScatter {
                vector,
                indices: index_value,
                values: value_value,
                elem,
            });
        }
        Ok(instrs)
    }

    fn lower_matrix_index_assign(
        &mut self,
        symbol: SymbolId,
        row: &Expr,
        column: &Expr,
        value: &Expr,
        node: ValueId,
    ) -> Result<Vec<Instr>> {
        let var = self.variable(symbol, node)?;
        let elem = match &var.ty {
            Type::Matrix(e) => *e,
            other => return Err(not_indexable(other, node)),
        };

        let row_frag = self.lower_operand(row)?;
        let row_ty = self.operand_type(row);
        let row_frag = self.coerce_interval(row_frag, &row_ty);
        let row_scalar = row_ty.shape() == Shape::Scalar;

        let col_frag = self.lower_operand(column)?;
        let col_ty = self.operand_type(column);
        let col_frag = self.coerce_interval(col_frag, &col_ty);
        let col_scalar = col_ty.shape() == Shape::Scalar;

        let value_frag = self.lower_operand(value)?;
        let value_ty = self.operand_type(value);
        let value_is_scalar = value_ty.shape() == Shape::Scalar;
        let value_frag = if value_is_scalar {
            self.widen_scalar_if_needed(value_frag, &value_ty, elem, node)?
        } else {
            let value_frag = self.coerce_interval(value_frag, &value_ty);
            self.widen_container_if_needed(value_frag, &value_ty, elem)
        };

        let matrix = self.fresh_value();
        let mut instrs = row_frag.instrs;
        let (r, c, value_id) = (row_frag.result, col_frag.result, value_frag.result);
        instrs.extend(col_frag.instrs);
        instrs.extend(value_frag.instrs);
        instrs.push(Instr::LoadVar {
            dest: matrix,
            symbol,
            storage: var.storage_class(),
        });

        let instr = match (row_scalar, col_scalar) {
            (true, true) => Instr::MatrixSetElement {
                matrix,
                row: r,
                col: c,
                value: value_id,
                elem,
            },
            (true, false) if value_is_scalar => Instr::MatrixFillRow {
                matrix,
                row: r,
                cols: c,
                value: value_id,
                elem,
            },
            (true, false) => Instr::MatrixWriteRow {
                matrix,
                row: r,
                cols: c,
                values: value_id,
                elem,
            },
            (false, true) if value_is_scalar => Instr::MatrixFillColumn {
                matrix,
                rows: r,
                col: c,
                value: value_id,
                elem,
            },
            (false, true) => Instr::MatrixWriteColumn {
                matrix,
                rows: r,
                col: c,
                values: value_id,
                elem,
            },
            (false, false) if value_is_scalar => Instr::MatrixFillSub {
                matrix,
                rows: r,
                cols: c,
                value: value_id,
                elem,
            },
            (false, false) => Instr::MatrixWriteSub {
                matrix,
                rows: r,
                cols: c,
                values: value_id,
                elem,
            },
        };
        instrs.push(instr);
        Ok(instrs)
    }

    /// Initialize or overwrite a whole variable. Declarations come through
    /// here too, so constness is the caller's concern.
    fn store_into_variable(
        &mut self,
        var: &Variable,
        value: &Expr,
        node: ValueId,
    ) -> Result<Fragment> {
        let frag = self.lower_operand(value)?;
        let value_ty = self.operand_type(value);
        let storage = var.storage_class();

        match &var.ty {
            Type::Tuple(tt) => {
                // Field-by-field copy into the destination's storage.
                let mut frag = frag;
                let dest = self.fresh_value();
                frag.push(Instr::LoadVar {
                    dest,
                    symbol: var.id,
                    storage,
                });
                let tt = tt.clone();
                let src = frag.result;
                self.emit_tuple_copy(&mut frag.instrs, src, dest, &tt);
                Ok(frag)
            }

            Type::Vector(elem) => {
                let elem = *elem;
                if value_ty.shape() == Shape::Scalar {
                    // Scalar broadcast fills the existing storage.
                    let frag = self.widen_scalar_if_needed(frag, &value_ty, elem, node)?;
                    let vector = self.fresh_value();
                    let value_id = frag.result;
                    let mut frag = frag;
                    frag.push(Instr::LoadVar {
                        dest: vector,
                        symbol: var.id,
                        storage,
                    });
                    frag.push(Instr::VectorFill {
                        vector,
                        value: value_id,
                    });
                    Ok(frag)
                } else {
                    let frag = self.coerce_interval(frag, &value_ty);
                    let mut frag = self.widen_container_if_needed(frag, &value_ty, elem);
                    let src = frag.result;
                    frag.push(Instr::StoreVar {
                        symbol: var.id,
                        storage,
                        src,
                    });
                    Ok(frag)
                }
            }

            Type::Matrix(elem) => {
                let elem = *elem;
                if value_ty.shape() == Shape::Scalar {
                    let frag = self.widen_scalar_if_needed(frag, &value_ty, elem, node)?;
                    let matrix = self.fresh_value();
                    let value_id = frag.result;
                    let mut frag = frag;
                    frag.push(Instr::LoadVar {
                        dest: matrix,
                        symbol: var.id,
                        storage,
                    });
                    frag.push(Instr::MatrixFill {
                        matrix,
                        value: value_id,
                    });
                    Ok(frag)
                } else {
                    let mut frag = self.widen_container_if_needed(frag, &value_ty, elem);
                    let src = frag.result;
                    frag.push(Instr::StoreVar {
                        symbol: var.id,
                        storage,
                        src,
                    });
                    Ok(frag)
                }
            }

            _ => {
                let mut frag = frag;
                let src = frag.result;
                frag.push(Instr::StoreVar {
                    symbol: var.id,
                    storage,
                    src,
                });
                Ok(frag)
            }
        }
    }

    // -- expressions -------------------------------------------------------

    /// Lower one expression node to a fragment producing its value.
    pub fn lower_expression(&mut self, expr: &Expr) -> Result<Fragment> {
        let node = expr.result_id;
        if expr.eval_type.is_placeholder() {
            return Err(LoweringError::UnresolvedPlaceholder {
                ty: expr.eval_type.clone(),
                node,
            });
        }

        match &expr.kind {
            ExprKind::BooleanLiteral(value) => {
                let mut frag = Fragment::new(node);
                frag.push(Instr::ConstBool {
                    dest: node,
                    value: *value,
                });
                Ok(frag)
            }
            ExprKind::CharacterLiteral(value) => {
                let mut frag = Fragment::new(node);
                frag.push(Instr::ConstChar {
                    dest: node,
                    value: *value,
                });
                Ok(frag)
            }
            ExprKind::IntegerLiteral(value) => {
                let mut frag = Fragment::new(node);
                frag.push(Instr::ConstInt {
                    dest: node,
                    value: *value,
                });
                Ok(frag)
            }
            ExprKind::RealLiteral(value) => {
                let mut frag = Fragment::new(node);
                frag.push(Instr::ConstReal {
                    dest: node,
                    value: *value,
                });
                Ok(frag)
            }

            ExprKind::Identifier { symbol } => {
                let var = self.variable(*symbol, node)?;
                let mut frag = Fragment::new(node);
                frag.push(Instr::LoadVar {
                    dest: node,
                    symbol: *symbol,
                    storage: var.storage_class(),
                });
                Ok(frag)
            }

            ExprKind::Unary { op, operand } => {
                let inner = self.lower_operand(operand)?;
                let ty = self.operand_type(operand);
                let mut frag = Fragment::new(node);
                let src = inner.result;
                frag.absorb(inner);
                frag.push(Instr::Unary {
                    dest: node,
                    op: *op,
                    shape: ty.shape(),
                    elem: ty.element().unwrap_or(ScalarType::Boolean),
                    src,
                });
                Ok(frag)
            }

            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(expr, *op, lhs, rhs),

            ExprKind::Range { lower, upper } => {
                let lf = self.lower_operand(lower)?;
                let uf = self.lower_operand(upper)?;
                let mut frag = Fragment::new(node);
                let (l, u) = (lf.result, uf.result);
                frag.absorb(lf);
                frag.absorb(uf);
                frag.push(Instr::IntervalNew {
                    dest: node,
                    lower: l,
                    upper: u,
                });
                Ok(frag)
            }

            ExprKind::By { source, step } => {
                let sf = self.lower_operand(source)?;
                let source_ty = self.operand_type(source);
                let tf = self.lower_operand(step)?;
                let mut frag = Fragment::new(node);
                let (s, t) = (sf.result, tf.result);
                frag.absorb(sf);
                frag.absorb(tf);
                match &source_ty {
                    Type::Interval => frag.push(Instr::IntervalBy {
                        dest: node,
                        interval: s,
                        step: t,
                    }),
                    Type::Vector(elem) => frag.push(Instr::VectorBy {
                        dest: node,
                        vector: s,
                        step: t,
                        elem: *elem,
                    }),
                    other => return Err(not_indexable(other, node)),
                }
                Ok(frag)
            }

            ExprKind::TupleLiteral { elements } => self.lower_tuple_literal(expr, elements),

            ExprKind::VectorLiteral { elements } => self.lower_vector_literal(expr, elements),

            ExprKind::MatrixLiteral { rows } => self.lower_matrix_literal(expr, rows),

            ExprKind::TupleMember { tuple, field } => {
                let inner = self.lower_operand(tuple)?;
                let ty = self.operand_type(tuple);
                let tt = self.tuple_type_of(&ty, node)?;
                let mut frag = Fragment::new(node);
                let src = inner.result;
                frag.absorb(inner);
                frag.push(Instr::TupleGetField {
                    dest: node,
                    tuple: src,
                    type_index: tt.index,
                    field: *field,
                    elem: tt.fields[*field].ty,
                });
                Ok(frag)
            }

            ExprKind::VectorIndex { target, index } => {
                self.lower_vector_index(expr, target, index)
            }

            ExprKind::MatrixIndex {
                target,
                row,
                column,
            } => self.lower_matrix_index(expr, target, row, column),

            ExprKind::Call { method, args } => self.lower_call(expr, *method, args),

            ExprKind::Cast { value } => self.lower_cast(expr, value),

            ExprKind::Generator { domains, body } => self.lower_generator(expr, domains, body),
        }
    }

    /// Lower an expression and apply the widening its context demands.
    fn lower_operand(&mut self, expr: &Expr) -> Result<Fragment> {
        let frag = self.lower_expression(expr)?;
        match &expr.promote_to {
            None => Ok(frag),
            Some(target) => {
                let produced = self.value_type(expr);
                if produced == *target {
                    Ok(frag)
                } else {
                    self.apply_promotion(frag, &produced, target, expr.result_id)
                }
            }
        }
    }

    /// The type of the value [`Self::lower_expression`] actually produces
    /// for this node, before any context-demanded promotion.
    ///
    /// This differs from the static type in exactly one family of cases:
    /// an arithmetic node typed `interval` whose operands force vector
    /// machinery (e.g. interval plus scalar) produces an integer vector.
    fn value_type(&self, expr: &Expr) -> Type {
        if let ExprKind::Binary { op, lhs, rhs } = &expr.kind {
            if expr.eval_type == Type::Interval {
                let ls = lhs.effective_type().shape();
                let rs = rhs.effective_type().shape();
                let native =
                    interval_native_op(*op) && ls == Shape::Interval && rs == Shape::Interval;
                if !native {
                    return Type::Vector(ScalarType::Integer);
                }
            }
        }
        expr.eval_type.clone()
    }

    /// The type this expression contributes to its parent: promotion
    /// target if one is set, produced type otherwise.
    fn operand_type(&self, expr: &Expr) -> Type {
        expr.promote_to
            .clone()
            .unwrap_or_else(|| self.value_type(expr))
    }

    // -- binary operators --------------------------------------------------

    fn lower_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Fragment> {
        let node = expr.result_id;

        // Structural tuple comparison is its own lowering.
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne)
            && matches!(lhs.effective_type(), Type::Tuple(_))
        {
            return self.lower_tuple_comparison(expr, op, lhs, rhs);
        }

        let lf = self.lower_operand(lhs)?;
        let lt = self.operand_type(lhs);
        let rf = self.lower_operand(rhs)?;
        let rt = self.operand_type(rhs);

        // Intervals keep their native arithmetic/equality only against
        // another interval; every other pairing runs on vector machinery.
        let native_interval = interval_native_op(op)
            && lt.shape() == Shape::Interval
            && rt.shape() == Shape::Interval;
        let (lf, lt, rf, rt) = if native_interval {
            (lf, lt, rf, rt)
        } else {
            let (lf, lt) = self.coerce_interval_typed(lf, lt);
            let (rf, rt) = self.coerce_interval_typed(rf, rt);
            (lf, lt, rf, rt)
        };

        // The lattice validates the pairing; concatenation and dot product
        // sit outside the four tables and are validated purely by shape.
        if !matches!(op, BinaryOp::Concat | BinaryOp::DotProduct)
            && types::result_type(op.op_class(), &lt, &rt).is_none()
        {
            return Err(LoweringError::IncompatibleTypes {
                class: op.op_class(),
                lhs: lt,
                rhs: rt,
                node,
            });
        }

        // Element type the operation runs over: the wider operand element.
        let op_elem = wider_element(&lt, &rt);

        // Widen any integer side when the operation runs over reals.
        let (lf, lt) = if op_elem == ScalarType::Real {
            self.widen_side(lf, lt, node)?
        } else {
            (lf, lt)
        };
        let (rf, rt) = if op_elem == ScalarType::Real {
            self.widen_side(rf, rt, node)?
        } else {
            (rf, rt)
        };

        let operands = select_operand_shapes(op, lt.shape(), rt.shape()).ok_or(
            LoweringError::UnsupportedOperands {
                op,
                lhs: lt.shape(),
                rhs: rt.shape(),
                node,
            },
        )?;

        debug!(
            "binary {:?} dispatched as {:?} over {:?} (node {:?})",
            op, operands, op_elem, node
        );

        let mut frag = Fragment::new(node);
        let (l, r) = (lf.result, rf.result);
        frag.absorb(lf);
        frag.absorb(rf);

        // Element-wise container variants can fail at run time on size
        // mismatch; the guard always precedes the operation.
        if needs_shape_check(op, operands) {
            match operands {
                OperandShapes::VectorVector => frag.push(Instr::CheckVectorSizes { lhs: l, rhs: r }),
                OperandShapes::MatrixMatrix => frag.push(Instr::CheckMatrixSizes { lhs: l, rhs: r }),
                _ => {}
            }
        }

        frag.push(Instr::Binary {
            dest: node,
            op,
            operands,
            elem: op_elem,
            lhs: l,
            rhs: r,
        });
        Ok(frag)
    }

    /// `t1 = t2` / `t1 != t2`: compare every field pairwise and fold with
    /// AND (equality) or OR (inequality). All fields are always compared;
    /// there is deliberately no short-circuit.
    fn lower_tuple_comparison(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Fragment> {
        let node = expr.result_id;
        let lf = self.lower_operand(lhs)?;
        let rf = self.lower_operand(rhs)?;
        let tt = self.tuple_type_of(lhs.effective_type(), node)?;

        let fold_op = match op {
            BinaryOp::Eq => BinaryOp::And,
            _ => BinaryOp::Or,
        };

        let mut frag = Fragment::new(node);
        let (l, r) = (lf.result, rf.result);
        frag.absorb(lf);
        frag.absorb(rf);

        if tt.fields.is_empty() {
            frag.push(Instr::ConstBool {
                dest: node,
                value: op == BinaryOp::Eq,
            });
            return Ok(frag);
        }

        let last = tt.fields.len() - 1;
        let mut acc: Option<ValueId> = None;
        for (position, field) in tt.fields.iter().enumerate() {
            let lg = self.fresh_value();
            let rg = self.fresh_value();
            frag.push(Instr::TupleGetField {
                dest: lg,
                tuple: l,
                type_index: tt.index,
                field: position,
                elem: field.ty,
            });
            frag.push(Instr::TupleGetField {
                dest: rg,
                tuple: r,
                type_index: tt.index,
                field: position,
                elem: field.ty,
            });

            // The final fold lands on the node's own id.
            let cmp = if acc.is_none() && position == last {
                node
            } else {
                self.fresh_value()
            };
            frag.push(Instr::Binary {
                dest: cmp,
                op,
                operands: OperandShapes::ScalarScalar,
                elem: field.ty,
                lhs: lg,
                rhs: rg,
            });

            acc = Some(match acc {
                None => cmp,
                Some(previous) => {
                    let folded = if position == last {
                        node
                    } else {
                        self.fresh_value()
                    };
                    frag.push(Instr::Binary {
                        dest: folded,
                        op: fold_op,
                        operands: OperandShapes::ScalarScalar,
                        elem: ScalarType::Boolean,
                        lhs: previous,
                        rhs: cmp,
                    });
                    folded
                }
            });
        }
        Ok(frag)
    }

    // -- literals ----------------------------------------------------------

    fn lower_tuple_literal(&mut self, expr: &Expr, elements: &[Expr]) -> Result<Fragment> {
        let node = expr.result_id;
        let tt = self.tuple_type_of(&expr.eval_type, node)?;
        let mut frag = Fragment::new(node);
        frag.push(Instr::TupleAlloc {
            dest: node,
            type_index: tt.index,
        });
        for (position, (element, field)) in elements.iter().zip(&tt.fields).enumerate() {
            let ef = self.lower_operand(element)?;
            let element_ty = self.operand_type(element);
            let ef = self.widen_scalar_if_needed(ef, &element_ty, field.ty, node)?;
            let value = ef.result;
            frag.absorb(ef);
            frag.push(Instr::TupleSetField {
                tuple: node,
                type_index: tt.index,
                field: position,
                value,
                elem: field.ty,
            });
        }
        Ok(frag)
    }

    fn lower_vector_literal(&mut self, expr: &Expr, elements: &[Expr]) -> Result<Fragment> {
        let node = expr.result_id;
        let elem = match &expr.eval_type {
            Type::Vector(e) => *e,
            other => return Err(not_indexable(other, node)),
        };

        let mut frag = Fragment::new(node);
        let len = self.fresh_value();
        frag.push(Instr::ConstInt {
            dest: len,
            value: elements.len() as i32,
        });
        frag.push(Instr::VectorInit {
            dest: node,
            elem,
            len,
        });
        for (position, element) in elements.iter().enumerate() {
            let ef = self.lower_operand(element)?;
            let element_ty = self.operand_type(element);
            let ef = self.widen_scalar_if_needed(ef, &element_ty, elem, node)?;
            let value = ef.result;
            frag.absorb(ef);
            // Element positions are 1-based.
            frag.push(Instr::VectorSetConst {
                vector: node,
                index: position as u32 + 1,
                value,
            });
        }
        Ok(frag)
    }

    fn lower_matrix_literal(&mut self, expr: &Expr, rows: &[Expr]) -> Result<Fragment> {
        let node = expr.result_id;
        let elem = match &expr.eval_type {
            Type::Matrix(e) => *e,
            other => return Err(not_indexable(other, node)),
        };
        let arity = match rows.first().map(|r| &r.kind) {
            Some(ExprKind::VectorLiteral { elements }) => elements.len(),
            _ => return Err(LoweringError::MalformedMatrixLiteral { node }),
        };

        let mut frag = Fragment::new(node);
        let row_count = self.fresh_value();
        let col_count = self.fresh_value();
        frag.push(Instr::ConstInt {
            dest: row_count,
            value: rows.len() as i32,
        });
        frag.push(Instr::ConstInt {
            dest: col_count,
            value: arity as i32,
        });
        frag.push(Instr::MatrixInit {
            dest: node,
            elem,
            rows: row_count,
            cols: col_count,
        });
        for (position, row) in rows.iter().enumerate() {
            let rf = self.lower_operand(row)?;
            let row_ty = self.operand_type(row);
            let rf = self.widen_container_if_needed(rf, &row_ty, elem);
            let values = rf.result;
            frag.absorb(rf);
            frag.push(Instr::MatrixSetRow {
                matrix: node,
                row: position as u32 + 1,
                values,
            });
        }
        Ok(frag)
    }

    // -- indexing ----------------------------------------------------------

    fn lower_vector_index(&mut self, expr: &Expr, target: &Expr, index: &Expr) -> Result<Fragment> {
        let node = expr.result_id;
        let tf = self.lower_operand(target)?;
        let target_ty = self.operand_type(target);
        // Indexing an interval reads it through vector machinery.
        let tf = self.coerce_interval(tf, &target_ty);
        let elem = target_ty.element().unwrap_or(ScalarType::Integer);

        let ixf = self.lower_operand(index)?;
        let index_ty = self.operand_type(index);
        let ixf = self.coerce_interval(ixf, &index_ty);

        let mut frag = Fragment::new(node);
        let (vector, ix) = (tf.result, ixf.result);
        frag.absorb(tf);
        frag.absorb(ixf);
        if index_ty.shape() == Shape::Scalar {
            frag.push(Instr::VectorGetElement {
                dest: node,
                vector,
                index: ix,
                elem,
            });
        } else {
            frag.push(Instr::VectorGather {
                dest: node,
                vector,
                indices: ix,
                elem,
            });
        }
        Ok(frag)
    }

    fn lower_matrix_index(
        &mut self,
        expr: &Expr,
        target: &Expr,
        row: &Expr,
        column: &Expr,
    ) -> Result<Fragment> {
        let node = expr.result_id;
        let tf = self.lower_operand(target)?;
        let target_ty = self.operand_type(target);
        let elem = target_ty.element().unwrap_or(ScalarType::Integer);

        let rfr = self.lower_operand(row)?;
        let row_ty = self.operand_type(row);
        let rfr = self.coerce_interval(rfr, &row_ty);
        let row_scalar = row_ty.shape() == Shape::Scalar;

        let cfr = self.lower_operand(column)?;
        let col_ty = self.operand_type(column);
        let cfr = self.coerce_interval(cfr, &col_ty);
        let col_scalar = col_ty.shape() == Shape::Scalar;

        let mut frag = Fragment::new(node);
        let (matrix, r, c) = (tf.result, rfr.result, cfr.result);
        frag.absorb(tf);
        frag.absorb(rfr);
        frag.absorb(cfr);

        let instr = match (row_scalar, col_scalar) {
            (true, true) => Instr::MatrixGetElement {
                dest: node,
                matrix,
                row: r,
                col: c,
                elem,
            },
            (true, false) => Instr::MatrixSliceRow {
                dest: node,
                matrix,
                row: r,
                cols: c,
                elem,
            },
            (false, true) => Instr::MatrixSliceColumn {
                dest: node,
                matrix,
                rows: r,
                col: c,
                elem,
            },
            (false, false) => Instr::MatrixSliceSub {
                dest: node,
                matrix,
                rows: r,
                cols: c,
                elem,
            },
        };
        frag.push(instr);
        Ok(frag)
    }

    // -- calls -------------------------------------------------------------

    fn lower_call(&mut self, expr: &Expr, method_id: SymbolId, args: &[Expr]) -> Result<Fragment> {
        let node = expr.result_id;
        let method = self.method(method_id, node)?;

        if let Some(builtin) = Builtin::from_name(&method.name) {
            return self.lower_builtin(expr, builtin, args);
        }

        let mut frag = Fragment::new(node);
        let mut call_args = Vec::with_capacity(args.len());
        for arg in args {
            // A plain variable with no promotion is passed by reference to
            // its storage; everything else is evaluated and passed by
            // value.
            if let (ExprKind::Identifier { symbol }, None) = (&arg.kind, &arg.promote_to) {
                let var = self.variable(*symbol, node)?;
                call_args.push(CallArg::ByRef {
                    symbol: *symbol,
                    storage: var.storage_class(),
                });
            } else {
                let af = self.lower_operand(arg)?;
                call_args.push(CallArg::ByValue { value: af.result });
                frag.absorb(af);
            }
        }

        let dest = method.return_type.as_ref().map(|_| node);
        frag.push(Instr::Call {
            dest,
            method: method_id,
            args: call_args,
        });
        Ok(frag)
    }

    fn lower_builtin(&mut self, expr: &Expr, builtin: Builtin, args: &[Expr]) -> Result<Fragment> {
        let node = expr.result_id;
        let mut frag = Fragment::new(node);

        match builtin {
            Builtin::StreamState => {
                frag.push(Instr::StreamState { dest: node });
                Ok(frag)
            }
            Builtin::Length | Builtin::Reverse => {
                let arg = first_argument(args, builtin, node)?;
                let af = self.lower_operand(arg)?;
                let ty = self.operand_type(arg);
                let af = self.coerce_interval(af, &ty);
                let vector = af.result;
                frag.absorb(af);
                match builtin {
                    Builtin::Length => frag.push(Instr::VectorLength { dest: node, vector }),
                    _ => frag.push(Instr::VectorReverse {
                        dest: node,
                        vector,
                        elem: ty.element().unwrap_or(ScalarType::Integer),
                    }),
                }
                Ok(frag)
            }
            Builtin::Rows | Builtin::Columns => {
                let arg = first_argument(args, builtin, node)?;
                let af = self.lower_operand(arg)?;
                let matrix = af.result;
                frag.absorb(af);
                match builtin {
                    Builtin::Rows => frag.push(Instr::MatrixRows { dest: node, matrix }),
                    _ => frag.push(Instr::MatrixCols { dest: node, matrix }),
                }
                Ok(frag)
            }
        }
    }

    // -- casts -------------------------------------------------------------

    fn lower_cast(&mut self, expr: &Expr, value: &Expr) -> Result<Fragment> {
        let node = expr.result_id;
        let to = &expr.eval_type;
        let inner = self.lower_expression(value)?;
        let from = self.value_type(value);

        if !types::cast_allowed(&from, to) {
            return Err(LoweringError::InvalidCast {
                from,
                to: to.clone(),
                node,
            });
        }

        match (from.as_scalar(), to.as_scalar()) {
            (Some(from_scalar), Some(to_scalar)) => {
                let mut frag = Fragment::new(node);
                let src = inner.result;
                frag.absorb(inner);
                frag.push(Instr::CastScalar {
                    dest: node,
                    src,
                    from: from_scalar,
                    to: to_scalar,
                });
                Ok(frag)
            }
            _ => {
                // Tuple-to-tuple cast: materialize the destination shape,
                // then move each field through a scalar cast.
                let from_tt = self.tuple_type_of(&from, node)?;
                let to_tt = self.tuple_type_of(to, node)?;
                let mut frag = Fragment::new(node);
                let src = inner.result;
                frag.absorb(inner);
                frag.push(Instr::TupleAlloc {
                    dest: node,
                    type_index: to_tt.index,
                });
                for (position, (from_field, to_field)) in
                    from_tt.fields.iter().zip(&to_tt.fields).enumerate()
                {
                    let raw = self.fresh_value();
                    let cast = self.fresh_value();
                    frag.push(Instr::TupleGetField {
                        dest: raw,
                        tuple: src,
                        type_index: from_tt.index,
                        field: position,
                        elem: from_field.ty,
                    });
                    frag.push(Instr::CastScalar {
                        dest: cast,
                        src: raw,
                        from: from_field.ty,
                        to: to_field.ty,
                    });
                    frag.push(Instr::TupleSetField {
                        tuple: node,
                        type_index: to_tt.index,
                        field: position,
                        value: cast,
                        elem: to_field.ty,
                    });
                }
                Ok(frag)
            }
        }
    }

    // -- generators --------------------------------------------------------

    fn lower_generator(
        &mut self,
        expr: &Expr,
        domains: &[GeneratorDomain],
        body: &Expr,
    ) -> Result<Fragment> {
        match domains.len() {
            1 => self.lower_vector_generator(expr, &domains[0], body),
            2 => self.lower_matrix_generator(expr, &domains[0], &domains[1], body),
            count => Err(LoweringError::BadDomainArity {
                count,
                node: expr.result_id,
            }),
        }
    }

    fn lower_vector_generator(
        &mut self,
        expr: &Expr,
        domain: &GeneratorDomain,
        body: &Expr,
    ) -> Result<Fragment> {
        let node = expr.result_id;
        let elem = match &expr.eval_type {
            Type::Vector(e) => *e,
            other => return Err(not_indexable(other, node)),
        };

        let mut frag = Fragment::new(node);
        let (vector, domain_elem) = self.emit_domain_value(&mut frag.instrs, domain)?;
        let len = self.fresh_value();
        frag.push(Instr::VectorLength { dest: len, vector });
        frag.push(Instr::VectorInit {
            dest: node,
            elem,
            len,
        });

        let counter = self.emit_counter_init(&mut frag.instrs);
        let check_label = self.fresh_label();
        let body_label = self.fresh_label();
        let incr_label = self.fresh_label();
        let end_label = self.fresh_label();

        frag.push(Instr::Label(check_label));
        let cmp = self.emit_counter_check(&mut frag.instrs, counter, len);
        frag.push(Instr::Branch {
            cond: cmp,
            then_label: body_label,
            else_label: end_label,
        });
        frag.push(Instr::Label(body_label));

        let index =
            self.emit_domain_element(&mut frag.instrs, counter, vector, domain, domain_elem)?;

        self.loop_stack.push(LoopFrame {
            loop_id: node,
            continue_label: incr_label,
            break_label: end_label,
        });
        let body_frag = self.lower_operand(body);
        self.loop_stack.pop();
        let body_frag = body_frag?;
        let body_ty = self.operand_type(body);
        let body_frag = self.widen_scalar_if_needed(body_frag, &body_ty, elem, node)?;
        let value = body_frag.result;
        frag.absorb(body_frag);
        frag.push(Instr::VectorSetElement {
            vector: node,
            index,
            value,
            elem,
        });

        frag.push(Instr::Label(incr_label));
        self.emit_counter_step(&mut frag.instrs, counter);
        frag.push(Instr::Jump(check_label));
        frag.push(Instr::Label(end_label));
        Ok(frag)
    }

    fn lower_matrix_generator(
        &mut self,
        expr: &Expr,
        row_domain: &GeneratorDomain,
        col_domain: &GeneratorDomain,
        body: &Expr,
    ) -> Result<Fragment> {
        let node = expr.result_id;
        let elem = match &expr.eval_type {
            Type::Matrix(e) => *e,
            other => return Err(not_indexable(other, node)),
        };

        let mut frag = Fragment::new(node);
        let (row_vec, row_elem) = self.emit_domain_value(&mut frag.instrs, row_domain)?;
        let (col_vec, col_elem) = self.emit_domain_value(&mut frag.instrs, col_domain)?;
        let rows = self.fresh_value();
        let cols = self.fresh_value();
        frag.push(Instr::VectorLength {
            dest: rows,
            vector: row_vec,
        });
        frag.push(Instr::VectorLength {
            dest: cols,
            vector: col_vec,
        });
        frag.push(Instr::MatrixInit {
            dest: node,
            elem,
            rows,
            cols,
        });

        let row_counter = self.emit_counter_init(&mut frag.instrs);
        let row_check = self.fresh_label();
        let row_body = self.fresh_label();
        let row_incr = self.fresh_label();
        let end_label = self.fresh_label();

        frag.push(Instr::Label(row_check));
        let row_cmp = self.emit_counter_check(&mut frag.instrs, row_counter, rows);
        frag.push(Instr::Branch {
            cond: row_cmp,
            then_label: row_body,
            else_label: end_label,
        });
        frag.push(Instr::Label(row_body));
        let row_index =
            self.emit_domain_element(&mut frag.instrs, row_counter, row_vec, row_domain, row_elem)?;

        let col_counter = self.emit_counter_init(&mut frag.instrs);
        let col_check = self.fresh_label();
        let col_body = self.fresh_label();
        let col_incr = self.fresh_label();

        frag.push(Instr::Label(col_check));
        let col_cmp = self.emit_counter_check(&mut frag.instrs, col_counter, cols);
        frag.push(Instr::Branch {
            cond: col_cmp,
            then_label: col_body,
            else_label: row_incr,
        });
        frag.push(Instr::Label(col_body));
        let col_index =
            self.emit_domain_element(&mut frag.instrs, col_counter, col_vec, col_domain, col_elem)?;

        self.loop_stack.push(LoopFrame {
            loop_id: node,
            continue_label: col_incr,
            break_label: end_label,
        });
        let body_frag = self.lower_operand(body);
        self.loop_stack.pop();
        let body_frag = body_frag?;
        let body_ty = self.operand_type(body);
        let body_frag = self.widen_scalar_if_needed(body_frag, &body_ty, elem, node)?;
        let value = body_frag.result;
        frag.absorb(body_frag);
        frag.push(Instr::MatrixSetElement {
            matrix: node,
            row: row_index,
            col: col_index,
            value,
            elem,
        });

        frag.push(Instr::Label(col_incr));
        self.emit_counter_step(&mut frag.instrs, col_counter);
        frag.push(Instr::Jump(col_check));

        frag.push(Instr::Label(row_incr));
        self.emit_counter_step(&mut frag.instrs, row_counter);
        frag.push(Instr::Jump(row_check));
        frag.push(Instr::Label(end_label));
        Ok(frag)
    }

    // -- loop scaffolding --------------------------------------------------

    /// Evaluate an iterator/generator domain once, as an integer-indexed
    /// vector.
    fn emit_domain_value(
        &mut self,
        instrs: &mut Vec<Instr>,
        domain: &GeneratorDomain,
    ) -> Result<(ValueId, ScalarType)> {
        let frag = self.lower_operand(&domain.domain)?;
        let ty = self.operand_type(&domain.domain);
        let frag = self.coerce_interval(frag, &ty);
        let elem = ty.element().unwrap_or(ScalarType::Integer);
        let result = frag.result;
        instrs.extend(frag.instrs);
        Ok((result, elem))
    }

    /// Allocate and initialize a 1-based loop counter slot.
    fn emit_counter_init(&mut self, instrs: &mut Vec<Instr>) -> TempId {
        let counter = self.fresh_temp();
        let one = self.fresh_value();
        instrs.push(Instr::TempAlloc {
            temp: counter,
            ty: Type::Integer,
        });
        instrs.push(Instr::ConstInt {
            dest: one,
            value: 1,
        });
        instrs.push(Instr::TempStore {
            temp: counter,
            src: one,
        });
        counter
    }

    /// `counter <= len`, loaded fresh each iteration.
    fn emit_counter_check(
        &mut self,
        instrs: &mut Vec<Instr>,
        counter: TempId,
        len: ValueId,
    ) -> ValueId {
        let current = self.fresh_value();
        let cmp = self.fresh_value();
        instrs.push(Instr::TempLoad {
            dest: current,
            temp: counter,
        });
        instrs.push(Instr::Binary {
            dest: cmp,
            op: BinaryOp::Le,
            operands: OperandShapes::ScalarScalar,
            elem: ScalarType::Integer,
            lhs: current,
            rhs: len,
        });
        cmp
    }

    fn emit_counter_step(&mut self, instrs: &mut Vec<Instr>, counter: TempId) {
        let current = self.fresh_value();
        let one = self.fresh_value();
        let next = self.fresh_value();
        instrs.push(Instr::TempLoad {
            dest: current,
            temp: counter,
        });
        instrs.push(Instr::ConstInt {
            dest: one,
            value: 1,
        });
        instrs.push(Instr::Binary {
            dest: next,
            op: BinaryOp::Add,
            operands: OperandShapes::ScalarScalar,
            elem: ScalarType::Integer,
            lhs: current,
            rhs: one,
        });
        instrs.push(Instr::TempStore {
            temp: counter,
            src: next,
        });
    }

    /// Bind the current domain element to the iteration variable and
    /// return the loaded counter value.
    fn emit_domain_element(
        &mut self,
        instrs: &mut Vec<Instr>,
        counter: TempId,
        vector: ValueId,
        domain: &GeneratorDomain,
        elem: ScalarType,
    ) -> Result<ValueId> {
        let index = self.fresh_value();
        let element = self.fresh_value();
        instrs.push(Instr::TempLoad {
            dest: index,
            temp: counter,
        });
        instrs.push(Instr::VectorGetElement {
            dest: element,
            vector,
            index,
            elem,
        });
        let var = self.variable(domain.symbol, index)?;
        instrs.push(Instr::StoreVar {
            symbol: domain.symbol,
            storage: var.storage_class(),
            src: element,
        });
        Ok(index)
    }

    // -- coercions and widenings -------------------------------------------

    /// Widen a fragment's value from one type to another. Only the
    /// combinations the promotion table produces are representable;
    /// anything else is a front-end contract violation.
    fn apply_promotion(
        &mut self,
        frag: Fragment,
        from: &Type,
        to: &Type,
        node: ValueId,
    ) -> Result<Fragment> {
        let mut frag = frag;
        let src = frag.result;
        match (from, to) {
            (Type::Integer, Type::Real) => {
                let dest = self.fresh_value();
                frag.push(Instr::CastScalar {
                    dest,
                    src,
                    from: ScalarType::Integer,
                    to: ScalarType::Real,
                });
                frag.result = dest;
                Ok(frag)
            }
            (Type::Interval, Type::Vector(ScalarType::Integer)) => {
                let dest = self.fresh_value();
                frag.push(Instr::IntervalToVector { dest, src });
                frag.result = dest;
                Ok(frag)
            }
            (Type::Interval, Type::Vector(ScalarType::Real)) => {
                let widened = self.fresh_value();
                let dest = self.fresh_value();
                frag.push(Instr::IntervalToVector { dest: widened, src });
                frag.push(Instr::VectorToReal { dest, src: widened });
                frag.result = dest;
                Ok(frag)
            }
            (Type::Vector(ScalarType::Integer), Type::Vector(ScalarType::Real)) => {
                let dest = self.fresh_value();
                frag.push(Instr::VectorToReal { dest, src });
                frag.result = dest;
                Ok(frag)
            }
            (Type::Matrix(ScalarType::Integer), Type::Matrix(ScalarType::Real)) => {
                let dest = self.fresh_value();
                frag.push(Instr::MatrixToReal { dest, src });
                frag.result = dest;
                Ok(frag)
            }
            _ => Err(LoweringError::InvalidPromotion {
                from: from.clone(),
                to: to.clone(),
                node,
            }),
        }
    }

    /// Materialize an interval-shaped value as an integer vector; other
    /// shapes pass through untouched.
    fn coerce_interval(&mut self, frag: Fragment, ty: &Type) -> Fragment {
        if ty.shape() != Shape::Interval {
            return frag;
        }
        let mut frag = frag;
        let src = frag.result;
        let dest = self.fresh_value();
        frag.push(Instr::IntervalToVector { dest, src });
        frag.result = dest;
        frag
    }

    fn coerce_interval_typed(&mut self, frag: Fragment, ty: Type) -> (Fragment, Type) {
        if ty.shape() != Shape::Interval {
            return (frag, ty);
        }
        let frag = self.coerce_interval(frag, &ty);
        (frag, Type::Vector(ScalarType::Integer))
    }

    /// Widen one operand side to real element-wise when its element is
    /// still integer.
    fn widen_side(&mut self, frag: Fragment, ty: Type, node: ValueId) -> Result<(Fragment, Type)> {
        if ty.element() != Some(ScalarType::Integer) {
            return Ok((frag, ty));
        }
        let target = match &ty {
            Type::Integer => Type::Real,
            Type::Vector(_) => Type::Vector(ScalarType::Real),
            Type::Matrix(_) => Type::Matrix(ScalarType::Real),
            // A remaining interval here means the operator is natively
            // interval-typed; interval arithmetic never mixes with reals.
            _ => return Ok((frag, ty)),
        };
        let frag = self.apply_promotion(frag, &ty, &target, node)?;
        Ok((frag, target))
    }

    /// Insert an integer-to-real scalar widening when the destination
    /// element type demands it.
    fn widen_scalar_if_needed(
        &mut self,
        frag: Fragment,
        from: &Type,
        want: ScalarType,
        node: ValueId,
    ) -> Result<Fragment> {
        if want == ScalarType::Real && from.as_scalar() == Some(ScalarType::Integer) {
            self.apply_promotion(frag, &Type::Integer, &Type::Real, node)
        } else {
            Ok(frag)
        }
    }

    /// Element-wise widen an integer vector/matrix value when the
    /// destination element type is real.
    fn widen_container_if_needed(
        &mut self,
        frag: Fragment,
        from: &Type,
        want: ScalarType,
    ) -> Fragment {
        if want != ScalarType::Real {
            return frag;
        }
        let mut frag = frag;
        let src = frag.result;
        match from {
            Type::Vector(ScalarType::Integer) | Type::Interval => {
                let dest = self.fresh_value();
                frag.push(Instr::VectorToReal { dest, src });
                frag.result = dest;
            }
            Type::Matrix(ScalarType::Integer) => {
                let dest = self.fresh_value();
                frag.push(Instr::MatrixToReal { dest, src });
                frag.result = dest;
            }
            _ => {}
        }
        frag
    }

    /// Copy every field of `src` into `dest`, in declaration order.
    fn emit_tuple_copy(
        &mut self,
        instrs: &mut Vec<Instr>,
        src: ValueId,
        dest: ValueId,
        tt: &TupleType,
    ) {
        for (position, field) in tt.fields.iter().enumerate() {
            let value = self.fresh_value();
            instrs.push(Instr::TupleGetField {
                dest: value,
                tuple: src,
                type_index: tt.index,
                field: position,
                elem: field.ty,
            });
            instrs.push(Instr::TupleSetField {
                tuple: dest,
                type_index: tt.index,
                field: position,
                value,
                elem: field.ty,
            });
        }
    }
}

/// Interval operands keep native interval machinery for these operators
/// (against another interval); everything else is vector work.
fn interval_native_op(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Eq | BinaryOp::Ne
    )
}

/// The wider of the two operand element types, in lattice order.
fn wider_element(lhs: &Type, rhs: &Type) -> ScalarType {
    let le = lhs.element().unwrap_or(ScalarType::Boolean);
    let re = rhs.element().unwrap_or(ScalarType::Boolean);
    if (re.as_type().index() as usize) > (le.as_type().index() as usize) {
        re
    } else {
        le
    }
}

/// The exhaustive `(operator, left shape, right shape)` dispatch. `None`
/// means the combination has no variant and the tree is malformed.
fn select_operand_shapes(op: BinaryOp, lhs: Shape, rhs: Shape) -> Option<OperandShapes> {
    let shapes = match (lhs, rhs) {
        (Shape::Scalar, Shape::Scalar) => OperandShapes::ScalarScalar,
        (Shape::Interval, Shape::Interval) => OperandShapes::IntervalInterval,
        (Shape::Vector, Shape::Vector) => OperandShapes::VectorVector,
        (Shape::Vector, Shape::Scalar) => OperandShapes::VectorScalar,
        (Shape::Scalar, Shape::Vector) => OperandShapes::ScalarVector,
        (Shape::Matrix, Shape::Matrix) => OperandShapes::MatrixMatrix,
        (Shape::Matrix, Shape::Scalar) => OperandShapes::MatrixScalar,
        (Shape::Scalar, Shape::Matrix) => OperandShapes::ScalarMatrix,
        // Vector/matrix mixes and stray intervals have no variant.
        _ => return None,
    };

    match op {
        BinaryOp::Concat => matches!(
            shapes,
            OperandShapes::VectorVector | OperandShapes::VectorScalar | OperandShapes::ScalarVector
        )
        .then_some(shapes),
        BinaryOp::DotProduct => matches!(
            shapes,
            OperandShapes::VectorVector | OperandShapes::MatrixMatrix
        )
        .then_some(shapes),
        _ => Some(shapes),
    }
}

/// Every element-wise vector-vector / matrix-matrix variant needs a size
/// guard; concatenation and dot product define their own size semantics.
fn needs_shape_check(op: BinaryOp, operands: OperandShapes) -> bool {
    matches!(
        operands,
        OperandShapes::VectorVector | OperandShapes::MatrixMatrix
    ) && !matches!(op, BinaryOp::Concat | BinaryOp::DotProduct)
}

fn first_argument(args: &[Expr], builtin: Builtin, node: ValueId) -> Result<&Expr> {
    args.first().ok_or_else(|| LoweringError::BadCallArity {
        method: format!("{builtin:?}").to_lowercase(),
        node,
    })
}

fn not_indexable(ty: &Type, node: ValueId) -> LoweringError {
    LoweringError::BadNodeType {
        ty: ty.clone(),
        node,
    }
}

/// A global initializer that is a plain literal becomes part of the
/// storage declaration instead of start-up code.
fn literal_const(expr: &Expr) -> Option<ConstValue> {
    if expr.promote_to.is_some() {
        return None;
    }
    match &expr.kind {
        ExprKind::BooleanLiteral(v) => Some(ConstValue::Bool(*v)),
        ExprKind::CharacterLiteral(v) => Some(ConstValue::Char(*v)),
        ExprKind::IntegerLiteral(v) => Some(ConstValue::Int(*v)),
        ExprKind::RealLiteral(v) => Some(ConstValue::Real(*v)),
        _ => None,
    }
}

/// Convenience entry point: lower one unit with a fresh context.
pub fn lower_unit(symbols: &SymbolTable, program: &ast::Program) -> Result<IrUnit> {
    LoweringContext::new(symbols).lower_program(program)
}
