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

//! The typed Weft AST
//!
//! This is the input contract of the middle end. The front end produces a
//! fully typed, fully resolved tree: every expression carries its static
//! result type, the widening the context demands (if any), and a unique
//! result id that names its value in the emitted IR. Identifiers and tuple
//! members are already bound to symbol ids and field positions. The tree
//! is immutable during lowering; anything synthetic the engine needs gets
//! a fresh id from its own counter.


use serde::{Deserialize, Serialize};

use crate::mir::ValueId;
use crate::symbols::SymbolId;
use crate::types::Type;

/// The closed binary operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Concat,
    DotProduct,
}

impl BinaryOp {
    pub fn op_class(self) -> crate::types::OpClass {
        use crate::types::OpClass;
        match self {
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => OpClass::Logical,
            BinaryOp::Eq | BinaryOp::Ne => OpClass::Equality,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => OpClass::Relational,
            _ => OpClass::Arithmetic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Minus,
    Not,
}

/// One typed expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    /// Static result type, already resolved by the front end.
    pub eval_type: Type,
    /// If present, this node's raw result must be widened to this type
    /// before use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promote_to: Option<Type>,
    /// Unique value id across the compilation unit.
    pub result_id: ValueId,
}

impl Expr {
    /// The type this node contributes to its parent: the promotion target
    /// when one is set, the raw static type otherwise.
    pub fn effective_type(&self) -> &Type {
        self.promote_to.as_ref().unwrap_or(&self.eval_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    BooleanLiteral(bool),
    CharacterLiteral(u8),
    IntegerLiteral(i32),
    RealLiteral(f64),
    /// A resolved identifier.
    Identifier { symbol: SymbolId },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `lower..upper` interval literal; both bounds are integers.
    Range {
        lower: Box<Expr>,
        upper: Box<Expr>,
    },
    /// `source by step`: every step-th element of an interval or vector.
    By {
        source: Box<Expr>,
        step: Box<Expr>,
    },
    TupleLiteral { elements: Vec<Expr> },
    VectorLiteral { elements: Vec<Expr> },
    /// Rows are vector literals of equal static arity.
    MatrixLiteral { rows: Vec<Expr> },
    /// `tuple.field`, with the field already resolved to its position.
    TupleMember {
        tuple: Box<Expr>,
        field: usize,
    },
    /// `v[i]` where `i` may be scalar (element), or interval/vector
    /// (gather producing a vector).
    VectorIndex {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    /// `m[r, c]`; each index may independently be scalar or
    /// interval/vector, selecting an element, row/column slice, or
    /// submatrix.
    MatrixIndex {
        target: Box<Expr>,
        row: Box<Expr>,
        column: Box<Expr>,
    },
    Call {
        method: SymbolId,
        args: Vec<Expr>,
    },
    /// Explicit typecast; the target type is this node's `eval_type`.
    Cast { value: Box<Expr> },
    /// Array comprehension: one domain builds a vector, two build a matrix
    /// (first domain iterates rows, second columns).
    Generator {
        domains: Vec<GeneratorDomain>,
        body: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorDomain {
    /// The bound iteration variable.
    pub symbol: SymbolId,
    /// An interval or vector expression supplying the domain values.
    pub domain: Expr,
}

/// Destination of an assignment or read statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    Variable { symbol: SymbolId },
    TupleField { symbol: SymbolId, field: usize },
    /// `v[i] = ...`; the index may be scalar (element assignment) or
    /// interval/vector (slice assignment).
    VectorIndex { symbol: SymbolId, index: Expr },
    /// `m[r, c] = ...`; each index may independently be scalar or
    /// interval/vector.
    MatrixIndex {
        symbol: SymbolId,
        row: Expr,
        column: Expr,
    },
}

impl AssignTarget {
    pub fn symbol(&self) -> SymbolId {
        match self {
            AssignTarget::Variable { symbol }
            | AssignTarget::TupleField { symbol, .. }
            | AssignTarget::VectorIndex { symbol, .. }
            | AssignTarget::MatrixIndex { symbol, .. } => *symbol,
        }
    }
}

/// A statement list plus the symbols declared directly in its scope, in
/// declaration order. Storage for those symbols is allocated up front,
/// before any statement lowers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub declared: Vec<SymbolId>,
    pub statements: Vec<Stmt>,
}

/// One typed statement node. Statements that mint IR labels or loop ids
/// carry their own unique `result_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub result_id: ValueId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Declaration {
        symbol: SymbolId,
        init: Option<Expr>,
    },
    Assignment {
        target: AssignTarget,
        value: Expr,
    },
    /// A call evaluated for effect; the result, if any, is discarded.
    Expression { expr: Expr },
    If {
        condition: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        condition: Expr,
        body: Block,
    },
    DoWhile {
        body: Block,
        condition: Expr,
    },
    Loop { body: Block },
    /// `loop i in domain, j in domain ...` — the first binding is the
    /// outermost loop.
    Iterator {
        domains: Vec<GeneratorDomain>,
        body: Block,
    },
    Break,
    Continue,
    Return { value: Option<Expr> },
    /// `a, b, c = tuple_expr` — one destination per field, in order.
    TupleUnpack {
        targets: Vec<SymbolId>,
        tuple: Expr,
    },
    /// `value -> std_output()`; the stream operand is dropped upstream.
    Print { value: Expr },
    /// `target <- std_input()`.
    Read { target: AssignTarget },
}

/// One top-level item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    /// A global variable declaration, lowered into storage plus (when the
    /// initializer is not a plain literal) start-up initialization code.
    Global {
        symbol: SymbolId,
        init: Option<Expr>,
        result_id: ValueId,
    },
    Function {
        symbol: SymbolId,
        body: Block,
        result_id: ValueId,
    },
}

/// A whole compilation unit, in source order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Program {
    /// Highest value id used anywhere in the tree; the lowering context
    /// mints synthetic ids above this.
    pub fn max_result_id(&self) -> u32 {
        fn expr_max(e: &Expr) -> u32 {
            let mut m = e.result_id.0;
            let kids: Vec<&Expr> = match &e.kind {
                ExprKind::Unary { operand, .. } => vec![operand],
                ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
                ExprKind::Range { lower, upper } => vec![lower, upper],
                ExprKind::By { source, step } => vec![source, step],
                ExprKind::TupleLiteral { elements }
                | ExprKind::VectorLiteral { elements } => elements.iter().collect(),
                ExprKind::MatrixLiteral { rows } => rows.iter().collect(),
                ExprKind::TupleMember { tuple, .. } => vec![tuple],
                ExprKind::VectorIndex { target, index } => vec![target, index],
                ExprKind::MatrixIndex {
                    target,
                    row,
                    column,
                } => vec![target, row, column],
                ExprKind::Call { args, .. } => args.iter().collect(),
                ExprKind::Cast { value } => vec![value],
                ExprKind::Generator { domains, body } => {
                    let mut v: Vec<&Expr> = domains.iter().map(|d| &d.domain).collect();
                    v.push(body);
                    v
                }
                _ => vec![],
            };
            for k in kids {
                m = m.max(expr_max(k));
            }
            m
        }

        fn target_max(t: &AssignTarget) -> u32 {
            match t {
                AssignTarget::Variable { .. } | AssignTarget::TupleField { .. } => 0,
                AssignTarget::VectorIndex { index, .. } => expr_max(index),
                AssignTarget::MatrixIndex { row, column, .. } => {
                    expr_max(row).max(expr_max(column))
                }
            }
        }

        fn block_max(b: &Block) -> u32 {
            b.statements.iter().map(stmt_max).max().unwrap_or(0)
        }

        fn stmt_max(s: &Stmt) -> u32 {
            let inner = match &s.kind {
                StmtKind::Declaration { init, .. } => {
                    init.as_ref().map(expr_max).unwrap_or(0)
                }
                StmtKind::Assignment { target, value } => {
                    target_max(target).max(expr_max(value))
                }
                StmtKind::Expression { expr } => expr_max(expr),
                StmtKind::If {
                    condition,
                    then_block,
                    else_block,
                } => expr_max(condition)
                    .max(block_max(then_block))
                    .max(else_block.as_ref().map(block_max).unwrap_or(0)),
                StmtKind::While { condition, body }
                | StmtKind::DoWhile { body, condition } => {
                    expr_max(condition).max(block_max(body))
                }
                StmtKind::Loop { body } => block_max(body),
                StmtKind::Iterator { domains, body } => domains
                    .iter()
                    .map(|d| expr_max(&d.domain))
                    .max()
                    .unwrap_or(0)
                    .max(block_max(body)),
                StmtKind::Return { value } => {
                    value.as_ref().map(expr_max).unwrap_or(0)
                }
                StmtKind::TupleUnpack { tuple, .. } => expr_max(tuple),
                StmtKind::Print { value } => expr_max(value),
                StmtKind::Read { target } => target_max(target),
                StmtKind::Break | StmtKind::Continue => 0,
            };
            s.result_id.0.max(inner)
        }

        self.items
            .iter()
            .map(|item| match item {
                Item::Global {
                    init, result_id, ..
                } => result_id.0.max(init.as_ref().map(expr_max).unwrap_or(0)),
                Item::Function {
                    body, result_id, ..
                } => result_id.0.max(block_max(body)),
            })
            .max()
            .unwrap_or(0)
    }
}
