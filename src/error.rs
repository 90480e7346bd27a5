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

//! Error types for the Weft middle end
//!
//! Every variant here is an internal error: a broken precondition handed to
//! us by the front end. None of these are user-facing language diagnostics;
//! the only user-visible failures this crate produces are the runtime shape
//! guards emitted into the IR.

use thiserror::Error;

use crate::ast::BinaryOp;
use crate::mir::ValueId;
use crate::symbols::SymbolId;
use crate::types::{OpClass, Shape, Type};

/// Fatal lowering failures. Each carries the `ValueId` of the offending
/// node so the broken tree can be located from the diagnostic alone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoweringError {
    #[error("internal error: symbol {id:?} is not a variable (node {node:?})")]
    NotAVariable { id: SymbolId, node: ValueId },

    #[error("internal error: symbol {id:?} is not a method (node {node:?})")]
    NotAMethod { id: SymbolId, node: ValueId },

    #[error("internal error: expected a tuple type, found {ty:?} (node {node:?})")]
    NotATuple { ty: Type, node: ValueId },

    #[error("internal error: node type {ty:?} does not fit its construct (node {node:?})")]
    BadNodeType { ty: Type, node: ValueId },

    #[error(
        "internal error: no {op:?} variant for operand shapes \
         {lhs:?}/{rhs:?} (node {node:?})"
    )]
    UnsupportedOperands {
        op: BinaryOp,
        lhs: Shape,
        rhs: Shape,
        node: ValueId,
    },

    #[error(
        "internal error: operand types {lhs:?} and {rhs:?} are incompatible \
         under {class:?} (node {node:?})"
    )]
    IncompatibleTypes {
        class: OpClass,
        lhs: Type,
        rhs: Type,
        node: ValueId,
    },

    #[error("internal error: unresolved {ty:?} placeholder reached lowering (node {node:?})")]
    UnresolvedPlaceholder { ty: Type, node: ValueId },

    #[error("internal error: break or continue outside of any loop (node {node:?})")]
    LoopStackEmpty { node: ValueId },

    #[error(
        "internal error: assignment to const destination '{name}' was not \
         rejected upstream (node {node:?})"
    )]
    ConstDestination { name: String, node: ValueId },

    #[error("internal error: no widening from {from:?} to {to:?} (node {node:?})")]
    InvalidPromotion { from: Type, to: Type, node: ValueId },

    #[error("internal error: cast from {from:?} to {to:?} is outside the cast table (node {node:?})")]
    InvalidCast { from: Type, to: Type, node: ValueId },

    #[error("internal error: iteration form has {count} domains (node {node:?})")]
    BadDomainArity { count: usize, node: ValueId },

    #[error("internal error: matrix literal row is not a vector literal (node {node:?})")]
    MalformedMatrixLiteral { node: ValueId },

    #[error("internal error: call to '{method}' is missing arguments (node {node:?})")]
    BadCallArity { method: String, node: ValueId },

    #[error("internal error: read target must be a variable or tuple field (node {node:?})")]
    UnsupportedReadTarget { node: ValueId },

    #[error("internal error: program declares no 'main' entry procedure")]
    MissingEntryPoint,
}
