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

//! The Weft IR
//!
//! A linear, SSA-style instruction set. Every value is named by an integer
//! id; storage is addressed by symbol id plus storage class. Fragments
//! compose by concatenation only — the sole control-dependency mechanism is
//! the explicit `Label`/`Jump`/`Branch` instructions the control-flow
//! lowering emits.

pub mod lowering;

use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, UnaryOp};
use crate::symbols::{StorageClass, SymbolId};
use crate::types::{ScalarType, Type};

/// Runtime diagnostic for mismatched vector operands. The guard aborts the
/// compiled program with this exact text and a non-zero exit.
pub const VECTOR_SIZE_MISMATCH: &str = "Vectors are not the same size.";

/// Runtime diagnostic for mismatched matrix operands.
pub const MATRIX_SIZE_MISMATCH: &str = "Matrices are not the same size.";

/// Names one value in the IR. Tree nodes bring their own unique ids from
/// the front end; the lowering context mints fresh ones above them for
/// synthetic values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

/// A branch target inside one function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelId(pub u32);

/// A private stack slot minted by the lowering engine (loop counters and
/// similar scaffolding that needs mutation across a back edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(pub u32);

/// The shape pair an operator variant was selected for. Together with the
/// operator this is the closed dispatch key: every legal
/// `(operator, left shape, right shape)` combination maps to exactly one
/// variant, and anything else is rejected during lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandShapes {
    ScalarScalar,
    IntervalInterval,
    VectorVector,
    VectorScalar,
    ScalarVector,
    MatrixMatrix,
    MatrixScalar,
    ScalarMatrix,
}

/// How one call argument is passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallArg {
    /// A plain variable with no promotion: passed by reference to its
    /// storage.
    ByRef {
        symbol: SymbolId,
        storage: StorageClass,
    },
    /// Anything else: evaluated, then passed by value.
    ByValue { value: ValueId },
}

/// The closed instruction set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    // -- constants ---------------------------------------------------------
    ConstBool { dest: ValueId, value: bool },
    ConstChar { dest: ValueId, value: u8 },
    ConstInt { dest: ValueId, value: i32 },
    ConstReal { dest: ValueId, value: f64 },

    // -- conversions -------------------------------------------------------
    /// Scalar-to-scalar conversion over the legal cast matrix (also used
    /// for the implicit integer-to-real widening).
    CastScalar {
        dest: ValueId,
        src: ValueId,
        from: ScalarType,
        to: ScalarType,
    },
    /// Materialize an interval as an integer vector.
    IntervalToVector { dest: ValueId, src: ValueId },
    /// Element-wise widen an integer vector to a real vector.
    VectorToReal { dest: ValueId, src: ValueId },
    /// Element-wise widen an integer matrix to a real matrix.
    MatrixToReal { dest: ValueId, src: ValueId },

    // -- storage -----------------------------------------------------------
    /// Reserve zero-initialized local storage for a declared symbol.
    LocalAlloc { symbol: SymbolId, ty: Type },
    LoadVar {
        dest: ValueId,
        symbol: SymbolId,
        storage: StorageClass,
    },
    StoreVar {
        symbol: SymbolId,
        storage: StorageClass,
        src: ValueId,
    },
    TempAlloc { temp: TempId, ty: Type },
    TempLoad { dest: ValueId, temp: TempId },
    TempStore { temp: TempId, src: ValueId },

    // -- intervals ---------------------------------------------------------
    IntervalNew {
        dest: ValueId,
        lower: ValueId,
        upper: ValueId,
    },
    /// `interval by step` — an integer vector of every step-th element.
    IntervalBy {
        dest: ValueId,
        interval: ValueId,
        step: ValueId,
    },
    /// `vector by step`.
    VectorBy {
        dest: ValueId,
        vector: ValueId,
        step: ValueId,
        elem: ScalarType,
    },

    // -- vectors -----------------------------------------------------------
    /// Allocate a vector with a runtime length.
    VectorInit {
        dest: ValueId,
        elem: ScalarType,
        len: ValueId,
    },
    /// Literal element store at a 1-based position known at compile time.
    VectorSetConst {
        vector: ValueId,
        index: u32,
        value: ValueId,
    },
    VectorGetElement {
        dest: ValueId,
        vector: ValueId,
        index: ValueId,
        elem: ScalarType,
    },
    VectorSetElement {
        vector: ValueId,
        index: ValueId,
        value: ValueId,
        elem: ScalarType,
    },
    /// `v[iv]` with an index vector: gather into a new vector.
    VectorGather {
        dest: ValueId,
        vector: ValueId,
        indices: ValueId,
        elem: ScalarType,
    },
    /// `v[iv] = values`: scatter a vector of values through an index
    /// vector.
    VectorScatter {
        vector: ValueId,
        indices: ValueId,
        values: ValueId,
        elem: ScalarType,
    },
    /// `v[iv] = scalar`: fill the indexed positions with one value.
    VectorScatterFill {
        vector: ValueId,
        indices: ValueId,
        value: ValueId,
        elem: ScalarType,
    },
    /// Broadcast a scalar over every element of an existing vector.
    VectorFill { vector: ValueId, value: ValueId },
    VectorLength { dest: ValueId, vector: ValueId },
    VectorReverse {
        dest: ValueId,
        vector: ValueId,
        elem: ScalarType,
    },

    // -- matrices ----------------------------------------------------------
    MatrixInit {
        dest: ValueId,
        elem: ScalarType,
        rows: ValueId,
        cols: ValueId,
    },
    /// Literal construction: store one whole row vector at a 1-based row
    /// position known at compile time.
    MatrixSetRow {
        matrix: ValueId,
        row: u32,
        values: ValueId,
    },
    MatrixGetElement {
        dest: ValueId,
        matrix: ValueId,
        row: ValueId,
        col: ValueId,
        elem: ScalarType,
    },
    MatrixSetElement {
        matrix: ValueId,
        row: ValueId,
        col: ValueId,
        value: ValueId,
        elem: ScalarType,
    },
    /// `m[r, cv]`: one row, gathered columns — produces a vector.
    MatrixSliceRow {
        dest: ValueId,
        matrix: ValueId,
        row: ValueId,
        cols: ValueId,
        elem: ScalarType,
    },
    /// `m[rv, c]`: gathered rows, one column — produces a vector.
    MatrixSliceColumn {
        dest: ValueId,
        matrix: ValueId,
        rows: ValueId,
        col: ValueId,
        elem: ScalarType,
    },
    /// `m[rv, cv]`: produces a submatrix.
    MatrixSliceSub {
        dest: ValueId,
        matrix: ValueId,
        rows: ValueId,
        cols: ValueId,
        elem: ScalarType,
    },
    MatrixWriteRow {
        matrix: ValueId,
        row: ValueId,
        cols: ValueId,
        values: ValueId,
        elem: ScalarType,
    },
    MatrixFillRow {
        matrix: ValueId,
        row: ValueId,
        cols: ValueId,
        value: ValueId,
        elem: ScalarType,
    },
    MatrixWriteColumn {
        matrix: ValueId,
        rows: ValueId,
        col: ValueId,
        values: ValueId,
        elem: ScalarType,
    },
    MatrixFillColumn {
        matrix: ValueId,
        rows: ValueId,
        col: ValueId,
        value: ValueId,
        elem: ScalarType,
    },
    MatrixWriteSub {
        matrix: ValueId,
        rows: ValueId,
        cols: ValueId,
        values: ValueId,
        elem: ScalarType,
    },
    MatrixFillSub {
        matrix: ValueId,
        rows: ValueId,
        cols: ValueId,
        value: ValueId,
        elem: ScalarType,
    },
    /// Broadcast a scalar over every element of an existing matrix.
    MatrixFill { matrix: ValueId, value: ValueId },
    MatrixRows { dest: ValueId, matrix: ValueId },
    MatrixCols { dest: ValueId, matrix: ValueId },

    // -- tuples ------------------------------------------------------------
    /// Materialize zeroed storage for a tuple value of the given registered
    /// shape.
    TupleAlloc { dest: ValueId, type_index: usize },
    TupleGetField {
        dest: ValueId,
        tuple: ValueId,
        type_index: usize,
        field: usize,
        elem: ScalarType,
    },
    TupleSetField {
        tuple: ValueId,
        type_index: usize,
        field: usize,
        value: ValueId,
        elem: ScalarType,
    },

    // -- operators ---------------------------------------------------------
    Binary {
        dest: ValueId,
        op: BinaryOp,
        operands: OperandShapes,
        /// Element type the operation runs over (the operand element type;
        /// for relational/equality variants the result element is boolean).
        elem: ScalarType,
        lhs: ValueId,
        rhs: ValueId,
    },
    Unary {
        dest: ValueId,
        op: UnaryOp,
        shape: crate::types::Shape,
        elem: ScalarType,
        src: ValueId,
    },

    // -- runtime guards ----------------------------------------------------
    /// Abort with [`VECTOR_SIZE_MISMATCH`] unless both operands have the
    /// same runtime length. Always emitted strictly before the element-wise
    /// operation it protects.
    CheckVectorSizes { lhs: ValueId, rhs: ValueId },
    /// Abort with [`MATRIX_SIZE_MISMATCH`] unless both operands have the
    /// same runtime row and column counts.
    CheckMatrixSizes { lhs: ValueId, rhs: ValueId },

    // -- calls and streams -------------------------------------------------
    Call {
        dest: Option<ValueId>,
        method: SymbolId,
        args: Vec<CallArg>,
    },
    StreamState { dest: ValueId },
    Print { value: ValueId, ty: Type },
    ReadVar {
        symbol: SymbolId,
        storage: StorageClass,
        ty: ScalarType,
    },
    ReadTupleField {
        tuple: ValueId,
        type_index: usize,
        field: usize,
        ty: ScalarType,
    },

    // -- control -----------------------------------------------------------
    Label(LabelId),
    Jump(LabelId),
    Branch {
        cond: ValueId,
        then_label: LabelId,
        else_label: LabelId,
    },
    Return { value: Option<ValueId> },
}

/// An instruction sequence plus the id of the value it produces. Fragments
/// nest by concatenation; there is no other composition rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub instrs: Vec<Instr>,
    pub result: ValueId,
}

impl Fragment {
    pub fn new(result: ValueId) -> Self {
        Fragment {
            instrs: Vec::new(),
            result,
        }
    }

    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Append another fragment's instructions, keeping this fragment's
    /// result.
    pub fn absorb(&mut self, other: Fragment) {
        self.instrs.extend(other.instrs);
    }
}

/// A global variable's storage declaration. `literal` carries a
/// statically-known initial value; initializers that need code run in the
/// unit's start-up fragment instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub symbol: SymbolId,
    pub ty: Type,
    pub literal: Option<ConstValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstValue {
    Bool(bool),
    Char(u8),
    Int(i32),
    Real(f64),
}

/// One lowered function or procedure body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    pub symbol: SymbolId,
    pub params: Vec<SymbolId>,
    pub body: Vec<Instr>,
}

/// Layout of one distinct tuple shape, keyed by its stable index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleLayout {
    pub index: usize,
    pub fields: Vec<ScalarType>,
}

/// The lowered output of one compilation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrUnit {
    /// Type declarations for every distinct tuple shape.
    pub tuple_types: Vec<TupleLayout>,
    /// Global storage declarations (zero/default or literal-initialized).
    pub globals: Vec<GlobalDecl>,
    /// Initialization code run before `main` for globals whose
    /// initializers need evaluation.
    pub startup: Vec<Instr>,
    /// One body per declared function/procedure, in source order.
    pub functions: Vec<IrFunction>,
    /// The distinguished entry procedure.
    pub entry: SymbolId,
}
