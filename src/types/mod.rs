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

//! The Weft type lattice
//!
//! Weft has four scalar types, aggregate tuples, and three array-like
//! container shapes (interval, vector, matrix) with implicit widening and
//! broadcasting. The legal operand combinations for each operator class are
//! fixed tables indexed by the narrowest-to-widest type order; container
//! cells recurse on element types and wrap the scalar answer in the wider
//! of the two shapes.


use serde::{Deserialize, Serialize};

/// Element types: everything a vector, matrix, or tuple field may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Boolean,
    Character,
    Integer,
    Real,
}

impl ScalarType {
    pub fn as_type(self) -> Type {
        match self {
            ScalarType::Boolean => Type::Boolean,
            ScalarType::Character => Type::Character,
            ScalarType::Integer => Type::Integer,
            ScalarType::Real => Type::Real,
        }
    }
}

/// One field of a tuple type. Field names are optional: `tuple(integer x,
/// integer)` mixes named and positional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleField {
    pub name: Option<String>,
    pub ty: ScalarType,
}

/// A distinct tuple shape. `index` is the stable key into the program-wide
/// tuple registry and is how the IR addresses field get/set operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TupleType {
    pub index: usize,
    pub fields: Vec<TupleField>,
}

impl TupleType {
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
    }
}

/// The closed set of Weft types.
///
/// `Null` and `Identity` are placeholder types for literal `null`/identity
/// expressions; the front end resolves them to concrete zero/one literals
/// before lowering, so the engine treats them as contract violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Tuple(TupleType),
    Boolean,
    Character,
    Integer,
    Real,
    OutStream,
    InStream,
    Null,
    Identity,
    Interval,
    Vector(ScalarType),
    Matrix(ScalarType),
}

/// Container classification of a type, independent of element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Scalar,
    Interval,
    Vector,
    Matrix,
}

/// Operator classes with distinct result-type tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpClass {
    Arithmetic,
    Logical,
    Relational,
    Equality,
}

/// Position of each type in the result tables, narrowest to widest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum TypeIndex {
    Tuple = 0,
    Boolean = 1,
    Character = 2,
    Integer = 3,
    Real = 4,
    OutStream = 5,
    InStream = 6,
    Null = 7,
    Identity = 8,
    Interval = 9,
    Vector = 10,
    Matrix = 11,
}

const NUM_TYPES: usize = 12;

impl Type {
    pub fn index(&self) -> TypeIndex {
        match self {
            Type::Tuple(_) => TypeIndex::Tuple,
            Type::Boolean => TypeIndex::Boolean,
            Type::Character => TypeIndex::Character,
            Type::Integer => TypeIndex::Integer,
            Type::Real => TypeIndex::Real,
            Type::OutStream => TypeIndex::OutStream,
            Type::InStream => TypeIndex::InStream,
            Type::Null => TypeIndex::Null,
            Type::Identity => TypeIndex::Identity,
            Type::Interval => TypeIndex::Interval,
            Type::Vector(_) => TypeIndex::Vector,
            Type::Matrix(_) => TypeIndex::Matrix,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Type::Interval => Shape::Interval,
            Type::Vector(_) => Shape::Vector,
            Type::Matrix(_) => Shape::Matrix,
            _ => Shape::Scalar,
        }
    }

    /// Element type of a container; an interval's elements are integers.
    /// Scalars are their own element type.
    pub fn element(&self) -> Option<ScalarType> {
        match self {
            Type::Boolean => Some(ScalarType::Boolean),
            Type::Character => Some(ScalarType::Character),
            Type::Integer => Some(ScalarType::Integer),
            Type::Real => Some(ScalarType::Real),
            Type::Interval => Some(ScalarType::Integer),
            Type::Vector(e) | Type::Matrix(e) => Some(*e),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<ScalarType> {
        match self {
            Type::Boolean => Some(ScalarType::Boolean),
            Type::Character => Some(ScalarType::Character),
            Type::Integer => Some(ScalarType::Integer),
            Type::Real => Some(ScalarType::Real),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.as_scalar().is_some()
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Type::Null | Type::Identity)
    }
}

type ResultTable = [[Option<TypeIndex>; NUM_TYPES]; NUM_TYPES];

// Short cell names keep the tables readable as 12x12 grids. Column order
// matches TypeIndex: tup, bln, chr, int, rea, out, ins, nul, idt, ivl, vec, mat.
const __: Option<TypeIndex> = None;
const TUP: Option<TypeIndex> = Some(TypeIndex::Tuple);
const BLN: Option<TypeIndex> = Some(TypeIndex::Boolean);
const CHR: Option<TypeIndex> = Some(TypeIndex::Character);
const INT: Option<TypeIndex> = Some(TypeIndex::Integer);
const REA: Option<TypeIndex> = Some(TypeIndex::Real);
const IVL: Option<TypeIndex> = Some(TypeIndex::Interval);
const VEC: Option<TypeIndex> = Some(TypeIndex::Vector);
const MAT: Option<TypeIndex> = Some(TypeIndex::Matrix);

/// `lhs op rhs` result for `+ - * / % ^`; `None` is illegal.
#[rustfmt::skip]
const ARITHMETIC_RESULT: ResultTable = [
    //           tup  bln  chr  int  rea  out  ins  nul  idt  ivl  vec  mat
    /*tuple*/  [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*bool*/   [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  VEC, MAT],
    /*char*/   [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  VEC, MAT],
    /*int*/    [ __,  __,  __,  INT, REA, __,  __,  INT, INT, IVL, VEC, MAT],
    /*real*/   [ __,  __,  __,  REA, REA, __,  __,  REA, REA, __,  VEC, MAT],
    /*out*/    [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*in*/     [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*null*/   [ __,  __,  __,  INT, REA, __,  __,  __,  __,  __,  __,  __ ],
    /*ident*/  [ __,  __,  __,  INT, REA, __,  __,  __,  __,  __,  __,  __ ],
    /*interval*/[__,  __,  __,  IVL, __,  __,  __,  __,  __,  IVL, VEC, MAT],
    /*vector*/ [ __,  VEC, VEC, VEC, VEC, __,  __,  __,  __,  VEC, VEC, __ ],
    /*matrix*/ [ __,  MAT, MAT, MAT, MAT, __,  __,  __,  __,  MAT, __,  MAT],
];

/// `lhs op rhs` result for `and or xor`.
#[rustfmt::skip]
const LOGICAL_RESULT: ResultTable = [
    //           tup  bln  chr  int  rea  out  ins  nul  idt  ivl  vec  mat
    /*tuple*/  [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*bool*/   [ __,  BLN, __,  __,  __,  __,  __,  BLN, BLN, VEC, VEC, MAT],
    /*char*/   [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*int*/    [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*real*/   [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*out*/    [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*in*/     [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*null*/   [ __,  BLN, __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*ident*/  [ __,  BLN, __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*interval*/[__,  VEC, __,  __,  __,  __,  __,  __,  __,  VEC, VEC, __ ],
    /*vector*/ [ __,  VEC, __,  __,  __,  __,  __,  __,  __,  VEC, VEC, __ ],
    /*matrix*/ [ __,  MAT, __,  __,  __,  __,  __,  __,  __,  __,  __,  MAT],
];

/// `lhs op rhs` result for `< <= > >=`.
#[rustfmt::skip]
const RELATIONAL_RESULT: ResultTable = [
    //           tup  bln  chr  int  rea  out  ins  nul  idt  ivl  vec  mat
    /*tuple*/  [ __,  __,  __,  __,  __,  __,  __,  BLN, BLN, __,  __,  __ ],
    /*bool*/   [ __,  BLN, __,  __,  __,  __,  __,  BLN, BLN, __,  VEC, MAT],
    /*char*/   [ __,  __,  BLN, __,  __,  __,  __,  BLN, BLN, __,  VEC, MAT],
    /*int*/    [ __,  __,  __,  BLN, BLN, __,  __,  BLN, BLN, __,  VEC, MAT],
    /*real*/   [ __,  __,  __,  BLN, BLN, __,  __,  BLN, BLN, __,  VEC, MAT],
    /*out*/    [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*in*/     [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*null*/   [ __,  BLN, BLN, BLN, BLN, __,  __,  __,  __,  __,  __,  __ ],
    /*ident*/  [ __,  BLN, BLN, BLN, BLN, __,  __,  __,  __,  __,  __,  __ ],
    /*interval*/[__,  __,  __,  __,  __,  __,  __,  __,  __,  VEC, VEC, __ ],
    /*vector*/ [ __,  VEC, VEC, VEC, VEC, __,  __,  __,  __,  VEC, VEC, __ ],
    /*matrix*/ [ __,  MAT, MAT, MAT, MAT, __,  __,  __,  __,  __,  __,  MAT],
];

/// `lhs op rhs` result for `=` and `!=`. Container equality is whole-value
/// and always collapses to a single boolean.
#[rustfmt::skip]
const EQUALITY_RESULT: ResultTable = [
    //           tup  bln  chr  int  rea  out  ins  nul  idt  ivl  vec  mat
    /*tuple*/  [ BLN, __,  __,  __,  __,  __,  __,  BLN, BLN, __,  __,  __ ],
    /*bool*/   [ __,  BLN, __,  __,  __,  __,  __,  BLN, BLN, __,  __,  __ ],
    /*char*/   [ __,  __,  BLN, __,  __,  __,  __,  BLN, BLN, __,  __,  __ ],
    /*int*/    [ __,  __,  __,  BLN, BLN, __,  __,  BLN, BLN, __,  __,  __ ],
    /*real*/   [ __,  __,  __,  BLN, BLN, __,  __,  BLN, BLN, __,  __,  __ ],
    /*out*/    [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*in*/     [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*null*/   [ BLN, BLN, BLN, BLN, BLN, __,  __,  __,  __,  __,  __,  __ ],
    /*ident*/  [ BLN, BLN, BLN, BLN, BLN, __,  __,  __,  __,  __,  __,  __ ],
    /*interval*/[__,  __,  __,  __,  __,  __,  __,  __,  __,  BLN, BLN, __ ],
    /*vector*/ [ __,  __,  __,  __,  __,  __,  __,  __,  __,  BLN, BLN, __ ],
    /*matrix*/ [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  BLN],
];

/// Explicit typecast compatibility. Containers never cast; reals narrow
/// only to integers.
#[rustfmt::skip]
const CAST_RESULT: ResultTable = [
    //           tup  bln  chr  int  rea  out  ins  nul  idt  ivl  vec  mat
    /*tuple*/  [ TUP, __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*bool*/   [ __,  BLN, CHR, INT, REA, __,  __,  __,  __,  __,  __,  __ ],
    /*char*/   [ __,  BLN, CHR, INT, REA, __,  __,  __,  __,  __,  __,  __ ],
    /*int*/    [ __,  BLN, CHR, INT, REA, __,  __,  __,  __,  __,  __,  __ ],
    /*real*/   [ __,  __,  __,  INT, REA, __,  __,  __,  __,  __,  __,  __ ],
    /*out*/    [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*in*/     [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*null*/   [ TUP, BLN, CHR, INT, REA, __,  __,  __,  __,  __,  __,  __ ],
    /*ident*/  [ TUP, BLN, CHR, INT, REA, __,  __,  __,  __,  __,  __,  __ ],
    /*interval*/[__,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*vector*/ [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*matrix*/ [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
];

/// `promote[from][to]`: the widening target when `from` must widen toward
/// `to`, or `None` when no widening is needed or possible. `None` does not
/// imply an error.
#[rustfmt::skip]
const PROMOTE_FROM_TO: ResultTable = [
    //           tup  bln  chr  int  rea  out  ins  nul  idt  ivl  vec  mat
    /*tuple*/  [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*bool*/   [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*char*/   [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*int*/    [ __,  __,  __,  __,  REA, __,  __,  __,  __,  __,  __,  __ ],
    /*real*/   [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*out*/    [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*in*/     [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __ ],
    /*null*/   [ TUP, BLN, CHR, INT, REA, __,  __,  __,  __,  IVL, VEC, MAT],
    /*ident*/  [ TUP, BLN, CHR, INT, REA, __,  __,  __,  __,  IVL, VEC, MAT],
    /*interval*/[__,  __,  __,  __,  __,  __,  __,  __,  __,  __,  VEC, __ ],
    /*vector*/ [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  VEC, __ ],
    /*matrix*/ [ __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  __,  MAT],
];

fn table_for(class: OpClass) -> &'static ResultTable {
    match class {
        OpClass::Arithmetic => &ARITHMETIC_RESULT,
        OpClass::Logical => &LOGICAL_RESULT,
        OpClass::Relational => &RELATIONAL_RESULT,
        OpClass::Equality => &EQUALITY_RESULT,
    }
}

fn scalar_from_index(ix: TypeIndex) -> Option<ScalarType> {
    match ix {
        TypeIndex::Boolean => Some(ScalarType::Boolean),
        TypeIndex::Character => Some(ScalarType::Character),
        TypeIndex::Integer => Some(ScalarType::Integer),
        TypeIndex::Real => Some(ScalarType::Real),
        _ => None,
    }
}

/// Result type of `lhs op rhs` for the given operator class, or `None` for
/// an incompatible pair.
///
/// Container cells hold only the result shape; the element type is the
/// table's answer for the two element types, so `vector of integer +
/// real` is a vector of real. Tuple equality is structural and the table
/// already collapses it to boolean.
pub fn result_type(class: OpClass, lhs: &Type, rhs: &Type) -> Option<Type> {
    let table = table_for(class);
    let cell = table[lhs.index() as usize][rhs.index() as usize]?;

    match cell {
        TypeIndex::Interval => Some(Type::Interval),
        TypeIndex::Vector | TypeIndex::Matrix => {
            let le = lhs.element()?.as_type();
            let re = rhs.element()?.as_type();
            let elem_cell = table[le.index() as usize][re.index() as usize]?;
            let elem = scalar_from_index(elem_cell)?;
            if cell == TypeIndex::Vector {
                Some(Type::Vector(elem))
            } else {
                Some(Type::Matrix(elem))
            }
        }
        other => scalar_from_index(other).map(ScalarType::as_type),
    }
}

/// One-directional widening target, or `None` when no widening is needed
/// or possible.
///
/// Containers widen only if their element types widen: `vector of integer`
/// widens toward `vector of real` (and an interval widens to an integer or
/// real vector), but a real container never narrows.
pub fn promote(from: &Type, to: &Type) -> Option<Type> {
    let cell = PROMOTE_FROM_TO[from.index() as usize][to.index() as usize]?;

    match cell {
        TypeIndex::Interval | TypeIndex::Vector | TypeIndex::Matrix => {
            let fe = from.element()?.as_type();
            let te = to.element()?.as_type();
            let elem_cell = PROMOTE_FROM_TO[fe.index() as usize][te.index() as usize]?;
            let elem = scalar_from_index(elem_cell)?;
            match from {
                Type::Interval | Type::Vector(_) => Some(Type::Vector(elem)),
                Type::Matrix(_) => Some(Type::Matrix(elem)),
                _ => None,
            }
        }
        other => scalar_from_index(other).map(ScalarType::as_type),
    }
}

/// Explicit-typecast compatibility.
pub fn cast_allowed(from: &Type, to: &Type) -> bool {
    CAST_RESULT[from.index() as usize][to.index() as usize].is_some()
}

/// Whether `value` may initialize or be assigned to `dest`, given the
/// widening (if any) the front end computed with [`promote`].
pub fn can_assign(value: &Type, dest: &Type, promotion: Option<&Type>) -> bool {
    if let (Type::Tuple(value_tuple), Type::Tuple(dest_tuple)) = (value, dest) {
        if value_tuple.fields.len() != dest_tuple.fields.len() {
            return false;
        }
        return value_tuple
            .fields
            .iter()
            .zip(&dest_tuple.fields)
            .all(|(f, d)| {
                let ft = f.ty.as_type();
                let dt = d.ty.as_type();
                let p = promote(&ft, &dt);
                can_assign(&ft, &dt, p.as_ref())
            });
    }

    let effective = promotion.unwrap_or(value);

    match dest {
        // An interval only accepts an interval.
        Type::Interval => matches!(effective, Type::Interval),
        Type::Vector(dest_elem) => match effective {
            Type::Matrix(_) => false,
            // An integer interval may populate an integer vector directly.
            Type::Interval => *dest_elem == ScalarType::Integer,
            Type::Vector(value_elem) => {
                value_elem == dest_elem
                    || promote(&value_elem.as_type(), &dest_elem.as_type())
                        == Some(dest_elem.as_type())
            }
            // Scalar broadcast fill.
            other => {
                other.as_scalar() == Some(*dest_elem)
                    || promote(other, &dest_elem.as_type()) == Some(dest_elem.as_type())
            }
        },
        Type::Matrix(dest_elem) => match effective {
            Type::Vector(_) | Type::Interval => false,
            Type::Matrix(value_elem) => {
                value_elem == dest_elem
                    || promote(&value_elem.as_type(), &dest_elem.as_type())
                        == Some(dest_elem.as_type())
            }
            other => {
                other.as_scalar() == Some(*dest_elem)
                    || promote(other, &dest_elem.as_type()) == Some(dest_elem.as_type())
            }
        },
        _ => {
            value.index() == dest.index()
                || promotion.map(Type::index) == Some(dest.index())
        }
    }
}
