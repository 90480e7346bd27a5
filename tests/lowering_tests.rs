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

//! End-to-end lowering tests over whole compilation units.

use weft::ast::*;
use weft::error::LoweringError;
use weft::mir::{
    ConstValue, Instr, IrUnit, OperandShapes, ValueId, MATRIX_SIZE_MISMATCH, VECTOR_SIZE_MISMATCH,
};
use weft::symbols::{ScopeKind, Specifier, SymbolId, SymbolTable};
use weft::types::{ScalarType, Type};
use weft::CompilationUnit;

struct UnitBuilder {
    symbols: SymbolTable,
    items: Vec<Item>,
    next_id: u32,
}

impl UnitBuilder {
    fn new() -> Self {
        UnitBuilder {
            symbols: SymbolTable::new(),
            items: Vec::new(),
            next_id: 1,
        }
    }

    fn id(&mut self) -> ValueId {
        let id = ValueId(self.next_id);
        self.next_id += 1;
        id
    }

    fn expr(&mut self, kind: ExprKind, ty: Type) -> Expr {
        Expr {
            kind,
            eval_type: ty,
            promote_to: None,
            result_id: self.id(),
        }
    }

    fn int(&mut self, value: i32) -> Expr {
        self.expr(ExprKind::IntegerLiteral(value), Type::Integer)
    }

    fn real(&mut self, value: f64) -> Expr {
        self.expr(ExprKind::RealLiteral(value), Type::Real)
    }

    fn ident(&mut self, symbol: SymbolId, ty: Type) -> Expr {
        self.expr(ExprKind::Identifier { symbol }, ty)
    }

    fn binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr, ty: Type) -> Expr {
        self.expr(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    fn int_vector(&mut self, values: &[i32]) -> Expr {
        let elements = values.iter().map(|v| self.int(*v)).collect();
        self.expr(
            ExprKind::VectorLiteral { elements },
            Type::Vector(ScalarType::Integer),
        )
    }

    fn stmt(&mut self, kind: StmtKind) -> Stmt {
        Stmt {
            kind,
            result_id: self.id(),
        }
    }

    fn main_with(&mut self, declared: Vec<SymbolId>, statements: Vec<Stmt>) {
        let main = self.symbols.define_method("main", Some(Type::Integer), vec![]);
        let result_id = self.id();
        self.items.push(Item::Function {
            symbol: main,
            body: Block {
                declared,
                statements,
            },
            result_id,
        });
    }

    fn build(self) -> CompilationUnit {
        CompilationUnit {
            symbols: self.symbols,
            program: Program { items: self.items },
        }
    }
}

fn main_body(ir: &IrUnit) -> &[Instr] {
    &ir.functions
        .iter()
        .find(|f| f.symbol == ir.entry)
        .expect("entry function missing")
        .body
}

fn position(instrs: &[Instr], pred: impl Fn(&Instr) -> bool) -> usize {
    instrs
        .iter()
        .position(pred)
        .expect("expected instruction missing")
}

/// Scenario A: adding two integer vectors of different literal lengths
/// must emit the runtime length guard strictly before the addition.
#[test]
fn test_vector_addition_is_guarded_before_the_add() {
    let mut b = UnitBuilder::new();
    let vec1 = b.symbols.define_variable(
        "vec1",
        Type::Vector(ScalarType::Integer),
        Specifier::Var,
        ScopeKind::Local,
    );
    let vec2 = b.symbols.define_variable(
        "vec2",
        Type::Vector(ScalarType::Integer),
        Specifier::Var,
        ScopeKind::Local,
    );
    let out = b.symbols.define_variable(
        "out",
        Type::Vector(ScalarType::Integer),
        Specifier::Var,
        ScopeKind::Local,
    );

    let init1 = b.int_vector(&[1, 2, 3]);
    let init2 = b.int_vector(&[1, 2, 3, 4]);
    let lhs = b.ident(vec1, Type::Vector(ScalarType::Integer));
    let rhs = b.ident(vec2, Type::Vector(ScalarType::Integer));
    let sum = b.binary(
        BinaryOp::Add,
        lhs,
        rhs,
        Type::Vector(ScalarType::Integer),
    );

    let statements = vec![
        b.stmt(StmtKind::Declaration {
            symbol: vec1,
            init: Some(init1),
        }),
        b.stmt(StmtKind::Declaration {
            symbol: vec2,
            init: Some(init2),
        }),
        b.stmt(StmtKind::Assignment {
            target: AssignTarget::Variable { symbol: out },
            value: sum,
        }),
    ];
    b.main_with(vec![vec1, vec2, out], statements);

    let ir = b.build().lower().expect("unit should lower");
    let body = main_body(&ir);

    let check = position(body, |i| matches!(i, Instr::CheckVectorSizes { .. }));
    let add = position(body, |i| {
        matches!(
            i,
            Instr::Binary {
                op: BinaryOp::Add,
                operands: OperandShapes::VectorVector,
                ..
            }
        )
    });
    assert!(
        check < add,
        "the guard must run before the element-wise addition"
    );

    // The guard compares exactly the two operand values of the addition.
    let (guard_lhs, guard_rhs) = match &body[check] {
        Instr::CheckVectorSizes { lhs, rhs } => (*lhs, *rhs),
        _ => unreachable!(),
    };
    match &body[add] {
        Instr::Binary { lhs, rhs, .. } => {
            assert_eq!(*lhs, guard_lhs);
            assert_eq!(*rhs, guard_rhs);
        }
        _ => unreachable!(),
    }
}

/// Scenario B: `a: integer; b: real; c = a + b` widens the integer side
/// before a real addition.
#[test]
fn test_mixed_scalar_addition_widens_the_integer_side() {
    let mut b = UnitBuilder::new();
    let a = b
        .symbols
        .define_variable("a", Type::Integer, Specifier::Var, ScopeKind::Local);
    let bb = b
        .symbols
        .define_variable("b", Type::Real, Specifier::Var, ScopeKind::Local);
    let c = b
        .symbols
        .define_variable("c", Type::Real, Specifier::Var, ScopeKind::Local);

    let init_a = b.int(3);
    let init_b = b.real(2.5);
    let mut lhs = b.ident(a, Type::Integer);
    lhs.promote_to = Some(Type::Real);
    let rhs = b.ident(bb, Type::Real);
    let sum = b.binary(BinaryOp::Add, lhs, rhs, Type::Real);

    let statements = vec![
        b.stmt(StmtKind::Declaration {
            symbol: a,
            init: Some(init_a),
        }),
        b.stmt(StmtKind::Declaration {
            symbol: bb,
            init: Some(init_b),
        }),
        b.stmt(StmtKind::Assignment {
            target: AssignTarget::Variable { symbol: c },
            value: sum,
        }),
    ];
    b.main_with(vec![a, bb, c], statements);

    let ir = b.build().lower().expect("unit should lower");
    let body = main_body(&ir);

    let widen = position(body, |i| {
        matches!(
            i,
            Instr::CastScalar {
                from: ScalarType::Integer,
                to: ScalarType::Real,
                ..
            }
        )
    });
    let add = position(body, |i| {
        matches!(
            i,
            Instr::Binary {
                op: BinaryOp::Add,
                operands: OperandShapes::ScalarScalar,
                elem: ScalarType::Real,
                ..
            }
        )
    });
    assert!(widen < add);
}

/// Scenario C: `r = 1..5; v = r + 1` coerces the interval to an integer
/// vector before the vector-scalar addition is selected.
#[test]
fn test_interval_scalar_addition_goes_through_vector_coercion() {
    let mut b = UnitBuilder::new();
    let r = b
        .symbols
        .define_variable("r", Type::Interval, Specifier::Var, ScopeKind::Local);
    let v = b.symbols.define_variable(
        "v",
        Type::Vector(ScalarType::Integer),
        Specifier::Var,
        ScopeKind::Local,
    );

    let lower_bound = b.int(1);
    let upper_bound = b.int(5);
    let range = b.expr(
        ExprKind::Range {
            lower: Box::new(lower_bound),
            upper: Box::new(upper_bound),
        },
        Type::Interval,
    );
    let lhs = b.ident(r, Type::Interval);
    let one = b.int(1);
    // The lattice types interval + integer as interval; the engine still
    // runs it on vector machinery.
    let sum = b.binary(BinaryOp::Add, lhs, one, Type::Interval);

    let statements = vec![
        b.stmt(StmtKind::Declaration {
            symbol: r,
            init: Some(range),
        }),
        b.stmt(StmtKind::Assignment {
            target: AssignTarget::Variable { symbol: v },
            value: sum,
        }),
    ];
    b.main_with(vec![r, v], statements);

    let ir = b.build().lower().expect("unit should lower");
    let body = main_body(&ir);

    let coerce = position(body, |i| matches!(i, Instr::IntervalToVector { .. }));
    let add = position(body, |i| {
        matches!(
            i,
            Instr::Binary {
                op: BinaryOp::Add,
                operands: OperandShapes::VectorScalar,
                ..
            }
        )
    });
    assert!(coerce < add);
    // The vector-typed result stores straight into v without a second
    // coercion.
    let coercions = body
        .iter()
        .filter(|i| matches!(i, Instr::IntervalToVector { .. }))
        .count();
    assert_eq!(coercions, 1);
}

/// Scenario D: an assignment through a const destination is a front-end
/// contract violation and must fail loudly, not lower silently.
#[test]
fn test_const_destination_aborts_lowering() {
    let mut b = UnitBuilder::new();
    let c = b
        .symbols
        .define_variable("c", Type::Integer, Specifier::Const, ScopeKind::Local);

    let value = b.int(4);
    let statements = vec![b.stmt(StmtKind::Assignment {
        target: AssignTarget::Variable { symbol: c },
        value,
    })];
    b.main_with(vec![c], statements);

    let err = b.build().lower().unwrap_err();
    assert!(matches!(err, LoweringError::ConstDestination { .. }));
}

/// Scenario E: element-wise matrix multiply carries the matrix guard; the
/// guard's diagnostic is the fixed runtime message.
#[test]
fn test_matrix_multiply_is_guarded() {
    let mut b = UnitBuilder::new();
    let m = b.symbols.define_variable(
        "m",
        Type::Matrix(ScalarType::Real),
        Specifier::Var,
        ScopeKind::Local,
    );
    let n = b.symbols.define_variable(
        "n",
        Type::Matrix(ScalarType::Real),
        Specifier::Var,
        ScopeKind::Local,
    );
    let out = b.symbols.define_variable(
        "out",
        Type::Matrix(ScalarType::Real),
        Specifier::Var,
        ScopeKind::Local,
    );

    let lhs = b.ident(m, Type::Matrix(ScalarType::Real));
    let rhs = b.ident(n, Type::Matrix(ScalarType::Real));
    let product = b.binary(BinaryOp::Mul, lhs, rhs, Type::Matrix(ScalarType::Real));
    let statements = vec![b.stmt(StmtKind::Assignment {
        target: AssignTarget::Variable { symbol: out },
        value: product,
    })];
    b.main_with(vec![m, n, out], statements);

    let ir = b.build().lower().expect("unit should lower");
    let body = main_body(&ir);

    let check = position(body, |i| matches!(i, Instr::CheckMatrixSizes { .. }));
    let mul = position(body, |i| {
        matches!(
            i,
            Instr::Binary {
                op: BinaryOp::Mul,
                operands: OperandShapes::MatrixMatrix,
                ..
            }
        )
    });
    assert!(check < mul);

    // The runtime diagnostics are pinned.
    assert_eq!(MATRIX_SIZE_MISMATCH, "Matrices are not the same size.");
    assert_eq!(VECTOR_SIZE_MISMATCH, "Vectors are not the same size.");
}

#[test]
fn test_globals_split_into_literals_and_startup_code() {
    let mut b = UnitBuilder::new();
    let answer = b
        .symbols
        .define_variable("answer", Type::Integer, Specifier::Const, ScopeKind::Global);
    let derived = b
        .symbols
        .define_variable("derived", Type::Integer, Specifier::Const, ScopeKind::Global);

    let lit = b.int(42);
    let lhs = b.int(40);
    let rhs = b.int(2);
    let computed = b.binary(BinaryOp::Add, lhs, rhs, Type::Integer);
    let lit_id = b.id();
    let computed_id = b.id();
    b.items.push(Item::Global {
        symbol: answer,
        init: Some(lit),
        result_id: lit_id,
    });
    b.items.push(Item::Global {
        symbol: derived,
        init: Some(computed),
        result_id: computed_id,
    });
    b.main_with(vec![], vec![]);

    let ir = b.build().lower().expect("unit should lower");

    // The literal becomes part of the declaration; the computed one needs
    // start-up code.
    let lit_decl = ir.globals.iter().find(|g| g.symbol == answer).unwrap();
    assert_eq!(lit_decl.literal, Some(ConstValue::Int(42)));

    let computed_decl = ir.globals.iter().find(|g| g.symbol == derived).unwrap();
    assert_eq!(computed_decl.literal, None);
    assert!(ir
        .startup
        .iter()
        .any(|i| matches!(i, Instr::StoreVar { symbol, .. } if *symbol == derived)));
    assert!(ir
        .startup
        .iter()
        .any(|i| matches!(i, Instr::Binary { op: BinaryOp::Add, .. })));
}

#[test]
fn test_missing_main_is_an_internal_error() {
    let mut b = UnitBuilder::new();
    let helper = b.symbols.define_method("helper", None, vec![]);
    let result_id = b.id();
    b.items.push(Item::Function {
        symbol: helper,
        body: Block {
            declared: vec![],
            statements: vec![],
        },
        result_id,
    });

    let err = b.build().lower().unwrap_err();
    assert!(matches!(err, LoweringError::MissingEntryPoint));
}

#[test]
fn test_tuple_unpack_reads_fields_in_order() {
    let mut b = UnitBuilder::new();
    let tt = b.symbols.register_tuple(vec![
        weft::types::TupleField {
            name: None,
            ty: ScalarType::Integer,
        },
        weft::types::TupleField {
            name: None,
            ty: ScalarType::Real,
        },
    ]);
    let tuple_ty = Type::Tuple(tt);
    let t = b
        .symbols
        .define_variable("t", tuple_ty.clone(), Specifier::Var, ScopeKind::Local);
    let x = b
        .symbols
        .define_variable("x", Type::Integer, Specifier::Var, ScopeKind::Local);
    let y = b
        .symbols
        .define_variable("y", Type::Real, Specifier::Var, ScopeKind::Local);

    let source = b.ident(t, tuple_ty);
    let statements = vec![b.stmt(StmtKind::TupleUnpack {
        targets: vec![x, y],
        tuple: source,
    })];
    b.main_with(vec![t, x, y], statements);

    let ir = b.build().lower().expect("unit should lower");
    let body = main_body(&ir);

    let fields: Vec<usize> = body
        .iter()
        .filter_map(|i| match i {
            Instr::TupleGetField { field, .. } => Some(*field),
            _ => None,
        })
        .collect();
    assert_eq!(fields, vec![0, 1]);

    let stores: Vec<SymbolId> = body
        .iter()
        .filter_map(|i| match i {
            Instr::StoreVar { symbol, .. } => Some(*symbol),
            _ => None,
        })
        .collect();
    assert_eq!(stores, vec![x, y]);
}

#[test]
fn test_iterator_over_two_domains_nests_left_outermost() {
    let mut b = UnitBuilder::new();
    let outer_domain = b
        .symbols
        .define_variable("rows", Type::Interval, Specifier::Var, ScopeKind::Local);
    let inner_domain = b
        .symbols
        .define_variable("cols", Type::Interval, Specifier::Var, ScopeKind::Local);
    let i = b
        .symbols
        .define_variable("i", Type::Integer, Specifier::Var, ScopeKind::Local);
    let j = b
        .symbols
        .define_variable("j", Type::Integer, Specifier::Var, ScopeKind::Local);

    let d1 = b.ident(outer_domain, Type::Interval);
    let d2 = b.ident(inner_domain, Type::Interval);
    let printed = b.ident(j, Type::Integer);
    let body_stmt = b.stmt(StmtKind::Print { value: printed });
    let statements = vec![b.stmt(StmtKind::Iterator {
        domains: vec![
            GeneratorDomain {
                symbol: i,
                domain: d1,
            },
            GeneratorDomain {
                symbol: j,
                domain: d2,
            },
        ],
        body: Block {
            declared: vec![],
            statements: vec![body_stmt],
        },
    })];
    b.main_with(vec![outer_domain, inner_domain, i, j], statements);

    let ir = b.build().lower().expect("unit should lower");
    let body = main_body(&ir);

    // The outer binding's element store appears before the inner one.
    let store_i = position(body, |ins| {
        matches!(ins, Instr::StoreVar { symbol, .. } if *symbol == i)
    });
    let store_j = position(body, |ins| {
        matches!(ins, Instr::StoreVar { symbol, .. } if *symbol == j)
    });
    assert!(store_i < store_j);

    // Two nested loops mean two counters and two conditional branches.
    let counters = body
        .iter()
        .filter(|ins| matches!(ins, Instr::TempAlloc { .. }))
        .count();
    assert_eq!(counters, 2);
    assert!(
        body.iter()
            .filter(|ins| matches!(ins, Instr::Branch { .. }))
            .count()
            >= 2
    );
}

#[test]
fn test_procedure_gets_an_implicit_return() {
    let mut b = UnitBuilder::new();
    let emit = b.symbols.define_method("emit", None, vec![]);
    let printed = b.int(1);
    let print_stmt = b.stmt(StmtKind::Print { value: printed });
    let result_id = b.id();
    b.items.push(Item::Function {
        symbol: emit,
        body: Block {
            declared: vec![],
            statements: vec![print_stmt],
        },
        result_id,
    });
    b.main_with(vec![], vec![]);

    let ir = b.build().lower().expect("unit should lower");
    let proc = ir.functions.iter().find(|f| f.symbol == emit).unwrap();
    assert!(matches!(
        proc.body.last(),
        Some(Instr::Return { value: None })
    ));
}

#[test]
fn test_tuple_types_are_declared_by_stable_index() {
    let mut b = UnitBuilder::new();
    b.symbols.register_tuple(vec![weft::types::TupleField {
        name: None,
        ty: ScalarType::Integer,
    }]);
    b.symbols.register_tuple(vec![
        weft::types::TupleField {
            name: None,
            ty: ScalarType::Real,
        },
        weft::types::TupleField {
            name: None,
            ty: ScalarType::Boolean,
        },
    ]);
    b.main_with(vec![], vec![]);

    let ir = b.build().lower().expect("unit should lower");
    assert_eq!(ir.tuple_types.len(), 2);
    assert_eq!(ir.tuple_types[0].index, 0);
    assert_eq!(ir.tuple_types[0].fields, vec![ScalarType::Integer]);
    assert_eq!(ir.tuple_types[1].index, 1);
    assert_eq!(
        ir.tuple_types[1].fields,
        vec![ScalarType::Real, ScalarType::Boolean]
    );
}

#[test]
fn test_synthetic_ids_never_collide_with_tree_ids() {
    let mut b = UnitBuilder::new();
    let r = b
        .symbols
        .define_variable("r", Type::Interval, Specifier::Var, ScopeKind::Local);
    let v = b.symbols.define_variable(
        "v",
        Type::Vector(ScalarType::Integer),
        Specifier::Var,
        ScopeKind::Local,
    );

    let lhs = b.ident(r, Type::Interval);
    let one = b.int(1);
    let sum = b.binary(BinaryOp::Add, lhs, one, Type::Interval);
    let statements = vec![b.stmt(StmtKind::Assignment {
        target: AssignTarget::Variable { symbol: v },
        value: sum,
    })];
    b.main_with(vec![r, v], statements);

    let max_tree_id = b.next_id - 1;
    let ir = b.build().lower().expect("unit should lower");
    let body = main_body(&ir);

    // The coercion's destination is a fresh id above every tree id.
    let coerced = body
        .iter()
        .find_map(|i| match i {
            Instr::IntervalToVector { dest, .. } => Some(*dest),
            _ => None,
        })
        .expect("coercion missing");
    assert!(coerced.0 > max_tree_id);
}
