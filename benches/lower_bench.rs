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

//! Lowering throughput over a synthetic arithmetic-heavy unit.

use criterion::{criterion_group, criterion_main, Criterion};

use weft::ast::{AssignTarget, BinaryOp, Block, Expr, ExprKind, Item, Program, Stmt, StmtKind};
use weft::mir::ValueId;
use weft::symbols::{ScopeKind, Specifier, SymbolTable};
use weft::types::{ScalarType, Type};
use weft::CompilationUnit;

/// A main() with `n` statements of mixed vector/scalar arithmetic.
fn synthetic_unit(n: u32) -> CompilationUnit {
    let mut symbols = SymbolTable::new();
    let v = symbols.define_variable(
        "v",
        Type::Vector(ScalarType::Integer),
        Specifier::Var,
        ScopeKind::Local,
    );
    let w = symbols.define_variable(
        "w",
        Type::Vector(ScalarType::Integer),
        Specifier::Var,
        ScopeKind::Local,
    );
    let main = symbols.define_method("main", Some(Type::Integer), vec![]);

    let mut next = 0u32;
    let mut id = || {
        next += 1;
        ValueId(next)
    };

    let vec_ty = Type::Vector(ScalarType::Integer);
    let mut statements = Vec::new();
    for _ in 0..n {
        let sum = Expr {
            kind: ExprKind::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr {
                    kind: ExprKind::Identifier { symbol: v },
                    eval_type: vec_ty.clone(),
                    promote_to: None,
                    result_id: id(),
                }),
                rhs: Box::new(Expr {
                    kind: ExprKind::Identifier { symbol: w },
                    eval_type: vec_ty.clone(),
                    promote_to: None,
                    result_id: id(),
                }),
            },
            eval_type: vec_ty.clone(),
            promote_to: None,
            result_id: id(),
        };
        statements.push(Stmt {
            kind: StmtKind::Assignment {
                target: AssignTarget::Variable { symbol: w },
                value: sum,
            },
            result_id: id(),
        });
    }

    let program = Program {
        items: vec![Item::Function {
            symbol: main,
            body: Block {
                declared: vec![v, w],
                statements,
            },
            result_id: id(),
        }],
    };

    CompilationUnit { symbols, program }
}

fn bench_lowering(c: &mut Criterion) {
    let unit = synthetic_unit(500);
    c.bench_function("lower_500_vector_adds", |b| {
        b.iter(|| unit.lower().expect("benchmark unit should lower"))
    });
}

criterion_group!(benches, bench_lowering);
criterion_main!(benches);
