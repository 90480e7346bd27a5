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

//! The Weft compiler middle end
//!
//! Takes the fully typed AST of a Weft compilation unit and lowers it to a
//! linear, SSA-style IR for the downstream code generator. The front end
//! (lexing, parsing, semantic analysis) and the machine-code back end are
//! external to this crate.

pub mod ast;
pub mod error;
pub mod mir;
pub mod symbols;
pub mod types;

use serde::{Deserialize, Serialize};

/// One serialized compilation unit as handed over by the front end: the
/// symbol table plus the typed program tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub symbols: symbols::SymbolTable,
    pub program: ast::Program,
}

impl CompilationUnit {
    /// Lower this unit with an independent context. Units never share
    /// lowering state, so callers may process many units concurrently.
    pub fn lower(&self) -> Result<mir::IrUnit, error::LoweringError> {
        mir::lowering::lower_unit(&self.symbols, &self.program)
    }
}
