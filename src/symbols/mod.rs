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

//! Symbols and scopes
//!
//! The front end builds one [`SymbolTable`] per compilation unit and binds
//! every identifier in the tree to a symbol id before lowering starts. The
//! lowering engine only reads this table: to pick global vs. local storage,
//! to decide by-reference vs. by-value argument passing, and to walk tuple
//! field layouts.

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

use crate::types::{TupleType, Type};

/// Unique id of one symbol within a compilation unit. Ids are dense: the
/// symbol with id `n` sits at position `n` in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(pub u32);

/// Mutability specifier of a variable. A symbol's specifier is fixed at
/// definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Specifier {
    Const,
    Var,
}

/// The lexical scope a symbol was defined in. Tuple scope exists only for
/// member lookup and never participates in the ordinary resolve chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeKind {
    Global,
    Local,
    Method,
    Tuple,
}

/// Where a variable's storage lives in the emitted IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageClass {
    Global,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: SymbolId,
    pub name: String,
    pub ty: Type,
    pub specifier: Specifier,
    pub scope: ScopeKind,
}

impl Variable {
    pub fn storage_class(&self) -> StorageClass {
        match self.scope {
            ScopeKind::Global => StorageClass::Global,
            _ => StorageClass::Local,
        }
    }

    pub fn is_const(&self) -> bool {
        self.specifier == Specifier::Const
    }
}

/// A function or procedure. A `None` return type is a procedure with no
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub id: SymbolId,
    pub name: String,
    pub return_type: Option<Type>,
    pub params: Vec<Variable>,
    pub scope: ScopeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Symbol {
    Variable(Variable),
    Method(Method),
}

impl Symbol {
    pub fn id(&self) -> SymbolId {
        match self {
            Symbol::Variable(v) => v.id,
            Symbol::Method(m) => m.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Symbol::Variable(v) => &v.name,
            Symbol::Method(m) => &m.name,
        }
    }
}

/// Built-in methods the lowering engine recognizes by name and lowers to
/// dedicated instructions instead of calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Length,
    Rows,
    Columns,
    Reverse,
    StreamState,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        match name {
            "length" => Some(Builtin::Length),
            "rows" => Some(Builtin::Rows),
            "columns" => Some(Builtin::Columns),
            "reverse" => Some(Builtin::Reverse),
            "stream_state" => Some(Builtin::StreamState),
            _ => None,
        }
    }
}

/// The per-unit symbol table: the dense symbol list, the ordered top-level
/// symbols, and the index-ordered tuple-type registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    globals: Vec<SymbolId>,
    tuples: Vec<TupleType>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> SymbolId {
        SymbolId(self.symbols.len() as u32)
    }

    /// Define a variable and return its id. Top-level (global-scope)
    /// definitions are also recorded in the ordered globals list.
    pub fn define_variable(
        &mut self,
        name: impl Into<String>,
        ty: Type,
        specifier: Specifier,
        scope: ScopeKind,
    ) -> SymbolId {
        let id = self.next_id();
        self.symbols.push(Symbol::Variable(Variable {
            id,
            name: name.into(),
            ty,
            specifier,
            scope,
        }));
        if scope == ScopeKind::Global {
            self.globals.push(id);
        }
        id
    }

    /// Define a method and its parameter symbols; returns the method id.
    /// Parameter symbols live in the method's own scope and are defined
    /// first, so the dense-id invariant holds without renumbering.
    pub fn define_method(
        &mut self,
        name: impl Into<String>,
        return_type: Option<Type>,
        params: Vec<(String, Type)>,
    ) -> SymbolId {
        let params: Vec<Variable> = params
            .into_iter()
            .map(|(pname, pty)| {
                let pid = self.next_id();
                let var = Variable {
                    id: pid,
                    name: pname,
                    ty: pty,
                    specifier: Specifier::Const,
                    scope: ScopeKind::Method,
                };
                self.symbols.push(Symbol::Variable(var.clone()));
                var
            })
            .collect();
        let id = self.next_id();
        self.symbols.push(Symbol::Method(Method {
            id,
            name: name.into(),
            return_type,
            params,
            scope: ScopeKind::Global,
        }));
        self.globals.push(id);
        id
    }

    /// Register one distinct tuple shape and return its stable index.
    pub fn register_tuple(&mut self, fields: Vec<crate::types::TupleField>) -> TupleType {
        let index = self.tuples.len();
        let tuple = TupleType { index, fields };
        self.tuples.push(tuple.clone());
        tuple
    }

    pub fn lookup(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.0 as usize)
    }

    pub fn variable(&self, id: SymbolId) -> Option<&Variable> {
        match self.lookup(id) {
            Some(Symbol::Variable(v)) => Some(v),
            _ => None,
        }
    }

    pub fn method(&self, id: SymbolId) -> Option<&Method> {
        match self.lookup(id) {
            Some(Symbol::Method(m)) => Some(m),
            _ => None,
        }
    }

    /// Ordered top-level symbols.
    pub fn globals(&self) -> impl Iterator<Item = &Symbol> {
        self.globals.iter().filter_map(|id| self.lookup(*id))
    }

    /// Index-ordered tuple-type registry.
    pub fn tuples(&self) -> &[TupleType] {
        &self.tuples
    }

    pub fn tuple(&self, index: usize) -> Option<&TupleType> {
        self.tuples.get(index)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
