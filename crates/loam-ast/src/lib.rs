//! Typed AST shared between loam compiler passes.
//!
//! This crate provides:
//! - The `Node` sum type covering every construct the mid-end passes see
//! - Symbol and type tables (`SymbolTable`, `SymId`, `Ty`)
//! - Read-only tree queries used by the lowering passes
//! - A debug printer for test failures and trace output

pub mod node;
pub mod pretty;
pub mod query;
pub mod sym;

pub use node::{
    BinOp, CaseArm, ExceptBranch, IfBranch, Node, StateCase, StateLabel, UnOp, VarDef, new_label,
    unset_label, UNSET_LABEL,
};
pub use sym::{ExcClass, SymId, Symbol, SymbolTable, Ty};
