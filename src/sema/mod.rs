//! Semantic analysis (§4.1-§4.3): turns a `types::ast::TranslationUnit`
//! into a fully decorated AST plus a populated `SymbolTable`, resolving
//! overloads, inserting conversions, computing layouts and vtables, and
//! synthesizing lifetime operations. Laid out the way `mmcc` splits its
//! `nameck`/`typeck` passes into separate modules under one umbrella.

pub mod lifetime;
pub mod analyzer;
pub mod decorate;
