//! Incremental syntax support for the vellum editor kernel.
//!
//! This crate provides the immutable syntax tree ([`tree::Tree`],
//! [`tree::TreeBuffer`], [`tree::NodeSet`]), its two navigation forms
//! ([`node::SyntaxNode`] handles and the [`node::TreeCursor`] zipper), the
//! parser contract ([`parse::Parser`], [`parse::PartialParse`],
//! [`parse::TreeFragment`]), and the coordinator that drives an incremental
//! parser over an editor state ([`language::syntax`],
//! [`language::syntax_tree`], [`language::ensure_syntax_tree`]).
//!
//! The kernel does not ship a grammar: a [`parse::Parser`] implementation is
//! supplied by a language package. What this crate owns is the contract —
//! resumable parses with budgets and cancellation, fragment reuse across
//! edits, and the facet that exposes the current tree to everything else.

pub mod language;
pub mod node;
pub mod parse;
pub mod tree;
