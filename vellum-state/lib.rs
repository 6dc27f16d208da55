//! The editor state kernel: documents, changes, selections, and the
//! transactional update pipeline.
//!
//! This crate is the headless core of the vellum editor library. Everything an
//! editor view or command layer does is expressed as data over this model:
//!
//! - [`text::Text`] — the persistent document (a rope of lines).
//! - [`change::ChangeSet`] / [`change::ChangeDesc`] — composable, invertible,
//!   mappable descriptions of edits.
//! - [`selection::Selection`] — one or more directional ranges with a main
//!   range.
//! - [`rangeset::RangeSet`] — sparse position-indexed annotations
//!   (decorations, folds, diagnostics) that survive edits by mapping.
//! - [`facet::Facet`], [`field::StateField`], [`extension::Extension`] — the
//!   dependency-tracked configuration system, including runtime
//!   reconfiguration through [`extension::Compartment`]s.
//! - [`transaction::Transaction`] — the atomic unit of state change, produced
//!   by [`state::EditorState::update`] after running change filters,
//!   transaction filters, and extenders.
//! - [`history`] — undo/redo built entirely on the public surface above.
//!
//! # Update flow
//!
//! ```text
//! TransactionSpec*  ──merge──▶ draft ──change filters──▶ draft'
//!        ──transaction filters (bounded loop)──▶ draft''
//!        ──extenders──▶ final changes/effects/annotations
//!        ──apply──▶ new doc, mapped selection, updated fields,
//!                   recomputed facets ──▶ (Transaction, EditorState)
//! ```
//!
//! Every structure is persistent: operations return new values sharing
//! structure with the old ones, so a [`transaction::Transaction`] can hold
//! both its start and end state cheaply.
//!
//! # Positions
//!
//! All positions are `char` indices into the document. Grapheme clustering is
//! deliberately not modelled here; it belongs to higher layers.

use smartstring::{
  LazyCompact,
  SmartString,
};

pub mod change;
pub mod extension;
pub mod facet;
pub mod field;
pub mod history;
pub mod rangeset;
pub mod selection;
pub mod state;
pub mod text;
pub mod transaction;

/// A small-string-optimized string type.
///
/// Strings up to ~23 bytes are stored inline without heap allocation. This is
/// the primary string type for inserted-text fragments.
pub type Tendril = SmartString<LazyCompact>;
