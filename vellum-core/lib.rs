//! Low-level text primitives for the vellum editor kernel.
//!
//! This crate holds the pieces that sit below the document model: line-ending
//! recognition and character classification. It deliberately knows nothing
//! about documents, selections, or state — those live in `vellum-state`.

pub mod chars;
pub mod line_ending;
