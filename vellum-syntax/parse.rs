//! The incremental-parser contract.
//!
//! A [`Parser`] turns a document into a [`Tree`], resumably: `create_parse`
//! returns a [`PartialParse`] whose `advance` does a bounded chunk of work
//! and yields the finished tree once there is one. The caller owns the
//! loop — the coordinator drives `advance` under a clock budget and may
//! cancel by calling `stop_at`, which is observed on the next `advance` and
//! produces a tree covering only the parsed prefix.
//!
//! [`TreeFragment`]s carry reusable pieces of a previous parse across edits:
//! [`TreeFragment::apply_changes`] maps a fragment list through a change
//! description, dropping coverage around the edited regions (widened by the
//! parser's [`Parser::safe_margin`], since a parser may have read context
//! beyond a node's own range), and [`TreeFragment::add_tree`] records a
//! finished parse for the next round.

use std::sync::Arc;

use thiserror::Error;
use vellum_state::{
  change::ChangeDesc,
  text::Text,
};

use crate::tree::Tree;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
  #[error("parse failed: {0}")]
  Failed(String),
}

/// A region of the document a parse is restricted to. Used for nested or
/// overlapping languages and for skipping non-visible content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseRange {
  pub from: usize,
  pub to:   usize,
}

/// An in-progress, resumable parse.
pub trait PartialParse: Send {
  /// Do a unit of work. Returns the finished tree once parsing (or the
  /// stopped prefix) is complete.
  fn advance(&mut self) -> Result<Option<Arc<Tree>>, ParseError>;

  /// How far the parse has gotten.
  fn parsed_pos(&self) -> usize;

  /// Ask the parse to stop at the given position and finish early with a
  /// tree for the prefix. Observed on the next `advance`.
  fn stop_at(&mut self, pos: usize);

  /// Where the parse was asked to stop, if it was.
  fn stopped_at(&self) -> Option<usize>;
}

/// Something that can parse documents for the kernel.
pub trait Parser: Send + Sync {
  /// Start a parse over `input`, reusing `fragments` of a previous tree,
  /// restricted to `ranges` (an empty list means the whole document).
  fn create_parse(
    &self,
    input: Text,
    fragments: Vec<TreeFragment>,
    ranges: Vec<ParseRange>,
  ) -> Box<dyn PartialParse>;

  /// How far beyond a fragment's bounds this parser may have read context:
  /// `(safe_from, safe_to)`. Edits within that distance invalidate the
  /// fragment.
  fn safe_margin(&self) -> (usize, usize) {
    (0, 0)
  }

  /// Parse to completion, without budget.
  fn parse(&self, input: Text) -> Result<Arc<Tree>, ParseError> {
    let mut parse = self.create_parse(input, Vec::new(), Vec::new());
    loop {
      if let Some(tree) = parse.advance()? {
        return Ok(tree);
      }
    }
  }
}

/// A reusable piece of a previous parse, rebased across edits.
///
/// The fragment covers `[from, to)` of the current document; the
/// corresponding content in `tree` sits at `[from + offset, to + offset)`.
#[derive(Clone)]
pub struct TreeFragment {
  pub from:       usize,
  pub to:         usize,
  pub tree:       Arc<Tree>,
  /// Distance from current-document positions to tree positions.
  pub offset:     i64,
  /// Whether the fragment's start abuts an edited region, so context at the
  /// start is unreliable.
  pub open_start: bool,
  pub open_end:   bool,
}

impl std::fmt::Debug for TreeFragment {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "TreeFragment({}..{} offset {}{}{})",
      self.from,
      self.to,
      self.offset,
      if self.open_start { " open-start" } else { "" },
      if self.open_end { " open-end" } else { "" },
    )
  }
}

impl TreeFragment {
  /// The fragment list for a finished parse: one fragment covering the
  /// tree. Previous fragments beyond the tree's length survive when the
  /// parse stopped early.
  pub fn add_tree(tree: Arc<Tree>, previous: &[TreeFragment]) -> Vec<TreeFragment> {
    let mut result = vec![TreeFragment {
      from:       0,
      to:         tree.len(),
      tree:       tree.clone(),
      offset:     0,
      open_start: false,
      open_end:   false,
    }];
    for fragment in previous {
      if fragment.to > tree.len() {
        result.push(TreeFragment {
          from: fragment.from.max(tree.len()),
          open_start: true,
          ..fragment.clone()
        });
      }
    }
    result
  }

  /// Rebase a fragment list through an edit. Coverage within `safe_from`
  /// before or `safe_to` after a changed range is dropped; the rest is
  /// shifted to the new document's coordinates.
  pub fn apply_changes(
    fragments: &[TreeFragment],
    changes: &ChangeDesc,
    safe_from: usize,
    safe_to: usize,
  ) -> Vec<TreeFragment> {
    if changes.is_empty() {
      return fragments.to_vec();
    }

    // Changed ranges in old coordinates, widened by the safety margins.
    // `shift` is the old-to-new position delta accumulated through each
    // edit, which `to_a - to_b` already is.
    let mut edits: Vec<(usize, usize, i64)> = Vec::new();
    for range in changes.iter_changed_ranges() {
      let from = range.from_a.saturating_sub(safe_from);
      let to = range.to_a + safe_to;
      let shift = range.to_a as i64 - range.to_b as i64;
      match edits.last_mut() {
        Some((_, last_to, last_shift)) if from <= *last_to => {
          *last_to = (*last_to).max(to);
          *last_shift = shift;
        },
        _ => edits.push((from, to, shift)),
      }
    }

    let mut result = Vec::new();
    let mut fragment_index = 0;
    // `off` is the old-to-new position shift accumulated so far.
    let mut off: i64 = 0;
    let mut pos = 0;
    for edit_index in 0..=edits.len() {
      let next = edits.get(edit_index);
      // The old-coordinate gap [pos, gap_to) is untouched by edits.
      let gap_to = next.map(|&(from, _, _)| from).unwrap_or(usize::MAX);
      while fragment_index < fragments.len() {
        let fragment = &fragments[fragment_index];
        if fragment.from >= gap_to {
          break;
        }
        let cut_from = fragment.from.max(pos);
        let cut_to = fragment.to.min(gap_to);
        if cut_from < cut_to {
          let new_from = (cut_from as i64 - off).max(0) as usize;
          let new_to = (cut_to as i64 - off).max(0) as usize;
          result.push(TreeFragment {
            from:       new_from,
            to:         new_to,
            tree:       fragment.tree.clone(),
            offset:     fragment.offset + off,
            open_start: fragment.open_start || cut_from > fragment.from || edit_index > 0,
            open_end:   fragment.open_end || cut_to < fragment.to || next.is_some(),
          });
        }
        if fragment.to > gap_to {
          break;
        }
        fragment_index += 1;
      }
      let Some(&(_, edit_to, shift)) = next else {
        break;
      };
      pos = edit_to;
      off = shift;
    }
    result
  }
}

#[cfg(test)]
mod test {
  use vellum_state::change::ChangeSet;

  use super::*;
  use crate::tree::{
    NodeSet,
    NodeType,
  };

  fn dummy_tree(len: usize) -> Arc<Tree> {
    let set = NodeSet::new(vec![NodeType::build("Doc", 0).top().finish()]).unwrap();
    Tree::new(set.get(0).unwrap().clone(), Vec::new(), Vec::new(), len)
  }

  fn fragment(from: usize, to: usize, len: usize) -> TreeFragment {
    TreeFragment {
      from,
      to,
      tree: dummy_tree(len),
      offset: 0,
      open_start: false,
      open_end: false,
    }
  }

  #[test]
  fn add_tree_covers_whole_parse() {
    let fragments = TreeFragment::add_tree(dummy_tree(10), &[]);
    assert_eq!(fragments.len(), 1);
    assert_eq!((fragments[0].from, fragments[0].to), (0, 10));
    assert!(!fragments[0].open_end);
  }

  #[test]
  fn add_tree_keeps_fragments_beyond_partial_parse() {
    let previous = vec![fragment(0, 30, 30)];
    let fragments = TreeFragment::add_tree(dummy_tree(10), &previous);
    assert_eq!(fragments.len(), 2);
    assert_eq!((fragments[1].from, fragments[1].to), (10, 30));
    assert!(fragments[1].open_start);
  }

  #[test]
  fn apply_changes_drops_touched_coverage() {
    let fragments = vec![fragment(0, 100, 100)];
    // Replace [40, 50) with 5 characters.
    let changes = ChangeSet::of(vec![(40, 50, Some("12345".into()))], 100).unwrap();
    let mapped = TreeFragment::apply_changes(&fragments, &changes.desc(), 0, 0);

    assert_eq!(mapped.len(), 2);
    assert_eq!((mapped[0].from, mapped[0].to), (0, 40));
    assert!(!mapped[0].open_start);
    assert!(mapped[0].open_end);
    // The tail shifts left by the 5 removed characters.
    assert_eq!((mapped[1].from, mapped[1].to), (45, 95));
    assert_eq!(mapped[1].offset, 5);
    assert!(mapped[1].open_start);
  }

  #[test]
  fn safety_margins_widen_invalidation() {
    let fragments = vec![fragment(0, 100, 100)];
    let changes = ChangeSet::of(vec![(40, 40, Some("x".into()))], 100).unwrap();
    let mapped = TreeFragment::apply_changes(&fragments, &changes.desc(), 10, 20);

    assert_eq!(mapped.len(), 2);
    assert_eq!((mapped[0].from, mapped[0].to), (0, 30));
    // [30, 60) is invalidated; the survivor starts past it, shifted right
    // by the insertion.
    assert_eq!((mapped[1].from, mapped[1].to), (61, 101));
    assert_eq!(mapped[1].offset, -1);
  }

  #[test]
  fn unrelated_edits_keep_fragments_whole() {
    let fragments = vec![fragment(0, 10, 10), fragment(20, 30, 30)];
    let changes = ChangeSet::of(vec![(12, 15, None)], 40).unwrap();
    let mapped = TreeFragment::apply_changes(&fragments, &changes.desc(), 0, 0);

    assert_eq!(mapped.len(), 2);
    assert_eq!((mapped[0].from, mapped[0].to), (0, 10));
    assert!(!mapped[0].open_start);
    assert_eq!((mapped[1].from, mapped[1].to), (17, 27));
    assert_eq!(mapped[1].offset, 3);
  }
}
