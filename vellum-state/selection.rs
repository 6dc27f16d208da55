//! Cursor positions and multi-range selections.
//!
//! A [`SelectionRange`] has two positions: `anchor` and `head`. The `head` is
//! where the cursor visually sits, the `anchor` is the other end of the
//! selection. When `anchor == head` the range is a cursor.
//!
//! ```text
//! anchor=2, head=7: "he[llo w]orld"  (forward selection)
//! anchor=7, head=2: "he]llo w[orld"  (backward selection)
//! anchor=5, head=5: "hello|world"    (cursor)
//! ```
//!
//! A [`Selection`] is an ordered, non-empty list of ranges plus a *main*
//! index. Selections are kept normalized:
//!
//! - ranges sorted by [`SelectionRange::from`]
//! - overlapping ranges merged, and cursors touching a range folded into it
//! - a merged range takes the direction of the last range merged into it
//! - the main index follows the range that contained the original main
//!
//! # Mapping
//!
//! [`Selection::map`] adjusts every range through a [`ChangeDesc`] in one
//! pass. Range ends use sticky associations so cursors keep their offset
//! through same-size replacements. Empty ranges use their stored association
//! when they have one.

use serde::{
  Deserialize,
  Serialize,
};
use smallvec::{
  SmallVec,
  smallvec,
};
use thiserror::Error;

use crate::change::{
  Assoc,
  ChangeDesc,
  ChangeError,
};

pub type Result<T> = std::result::Result<T, SelectionError>;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SelectionError {
  #[error("selection must contain at least one range")]
  EmptySelection,
  #[error("main index {index} out of bounds for selection of length {len}")]
  MainIndexOutOfBounds { index: usize, len: usize },
  #[error("range index {index} out of bounds for selection of length {len}")]
  RangeIndexOutOfBounds { index: usize, len: usize },
  #[error("selection range {from}..{to} exceeds document length {len}")]
  RangeOutOfBounds {
    from: usize,
    to:   usize,
    len:  usize,
  },
  #[error("malformed selection json: {0}")]
  MalformedJson(String),
  #[error(transparent)]
  Change(#[from] ChangeError),
}

/// Which way a range points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Forward,
  Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionRange {
  pub anchor:      usize,
  pub head:        usize,
  /// Which side an empty range associates with when content is inserted at
  /// its position.
  pub assoc:       Option<Assoc>,
  /// Column the cursor aims for during vertical movement.
  pub goal_column: Option<u32>,
  /// Bidirectional text level of the head, when known.
  pub bidi_level:  Option<u8>,
}

impl SelectionRange {
  pub fn new(anchor: usize, head: usize) -> Self {
    Self {
      anchor,
      head,
      assoc: None,
      goal_column: None,
      bidi_level: None,
    }
  }

  #[inline]
  pub fn cursor(pos: usize) -> Self {
    Self::new(pos, pos)
  }

  pub fn cursor_with_assoc(pos: usize, assoc: Assoc) -> Self {
    Self {
      assoc: Some(assoc),
      ..Self::new(pos, pos)
    }
  }

  pub fn with_goal_column(self, goal_column: u32) -> Self {
    Self {
      goal_column: Some(goal_column),
      ..self
    }
  }

  /// Start of the range.
  #[inline]
  #[must_use]
  pub fn from(&self) -> usize {
    std::cmp::min(self.anchor, self.head)
  }

  /// End of the range.
  #[inline]
  #[must_use]
  pub fn to(&self) -> usize {
    std::cmp::max(self.anchor, self.head)
  }

  #[inline]
  #[must_use]
  pub fn len(&self) -> usize {
    self.to() - self.from()
  }

  /// When the head and anchor are at the same position, there is no
  /// selected span.
  #[inline]
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.anchor == self.head
  }

  #[inline]
  pub fn contains(&self, pos: usize) -> bool {
    self.from() <= pos && pos < self.to()
  }

  #[inline]
  #[must_use]
  pub fn direction(&self) -> Direction {
    if self.head < self.anchor {
      Direction::Backward
    } else {
      Direction::Forward
    }
  }

  /// Flips the direction of the range.
  #[inline]
  #[must_use]
  pub fn flip(&self) -> Self {
    Self {
      anchor: self.head,
      head: self.anchor,
      ..*self
    }
  }

  #[inline]
  #[must_use]
  pub fn with_direction(self, direction: Direction) -> Self {
    if self.direction() == direction {
      self
    } else {
      self.flip()
    }
  }

  /// Check if two ranges overlap. Ranges starting at the same position
  /// always count as overlapping, even when empty.
  pub fn overlaps(&self, other: &Self) -> bool {
    self.from() == other.from() || (self.to() > other.from() && other.to() > self.from())
  }

  /// Extend the range to cover at least `from` to `to`, preserving
  /// direction.
  #[must_use]
  pub fn extend(&self, from: usize, to: usize) -> Self {
    debug_assert!(from <= to);

    if self.anchor <= self.head {
      Self {
        anchor: self.anchor.min(from),
        head: self.head.max(to),
        ..Self::default()
      }
    } else {
      Self {
        anchor: self.anchor.max(to),
        head: self.head.min(from),
        ..Self::default()
      }
    }
  }

  /// Map the range through a set of changes.
  ///
  /// For one or two ranges this is fine; for many ranges prefer
  /// [`Selection::map`], which maps every endpoint in a single pass.
  pub fn map(mut self, changes: &ChangeDesc) -> Result<Self> {
    if changes.is_empty() {
      return Ok(self);
    }
    changes.update_positions(position_assocs(&mut self))?;
    self.goal_column = None;
    Ok(self)
  }
}

/// The endpoints of a range paired with the association to map them by:
/// sticky assocs keep offsets through same-size replacements, and empty
/// ranges honor their stored association.
fn position_assocs<'a>(
  range: &'a mut SelectionRange,
) -> impl Iterator<Item = (&'a mut usize, Assoc)> + 'a {
  use std::cmp::Ordering;

  let pairs: [(&mut usize, Assoc); 2] = match range.anchor.cmp(&range.head) {
    Ordering::Equal => {
      let assoc = match range.assoc {
        Some(Assoc::Before | Assoc::BeforeWord | Assoc::BeforeSticky) => Assoc::BeforeSticky,
        _ => Assoc::AfterSticky,
      };
      [(&mut range.anchor, assoc), (&mut range.head, assoc)]
    },
    Ordering::Less => {
      [
        (&mut range.anchor, Assoc::AfterSticky),
        (&mut range.head, Assoc::BeforeSticky),
      ]
    },
    Ordering::Greater => {
      [
        (&mut range.head, Assoc::AfterSticky),
        (&mut range.anchor, Assoc::BeforeSticky),
      ]
    },
  };
  pairs.into_iter()
}

#[derive(Serialize, Deserialize)]
struct RangeJson {
  anchor: usize,
  head:   usize,
}

#[derive(Serialize, Deserialize)]
struct SelectionJson {
  ranges: Vec<RangeJson>,
  main:   usize,
}

/// One or more ranges with a designated main range.
///
/// INVARIANT: never empty, always normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
  ranges:     SmallVec<[SelectionRange; 1]>,
  main_index: usize,
}

impl Selection {
  /// Build a normalized selection. The main index must point into the
  /// range list; it follows its range through normalization.
  pub fn create(ranges: SmallVec<[SelectionRange; 1]>, main_index: usize) -> Result<Self> {
    if ranges.is_empty() {
      return Err(SelectionError::EmptySelection);
    }
    if main_index >= ranges.len() {
      return Err(SelectionError::MainIndexOutOfBounds {
        index: main_index,
        len:   ranges.len(),
      });
    }
    Ok(Self::normalized(ranges, main_index))
  }

  /// A selection holding a single range.
  #[must_use]
  pub fn single(anchor: usize, head: usize) -> Self {
    Self {
      ranges:     smallvec![SelectionRange::new(anchor, head)],
      main_index: 0,
    }
  }

  /// A selection holding a single cursor.
  #[must_use]
  pub fn cursor(pos: usize) -> Self {
    Self::single(pos, pos)
  }

  pub fn ranges(&self) -> &[SelectionRange] {
    &self.ranges
  }

  pub fn iter(&self) -> impl Iterator<Item = &SelectionRange> {
    self.ranges.iter()
  }

  #[inline]
  pub fn main_index(&self) -> usize {
    self.main_index
  }

  #[inline]
  pub fn main(&self) -> SelectionRange {
    self.ranges[self.main_index]
  }

  pub fn len(&self) -> usize {
    self.ranges.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ranges.iter().all(SelectionRange::is_empty)
  }

  /// Drop everything but the main range.
  #[must_use]
  pub fn as_single(&self) -> Self {
    Self {
      ranges:     smallvec![self.main()],
      main_index: 0,
    }
  }

  /// Add a range, optionally making it the main one.
  pub fn add_range(&self, range: SelectionRange, main: bool) -> Self {
    let mut ranges = self.ranges.clone();
    ranges.push(range);
    let main_index = if main {
      ranges.len() - 1
    } else {
      self.main_index
    };
    Self::normalized(ranges, main_index)
  }

  /// Replace the range at the given index.
  pub fn replace_range(&self, index: usize, range: SelectionRange) -> Result<Self> {
    if index >= self.ranges.len() {
      return Err(SelectionError::RangeIndexOutOfBounds {
        index,
        len: self.ranges.len(),
      });
    }
    let mut ranges = self.ranges.clone();
    ranges[index] = range;
    Ok(Self::normalized(ranges, self.main_index))
  }

  /// Check every range against a document length.
  pub fn check(&self, doc_len: usize) -> Result<()> {
    for range in &self.ranges {
      if range.to() > doc_len {
        return Err(SelectionError::RangeOutOfBounds {
          from: range.from(),
          to:   range.to(),
          len:  doc_len,
        });
      }
    }
    Ok(())
  }

  /// Map the selection through a set of changes, renormalizing afterwards.
  pub fn map(&self, changes: &ChangeDesc) -> Result<Self> {
    if changes.is_empty() {
      return Ok(self.clone());
    }

    let mut ranges = self.ranges.clone();
    // Endpoints are visited in range order, which keeps the position list
    // mostly sorted for the one-pass mapping.
    changes.update_positions(ranges.iter_mut().flat_map(|range| position_assocs(range)))?;
    for range in &mut ranges {
      range.goal_column = None;
    }
    Ok(Self::normalized(ranges, self.main_index))
  }

  /// The JSON shape used by state snapshots:
  /// `{"ranges": [{"anchor": n, "head": n}], "main": n}`.
  pub fn to_json(&self) -> serde_json::Value {
    let dto = SelectionJson {
      ranges: self
        .ranges
        .iter()
        .map(|range| RangeJson {
          anchor: range.anchor,
          head:   range.head,
        })
        .collect(),
      main:   self.main_index,
    };
    serde_json::to_value(dto).expect("selection snapshots are plain data")
  }

  pub fn from_json(value: &serde_json::Value) -> Result<Self> {
    let dto: SelectionJson = serde_json::from_value(value.clone())
      .map_err(|err| SelectionError::MalformedJson(err.to_string()))?;
    let ranges: SmallVec<[SelectionRange; 1]> = dto
      .ranges
      .into_iter()
      .map(|range| SelectionRange::new(range.anchor, range.head))
      .collect();
    Self::create(ranges, dto.main)
  }

  /// Normalize: sort by `from`, merge overlapping ranges and touching
  /// cursors. The direction of the last range merged in wins, and the main
  /// index follows its range.
  fn normalized(mut ranges: SmallVec<[SelectionRange; 1]>, main_index: usize) -> Self {
    if ranges.len() < 2 {
      return Self {
        ranges,
        main_index: 0,
      };
    }

    let mut indexed: SmallVec<[(usize, SelectionRange); 1]> =
      ranges.drain(..).enumerate().collect();
    indexed.sort_by_key(|(_, range)| range.from());

    let mut out: SmallVec<[SelectionRange; 1]> = SmallVec::with_capacity(indexed.len());
    let mut new_main = 0;

    for (orig_index, range) in indexed {
      let merge = out.last().is_some_and(|prev| {
        if range.is_empty() {
          range.from() <= prev.to()
        } else {
          range.from() < prev.to()
        }
      });
      if merge {
        let prev = out.last_mut().expect("merge implies a previous range");
        let from = prev.from().min(range.from());
        let to = prev.to().max(range.to());
        *prev = match range.direction() {
          Direction::Backward => SelectionRange::new(to, from),
          Direction::Forward => SelectionRange::new(from, to),
        };
        if orig_index == main_index {
          new_main = out.len() - 1;
        }
      } else {
        if orig_index == main_index {
          new_main = out.len();
        }
        out.push(range);
      }
    }

    Self {
      ranges:     out,
      main_index: new_main,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn sel(ranges: Vec<(usize, usize)>, main: usize) -> Selection {
    Selection::create(
      ranges
        .into_iter()
        .map(|(anchor, head)| SelectionRange::new(anchor, head))
        .collect(),
      main,
    )
    .unwrap()
  }

  #[test]
  fn normalization_sorts_and_merges() {
    let s = sel(vec![(10, 12), (6, 7), (4, 5), (0, 6)], 0);
    let ranges: Vec<_> = s.ranges().iter().map(|r| (r.from(), r.to())).collect();
    assert_eq!(ranges, vec![(0, 6), (6, 7), (10, 12)]);
    // main was (10, 12), now at index 2
    assert_eq!(s.main_index(), 2);
  }

  #[test]
  fn merge_takes_direction_of_last_range() {
    // A forward range swallowed by a later backward range.
    let s = sel(vec![(0, 4), (6, 2)], 0);
    assert_eq!(s.len(), 1);
    let main = s.main();
    assert_eq!((main.from(), main.to()), (0, 6));
    assert_eq!(main.direction(), Direction::Backward);
  }

  #[test]
  fn cursors_fold_into_touching_ranges() {
    let s = sel(vec![(0, 4), (4, 4)], 1);
    assert_eq!(s.len(), 1);
    // adjacent non-empty ranges stay separate
    let s = sel(vec![(0, 4), (4, 8)], 1);
    assert_eq!(s.len(), 2);
    assert_eq!(s.main_index(), 1);
  }

  #[test]
  fn main_survives_merges() {
    let s = sel(vec![(0, 3), (2, 5), (8, 9)], 1);
    assert_eq!(s.len(), 2);
    assert_eq!(s.main_index(), 0);
    assert_eq!((s.main().from(), s.main().to()), (0, 5));
  }

  #[test]
  fn map_through_changes() {
    use crate::change::ChangeSet;

    let s = sel(vec![(1, 3), (6, 8)], 1);
    let changes = ChangeSet::of(vec![(0, 0, Some("ab".into()))], 10).unwrap();
    let mapped = s.map(&changes.desc()).unwrap();
    let ranges: Vec<_> = mapped.ranges().iter().map(|r| (r.anchor, r.head)).collect();
    assert_eq!(ranges, vec![(3, 5), (8, 10)]);
    assert_eq!(mapped.main_index(), 1);

    // mapping through the full set and its desc agree
    let via_set = s.map(&changes).unwrap();
    assert_eq!(via_set, mapped);
  }

  #[test]
  fn empty_range_assoc_controls_insertion_side() {
    use crate::change::ChangeSet;

    let changes = ChangeSet::of(vec![(4, 4, Some("xy".into()))], 8).unwrap();

    let before = SelectionRange::cursor_with_assoc(4, Assoc::Before);
    let mapped = before.map(&changes.desc()).unwrap();
    assert_eq!((mapped.anchor, mapped.head), (4, 4));

    let after = SelectionRange::cursor_with_assoc(4, Assoc::After);
    let mapped = after.map(&changes.desc()).unwrap();
    assert_eq!((mapped.anchor, mapped.head), (6, 6));
  }

  #[test]
  fn check_validates_against_doc() {
    let s = sel(vec![(0, 4)], 0);
    assert!(s.check(4).is_ok());
    assert_eq!(
      s.check(3),
      Err(SelectionError::RangeOutOfBounds {
        from: 0,
        to:   4,
        len:  3,
      })
    );
  }

  #[test]
  fn create_rejects_bad_input() {
    assert_eq!(
      Selection::create(SmallVec::new(), 0),
      Err(SelectionError::EmptySelection)
    );
    assert_eq!(
      Selection::create(smallvec![SelectionRange::cursor(0)], 1),
      Err(SelectionError::MainIndexOutOfBounds { index: 1, len: 1 })
    );
  }

  #[test]
  fn goal_column_cleared_by_mapping() {
    use crate::change::ChangeSet;

    let range = SelectionRange::cursor(2).with_goal_column(7);
    let changes = ChangeSet::of(vec![(0, 1, None)], 4).unwrap();
    let mapped = range.map(&changes.desc()).unwrap();
    assert_eq!(mapped.goal_column, None);
    assert_eq!(mapped.head, 1);
  }
}
