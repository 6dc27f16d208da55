//! Edit descriptions: composable, invertible, mappable document changes.
//!
//! A [`ChangeDesc`] encodes an edit as a run-length sequence of operations —
//! retained spans, deleted spans, inserted spans — without the inserted text
//! itself: a pure function from old positions to new positions, with an
//! inverse. A [`ChangeSet`] is a `ChangeDesc` that also carries the inserted
//! text, which is what makes it applicable and invertible against a document.
//!
//! # Operations
//!
//! - **Retain(n)** — keep `n` characters unchanged
//! - **Delete(n)** — remove `n` characters
//! - **Insert(n, text)** — insert `n` characters (`text` present on change
//!   sets, absent on bare descriptions)
//!
//! Insertions immediately followed by deletions form replacements; the
//! builder keeps that adjacency canonical (insert before delete), and
//! position mapping treats the pair as one replaced run.
//!
//! # Position mapping
//!
//! [`ChangeDesc::map_pos`] maps a position through the edit. The [`Assoc`]
//! controls which side of an insertion the position sticks to; the word and
//! sticky variants refine that for replacements. [`ChangeDesc::map_pos_mode`]
//! adds deletion tracking: [`MapMode::TrackDel`] reports positions that fell
//! strictly inside a deleted run as `None`.
//!
//! # Algebra
//!
//! - `a.compose(b)` — the single edit equivalent to applying `a` then `b`.
//! - `a.invert(doc)` — the edit that undoes `a` against the document it was
//!   made for.
//! - `a.map(b)` — `a` rebased over `b`, so concurrent edits can be
//!   sequenced either way (the operational-transform shape the transaction
//!   pipeline uses to merge specs).

use std::{
  iter::once,
  ops::Deref,
};

use thiserror::Error;
use vellum_core::chars::char_is_word;

use crate::{
  Tendril,
  text::Text,
};

pub type Result<T> = std::result::Result<T, ChangeError>;

/// `(from, to, replacement)` in old-document coordinates.
pub type Change = (usize, usize, Option<Tendril>);

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChangeError {
  #[error("change length mismatch: expected {expected}, got {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("compose length mismatch: left output {left_len_after}, right input {right_len}")]
  ComposeLengthMismatch {
    left_len_after: usize,
    right_len:      usize,
  },
  #[error("map length mismatch: both changes must start in a document of the same length")]
  MapLengthMismatch,
  #[error("invalid change range: start {from} is after end {to}")]
  InvalidRange { from: usize, to: usize },
  #[error("change range {from}..{to} is out of bounds for document length {len}")]
  RangeOutOfBounds {
    from: usize,
    to:   usize,
    len:  usize,
  },
  #[error("change range {from}..{to} overlaps previous end {prev_end}")]
  OverlappingRange {
    prev_end: usize,
    from:     usize,
    to:       usize,
  },
  #[error("positions {positions:?} are out of bounds for change length {len}")]
  PositionsOutOfBounds {
    positions: Vec<usize>,
    len:       usize,
  },
  #[error(transparent)]
  Text(#[from] crate::text::TextError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
  /// Keep n characters.
  Retain(usize),

  /// Delete n characters.
  Delete(usize),

  /// Insert n characters. The text is known on a [`ChangeSet`] and absent on
  /// a bare [`ChangeDesc`].
  Insert(usize, Option<Tendril>),
}

impl Operation {
  fn insert(text: Tendril) -> Self {
    Operation::Insert(text.chars().count(), Some(text))
  }
}

/// Which side a mapped position associates with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Assoc {
  Before,
  After,

  /// Acts like `After` if a word character is inserted after the position,
  /// otherwise acts like `Before`. Degrades to `After` when the inserted
  /// text is unknown.
  AfterWord,

  /// Acts like `Before` if a word character is inserted before the position,
  /// otherwise acts like `After`. Degrades to `Before` when the inserted
  /// text is unknown.
  BeforeWord,

  /// Acts like `Before` but if the position is within an exact replacement
  /// (same size) the offset to the start of the replacement is kept.
  BeforeSticky,

  /// Acts like `After` but if the position is within an exact replacement
  /// (same size) the offset to the start of the replacement is kept.
  AfterSticky,
}

impl Assoc {
  /// Whether to stick to gaps.
  fn stays_at_gaps(self) -> bool {
    !matches!(self, Self::BeforeWord | Self::AfterWord)
  }

  fn insert_offset(self, len: usize, text: Option<&Tendril>) -> usize {
    match self {
      Assoc::After | Assoc::AfterSticky => len,
      Assoc::Before | Assoc::BeforeSticky => 0,
      Assoc::AfterWord => {
        text.map_or(len, |s| s.chars().take_while(|&c| char_is_word(c)).count())
      },
      Assoc::BeforeWord => {
        text.map_or(0, |s| {
          len - s.chars().rev().take_while(|&c| char_is_word(c)).count()
        })
      },
    }
  }

  pub fn sticky(self) -> bool {
    matches!(self, Assoc::BeforeSticky | Assoc::AfterSticky)
  }
}

/// Deletion tracking for [`ChangeDesc::map_pos_mode`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MapMode {
  /// Clamp positions inside deletions to the side chosen by the
  /// association.
  #[default]
  Simple,

  /// Report positions strictly inside a deleted run as `None`.
  TrackDel,

  /// Positions inside a deleted run map to the first valid position (the
  /// start of the replacement).
  TrackBefore,

  /// Positions inside a deleted run map to the last valid position (the end
  /// of the replacement's insertion).
  TrackAfter,
}

/// The shape of an edit: retained/deleted/inserted runs without text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeDesc {
  ops:       Vec<Operation>,
  /// The required document length. Application refuses documents of any
  /// other length.
  len:       usize,
  len_after: usize,
}

/// A changed run, in both coordinate spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedRange {
  pub from_a: usize,
  pub to_a:   usize,
  pub from_b: usize,
  pub to_b:   usize,
}

/// An untouched run: the complement of [`ChangedRange`]. Covers
/// `[from_a, from_a + len)` in the old document and
/// `[from_b, from_b + len)` in the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRange {
  pub from_a: usize,
  pub from_b: usize,
  pub len:    usize,
}

impl ChangeDesc {
  fn with_capacity(capacity: usize) -> Self {
    Self {
      ops:       Vec::with_capacity(capacity),
      len:       0,
      len_after: 0,
    }
  }

  pub fn empty(len: usize) -> Self {
    Self {
      ops: Vec::new(),
      len,
      len_after: len,
    }
  }

  /// Length of the document this edit applies to.
  #[inline]
  pub fn len(&self) -> usize {
    self.len
  }

  /// Length of the document this edit produces.
  #[inline]
  pub fn len_after(&self) -> usize {
    self.len_after
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.ops.is_empty() || self.ops == [Operation::Retain(self.len)]
  }

  pub fn ops(&self) -> &[Operation] {
    &self.ops
  }

  // Builder operations: retain/delete/insert with run merging.
  //

  pub(crate) fn retain(&mut self, n: usize) {
    use Operation::*;

    if n == 0 {
      return;
    }

    self.len += n;
    self.len_after += n;

    if let Some(Retain(count)) = self.ops.last_mut() {
      *count += n;
    } else {
      self.ops.push(Retain(n))
    }
  }

  pub(crate) fn delete(&mut self, n: usize) {
    use Operation::*;

    if n == 0 {
      return;
    }

    self.len += n;

    if let Some(Delete(count)) = self.ops.last_mut() {
      *count += n;
    } else {
      self.ops.push(Delete(n))
    }
  }

  pub(crate) fn insert_len(&mut self, n: usize) {
    self.push_insert(n, None);
  }

  pub(crate) fn insert_text(&mut self, fragment: Tendril) {
    let n = fragment.chars().count();
    self.push_insert(n, Some(fragment));
  }

  /// Keeps the canonical insert-before-delete order for replacements, so a
  /// replaced run is always one insert op followed by one delete op.
  fn push_insert(&mut self, n: usize, text: Option<Tendril>) {
    use Operation::*;

    if n == 0 {
      return;
    }

    self.len_after += n;

    let displaced = match self.ops.as_mut_slice() {
      [.., Insert(prev_len, prev_text)] | [.., Insert(prev_len, prev_text), Delete(_)] => {
        *prev_len += n;
        match (prev_text, text) {
          (Some(prev), Some(new)) => prev.push_str(&new),
          (prev @ Some(_), None) => *prev = None,
          (None, _) => {},
        }
        return;
      },
      [.., last @ Delete(_)] => Some(std::mem::replace(last, Insert(n, text))),
      _ => {
        self.ops.push(Insert(n, text));
        return;
      },
    };

    if let Some(delete) = displaced {
      self.ops.push(delete);
    }
  }

  fn push_op(&mut self, op: Operation) {
    match op {
      Operation::Retain(n) => self.retain(n),
      Operation::Delete(n) => self.delete(n),
      Operation::Insert(n, text) => self.push_insert(n, text),
    }
  }

  fn ensure_len(&self, text_len: usize) -> Result<()> {
    if text_len != self.len {
      return Err(ChangeError::LengthMismatch {
        expected: self.len,
        actual:   text_len,
      });
    }
    Ok(())
  }

  /// Combine two edits into one equivalent to applying `self` then `other`.
  pub fn compose(&self, other: &Self) -> Result<Self> {
    // The output length of the first must match the input length of the
    // second.
    if self.len_after != other.len {
      return Err(ChangeError::ComposeLengthMismatch {
        left_len_after: self.len_after,
        right_len:      other.len,
      });
    }

    // Composing goes wrong in odd ways if one of the sides is a no-op.
    if self.ops.is_empty() {
      return Ok(other.clone());
    }
    if other.ops.is_empty() {
      return Ok(self.clone());
    }

    let mut ops_a = self.ops.iter().cloned();
    let mut ops_b = other.ops.iter().cloned();

    let mut head_a = ops_a.next();
    let mut head_b = ops_b.next();

    let mut out = Self::with_capacity(self.ops.len());

    loop {
      use std::cmp::Ordering;

      use Operation::*;
      match (head_a, head_b) {
        (None, None) => {
          break;
        },
        // Deletion in A happens before B ever sees the content.
        (Some(Delete(i)), b) => {
          out.delete(i);
          head_a = ops_a.next();
          head_b = b;
        },
        // Insertion in B happens after everything A did.
        (a, Some(Insert(n, text))) => {
          out.push_insert(n, text);
          head_a = a;
          head_b = ops_b.next();
        },
        (None, val) | (val, None) => unreachable!("({:?})", val),
        (Some(Retain(i)), Some(Retain(j))) => {
          match i.cmp(&j) {
            Ordering::Less => {
              out.retain(i);
              head_a = ops_a.next();
              head_b = Some(Retain(j - i));
            },
            Ordering::Equal => {
              out.retain(i);
              head_a = ops_a.next();
              head_b = ops_b.next();
            },
            Ordering::Greater => {
              out.retain(j);
              head_a = Some(Retain(i - j));
              head_b = ops_b.next();
            },
          }
        },
        (Some(Insert(n, text)), Some(Delete(j))) => {
          match n.cmp(&j) {
            Ordering::Less => {
              head_a = ops_a.next();
              head_b = Some(Delete(j - n));
            },
            Ordering::Equal => {
              head_a = ops_a.next();
              head_b = ops_b.next();
            },
            Ordering::Greater => {
              head_a = Some(split_insert(n, text, j).1);
              head_b = ops_b.next();
            },
          }
        },
        (Some(Insert(n, text)), Some(Retain(j))) => {
          match n.cmp(&j) {
            Ordering::Less => {
              out.push_insert(n, text);
              head_a = ops_a.next();
              head_b = Some(Retain(j - n));
            },
            Ordering::Equal => {
              out.push_insert(n, text);
              head_a = ops_a.next();
              head_b = ops_b.next();
            },
            Ordering::Greater => {
              let (before, after) = split_insert(n, text, j);
              out.push_op(before);
              head_a = Some(after);
              head_b = ops_b.next();
            },
          }
        },
        (Some(Retain(i)), Some(Delete(j))) => {
          match i.cmp(&j) {
            Ordering::Less => {
              out.delete(i);
              head_a = ops_a.next();
              head_b = Some(Delete(j - i));
            },
            Ordering::Equal => {
              out.delete(j);
              head_a = ops_a.next();
              head_b = ops_b.next();
            },
            Ordering::Greater => {
              out.delete(j);
              head_a = Some(Retain(i - j));
              head_b = ops_b.next();
            },
          }
        },
      };
    }

    debug_assert!(out.len == self.len);
    debug_assert!(out.len_after == other.len_after);

    Ok(out)
  }

  /// Rebase this edit over `other`, which starts in the same document.
  ///
  /// The result applies to the document `other` produced and makes the same
  /// modification this edit does to the parts of the document `other` left
  /// alone. Content `other` deleted is gone; content `other` inserted is
  /// retained. When both edits insert at the same position, `before` decides
  /// whether this edit's insertion lands before (`true`) or after (`false`)
  /// the other's.
  pub fn map_desc(&self, other: &ChangeDesc, before: bool) -> Result<Self> {
    if self.len != other.len {
      return Err(ChangeError::MapLengthMismatch);
    }
    if other.is_empty() {
      return Ok(self.clone());
    }
    if self.is_empty() {
      return Ok(Self::empty(other.len_after));
    }

    let mut ops_a = self.ops.iter().cloned();
    let mut ops_b = other.ops.iter().cloned();

    let mut head_a = ops_a.next();
    let mut head_b = ops_b.next();

    let mut out = Self::with_capacity(self.ops.len());

    loop {
      use std::cmp::Ordering;

      use Operation::*;
      match (head_a, head_b) {
        (None, None) => break,
        // Our insertion at this position: order against an insertion of the
        // other side at the same position is decided by `before`.
        (Some(Insert(n, text)), b) => {
          match b {
            Some(Insert(m, _)) if !before => {
              out.retain(m);
              head_a = Some(Insert(n, text));
              head_b = ops_b.next();
            },
            b => {
              out.push_insert(n, text);
              head_a = ops_a.next();
              head_b = b;
            },
          }
        },
        // The other side's insertion becomes retained content.
        (a, Some(Insert(m, _))) => {
          out.retain(m);
          head_a = a;
          head_b = ops_b.next();
        },
        (None, val) | (val, None) => unreachable!("({:?})", val),
        (Some(Retain(i)), Some(Retain(j))) => {
          match i.cmp(&j) {
            Ordering::Less => {
              out.retain(i);
              head_a = ops_a.next();
              head_b = Some(Retain(j - i));
            },
            Ordering::Equal => {
              out.retain(i);
              head_a = ops_a.next();
              head_b = ops_b.next();
            },
            Ordering::Greater => {
              out.retain(j);
              head_a = Some(Retain(i - j));
              head_b = ops_b.next();
            },
          }
        },
        // Content the other side deleted disappears from our edit, whether
        // we kept or deleted it.
        (Some(Retain(i)), Some(Delete(j))) => {
          match i.cmp(&j) {
            Ordering::Less => {
              head_a = ops_a.next();
              head_b = Some(Delete(j - i));
            },
            Ordering::Equal => {
              head_a = ops_a.next();
              head_b = ops_b.next();
            },
            Ordering::Greater => {
              head_a = Some(Retain(i - j));
              head_b = ops_b.next();
            },
          }
        },
        (Some(Delete(i)), Some(Delete(j))) => {
          match i.cmp(&j) {
            Ordering::Less => {
              head_a = ops_a.next();
              head_b = Some(Delete(j - i));
            },
            Ordering::Equal => {
              head_a = ops_a.next();
              head_b = ops_b.next();
            },
            Ordering::Greater => {
              head_a = Some(Delete(i - j));
              head_b = ops_b.next();
            },
          }
        },
        (Some(Delete(i)), Some(Retain(j))) => {
          match i.cmp(&j) {
            Ordering::Less => {
              out.delete(i);
              head_a = ops_a.next();
              head_b = Some(Retain(j - i));
            },
            Ordering::Equal => {
              out.delete(j);
              head_a = ops_a.next();
              head_b = ops_b.next();
            },
            Ordering::Greater => {
              out.delete(j);
              head_a = Some(Delete(i - j));
              head_b = ops_b.next();
            },
          }
        },
      }
    }

    debug_assert!(out.len == other.len_after);

    Ok(out)
  }

  /// The description of the edit that undoes this one. Retains stay, deleted
  /// runs become insertions of the same length, and vice versa.
  pub fn invert_desc(&self) -> Self {
    let mut out = Self::with_capacity(self.ops.len());
    for op in &self.ops {
      match op {
        Operation::Retain(n) => out.retain(*n),
        Operation::Delete(n) => out.insert_len(*n),
        Operation::Insert(n, _) => out.delete(*n),
      }
    }
    out
  }

  /// Map a (mostly) *sorted* list of positions through the changes.
  ///
  /// Equivalent to mapping each position with [`Self::map_pos`], but runs in
  /// `O(N + M)` for sorted lists instead of `O(NM)`. Unsorted lists are
  /// handled by rewinding, at worst-case `O(NM)`.
  pub fn update_positions<'a>(
    &self,
    positions: impl Iterator<Item = (&'a mut usize, Assoc)>,
  ) -> Result<()> {
    use Operation::*;

    let mut positions = positions.peekable();

    let mut old_pos = 0;
    let mut new_pos = 0;
    let mut iter = self.ops.iter().enumerate().peekable();

    'outer: loop {
      macro_rules! map {
        ($map:expr, $i:expr) => {
          loop {
            let Some((pos, assoc)) = positions.peek_mut() else {
              return Ok(());
            };
            if **pos < old_pos {
              // Positions are not sorted; rewind to the last operation that
              // contains this position and continue from there.
              for (i, op) in self.ops[..$i].iter().enumerate().rev() {
                match op {
                  Retain(n) => {
                    old_pos -= n;
                    new_pos -= n;
                  },
                  Delete(n) => {
                    old_pos -= n;
                  },
                  Insert(n, _) => {
                    new_pos -= n;
                  },
                }
                if old_pos <= **pos {
                  iter = self.ops[i..].iter().enumerate().peekable();
                }
              }
              debug_assert!(old_pos <= **pos, "rewinding reaches the position");
              continue 'outer;
            }
            #[allow(clippy::redundant_closure_call)]
            let Some(new_pos) = $map(**pos, *assoc) else {
              break;
            };
            **pos = new_pos;
            positions.next();
          }
        };
      }

      let Some((i, op)) = iter.next() else {
        map!(|pos, _| (old_pos == pos).then_some(new_pos), self.ops.len());
        break;
      };

      let len = match op {
        Delete(n) | Retain(n) => *n,
        Insert(..) => 0,
      };
      let mut old_end = old_pos + len;

      match op {
        Retain(_) => {
          map!(
            |pos, _| (old_end > pos).then_some(new_pos + (pos - old_pos)),
            i
          );
          new_pos += len;
        },
        Delete(_) => {
          // in range
          map!(|pos, _| (old_end > pos).then_some(new_pos), i);
        },
        Insert(ins_len, text) => {
          // A subsequent delete means a replacement; consume it.
          if let Some((_, Delete(del_len))) = iter.peek() {
            let del_len = *del_len;
            iter.next();

            old_end = old_pos + del_len;
            // in range of the replaced run
            map!(
              |pos, assoc: Assoc| {
                (old_end > pos).then(|| {
                  // at point or tracking before
                  if pos == old_pos && assoc.stays_at_gaps() {
                    new_pos
                  } else {
                    let ins = assoc.insert_offset(*ins_len, text.as_ref());
                    // if the deleted and inserted runs have the exact same
                    // size, keep the relative offset into the new text
                    if del_len == ins && assoc.sticky() {
                      new_pos + (pos - old_pos)
                    } else {
                      new_pos + ins
                    }
                  }
                })
              },
              i
            );
          } else {
            // at the insert point
            map!(
              |pos, assoc: Assoc| {
                (old_pos == pos)
                  .then(|| new_pos + assoc.insert_offset(*ins_len, text.as_ref()))
              },
              i
            );
          }

          new_pos += ins_len;
        },
      }
      old_pos = old_end;
    }

    let out_of_bounds: Vec<usize> = positions.map(|(pos, _)| *pos).collect();
    if out_of_bounds.is_empty() {
      Ok(())
    } else {
      Err(ChangeError::PositionsOutOfBounds {
        positions: out_of_bounds,
        len:       self.len,
      })
    }
  }

  /// Map a position through the changes.
  ///
  /// `assoc` indicates which side to associate the position with. `Before`
  /// keeps the position close to the character before it, placing it before
  /// insertions at that point; `After` moves it past such insertions.
  pub fn map_pos(&self, mut pos: usize, assoc: Assoc) -> Result<usize> {
    self.update_positions(once((&mut pos, assoc)))?;
    Ok(pos)
  }

  /// Map a position with deletion tracking. Returns `None` only in
  /// [`MapMode::TrackDel`] when the position fell strictly inside a deleted
  /// run.
  pub fn map_pos_mode(&self, pos: usize, assoc: Assoc, mode: MapMode) -> Result<Option<usize>> {
    use Operation::*;

    if pos > self.len {
      return Err(ChangeError::PositionsOutOfBounds {
        positions: vec![pos],
        len:       self.len,
      });
    }

    let mut old_pos = 0;
    let mut new_pos = 0;
    let mut iter = self.ops.iter().peekable();

    while let Some(op) = iter.next() {
      match op {
        Retain(n) => {
          if pos < old_pos + n {
            return Ok(Some(new_pos + (pos - old_pos)));
          }
          old_pos += n;
          new_pos += n;
        },
        Delete(n) => {
          // A bare delete is a replacement with an empty insertion.
          if pos > old_pos && pos < old_pos + n {
            return Ok(match mode {
              MapMode::TrackDel => None,
              MapMode::TrackBefore | MapMode::TrackAfter | MapMode::Simple => Some(new_pos),
            });
          }
          if pos == old_pos {
            return Ok(Some(new_pos));
          }
          old_pos += n;
        },
        Insert(ins_len, text) => {
          let del_len = match iter.peek() {
            Some(Delete(n)) => {
              iter.next();
              *n
            },
            _ => 0,
          };
          if pos == old_pos {
            // At the boundary before the run: a pure insertion obeys the
            // association, a replacement keeps the position at its start.
            let offset = if del_len == 0 {
              assoc.insert_offset(*ins_len, text.as_ref())
            } else {
              0
            };
            return Ok(Some(new_pos + offset));
          }
          if pos < old_pos + del_len {
            return Ok(match mode {
              MapMode::TrackDel => None,
              MapMode::TrackBefore => Some(new_pos),
              MapMode::TrackAfter => Some(new_pos + ins_len),
              MapMode::Simple => {
                match assoc {
                  Assoc::Before | Assoc::BeforeWord | Assoc::BeforeSticky => Some(new_pos),
                  _ => Some(new_pos + ins_len),
                }
              },
            });
          }
          old_pos += del_len;
          new_pos += ins_len;
        },
      }
    }

    Ok(Some(new_pos + (pos - old_pos)))
  }

  /// Whether any changed run touches the given range (insertions at a range
  /// boundary count).
  pub fn touches_range(&self, from: usize, to: usize) -> bool {
    self
      .iter_changed_ranges()
      .any(|r| r.from_a <= to && r.to_a >= from)
  }

  /// Iterate the changed runs with coordinates in both documents.
  pub fn iter_changed_ranges(&self) -> impl Iterator<Item = ChangedRange> + '_ {
    use Operation::*;

    let mut iter = self.ops.iter().peekable();
    let mut old_pos = 0;
    let mut new_pos = 0;
    std::iter::from_fn(move || {
      loop {
        match iter.next()? {
          Retain(n) => {
            old_pos += n;
            new_pos += n;
          },
          Delete(n) => {
            let range = ChangedRange {
              from_a: old_pos,
              to_a:   old_pos + n,
              from_b: new_pos,
              to_b:   new_pos,
            };
            old_pos += n;
            return Some(range);
          },
          Insert(ins_len, _) => {
            let del_len = match iter.peek() {
              Some(Delete(n)) => {
                iter.next();
                *n
              },
              _ => 0,
            };
            let range = ChangedRange {
              from_a: old_pos,
              to_a:   old_pos + del_len,
              from_b: new_pos,
              to_b:   new_pos + ins_len,
            };
            old_pos += del_len;
            new_pos += ins_len;
            return Some(range);
          },
        }
      }
    })
  }

  /// Iterate the untouched runs between the changes. A no-op edit yields
  /// one gap covering the whole document.
  pub fn iter_gaps(&self) -> impl Iterator<Item = GapRange> + '_ {
    use Operation::*;

    // An op-less edit retains everything implicitly.
    let mut implicit = self.ops.is_empty() && self.len > 0;
    let mut iter = self.ops.iter();
    let mut old_pos = 0;
    let mut new_pos = 0;
    std::iter::from_fn(move || {
      if implicit {
        implicit = false;
        return Some(GapRange {
          from_a: 0,
          from_b: 0,
          len:    self.len,
        });
      }
      loop {
        match iter.next()? {
          Retain(n) => {
            let gap = GapRange {
              from_a: old_pos,
              from_b: new_pos,
              len:    *n,
            };
            old_pos += n;
            new_pos += n;
            return Some(gap);
          },
          Delete(n) => {
            old_pos += n;
          },
          Insert(n, _) => {
            new_pos += n;
          },
        }
      }
    })
  }
}

fn split_insert(len: usize, text: Option<Tendril>, at: usize) -> (Operation, Operation) {
  match text {
    Some(mut s) => {
      // figure out the byte index of the split point
      let (pos, _) = s
        .char_indices()
        .nth(at)
        .expect("split point is inside the insertion");
      let after = s.split_off(pos);
      (
        Operation::Insert(at, Some(s)),
        Operation::Insert(len - at, Some(after)),
      )
    },
    None => {
      (
        Operation::Insert(at, None),
        Operation::Insert(len - at, None),
      )
    },
  }
}

/// An edit with its inserted text: applicable and invertible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
  desc: ChangeDesc,
}

/// The result of [`ChangeSet::filter`]: the changes that survived and, in
/// parallel coordinates, the ones that were suppressed.
#[derive(Debug, Clone)]
pub struct FilteredChanges {
  pub changes:  ChangeSet,
  pub filtered: ChangeSet,
}

impl ChangeSet {
  pub fn empty(len: usize) -> Self {
    Self {
      desc: ChangeDesc::empty(len),
    }
  }

  /// Build a change set from `(from, to, insert)` items against a document
  /// of the given length. Items are sorted by position first; overlapping
  /// items are rejected.
  pub fn of<I>(changes: I, len: usize) -> Result<Self>
  where
    I: IntoIterator<Item = Change>,
  {
    let mut changes: Vec<Change> = changes.into_iter().collect();
    changes.sort_by_key(|(from, to, _)| (*from, *to));

    let mut desc = ChangeDesc::with_capacity(2 * changes.len() + 1);
    let mut last = 0;
    for (from, to, text) in changes {
      validate_change_bounds(from, to, len)?;
      if from < last {
        return Err(ChangeError::OverlappingRange {
          prev_end: last,
          from,
          to,
        });
      }

      desc.retain(from - last);
      let span = to - from;
      match text {
        Some(text) if !text.is_empty() => {
          desc.insert_text(text);
          desc.delete(span);
        },
        _ => desc.delete(span),
      }
      last = to;
    }
    desc.retain(len - last);

    Ok(Self { desc })
  }

  /// Build a change set from items where each item's positions refer to the
  /// document produced by the previous items.
  pub fn of_sequential<I>(changes: I, len: usize) -> Result<Self>
  where
    I: IntoIterator<Item = Change>,
  {
    let mut acc = Self::empty(len);
    for change in changes {
      let single = Self::of(once(change), acc.len_after())?;
      acc = acc.compose(&single)?;
    }
    Ok(acc)
  }

  /// The shape of this edit, without the inserted text.
  pub fn desc(&self) -> ChangeDesc {
    let mut out = ChangeDesc::with_capacity(self.desc.ops.len());
    for op in &self.desc.ops {
      match op {
        Operation::Insert(n, _) => out.insert_len(*n),
        other => out.push_op(other.clone()),
      }
    }
    out
  }

  /// Apply this edit to a document, returning the new document.
  pub fn apply(&self, doc: &Text) -> Result<Text> {
    use Operation::*;

    self.desc.ensure_len(doc.len())?;
    if self.desc.is_empty() {
      return Ok(doc.clone());
    }

    let mut builder = ropey::RopeBuilder::new();
    let mut pos = 0;

    let append_slice = |from: usize, to: usize, builder: &mut ropey::RopeBuilder| {
      if from >= to {
        return;
      }
      for chunk in doc.as_slice().slice(from..to).chunks() {
        builder.append(chunk);
      }
    };

    for op in &self.desc.ops {
      match op {
        Retain(n) => {
          append_slice(pos, pos + n, &mut builder);
          pos += n;
        },
        Delete(n) => {
          pos += n;
        },
        Insert(_, text) => {
          let text = text.as_ref().expect("change sets carry inserted text");
          builder.append(text.as_str());
        },
      }
    }

    append_slice(pos, self.desc.len, &mut builder);

    Ok(Text::from_rope(builder.finish()))
  }

  /// The change set that reverts this one. Expects the document this change
  /// was made for.
  pub fn invert(&self, original_doc: &Text) -> Result<Self> {
    use Operation::*;

    if self.desc.ops.is_empty() {
      return Ok(Self {
        desc: ChangeDesc {
          ops:       Vec::new(),
          len:       self.desc.len_after,
          len_after: self.desc.len,
        },
      });
    }

    self.desc.ensure_len(original_doc.len())?;

    let mut out = ChangeDesc::with_capacity(self.desc.ops.len());
    let mut pos = 0;

    for op in &self.desc.ops {
      match op {
        Retain(n) => {
          out.retain(*n);
          pos += n;
        },
        Delete(n) => {
          let text = original_doc.slice_string(pos, pos + n)?;
          out.insert_text(Tendril::from(text));
          pos += n;
        },
        Insert(n, _) => {
          out.delete(*n);
        },
      }
    }

    Ok(Self { desc: out })
  }

  /// Combine two change sets; see [`ChangeDesc::compose`].
  pub fn compose(&self, other: &Self) -> Result<Self> {
    Ok(Self {
      desc: self.desc.compose(&other.desc)?,
    })
  }

  /// Rebase this change set over another edit; see [`ChangeDesc::map_desc`].
  pub fn map(&self, other: &ChangeDesc, before: bool) -> Result<Self> {
    Ok(Self {
      desc: self.desc.map_desc(other, before)?,
    })
  }

  /// Split this change set into the changes outside the given (sorted,
  /// non-overlapping) ranges and the ones inside them, which are suppressed.
  /// Insertions exactly at a range boundary are kept.
  pub fn filter(&self, suppress: &[(usize, usize)]) -> FilteredChanges {
    use Operation::*;

    let suppressed_at = |from: usize, span: usize| {
      if span == 0 {
        suppress.iter().any(|&(a, b)| a < from && from < b)
      } else {
        suppress.iter().any(|&(a, b)| a <= from && from < b)
      }
    };
    // Boundaries where the suppression state flips, used to split runs.
    let cut_points: Vec<usize> = suppress.iter().flat_map(|&(a, b)| [a, b]).collect();

    let mut changes = ChangeDesc::with_capacity(self.desc.ops.len());
    let mut filtered = ChangeDesc::with_capacity(self.desc.ops.len());

    let mut iter = self.desc.ops.iter().peekable();
    let mut pos = 0;
    while let Some(op) = iter.next() {
      match op {
        Retain(n) => {
          changes.retain(*n);
          filtered.retain(*n);
          pos += n;
        },
        Delete(del_len) => {
          split_filtered(
            pos,
            *del_len,
            None,
            &cut_points,
            &suppressed_at,
            &mut changes,
            &mut filtered,
          );
          pos += del_len;
        },
        Insert(ins_len, text) => {
          let del_len = match iter.peek() {
            Some(Delete(n)) => {
              iter.next();
              *n
            },
            _ => 0,
          };
          split_filtered(
            pos,
            del_len,
            Some((*ins_len, text.clone())),
            &cut_points,
            &suppressed_at,
            &mut changes,
            &mut filtered,
          );
          pos += del_len;
        },
      }
    }

    FilteredChanges {
      changes:  ChangeSet { desc: changes },
      filtered: ChangeSet { desc: filtered },
    }
  }

  /// Iterate `(from, to, insert)` items in old-document coordinates.
  pub fn iter_changes(&self) -> ChangeIterator<'_> {
    ChangeIterator::new(self)
  }
}

/// Distribute one replaced run over the suppression boundaries. The
/// insertion goes with the classification of the run's start.
#[allow(clippy::too_many_arguments)]
fn split_filtered(
  pos: usize,
  del_len: usize,
  insert: Option<(usize, Option<Tendril>)>,
  cut_points: &[usize],
  suppressed_at: &dyn Fn(usize, usize) -> bool,
  changes: &mut ChangeDesc,
  filtered: &mut ChangeDesc,
) {
  let mut push = |target_suppressed: bool, op: Operation| {
    let (active, passive) = if target_suppressed {
      (&mut *filtered, &mut *changes)
    } else {
      (&mut *changes, &mut *filtered)
    };
    let old = match &op {
      Operation::Retain(n) | Operation::Delete(n) => *n,
      Operation::Insert(..) => 0,
    };
    active.push_op(op);
    passive.retain(old);
  };

  if let Some((ins_len, text)) = insert {
    push(
      suppressed_at(pos, del_len),
      Operation::Insert(ins_len, text),
    );
  }

  let mut at = pos;
  let end = pos + del_len;
  while at < end {
    let next = cut_points
      .iter()
      .copied()
      .filter(|&c| c > at && c < end)
      .min()
      .unwrap_or(end);
    push(suppressed_at(at, next - at), Operation::Delete(next - at));
    at = next;
  }
}

impl Deref for ChangeSet {
  type Target = ChangeDesc;

  fn deref(&self) -> &Self::Target {
    &self.desc
  }
}

impl From<ChangeSet> for ChangeDesc {
  fn from(set: ChangeSet) -> Self {
    set.desc
  }
}

pub struct ChangeIterator<'a> {
  iter: std::iter::Peekable<std::slice::Iter<'a, Operation>>,
  pos:  usize,
}

impl<'a> ChangeIterator<'a> {
  fn new(changes: &'a ChangeSet) -> Self {
    let iter = changes.desc.ops.iter().peekable();
    Self { iter, pos: 0 }
  }
}

impl Iterator for ChangeIterator<'_> {
  type Item = Change;

  fn next(&mut self) -> Option<Self::Item> {
    use Operation::*;

    loop {
      match self.iter.next()? {
        Retain(n) => {
          self.pos += n;
        },
        Delete(n) => {
          let start = self.pos;
          self.pos += n;
          return Some((start, self.pos, None));
        },
        Insert(_, text) => {
          let start = self.pos;
          let text = text.clone();
          // a subsequent delete means a replacement; consume it
          if let Some(Delete(n)) = self.iter.peek() {
            self.pos += *n;
            self.iter.next();
            return Some((start, self.pos, text));
          } else {
            return Some((start, start, text));
          }
        },
      }
    }
  }
}

fn validate_change_bounds(from: usize, to: usize, len: usize) -> Result<()> {
  if from > to {
    return Err(ChangeError::InvalidRange { from, to });
  }
  if to > len {
    return Err(ChangeError::RangeOutOfBounds { from, to, len });
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use quickcheck::quickcheck;

  use super::*;

  fn set(changes: Vec<Change>, len: usize) -> ChangeSet {
    ChangeSet::of(changes, len).unwrap()
  }

  fn raw(ops: Vec<Operation>, len: usize, len_after: usize) -> ChangeSet {
    ChangeSet {
      desc: ChangeDesc {
        ops,
        len,
        len_after,
      },
    }
  }

  #[test]
  fn composition() {
    let doc = Text::from_str("hello xz");
    let a = set(
      vec![(5, 5, Some(" test!".into())), (6, 8, Some("abc".into()))],
      8,
    );

    let b = set(vec![(0, 10, Some("世orld".into()))], 15);

    let composed = a.compose(&b).unwrap();
    assert_eq!(composed.len(), 8);
    assert_eq!(composed.apply(&doc).unwrap().to_string(), "世orld! abc");

    // compose-then-apply equals apply-then-apply
    let two_step = b.apply(&a.apply(&doc).unwrap()).unwrap();
    assert_eq!(composed.apply(&doc).unwrap(), two_step);
  }

  #[test]
  fn invert() {
    let doc = Text::from_str("世界3 hello xz");
    let changes = set(vec![(4, 9, Some("test".into()))], 12);

    let revert = changes.invert(&doc).unwrap();
    let changed = changes.apply(&doc).unwrap();

    assert_ne!(doc, changed);
    // inverting a revert gives the original change back
    assert_eq!(changes, revert.invert(&changed).unwrap());
    // applying a revert restores the original document
    assert_eq!(revert.apply(&changed).unwrap(), doc);
  }

  #[test]
  fn map_pos() {
    // maps inserts
    let cs = set(vec![(4, 4, Some("!!".into()))], 8);
    assert_eq!(cs.map_pos(0, Assoc::Before).unwrap(), 0); // before insert
    assert_eq!(cs.map_pos(4, Assoc::Before).unwrap(), 4); // at insert, before
    assert_eq!(cs.map_pos(4, Assoc::After).unwrap(), 6); // at insert, after
    assert_eq!(cs.map_pos(5, Assoc::Before).unwrap(), 7); // after insert

    // maps deletes
    let cs = set(vec![(4, 8, None)], 12);
    assert_eq!(cs.map_pos(0, Assoc::Before).unwrap(), 0);
    assert_eq!(cs.map_pos(4, Assoc::Before).unwrap(), 4);
    assert_eq!(cs.map_pos(5, Assoc::Before).unwrap(), 4); // inside delete
    assert_eq!(cs.map_pos(5, Assoc::After).unwrap(), 4);
    assert_eq!(cs.map_pos(12, Assoc::After).unwrap(), 8); // end of doc

    // stays between replacements (two adjacent replaced runs, kept separate)
    let cs = raw(
      vec![
        Operation::insert("ab".into()),
        Operation::Delete(2),
        Operation::insert("cd".into()),
        Operation::Delete(2),
      ],
      4,
      4,
    );
    assert_eq!(cs.map_pos(2, Assoc::Before).unwrap(), 2);
    assert_eq!(cs.map_pos(2, Assoc::After).unwrap(), 2);

    // unsorted positions
    let mut positions = [4, 2];
    cs.update_positions(positions.iter_mut().map(|pos| (pos, Assoc::After)))
      .unwrap();
    assert_eq!(positions, [4, 2]);

    // stays at word boundary
    let cs = set(
      vec![(2, 2, Some(" ab".into())), (4, 4, Some("de ".into()))],
      4,
    );
    assert_eq!(cs.map_pos(2, Assoc::BeforeWord).unwrap(), 3);
    assert_eq!(cs.map_pos(4, Assoc::AfterWord).unwrap(), 9);
  }

  #[test]
  fn map_pos_modes() {
    // "abcdefgh" with cde replaced by "XY"
    let cs = set(vec![(2, 5, Some("XY".into()))], 8);
    let desc = cs.desc();

    // strictly inside the deletion
    assert_eq!(
      desc
        .map_pos_mode(3, Assoc::Before, MapMode::TrackDel)
        .unwrap(),
      None
    );
    assert_eq!(
      desc
        .map_pos_mode(3, Assoc::Before, MapMode::TrackBefore)
        .unwrap(),
      Some(2)
    );
    assert_eq!(
      desc
        .map_pos_mode(3, Assoc::Before, MapMode::TrackAfter)
        .unwrap(),
      Some(4)
    );
    assert_eq!(
      desc
        .map_pos_mode(3, Assoc::Before, MapMode::Simple)
        .unwrap(),
      Some(2)
    );
    assert_eq!(
      desc.map_pos_mode(3, Assoc::After, MapMode::Simple).unwrap(),
      Some(4)
    );

    // boundaries are not "inside"
    assert_eq!(
      desc
        .map_pos_mode(2, Assoc::Before, MapMode::TrackDel)
        .unwrap(),
      Some(2)
    );
    assert_eq!(
      desc
        .map_pos_mode(5, Assoc::Before, MapMode::TrackDel)
        .unwrap(),
      Some(4)
    );
  }

  #[test]
  fn map_rebases_concurrent_edits() {
    // Both edits start in "abcd". A inserts "X" at 1, B deletes [2, 4).
    let a = set(vec![(1, 1, Some("X".into()))], 4);
    let b = set(vec![(2, 4, None)], 4);

    let a_over_b = a.map(&b.desc(), true).unwrap();
    let b_over_a = b.map(&a.desc(), false).unwrap();

    let doc = Text::from_str("abcd");
    let ab = b_over_a.apply(&a.apply(&doc).unwrap()).unwrap();
    let ba = a_over_b.apply(&b.apply(&doc).unwrap()).unwrap();
    assert_eq!(ab.to_string(), "aXb");
    assert_eq!(ba.to_string(), "aXb");
  }

  #[test]
  fn map_insertion_order_tiebreak() {
    let a = set(vec![(2, 2, Some("A".into()))], 4);
    let b = set(vec![(2, 2, Some("B".into()))], 4);
    let doc = Text::from_str("abcd");

    let b_applied = b.apply(&doc).unwrap();
    let before = a.map(&b.desc(), true).unwrap();
    assert_eq!(before.apply(&b_applied).unwrap().to_string(), "abABcd");
    let after = a.map(&b.desc(), false).unwrap();
    assert_eq!(after.apply(&b_applied).unwrap().to_string(), "abBAcd");
  }

  #[test]
  fn changes_iter() {
    let changes = vec![(6, 11, Some("void".into())), (12, 17, None)];
    let cs = set(changes.clone(), 21);
    assert_eq!(cs.iter_changes().collect::<Vec<_>>(), changes);
  }

  #[test]
  fn changed_ranges_carry_both_coordinates() {
    let cs = set(vec![(1, 3, Some("xyz".into())), (5, 6, None)], 8);
    let ranges: Vec<_> = cs.iter_changed_ranges().collect();
    assert_eq!(ranges, vec![
      ChangedRange {
        from_a: 1,
        to_a:   3,
        from_b: 1,
        to_b:   4,
      },
      ChangedRange {
        from_a: 5,
        to_a:   6,
        from_b: 6,
        to_b:   6,
      },
    ]);
    assert!(cs.touches_range(0, 1));
    assert!(cs.touches_range(2, 2));
    assert!(!cs.touches_range(7, 8));
  }

  #[test]
  fn gaps_complement_changed_ranges() {
    let cs = set(vec![(1, 3, Some("xyz".into())), (5, 6, None)], 8);
    let gaps: Vec<_> = cs.iter_gaps().collect();
    assert_eq!(gaps, vec![
      GapRange {
        from_a: 0,
        from_b: 0,
        len:    1,
      },
      GapRange {
        from_a: 3,
        from_b: 4,
        len:    2,
      },
      GapRange {
        from_a: 6,
        from_b: 6,
        len:    2,
      },
    ]);

    // gaps and changed runs tile the old document together
    let covered: usize = cs.iter_gaps().map(|gap| gap.len).sum::<usize>()
      + cs
        .iter_changed_ranges()
        .map(|range| range.to_a - range.from_a)
        .sum::<usize>();
    assert_eq!(covered, cs.len());

    // a no-op edit is one whole-document gap
    let empty = ChangeSet::empty(5);
    assert_eq!(empty.iter_gaps().collect::<Vec<_>>(), vec![GapRange {
      from_a: 0,
      from_b: 0,
      len:    5,
    }]);
  }

  #[test]
  fn of_rejects_bad_specs() {
    assert!(matches!(
      ChangeSet::of(vec![(3, 2, None)], 5),
      Err(ChangeError::InvalidRange { .. })
    ));
    assert!(matches!(
      ChangeSet::of(vec![(3, 9, None)], 5),
      Err(ChangeError::RangeOutOfBounds { .. })
    ));
    assert!(matches!(
      ChangeSet::of(vec![(0, 3, None), (2, 4, None)], 5),
      Err(ChangeError::OverlappingRange { .. })
    ));
  }

  #[test]
  fn of_sequential_rebases_on_accumulated() {
    // Positions of the second item refer to the document after the first.
    let cs = ChangeSet::of_sequential(
      vec![(0, 0, Some("ab".into())), (2, 3, Some("X".into()))],
      3,
    )
    .unwrap();
    let doc = Text::from_str("cde");
    assert_eq!(cs.apply(&doc).unwrap().to_string(), "abXde");
  }

  #[test]
  fn empty_spec_items_produce_no_runs() {
    let cs = set(vec![(1, 1, Some("".into())), (2, 2, None)], 4);
    assert!(cs.is_empty());
  }

  #[test]
  fn filter_suppresses_ranges() {
    // "onetwo": delete everything, but suppress changes in [0,2) and [4,6).
    let cs = set(vec![(0, 6, None)], 6);
    let split = cs.filter(&[(0, 2), (4, 6)]);

    let doc = Text::from_str("onetwo");
    assert_eq!(split.changes.apply(&doc).unwrap().to_string(), "onwo");
    assert_eq!(split.filtered.apply(&doc).unwrap().to_string(), "et");

    // the two halves recombine into the original effect
    let recombined = split
      .changes
      .compose(&split.filtered.map(&split.changes.desc(), false).unwrap())
      .unwrap();
    assert_eq!(recombined.apply(&doc).unwrap().to_string(), "");
  }

  #[test]
  fn filter_keeps_boundary_insertions() {
    let cs = set(vec![(2, 2, Some("X".into()))], 6);
    let split = cs.filter(&[(2, 4)]);
    let doc = Text::from_str("onetwo");
    assert_eq!(split.changes.apply(&doc).unwrap().to_string(), "onXetwo");

    let cs = set(vec![(3, 3, Some("X".into()))], 6);
    let split = cs.filter(&[(2, 4)]);
    assert_eq!(split.changes.apply(&doc).unwrap().to_string(), "onetwo");
    assert_eq!(split.filtered.apply(&doc).unwrap().to_string(), "oneXtwo");
  }

  #[test]
  fn apply_errors_on_length_mismatch() {
    let cs = set(vec![(0, 1, None)], 5);
    let err = cs.apply(&Text::from_str("nope")).unwrap_err();
    assert!(matches!(err, ChangeError::LengthMismatch {
      expected: 5,
      actual:   4,
    }));
  }

  #[test]
  fn desc_drops_text_but_keeps_shape() {
    let cs = set(vec![(1, 3, Some("xyz".into()))], 5);
    let desc = cs.desc();
    assert_eq!(desc.len(), 5);
    assert_eq!(desc.len_after(), 6);
    assert_eq!(
      desc.map_pos(4, Assoc::Before).unwrap(),
      cs.map_pos(4, Assoc::Before).unwrap()
    );
    assert_eq!(desc.invert_desc().len(), 6);
    assert_eq!(desc.invert_desc().len_after(), 5);
  }

  fn arb_changes(len: usize, seed: Vec<(usize, usize, bool)>) -> Vec<Change> {
    let mut out: Vec<Change> = Vec::new();
    let mut last = 0;
    for (a, b, insert) in seed {
      if last > len {
        break;
      }
      let from = last + a % (len - last + 1);
      let to = from + b % (len - from + 1);
      let text = insert.then(|| Tendril::from("ins"));
      if from == to && text.is_none() {
        continue;
      }
      out.push((from, to, text));
      last = to + 1;
    }
    out
  }

  quickcheck! {
    fn compose_equals_sequential_apply(
      input: String,
      seed_a: Vec<(usize, usize, bool)>,
      seed_b: Vec<(usize, usize, bool)>
    ) -> bool {
      let doc = Text::from_str(&input);
      let a = set(arb_changes(doc.len(), seed_a), doc.len());
      let mid = a.apply(&doc).unwrap();
      let b = set(arb_changes(mid.len(), seed_b), mid.len());

      let composed = a.compose(&b).unwrap();
      composed.apply(&doc).unwrap() == b.apply(&mid).unwrap()
    }

    fn invert_round_trips(input: String, seed: Vec<(usize, usize, bool)>) -> bool {
      let doc = Text::from_str(&input);
      let a = set(arb_changes(doc.len(), seed), doc.len());
      let changed = a.apply(&doc).unwrap();
      a.invert(&doc).unwrap().apply(&changed).unwrap() == doc
    }

    fn map_pos_preserves_bounds(input: String, seed: Vec<(usize, usize, bool)>) -> bool {
      let doc = Text::from_str(&input);
      let a = set(arb_changes(doc.len(), seed), doc.len());
      a.map_pos(0, Assoc::Before).unwrap() == 0
        && a.map_pos(doc.len(), Assoc::After).unwrap() == a.len_after()
    }
  }
}
