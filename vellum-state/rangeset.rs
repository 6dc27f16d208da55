//! Sparse, position-indexed collections of tagged ranges.
//!
//! A [`RangeSet`] stores `(from, to, value)` ranges sorted by `from`, then by
//! the value's start side. It backs everything that annotates document
//! positions — decorations, folded regions, diagnostics, marks — and supports
//! the operations those consumers need: cheap iteration, overlap queries,
//! incremental updates, and mapping the whole set through a document change.
//!
//! # Sides and points
//!
//! Sides break ties between ranges touching at one position: a negative side
//! sorts before a positive one at the same `from`. Ranges whose value reports
//! [`RangeValue::is_point`] represent atomic content (a folded region, a
//! widget); non-point ranges represent spans of styled content. Ranges with
//! equal `(from, start_side)` keep insertion order, both in the set and
//! through [`RangeSet::map`].
//!
//! # Storage
//!
//! Ranges live in bounded-size chunks, each caching the maximum end position
//! it contains, so `between` and `iter` can skip whole chunks. Mapping walks
//! the ranges once, in order, tracking each endpoint through the change's
//! runs. Sets are persistent: `map` and `update` build new sets sharing
//! nothing mutable with the old (values are cheap clones).

use std::sync::Arc;

use thiserror::Error;

use crate::change::{
  Assoc,
  ChangeDesc,
  ChangeError,
  MapMode,
};

pub type Result<T> = std::result::Result<T, RangeSetError>;

/// Ranges per chunk. Bounded so per-chunk scans stay cheap.
const CHUNK_SIZE: usize = 250;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RangeSetError {
  #[error("range {from}..{to} added out of order (previous start {prev})")]
  OutOfOrder {
    from: usize,
    to:   usize,
    prev: usize,
  },
  #[error("invalid range: start {from} is after end {to}")]
  InvalidRange { from: usize, to: usize },
  #[error(transparent)]
  Change(#[from] ChangeError),
}

/// The value carried by a range. Sides, pointness, and map mode are
/// properties of the value so that one definition covers every instance.
pub trait RangeValue: Clone + PartialEq {
  /// Tie-break for this range's start against other ranges at the same
  /// position. Negative means "before", positive "after".
  fn start_side(&self) -> i32 {
    0
  }

  /// Tie-break for this range's end.
  fn end_side(&self) -> i32 {
    0
  }

  /// Point ranges represent atomic content and survive collapsing to zero
  /// length.
  fn is_point(&self) -> bool {
    false
  }

  /// How this range's endpoints track deletions when mapped.
  fn map_mode(&self) -> MapMode {
    MapMode::Simple
  }
}

/// A value with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRange<T> {
  pub from:  usize,
  pub to:    usize,
  pub value: T,
}

impl<T> ValueRange<T> {
  pub fn new(from: usize, to: usize, value: T) -> Self {
    Self { from, to, value }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Chunk<T> {
  ranges:  Arc<Vec<ValueRange<T>>>,
  /// Largest `to` in this chunk; lets queries skip chunks wholesale.
  max_end: usize,
}

/// A persistent, ordered collection of value-carrying ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet<T: RangeValue> {
  chunks: Vec<Chunk<T>>,
  size:   usize,
}

impl<T: RangeValue> Default for RangeSet<T> {
  fn default() -> Self {
    Self {
      chunks: Vec::new(),
      size:   0,
    }
  }
}

/// Parameters for [`RangeSet::update`]. The filter and the additions are
/// merged in a single pass over the set.
pub struct RangeSetUpdate<'a, T> {
  /// Ranges to add.
  pub add:         Vec<ValueRange<T>>,
  /// Whether `add` still needs sorting. When false it must already be
  /// sorted by `(from, start_side)`.
  pub sort:        bool,
  /// Predicate deciding which existing ranges to keep.
  #[allow(clippy::type_complexity)]
  pub filter:      Option<Box<dyn FnMut(usize, usize, &T) -> bool + 'a>>,
  /// The filter only runs on ranges touching `filter_from..=filter_to`.
  pub filter_from: usize,
  pub filter_to:   usize,
}

impl<T> Default for RangeSetUpdate<'_, T> {
  fn default() -> Self {
    Self {
      add:         Vec::new(),
      sort:        false,
      filter:      None,
      filter_from: 0,
      filter_to:   usize::MAX,
    }
  }
}

impl<T: RangeValue> RangeSet<T> {
  pub fn empty() -> Self {
    Self::default()
  }

  /// Build a set from a list of ranges. With `sort` false the list must
  /// already be ordered by `(from, start_side)`.
  pub fn of(mut ranges: Vec<ValueRange<T>>, sort: bool) -> Result<Self> {
    if sort {
      ranges.sort_by_key(|r| (r.from, r.value.start_side()));
    }
    let mut builder = RangeSetBuilder::new();
    for range in ranges {
      builder.add(range.from, range.to, range.value)?;
    }
    Ok(builder.finish())
  }

  /// Number of ranges in the set.
  pub fn size(&self) -> usize {
    self.size
  }

  pub fn is_empty(&self) -> bool {
    self.size == 0
  }

  /// A cursor over the ranges, skipping those that end before `from`.
  pub fn iter(&self, from: usize) -> RangeSetIter<'_, T> {
    let mut iter = RangeSetIter {
      set:   self,
      chunk: 0,
      index: 0,
    };
    iter.skip_before(from);
    iter
  }

  /// Call `f` for every range overlapping `from..=to`, in order. Returning
  /// `false` stops the traversal.
  pub fn between(&self, from: usize, to: usize, mut f: impl FnMut(usize, usize, &T) -> bool) {
    for chunk in &self.chunks {
      if chunk.max_end < from {
        continue;
      }
      match chunk.ranges.first() {
        Some(first) if first.from > to => break,
        _ => {},
      }
      for range in chunk.ranges.iter() {
        if range.from > to {
          return;
        }
        if range.to >= from && !f(range.from, range.to, &range.value) {
          return;
        }
      }
    }
  }

  /// Map every range through a change description.
  ///
  /// Endpoints map with the association given by their side (non-positive
  /// sides stay before insertions). A range is dropped when it maps
  /// backwards, when a non-point, previously non-empty range collapses to
  /// zero length, or when its value tracks deletions and an endpoint landed
  /// strictly inside one. Relative order of ranges with equal mapped
  /// `(from, start_side)` is preserved.
  pub fn map(&self, changes: &ChangeDesc) -> Result<Self> {
    if changes.is_empty() {
      return Ok(self.clone());
    }

    let mut builder = RangeSetBuilder::new();
    // Mapped ranges can land out of builder order when neighbours collapse,
    // so collect and re-sort stably.
    let mut mapped: Vec<ValueRange<T>> = Vec::with_capacity(self.size);

    for chunk in &self.chunks {
      for range in chunk.ranges.iter() {
        let mode = range.value.map_mode();
        let from_assoc = if range.value.start_side() <= 0 {
          Assoc::Before
        } else {
          Assoc::After
        };
        let to_assoc = if range.value.end_side() <= 0 {
          Assoc::Before
        } else {
          Assoc::After
        };
        let (Some(from), Some(to)) = (
          changes.map_pos_mode(range.from, from_assoc, mode)?,
          changes.map_pos_mode(range.to, to_assoc, mode)?,
        ) else {
          continue;
        };
        if from > to {
          continue;
        }
        if from == to && range.from < range.to && !range.value.is_point() {
          continue;
        }
        mapped.push(ValueRange::new(from, to, range.value.clone()));
      }
    }

    mapped.sort_by_key(|r| (r.from, r.value.start_side()));
    for range in mapped {
      builder.add(range.from, range.to, range.value)?;
    }
    Ok(builder.finish())
  }

  /// Add and remove ranges in one pass.
  pub fn update(&self, update: RangeSetUpdate<'_, T>) -> Result<Self> {
    let RangeSetUpdate {
      mut add,
      sort,
      mut filter,
      filter_from,
      filter_to,
    } = update;

    if sort {
      add.sort_by_key(|r| (r.from, r.value.start_side()));
    }

    let mut builder = RangeSetBuilder::new();
    let mut add = add.into_iter().peekable();

    let mut push_added_before = |builder: &mut RangeSetBuilder<T>,
                                 limit: Option<(usize, i32)>|
     -> Result<()> {
      while let Some(next) = add.peek() {
        let within = match limit {
          Some((from, side)) => {
            (next.from, next.value.start_side()) <= (from, side)
          },
          None => true,
        };
        if !within {
          break;
        }
        let next = add.next().expect("peeked element exists");
        builder.add(next.from, next.to, next.value)?;
      }
      Ok(())
    };

    for chunk in &self.chunks {
      for range in chunk.ranges.iter() {
        if let Some(filter) = filter.as_mut() {
          let in_filter_window = range.from <= filter_to && range.to >= filter_from;
          if in_filter_window && !filter(range.from, range.to, &range.value) {
            continue;
          }
        }
        push_added_before(
          &mut builder,
          Some((range.from, range.value.start_side())),
        )?;
        builder.add(range.from, range.to, range.value.clone())?;
      }
    }
    push_added_before(&mut builder, None)?;

    Ok(builder.finish())
  }

  /// Structural equality: same ranges in the same order with equal values.
  pub fn eq(&self, other: &Self) -> bool {
    self.size == other.size
      && self
        .ranges()
        .zip(other.ranges())
        .all(|(a, b)| a.from == b.from && a.to == b.to && a.value == b.value)
  }

  /// Lifted equality over lists of sets, comparing their merged contents.
  pub fn eq_sets(a: &[&Self], b: &[&Self]) -> bool {
    let merged = |sets: &[&Self]| {
      let mut all: Vec<ValueRange<T>> = sets
        .iter()
        .flat_map(|set| set.ranges().cloned())
        .collect();
      all.sort_by_key(|r| (r.from, r.value.start_side()));
      all
    };
    let a = merged(a);
    let b = merged(b);
    a.len() == b.len()
      && a
        .iter()
        .zip(b.iter())
        .all(|(x, y)| x.from == y.from && x.to == y.to && x.value == y.value)
  }

  /// Union a list of compatible sets into one.
  pub fn join(sets: &[&Self]) -> Result<Self> {
    let mut all: Vec<ValueRange<T>> = sets
      .iter()
      .flat_map(|set| set.ranges().cloned())
      .collect();
    all.sort_by_key(|r| (r.from, r.value.start_side()));
    Self::of(all, false)
  }

  fn ranges(&self) -> impl Iterator<Item = &ValueRange<T>> {
    self.chunks.iter().flat_map(|chunk| chunk.ranges.iter())
  }

  /// Flatten several sets over a window into maximal sub-spans and points.
  ///
  /// For every maximal subrange of `from..to` on which the set of active
  /// non-point ranges is constant, `iterator.span` is called with the active
  /// values and the number of them that opened before the span starts. Point
  /// ranges produce `iterator.point` events and consume the spans they
  /// cover; `index` is the point's ordinal among emitted points.
  pub fn spans(sets: &[&Self], from: usize, to: usize, iterator: &mut dyn SpanIterator<T>) {
    let mut spans: Vec<&ValueRange<T>> = Vec::new();
    let mut points: Vec<&ValueRange<T>> = Vec::new();
    for set in sets {
      for range in set.ranges() {
        if range.from > to || range.to < from {
          continue;
        }
        if range.value.is_point() {
          points.push(range);
        } else {
          spans.push(range);
        }
      }
    }
    points.sort_by_key(|r| (r.from, r.value.start_side()));
    spans.sort_by_key(|r| (r.from, r.value.start_side()));

    // Positions where the active set can change.
    let mut cuts: Vec<usize> = Vec::new();
    cuts.push(from);
    cuts.push(to);
    for range in &spans {
      cuts.push(range.from.clamp(from, to));
      cuts.push(range.to.clamp(from, to));
    }
    for range in &points {
      cuts.push(range.from.clamp(from, to));
      cuts.push(range.to.clamp(from, to));
    }
    cuts.sort_unstable();
    cuts.dedup();

    let active_at = |a: usize, b: usize| -> Vec<&T> {
      spans
        .iter()
        .filter(|r| r.from <= a && r.to >= b && (r.from < r.to || (a == b && r.from == a)))
        .map(|r| &r.value)
        .collect()
    };
    let open_count = |active_from: usize, at: usize| -> usize {
      spans
        .iter()
        .filter(|r| r.from <= at && r.to > at && r.from < active_from)
        .count()
    };

    let mut point_index = 0;
    let mut point_iter = points.iter().peekable();
    let mut pos = from;
    for window in cuts.windows(2) {
      let (a, b) = (window[0], window[1]);
      // Points at this boundary fire first and consume what they cover.
      while let Some(point) = point_iter.peek() {
        if point.from.clamp(from, to) > a {
          break;
        }
        let point = point_iter.next().expect("peeked element exists");
        let p_from = point.from.clamp(from, to);
        let p_to = point.to.clamp(from, to);
        let active = active_at(p_from, p_from);
        iterator.point(
          p_from,
          p_to,
          &point.value,
          &active,
          open_count(p_from, p_from),
          point_index,
        );
        point_index += 1;
        pos = pos.max(p_to);
      }
      if b <= pos || a < pos {
        continue;
      }
      let active = active_at(a, b);
      if a < b {
        iterator.span(a, b, &active, open_count(a, a));
        pos = b;
      }
    }
    // Trailing points at the window end.
    for point in point_iter {
      let p_from = point.from.clamp(from, to);
      let p_to = point.to.clamp(from, to);
      let active = active_at(p_from, p_from);
      iterator.point(
        p_from,
        p_to,
        &point.value,
        &active,
        open_count(p_from, p_from),
        point_index,
      );
      point_index += 1;
    }
  }
}

/// Consumer of [`RangeSet::spans`] events.
pub trait SpanIterator<T: RangeValue> {
  fn span(&mut self, from: usize, to: usize, active: &[&T], open_start: usize);

  fn point(
    &mut self,
    from: usize,
    to: usize,
    value: &T,
    active: &[&T],
    open_start: usize,
    index: usize,
  );
}

/// Forward cursor over a [`RangeSet`].
pub struct RangeSetIter<'a, T: RangeValue> {
  set:   &'a RangeSet<T>,
  chunk: usize,
  index: usize,
}

impl<'a, T: RangeValue> RangeSetIter<'a, T> {
  fn skip_before(&mut self, from: usize) {
    while self.chunk < self.set.chunks.len() {
      let chunk = &self.set.chunks[self.chunk];
      if chunk.max_end >= from {
        break;
      }
      self.chunk += 1;
    }
    while let Some(range) = self.peek() {
      if range.to >= from {
        break;
      }
      self.advance();
    }
  }

  fn peek(&self) -> Option<&'a ValueRange<T>> {
    self.set.chunks.get(self.chunk)?.ranges.get(self.index)
  }

  fn advance(&mut self) {
    self.index += 1;
    while let Some(chunk) = self.set.chunks.get(self.chunk) {
      if self.index < chunk.ranges.len() {
        break;
      }
      self.chunk += 1;
      self.index = 0;
    }
  }
}

impl<'a, T: RangeValue> Iterator for RangeSetIter<'a, T> {
  type Item = &'a ValueRange<T>;

  fn next(&mut self) -> Option<Self::Item> {
    let item = self.peek()?;
    self.advance();
    Some(item)
  }
}

/// Collects ranges in sorted order in amortized O(n).
pub struct RangeSetBuilder<T: RangeValue> {
  chunks:    Vec<Chunk<T>>,
  current:   Vec<ValueRange<T>>,
  max_end:   usize,
  size:      usize,
  last_from: usize,
  last_side: i32,
}

impl<T: RangeValue> Default for RangeSetBuilder<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: RangeValue> RangeSetBuilder<T> {
  pub fn new() -> Self {
    Self {
      chunks:    Vec::new(),
      current:   Vec::new(),
      max_end:   0,
      size:      0,
      last_from: 0,
      last_side: i32::MIN,
    }
  }

  /// Add a range. Ranges must arrive sorted by `(from, start_side)`.
  pub fn add(&mut self, from: usize, to: usize, value: T) -> Result<()> {
    if from > to {
      return Err(RangeSetError::InvalidRange { from, to });
    }
    let side = value.start_side();
    if (from, side) < (self.last_from, self.last_side) {
      return Err(RangeSetError::OutOfOrder {
        from,
        to,
        prev: self.last_from,
      });
    }
    self.last_from = from;
    self.last_side = side;
    self.max_end = self.max_end.max(to);
    self.size += 1;
    self.current.push(ValueRange::new(from, to, value));
    if self.current.len() >= CHUNK_SIZE {
      self.flush();
    }
    Ok(())
  }

  fn flush(&mut self) {
    if self.current.is_empty() {
      return;
    }
    let ranges = std::mem::take(&mut self.current);
    self.chunks.push(Chunk {
      ranges:  Arc::new(ranges),
      max_end: self.max_end,
    });
    self.max_end = 0;
  }

  pub fn finish(mut self) -> RangeSet<T> {
    self.flush();
    RangeSet {
      chunks: self.chunks,
      size:   self.size,
    }
  }
}

#[cfg(test)]
mod test {
  use crate::change::ChangeSet;

  use super::*;

  #[derive(Debug, Clone, PartialEq, Eq)]
  struct Mark(&'static str);

  impl RangeValue for Mark {}

  #[derive(Debug, Clone, PartialEq, Eq)]
  struct Tracked;

  impl RangeValue for Tracked {
    fn map_mode(&self) -> MapMode {
      MapMode::TrackDel
    }
  }

  #[derive(Debug, Clone, PartialEq, Eq)]
  struct Fold;

  impl RangeValue for Fold {
    fn is_point(&self) -> bool {
      true
    }
  }

  fn marks(ranges: Vec<(usize, usize, &'static str)>) -> RangeSet<Mark> {
    RangeSet::of(
      ranges
        .into_iter()
        .map(|(from, to, name)| ValueRange::new(from, to, Mark(name)))
        .collect(),
      true,
    )
    .unwrap()
  }

  fn positions<T: RangeValue>(set: &RangeSet<T>) -> Vec<(usize, usize)> {
    set.iter(0).map(|r| (r.from, r.to)).collect()
  }

  #[test]
  fn builder_requires_order() {
    let mut builder = RangeSetBuilder::new();
    builder.add(0, 5, Mark("a")).unwrap();
    builder.add(10, 15, Mark("b")).unwrap();
    assert!(matches!(
      builder.add(5, 7, Mark("c")),
      Err(RangeSetError::OutOfOrder { .. })
    ));
  }

  #[test]
  fn between_visits_overlapping() {
    let set = marks(vec![(0, 5, "a"), (4, 8, "b"), (10, 12, "c")]);
    let mut seen = Vec::new();
    set.between(4, 9, |from, to, value| {
      seen.push((from, to, value.0));
      true
    });
    assert_eq!(seen, vec![(0, 5, "a"), (4, 8, "b")]);

    // early stop
    let mut count = 0;
    set.between(0, 20, |_, _, _| {
      count += 1;
      false
    });
    assert_eq!(count, 1);
  }

  #[test]
  fn iter_skips_ranges_ending_before_start() {
    let set = marks(vec![(0, 2, "a"), (3, 6, "b"), (8, 9, "c")]);
    let seen: Vec<_> = set.iter(3).map(|r| r.value.0).collect();
    assert_eq!(seen, vec!["b", "c"]);
  }

  #[test]
  fn map_through_insertion() {
    // Spec scenario: [(0,5),(10,15)] with 3 chars inserted at 3.
    let set = marks(vec![(0, 5, "a"), (10, 15, "b")]);
    let changes = ChangeSet::of(vec![(3, 3, Some("xyz".into()))], 20).unwrap();
    let mapped = set.map(&changes.desc()).unwrap();
    assert_eq!(positions(&mapped), vec![(0, 8), (13, 18)]);
  }

  #[test]
  fn map_preserves_order_and_identity_on_empty() {
    let set = marks(vec![(0, 5, "a"), (2, 3, "b"), (4, 9, "c")]);
    let empty = ChangeDesc::empty(20);
    let mapped = set.map(&empty).unwrap();
    assert!(set.eq(&mapped));
    assert!(RangeSet::eq_sets(&[&set], &[&mapped]));

    let changes = ChangeSet::of(vec![(1, 1, Some("q".into())), (6, 8, None)], 20).unwrap();
    let mapped = set.map(&changes.desc()).unwrap();
    let froms: Vec<_> = mapped.iter(0).map(|r| r.from).collect();
    let mut sorted = froms.clone();
    sorted.sort_unstable();
    assert_eq!(froms, sorted);
  }

  #[test]
  fn map_drops_collapsed_non_points() {
    let set = marks(vec![(2, 4, "a")]);
    let changes = ChangeSet::of(vec![(2, 4, None)], 10).unwrap();
    let mapped = set.map(&changes.desc()).unwrap();
    assert!(mapped.is_empty());

    // a point at the same place survives
    let folds = RangeSet::of(vec![ValueRange::new(2, 4, Fold)], false).unwrap();
    let mapped = folds.map(&changes.desc()).unwrap();
    assert_eq!(positions(&mapped), vec![(2, 2)]);

    // an empty range stays empty rather than being dropped
    let set = marks(vec![(5, 5, "cursor")]);
    let changes = ChangeSet::of(vec![(0, 1, None)], 10).unwrap();
    let mapped = set.map(&changes.desc()).unwrap();
    assert_eq!(positions(&mapped), vec![(4, 4)]);
  }

  #[test]
  fn track_del_drops_ranges_touching_deletions() {
    let set = RangeSet::of(vec![ValueRange::new(2, 6, Tracked)], false).unwrap();

    // deletion strictly covering an endpoint drops the range
    let changes = ChangeSet::of(vec![(1, 4, None)], 10).unwrap();
    assert!(set.map(&changes.desc()).unwrap().is_empty());

    // deletion elsewhere keeps it
    let changes = ChangeSet::of(vec![(7, 9, None)], 10).unwrap();
    assert_eq!(positions(&set.map(&changes.desc()).unwrap()), vec![(2, 6)]);
  }

  #[test]
  fn update_filters_and_adds_in_one_pass() {
    let set = marks(vec![(0, 2, "a"), (4, 6, "b"), (8, 10, "c")]);
    let updated = set
      .update(RangeSetUpdate {
        add: vec![ValueRange::new(5, 7, Mark("new"))],
        sort: true,
        filter: Some(Box::new(|_, _, value: &Mark| value.0 != "b")),
        ..Default::default()
      })
      .unwrap();
    let names: Vec<_> = updated.iter(0).map(|r| r.value.0).collect();
    assert_eq!(names, vec!["a", "new", "c"]);
  }

  #[test]
  fn update_filter_window_limits_removal() {
    let set = marks(vec![(0, 2, "a"), (4, 6, "b"), (8, 10, "c")]);
    let updated = set
      .update(RangeSetUpdate {
        filter: Some(Box::new(|_, _, _| false)),
        filter_from: 3,
        filter_to: 7,
        ..Default::default()
      })
      .unwrap();
    let names: Vec<_> = updated.iter(0).map(|r| r.value.0).collect();
    assert_eq!(names, vec!["a", "c"]);
  }

  #[test]
  fn join_unions_sets() {
    let a = marks(vec![(0, 2, "a"), (8, 9, "c")]);
    let b = marks(vec![(3, 5, "b")]);
    let joined = RangeSet::join(&[&a, &b]).unwrap();
    let names: Vec<_> = joined.iter(0).map(|r| r.value.0).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
  }

  #[test]
  fn chunking_handles_large_sets() {
    let ranges: Vec<_> = (0..1000)
      .map(|i| ValueRange::new(i * 2, i * 2 + 1, Mark("x")))
      .collect();
    let set = RangeSet::of(ranges, false).unwrap();
    assert_eq!(set.size(), 1000);
    assert_eq!(set.iter(0).count(), 1000);
    assert_eq!(set.iter(1001).count(), 500);

    let mut seen = 0;
    set.between(500, 700, |_, _, _| {
      seen += 1;
      true
    });
    assert_eq!(seen, 101);
  }

  struct Collector {
    events: Vec<String>,
  }

  impl SpanIterator<Mark> for Collector {
    fn span(&mut self, from: usize, to: usize, active: &[&Mark], open_start: usize) {
      let names: Vec<_> = active.iter().map(|m| m.0).collect();
      self
        .events
        .push(format!("span {from}-{to} [{}] open {open_start}", names.join(",")));
    }

    fn point(
      &mut self,
      from: usize,
      to: usize,
      value: &Mark,
      _active: &[&Mark],
      _open_start: usize,
      index: usize,
    ) {
      self
        .events
        .push(format!("point {from}-{to} {} #{index}", value.0));
    }
  }

  #[test]
  fn spans_flattens_overlaps() {
    let a = marks(vec![(0, 4, "a")]);
    let b = marks(vec![(2, 6, "b")]);
    let mut collector = Collector { events: Vec::new() };
    RangeSet::spans(&[&a, &b], 0, 8, &mut collector);
    assert_eq!(collector.events, vec![
      "span 0-2 [a] open 0",
      "span 2-4 [a,b] open 1",
      "span 4-6 [b] open 1",
      "span 6-8 [] open 0",
    ]);
  }

  #[test]
  fn spans_reports_open_start_for_clipped_window() {
    let a = marks(vec![(0, 10, "a")]);
    let mut collector = Collector { events: Vec::new() };
    RangeSet::spans(&[&a], 4, 8, &mut collector);
    assert_eq!(collector.events, vec!["span 4-8 [a] open 1"]);
  }
}
