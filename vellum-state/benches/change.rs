//! Benchmarks for change-set operations in vellum-state.
//!
//! Run with: `cargo bench -p vellum-state --bench change`

use divan::{
  Bencher,
  black_box,
};
use smallvec::SmallVec;
use vellum_state::{
  Tendril,
  change::{
    Assoc,
    Change,
    ChangeSet,
  },
  selection::{
    Selection,
    SelectionRange,
  },
  text::Text,
};

fn main() {
  divan::main();
}

fn make_ascii_text(size: usize) -> String {
  let line = "The quick brown fox jumps over the lazy dog. ";
  let mut s = String::with_capacity(size);
  while s.len() < size {
    s.push_str(line);
  }
  s.truncate(size);
  s
}

fn make_doc(size: usize) -> Text {
  Text::from_str(&make_ascii_text(size))
}

fn clamp_count(len: usize, count: usize, span: usize) -> usize {
  let max = if span == 0 { len } else { len / (span + 1) };
  count.min(max.max(1))
}

fn make_changes(len: usize, count: usize, span: usize, insert: &str) -> Vec<Change> {
  let count = clamp_count(len, count, span);
  let step = len / (count + 1);
  let mut changes = Vec::with_capacity(count);
  let insert = Tendril::from(insert);

  for i in 0..count {
    let start = (i + 1) * step;
    let end = (start + span).min(len);
    changes.push((start, end, Some(insert.clone())));
  }

  changes
}

fn make_point_selection(doc: &Text, count: usize) -> Selection {
  let len = doc.len();
  let count = clamp_count(len, count, 0);
  let step = len / (count + 1);
  let mut ranges = SmallVec::with_capacity(count);

  for i in 0..count {
    let pos = ((i + 1) * step).min(len);
    ranges.push(SelectionRange::cursor(pos));
  }

  Selection::create(ranges, 0).unwrap()
}

// `ChangeSet::of` benchmarks.

mod of {
  use super::*;

  const SIZE: usize = 100 * 1024;
  const SPAN: usize = 3;

  #[divan::bench(args = [1, 8, 64])]
  fn replace_ranges(bencher: Bencher, count: usize) {
    let doc = make_doc(SIZE);
    let changes = make_changes(doc.len(), count, SPAN, "xyz");

    bencher.bench(|| {
      let set = ChangeSet::of(black_box(changes.iter().cloned()), black_box(doc.len())).unwrap();
      black_box(set);
    });
  }
}

// `ChangeSet::apply` benchmarks.

mod apply {
  use super::*;

  const SPAN: usize = 3;

  #[divan::bench]
  fn small(bencher: Bencher) {
    let doc = make_doc(4 * 1024);
    let changes = make_changes(doc.len(), 8, SPAN, "x");
    let set = ChangeSet::of(changes, doc.len()).unwrap();

    bencher.bench(|| {
      let next = set.apply(black_box(&doc)).unwrap();
      black_box(next);
    });
  }

  #[divan::bench]
  fn medium(bencher: Bencher) {
    let doc = make_doc(100 * 1024);
    let changes = make_changes(doc.len(), 32, SPAN, "x");
    let set = ChangeSet::of(changes, doc.len()).unwrap();

    bencher.bench(|| {
      let next = set.apply(black_box(&doc)).unwrap();
      black_box(next);
    });
  }

  #[divan::bench]
  fn large(bencher: Bencher) {
    let doc = make_doc(1024 * 1024);
    let changes = make_changes(doc.len(), 64, SPAN, "x");
    let set = ChangeSet::of(changes, doc.len()).unwrap();

    bencher.bench(|| {
      let next = set.apply(black_box(&doc)).unwrap();
      black_box(next);
    });
  }
}

// `ChangeSet::compose` benchmarks.

mod compose {
  use super::*;

  const SIZE: usize = 100 * 1024;
  const SPAN: usize = 3;

  #[divan::bench(args = [8, 64])]
  fn disjoint(bencher: Bencher, count: usize) {
    let doc = make_doc(SIZE);
    let a = ChangeSet::of(make_changes(doc.len(), count, SPAN, "xyz"), doc.len()).unwrap();
    let b = ChangeSet::of(
      make_changes(a.len_after(), count, SPAN, "q"),
      a.len_after(),
    )
    .unwrap();

    bencher.bench(|| {
      let composed = black_box(&a).compose(black_box(&b)).unwrap();
      black_box(composed);
    });
  }
}

// Position mapping benchmarks.

mod map_pos {
  use super::*;

  const SIZE: usize = 100 * 1024;
  const SPAN: usize = 3;

  #[divan::bench]
  fn single(bencher: Bencher) {
    let doc = make_doc(SIZE);
    let set = ChangeSet::of(make_changes(doc.len(), 32, SPAN, "x"), doc.len()).unwrap();
    let pos = doc.len() / 2;

    bencher.bench(|| {
      let mapped = set.map_pos(black_box(pos), Assoc::Before).unwrap();
      black_box(mapped);
    });
  }

  #[divan::bench(args = [1, 8, 64])]
  fn multi_cursor_selection(bencher: Bencher, count: usize) {
    let doc = make_doc(SIZE);
    let set = ChangeSet::of(make_changes(doc.len(), 32, SPAN, "x"), doc.len()).unwrap();
    let selection = make_point_selection(&doc, count);

    bencher.bench(|| {
      let mapped = selection.map(black_box(&set)).unwrap();
      black_box(mapped);
    });
  }
}
