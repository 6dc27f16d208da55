//! Undo history, built entirely on the public kernel surface.
//!
//! The history is a [`StateField`] holding two stacks of events. Every
//! document-changing transaction (unless it opts out through the
//! `add_to_history` annotation) pushes an event carrying the inverted
//! changes and the selection before the change. Consecutive edits within
//! the configured delay are composed into one event, so a burst of typing
//! undoes as a unit.
//!
//! [`undo`] and [`redo`] build [`TransactionSpec`]s that apply the stored
//! inversion; the field recognizes them by annotation and moves the event to
//! the opposite stack, storing the inversion of the undo itself so the
//! operation round-trips.
//!
//! Transactions that change the document but opt out of history act as a
//! barrier: stored inversions no longer apply to the new document, so both
//! stacks are cleared.

use std::sync::OnceLock;

use crate::{
  change::ChangeSet,
  extension::Extension,
  field::StateField,
  selection::Selection,
  state::EditorState,
  transaction::{
    AnnotationType,
    Transaction,
    TransactionSpec,
    add_to_history_annotation,
    time_annotation,
  },
};

/// Milliseconds between edits that still group into one undo event.
const DEFAULT_GROUP_DELAY: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistorySide {
  Undo,
  Redo,
}

fn from_history_annotation() -> &'static AnnotationType<HistorySide> {
  static TYPE: OnceLock<AnnotationType<HistorySide>> = OnceLock::new();
  TYPE.get_or_init(AnnotationType::define)
}

#[derive(Debug, Clone)]
struct HistEvent {
  /// The changes that revert the recorded edit, applying to the document
  /// as it stands when the event is on top of its stack.
  changes:   ChangeSet,
  /// The selection before the recorded edit.
  selection: Selection,
  time:      u64,
}

#[derive(Debug, Clone, Default)]
struct HistoryState {
  done:   Vec<HistEvent>,
  undone: Vec<HistEvent>,
}

fn history_field() -> &'static StateField<HistoryState> {
  static FIELD: OnceLock<StateField<HistoryState>> = OnceLock::new();
  FIELD.get_or_init(|| StateField::define(|_| HistoryState::default(), apply))
}

fn apply(value: &HistoryState, tr: &Transaction) -> HistoryState {
  let mut state = value.clone();

  if let Some(side) = tr.annotation(from_history_annotation()) {
    // An undo or redo: move the top event across, replacing its changes
    // with the inversion of what was just applied.
    let (from, to) = match side {
      HistorySide::Undo => (&mut state.done, &mut state.undone),
      HistorySide::Redo => (&mut state.undone, &mut state.done),
    };
    if let Some(event) = from.pop() {
      if let Ok(inverted) = tr.changes().invert(tr.start_state().doc()) {
        to.push(HistEvent {
          changes:   inverted,
          selection: tr.start_state().selection().clone(),
          time:      event.time,
        });
      }
    }
    return state;
  }

  if !tr.doc_changed() {
    return state;
  }

  if tr.annotation(add_to_history_annotation()) == Some(&false) {
    // Unrecorded document changes invalidate the stored inversions.
    state.done.clear();
    state.undone.clear();
    return state;
  }

  let Ok(inverted) = tr.changes().invert(tr.start_state().doc()) else {
    return state;
  };
  let time = tr.annotation(time_annotation()).copied().unwrap_or(0);

  state.undone.clear();
  let group = state
    .done
    .last()
    .is_some_and(|event| time.saturating_sub(event.time) < DEFAULT_GROUP_DELAY);
  if group {
    let previous = state.done.pop().expect("grouping implies a previous event");
    if let Ok(composed) = inverted.compose(&previous.changes) {
      state.done.push(HistEvent {
        changes: composed,
        selection: previous.selection,
        time,
      });
      return state;
    }
    state.done.push(previous);
  }
  state.done.push(HistEvent {
    changes: inverted,
    selection: tr.start_state().selection().clone(),
    time,
  });
  state
}

/// The extension that records history for a state.
pub fn history() -> Extension {
  history_field().extension()
}

/// How many undoable events a state currently holds.
pub fn undo_depth(state: &EditorState) -> usize {
  state
    .field(history_field())
    .map(|history| history.done.len())
    .unwrap_or(0)
}

pub fn redo_depth(state: &EditorState) -> usize {
  state
    .field(history_field())
    .map(|history| history.undone.len())
    .unwrap_or(0)
}

/// A spec undoing the latest recorded event, or `None` when there is
/// nothing to undo (or history is not configured).
pub fn undo(state: &EditorState) -> Option<TransactionSpec> {
  from_stack(state, HistorySide::Undo)
}

/// A spec re-applying the latest undone event.
pub fn redo(state: &EditorState) -> Option<TransactionSpec> {
  from_stack(state, HistorySide::Redo)
}

fn from_stack(state: &EditorState, side: HistorySide) -> Option<TransactionSpec> {
  let history = state.field(history_field())?;
  let event = match side {
    HistorySide::Undo => history.done.last()?,
    HistorySide::Redo => history.undone.last()?,
  };
  Some(
    TransactionSpec::new()
      .with_changes(event.changes.clone())
      .with_selection(event.selection.clone())
      .with_annotation(from_history_annotation().of(side))
      .with_annotation(add_to_history_annotation().of(false)),
  )
}

#[cfg(test)]
mod test {
  use std::sync::{
    Arc,
    atomic::{
      AtomicU64,
      Ordering,
    },
  };

  use super::*;
  use crate::state::{
    ClockFn,
    StateConfig,
    clock,
  };

  fn setup(doc: &str) -> (EditorState, Arc<AtomicU64>) {
    let now = Arc::new(AtomicU64::new(0));
    let source = now.clone();
    let tick: ClockFn = Arc::new(move || source.load(Ordering::Relaxed));
    let state = EditorState::create(
      StateConfig::new()
        .with_doc_str(doc)
        .with_extensions(vec![history(), clock().of(tick)]),
    )
    .unwrap();
    (state, now)
  }

  fn insert(state: &EditorState, pos: usize, text: &str) -> EditorState {
    state
      .update(vec![
        TransactionSpec::new().with_changes(vec![(pos, pos, Some(text.into()))]),
      ])
      .unwrap()
      .state()
      .clone()
  }

  #[test]
  fn undo_redo_round_trip() {
    let (state, now) = setup("base");
    now.store(1_000, Ordering::Relaxed);
    let state = insert(&state, 4, "!");
    assert_eq!(state.doc().to_string(), "base!");
    assert_eq!(undo_depth(&state), 1);

    let spec = undo(&state).unwrap();
    let state = state.update(vec![spec]).unwrap().state().clone();
    assert_eq!(state.doc().to_string(), "base");
    assert_eq!(undo_depth(&state), 0);
    assert_eq!(redo_depth(&state), 1);

    let spec = redo(&state).unwrap();
    let state = state.update(vec![spec]).unwrap().state().clone();
    assert_eq!(state.doc().to_string(), "base!");
    assert_eq!(undo_depth(&state), 1);
    assert_eq!(redo_depth(&state), 0);
  }

  #[test]
  fn rapid_edits_group_into_one_event() {
    let (state, now) = setup("");
    now.store(1_000, Ordering::Relaxed);
    let state = insert(&state, 0, "a");
    now.store(1_100, Ordering::Relaxed);
    let state = insert(&state, 1, "b");
    now.store(1_200, Ordering::Relaxed);
    let state = insert(&state, 2, "c");
    assert_eq!(state.doc().to_string(), "abc");
    assert_eq!(undo_depth(&state), 1);

    // A pause starts a new group.
    now.store(9_000, Ordering::Relaxed);
    let state = insert(&state, 3, "d");
    assert_eq!(undo_depth(&state), 2);

    let state = state.update(vec![undo(&state).unwrap()]).unwrap().state().clone();
    assert_eq!(state.doc().to_string(), "abc");
    let state = state.update(vec![undo(&state).unwrap()]).unwrap().state().clone();
    assert_eq!(state.doc().to_string(), "");
  }

  #[test]
  fn undo_restores_selection() {
    let (state, now) = setup("abcd");
    now.store(1_000, Ordering::Relaxed);
    let state = state
      .update(vec![
        TransactionSpec::new()
          .with_changes(vec![(0, 2, Some("X".into()))])
          .with_selection(Selection::cursor(1)),
      ])
      .unwrap()
      .state()
      .clone();
    assert_eq!(state.doc().to_string(), "Xcd");

    let state = state.update(vec![undo(&state).unwrap()]).unwrap().state().clone();
    assert_eq!(state.doc().to_string(), "abcd");
    assert_eq!(state.selection().main().head, 0);
  }

  #[test]
  fn new_edit_clears_redo() {
    let (state, now) = setup("");
    now.store(1_000, Ordering::Relaxed);
    let state = insert(&state, 0, "a");
    let state = state.update(vec![undo(&state).unwrap()]).unwrap().state().clone();
    assert_eq!(redo_depth(&state), 1);

    now.store(9_000, Ordering::Relaxed);
    let state = insert(&state, 0, "z");
    assert_eq!(redo_depth(&state), 0);
    assert!(redo(&state).is_none());
  }

  #[test]
  fn opt_out_acts_as_barrier() {
    let (state, now) = setup("");
    now.store(1_000, Ordering::Relaxed);
    let state = insert(&state, 0, "a");
    assert_eq!(undo_depth(&state), 1);

    let state = state
      .update(vec![
        TransactionSpec::new()
          .with_changes(vec![(1, 1, Some("b".into()))])
          .with_annotation(add_to_history_annotation().of(false)),
      ])
      .unwrap()
      .state()
      .clone();
    assert_eq!(state.doc().to_string(), "ab");
    assert_eq!(undo_depth(&state), 0);
    assert!(undo(&state).is_none());
  }
}
