//! Transactions: the atomic unit of state change.
//!
//! A [`TransactionSpec`] describes a desired update — changes, a new
//! selection, typed [`Effect`]s, [`Annotation`]s, scroll and filter flags.
//! [`EditorState::update`](crate::state::EditorState::update) merges one or
//! more specs into a draft, runs it through the change-filter and
//! transaction-filter chains and the extenders, applies the result, and
//! returns the finished [`Transaction`] carrying both the start and end
//! state.
//!
//! # Annotations and effects
//!
//! Annotations are opaque metadata: they classify a transaction (user event,
//! timestamp) but never touch state. Effects are typed messages that state
//! fields read to update themselves; each [`EffectType`] may carry a mapping
//! function that rebases the effect's value over document changes — a `None`
//! result drops the effect.
//!
//! # Merging specs
//!
//! By default every spec's positions refer to the start document; later
//! specs are rebased over the composed changes of earlier ones, and effects
//! are mapped into the coordinates of the combined result. A spec with
//! `sequential` set refers to the document produced by the preceding specs
//! and composes directly. These are the two shapes of
//! [`ChangeSet::map_desc`](crate::change::ChangeDesc::map_desc)-based
//! rebasing; `sequential` and `filter` are independent flags.

use std::{
  marker::PhantomData,
  sync::{
    Arc,
    OnceLock,
  },
};

use crate::{
  change::{
    Assoc,
    Change,
    ChangeDesc,
    ChangeSet,
  },
  facet::{
    DynValue,
    Facet,
    fresh_id,
  },
  selection::Selection,
  state::{
    EditorState,
    Result,
    StateError,
  },
  text::Text,
};

/// How many full transaction-filter passes may run before the update is
/// declared a runaway loop.
pub(crate) const MAX_FILTER_PASSES: usize = 10;

// Annotations.
//

/// A typed tag for transaction metadata.
pub struct AnnotationType<T> {
  id:      u64,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> AnnotationType<T> {
  pub fn define() -> Self {
    Self {
      id:      fresh_id(),
      _marker: PhantomData,
    }
  }

  /// Attach a value of this type to a transaction.
  pub fn of(&self, value: T) -> Annotation {
    Annotation {
      type_id: self.id,
      value:   Arc::new(value),
    }
  }
}

impl<T> Clone for AnnotationType<T> {
  fn clone(&self) -> Self {
    Self {
      id:      self.id,
      _marker: PhantomData,
    }
  }
}

/// Opaque metadata attached to a transaction. Never affects state.
#[derive(Clone)]
pub struct Annotation {
  type_id: u64,
  value:   DynValue,
}

impl Annotation {
  pub fn get<T: Send + Sync + 'static>(&self, type_: &AnnotationType<T>) -> Option<&T> {
    if self.type_id == type_.id {
      self.value.downcast_ref::<T>()
    } else {
      None
    }
  }
}

/// The user event that caused a transaction, e.g. `"input.type"` or
/// `"delete.selection"`.
pub fn user_event_annotation() -> &'static AnnotationType<String> {
  static TYPE: OnceLock<AnnotationType<String>> = OnceLock::new();
  TYPE.get_or_init(AnnotationType::define)
}

/// Milliseconds on the configured monotonic clock when the transaction was
/// built.
pub fn time_annotation() -> &'static AnnotationType<u64> {
  static TYPE: OnceLock<AnnotationType<u64>> = OnceLock::new();
  TYPE.get_or_init(AnnotationType::define)
}

/// Whether the transaction should be recorded by undo history.
pub fn add_to_history_annotation() -> &'static AnnotationType<bool> {
  static TYPE: OnceLock<AnnotationType<bool>> = OnceLock::new();
  TYPE.get_or_init(AnnotationType::define)
}

// Effects.
//

pub(crate) struct EffectTypeInner {
  pub(crate) id:  u64,
  map:            Arc<dyn Fn(&DynValue, &ChangeDesc) -> Option<DynValue> + Send + Sync>,
}

/// A typed kind of transaction effect.
pub struct EffectType<T> {
  pub(crate) inner: Arc<EffectTypeInner>,
  _marker:          PhantomData<fn() -> T>,
}

impl<T> Clone for EffectType<T> {
  fn clone(&self) -> Self {
    Self {
      inner:   self.inner.clone(),
      _marker: PhantomData,
    }
  }
}

impl<T: Send + Sync + 'static> EffectType<T> {
  /// Define an effect type whose values carry no positions: mapping over
  /// changes keeps them as they are.
  pub fn define() -> Self {
    Self {
      inner:   Arc::new(EffectTypeInner {
        id:  fresh_id(),
        map: Arc::new(|value, _| Some(value.clone())),
      }),
      _marker: PhantomData,
    }
  }

  /// Define an effect type with a mapping function, used when the effect is
  /// rebased over changes from earlier specs. Returning `None` drops the
  /// effect.
  pub fn define_mapped(
    map: impl Fn(&T, &ChangeDesc) -> Option<T> + Send + Sync + 'static,
  ) -> Self {
    Self {
      inner:   Arc::new(EffectTypeInner {
        id:  fresh_id(),
        map: Arc::new(move |value: &DynValue, changes: &ChangeDesc| {
          let value = value
            .downcast_ref::<T>()
            .expect("effect values are produced through this type's handle");
          map(value, changes).map(|mapped| Arc::new(mapped) as DynValue)
        }),
      }),
      _marker: PhantomData,
    }
  }

  /// Build an effect of this type.
  pub fn of(&self, value: T) -> Effect {
    Effect {
      type_: self.inner.clone(),
      value: Arc::new(value),
    }
  }
}

/// A typed message attached to a transaction.
#[derive(Clone)]
pub struct Effect {
  type_: Arc<EffectTypeInner>,
  value: DynValue,
}

impl Effect {
  /// Whether this effect is of the given type.
  pub fn is<T: Send + Sync + 'static>(&self, type_: &EffectType<T>) -> bool {
    self.type_.id == type_.inner.id
  }

  /// The value, when this effect is of the given type.
  pub fn value<T: Send + Sync + 'static>(&self, type_: &EffectType<T>) -> Option<&T> {
    if self.is(type_) {
      self.value.downcast_ref::<T>()
    } else {
      None
    }
  }

  /// Rebase this effect over document changes. `None` means the effect no
  /// longer applies.
  pub fn map(&self, changes: &ChangeDesc) -> Option<Effect> {
    if changes.is_empty() {
      return Some(self.clone());
    }
    (self.type_.map)(&self.value, changes).map(|value| {
      Effect {
        type_: self.type_.clone(),
        value,
      }
    })
  }

  /// Map a list of effects, dropping the ones whose mapping returns `None`.
  pub fn map_effects(effects: &[Effect], changes: &ChangeDesc) -> Vec<Effect> {
    effects
      .iter()
      .filter_map(|effect| effect.map(changes))
      .collect()
  }
}

// Filter and extender facets.
//

/// What a change filter decided about a draft transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilterResult {
  /// Let the changes through.
  Pass,
  /// Veto all changes in the transaction.
  Veto,
  /// Suppress the changes inside the given start-document ranges.
  Suppress(Vec<(usize, usize)>),
}

pub type ChangeFilterFn = Arc<dyn Fn(&Transaction) -> ChangeFilterResult + Send + Sync>;

/// Providers can veto individual byte ranges of a transaction's changes.
pub fn change_filter() -> &'static Facet<ChangeFilterFn> {
  static FACET: OnceLock<Facet<ChangeFilterFn>> = OnceLock::new();
  FACET.get_or_init(|| Facet::define_labeled("changeFilter"))
}

pub type TransactionFilterFn =
  Arc<dyn Fn(&Transaction) -> Option<Vec<TransactionSpec>> + Send + Sync>;

/// Providers can replace a draft transaction with different specs.
/// Returning `None` keeps the draft as is.
pub fn transaction_filter() -> &'static Facet<TransactionFilterFn> {
  static FACET: OnceLock<Facet<TransactionFilterFn>> = OnceLock::new();
  FACET.get_or_init(|| Facet::define_labeled("transactionFilter"))
}

/// Additions produced by a transaction extender.
#[derive(Default)]
pub struct ExtenderOutput {
  pub effects:     Vec<Effect>,
  pub annotations: Vec<Annotation>,
}

pub type TransactionExtenderFn = Arc<dyn Fn(&Transaction) -> ExtenderOutput + Send + Sync>;

/// Providers append annotations and effects to every transaction. Changes
/// and selections in extender output are ignored by design of the output
/// type.
pub fn transaction_extender() -> &'static Facet<TransactionExtenderFn> {
  static FACET: OnceLock<Facet<TransactionExtenderFn>> = OnceLock::new();
  FACET.get_or_init(|| Facet::define_labeled("transactionExtender"))
}

// Specs.
//

/// The changes part of a spec: raw edits or a prebuilt change set.
#[derive(Debug, Clone)]
pub enum ChangesSpec {
  Edits(Vec<Change>),
  Set(ChangeSet),
}

impl From<Vec<Change>> for ChangesSpec {
  fn from(edits: Vec<Change>) -> Self {
    ChangesSpec::Edits(edits)
  }
}

impl From<ChangeSet> for ChangesSpec {
  fn from(set: ChangeSet) -> Self {
    ChangesSpec::Set(set)
  }
}

/// A description of a desired state update.
#[derive(Clone)]
pub struct TransactionSpec {
  pub changes:          Option<ChangesSpec>,
  /// The selection after this spec's changes. When absent, the selection is
  /// derived by mapping the old one.
  pub selection:        Option<Selection>,
  pub effects:          Vec<Effect>,
  pub annotations:      Vec<Annotation>,
  pub scroll_into_view: bool,
  /// When false, this spec's changes bypass the change filters. Transaction
  /// filters still run.
  pub filter:           bool,
  /// When set, positions refer to the document produced by the preceding
  /// specs instead of the start document.
  pub sequential:       bool,
  pub user_event:       Option<String>,
}

impl Default for TransactionSpec {
  fn default() -> Self {
    Self {
      changes:          None,
      selection:        None,
      effects:          Vec::new(),
      annotations:      Vec::new(),
      scroll_into_view: false,
      filter:           true,
      sequential:       false,
      user_event:       None,
    }
  }
}

impl TransactionSpec {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn with_changes(mut self, changes: impl Into<ChangesSpec>) -> Self {
    self.changes = Some(changes.into());
    self
  }

  #[must_use]
  pub fn with_selection(mut self, selection: Selection) -> Self {
    self.selection = Some(selection);
    self
  }

  #[must_use]
  pub fn with_effect(mut self, effect: Effect) -> Self {
    self.effects.push(effect);
    self
  }

  #[must_use]
  pub fn with_annotation(mut self, annotation: Annotation) -> Self {
    self.annotations.push(annotation);
    self
  }

  #[must_use]
  pub fn scroll_into_view(mut self) -> Self {
    self.scroll_into_view = true;
    self
  }

  #[must_use]
  pub fn no_filter(mut self) -> Self {
    self.filter = false;
    self
  }

  #[must_use]
  pub fn sequential(mut self) -> Self {
    self.sequential = true;
    self
  }

  #[must_use]
  pub fn with_user_event(mut self, event: impl Into<String>) -> Self {
    self.user_event = Some(event.into());
    self
  }
}

impl From<Vec<Change>> for TransactionSpec {
  fn from(edits: Vec<Change>) -> Self {
    TransactionSpec::new().with_changes(edits)
  }
}

// The transaction itself.
//

/// An immutable record of one state update.
#[derive(Clone)]
pub struct Transaction {
  start_state:      EditorState,
  changes:          ChangeSet,
  selection:        Option<Selection>,
  effects:          Vec<Effect>,
  annotations:      Vec<Annotation>,
  scroll_into_view: bool,
  new_doc:          OnceLock<Text>,
  state:            OnceLock<EditorState>,
}

impl Transaction {
  pub(crate) fn create(
    start_state: EditorState,
    changes: ChangeSet,
    selection: Option<Selection>,
    effects: Vec<Effect>,
    annotations: Vec<Annotation>,
    scroll_into_view: bool,
  ) -> Self {
    Self {
      start_state,
      changes,
      selection,
      effects,
      annotations,
      scroll_into_view,
      new_doc: OnceLock::new(),
      state: OnceLock::new(),
    }
  }

  /// The state this transaction starts in.
  pub fn start_state(&self) -> &EditorState {
    &self.start_state
  }

  /// The document changes made by this transaction.
  pub fn changes(&self) -> &ChangeSet {
    &self.changes
  }

  /// The selection set explicitly by the specs, in post-change coordinates.
  /// Absent means the new selection is derived by mapping the old one.
  pub fn selection(&self) -> Option<&Selection> {
    self.selection.as_ref()
  }

  pub fn effects(&self) -> &[Effect] {
    &self.effects
  }

  pub fn annotations(&self) -> &[Annotation] {
    &self.annotations
  }

  pub fn annotation<T: Send + Sync + 'static>(&self, type_: &AnnotationType<T>) -> Option<&T> {
    self
      .annotations
      .iter()
      .find_map(|annotation| annotation.get(type_))
  }

  pub fn scroll_into_view(&self) -> bool {
    self.scroll_into_view
  }

  /// The document produced by this transaction's changes.
  pub fn new_doc(&self) -> &Text {
    self.new_doc.get_or_init(|| {
      self
        .changes
        .apply(self.start_state.doc())
        .expect("transaction changes were built against the start document")
    })
  }

  pub fn doc_changed(&self) -> bool {
    !self.changes.is_empty()
  }

  /// Whether this transaction was marked as the given user event, or a
  /// sub-event of it (`"input"` matches `"input.type"`).
  pub fn is_user_event(&self, prefix: &str) -> bool {
    match self.annotation(user_event_annotation()) {
      Some(event) => {
        event == prefix
          || (event.len() > prefix.len()
            && event.starts_with(prefix)
            && event.as_bytes()[prefix.len()] == b'.')
      },
      None => false,
    }
  }

  /// Whether this transaction changes the configuration.
  pub fn reconfigured(&self) -> bool {
    use crate::extension::{
      append_config_type,
      compartment_reconfigure_type,
      reconfigure_type,
    };
    self.effects.iter().any(|effect| {
      effect.is(reconfigure_type())
        || effect.is(append_config_type())
        || effect.is(compartment_reconfigure_type())
    })
  }

  /// The state this transaction produces.
  pub fn state(&self) -> &EditorState {
    self
      .state
      .get()
      .expect("transactions are resolved before being handed out")
  }

  pub(crate) fn resolve(&self, state: EditorState) {
    // Ignore a second resolution attempt; the first one wins.
    let _ = self.state.set(state);
  }

  pub(crate) fn push_annotation(&mut self, annotation: Annotation) {
    self.annotations.push(annotation);
  }

  /// Rebuild a spec equivalent to this draft, for transaction filters that
  /// want to extend rather than replace it.
  pub fn as_spec(&self) -> TransactionSpec {
    TransactionSpec {
      changes:          Some(ChangesSpec::Set(self.changes.clone())),
      selection:        self.selection.clone(),
      effects:          self.effects.clone(),
      annotations:      self.annotations.clone(),
      scroll_into_view: self.scroll_into_view,
      filter:           true,
      // The changes in this spec are already in start-document coordinates.
      sequential:       false,
      user_event:       None,
    }
  }
}

// Spec merging.
//

/// A draft transaction being assembled from specs.
pub(crate) struct Draft {
  pub(crate) changes:     ChangeSet,
  pub(crate) selection:   Option<Selection>,
  pub(crate) effects:     Vec<Effect>,
  pub(crate) annotations: Vec<Annotation>,
  pub(crate) scroll:      bool,
  pub(crate) user_event:  Option<String>,
  /// Start-document ranges whose changes bypass the change filters.
  pub(crate) exempt:      Vec<(usize, usize)>,
}

impl Draft {
  pub(crate) fn to_transaction(&self, state: &EditorState) -> Transaction {
    let mut annotations = self.annotations.clone();
    if let Some(event) = &self.user_event {
      annotations.push(user_event_annotation().of(event.clone()));
    }
    Transaction::create(
      state.clone(),
      self.changes.clone(),
      self.selection.clone(),
      self.effects.clone(),
      annotations,
      self.scroll,
    )
  }
}

/// Resolve a spec's changes into a change set against the given document
/// length, normalizing inserted line endings.
fn spec_changes(state: &EditorState, spec: &TransactionSpec, len: usize) -> Result<ChangeSet> {
  let Some(changes) = &spec.changes else {
    return Ok(ChangeSet::empty(len));
  };
  match changes {
    ChangesSpec::Set(set) => Ok(set.clone()),
    ChangesSpec::Edits(edits) => {
      let normalized: Vec<Change> = edits
        .iter()
        .map(|(from, to, insert)| {
          (
            *from,
            *to,
            insert
              .as_ref()
              .map(|text| state.normalize_insert(text)),
          )
        })
        .collect();
      if spec.sequential {
        Ok(ChangeSet::of_sequential(normalized, len)?)
      } else {
        Ok(ChangeSet::of(normalized, len)?)
      }
    },
  }
}

/// Merge specs into a draft, per the module docs: non-sequential specs are
/// rebased over the accumulated changes, sequential ones compose directly.
pub(crate) fn merge_specs(
  state: &EditorState,
  specs: Vec<TransactionSpec>,
) -> Result<Draft> {
  let doc_len = state.doc().len();
  let mut draft = Draft {
    changes:     ChangeSet::empty(doc_len),
    selection:   None,
    effects:     Vec::new(),
    annotations: Vec::new(),
    scroll:      false,
    user_event:  None,
    exempt:      Vec::new(),
  };

  for spec in specs {
    // `own` is the spec's changes in its own coordinates; `map_for_a`
    // carries the accumulated draft forward, `map_for_b` pulls the spec's
    // effects into the combined coordinates.
    let (composed, own, map_for_a, map_for_b) = if spec.sequential {
      let b = spec_changes(state, &spec, draft.changes.len_after())?;
      let composed = draft.changes.compose(&b)?;
      let map_for_a = b.desc();
      (composed, b, map_for_a, None)
    } else {
      let b = spec_changes(state, &spec, doc_len)?;
      let b_rebased = b.map(&draft.changes.desc(), false)?;
      let a_over_b = draft.changes.desc().map_desc(&b.desc(), true)?;
      let composed = draft.changes.compose(&b_rebased)?;
      (composed, b, b_rebased.desc(), Some(a_over_b))
    };

    if !spec.filter {
      // Track this spec's changed ranges in start-document coordinates so
      // the change filters leave them alone.
      if spec.sequential {
        // Sequential positions refer to the accumulated output; pull them
        // back to the start document.
        let back = draft.changes.desc().invert_desc();
        for range in own.iter_changed_ranges() {
          let from = back.map_pos(range.from_a, Assoc::Before)?;
          let to = back.map_pos(range.to_a, Assoc::After)?;
          draft.exempt.push((from, to));
        }
      } else {
        for range in own.iter_changed_ranges() {
          draft.exempt.push((range.from_a, range.to_a));
        }
      }
    }

    if !map_for_a.is_empty() {
      draft.effects = Effect::map_effects(&draft.effects, &map_for_a);
      if let Some(selection) = draft.selection.take() {
        draft.selection = Some(selection.map(&map_for_a)?);
      }
    }
    let new_effects = match &map_for_b {
      Some(map_b) if !map_b.is_empty() => Effect::map_effects(&spec.effects, map_b),
      _ => spec.effects.clone(),
    };
    draft.effects.extend(new_effects);

    if let Some(selection) = spec.selection {
      draft.selection = Some(selection);
    }
    draft.annotations.extend(spec.annotations);
    draft.scroll |= spec.scroll_into_view;
    if spec.user_event.is_some() {
      draft.user_event = spec.user_event;
    }
    draft.changes = composed;
  }

  Ok(draft)
}

/// Run the change-filter chain over the draft.
pub(crate) fn apply_change_filters(state: &EditorState, mut draft: Draft) -> Result<Draft> {
  if draft.changes.is_empty() {
    return Ok(draft);
  }
  let filters = state.facet(change_filter());
  if filters.is_empty() {
    return Ok(draft);
  }

  let probe = draft.to_transaction(state);
  let mut veto = false;
  let mut suppress: Vec<(usize, usize)> = Vec::new();
  for filter in filters.iter() {
    match filter(&probe) {
      ChangeFilterResult::Pass => {},
      ChangeFilterResult::Veto => {
        veto = true;
        break;
      },
      ChangeFilterResult::Suppress(ranges) => suppress.extend(ranges),
    }
  }

  if veto {
    let back = draft.changes.desc().invert_desc();
    draft.selection = match draft.selection.take() {
      Some(selection) => Some(selection.map(&back)?),
      None => None,
    };
    draft.effects = Effect::map_effects(&draft.effects, &back);
    draft.changes = ChangeSet::empty(state.doc().len());
    return Ok(draft);
  }

  let suppress = subtract_ranges(join_ranges(suppress), &draft.exempt);
  if suppress.is_empty() {
    return Ok(draft);
  }

  let split = draft.changes.filter(&suppress);
  let back = split
    .filtered
    .map(&split.changes.desc(), false)?
    .desc()
    .invert_desc();
  draft.selection = match draft.selection.take() {
    Some(selection) => Some(selection.map(&back)?),
    None => None,
  };
  draft.effects = Effect::map_effects(&draft.effects, &back);
  draft.changes = split.changes;
  Ok(draft)
}

/// Sort and merge overlapping ranges. Touching ranges stay separate so a
/// zero-width gap between them keeps its meaning for boundary insertions.
fn join_ranges(mut ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
  ranges.sort_unstable();
  let mut out: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
  for (from, to) in ranges {
    match out.last_mut() {
      Some((_, last_to)) if from < *last_to => {
        *last_to = (*last_to).max(to);
      },
      _ => out.push((from, to)),
    }
  }
  out
}

/// Remove the parts of `ranges` that overlap any of `exempt`.
fn subtract_ranges(ranges: Vec<(usize, usize)>, exempt: &[(usize, usize)]) -> Vec<(usize, usize)> {
  if exempt.is_empty() {
    return ranges;
  }
  let mut out = Vec::with_capacity(ranges.len());
  for (mut from, to) in ranges {
    let mut pieces: Vec<(usize, usize)> = Vec::new();
    let mut cut = false;
    for &(e_from, e_to) in exempt {
      if e_to <= from || e_from >= to {
        continue;
      }
      cut = true;
      if e_from > from {
        pieces.push((from, e_from));
      }
      from = from.max(e_to);
    }
    if !cut {
      pieces.push((from, to));
    } else if from < to {
      pieces.push((from, to));
    }
    out.extend(pieces);
  }
  join_ranges(out)
}

/// Run the transaction-filter chain to a fixpoint, then the extenders.
pub(crate) fn apply_transaction_filters(
  state: &EditorState,
  mut draft: Draft,
) -> Result<Draft> {
  let filters = state.facet(transaction_filter());
  if !filters.is_empty() {
    let mut passes = 0;
    loop {
      let mut replaced = false;
      for filter in filters.iter() {
        let probe = draft.to_transaction(state);
        if let Some(specs) = filter(&probe) {
          draft = merge_specs(state, specs)?;
          draft = apply_change_filters(state, draft)?;
          replaced = true;
        }
      }
      if !replaced {
        break;
      }
      passes += 1;
      if passes >= MAX_FILTER_PASSES {
        return Err(StateError::FilterLoop {
          facet: "transactionFilter".to_owned(),
        });
      }
    }
  }

  let extenders = state.facet(transaction_extender());
  for extender in extenders.iter() {
    let probe = draft.to_transaction(state);
    let output = extender(&probe);
    draft.effects.extend(output.effects);
    draft.annotations.extend(output.annotations);
  }

  Ok(draft)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn annotations_are_typed() {
    let numbers: AnnotationType<u32> = AnnotationType::define();
    let strings: AnnotationType<String> = AnnotationType::define();

    let annotation = numbers.of(7);
    assert_eq!(annotation.get(&numbers), Some(&7));
    assert_eq!(annotation.get(&strings), None);
  }

  #[test]
  fn effects_are_typed_and_mappable() {
    let positions: EffectType<usize> = EffectType::define_mapped(|pos, changes| {
      changes
        .map_pos_mode(
          *pos,
          crate::change::Assoc::Before,
          crate::change::MapMode::TrackDel,
        )
        .ok()
        .flatten()
    });
    let flags: EffectType<bool> = EffectType::define();

    let effect = positions.of(5);
    assert!(effect.is(&positions));
    assert!(!effect.is(&flags));
    assert_eq!(effect.value(&positions), Some(&5));

    let changes = ChangeSet::of(vec![(0, 0, Some("ab".into()))], 10).unwrap();
    let mapped = effect.map(&changes.desc()).unwrap();
    assert_eq!(mapped.value(&positions), Some(&7));

    // a position inside a deletion drops the effect
    let changes = ChangeSet::of(vec![(4, 8, None)], 10).unwrap();
    assert!(effect.map(&changes.desc()).is_none());
  }

  #[test]
  fn range_joining_and_subtraction() {
    assert_eq!(
      join_ranges(vec![(4, 6), (0, 2), (1, 3)]),
      vec![(0, 3), (4, 6)]
    );
    assert_eq!(
      subtract_ranges(vec![(0, 10)], &[(2, 4), (6, 8)]),
      vec![(0, 2), (4, 6), (8, 10)]
    );
    assert_eq!(subtract_ranges(vec![(2, 4)], &[(0, 6)]), vec![]);
  }
}
