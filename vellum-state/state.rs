//! The editor state: aggregate root of the kernel.
//!
//! An [`EditorState`] is an immutable value holding the document, the
//! selection, the resolved configuration, every state field's value, and the
//! computed outputs of dynamic facets. [`EditorState::update`] is the single
//! entry point for change: it merges [`TransactionSpec`]s, runs the filter
//! and extender chains, applies the result, and returns a
//! [`Transaction`] that carries both the old and the new state.
//!
//! States are cheap to clone; all heavy structure is shared through `Arc`s
//! and the persistent document/selection types. A no-op update produces a
//! state whose unchanged facet outputs are the very same `Arc`s, so
//! consumers can skip work by identity comparison.

use std::{
  collections::{
    HashMap,
    HashSet,
  },
  sync::{
    Arc,
    OnceLock,
  },
  time::Instant,
};

use thiserror::Error;
use vellum_core::line_ending::LineEnding;

use crate::{
  Tendril,
  change::{
    Assoc,
    Change,
    ChangeError,
    ChangeSet,
  },
  extension::{
    ConfigError,
    Configuration,
    Extension,
    FacetSlot,
    ProviderKind,
    append_config_type,
    compartment_reconfigure_type,
    reconfigure_type,
  },
  facet::{
    DynValue,
    Facet,
  },
  field::{
    FieldInner,
    StateField,
  },
  selection::{
    Selection,
    SelectionError,
    SelectionRange,
  },
  text::{
    Text,
    TextError,
  },
  transaction::{
    Transaction,
    TransactionSpec,
    apply_change_filters,
    apply_transaction_filters,
    merge_specs,
    time_annotation,
  },
};

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
  #[error(transparent)]
  Change(#[from] ChangeError),
  #[error(transparent)]
  Selection(#[from] SelectionError),
  #[error(transparent)]
  Text(#[from] TextError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("transaction filters failed to reach a fixpoint ({facet})")]
  FilterLoop { facet: String },
  #[error("state field is not present in this configuration")]
  FieldMissing,
  #[error("malformed state json: {0}")]
  MalformedJson(String),
}

// Built-in facets.
//

/// Whether selections may hold multiple ranges. When false, only the main
/// range of a selection survives.
pub fn allow_multiple_selections() -> &'static Facet<bool, bool> {
  static FACET: OnceLock<Facet<bool, bool>> = OnceLock::new();
  FACET.get_or_init(|| {
    Facet::define_with_labeled("allowMultipleSelections", |values: Vec<bool>| {
      values.into_iter().any(|allow| allow)
    })
  })
}

/// The exact line separator to recognize when reading text into the state.
/// Without a value, any of LF, CRLF, CR is recognized. Only those three
/// separators are supported; other values fall back to the default.
pub fn line_separator() -> &'static Facet<String, Option<String>> {
  static FACET: OnceLock<Facet<String, Option<String>>> = OnceLock::new();
  FACET.get_or_init(|| {
    Facet::define_with_labeled("lineSeparator", |values: Vec<String>| {
      values.into_iter().next()
    })
  })
}

/// A millisecond monotonic clock source.
pub type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// The clock used for the transaction `time` annotation and parse budgets.
/// Inject a fake one in tests for determinism.
pub fn clock() -> &'static Facet<ClockFn, ClockFn> {
  static FACET: OnceLock<Facet<ClockFn, ClockFn>> = OnceLock::new();
  FACET.get_or_init(|| {
    let start = Instant::now();
    let default: ClockFn = Arc::new(move || start.elapsed().as_millis() as u64);
    Facet::define_with_labeled("clock", move |values: Vec<ClockFn>| {
      values.into_iter().next().unwrap_or_else(|| default.clone())
    })
  })
}

// Construction input.
//

enum DocInit {
  Empty,
  Str(String),
  Text(Text),
}

/// Input to [`EditorState::create`].
pub struct StateConfig {
  doc:        DocInit,
  selection:  Option<Selection>,
  extensions: Extension,
}

impl Default for StateConfig {
  fn default() -> Self {
    Self {
      doc:        DocInit::Empty,
      selection:  None,
      extensions: Extension::empty(),
    }
  }
}

impl StateConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// The initial document, read with the configured line separator.
  #[must_use]
  pub fn with_doc_str(mut self, doc: impl Into<String>) -> Self {
    self.doc = DocInit::Str(doc.into());
    self
  }

  /// The initial document as an already-built [`Text`].
  #[must_use]
  pub fn with_doc(mut self, doc: Text) -> Self {
    self.doc = DocInit::Text(doc);
    self
  }

  #[must_use]
  pub fn with_selection(mut self, selection: Selection) -> Self {
    self.selection = Some(selection);
    self
  }

  #[must_use]
  pub fn with_extensions(mut self, extensions: Vec<Extension>) -> Self {
    self.extensions = Extension::list(extensions);
    self
  }
}

// Named fields for JSON snapshots.
//

/// The fields a JSON snapshot serializes, by name.
#[derive(Default)]
pub struct FieldSet {
  entries: Vec<(String, Arc<FieldInner>)>,
}

impl FieldSet {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn add<V>(mut self, name: impl Into<String>, field: &StateField<V>) -> Self {
    self.entries.push((name.into(), field.inner.clone()));
    self
  }
}

// The state itself.
//

/// Immutable editor state.
#[derive(Clone)]
pub struct EditorState {
  config:    Arc<Configuration>,
  doc:       Text,
  selection: Selection,
  fields:    Arc<HashMap<u64, DynValue>>,
  facets:    Arc<HashMap<u64, DynValue>>,
}

impl std::fmt::Debug for EditorState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EditorState")
      .field("doc", &self.doc.to_string())
      .field("selection", &self.selection)
      .finish_non_exhaustive()
  }
}

impl EditorState {
  /// Build a state from a configuration: resolve extensions, read the
  /// document, create fields in declaration order, then compute dynamic
  /// facets in dependency order.
  pub fn create(config: StateConfig) -> Result<Self> {
    let resolved = Arc::new(Configuration::resolve(
      config.extensions,
      &HashMap::new(),
      None,
    )?);

    let separator = static_facet(&resolved, line_separator())
      .as_deref()
      .cloned()
      .flatten();
    let doc = match config.doc {
      DocInit::Empty => Text::empty(),
      DocInit::Text(text) => text,
      DocInit::Str(text) => Text::from_str_with(&text, recognized_separator(separator.as_deref())),
    };

    let mut selection = config.selection.unwrap_or_else(|| Selection::cursor(0));
    selection.check(doc.len())?;
    if !*static_facet(&resolved, allow_multiple_selections()).unwrap_or(Arc::new(false)) {
      selection = selection.as_single();
    }

    let mut state = EditorState {
      config: resolved,
      doc,
      selection,
      fields: Arc::new(HashMap::new()),
      facets: Arc::new(HashMap::new()),
    };

    let cfg = state.config.clone();
    for slot in &cfg.fields {
      let create = slot.create_override.as_ref().unwrap_or(&slot.field.create);
      let value = create(&state);
      Arc::make_mut(&mut state.fields).insert(slot.field.id, value);
    }

    for slot in &cfg.facet_slots {
      if !slot.dynamic {
        continue;
      }
      let value = compute_slot(slot, &state);
      Arc::make_mut(&mut state.facets).insert(slot.facet.id, value);
    }

    Ok(state)
  }

  #[inline]
  pub fn doc(&self) -> &Text {
    &self.doc
  }

  #[inline]
  pub fn selection(&self) -> &Selection {
    &self.selection
  }

  pub(crate) fn config(&self) -> &Configuration {
    &self.config
  }

  /// The current output of a facet.
  pub fn facet<I, O: Send + Sync + 'static>(&self, facet: &Facet<I, O>) -> Arc<O>
  where
    I: Clone + Send + Sync + 'static,
  {
    let id = facet.inner.id;
    if let Some(value) = self.facets.get(&id) {
      facet.read(value.clone())
    } else if let Some(value) = self.config.statics.get(&id) {
      facet.read(value.clone())
    } else {
      facet.read(facet.inner.default_output())
    }
  }

  /// The value of a field, when it is part of this configuration.
  pub fn field<V: Send + Sync + 'static>(&self, field: &StateField<V>) -> Option<Arc<V>> {
    self
      .fields
      .get(&field.inner.id)
      .map(|value| field.read(value.clone()))
  }

  /// Like [`EditorState::field`], but an absent field is an error.
  pub fn field_or_err<V: Send + Sync + 'static>(&self, field: &StateField<V>) -> Result<Arc<V>> {
    self.field(field).ok_or(StateError::FieldMissing)
  }

  /// Build and apply a transaction from the given specs.
  pub fn update(&self, specs: impl IntoIterator<Item = TransactionSpec>) -> Result<Transaction> {
    let draft = merge_specs(self, specs.into_iter().collect())?;
    let draft = apply_change_filters(self, draft)?;
    let draft = apply_transaction_filters(self, draft)?;

    let mut transaction = draft.to_transaction(self);
    let now = (self.facet(clock()))();
    transaction.push_annotation(time_annotation().of(now));

    let new_state = self.apply_transaction(&transaction)?;
    transaction.resolve(new_state);
    Ok(transaction)
  }

  /// Normalize inserted text: recognized line endings become LF. With a
  /// configured separator only that exact sequence is recognized.
  pub(crate) fn normalize_insert(&self, text: &str) -> Tendril {
    let separator = self.facet(line_separator());
    let separator = recognized_separator(separator.as_deref());
    if !text.contains(['\r', '\n']) {
      return Tendril::from(text);
    }
    Tendril::from(Text::from_str_with(text, separator).to_string())
  }

  /// A spec that replaces every selection range with the given text and
  /// puts a cursor after each replacement.
  pub fn replace_selection(&self, text: &str) -> Result<TransactionSpec> {
    let insert = self.normalize_insert(text);
    let changes: Vec<Change> = self
      .selection
      .iter()
      .map(|range| (range.from(), range.to(), Some(insert.clone())))
      .collect();
    let set = ChangeSet::of(changes.clone(), self.doc.len())?;

    let ranges = self
      .selection
      .iter()
      .map(|range| Ok(SelectionRange::cursor(set.map_pos(range.to(), Assoc::After)?)))
      .collect::<std::result::Result<_, ChangeError>>()?;
    let selection = Selection::create(ranges, self.selection.main_index())?;

    Ok(
      TransactionSpec::new()
        .with_changes(changes)
        .with_selection(selection),
    )
  }

  /// Compute the state a transaction produces.
  fn apply_transaction(&self, tr: &Transaction) -> Result<EditorState> {
    // Configuration effects.
    let mut new_base: Option<Extension> = None;
    let mut appends: Vec<Extension> = Vec::new();
    let mut compartment_updates: Vec<(u64, Extension)> = Vec::new();
    for effect in tr.effects() {
      if let Some(extension) = effect.value(reconfigure_type()) {
        new_base = Some(extension.clone());
      } else if let Some(extension) = effect.value(append_config_type()) {
        appends.push(extension.clone());
      } else if let Some((compartment, extension)) = effect.value(compartment_reconfigure_type()) {
        compartment_updates.push((compartment.id(), extension.clone()));
      }
    }

    let reconfigured = new_base.is_some() || !appends.is_empty() || !compartment_updates.is_empty();
    let config = if reconfigured {
      let mut base = new_base.unwrap_or_else(|| self.config.base.clone());
      if !appends.is_empty() {
        let mut list = vec![base];
        list.extend(appends);
        base = Extension::list(list);
      }
      let mut inherited = self.config.compartments.clone();
      for (id, extension) in compartment_updates {
        inherited.insert(id, extension);
      }
      Arc::new(Configuration::resolve(base, &inherited, Some(&self.config))?)
    } else {
      self.config.clone()
    };

    // Document and selection.
    let new_doc = tr.new_doc().clone();
    let mut selection = match tr.selection() {
      Some(selection) => selection.clone(),
      None => self.selection.map(&tr.changes().desc())?,
    };
    selection.check(new_doc.len())?;
    if !*static_facet(&config, allow_multiple_selections()).unwrap_or(Arc::new(false)) {
      selection = selection.as_single();
    }

    let selection_changed = selection != self.selection;
    let doc_changed = tr.doc_changed();

    let mut state = EditorState {
      config,
      doc: new_doc,
      selection,
      fields: Arc::new(HashMap::new()),
      facets: Arc::new(HashMap::new()),
    };

    // Fields, in declaration order. On reconfiguration, carried fields keep
    // their value without running `update` for this transaction; fields new
    // to the configuration are created against the partially built state.
    let cfg = state.config.clone();
    let mut changed_fields: HashSet<u64> = HashSet::new();
    for slot in &self.config.fields {
      if cfg.field_slot(slot.field.id).is_none() {
        // Dropped fields count as a change for dependents.
        changed_fields.insert(slot.field.id);
      }
    }
    for slot in &cfg.fields {
      let id = slot.field.id;
      match self.fields.get(&id) {
        Some(old) if reconfigured => {
          Arc::make_mut(&mut state.fields).insert(id, old.clone());
        },
        Some(old) => {
          let new_value = (slot.field.update)(old, tr);
          let keep_old = match &slot.field.compare {
            Some(compare) => compare(old, &new_value),
            None => false,
          };
          if keep_old {
            Arc::make_mut(&mut state.fields).insert(id, old.clone());
          } else {
            changed_fields.insert(id);
            Arc::make_mut(&mut state.fields).insert(id, new_value);
          }
        },
        None => {
          let create = slot.create_override.as_ref().unwrap_or(&slot.field.create);
          let value = create(&state);
          changed_fields.insert(id);
          Arc::make_mut(&mut state.fields).insert(id, value);
        },
      }
    }

    // Dynamic facets, in dependency order. Slots whose providers and inputs
    // did not change keep their previous output by reference.
    let mut changed_facets: HashSet<u64> = HashSet::new();
    for slot in &cfg.facet_slots {
      if !slot.dynamic {
        continue;
      }
      let id = slot.facet.id;
      let same_providers = if reconfigured {
        self
          .config
          .facet_index
          .get(&id)
          .map(|index| self.config.facet_slots[*index].provider_ids == slot.provider_ids)
          .unwrap_or(false)
      } else {
        true
      };
      let deps_changed = slot.deps.iter().any(|dep| {
        use crate::facet::FacetDep::*;
        match dep {
          Doc => doc_changed,
          Selection => selection_changed,
          Field(field_id) => changed_fields.contains(field_id),
          Facet(facet_id) => changed_facets.contains(facet_id),
        }
      });
      let old = self.facets.get(&id);

      if same_providers && !deps_changed {
        if let Some(old) = old {
          Arc::make_mut(&mut state.facets).insert(id, old.clone());
          continue;
        }
      }

      let new_value = compute_slot(slot, &state);
      let keep_old = match (old, &slot.facet.compare) {
        (Some(old), Some(compare)) if same_providers => compare(old, &new_value),
        _ => false,
      };
      if keep_old {
        let old = old.expect("keep_old implies an old value");
        Arc::make_mut(&mut state.facets).insert(id, old.clone());
      } else {
        changed_facets.insert(id);
        Arc::make_mut(&mut state.facets).insert(id, new_value);
      }
    }

    Ok(state)
  }

  /// Serialize to the `{doc, selection, fields}` snapshot shape. Only
  /// fields named in `fields` that define a serializer contribute.
  pub fn to_json(&self, fields: &FieldSet) -> serde_json::Value {
    let mut field_values = serde_json::Map::new();
    for (name, inner) in &fields.entries {
      let (Some(to_json), Some(value)) = (&inner.to_json, self.fields.get(&inner.id)) else {
        continue;
      };
      field_values.insert(name.clone(), to_json(value));
    }
    serde_json::json!({
      "doc": self.doc.to_string(),
      "selection": self.selection.to_json(),
      "fields": serde_json::Value::Object(field_values),
    })
  }

  /// Deserialize a snapshot produced by [`EditorState::to_json`]. Unknown
  /// keys under `fields` are ignored for forward compatibility.
  pub fn from_json(
    json: &serde_json::Value,
    config: StateConfig,
    fields: &FieldSet,
  ) -> Result<EditorState> {
    let doc = json
      .get("doc")
      .and_then(|doc| doc.as_str())
      .ok_or_else(|| StateError::MalformedJson("missing doc".to_owned()))?;
    let selection = match json.get("selection") {
      Some(value) => Some(Selection::from_json(value)?),
      None => None,
    };

    let mut extensions = vec![config.extensions];
    if let Some(serde_json::Value::Object(stored)) = json.get("fields") {
      for (name, inner) in &fields.entries {
        let (Some(from_json), Some(value)) = (&inner.from_json, stored.get(name)) else {
          continue;
        };
        if let Some(value) = from_json(value) {
          extensions.push(Extension::field_provider(
            inner.clone(),
            Some(Arc::new(move |_: &EditorState| value.clone())),
          ));
        }
      }
    }

    let mut state_config = StateConfig {
      doc:        DocInit::Str(doc.to_owned()),
      selection:  config.selection,
      extensions: Extension::list(extensions),
    };
    if let Some(selection) = selection {
      state_config.selection = Some(selection);
    }
    Self::create(state_config)
  }
}

/// Read a facet's combined output from a configuration's static slots.
fn static_facet<I, O: Send + Sync + 'static>(
  config: &Configuration,
  facet: &Facet<I, O>,
) -> Option<Arc<O>>
where
  I: Clone + Send + Sync + 'static,
{
  config
    .statics
    .get(&facet.inner.id)
    .map(|value| facet.read(value.clone()))
}

fn recognized_separator(separator: Option<&str>) -> Option<LineEnding> {
  separator.and_then(LineEnding::from_str)
}

fn compute_slot(slot: &FacetSlot, state: &EditorState) -> DynValue {
  let mut inputs: Vec<DynValue> = Vec::with_capacity(slot.providers.len());
  for provider in &slot.providers {
    match &provider.kind {
      ProviderKind::Static(value) => inputs.push(value.clone()),
      ProviderKind::Dynamic { compute, .. } => inputs.extend(compute(state)),
    }
  }
  (slot.facet.combine)(inputs)
}
