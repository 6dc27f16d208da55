//! State fields: persistent per-state values driven by transactions.
//!
//! A [`StateField`] attaches a value to every [`EditorState`]. The field's
//! `create` function builds the initial value when a state is constructed
//! (or when reconfiguration adds the field); its `update` function folds
//! every transaction into a new value. Values are persistent — `update`
//! returns a new value, sharing what it can with the old one.
//!
//! Optional hooks:
//!
//! - a comparator, so no-op updates keep the previous value and facets
//!   depending on the field are not recomputed;
//! - `(to_json, from_json)` conversions for state serialization;
//! - [`StateField::init`], overriding `create` for one occurrence of the
//!   field in an extension tree.

use std::{
  marker::PhantomData,
  sync::Arc,
};

use crate::{
  extension::Extension,
  facet::{
    DynValue,
    FacetDep,
    fresh_id,
  },
  state::EditorState,
  transaction::Transaction,
};

pub(crate) struct FieldInner {
  pub(crate) id:        u64,
  pub(crate) create:    Arc<dyn Fn(&EditorState) -> DynValue + Send + Sync>,
  pub(crate) update:    Arc<dyn Fn(&DynValue, &Transaction) -> DynValue + Send + Sync>,
  pub(crate) compare:   Option<Arc<dyn Fn(&DynValue, &DynValue) -> bool + Send + Sync>>,
  pub(crate) to_json:   Option<Arc<dyn Fn(&DynValue) -> serde_json::Value + Send + Sync>>,
  pub(crate) from_json: Option<Arc<dyn Fn(&serde_json::Value) -> Option<DynValue> + Send + Sync>>,
}

/// A typed handle to per-state data.
pub struct StateField<V> {
  pub(crate) inner: Arc<FieldInner>,
  _marker:          PhantomData<fn() -> V>,
}

impl<V> Clone for StateField<V> {
  fn clone(&self) -> Self {
    Self {
      inner:   self.inner.clone(),
      _marker: PhantomData,
    }
  }
}

impl<V> std::fmt::Debug for StateField<V> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "StateField(#{})", self.inner.id)
  }
}

impl<V: Send + Sync + 'static> StateField<V> {
  /// Define a field from its initializer and its transaction folder.
  pub fn define(
    create: impl Fn(&EditorState) -> V + Send + Sync + 'static,
    update: impl Fn(&V, &Transaction) -> V + Send + Sync + 'static,
  ) -> Self {
    Self {
      inner:   Arc::new(FieldInner {
        id:        fresh_id(),
        create:    Arc::new(move |state| Arc::new(create(state)) as DynValue),
        update:    Arc::new(move |value, tr| {
          let value = value
            .downcast_ref::<V>()
            .expect("field values are produced through this field's typed handle");
          Arc::new(update(value, tr)) as DynValue
        }),
        compare:   None,
        to_json:   None,
        from_json: None,
      }),
      _marker: PhantomData,
    }
  }

  /// Attach a comparator; equal updates keep the previous value.
  #[must_use]
  pub fn with_compare(self, compare: impl Fn(&V, &V) -> bool + Send + Sync + 'static) -> Self {
    self.rebuild(|inner| {
      inner.compare = Some(Arc::new(move |a: &DynValue, b: &DynValue| {
        match (a.downcast_ref::<V>(), b.downcast_ref::<V>()) {
          (Some(a), Some(b)) => compare(a, b),
          _ => false,
        }
      }));
    })
  }

  /// Attach serialization hooks used by state JSON snapshots. `from_json`
  /// returning `None` rejects the stored value and falls back to `create`.
  #[must_use]
  pub fn with_json(
    self,
    to_json: impl Fn(&V) -> serde_json::Value + Send + Sync + 'static,
    from_json: impl Fn(&serde_json::Value) -> Option<V> + Send + Sync + 'static,
  ) -> Self {
    self.rebuild(|inner| {
      inner.to_json = Some(Arc::new(move |value: &DynValue| {
        let value = value
          .downcast_ref::<V>()
          .expect("field values are produced through this field's typed handle");
        to_json(value)
      }));
      inner.from_json = Some(Arc::new(move |json: &serde_json::Value| {
        from_json(json).map(|value| Arc::new(value) as DynValue)
      }));
    })
  }

  fn rebuild(self, edit: impl FnOnce(&mut FieldInner)) -> Self {
    let mut inner = FieldInner {
      id:        self.inner.id,
      create:    self.inner.create.clone(),
      update:    self.inner.update.clone(),
      compare:   self.inner.compare.clone(),
      to_json:   self.inner.to_json.clone(),
      from_json: self.inner.from_json.clone(),
    };
    edit(&mut inner);
    Self {
      inner:   Arc::new(inner),
      _marker: PhantomData,
    }
  }

  /// The identity of this field.
  pub fn id(&self) -> u64 {
    self.inner.id
  }

  /// Use this field as a dependency of a facet computation.
  pub fn dep(&self) -> FacetDep {
    FacetDep::Field(self.inner.id)
  }

  /// The extension that installs this field.
  pub fn extension(&self) -> Extension {
    Extension::field_provider(self.inner.clone(), None)
  }

  /// Install the field with a different initializer for this occurrence.
  pub fn init(&self, create: impl Fn(&EditorState) -> V + Send + Sync + 'static) -> Extension {
    Extension::field_provider(
      self.inner.clone(),
      Some(Arc::new(move |state: &EditorState| {
        Arc::new(create(state)) as DynValue
      })),
    )
  }

  pub(crate) fn read(&self, value: DynValue) -> Arc<V> {
    value
      .downcast::<V>()
      .expect("field values are produced through this field's typed handle")
  }
}

impl<V> PartialEq for StateField<V> {
  fn eq(&self, other: &Self) -> bool {
    self.inner.id == other.inner.id
  }
}

impl<V> Eq for StateField<V> {}
