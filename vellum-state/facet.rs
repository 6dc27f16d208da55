//! Facets: typed, aggregated configuration slots.
//!
//! A [`Facet`] is a handle to a slot in the configuration graph. Any number
//! of extensions can provide inputs for it — static values via [`Facet::of`],
//! or dynamic computations via [`Facet::compute`] that re-run when their
//! declared dependencies (document, selection, a field, another facet)
//! change. The facet combines all inputs, in provider priority order, into a
//! single output value.
//!
//! Without a combiner a facet exposes the list of inputs; with one
//! ([`Facet::define_with`]) it exposes whatever the combiner builds. An
//! optional comparator lets downstream consumers skip work: when a
//! recomputed output compares equal, the previous value is kept and
//! dependents don't see a change.
//!
//! Handles are cheap to clone and compare by identity. Values are stored
//! type-erased on the state; the typed handle is the only way to read them
//! back, so the casts are safe by construction.

use std::{
  any::Any,
  marker::PhantomData,
  sync::{
    Arc,
    OnceLock,
    atomic::{
      AtomicU64,
      Ordering,
    },
  },
};

use crate::{
  extension::Extension,
  state::EditorState,
};

/// Type-erased value storage. Every facet input/output and field value is an
/// `Arc` so states can share unchanged values.
pub(crate) type DynValue = Arc<dyn Any + Send + Sync>;

pub(crate) fn fresh_id() -> u64 {
  static NEXT_ID: AtomicU64 = AtomicU64::new(1);
  NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A dependency of a dynamic facet computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacetDep {
  /// The document content.
  Doc,
  /// The selection.
  Selection,
  /// Another facet's output, by identity.
  Facet(u64),
  /// A state field's value, by identity.
  Field(u64),
}

pub(crate) struct FacetInner {
  pub(crate) id:      u64,
  pub(crate) label:   Option<&'static str>,
  /// Combine erased inputs into the erased output.
  pub(crate) combine: Arc<dyn Fn(Vec<DynValue>) -> DynValue + Send + Sync>,
  /// Compare two outputs; equal outputs keep the previous value.
  pub(crate) compare: Option<Arc<dyn Fn(&DynValue, &DynValue) -> bool + Send + Sync>>,
  /// Output for a configuration with no providers, built on first use.
  pub(crate) default: OnceLock<DynValue>,
}

impl FacetInner {
  pub(crate) fn default_output(&self) -> DynValue {
    self
      .default
      .get_or_init(|| (self.combine)(Vec::new()))
      .clone()
  }

  pub(crate) fn describe(&self) -> String {
    match self.label {
      Some(label) => label.to_owned(),
      None => format!("facet #{}", self.id),
    }
  }
}

/// A typed configuration slot aggregating `Input` values into an `Output`.
pub struct Facet<Input, Output = Vec<Input>> {
  pub(crate) inner: Arc<FacetInner>,
  _marker:          PhantomData<fn(Input) -> Output>,
}

impl<I, O> Clone for Facet<I, O> {
  fn clone(&self) -> Self {
    Self {
      inner:   self.inner.clone(),
      _marker: PhantomData,
    }
  }
}

impl<I, O> std::fmt::Debug for Facet<I, O> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Facet({})", self.inner.describe())
  }
}

impl<I: Clone + Send + Sync + 'static> Facet<I, Vec<I>> {
  /// Define a facet whose output is the list of its inputs, in priority
  /// order.
  pub fn define() -> Self {
    Self::define_inner(None, Arc::new(|values| values))
  }

  pub(crate) fn define_labeled(label: &'static str) -> Self {
    Self::define_inner(Some(label), Arc::new(|values| values))
  }
}

impl<I: Clone + Send + Sync + 'static, O: Send + Sync + 'static> Facet<I, O> {
  /// Define a facet with a combining function.
  pub fn define_with(combine: impl Fn(Vec<I>) -> O + Send + Sync + 'static) -> Self {
    Self::define_inner(None, Arc::new(combine))
  }

  pub(crate) fn define_with_labeled(
    label: &'static str,
    combine: impl Fn(Vec<I>) -> O + Send + Sync + 'static,
  ) -> Self {
    Self::define_inner(Some(label), Arc::new(combine))
  }

  fn define_inner(
    label: Option<&'static str>,
    combine: Arc<dyn Fn(Vec<I>) -> O + Send + Sync>,
  ) -> Self {
    let erased = Arc::new(move |inputs: Vec<DynValue>| -> DynValue {
      let typed: Vec<I> = inputs
        .into_iter()
        .map(|value| {
          value
            .downcast::<I>()
            .expect("facet inputs are produced through this facet's typed handle")
            .as_ref()
            .clone()
        })
        .collect();
      Arc::new(combine(typed))
    });
    Self {
      inner:   Arc::new(FacetInner {
        id: fresh_id(),
        label,
        combine: erased,
        compare: None,
        default: OnceLock::new(),
      }),
      _marker: PhantomData,
    }
  }

  /// Attach an output comparator. When a recomputation produces an equal
  /// output, the previous value is kept and dependents see no change.
  #[must_use]
  pub fn with_compare(self, compare: impl Fn(&O, &O) -> bool + Send + Sync + 'static) -> Self {
    let inner = FacetInner {
      id:      self.inner.id,
      label:   self.inner.label,
      combine: self.inner.combine.clone(),
      compare: Some(Arc::new(move |a: &DynValue, b: &DynValue| {
        match (a.downcast_ref::<O>(), b.downcast_ref::<O>()) {
          (Some(a), Some(b)) => compare(a, b),
          _ => false,
        }
      })),
      default: OnceLock::new(),
    };
    Self {
      inner:   Arc::new(inner),
      _marker: PhantomData,
    }
  }

  /// The identity of this facet.
  pub fn id(&self) -> u64 {
    self.inner.id
  }

  /// Use this facet as a dependency of another computation.
  pub fn dep(&self) -> FacetDep {
    FacetDep::Facet(self.inner.id)
  }

  /// Provide a static input value.
  pub fn of(&self, value: I) -> Extension {
    Extension::static_provider(self.inner.clone(), Arc::new(value) as DynValue)
  }

  /// Provide an input computed from the state, recomputed when any of
  /// `deps` changes.
  pub fn compute(
    &self,
    deps: Vec<FacetDep>,
    f: impl Fn(&EditorState) -> I + Send + Sync + 'static,
  ) -> Extension {
    Extension::dynamic_provider(
      self.inner.clone(),
      deps,
      Arc::new(move |state: &EditorState| -> Vec<DynValue> {
        vec![Arc::new(f(state)) as DynValue]
      }),
    )
  }

  /// Like [`Facet::compute`], but producing any number of input values.
  pub fn compute_n(
    &self,
    deps: Vec<FacetDep>,
    f: impl Fn(&EditorState) -> Vec<I> + Send + Sync + 'static,
  ) -> Extension {
    Extension::dynamic_provider(
      self.inner.clone(),
      deps,
      Arc::new(move |state: &EditorState| -> Vec<DynValue> {
        f(state)
          .into_iter()
          .map(|value| Arc::new(value) as DynValue)
          .collect()
      }),
    )
  }

  /// Read this facet's output from a state. Exposed via
  /// [`EditorState::facet`].
  pub(crate) fn read(&self, value: DynValue) -> Arc<O> {
    value
      .downcast::<O>()
      .expect("facet outputs are produced through this facet's typed handle")
  }
}

impl<I, O> PartialEq for Facet<I, O> {
  fn eq(&self, other: &Self) -> bool {
    self.inner.id == other.inner.id
  }
}

impl<I, O> Eq for Facet<I, O> {}
