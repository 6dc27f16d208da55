//! Extensions: the rose tree of configuration providers.
//!
//! An [`Extension`] is anything that can be handed to
//! [`EditorState::create`](crate::state::EditorState::create) to configure a
//! state: a facet value, a dynamic facet computation, a state field, a
//! priority wrapper, a compartment, or a list of other extensions.
//!
//! Resolution flattens the tree into an ordered list of providers (higher
//! [`Prec`] first, tree order within equal precedence; the innermost
//! precedence marker wins), resolves compartments to their currently bound
//! content, groups providers per facet, and orders facet computation by
//! dependencies. Cyclic facet dependencies and duplicated compartments are
//! configuration errors.
//!
//! # Reconfiguration
//!
//! Three effects change the configuration at transaction time:
//!
//! - [`reconfigure`] replaces the whole extension tree. Fields present in
//!   both configurations keep their values; compartments keep their
//!   currently bound content.
//! - [`append_config`] atomically adds extensions.
//! - [`Compartment::reconfigure`] swaps the content of one compartment.

use std::{
  collections::HashMap,
  sync::{
    Arc,
    OnceLock,
  },
};

use thiserror::Error;

use crate::{
  facet::{
    DynValue,
    FacetDep,
    FacetInner,
    fresh_id,
  },
  field::FieldInner,
  state::EditorState,
  transaction::{
    Effect,
    EffectType,
  },
};

pub(crate) type CreateFn = Arc<dyn Fn(&EditorState) -> DynValue + Send + Sync>;
pub(crate) type ComputeFn = Arc<dyn Fn(&EditorState) -> Vec<DynValue> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
  #[error("compartment used twice in one configuration")]
  DuplicateCompartment,
  #[error("cyclic dependency involving {facet}")]
  CyclicFacetDependency { facet: String },
}

/// Provider precedence. Providers of the same facet are combined with
/// higher precedence first; equal precedence keeps tree order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Prec {
  Highest,
  High,
  #[default]
  Default,
  Low,
  Lowest,
}

impl Prec {
  /// Wrap an extension, overriding the precedence of everything inside it
  /// that carries no inner marker of its own.
  pub fn of(self, extension: Extension) -> Extension {
    Extension {
      kind: ExtKind::Prec(self, Arc::new(extension)),
    }
  }
}

/// A user-visible aggregate of configuration providers.
#[derive(Clone)]
pub struct Extension {
  pub(crate) kind: ExtKind,
}

#[derive(Clone)]
pub(crate) enum ExtKind {
  List(Vec<Extension>),
  Facet(FacetProvider),
  Field(FieldProvider),
  Compartment(Compartment, Arc<Extension>),
  Prec(Prec, Arc<Extension>),
}

#[derive(Clone)]
pub(crate) struct FacetProvider {
  pub(crate) provider_id: u64,
  pub(crate) facet:       Arc<FacetInner>,
  pub(crate) kind:        ProviderKind,
}

#[derive(Clone)]
pub(crate) enum ProviderKind {
  Static(DynValue),
  Dynamic { deps: Vec<FacetDep>, compute: ComputeFn },
}

#[derive(Clone)]
pub(crate) struct FieldProvider {
  pub(crate) field:           Arc<FieldInner>,
  pub(crate) create_override: Option<CreateFn>,
}

impl Extension {
  pub fn empty() -> Self {
    Self {
      kind: ExtKind::List(Vec::new()),
    }
  }

  pub fn list(extensions: Vec<Extension>) -> Self {
    Self {
      kind: ExtKind::List(extensions),
    }
  }

  pub(crate) fn static_provider(facet: Arc<FacetInner>, value: DynValue) -> Self {
    Self {
      kind: ExtKind::Facet(FacetProvider {
        provider_id: fresh_id(),
        facet,
        kind: ProviderKind::Static(value),
      }),
    }
  }

  pub(crate) fn dynamic_provider(
    facet: Arc<FacetInner>,
    deps: Vec<FacetDep>,
    compute: ComputeFn,
  ) -> Self {
    Self {
      kind: ExtKind::Facet(FacetProvider {
        provider_id: fresh_id(),
        facet,
        kind: ProviderKind::Dynamic { deps, compute },
      }),
    }
  }

  pub(crate) fn field_provider(field: Arc<FieldInner>, create_override: Option<CreateFn>) -> Self {
    Self {
      kind: ExtKind::Field(FieldProvider {
        field,
        create_override,
      }),
    }
  }
}

impl From<Vec<Extension>> for Extension {
  fn from(extensions: Vec<Extension>) -> Self {
    Extension::list(extensions)
  }
}

impl FromIterator<Extension> for Extension {
  fn from_iter<I: IntoIterator<Item = Extension>>(iter: I) -> Self {
    Extension::list(iter.into_iter().collect())
  }
}

/// A named scope in the extension tree whose content can be swapped at
/// runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Compartment {
  id: u64,
}

impl Compartment {
  #[allow(clippy::new_without_default)]
  pub fn new() -> Self {
    Self { id: fresh_id() }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  /// Scope an extension inside this compartment.
  pub fn of(&self, extension: Extension) -> Extension {
    Extension {
      kind: ExtKind::Compartment(*self, Arc::new(extension)),
    }
  }

  /// The effect that swaps this compartment's content.
  pub fn reconfigure(&self, extension: Extension) -> Effect {
    compartment_reconfigure_type().of((*self, extension))
  }

  /// The extension currently bound to this compartment in a state, if the
  /// compartment occurs in its configuration.
  pub fn get<'a>(&self, state: &'a EditorState) -> Option<&'a Extension> {
    state.config().compartments.get(&self.id)
  }
}

/// The effect that replaces the whole extension tree.
pub fn reconfigure(extension: Extension) -> Effect {
  reconfigure_type().of(extension)
}

/// The effect that appends extensions to the current configuration.
pub fn append_config(extension: Extension) -> Effect {
  append_config_type().of(extension)
}

pub(crate) fn compartment_reconfigure_type() -> &'static EffectType<(Compartment, Extension)> {
  static TYPE: OnceLock<EffectType<(Compartment, Extension)>> = OnceLock::new();
  TYPE.get_or_init(EffectType::define)
}

pub(crate) fn reconfigure_type() -> &'static EffectType<Extension> {
  static TYPE: OnceLock<EffectType<Extension>> = OnceLock::new();
  TYPE.get_or_init(EffectType::define)
}

pub(crate) fn append_config_type() -> &'static EffectType<Extension> {
  static TYPE: OnceLock<EffectType<Extension>> = OnceLock::new();
  TYPE.get_or_init(EffectType::define)
}

/// One field definition in a resolved configuration.
pub(crate) struct FieldSlot {
  pub(crate) field:           Arc<FieldInner>,
  pub(crate) create_override: Option<CreateFn>,
}

/// One facet with all its providers, in priority order.
pub(crate) struct FacetSlot {
  pub(crate) facet:        Arc<FacetInner>,
  pub(crate) providers:    Vec<FacetProvider>,
  /// Union of the dynamic providers' dependencies.
  pub(crate) deps:         Vec<FacetDep>,
  /// Provider identities, for value reuse across reconfiguration.
  pub(crate) provider_ids: Vec<u64>,
  pub(crate) dynamic:      bool,
}

/// A resolved configuration: ordered field and facet slots plus the inputs
/// needed to rebuild it.
pub(crate) struct Configuration {
  pub(crate) base:         Extension,
  pub(crate) compartments: HashMap<u64, Extension>,
  pub(crate) fields:       Vec<FieldSlot>,
  /// Facet slots in dependency order (dependencies first).
  pub(crate) facet_slots:  Vec<FacetSlot>,
  pub(crate) facet_index:  HashMap<u64, usize>,
  /// Pre-combined outputs of facets with only static providers.
  pub(crate) statics:      HashMap<u64, DynValue>,
}

impl Configuration {
  /// Resolve an extension tree. `inherited` maps compartments to the
  /// content they are currently bound to (overriding the content embedded
  /// in the tree); `prev` allows static facet outputs to keep their
  /// identity when their providers did not change.
  pub(crate) fn resolve(
    base: Extension,
    inherited: &HashMap<u64, Extension>,
    prev: Option<&Configuration>,
  ) -> Result<Self, ConfigError> {
    let mut flat = Flattened::default();
    flatten(&base, Prec::Default, inherited, &mut flat)?;

    // Stable by construction: sort_by_key keeps tree order within a
    // precedence bucket.
    flat.items.sort_by_key(|(prec, _)| *prec);

    let mut fields: Vec<FieldSlot> = Vec::new();
    let mut slot_order: Vec<u64> = Vec::new();
    let mut slots: HashMap<u64, FacetSlot> = HashMap::new();

    for (_, item) in flat.items {
      match item {
        Item::Field(provider) => {
          if let Some(existing) = fields.iter_mut().find(|f| f.field.id == provider.field.id) {
            // The first occurrence with an initializer override wins.
            if existing.create_override.is_none() {
              existing.create_override = provider.create_override;
            }
          } else {
            fields.push(FieldSlot {
              field:           provider.field,
              create_override: provider.create_override,
            });
          }
        },
        Item::Facet(provider) => {
          let slot = slots
            .entry(provider.facet.id)
            .or_insert_with(|| {
              slot_order.push(provider.facet.id);
              FacetSlot {
                facet:        provider.facet.clone(),
                providers:    Vec::new(),
                deps:         Vec::new(),
                provider_ids: Vec::new(),
                dynamic:      false,
              }
            });
          slot.provider_ids.push(provider.provider_id);
          if let ProviderKind::Dynamic { deps, .. } = &provider.kind {
            slot.dynamic = true;
            for dep in deps {
              if !slot.deps.contains(dep) {
                slot.deps.push(dep.clone());
              }
            }
          }
          slot.providers.push(provider);
        },
      }
    }

    let ordered = topo_sort(&slot_order, &slots)?;
    let mut facet_slots: Vec<FacetSlot> = Vec::with_capacity(ordered.len());
    let mut facet_index = HashMap::new();
    let mut statics = HashMap::new();

    for facet_id in ordered {
      let slot = slots
        .remove(&facet_id)
        .expect("topo order only contains known slots");
      if !slot.dynamic {
        let reused = prev.and_then(|prev| {
          let index = prev.facet_index.get(&facet_id)?;
          let prev_slot = &prev.facet_slots[*index];
          (prev_slot.provider_ids == slot.provider_ids)
            .then(|| prev.statics.get(&facet_id).cloned())
            .flatten()
        });
        let value = reused.unwrap_or_else(|| {
          let inputs: Vec<DynValue> = slot
            .providers
            .iter()
            .map(|p| {
              match &p.kind {
                ProviderKind::Static(value) => value.clone(),
                ProviderKind::Dynamic { .. } => unreachable!("slot has no dynamic providers"),
              }
            })
            .collect();
          (slot.facet.combine)(inputs)
        });
        statics.insert(facet_id, value);
      }
      facet_index.insert(facet_id, facet_slots.len());
      facet_slots.push(slot);
    }

    Ok(Self {
      base,
      compartments: flat.compartments,
      fields,
      facet_slots,
      facet_index,
      statics,
    })
  }

  pub(crate) fn field_slot(&self, id: u64) -> Option<&FieldSlot> {
    self.fields.iter().find(|slot| slot.field.id == id)
  }
}

#[derive(Default)]
struct Flattened {
  items:        Vec<(Prec, Item)>,
  compartments: HashMap<u64, Extension>,
}

enum Item {
  Facet(FacetProvider),
  Field(FieldProvider),
}

fn flatten(
  extension: &Extension,
  prec: Prec,
  inherited: &HashMap<u64, Extension>,
  out: &mut Flattened,
) -> Result<(), ConfigError> {
  match &extension.kind {
    ExtKind::List(items) => {
      for item in items {
        flatten(item, prec, inherited, out)?;
      }
    },
    ExtKind::Prec(inner_prec, inner) => {
      flatten(inner, *inner_prec, inherited, out)?;
    },
    ExtKind::Compartment(compartment, content) => {
      if out.compartments.contains_key(&compartment.id()) {
        return Err(ConfigError::DuplicateCompartment);
      }
      let content = inherited
        .get(&compartment.id())
        .cloned()
        .unwrap_or_else(|| content.as_ref().clone());
      out
        .compartments
        .insert(compartment.id(), content.clone());
      flatten(&content, prec, inherited, out)?;
    },
    ExtKind::Facet(provider) => {
      out.items.push((prec, Item::Facet(provider.clone())));
    },
    ExtKind::Field(provider) => {
      out.items.push((prec, Item::Field(provider.clone())));
    },
  }
  Ok(())
}

/// Order facet slots so that dependencies come before their dependents.
fn topo_sort(
  order: &[u64],
  slots: &HashMap<u64, FacetSlot>,
) -> Result<Vec<u64>, ConfigError> {
  #[derive(Clone, Copy, PartialEq)]
  enum State {
    Unvisited,
    Visiting,
    Done,
  }

  fn visit(
    id: u64,
    slots: &HashMap<u64, FacetSlot>,
    states: &mut HashMap<u64, State>,
    out: &mut Vec<u64>,
  ) -> Result<(), ConfigError> {
    match states.get(&id).copied().unwrap_or(State::Unvisited) {
      State::Done => return Ok(()),
      State::Visiting => {
        let facet = slots
          .get(&id)
          .map(|slot| slot.facet.describe())
          .unwrap_or_else(|| format!("facet #{id}"));
        return Err(ConfigError::CyclicFacetDependency { facet });
      },
      State::Unvisited => {},
    }
    states.insert(id, State::Visiting);
    if let Some(slot) = slots.get(&id) {
      for dep in &slot.deps {
        if let FacetDep::Facet(dep_id) = dep {
          // Dependencies on facets absent from the configuration read the
          // facet default and impose no ordering.
          if slots.contains_key(dep_id) {
            visit(*dep_id, slots, states, out)?;
          }
        }
      }
    }
    states.insert(id, State::Done);
    out.push(id);
    Ok(())
  }

  let mut states = HashMap::new();
  let mut out = Vec::with_capacity(order.len());
  for &id in order {
    visit(id, slots, &mut states, &mut out)?;
  }
  Ok(out)
}
