//! The immutable syntax tree.
//!
//! A [`Tree`] node holds its [`NodeType`], a length, and children that are
//! either further `Tree`s or packed [`TreeBuffer`]s. Buffers store many
//! small nodes as `[type_id, from, to, end_index]` quadruples in one
//! contiguous array (preorder, `end_index` pointing past the node's
//! subtree), which keeps leaf-heavy regions cache-friendly and cheap to
//! clone. The representation is the contract: buffer nodes expose the same
//! navigation interface as tree nodes.
//!
//! [`Tree::build`] assembles a tree from a flat postorder quad buffer,
//! keeping subtrees whose quad count stays under `max_buffer_length` as
//! buffers and promoting larger ones to `Tree` nodes.
//!
//! # Node types
//!
//! A [`NodeType`] carries a name, a numeric id, behavior flags (top, error,
//! anonymous, skipped), group names for `is`-membership tests, and typed
//! [`NodeProp`] values (closing brackets, indentation hints, fold targets —
//! whatever a language package wants to attach). A [`NodeSet`] is the
//! id-indexed registry a parser and its trees share; mismatched ids are a
//! configuration error.

use std::{
  any::Any,
  collections::HashMap,
  marker::PhantomData,
  sync::Arc,
};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TreeError>;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
  #[error("node type id {id} does not match its index {index} in the set")]
  MismatchedId { id: u16, index: usize },
  #[error("node type id {id} is not part of this node set")]
  UnknownType { id: u16 },
  #[error("malformed build buffer: {0}")]
  MalformedBuffer(&'static str),
}

bitflags::bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct NodeFlags: u8 {
    /// The type of a grammar's top node.
    const TOP       = 0b0001;
    /// Error/recovery nodes.
    const ERROR     = 0b0010;
    /// Nodes that are not part of the visible structure and are skipped by
    /// default navigation.
    const ANONYMOUS = 0b0100;
    /// Whitespace-like content skipped by the grammar.
    const SKIPPED   = 0b1000;
  }
}

/// A typed per-node-type property.
pub struct NodeProp<T> {
  id:      u64,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> NodeProp<T> {
  pub fn define() -> Self {
    use std::sync::atomic::{
      AtomicU64,
      Ordering,
    };
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    Self {
      id:      NEXT_ID.fetch_add(1, Ordering::Relaxed),
      _marker: PhantomData,
    }
  }
}

impl<T> Clone for NodeProp<T> {
  fn clone(&self) -> Self {
    Self {
      id:      self.id,
      _marker: PhantomData,
    }
  }
}

struct NodeTypeInner {
  name:   String,
  id:     u16,
  flags:  NodeFlags,
  groups: Vec<String>,
  props:  HashMap<u64, Arc<dyn Any + Send + Sync>>,
}

/// The type of a syntax node.
#[derive(Clone)]
pub struct NodeType {
  inner: Arc<NodeTypeInner>,
}

impl std::fmt::Debug for NodeType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "NodeType({} #{})", self.inner.name, self.inner.id)
  }
}

impl PartialEq for NodeType {
  fn eq(&self, other: &Self) -> bool {
    self.inner.id == other.inner.id
  }
}

impl Eq for NodeType {}

/// Builder for [`NodeType`], used when assembling a [`NodeSet`].
pub struct NodeTypeBuilder {
  name:   String,
  id:     u16,
  flags:  NodeFlags,
  groups: Vec<String>,
  props:  HashMap<u64, Arc<dyn Any + Send + Sync>>,
}

impl NodeType {
  pub fn build(name: impl Into<String>, id: u16) -> NodeTypeBuilder {
    NodeTypeBuilder {
      name: name.into(),
      id,
      flags: NodeFlags::empty(),
      groups: Vec::new(),
      props: HashMap::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn id(&self) -> u16 {
    self.inner.id
  }

  pub fn is_top(&self) -> bool {
    self.inner.flags.contains(NodeFlags::TOP)
  }

  pub fn is_error(&self) -> bool {
    self.inner.flags.contains(NodeFlags::ERROR)
  }

  pub fn is_anonymous(&self) -> bool {
    self.inner.flags.contains(NodeFlags::ANONYMOUS)
  }

  pub fn is_skipped(&self) -> bool {
    self.inner.flags.contains(NodeFlags::SKIPPED)
  }

  /// Whether this type has the given name or belongs to the given group.
  pub fn is(&self, name_or_group: &str) -> bool {
    self.inner.name == name_or_group
      || self.inner.groups.iter().any(|group| group == name_or_group)
  }

  /// The value of a typed property, when this type carries one.
  pub fn prop<T: Send + Sync + 'static>(&self, prop: &NodeProp<T>) -> Option<&T> {
    self
      .inner
      .props
      .get(&prop.id)
      .and_then(|value| value.downcast_ref::<T>())
  }
}

impl NodeTypeBuilder {
  #[must_use]
  pub fn top(mut self) -> Self {
    self.flags |= NodeFlags::TOP;
    self
  }

  #[must_use]
  pub fn error(mut self) -> Self {
    self.flags |= NodeFlags::ERROR;
    self
  }

  #[must_use]
  pub fn anonymous(mut self) -> Self {
    self.flags |= NodeFlags::ANONYMOUS;
    self
  }

  #[must_use]
  pub fn skipped(mut self) -> Self {
    self.flags |= NodeFlags::SKIPPED;
    self
  }

  #[must_use]
  pub fn group(mut self, group: impl Into<String>) -> Self {
    self.groups.push(group.into());
    self
  }

  #[must_use]
  pub fn prop<T: Send + Sync + 'static>(mut self, prop: &NodeProp<T>, value: T) -> Self {
    self.props.insert(prop.id, Arc::new(value));
    self
  }

  pub fn finish(self) -> NodeType {
    NodeType {
      inner: Arc::new(NodeTypeInner {
        name:   self.name,
        id:     self.id,
        flags:  self.flags,
        groups: self.groups,
        props:  self.props,
      }),
    }
  }
}

/// The id-indexed registry of node types shared by a parser and its trees.
#[derive(Clone, Debug)]
pub struct NodeSet {
  types: Arc<Vec<NodeType>>,
}

impl NodeSet {
  /// Build a set. Types must be listed in id order: `types[i].id == i`.
  pub fn new(types: Vec<NodeType>) -> Result<Self> {
    for (index, node_type) in types.iter().enumerate() {
      if node_type.id() as usize != index {
        return Err(TreeError::MismatchedId {
          id: node_type.id(),
          index,
        });
      }
    }
    Ok(Self {
      types: Arc::new(types),
    })
  }

  pub fn get(&self, id: u16) -> Result<&NodeType> {
    self
      .types
      .get(id as usize)
      .ok_or(TreeError::UnknownType { id })
  }

  pub fn len(&self) -> usize {
    self.types.len()
  }

  pub fn is_empty(&self) -> bool {
    self.types.is_empty()
  }
}

/// A child of a tree node.
#[derive(Clone)]
pub enum TreeChild {
  Tree(Arc<Tree>),
  Buffer(Arc<TreeBuffer>),
}

impl TreeChild {
  pub(crate) fn len(&self) -> usize {
    match self {
      TreeChild::Tree(tree) => tree.len(),
      TreeChild::Buffer(buffer) => buffer.len(),
    }
  }
}

/// A syntax tree node with structured children.
pub struct Tree {
  node_type:                NodeType,
  children:                 Vec<TreeChild>,
  /// Child start offsets, relative to this tree's start.
  positions:                Vec<usize>,
  len:                      usize,
  /// Recent resolve queries; see `node::ResolveCache`.
  pub(crate) resolve_cache: crate::node::ResolveCache,
}

/// Many small nodes packed into one array: preorder quads
/// `[type_id, from, to, end_index]` with positions relative to the buffer
/// start and `end_index` pointing one past the node's subtree.
pub struct TreeBuffer {
  set:    NodeSet,
  buffer: Vec<u32>,
  len:    usize,
}

impl TreeBuffer {
  pub fn new(set: NodeSet, buffer: Vec<u32>, len: usize) -> Result<Self> {
    if buffer.len() % 4 != 0 {
      return Err(TreeError::MalformedBuffer("length not a multiple of four"));
    }
    Ok(Self { set, buffer, len })
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn set(&self) -> &NodeSet {
    &self.set
  }

  /// Number of nodes in the buffer.
  pub fn node_count(&self) -> usize {
    self.buffer.len() / 4
  }

  pub(crate) fn type_id(&self, index: usize) -> u16 {
    self.buffer[index * 4] as u16
  }

  pub(crate) fn from(&self, index: usize) -> usize {
    self.buffer[index * 4 + 1] as usize
  }

  pub(crate) fn to(&self, index: usize) -> usize {
    self.buffer[index * 4 + 2] as usize
  }

  /// Quad index one past this node's subtree.
  pub(crate) fn end_index(&self, index: usize) -> usize {
    self.buffer[index * 4 + 3] as usize
  }

  pub(crate) fn node_type(&self, index: usize) -> &NodeType {
    self
      .set
      .get(self.type_id(index))
      .expect("buffers are built against their own node set")
  }

  /// The quad index of the parent of `index` within the buffer, if any.
  pub(crate) fn parent_index(&self, index: usize) -> Option<usize> {
    let mut scan = index;
    while scan > 0 {
      scan -= 1;
      if self.end_index(scan) > index {
        return Some(scan);
      }
    }
    None
  }
}

/// Input to [`Tree::build`].
pub struct BufferData {
  /// Postorder quads `[type_id, from, to, size]` with absolute positions;
  /// `size` counts the quads of the node's subtree, itself included.
  pub buffer:            Vec<u32>,
  pub node_set:          NodeSet,
  pub top_id:            u16,
  /// Subtrees of at most this many quads stay packed as [`TreeBuffer`]s.
  pub max_buffer_length: usize,
}

pub const DEFAULT_BUFFER_LENGTH: usize = 256;

impl Tree {
  pub fn new(
    node_type: NodeType,
    children: Vec<TreeChild>,
    positions: Vec<usize>,
    len: usize,
  ) -> Arc<Tree> {
    debug_assert_eq!(children.len(), positions.len());
    Arc::new(Tree {
      node_type,
      children,
      positions,
      len,
      resolve_cache: crate::node::ResolveCache::default(),
    })
  }

  /// An empty tree of the given type.
  pub fn empty(node_type: NodeType) -> Arc<Tree> {
    Tree::new(node_type, Vec::new(), Vec::new(), 0)
  }

  pub fn node_type(&self) -> &NodeType {
    &self.node_type
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn children(&self) -> &[TreeChild] {
    &self.children
  }

  pub fn positions(&self) -> &[usize] {
    &self.positions
  }

  /// Build a tree from a flat postorder quad buffer.
  pub fn build(data: BufferData) -> Result<Arc<Tree>> {
    if data.buffer.len() % 4 != 0 {
      return Err(TreeError::MalformedBuffer("length not a multiple of four"));
    }
    let quads = data.buffer.len() / 4;
    let top_type = data.node_set.get(data.top_id)?.clone();
    if quads == 0 {
      return Ok(Tree::empty(top_type));
    }

    let quad = |index: usize| -> (u16, usize, usize, usize) {
      (
        data.buffer[index * 4] as u16,
        data.buffer[index * 4 + 1] as usize,
        data.buffer[index * 4 + 2] as usize,
        data.buffer[index * 4 + 3] as usize,
      )
    };

    // Children of the region [start, end) in postorder are the maximal
    // subtrees ending at `end`, `end - size`, ...
    let max_len = data.max_buffer_length.max(1);

    struct Builder<'a> {
      quad:    &'a dyn Fn(usize) -> (u16, usize, usize, usize),
      set:     &'a NodeSet,
      max_len: usize,
    }

    impl Builder<'_> {
      /// Build a structured node for a subtree too large to stay packed.
      /// The node's own quad sits at `end - 1`.
      fn node(&self, start: usize, end: usize) -> Result<TreeChild> {
        let (type_id, from, to, size) = (self.quad)(end - 1);
        if size != end - start {
          return Err(TreeError::MalformedBuffer("subtree size mismatch"));
        }
        let node_type = self.set.get(type_id)?.clone();
        let (children, positions) = self.children(start, end - 1, from)?;
        Ok(TreeChild::Tree(Tree::new(
          node_type,
          children,
          positions,
          to - from,
        )))
      }

      /// Build the child list for the postorder region [start, end).
      /// Runs of consecutive small subtrees are packed into shared buffers;
      /// larger subtrees become structured nodes.
      fn children(
        &self,
        start: usize,
        end: usize,
        base: usize,
      ) -> Result<(Vec<TreeChild>, Vec<usize>)> {
        let mut regions: Vec<(usize, usize)> = Vec::new();
        let mut scan = end;
        while scan > start {
          let (_, _, _, size) = (self.quad)(scan - 1);
          if size == 0 || size > scan - start {
            return Err(TreeError::MalformedBuffer("subtree size out of range"));
          }
          regions.push((scan - size, scan));
          scan -= size;
        }
        regions.reverse();

        let region_from = |region: (usize, usize)| (self.quad)(region.1 - 1).1;

        let mut children: Vec<TreeChild> = Vec::new();
        let mut positions: Vec<usize> = Vec::new();
        let mut index = 0;
        while index < regions.len() {
          let (r_start, r_end) = regions[index];
          let size = r_end - r_start;
          if size > self.max_len {
            children.push(self.node(r_start, r_end)?);
            positions.push(region_from(regions[index]) - base);
            index += 1;
            continue;
          }
          // Greedily extend the run of small siblings sharing one buffer.
          let mut next = index + 1;
          let mut total = size;
          while next < regions.len() {
            let next_size = regions[next].1 - regions[next].0;
            if total + next_size > self.max_len {
              break;
            }
            total += next_size;
            next += 1;
          }
          let buffer_from = region_from(regions[index]);
          let buffer = self.pack(r_start, regions[next - 1].1, buffer_from)?;
          children.push(TreeChild::Buffer(Arc::new(buffer)));
          positions.push(buffer_from - base);
          index = next;
        }
        Ok((children, positions))
      }

      /// Pack the postorder region [start, end) into a preorder buffer with
      /// positions relative to `base`.
      fn pack(&self, start: usize, end: usize, base: usize) -> Result<TreeBuffer> {
        let mut out: Vec<u32> = Vec::with_capacity((end - start) * 4);
        let mut len = 0;
        self.pack_into(start, end, base, &mut out)?;
        for index in 0..out.len() / 4 {
          len = len.max(out[index * 4 + 2] as usize);
        }
        TreeBuffer::new(self.set.clone(), out, len)
      }

      fn pack_into(
        &self,
        start: usize,
        end: usize,
        base: usize,
        out: &mut Vec<u32>,
      ) -> Result<()> {
        // Region holds a list of postorder subtrees; emit each in preorder.
        let mut subtrees: Vec<(usize, usize)> = Vec::new();
        let mut scan = end;
        while scan > start {
          let (_, _, _, size) = (self.quad)(scan - 1);
          if size == 0 || size > scan - start {
            return Err(TreeError::MalformedBuffer("subtree size out of range"));
          }
          subtrees.push((scan - size, scan));
          scan -= size;
        }
        for (sub_start, sub_end) in subtrees.into_iter().rev() {
          let (type_id, from, to, _) = (self.quad)(sub_end - 1);
          let header = out.len() / 4;
          out.extend_from_slice(&[
            type_id as u32,
            (from - base) as u32,
            (to - base) as u32,
            0,
          ]);
          self.pack_into(sub_start, sub_end - 1, base, out)?;
          let end_index = out.len() / 4;
          out[header * 4 + 3] = end_index as u32;
        }
        Ok(())
      }
    }

    let builder = Builder {
      quad:    &quad,
      set:     &data.node_set,
      max_len,
    };

    let (_, root_from, root_to, size) = quad(quads - 1);
    if size != quads {
      return Err(TreeError::MalformedBuffer("root does not cover the buffer"));
    }
    let (children, positions) = builder.children(0, quads - 1, root_from)?;
    Ok(Tree::new(top_type, children, positions, root_to - root_from))
  }
}

impl std::fmt::Debug for Tree {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Tree({} len {} children {})",
      self.node_type.name(),
      self.len,
      self.children.len()
    )
  }
}

#[cfg(test)]
mod test {
  use super::*;

  pub(crate) fn test_set() -> NodeSet {
    NodeSet::new(vec![
      NodeType::build("Document", 0).top().finish(),
      NodeType::build("Word", 1).group("atom").finish(),
      NodeType::build("Space", 2).anonymous().skipped().finish(),
      NodeType::build("Error", 3).error().finish(),
    ])
    .unwrap()
  }

  #[test]
  fn node_set_validates_ids() {
    let result = NodeSet::new(vec![NodeType::build("Oops", 3).finish()]);
    assert_eq!(result.unwrap_err(), TreeError::MismatchedId { id: 3, index: 0 });
  }

  #[test]
  fn type_predicates_and_groups() {
    let set = test_set();
    let word = set.get(1).unwrap();
    assert!(word.is("Word"));
    assert!(word.is("atom"));
    assert!(!word.is("Space"));
    assert!(set.get(2).unwrap().is_anonymous());
    assert!(set.get(3).unwrap().is_error());
    assert!(set.get(0).unwrap().is_top());
  }

  #[test]
  fn node_props_are_typed() {
    let closed_by: NodeProp<&'static str> = NodeProp::define();
    let indent: NodeProp<i32> = NodeProp::define();
    let paren = NodeType::build("Paren", 0)
      .prop(&closed_by, ")")
      .finish();
    assert_eq!(paren.prop(&closed_by), Some(&")"));
    assert_eq!(paren.prop(&indent), None);
  }

  #[test]
  fn build_small_doc_stays_packed() {
    let set = test_set();
    // "ab cd": Word(0,2) Word(3,5) under Document(0,5).
    let buffer = vec![
      1, 0, 2, 1, // Word
      1, 3, 5, 1, // Word
      0, 0, 5, 3, // Document
    ];
    let tree = Tree::build(BufferData {
      buffer,
      node_set: set,
      top_id: 0,
      max_buffer_length: DEFAULT_BUFFER_LENGTH,
    })
    .unwrap();
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.children().len(), 1);
    assert!(matches!(tree.children()[0], TreeChild::Buffer(_)));
    if let TreeChild::Buffer(buffer) = &tree.children()[0] {
      assert_eq!(buffer.node_count(), 2);
      assert_eq!(TreeBuffer::type_id(buffer, 0), 1);
      assert_eq!(buffer.from(0), 0);
      assert_eq!(buffer.to(1), 5);
      assert_eq!(buffer.end_index(0), 1);
    }
  }

  #[test]
  fn build_promotes_large_subtrees() {
    let set = test_set();
    // Ten words; max_buffer_length 4 forces structured children.
    let mut buffer = Vec::new();
    for i in 0..10u32 {
      buffer.extend_from_slice(&[1, i * 2, i * 2 + 1, 1]);
    }
    buffer.extend_from_slice(&[0, 0, 19, 11]);
    let tree = Tree::build(BufferData {
      buffer,
      node_set: set,
      top_id: 0,
      max_buffer_length: 4,
    })
    .unwrap();
    assert_eq!(tree.len(), 19);
    // All children must still be reachable and well-formed.
    let total: usize = tree
      .children()
      .iter()
      .map(|child| {
        match child {
          TreeChild::Tree(tree) => tree.children().len(),
          TreeChild::Buffer(buffer) => buffer.node_count(),
        }
      })
      .sum();
    assert_eq!(total, 10);
  }

  #[test]
  fn build_rejects_malformed_buffers() {
    let set = test_set();
    let result = Tree::build(BufferData {
      buffer:            vec![1, 0, 2, 1],
      node_set:          set.clone(),
      top_id:            0,
      max_buffer_length: DEFAULT_BUFFER_LENGTH,
    });
    // Root quad must cover the whole buffer; a lone Word does, so this one
    // builds (a single-node document).
    assert!(result.is_ok());

    let result = Tree::build(BufferData {
      buffer:            vec![1, 0, 2],
      node_set:          set,
      top_id:            0,
      max_buffer_length: DEFAULT_BUFFER_LENGTH,
    });
    assert_eq!(
      result.unwrap_err(),
      TreeError::MalformedBuffer("length not a multiple of four")
    );
  }
}
