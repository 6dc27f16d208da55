//! Navigation over syntax trees.
//!
//! Two forms, same contract:
//!
//! - [`SyntaxNode`] is a persistent handle: every navigation step returns a
//!   new handle whose parent chain is synthesized on the way down — trees
//!   store no back-pointers.
//! - [`TreeCursor`] is a mutable zipper over the same steps, for tight
//!   traversal loops.
//!
//! Navigation skips anonymous nodes (their children surface in their place)
//! unless [`IterMode::INCLUDE_ANONYMOUS`] is set. Buffer-packed nodes and
//! structured nodes are indistinguishable through this interface.
//!
//! Tree-level `resolve`/`resolve_inner` go through a small per-tree LRU:
//! repeated queries replay the remembered descent path instead of searching
//! every level. Cached entries are plain index paths, keeping trees free of
//! references into themselves.

use std::sync::{
  Arc,
  Mutex,
};

use crate::tree::{
  NodeType,
  Tree,
  TreeBuffer,
  TreeChild,
};

bitflags::bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct IterMode: u8 {
    /// Yield anonymous nodes instead of splicing their children into the
    /// parent's child list.
    const INCLUDE_ANONYMOUS = 0b01;
  }
}

#[derive(Clone)]
enum Kind {
  Tree {
    tree: Arc<Tree>,
  },
  Buffer {
    buffer: Arc<TreeBuffer>,
    /// Absolute position of the buffer's origin.
    start:  usize,
    /// Quad index of this node.
    index:  usize,
  },
}

struct NodeData {
  mode:      IterMode,
  from:      usize,
  to:        usize,
  kind:      Kind,
  parent:    Option<SyntaxNode>,
  /// Index of this node in its parent's raw child list; 0 for the root.
  /// Lets a node be re-reached by path without searching.
  raw_index: usize,
}

/// A zero-copy handle to one node of a syntax tree.
#[derive(Clone)]
pub struct SyntaxNode {
  data: Arc<NodeData>,
}

/// One structural child, before anonymous-node splicing.
#[derive(Clone)]
enum RawChild {
  Tree { tree: Arc<Tree>, from: usize },
  Buffer {
    buffer: Arc<TreeBuffer>,
    start:  usize,
    index:  usize,
  },
}

impl RawChild {
  fn from(&self) -> usize {
    match self {
      RawChild::Tree { from, .. } => *from,
      RawChild::Buffer {
        buffer,
        start,
        index,
      } => start + buffer.from(*index),
    }
  }
}

impl SyntaxNode {
  fn new(
    kind: Kind,
    from: usize,
    to: usize,
    parent: Option<SyntaxNode>,
    mode: IterMode,
    raw_index: usize,
  ) -> Self {
    Self {
      data: Arc::new(NodeData {
        mode,
        from,
        to,
        kind,
        parent,
        raw_index,
      }),
    }
  }

  fn from_raw(raw: &RawChild, parent: &SyntaxNode, raw_index: usize) -> Self {
    match raw {
      RawChild::Tree { tree, from } => {
        Self::new(
          Kind::Tree { tree: tree.clone() },
          *from,
          *from + tree.len(),
          Some(parent.clone()),
          parent.data.mode,
          raw_index,
        )
      },
      RawChild::Buffer {
        buffer,
        start,
        index,
      } => {
        Self::new(
          Kind::Buffer {
            buffer: buffer.clone(),
            start:  *start,
            index:  *index,
          },
          start + buffer.from(*index),
          start + buffer.to(*index),
          Some(parent.clone()),
          parent.data.mode,
          raw_index,
        )
      },
    }
  }

  /// The raw child indices that lead from the root to this node.
  fn raw_path(&self) -> Vec<usize> {
    let mut path = Vec::new();
    let mut node = self.clone();
    while let Some(parent) = node.data.parent.clone() {
      path.push(node.data.raw_index);
      node = parent;
    }
    path.reverse();
    path
  }

  #[inline]
  pub fn from(&self) -> usize {
    self.data.from
  }

  #[inline]
  pub fn to(&self) -> usize {
    self.data.to
  }

  pub fn node_type(&self) -> NodeType {
    match &self.data.kind {
      Kind::Tree { tree } => tree.node_type().clone(),
      Kind::Buffer { buffer, index, .. } => buffer.node_type(*index).clone(),
    }
  }

  pub fn name(&self) -> String {
    self.node_type().name().to_owned()
  }

  /// Whether two handles denote the same node of the same tree.
  pub fn same_node(&self, other: &SyntaxNode) -> bool {
    match (&self.data.kind, &other.data.kind) {
      (Kind::Tree { tree: a }, Kind::Tree { tree: b }) => {
        Arc::ptr_eq(a, b) && self.data.from == other.data.from
      },
      (
        Kind::Buffer {
          buffer: a,
          index: ia,
          ..
        },
        Kind::Buffer {
          buffer: b,
          index: ib,
          ..
        },
      ) => Arc::ptr_eq(a, b) && ia == ib,
      _ => false,
    }
  }

  /// The nearest non-skipped ancestor (anonymous ancestors are skipped
  /// unless the mode includes them).
  pub fn parent(&self) -> Option<SyntaxNode> {
    let mut current = self.data.parent.clone();
    while let Some(node) = current {
      if node.data.mode.contains(IterMode::INCLUDE_ANONYMOUS)
        || !node.node_type().is_anonymous()
      {
        return Some(node);
      }
      current = node.data.parent.clone();
    }
    None
  }

  /// Structural children, before anonymous splicing.
  fn raw_children(&self) -> Vec<RawChild> {
    match &self.data.kind {
      Kind::Tree { tree } => {
        let mut out = Vec::new();
        for (index, child) in tree.children().iter().enumerate() {
          let from = self.data.from + tree.positions()[index];
          match child {
            TreeChild::Tree(sub) => {
              out.push(RawChild::Tree {
                tree: sub.clone(),
                from,
              });
            },
            TreeChild::Buffer(buffer) => {
              let mut quad = 0;
              while quad < buffer.node_count() {
                out.push(RawChild::Buffer {
                  buffer: buffer.clone(),
                  start:  from,
                  index:  quad,
                });
                quad = buffer.end_index(quad);
              }
            },
          }
        }
        out
      },
      Kind::Buffer {
        buffer,
        start,
        index,
      } => {
        let mut out = Vec::new();
        let mut quad = index + 1;
        let end = buffer.end_index(*index);
        while quad < end {
          out.push(RawChild::Buffer {
            buffer: buffer.clone(),
            start:  *start,
            index:  quad,
          });
          quad = buffer.end_index(quad);
        }
        out
      },
    }
  }

  /// Children as seen through the mode: anonymous nodes are expanded in
  /// place unless included.
  fn visible_children(&self) -> Vec<SyntaxNode> {
    let include = self.data.mode.contains(IterMode::INCLUDE_ANONYMOUS);
    let mut out = Vec::new();
    self.collect_children(include, &mut out);
    out
  }

  fn collect_children(&self, include_anonymous: bool, out: &mut Vec<SyntaxNode>) {
    for (index, raw) in self.raw_children().iter().enumerate() {
      let node = SyntaxNode::from_raw(raw, self, index);
      if !include_anonymous && node.node_type().is_anonymous() {
        node.collect_children(include_anonymous, out);
      } else {
        out.push(node);
      }
    }
  }

  pub fn first_child(&self) -> Option<SyntaxNode> {
    self.visible_children().into_iter().next()
  }

  pub fn last_child(&self) -> Option<SyntaxNode> {
    self.visible_children().into_iter().next_back()
  }

  /// The first child ending after `pos`.
  pub fn child_after(&self, pos: usize) -> Option<SyntaxNode> {
    self
      .visible_children()
      .into_iter()
      .find(|child| child.to() > pos)
  }

  /// The last child starting before `pos`.
  pub fn child_before(&self, pos: usize) -> Option<SyntaxNode> {
    self
      .visible_children()
      .into_iter()
      .filter(|child| child.from() < pos)
      .next_back()
  }

  fn sibling(&self, offset: isize) -> Option<SyntaxNode> {
    let parent = self.parent()?;
    let siblings = parent.visible_children();
    let index = siblings.iter().position(|node| node.same_node(self))?;
    let target = index as isize + offset;
    if target < 0 {
      return None;
    }
    siblings.into_iter().nth(target as usize)
  }

  pub fn next_sibling(&self) -> Option<SyntaxNode> {
    self.sibling(1)
  }

  pub fn prev_sibling(&self) -> Option<SyntaxNode> {
    self.sibling(-1)
  }

  /// Whether this node captures `pos`. With side 0 only strict containment
  /// counts (or an exactly-matching zero-width node); a negative side lets
  /// a node ending at `pos` capture it, a positive side one starting there.
  fn covers(&self, pos: usize, side: i8) -> bool {
    use std::cmp::Ordering;
    match side.cmp(&0) {
      Ordering::Equal => {
        (self.data.from < pos && self.data.to > pos)
          || (self.data.from == pos && self.data.to == pos)
      },
      Ordering::Less => self.data.from < pos && self.data.to >= pos,
      Ordering::Greater => self.data.from <= pos && self.data.to > pos,
    }
  }

  fn resolve_from(&self, pos: usize, side: i8, include_anonymous: bool) -> SyntaxNode {
    let mut node = self.clone();
    loop {
      let children = if include_anonymous {
        node
          .raw_children()
          .iter()
          .enumerate()
          .map(|(index, raw)| SyntaxNode::from_raw(raw, &node, index))
          .collect::<Vec<_>>()
      } else {
        node.visible_children()
      };
      match children.into_iter().find(|child| child.covers(pos, side)) {
        Some(child) => node = child,
        None => return node,
      }
    }
  }

  /// The smallest non-anonymous descendant covering `pos`; `side` breaks
  /// zero-width ties (negative associates before the position, positive
  /// after).
  pub fn resolve(&self, pos: usize, side: i8) -> SyntaxNode {
    self.resolve_from(pos, side, false)
  }

  /// Like [`SyntaxNode::resolve`], but without skipping anonymous nodes.
  pub fn resolve_inner(&self, pos: usize, side: i8) -> SyntaxNode {
    self.resolve_from(pos, side, true)
  }

  /// Whether the node's ancestors, from the inside out, match the given
  /// names. The last name must match the direct parent; `""` is a
  /// wildcard.
  pub fn matches_context(&self, context: &[&str]) -> bool {
    let mut node = self.parent();
    for name in context.iter().rev() {
      match node {
        Some(parent) => {
          if !name.is_empty() && parent.node_type().name() != *name {
            return false;
          }
          node = parent.parent();
        },
        None => return false,
      }
    }
    true
  }
}

impl std::fmt::Debug for SyntaxNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}@{}..{}",
      self.node_type().name(),
      self.data.from,
      self.data.to
    )
  }
}

/// Resolve a query through the tree's cache: a hit replays the remembered
/// raw child path instead of searching every level again.
fn cached_resolve(tree: &Arc<Tree>, pos: usize, side: i8, inner: bool) -> SyntaxNode {
  let root = tree.top_node(IterMode::empty());
  if let Some(path) = tree.resolve_cache.get(pos, side, inner) {
    if let Some(node) = replay(&root, &path) {
      return node;
    }
  }
  let node = root.resolve_from(pos, side, inner);
  tree.resolve_cache.put(pos, side, inner, node.raw_path());
  node
}

fn replay(root: &SyntaxNode, path: &[usize]) -> Option<SyntaxNode> {
  let mut node = root.clone();
  for &index in path {
    let raws = node.raw_children();
    let raw = raws.get(index)?;
    node = SyntaxNode::from_raw(raw, &node, index);
  }
  Some(node)
}

/// Remembered resolve queries on one tree. Entries store the raw child
/// path from the root — plain indices, no handles — so a tree never holds
/// references back into itself.
pub(crate) struct ResolveCache {
  entries: Mutex<Vec<CacheEntry>>,
}

struct CacheEntry {
  pos:   usize,
  side:  i8,
  inner: bool,
  path:  Vec<usize>,
}

/// Queries remembered per tree. Repeated lookups cluster around the edit
/// point, so a handful of entries is enough.
const RESOLVE_CACHE_SIZE: usize = 8;

impl Default for ResolveCache {
  fn default() -> Self {
    Self {
      entries: Mutex::new(Vec::new()),
    }
  }
}

impl ResolveCache {
  fn get(&self, pos: usize, side: i8, inner: bool) -> Option<Vec<usize>> {
    let mut entries = self.entries.lock().ok()?;
    let at = entries
      .iter()
      .position(|entry| entry.pos == pos && entry.side == side && entry.inner == inner)?;
    // Refresh the hit: most recent entries live at the back.
    let entry = entries.remove(at);
    let path = entry.path.clone();
    entries.push(entry);
    Some(path)
  }

  fn put(&self, pos: usize, side: i8, inner: bool, path: Vec<usize>) {
    let Ok(mut entries) = self.entries.lock() else {
      return;
    };
    if let Some(at) = entries
      .iter()
      .position(|entry| entry.pos == pos && entry.side == side && entry.inner == inner)
    {
      entries.remove(at);
    } else if entries.len() >= RESOLVE_CACHE_SIZE {
      entries.remove(0);
    }
    entries.push(CacheEntry {
      pos,
      side,
      inner,
      path,
    });
  }
}

/// A mutable zipper over a tree.
pub struct TreeCursor {
  node: SyntaxNode,
}

impl TreeCursor {
  /// The current node as a persistent handle.
  pub fn node(&self) -> SyntaxNode {
    self.node.clone()
  }

  pub fn node_type(&self) -> NodeType {
    self.node.node_type()
  }

  pub fn from(&self) -> usize {
    self.node.from()
  }

  pub fn to(&self) -> usize {
    self.node.to()
  }

  fn step(&mut self, next: Option<SyntaxNode>) -> bool {
    match next {
      Some(node) => {
        self.node = node;
        true
      },
      None => false,
    }
  }

  pub fn first_child(&mut self) -> bool {
    let next = self.node.first_child();
    self.step(next)
  }

  pub fn last_child(&mut self) -> bool {
    let next = self.node.last_child();
    self.step(next)
  }

  pub fn parent(&mut self) -> bool {
    let next = self.node.parent();
    self.step(next)
  }

  pub fn next_sibling(&mut self) -> bool {
    let next = self.node.next_sibling();
    self.step(next)
  }

  pub fn prev_sibling(&mut self) -> bool {
    let next = self.node.prev_sibling();
    self.step(next)
  }

  pub fn child_after(&mut self, pos: usize) -> bool {
    let next = self.node.child_after(pos);
    self.step(next)
  }

  pub fn child_before(&mut self, pos: usize) -> bool {
    let next = self.node.child_before(pos);
    self.step(next)
  }

  /// Move to the next node in preorder. Stays put when there is none.
  pub fn next(&mut self) -> bool {
    if self.first_child() {
      return true;
    }
    let saved = self.node.clone();
    loop {
      if self.next_sibling() {
        return true;
      }
      if !self.parent() {
        self.node = saved;
        return false;
      }
    }
  }

  /// Move to the previous node in preorder.
  pub fn prev(&mut self) -> bool {
    if !self.prev_sibling() {
      return self.parent();
    }
    while self.last_child() {}
    true
  }

  /// Move to the smallest node covering `pos`, climbing first when the
  /// current node does not cover it. Moving to the same position twice is a
  /// fixed point.
  pub fn move_to(&mut self, pos: usize, side: i8) -> &mut Self {
    while self.node.data.parent.is_some() && !self.node.covers(pos, side) {
      if !self.parent() {
        break;
      }
    }
    self.node = self.node.resolve_from(
      pos,
      side,
      self.node.data.mode.contains(IterMode::INCLUDE_ANONYMOUS),
    );
    self
  }

  pub fn match_context(&self, context: &[&str]) -> bool {
    self.node.matches_context(context)
  }
}

/// Navigation entry points on a shared tree. Implemented for `Arc<Tree>`
/// because every handle keeps the tree alive.
pub trait TreeNav {
  /// A handle to the tree's root.
  fn top_node(&self, mode: IterMode) -> SyntaxNode;

  fn cursor(&self, mode: IterMode) -> TreeCursor;

  /// A cursor positioned at `pos`.
  fn cursor_at(&self, pos: usize, side: i8) -> TreeCursor;

  /// The smallest non-anonymous node covering `pos`.
  fn resolve(&self, pos: usize, side: i8) -> SyntaxNode;

  fn resolve_inner(&self, pos: usize, side: i8) -> SyntaxNode;

  /// Depth-first traversal of the nodes overlapping `[from, to]`.
  /// `enter` returning false prunes the subtree.
  fn iterate(
    &self,
    from: usize,
    to: usize,
    enter: impl FnMut(&SyntaxNode) -> bool,
    leave: impl FnMut(&SyntaxNode),
  );

  /// Structural equality on the public navigation surface: same node types
  /// at the same positions, in the same preorder.
  fn tree_eq(&self, other: &Arc<Tree>) -> bool;
}

impl TreeNav for Arc<Tree> {
  fn top_node(&self, mode: IterMode) -> SyntaxNode {
    SyntaxNode::new(
      Kind::Tree { tree: self.clone() },
      0,
      self.len(),
      None,
      mode,
      0,
    )
  }

  fn cursor(&self, mode: IterMode) -> TreeCursor {
    TreeCursor {
      node: self.top_node(mode),
    }
  }

  fn cursor_at(&self, pos: usize, side: i8) -> TreeCursor {
    let mut cursor = self.cursor(IterMode::empty());
    cursor.move_to(pos, side);
    cursor
  }

  fn resolve(&self, pos: usize, side: i8) -> SyntaxNode {
    cached_resolve(self, pos, side, false)
  }

  fn resolve_inner(&self, pos: usize, side: i8) -> SyntaxNode {
    cached_resolve(self, pos, side, true)
  }

  fn iterate(
    &self,
    from: usize,
    to: usize,
    mut enter: impl FnMut(&SyntaxNode) -> bool,
    mut leave: impl FnMut(&SyntaxNode),
  ) {
    fn walk(
      node: &SyntaxNode,
      from: usize,
      to: usize,
      enter: &mut impl FnMut(&SyntaxNode) -> bool,
      leave: &mut impl FnMut(&SyntaxNode),
    ) {
      if node.to() < from || node.from() > to {
        return;
      }
      if !enter(node) {
        return;
      }
      for child in node.visible_children() {
        walk(&child, from, to, enter, leave);
      }
      leave(node);
    }
    let root = self.top_node(IterMode::empty());
    walk(&root, from, to, &mut enter, &mut leave);
  }

  fn tree_eq(&self, other: &Arc<Tree>) -> bool {
    fn shape(tree: &Arc<Tree>) -> Vec<(u16, usize, usize)> {
      let mut out = Vec::new();
      tree.iterate(
        0,
        tree.len(),
        |node| {
          out.push((node.node_type().id(), node.from(), node.to()));
          true
        },
        |_| {},
      );
      out
    }
    self.len() == other.len() && shape(self) == shape(other)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::tree::{
    BufferData,
    DEFAULT_BUFFER_LENGTH,
    NodeSet,
    NodeType,
  };

  fn demo_set() -> NodeSet {
    NodeSet::new(vec![
      NodeType::build("Document", 0).top().finish(),
      NodeType::build("Pair", 1).finish(),
      NodeType::build("Word", 2).group("atom").finish(),
      NodeType::build("Glue", 3).anonymous().finish(),
    ])
    .unwrap()
  }

  /// "(ab cd) ef" as: Document(Pair(Word(1,3), Word(4,6)), Glue(Word(8,10)))
  fn demo_tree() -> Arc<Tree> {
    let buffer = vec![
      2, 1, 3, 1, // Word "ab"
      2, 4, 6, 1, // Word "cd"
      1, 0, 7, 3, // Pair
      2, 8, 10, 1, // Word "ef"
      3, 8, 10, 2, // Glue
      0, 0, 10, 6, // Document
    ];
    Tree::build(BufferData {
      buffer,
      node_set: demo_set(),
      top_id: 0,
      max_buffer_length: DEFAULT_BUFFER_LENGTH,
    })
    .unwrap()
  }

  #[test]
  fn child_navigation() {
    let tree = demo_tree();
    let root = tree.top_node(IterMode::empty());
    assert_eq!(root.node_type().name(), "Document");

    let pair = root.first_child().unwrap();
    assert_eq!(pair.node_type().name(), "Pair");
    assert_eq!((pair.from(), pair.to()), (0, 7));

    // The anonymous Glue node is spliced out.
    let ef = pair.next_sibling().unwrap();
    assert_eq!(ef.node_type().name(), "Word");
    assert_eq!((ef.from(), ef.to()), (8, 10));
    assert!(ef.next_sibling().is_none());
    assert_eq!(ef.prev_sibling().unwrap().node_type().name(), "Pair");

    let ab = pair.first_child().unwrap();
    assert_eq!((ab.from(), ab.to()), (1, 3));
    assert_eq!(ab.parent().unwrap().node_type().name(), "Pair");

    let cd = pair.last_child().unwrap();
    assert_eq!((cd.from(), cd.to()), (4, 6));
    assert_eq!(pair.child_after(3).unwrap().from(), 4);
    assert_eq!(pair.child_before(4).unwrap().to(), 3);
  }

  #[test]
  fn include_anonymous_mode() {
    let tree = demo_tree();
    let root = tree.top_node(IterMode::INCLUDE_ANONYMOUS);
    let names: Vec<_> = root
      .visible_children()
      .iter()
      .map(|child| child.node_type().name().to_owned())
      .collect();
    assert_eq!(names, vec!["Pair", "Glue"]);

    let glue = root.last_child().unwrap();
    let ef = glue.first_child().unwrap();
    assert_eq!(ef.parent().unwrap().node_type().name(), "Glue");
  }

  #[test]
  fn resolve_and_sides() {
    let tree = demo_tree();
    assert_eq!(tree.resolve(2, 0).node_type().name(), "Word");
    assert_eq!(tree.resolve(2, 0).from(), 1);
    // Between words, the Pair is the smallest covering node.
    assert_eq!(tree.resolve(3, 0).node_type().name(), "Pair");
    // Zero-width ambiguity at a node edge follows the side.
    assert_eq!(tree.resolve(3, -1).from(), 1);
    assert_eq!(tree.resolve(4, 1).from(), 4);
    assert_eq!(tree.resolve(9, 0).node_type().name(), "Word");
    // resolve_inner synthesizes the full parent path; reading it back
    // through the default mode still skips the anonymous wrapper.
    let inner = tree.resolve_inner(9, 0);
    assert_eq!(inner.node_type().name(), "Word");
    assert_eq!(inner.parent().unwrap().node_type().name(), "Document");
  }

  #[test]
  fn resolve_cache_replays_consistently() {
    let cached = demo_tree();
    let fresh = demo_tree();
    // Work through more distinct queries than the cache holds, twice, so
    // hits, misses, and evictions all happen.
    for _ in 0..2 {
      for pos in 0..=10 {
        for side in [-1, 0, 1] {
          let through_cache = cached.resolve(pos, side);
          let direct = fresh.top_node(IterMode::empty()).resolve(pos, side);
          assert_eq!(
            (through_cache.from(), through_cache.to(), through_cache.name()),
            (direct.from(), direct.to(), direct.name()),
            "resolve({pos}, {side})"
          );
          // A repeated query replays the cached path to the same node.
          assert!(through_cache.same_node(&cached.resolve(pos, side)));
        }
      }
      let inner = cached.resolve_inner(9, 0);
      assert!(inner.same_node(&cached.resolve_inner(9, 0)));
    }
  }

  #[test]
  fn cursor_walks_preorder() {
    let tree = demo_tree();
    let mut cursor = tree.cursor(IterMode::empty());
    let mut names = vec![cursor.node_type().name().to_owned()];
    while cursor.next() {
      names.push(cursor.node_type().name().to_owned());
    }
    assert_eq!(names, vec!["Document", "Pair", "Word", "Word", "Word"]);

    // And back.
    let mut back = Vec::new();
    back.push(cursor.node_type().name().to_owned());
    while cursor.prev() {
      back.push(cursor.node_type().name().to_owned());
    }
    back.reverse();
    assert_eq!(back, names);
  }

  #[test]
  fn cursor_move_to_is_a_fixed_point() {
    let tree = demo_tree();
    let mut cursor = tree.cursor(IterMode::empty());
    cursor.move_to(5, 0);
    let first = (cursor.from(), cursor.to(), cursor.node_type().name().to_owned());
    cursor.move_to(5, 0);
    let second = (cursor.from(), cursor.to(), cursor.node_type().name().to_owned());
    assert_eq!(first, second);
    assert_eq!(first.2, "Word");
  }

  #[test]
  fn context_matching() {
    let tree = demo_tree();
    let ab = tree.resolve(2, 0);
    assert!(ab.matches_context(&["Pair"]));
    assert!(ab.matches_context(&["Document", "Pair"]));
    assert!(ab.matches_context(&["", "Pair"]));
    assert!(!ab.matches_context(&["Pair", "Document"]));
    assert!(!ab.matches_context(&["Document", "Pair", "Word"]));
  }

  #[test]
  fn iterate_prunes_and_ranges() {
    let tree = demo_tree();
    let mut entered = Vec::new();
    tree.iterate(
      0,
      10,
      |node| {
        entered.push(node.node_type().name().to_owned());
        node.node_type().name() != "Pair"
      },
      |_| {},
    );
    // Pair's children are pruned.
    assert_eq!(entered, vec!["Document", "Pair", "Word"]);

    let mut ranged = Vec::new();
    tree.iterate(
      8,
      10,
      |node| {
        ranged.push(node.node_type().name().to_owned());
        true
      },
      |_| {},
    );
    assert_eq!(ranged, vec!["Document", "Word"]);
  }

  #[test]
  fn structural_equality() {
    let a = demo_tree();
    let b = demo_tree();
    assert!(a.tree_eq(&b));

    let other = Tree::build(BufferData {
      buffer:            vec![2, 0, 2, 1, 0, 0, 2, 2],
      node_set:          demo_set(),
      top_id:            0,
      max_buffer_length: DEFAULT_BUFFER_LENGTH,
    })
    .unwrap();
    assert!(!a.tree_eq(&other));
  }
}
