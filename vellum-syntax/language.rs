//! The parser coordinator.
//!
//! [`syntax`] builds the extension that keeps a parse context on the state:
//! a state field holding the current (possibly partial) tree and the
//! reusable [`TreeFragment`]s of the previous parse, plus the facet that
//! exposes it to consumers.
//!
//! On every document change the coordinator maps the fragments through the
//! change set (widened by the parser's safety margins), then drives a fresh
//! incremental parse for a clock-bounded budget. A parse that runs out of
//! budget is stopped via [`PartialParse::stop_at`] and yields a tree for the
//! parsed prefix; the unparsed suffix is picked up by later transactions or
//! by [`ensure_syntax_tree`]. A parser failure keeps the previous tree,
//! records a one-shot diagnostic, and does not fail the transaction.
//!
//! All timing goes through the state's `clock` facet, so tests inject a
//! fake clock and stay deterministic.

use std::sync::{
  Arc,
  OnceLock,
};

use tracing::{
  debug,
  warn,
};
use vellum_state::{
  extension::Extension,
  facet::Facet,
  field::StateField,
  state::{
    ClockFn,
    EditorState,
    clock,
  },
  text::Text,
  transaction::Transaction,
};

use crate::{
  parse::{
    ParseError,
    Parser,
    PartialParse,
    TreeFragment,
  },
  tree::Tree,
};

/// How long a transaction may spend parsing synchronously, in clock
/// milliseconds. Enough for ordinary edits with fragment reuse; bigger work
/// is left for follow-up transactions or `ensure_syntax_tree`.
pub const PARSE_BUDGET_MS: u64 = 20;

/// The parse context stored per state.
#[derive(Clone)]
pub struct SyntaxState {
  parser:      Arc<dyn Parser>,
  tree:        Option<Arc<Tree>>,
  fragments:   Vec<TreeFragment>,
  /// Positions below this are covered by `tree`.
  parsed_upto: usize,
  error:       Option<ParseError>,
}

fn syntax_state_facet() -> &'static Facet<Arc<SyntaxState>> {
  static FACET: OnceLock<Facet<Arc<SyntaxState>>> = OnceLock::new();
  FACET.get_or_init(Facet::define)
}

/// The extension that drives the given parser over the state's document.
pub fn syntax(parser: Arc<dyn Parser>) -> Extension {
  let create_parser = parser.clone();
  let field: StateField<SyntaxState> = StateField::define(
    move |state| SyntaxState::create(create_parser.clone(), state),
    SyntaxState::apply,
  );
  let field_for_facet = field.clone();
  Extension::list(vec![
    field.extension(),
    syntax_state_facet().compute(vec![field.dep()], move |state| {
      state
        .field(&field_for_facet)
        .expect("the syntax field is installed alongside this computation")
    }),
  ])
}

impl SyntaxState {
  fn create(parser: Arc<dyn Parser>, state: &EditorState) -> SyntaxState {
    let clock = state.facet(clock());
    let outcome = work(
      &parser,
      state.doc(),
      Vec::new(),
      &clock,
      PARSE_BUDGET_MS,
      None,
    );
    SyntaxState::from_outcome(parser, Vec::new(), None, 0, outcome, state.doc().len())
  }

  fn apply(&self, tr: &Transaction) -> SyntaxState {
    let new_len = tr.new_doc().len();
    let (safe_from, safe_to) = self.parser.safe_margin();

    let fragments = if tr.doc_changed() {
      TreeFragment::apply_changes(&self.fragments, &tr.changes().desc(), safe_from, safe_to)
    } else {
      if self.parsed_upto >= new_len {
        // Nothing changed and the tree is complete.
        return self.clone();
      }
      self.fragments.clone()
    };

    let clock = tr.start_state().facet(clock());
    let outcome = work(
      &self.parser,
      tr.new_doc(),
      fragments.clone(),
      &clock,
      PARSE_BUDGET_MS,
      None,
    );
    SyntaxState::from_outcome(
      self.parser.clone(),
      fragments,
      self.tree.clone(),
      self.parsed_upto,
      outcome,
      new_len,
    )
  }

  fn from_outcome(
    parser: Arc<dyn Parser>,
    old_fragments: Vec<TreeFragment>,
    old_tree: Option<Arc<Tree>>,
    old_upto: usize,
    outcome: WorkOutcome,
    doc_len: usize,
  ) -> SyntaxState {
    match outcome {
      WorkOutcome::Done { tree, parsed_upto } => {
        debug!(parsed_upto, doc_len, "syntax parse advanced");
        SyntaxState {
          parser,
          fragments: TreeFragment::add_tree(tree.clone(), &old_fragments),
          tree: Some(tree),
          parsed_upto,
          error: None,
        }
      },
      WorkOutcome::Failed(error) => {
        warn!(%error, "parser failed; keeping previous tree");
        // The previous tree survives for consumers, but coverage only
        // extends to the prefix the surviving fragments still vouch for.
        let covered = old_fragments
          .first()
          .filter(|fragment| fragment.from == 0 && !fragment.open_start)
          .map(|fragment| fragment.to)
          .unwrap_or(0);
        SyntaxState {
          parser,
          tree: old_tree,
          fragments: old_fragments,
          parsed_upto: covered.min(old_upto).min(doc_len),
          error: Some(error),
        }
      },
    }
  }
}

enum WorkOutcome {
  Done {
    tree:        Arc<Tree>,
    parsed_upto: usize,
  },
  Failed(ParseError),
}

/// Drive a parse until it finishes or the budget runs out, in which case it
/// is stopped at the parsed position and finishes with a prefix tree.
fn work(
  parser: &Arc<dyn Parser>,
  doc: &Text,
  fragments: Vec<TreeFragment>,
  clock: &ClockFn,
  budget_ms: u64,
  upto: Option<usize>,
) -> WorkOutcome {
  let start = clock();
  let mut parse = parser.create_parse(doc.clone(), fragments, Vec::new());
  loop {
    match parse.advance() {
      Err(error) => return WorkOutcome::Failed(error),
      Ok(Some(tree)) => {
        let parsed_upto = parse.stopped_at().unwrap_or(doc.len()).min(doc.len());
        return WorkOutcome::Done { tree, parsed_upto };
      },
      Ok(None) => {
        let done_enough = upto.is_some_and(|upto| parse.parsed_pos() >= upto);
        if (done_enough || clock().saturating_sub(start) >= budget_ms)
          && parse.stopped_at().is_none()
        {
          parse.stop_at(parse.parsed_pos());
        }
      },
    }
  }
}

fn current(state: &EditorState) -> Option<Arc<SyntaxState>> {
  state.facet(syntax_state_facet()).first().cloned()
}

/// The current syntax tree, possibly covering only a prefix of the
/// document. `None` when no parser is configured or no parse has succeeded
/// yet.
pub fn syntax_tree(state: &EditorState) -> Option<Arc<Tree>> {
  current(state)?.tree.clone()
}

/// Whether the current tree covers the document up to `upto`.
pub fn syntax_tree_available(state: &EditorState, upto: usize) -> bool {
  current(state).is_some_and(|syntax| syntax.parsed_upto >= upto.min(state.doc().len()))
}

/// The diagnostic from the most recent failed parse, if any.
pub fn syntax_error(state: &EditorState) -> Option<ParseError> {
  current(state)?.error.clone()
}

/// Drive the parser synchronously until the tree covers `upto` or
/// `timeout_ms` clock milliseconds elapse. Returns the resulting tree, or
/// `None` on timeout or parse failure. The state itself is not modified;
/// the work is repeated from the saved fragments, so a subsequent
/// transaction reaches the same tree cheaply.
pub fn ensure_syntax_tree(
  state: &EditorState,
  upto: usize,
  timeout_ms: u64,
) -> Option<Arc<Tree>> {
  let syntax = current(state)?;
  let upto = upto.min(state.doc().len());
  if syntax.parsed_upto >= upto {
    return syntax.tree.clone();
  }

  let clock = state.facet(clock());
  match work(
    &syntax.parser,
    state.doc(),
    syntax.fragments.clone(),
    &clock,
    timeout_ms,
    Some(upto),
  ) {
    WorkOutcome::Done { tree, parsed_upto } if parsed_upto >= upto => Some(tree),
    _ => None,
  }
}

#[cfg(test)]
mod test {
  use std::sync::atomic::{
    AtomicBool,
    AtomicU64,
    AtomicUsize,
    Ordering,
  };

  use vellum_state::{
    state::StateConfig,
    transaction::TransactionSpec,
  };

  use super::*;
  use crate::{
    node::{
      IterMode,
      TreeNav,
    },
    parse::ParseRange,
    tree::{
      BufferData,
      DEFAULT_BUFFER_LENGTH,
      NodeSet,
      NodeType,
    },
  };

  const DOCUMENT: u16 = 0;
  const WORD: u16 = 1;

  fn word_set() -> NodeSet {
    NodeSet::new(vec![
      NodeType::build("Document", DOCUMENT).top().finish(),
      NodeType::build("Word", WORD).group("atom").finish(),
    ])
    .unwrap()
  }

  /// Parses whitespace-separated words, one word per `advance`, reusing
  /// fragment-covered words without rescanning them.
  struct WordParser {
    set:    NodeSet,
    reused: Arc<AtomicUsize>,
  }

  impl WordParser {
    fn new() -> Arc<Self> {
      Arc::new(Self {
        set:    word_set(),
        reused: Arc::new(AtomicUsize::new(0)),
      })
    }
  }

  struct WordParse {
    set:       NodeSet,
    reused:    Arc<AtomicUsize>,
    input:     Text,
    fragments: Vec<TreeFragment>,
    words:     Vec<(usize, usize)>,
    pos:       usize,
    stop:      Option<usize>,
  }

  impl WordParse {
    fn finish(&self) -> Arc<Tree> {
      let end = match self.stop {
        Some(stop) => self.pos.min(stop),
        None => self.input.len(),
      };
      let mut buffer = Vec::new();
      for &(from, to) in &self.words {
        buffer.extend_from_slice(&[WORD as u32, from as u32, to as u32, 1]);
      }
      buffer.extend_from_slice(&[
        DOCUMENT as u32,
        0,
        end as u32,
        self.words.len() as u32 + 1,
      ]);
      Tree::build(BufferData {
        buffer,
        node_set: self.set.clone(),
        top_id: DOCUMENT,
        max_buffer_length: DEFAULT_BUFFER_LENGTH,
      })
      .expect("word buffers are well-formed")
    }

    /// Words stored in a fragment's tree, in current-document coordinates.
    fn fragment_words(fragment: &TreeFragment) -> Vec<(usize, usize)> {
      let mut words = Vec::new();
      let mut cursor = fragment.tree.cursor(IterMode::empty());
      while cursor.next() {
        if cursor.node_type().id() == WORD {
          let from = cursor.from() as i64 - fragment.offset;
          let to = cursor.to() as i64 - fragment.offset;
          if from >= 0 {
            words.push((from as usize, to as usize));
          }
        }
      }
      words
    }
  }

  impl PartialParse for WordParse {
    fn advance(&mut self) -> Result<Option<Arc<Tree>>, ParseError> {
      if self.stop.is_some() || self.pos >= self.input.len() {
        return Ok(Some(self.finish()));
      }

      // Reuse a fragment covering the current position.
      while let Some(fragment) = self.fragments.first().cloned() {
        if fragment.to <= self.pos {
          self.fragments.remove(0);
          continue;
        }
        if fragment.from > self.pos {
          break;
        }
        let mut reused = 0;
        for (from, to) in Self::fragment_words(&fragment) {
          if from >= self.pos && to <= fragment.to {
            self.words.push((from, to));
            reused += 1;
          }
        }
        self.reused.fetch_add(reused, Ordering::Relaxed);
        self.pos = fragment.to;
        self.fragments.remove(0);
        return Ok(None);
      }

      // Scan one word from the text.
      let mut pos = self.pos;
      while pos < self.input.len() && self.input.char_at(pos) == Some(' ') {
        pos += 1;
      }
      let word_from = pos;
      while pos < self.input.len() && self.input.char_at(pos) != Some(' ') {
        pos += 1;
      }
      if pos > word_from {
        self.words.push((word_from, pos));
      }
      self.pos = pos;
      Ok(None)
    }

    fn parsed_pos(&self) -> usize {
      self.pos
    }

    fn stop_at(&mut self, pos: usize) {
      self.stop = Some(pos);
    }

    fn stopped_at(&self) -> Option<usize> {
      self.stop
    }
  }

  impl Parser for WordParser {
    fn create_parse(
      &self,
      input: Text,
      fragments: Vec<TreeFragment>,
      _ranges: Vec<ParseRange>,
    ) -> Box<dyn PartialParse> {
      Box::new(WordParse {
        set: self.set.clone(),
        reused: self.reused.clone(),
        input,
        fragments,
        words: Vec::new(),
        pos: 0,
        stop: None,
      })
    }

    fn safe_margin(&self) -> (usize, usize) {
      // A word's extent depends on one neighboring character each way.
      (1, 1)
    }
  }

  struct FlakyParser {
    inner: Arc<WordParser>,
    fail:  AtomicBool,
  }

  impl Parser for FlakyParser {
    fn create_parse(
      &self,
      input: Text,
      fragments: Vec<TreeFragment>,
      ranges: Vec<ParseRange>,
    ) -> Box<dyn PartialParse> {
      if self.fail.load(Ordering::Relaxed) {
        struct Failing;
        impl PartialParse for Failing {
          fn advance(&mut self) -> Result<Option<Arc<Tree>>, ParseError> {
            Err(ParseError::Failed("grammar exploded".to_owned()))
          }

          fn parsed_pos(&self) -> usize {
            0
          }

          fn stop_at(&mut self, _pos: usize) {}

          fn stopped_at(&self) -> Option<usize> {
            None
          }
        }
        Box::new(Failing)
      } else {
        self.inner.create_parse(input, fragments, ranges)
      }
    }
  }

  fn state_with_parser(doc: &str, parser: Arc<dyn Parser>) -> EditorState {
    EditorState::create(
      StateConfig::new()
        .with_doc_str(doc)
        .with_extensions(vec![syntax(parser)]),
    )
    .unwrap()
  }

  fn edit(state: &EditorState, from: usize, to: usize, insert: &str) -> EditorState {
    state
      .update(vec![TransactionSpec::new().with_changes(vec![(
        from,
        to,
        (!insert.is_empty()).then(|| insert.into()),
      )])])
      .unwrap()
      .state()
      .clone()
  }

  #[test]
  fn initial_parse_builds_a_tree() {
    let state = state_with_parser("one two three", WordParser::new());
    let tree = syntax_tree(&state).unwrap();
    assert_eq!(tree.len(), 13);
    assert!(syntax_tree_available(&state, 13));

    let words: Vec<_> = {
      let mut out = Vec::new();
      tree.iterate(
        0,
        tree.len(),
        |node| {
          if node.node_type().name() == "Word" {
            out.push((node.from(), node.to()));
          }
          true
        },
        |_| {},
      );
      out
    };
    assert_eq!(words, vec![(0, 3), (4, 7), (8, 13)]);
  }

  #[test]
  fn incremental_parse_matches_fresh_parse() {
    let parser = WordParser::new();
    let mut state = state_with_parser("alpha beta gamma delta", parser.clone());

    let edits: Vec<(usize, usize, &str)> = vec![
      (0, 0, "zero "),
      (11, 15, "XX"),
      (5, 6, ""),
      (0, 4, ""),
    ];
    for (from, to, insert) in edits {
      state = edit(&state, from, to, insert);
      let incremental = syntax_tree(&state).unwrap();
      let fresh = parser.parse(state.doc().clone()).unwrap();
      assert!(
        incremental.tree_eq(&fresh),
        "incremental tree diverged on {:?}",
        state.doc().to_string()
      );
    }
    // The fragments actually carried nodes across the edits.
    assert!(parser.reused.load(Ordering::Relaxed) > 0);
  }

  #[test]
  fn budget_exhaustion_yields_prefix_tree() {
    // A clock that jumps past the budget on every reading makes the
    // coordinator stop after the first unit of work.
    let ticks = AtomicU64::new(0);
    let rushed: ClockFn = Arc::new(move || ticks.fetch_add(PARSE_BUDGET_MS, Ordering::Relaxed));

    let state = EditorState::create(
      StateConfig::new()
        .with_doc_str("one two three")
        .with_extensions(vec![
          syntax(WordParser::new()),
          vellum_state::state::clock().of(rushed),
        ]),
    )
    .unwrap();

    assert!(!syntax_tree_available(&state, 13));
    let tree = syntax_tree(&state).unwrap();
    assert!(tree.len() < 13);

    // Timeout propagates as None.
    assert!(ensure_syntax_tree(&state, 13, 0).is_none());
  }

  #[test]
  fn ensure_syntax_tree_completes_with_budget() {
    let state = state_with_parser("one two three", WordParser::new());
    let tree = ensure_syntax_tree(&state, 13, 1_000).unwrap();
    assert_eq!(tree.len(), 13);
  }

  #[test]
  fn parser_failure_keeps_previous_tree() {
    let flaky = Arc::new(FlakyParser {
      inner: WordParser::new(),
      fail:  AtomicBool::new(false),
    });
    let state = state_with_parser("one two", flaky.clone());
    let before = syntax_tree(&state).unwrap();
    assert!(syntax_error(&state).is_none());

    flaky.fail.store(true, Ordering::Relaxed);
    let state = edit(&state, 0, 0, "x");
    assert!(syntax_error(&state).is_some());
    // The previous tree survives the failure.
    assert!(syntax_tree(&state).unwrap().tree_eq(&before));

    flaky.fail.store(false, Ordering::Relaxed);
    let state = edit(&state, 0, 1, "");
    assert!(syntax_error(&state).is_none());
    assert!(syntax_tree_available(&state, state.doc().len()));
  }
}
