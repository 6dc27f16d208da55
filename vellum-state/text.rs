//! The persistent document model.
//!
//! A [`Text`] is an immutable sequence of characters partitioned into lines.
//! Internally it is a rope (`ropey::Rope`), which gives us a balanced tree of
//! bounded-size leaf chunks with cached length and line counts on branch
//! nodes, structural sharing between revisions, and O(log n) line/offset
//! queries — cloning a `Text` is cheap and `replace` shares every subtree the
//! edit does not touch.
//!
//! # Line endings
//!
//! Documents are stored LF-separated. Reading text in (`Text::from_str`,
//! insertion fragments) normalizes recognized line endings — by default any of
//! LF, CRLF, or CR; callers can narrow recognition to one exact separator
//! (the `line_separator` facet does this at the state level). A trailing
//! separator produces an empty trailing line, and only the last line is
//! unterminated.
//!
//! # Positions
//!
//! All positions are `char` indices. `line_at` and `line` return a [`Line`]
//! whose `to` excludes the line terminator; lines are numbered from 1.

use std::fmt;

use ropey::{
  Rope,
  RopeBuilder,
  RopeSlice,
};
use thiserror::Error;
use vellum_core::line_ending::LineEnding;

pub type Result<T> = std::result::Result<T, TextError>;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TextError {
  #[error("position {pos} is out of bounds for document length {len}")]
  PosOutOfBounds { pos: usize, len: usize },
  #[error("range {from}..{to} is out of bounds for document length {len}")]
  RangeOutOfBounds {
    from: usize,
    to:   usize,
    len:  usize,
  },
  #[error("invalid range: start {from} is after end {to}")]
  InvalidRange { from: usize, to: usize },
  #[error("line number {number} is out of bounds for document with {lines} lines")]
  LineOutOfBounds { number: usize, lines: usize },
}

/// An immutable document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Text {
  rope: Rope,
}

/// One line of a document, as returned by [`Text::line`] and
/// [`Text::line_at`].
///
/// `from` is inclusive, `to` is exclusive of the line terminator, and `text`
/// does not include the terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
  /// 1-based line number.
  pub number: usize,
  pub from:   usize,
  pub to:     usize,
  pub text:   RopeSlice<'a>,
}

impl<'a> Line<'a> {
  /// Length of the line in chars, excluding the terminator.
  pub fn len(&self) -> usize {
    self.to - self.from
  }

  pub fn is_empty(&self) -> bool {
    self.to == self.from
  }
}

/// A piece of a document produced by [`Text::parts`]: either a run of
/// line-break-free text or a line-break marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextPart<'a> {
  Chunk(&'a str),
  LineBreak,
}

impl Text {
  pub fn empty() -> Self {
    Self::default()
  }

  pub(crate) fn from_rope(rope: Rope) -> Self {
    Self { rope }
  }

  /// Build a document from a list of lines. Recognized line endings inside an
  /// entry split it into further lines.
  pub fn of<I, S>(lines: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut builder = RopeBuilder::new();
    let mut first = true;
    for line in lines {
      for piece in split_lines(line.as_ref(), None) {
        if !first {
          builder.append("\n");
        }
        builder.append(piece);
        first = false;
      }
    }
    Self {
      rope: builder.finish(),
    }
  }

  /// Read a document from a string, normalizing any recognized line ending
  /// to LF.
  pub fn from_str(text: &str) -> Self {
    Self::from_str_with(text, None)
  }

  /// Read a document from a string. When `separator` is given, only that
  /// exact sequence is recognized as a line break; otherwise any of LF, CRLF,
  /// or CR is.
  pub fn from_str_with(text: &str, separator: Option<LineEnding>) -> Self {
    let mut builder = RopeBuilder::new();
    let mut first = true;
    for piece in split_lines(text, separator) {
      if !first {
        builder.append("\n");
      }
      builder.append(piece);
      first = false;
    }
    Self {
      rope: builder.finish(),
    }
  }

  /// Length of the document in chars.
  #[inline]
  pub fn len(&self) -> usize {
    self.rope.len_chars()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.rope.len_chars() == 0
  }

  /// Number of lines. Always at least 1: the empty document has one empty
  /// line.
  #[inline]
  pub fn lines(&self) -> usize {
    self.rope.len_lines()
  }

  /// The line around the given position.
  pub fn line_at(&self, pos: usize) -> Result<Line<'_>> {
    if pos > self.len() {
      return Err(TextError::PosOutOfBounds {
        pos,
        len: self.len(),
      });
    }
    let index = self.rope.char_to_line(pos);
    Ok(self.line_inner(index))
  }

  /// The given line, 1-based.
  pub fn line(&self, number: usize) -> Result<Line<'_>> {
    if number == 0 || number > self.lines() {
      return Err(TextError::LineOutOfBounds {
        number,
        lines: self.lines(),
      });
    }
    Ok(self.line_inner(number - 1))
  }

  fn line_inner(&self, index: usize) -> Line<'_> {
    let from = self.rope.line_to_char(index);
    let to = if index + 1 < self.rope.len_lines() {
      // Exclude the terminator (always a single LF internally).
      self.rope.line_to_char(index + 1) - 1
    } else {
      self.rope.len_chars()
    };
    Line {
      number: index + 1,
      from,
      to,
      text: self.rope.slice(from..to),
    }
  }

  fn check_range(&self, from: usize, to: usize) -> Result<()> {
    if from > to {
      return Err(TextError::InvalidRange { from, to });
    }
    if to > self.len() {
      return Err(TextError::RangeOutOfBounds {
        from,
        to,
        len: self.len(),
      });
    }
    Ok(())
  }

  /// A new document holding the given range.
  pub fn slice(&self, from: usize, to: usize) -> Result<Text> {
    self.check_range(from, to)?;
    Ok(Text {
      rope: Rope::from(self.rope.slice(from..to)),
    })
  }

  /// The given range as a string, joined with LF.
  pub fn slice_string(&self, from: usize, to: usize) -> Result<String> {
    self.check_range(from, to)?;
    Ok(self.rope.slice(from..to).to_string())
  }

  /// The given range as a string, joined with the given separator.
  pub fn slice_string_with(&self, from: usize, to: usize, separator: LineEnding) -> Result<String> {
    let slice = self.slice_string(from, to)?;
    if separator == LineEnding::Lf {
      return Ok(slice);
    }
    Ok(slice.replace('\n', separator.as_str()))
  }

  /// Replace the given range with another document, returning the new
  /// document. Untouched subtrees are shared with `self`.
  pub fn replace(&self, from: usize, to: usize, insert: &Text) -> Result<Text> {
    self.check_range(from, to)?;
    let mut builder = RopeBuilder::new();
    append_slice(&mut builder, self.rope.slice(..from));
    append_slice(&mut builder, insert.rope.slice(..));
    append_slice(&mut builder, self.rope.slice(to..));
    Ok(Text {
      rope: builder.finish(),
    })
  }

  /// Append another document to this one.
  pub fn append(&self, other: &Text) -> Text {
    // replace can only fail on a bad range; len..len is always valid.
    let len = self.len();
    self
      .replace(len, len, other)
      .expect("appending at the end is always in bounds")
  }

  /// The char at the given position, if in bounds.
  pub fn char_at(&self, pos: usize) -> Option<char> {
    self.rope.get_char(pos)
  }

  /// Iterate the document as alternating text chunks and line-break markers.
  /// No returned chunk contains a line break, which lets callers traverse
  /// line structure without materializing strings.
  pub fn parts(&self) -> TextParts<'_> {
    TextParts {
      chunks:  self.rope.chunks(),
      current: "",
      pending: false,
    }
  }

  /// The document as a rope slice, for read-only traversal.
  #[inline]
  pub fn as_slice(&self) -> RopeSlice<'_> {
    self.rope.slice(..)
  }
}

fn append_slice(builder: &mut RopeBuilder, slice: RopeSlice<'_>) {
  for chunk in slice.chunks() {
    builder.append(chunk);
  }
}

/// Split `text` into line pieces. With `separator = None`, any of LF, CRLF,
/// CR splits; otherwise only the exact separator does.
fn split_lines(text: &str, separator: Option<LineEnding>) -> impl Iterator<Item = &str> {
  let mut rest = text;
  let mut done = false;
  std::iter::from_fn(move || {
    if done {
      return None;
    }
    let mut iter = rest.char_indices();
    while let Some((at, ch)) = iter.next() {
      let ending = match separator {
        Some(sep) => {
          if rest[at..].starts_with(sep.as_str()) {
            Some(sep)
          } else {
            None
          }
        },
        None => {
          match LineEnding::from_char(ch) {
            Some(LineEnding::Cr) if rest[at..].starts_with("\r\n") => Some(LineEnding::Crlf),
            other => other,
          }
        },
      };
      if let Some(ending) = ending {
        let piece = &rest[..at];
        rest = &rest[at + ending.as_str().len()..];
        return Some(piece);
      }
    }
    done = true;
    Some(rest)
  })
}

impl fmt::Display for Text {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.rope)
  }
}

impl From<&str> for Text {
  fn from(value: &str) -> Self {
    Text::from_str(value)
  }
}

pub struct TextParts<'a> {
  chunks:  ropey::iter::Chunks<'a>,
  current: &'a str,
  pending: bool,
}

impl<'a> Iterator for TextParts<'a> {
  type Item = TextPart<'a>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.pending {
      self.pending = false;
      return Some(TextPart::LineBreak);
    }
    while self.current.is_empty() {
      self.current = self.chunks.next()?;
    }
    match self.current.find('\n') {
      Some(0) => {
        self.current = &self.current[1..];
        Some(TextPart::LineBreak)
      },
      Some(at) => {
        let chunk = &self.current[..at];
        self.current = &self.current[at + 1..];
        self.pending = true;
        Some(TextPart::Chunk(chunk))
      },
      None => {
        let chunk = self.current;
        self.current = "";
        Some(TextPart::Chunk(chunk))
      },
    }
  }
}
