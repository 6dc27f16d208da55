//! Line-ending recognition.
//!
//! The kernel recognizes three line endings: LF, CRLF, and CR. Documents
//! normalize on read — any recognized ending becomes LF internally — unless a
//! configured separator narrows recognition to one exact sequence.

use ropey::RopeSlice;

/// The separator used for internal document storage and for joining lines on
/// output when no other separator is configured.
pub const DEFAULT_LINE_ENDING: LineEnding = LineEnding::Lf;

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum LineEnding {
  /// U+000A -- LineFeed
  Lf,

  /// CarriageReturn followed by LineFeed.
  Crlf,

  /// U+000D -- CarriageReturn
  Cr,
}

impl LineEnding {
  #[inline]
  pub const fn len_chars(&self) -> usize {
    match self {
      Self::Crlf => 2,
      _ => 1,
    }
  }

  #[inline]
  pub const fn as_str(&self) -> &'static str {
    match self {
      Self::Lf => "\u{000A}",
      Self::Crlf => "\u{000D}\u{000A}",
      Self::Cr => "\u{000D}",
    }
  }

  #[inline]
  pub const fn from_char(ch: char) -> Option<LineEnding> {
    match ch {
      '\u{000A}' => Some(LineEnding::Lf),
      '\u{000D}' => Some(LineEnding::Cr),
      _ => None,
    }
  }

  // Normally we'd want to implement the FromStr trait, but in this case
  // that would force us into a different return type than from_char,
  // which would be weird.
  #[allow(clippy::should_implement_trait)]
  #[inline]
  pub fn from_str(g: &str) -> Option<LineEnding> {
    match g {
      "\u{000A}" => Some(LineEnding::Lf),
      "\u{000D}\u{000A}" => Some(LineEnding::Crlf),
      "\u{000D}" => Some(LineEnding::Cr),
      _ => None,
    }
  }

  /// The line ending that `text` starts with, if any. CRLF is preferred over
  /// a bare CR when both match.
  #[inline]
  pub fn from_str_prefix(text: &str) -> Option<LineEnding> {
    if text.starts_with("\u{000D}\u{000A}") {
      Some(LineEnding::Crlf)
    } else {
      text.chars().next().and_then(LineEnding::from_char)
    }
  }
}

#[inline]
pub fn str_is_line_ending(s: &str) -> bool {
  LineEnding::from_str(s).is_some()
}

/// Returns the passed line's line ending, if any.
pub fn get_line_ending(line: &RopeSlice) -> Option<LineEnding> {
  let tail = |n: usize| {
    line
      .slice(line.len_chars().saturating_sub(n)..)
      .as_str()
      // Non-contiguous, so it can't be a line ending. Ropey guarantees
      // that CRLF is always contiguous, and the rest are single chars.
      .unwrap_or("")
  };

  // First check the 2-character case for CRLF, then the single-character case.
  LineEnding::from_str(tail(2)).or_else(|| LineEnding::from_str(tail(1)))
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn prefix_prefers_crlf() {
    assert_eq!(
      LineEnding::from_str_prefix("\r\nrest"),
      Some(LineEnding::Crlf)
    );
    assert_eq!(LineEnding::from_str_prefix("\rrest"), Some(LineEnding::Cr));
    assert_eq!(LineEnding::from_str_prefix("\nrest"), Some(LineEnding::Lf));
    assert_eq!(LineEnding::from_str_prefix("rest"), None);
  }

  #[test]
  fn line_ending_of_rope_line() {
    let rope = ropey::Rope::from("one\r\ntwo\nthree");
    assert_eq!(get_line_ending(&rope.line(0)), Some(LineEnding::Crlf));
    assert_eq!(get_line_ending(&rope.line(1)), Some(LineEnding::Lf));
    assert_eq!(get_line_ending(&rope.line(2)), None);
  }
}
