//! Character classification for word-boundary decisions.
//!
//! Positions mapped through edits can associate with the nearest word
//! boundary, which needs a stable notion of what a "word" character is.
//! The categories here are deliberately coarse: word, whitespace, line
//! ending, punctuation, everything else.

use unicode_general_category::{
  GeneralCategory,
  get_general_category,
};

use crate::line_ending::LineEnding;

#[derive(Debug, Eq, PartialEq)]
pub enum CharCategory {
  Whitespace,
  Eol,
  Word,
  Punctuation,
  Unknown,
}

/// The most specific category a character falls into. Line endings win over
/// plain whitespace, words over punctuation.
pub fn categorize_char(ch: char) -> CharCategory {
  if char_is_line_ending(ch) {
    CharCategory::Eol
  } else if char_is_whitespace(ch) {
    CharCategory::Whitespace
  } else if char_is_word(ch) {
    CharCategory::Word
  } else if char_is_punctuation(ch) {
    CharCategory::Punctuation
  } else {
    CharCategory::Unknown
  }
}

#[inline]
pub fn char_is_word(ch: char) -> bool {
  ch == '_' || ch.is_alphanumeric()
}

#[inline]
pub fn char_is_line_ending(ch: char) -> bool {
  LineEnding::from_char(ch).is_some()
}

/// Blank characters that are not line breaks.
///
/// Builds on [`char::is_whitespace`], which already covers the Unicode
/// spacing marks, but zero-width spaces are not in the Unicode whitespace
/// set and an editor still wants to treat them as blanks.
#[inline]
pub fn char_is_whitespace(ch: char) -> bool {
  if char_is_line_ending(ch) {
    return false;
  }
  match ch {
    // Zero Width Space, Zero Width No-break Space
    '\u{200B}' | '\u{FEFF}' => true,
    _ => ch.is_whitespace(),
  }
}

#[inline]
pub fn char_is_punctuation(ch: char) -> bool {
  use GeneralCategory::*;

  matches!(
    get_general_category(ch),
    ConnectorPunctuation
      | DashPunctuation
      | OpenPunctuation
      | ClosePunctuation
      | InitialPunctuation
      | FinalPunctuation
      | OtherPunctuation
      // Operator-like symbols act as punctuation for word boundaries.
      | MathSymbol
      | CurrencySymbol
      | ModifierSymbol
  )
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn categorize() {
    assert_eq!(categorize_char('\n'), CharCategory::Eol);
    assert_eq!(categorize_char('\r'), CharCategory::Eol);
    assert_eq!(categorize_char(' '), CharCategory::Whitespace);
    assert_eq!(categorize_char('\t'), CharCategory::Whitespace);
    assert_eq!(categorize_char('x'), CharCategory::Word);
    assert_eq!(categorize_char('_'), CharCategory::Word);
    assert_eq!(categorize_char('9'), CharCategory::Word);
    assert_eq!(categorize_char(','), CharCategory::Punctuation);
    assert_eq!(categorize_char('+'), CharCategory::Punctuation);
  }

  #[test]
  fn whitespace_excludes_line_breaks() {
    assert!(char_is_whitespace(' '));
    assert!(char_is_whitespace('\u{00A0}'));
    assert!(char_is_whitespace('\u{200B}'));
    assert!(!char_is_whitespace('\n'));
    assert!(!char_is_whitespace('\r'));
    assert!(!char_is_whitespace('a'));
  }
}
