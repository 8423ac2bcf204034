//! The byte scanner: turns UTF-8 source text into [`Tok`]s with positions,
//! numeric literal values, string literal bytes and identifier hashes.
//!
//! The parser depends only on the [`TokenSource`] contract, so the concrete
//! [`Scanner`] can be replaced (e.g. by a token recorder in tests). Scanner
//! state can be checkpointed and restored, which is what the parser's
//! backtracking harness is built on.

use crate::pos::{FileId, Pos};
use crate::symbol::{Symbol, intern};
use crate::token::Tok;
use crate::types::Spanned;

/// The contract the parser needs from a token cursor.
pub trait TokenSource {
  /// Saved cursor state for backtracking.
  type Checkpoint;

  /// The current token.
  fn tok(&self) -> Tok;
  /// The position of the current token.
  fn pos(&self) -> Pos;
  /// The interned name, valid when `tok` is `Name`/`NameAt`.
  fn name(&self) -> Symbol;
  /// The fast hash of the current name.
  fn hash(&self) -> u64;
  /// The magnitude of the current integer literal.
  fn int_val(&self) -> u64;
  /// The current integer literal as a 32-bit value.
  fn int32val(&self) -> i32 { self.int_val() as i32 }
  /// The current integer literal as a signed 64-bit value.
  fn int64val(&self) -> i64 { self.int_val() as i64 }
  /// The current float literal value.
  fn floatval(&self) -> f64;
  /// Take the raw literal bytes, clearing the buffer.
  fn take_byte_value(&mut self) -> Box<[u8]>;
  /// Advance to the next token.
  fn next(&mut self);
  /// Take the error produced while scanning the current token, if any.
  fn take_error(&mut self) -> Option<Spanned<String>> { None }
  /// Capture the cursor state.
  fn checkpoint(&self) -> Self::Checkpoint;
  /// Rewind to a previously captured state.
  fn restore(&mut self, cp: Self::Checkpoint);
}

/// Scanner behavior toggles.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanMode {
  /// Emit `Tok::Comment` tokens instead of skipping comments.
  pub keep_comments: bool,
}

/// The per-token state, separated out so checkpoints are a plain clone.
#[derive(Clone, Debug)]
struct ScanState {
  off: usize,
  tok: Tok,
  tok_off: usize,
  int_val: u64,
  float_val: f64,
  name: Symbol,
  hash: u64,
  buf: Vec<u8>,
  insert_semi: bool,
  err: Option<Spanned<String>>,
}

/// The concrete scanner over a source buffer.
pub struct Scanner<'a> {
  src: &'a [u8],
  file: FileId,
  mode: ScanMode,
  st: ScanState,
}

/// A saved [`Scanner`] cursor.
pub struct Checkpoint(ScanState);

enum Skipped {
  None,
  NewlineSemi,
  Comment,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x100_0000_01b3;

impl<'a> Scanner<'a> {
  /// Create a scanner over `src`, positioned at the first token.
  pub fn new(file: FileId, src: &'a str, mode: ScanMode) -> Self {
    let mut s = Self {
      src: src.as_bytes(),
      file,
      mode,
      st: ScanState {
        off: 0,
        tok: Tok::Eof,
        tok_off: 0,
        int_val: 0,
        float_val: 0.0,
        name: Symbol::UNDER,
        hash: 0,
        buf: vec![],
        insert_semi: false,
        err: None,
      },
    };
    s.next();
    s
  }

  fn err_here(&mut self, msg: impl Into<String>) {
    let pos = Pos::new(self.file, self.st.tok_off.try_into().expect("overflow"));
    if self.st.err.is_none() { self.st.err = Some(Spanned::new(pos, msg.into())) }
  }

  fn peek(&self, n: usize) -> u8 {
    *self.src.get(self.st.off + n).unwrap_or(&0)
  }

  fn bump(&mut self) -> u8 {
    let b = self.peek(0);
    self.st.off += 1;
    b
  }

  // Skip whitespace and comments up to the next token.
  fn skip_space(&mut self) -> Skipped {
    loop {
      match self.peek(0) {
        b'\n' if self.st.insert_semi => return Skipped::NewlineSemi,
        b' ' | b'\t' | b'\r' | b'\n' => { self.st.off += 1 }
        b'/' if self.peek(1) == b'/' => {
          let start = self.st.off;
          while !matches!(self.peek(0), 0 | b'\n') { self.st.off += 1 }
          if self.mode.keep_comments { self.comment_token(start); return Skipped::Comment }
        }
        b'/' if self.peek(1) == b'*' => {
          let start = self.st.off;
          self.st.off += 2;
          loop {
            match (self.peek(0), self.peek(1)) {
              (0, _) => { self.err_here("unterminated block comment"); break }
              (b'*', b'/') => { self.st.off += 2; break }
              _ => self.st.off += 1,
            }
          }
          if self.mode.keep_comments { self.comment_token(start); return Skipped::Comment }
        }
        _ => return Skipped::None,
      }
    }
  }

  fn comment_token(&mut self, start: usize) {
    self.st.tok = Tok::Comment;
    self.st.tok_off = start;
    self.st.buf = self.src[start..self.st.off].to_vec();
  }

  fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
  }

  fn scan_name(&mut self) {
    let start = self.st.off;
    let mut hash = FNV_OFFSET;
    while Self::is_name_byte(self.peek(0)) {
      hash = (hash ^ u64::from(self.peek(0))).wrapping_mul(FNV_PRIME);
      self.st.off += 1;
    }
    let text = std::str::from_utf8(&self.src[start..self.st.off]).unwrap_or("\u{fffd}");
    self.st.hash = hash;
    self.st.name = intern(text);
    self.st.tok = Tok::keyword(text).unwrap_or(Tok::Name);
  }

  fn digits(&mut self, radix: u32, value: &mut u64, any: &mut bool) -> bool {
    let mut overflow = false;
    loop {
      let b = self.peek(0);
      if b == b'_' { self.st.off += 1; continue }
      let Some(d) = (b as char).to_digit(radix) else { break };
      *any = true;
      match value.checked_mul(u64::from(radix)).and_then(|v| v.checked_add(u64::from(d))) {
        Some(v) => *value = v,
        None => { overflow = true; *value = u64::MAX }
      }
      self.st.off += 1;
    }
    overflow
  }

  fn int_token(&mut self, tok: Tok, value: u64, overflow: bool, any: bool) {
    if overflow { self.err_here("integer literal overflows") }
    if !any { self.err_here("missing digits in integer literal") }
    self.st.tok = tok;
    self.st.int_val = value;
  }

  fn scan_number(&mut self) {
    let start = self.st.off;
    let mut value = 0u64;
    let mut any = false;
    if self.peek(0) == b'0' {
      match self.peek(1) {
        b'b' | b'B' => {
          self.st.off += 2;
          let ov = self.digits(2, &mut value, &mut any);
          return self.int_token(Tok::IntBin, value, ov, any)
        }
        b'o' | b'O' => {
          self.st.off += 2;
          let ov = self.digits(8, &mut value, &mut any);
          return self.int_token(Tok::IntOct, value, ov, any)
        }
        b'x' | b'X' => {
          self.st.off += 2;
          let ov = self.digits(16, &mut value, &mut any);
          return self.int_token(Tok::IntHex, value, ov, any)
        }
        b'0'..=b'7' => {
          self.st.off += 1;
          let ov = self.digits(8, &mut value, &mut any);
          return self.int_token(Tok::IntOct, value, ov, any)
        }
        _ => {}
      }
    }
    let overflow = self.digits(10, &mut value, &mut any);
    let is_float = self.peek(0) == b'.' && self.peek(1).is_ascii_digit()
      || matches!(self.peek(0), b'e' | b'E');
    if is_float {
      if self.peek(0) == b'.' {
        self.st.off += 1;
        self.digits(10, &mut value, &mut any);
      }
      if matches!(self.peek(0), b'e' | b'E') {
        self.st.off += 1;
        if matches!(self.peek(0), b'+' | b'-') { self.st.off += 1 }
        let mut exp = 0u64;
        let mut eany = false;
        self.digits(10, &mut exp, &mut eany);
        if !eany { self.err_here("missing exponent digits") }
      }
      let text = std::str::from_utf8(&self.src[start..self.st.off]).unwrap_or("");
      let text: String = text.chars().filter(|&c| c != '_').collect();
      self.st.float_val = text.parse().unwrap_or_else(|_| {
        self.err_here("malformed float literal");
        0.0
      });
      self.st.tok = Tok::Float;
    } else {
      self.int_token(Tok::Int, value, overflow, any)
    }
  }

  // Scan one (possibly escaped) character of a char or string literal.
  // Returns the decoded scalar value, pushing nothing; `None` on EOF.
  fn scan_escape(&mut self, quote: u8) -> Option<u32> {
    match self.bump() {
      0 => None,
      b'\\' => Some(match self.bump() {
        b'n' => 0x0a,
        b't' => 0x09,
        b'r' => 0x0d,
        b'0' => 0x00,
        b'\\' => u32::from(b'\\'),
        b'\'' => u32::from(b'\''),
        b'"' => u32::from(b'"'),
        b'x' => {
          let mut v = 0u32;
          for _ in 0..2 {
            match (self.peek(0) as char).to_digit(16) {
              Some(d) => { v = v * 16 + d; self.st.off += 1 }
              None => { self.err_here("invalid hex escape"); break }
            }
          }
          v
        }
        c => {
          self.err_here("unknown escape sequence");
          u32::from(c)
        }
      }),
      b if b == quote => None,
      b if b < 0x80 => Some(u32::from(b)),
      b => {
        // re-decode the UTF-8 sequence starting at b
        let len = match b {
          0xc0..=0xdf => 2,
          0xe0..=0xef => 3,
          _ => 4,
        };
        let start = self.st.off - 1;
        let end = (start + len).min(self.src.len());
        self.st.off = end;
        match std::str::from_utf8(&self.src[start..end]).ok().and_then(|s| s.chars().next()) {
          Some(c) => Some(u32::from(c)),
          None => { self.err_here("invalid UTF-8 in literal"); Some(0xfffd) }
        }
      }
    }
  }

  fn scan_char(&mut self) {
    self.st.off += 1; // opening quote
    match self.scan_escape(b'\'') {
      Some(v) => self.st.int_val = u64::from(v),
      None => { self.err_here("empty character literal"); self.st.int_val = 0 }
    }
    if self.peek(0) == b'\'' { self.st.off += 1 } else { self.err_here("unterminated character literal") }
    self.st.tok = Tok::Char;
  }

  fn scan_string(&mut self) {
    self.st.off += 1; // opening quote
    self.st.buf.clear();
    loop {
      match self.peek(0) {
        0 | b'\n' => { self.err_here("unterminated string literal"); break }
        b'"' => { self.st.off += 1; break }
        _ => match self.scan_escape(b'"') {
          Some(v) if v < 0x80 => self.st.buf.push(v as u8),
          Some(v) => match char::from_u32(v) {
            Some(c) => {
              let mut utf8 = [0u8; 4];
              self.st.buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
            None => self.err_here("invalid character in string literal"),
          },
          None => break,
        },
      }
    }
    self.st.tok = Tok::Str;
  }

  // Select between 1-, 2- and 3-byte operator spellings by lookahead.
  fn select(&mut self, t1: Tok, more: &[(&[u8], Tok)]) {
    for &(rest, t) in more {
      if self.src[self.st.off..].starts_with(rest) {
        self.st.off += rest.len();
        self.st.tok = t;
        return
      }
    }
    self.st.tok = t1;
  }
}

impl TokenSource for Scanner<'_> {
  type Checkpoint = Checkpoint;

  fn tok(&self) -> Tok { self.st.tok }

  fn pos(&self) -> Pos {
    Pos::new(self.file, self.st.tok_off.try_into().expect("overflow"))
  }

  fn name(&self) -> Symbol { self.st.name }
  fn hash(&self) -> u64 { self.st.hash }
  fn int_val(&self) -> u64 { self.st.int_val }
  fn floatval(&self) -> f64 { self.st.float_val }

  fn take_byte_value(&mut self) -> Box<[u8]> {
    std::mem::take(&mut self.st.buf).into_boxed_slice()
  }

  fn take_error(&mut self) -> Option<Spanned<String>> { self.st.err.take() }

  #[allow(clippy::too_many_lines)]
  fn next(&mut self) {
    match self.skip_space() {
      Skipped::NewlineSemi => {
        // virtual semicolon at end of line
        self.st.insert_semi = false;
        self.st.tok = Tok::Semi;
        self.st.tok_off = self.st.off;
        self.st.off += 1;
        return
      }
      Skipped::Comment => return,
      Skipped::None => {}
    }
    self.st.tok_off = self.st.off;
    let b = self.peek(0);
    match b {
      0 => {
        // a statement ending at EOF still gets its terminator
        self.st.tok = if std::mem::take(&mut self.st.insert_semi) { Tok::Semi } else { Tok::Eof };
        return
      }
      b'0'..=b'9' => self.scan_number(),
      b'\'' => self.scan_char(),
      b'"' => self.scan_string(),
      b'@' => {
        self.st.off += 1;
        if Self::is_name_byte(self.peek(0)) && !self.peek(0).is_ascii_digit() {
          self.scan_name();
        } else {
          self.err_here("expected identifier after '@'");
          self.st.name = Symbol::UNDER;
        }
        self.st.tok = Tok::NameAt;
      }
      _ if Self::is_name_byte(b) && !b.is_ascii_digit() => self.scan_name(),
      _ => {
        self.st.off += 1;
        match b {
          b'(' => self.st.tok = Tok::LParen,
          b')' => self.st.tok = Tok::RParen,
          b'[' => self.st.tok = Tok::LBracket,
          b']' => self.st.tok = Tok::RBracket,
          b'{' => self.st.tok = Tok::LBrace,
          b'}' => self.st.tok = Tok::RBrace,
          b',' => self.st.tok = Tok::Comma,
          b';' => self.st.tok = Tok::Semi,
          b':' => self.st.tok = Tok::Colon,
          b'.' => self.select(Tok::Dot, &[(b"..", Tok::Ellipsis)]),
          b'?' => self.st.tok = Tok::Question,
          b'+' => self.select(Tok::Add, &[(b"+", Tok::Inc), (b"=", Tok::AddAssign)]),
          b'-' => self.select(Tok::Sub,
            &[(b">", Tok::Arrow), (b"-", Tok::Dec), (b"=", Tok::SubAssign)]),
          b'*' => self.select(Tok::Mul, &[(b"=", Tok::MulAssign)]),
          b'/' => self.select(Tok::Div, &[(b"=", Tok::DivAssign)]),
          b'%' => self.select(Tok::Rem, &[(b"=", Tok::RemAssign)]),
          b'^' => self.select(Tok::Xor, &[(b"=", Tok::XorAssign)]),
          b'!' => self.select(Tok::Not, &[(b"=", Tok::NotEq)]),
          b'=' => self.select(Tok::Assign, &[(b"=", Tok::EqEq)]),
          b'<' => self.select(Tok::Lt,
            &[(b"<=", Tok::ShlAssign), (b"<", Tok::Shl), (b"=", Tok::Le)]),
          b'>' => self.select(Tok::Gt,
            &[(b">=", Tok::ShrAssign), (b">", Tok::Shr), (b"=", Tok::Ge)]),
          b'&' => self.select(Tok::And,
            &[(b"&", Tok::AndAnd), (b"^=", Tok::AndNotAssign), (b"^", Tok::AndNot),
              (b"=", Tok::AndAssign)]),
          b'|' => self.select(Tok::Or, &[(b"|", Tok::OrOr), (b"=", Tok::OrAssign)]),
          _ => {
            self.err_here(format!("unexpected character {:?}", b as char));
            self.next();
            return
          }
        }
      }
    }
    self.st.insert_semi = matches!(self.st.tok,
      Tok::Int | Tok::IntBin | Tok::IntOct | Tok::IntHex | Tok::Float | Tok::Char | Tok::Str
      | Tok::Name | Tok::NameAt | Tok::RParen | Tok::RBracket | Tok::RBrace
      | Tok::Inc | Tok::Dec | Tok::KwReturn | Tok::KwBreak | Tok::KwContinue);
  }

  fn checkpoint(&self) -> Checkpoint { Checkpoint(self.st.clone()) }
  fn restore(&mut self, cp: Checkpoint) { self.st = cp.0 }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pos::FileId;

  fn toks(src: &str) -> Vec<Tok> {
    let mut s = Scanner::new(FileId(0), src, ScanMode::default());
    let mut out = vec![];
    while s.tok() != Tok::Eof {
      out.push(s.tok());
      s.next();
    }
    out
  }

  #[test]
  fn basic_stream() {
    assert_eq!(toks("fun f() { x = 1 }"), vec![
      Tok::KwFun, Tok::Name, Tok::LParen, Tok::RParen, Tok::LBrace,
      Tok::Name, Tok::Assign, Tok::Int, Tok::RBrace, Tok::Semi,
    ]);
  }

  #[test]
  fn numeric_literals() {
    let mut s = Scanner::new(FileId(0), "0b1010 0o17 0xff 123 2.5 1e3", ScanMode::default());
    assert_eq!(s.tok(), Tok::IntBin);
    assert_eq!(s.int_val(), 10);
    s.next();
    assert_eq!(s.tok(), Tok::IntOct);
    assert_eq!(s.int_val(), 15);
    s.next();
    assert_eq!(s.tok(), Tok::IntHex);
    assert_eq!(s.int_val(), 255);
    s.next();
    assert_eq!(s.tok(), Tok::Int);
    assert_eq!(s.int_val(), 123);
    s.next();
    assert_eq!(s.tok(), Tok::Float);
    assert!((s.floatval() - 2.5).abs() < f64::EPSILON);
    s.next();
    assert_eq!(s.tok(), Tok::Float);
    assert!((s.floatval() - 1000.0).abs() < f64::EPSILON);
  }

  #[test]
  fn string_bytes_drained() {
    let mut s = Scanner::new(FileId(0), r#""a\nb""#, ScanMode::default());
    assert_eq!(s.tok(), Tok::Str);
    assert_eq!(&*s.take_byte_value(), b"a\nb");
    assert_eq!(&*s.take_byte_value(), b"");
  }

  #[test]
  fn maximal_munch_operators() {
    assert_eq!(toks("a <<= b &^ c"),
      vec![Tok::Name, Tok::ShlAssign, Tok::Name, Tok::AndNot, Tok::Name, Tok::Semi]);
    assert_eq!(toks("a<b,c>d"),
      vec![Tok::Name, Tok::Lt, Tok::Name, Tok::Comma, Tok::Name, Tok::Gt, Tok::Name, Tok::Semi]);
  }

  #[test]
  fn virtual_semicolons() {
    assert_eq!(toks("x = 1\ny = 2"), vec![
      Tok::Name, Tok::Assign, Tok::Int, Tok::Semi,
      Tok::Name, Tok::Assign, Tok::Int, Tok::Semi,
    ]);
  }

  #[test]
  fn checkpoint_restore() {
    let mut s = Scanner::new(FileId(0), "a < b , c > d", ScanMode::default());
    let cp = s.checkpoint();
    s.next();
    s.next();
    assert_eq!(s.tok(), Tok::Name);
    s.restore(cp);
    assert_eq!(s.tok(), Tok::Name);
    assert_eq!(s.pos().off, 0);
  }

  #[test]
  fn identifier_hash_stable() {
    let mut a = Scanner::new(FileId(0), "foo foo", ScanMode::default());
    let h1 = a.hash();
    a.next();
    assert_eq!(h1, a.hash());
  }
}
