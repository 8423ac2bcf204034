//! Source positions and the file set that resolves them to line/column locations.

use crate::types::{IdxVec, mk_id};

mk_id! {
  /// An index into the [`FileSet`]'s file table.
  FileId,
}

/// A compact source position: a file and a byte offset into it.
///
/// `Pos::NONE` is the distinguished "no position" value, used for synthesized
/// nodes and IR values with no source counterpart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pos {
  /// The file this position refers to.
  pub file: FileId,
  /// The byte offset from the start of the file.
  pub off: u32,
}

impl Pos {
  /// The "no position" sentinel.
  pub const NONE: Self = Self { file: FileId(u32::MAX), off: 0 };

  /// Construct a position in the given file.
  #[must_use] pub const fn new(file: FileId, off: u32) -> Self { Self { file, off } }

  /// True if this is the `NONE` sentinel.
  #[must_use] pub fn is_none(self) -> bool { self.file == FileId(u32::MAX) }
}

impl Default for Pos {
  fn default() -> Self { Self::NONE }
}

/// A fully resolved source location, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
  /// The name of the file.
  pub file: String,
  /// 1-based line number.
  pub line: u32,
  /// 1-based column number (in bytes).
  pub col: u32,
  /// The byte offset in the file.
  pub off: u32,
}

impl std::fmt::Display for Location {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}:{}", self.file, self.line, self.col)
  }
}

/// One source file registered in a [`FileSet`].
#[derive(Debug)]
pub struct SourceFile {
  /// The (display) name of the file.
  pub name: String,
  /// The source text.
  pub src: String,
  /// Byte offsets of the start of each line. `lines[0] == 0` always.
  lines: Vec<u32>,
}

impl SourceFile {
  fn new(name: String, src: String) -> Self {
    let mut lines = vec![0];
    for (i, b) in src.bytes().enumerate() {
      if b == b'\n' {
        lines.push(u32::try_from(i + 1).expect("file too large"));
      }
    }
    Self { name, src, lines }
  }

  /// Resolve a byte offset in this file to a (1-based) line and column.
  #[must_use] pub fn line_col(&self, off: u32) -> (u32, u32) {
    let line = match self.lines.binary_search(&off) {
      Ok(n) => n,
      Err(n) => n - 1,
    };
    let col = off - self.lines[line];
    (u32::try_from(line).expect("overflow") + 1, col + 1)
  }
}

/// The set of files in a compilation, mapping positions to locations.
#[derive(Debug, Default)]
pub struct FileSet {
  files: IdxVec<FileId, SourceFile>,
}

impl FileSet {
  /// Construct an empty file set.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Register a file, returning its id.
  pub fn add_file(&mut self, name: impl Into<String>, src: impl Into<String>) -> FileId {
    self.files.push(SourceFile::new(name.into(), src.into()))
  }

  /// Get a file by id.
  #[must_use] pub fn file(&self, id: FileId) -> &SourceFile { &self.files[id] }

  /// Resolve a position to a location. `Pos::NONE` resolves to a
  /// placeholder location with an empty file name.
  #[must_use] pub fn position(&self, pos: Pos) -> Location {
    if pos.is_none() {
      return Location { file: String::new(), line: 0, col: 0, off: 0 }
    }
    let file = &self.files[pos.file];
    let (line, col) = file.line_col(pos.off);
    Location { file: file.name.clone(), line, col, off: pos.off }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn line_col_resolution() {
    let mut fs = FileSet::new();
    let f = fs.add_file("a.rl", "one\ntwo\n\nfour");
    let loc = fs.position(Pos::new(f, 0));
    assert_eq!((loc.line, loc.col), (1, 1));
    let loc = fs.position(Pos::new(f, 5));
    assert_eq!((loc.line, loc.col), (2, 2));
    let loc = fs.position(Pos::new(f, 8));
    assert_eq!((loc.line, loc.col), (3, 1));
    let loc = fs.position(Pos::new(f, 12));
    assert_eq!((loc.line, loc.col), (4, 4));
  }

  #[test]
  fn none_position() {
    let fs = FileSet::new();
    let loc = fs.position(Pos::NONE);
    assert_eq!(loc.line, 0);
    assert!(loc.file.is_empty());
  }
}
