//! Architecture configuration: the [`Config`] record the SSA layer carries,
//! the register/stack-slot model the back end attaches to, and the registry
//! that resolves architecture names.
//!
//! Lowering itself is a collaborator concern: a back end supplies
//! `lower_block`/`lower_value` rewriters and the register tables, and the
//! mid-end only threads them through.

use std::sync::{LazyLock, Mutex};
use std::sync::Arc;

use hashbrown::HashMap;
use regalloc2::{PReg, RegClass};

use crate::diag::{CompileError, ErrorKind};
use crate::pos::Pos;
use crate::types::ir::{BlockId, Fun, ValueId};
use crate::types::ty::TyId;

/// A machine register, pairing the allocator's [`PReg`] with its name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Register {
  /// The physical register.
  pub preg: PReg,
  /// The assembler name.
  pub name: &'static str,
  /// True for registers holding garbage-collection roots.
  pub gc: bool,
}

impl Register {
  /// An integer register.
  #[must_use] pub fn int(num: usize, name: &'static str) -> Self {
    Self { preg: PReg::new(num, RegClass::Int), name, gc: false }
  }

  /// A floating-point register.
  #[must_use] pub fn float(num: usize, name: &'static str) -> Self {
    Self { preg: PReg::new(num, RegClass::Float), name, gc: false }
  }
}

/// A stack slot assigned to a spilled or address-taken local.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalSlot {
  /// The slot number.
  pub num: u32,
  /// The type stored in the slot.
  pub ty: TyId,
  /// The byte offset from the frame base.
  pub off: i64,
}

/// A block rewriter supplied by the lowering tables. Returns true if it
/// changed anything.
pub type BlockRewriter = fn(&mut Fun, BlockId) -> bool;
/// A value rewriter supplied by the lowering tables. Returns true if it
/// changed anything.
pub type ValueRewriter = fn(&mut Fun, ValueId) -> bool;

fn lower_block_nop(_: &mut Fun, _: BlockId) -> bool { false }
fn lower_value_nop(_: &mut Fun, _: ValueId) -> bool { false }

/// The architecture description and compilation options a [`Fun`] carries.
pub struct Config {
  /// The architecture name, the registry key.
  pub arch: &'static str,
  /// Pointer size in bytes.
  pub addr_size: u8,
  /// General register size in bytes.
  pub reg_size: u8,
  /// The size of `int`/`uint` in bytes.
  pub int_size: u8,
  /// The register table.
  pub registers: Box<[Register]>,
  /// Whether a dedicated G (goroutine/context) register exists.
  pub has_g_reg: bool,
  /// Allocatable general-purpose registers.
  pub gp_reg_mask: u64,
  /// Allocatable floating-point registers.
  pub fp_reg_mask: u64,
  /// Registers reserved for special purposes.
  pub special_reg_mask: u64,
  /// The arch-specific block lowering rewriter.
  pub lower_block: BlockRewriter,
  /// The arch-specific value lowering rewriter.
  pub lower_value: ValueRewriter,
  /// Run the optimizer.
  pub optimize: bool,
  /// Collect loop statistics during analysis.
  pub loopstats: bool,
}

impl std::fmt::Debug for Config {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Config")
      .field("arch", &self.arch)
      .field("addr_size", &self.addr_size)
      .field("registers", &self.registers.len())
      .finish()
  }
}

impl Config {
  /// The generic 64-bit host configuration used by tests and by embedders
  /// that never lower.
  #[must_use] pub fn generic() -> Arc<Config> {
    find("generic").expect("generic arch is pre-registered")
  }
}

fn generic_config() -> Config {
  let mut registers = Vec::with_capacity(24);
  for (i, name) in ["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7",
      "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15"].into_iter().enumerate() {
    registers.push(Register::int(i, name));
  }
  for (i, name) in ["f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7"].into_iter().enumerate() {
    registers.push(Register::float(i, name));
  }
  Config {
    arch: "generic",
    addr_size: 8,
    reg_size: 8,
    int_size: 4,
    registers: registers.into_boxed_slice(),
    has_g_reg: false,
    gp_reg_mask: 0xffff,
    fp_reg_mask: 0xff,
    special_reg_mask: 0,
    lower_block: lower_block_nop,
    lower_value: lower_value_nop,
    optimize: true,
    loopstats: false,
  }
}

static ARCHS: LazyLock<Mutex<HashMap<&'static str, Arc<Config>>>> = LazyLock::new(|| {
  let mut m = HashMap::new();
  let generic = generic_config();
  m.insert(generic.arch, Arc::new(generic));
  Mutex::new(m)
});

/// Register an architecture. Later registrations under the same name win.
pub fn register(config: Config) {
  ARCHS.lock().expect("poisoned").insert(config.arch, Arc::new(config));
}

/// Resolve an architecture by name.
pub fn find(name: &str) -> Result<Arc<Config>, CompileError> {
  ARCHS.lock().expect("poisoned").get(name).cloned().ok_or_else(|| CompileError {
    kind: ErrorKind::Config,
    pos: Pos::NONE,
    msg: format!("unknown architecture {name:?}"),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generic_is_registered() {
    let cfg = Config::generic();
    assert_eq!(cfg.arch, "generic");
    assert_eq!(cfg.addr_size, 8);
    assert_eq!(cfg.registers.len(), 24);
    assert_eq!(cfg.registers[0].preg.class(), RegClass::Int);
  }

  #[test]
  fn unknown_arch_is_config_error() {
    let err = find("z99").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Config);
    assert!(err.msg.contains("z99"));
  }

  #[test]
  fn registration_resolves() {
    register(Config { arch: "testarch", ..generic_config() });
    assert_eq!(find("testarch").unwrap().arch, "testarch");
  }
}
