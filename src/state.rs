use std::fmt;

use tracing::info;

use crate::config::{VAddr, Word, NR_GPR};

/// Control/status registers mirrored on both sides, in comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Csr {
  Mstatus,
  Mtvec,
  Mepc,
  Mcause,
}

impl Csr {
  pub const COUNT: usize = 4;
  pub const ALL: [Csr; Self::COUNT] = [Csr::Mstatus, Csr::Mtvec, Csr::Mepc, Csr::Mcause];

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn name(self) -> &'static str {
    match self {
      Csr::Mstatus => "mstatus",
      Csr::Mtvec => "mtvec",
      Csr::Mepc => "mepc",
      Csr::Mcause => "mcause",
    }
  }

  pub fn from_index(idx: usize) -> Option<Csr> {
    Self::ALL.get(idx).copied()
  }
}

const GPR_NAMES: [&str; NR_GPR] = [
  "$0", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
];

pub fn gpr_name(idx: usize) -> &'static str {
  GPR_NAMES[idx]
}

/// Architectural state of one side of the lockstep pair.
///
/// The layout up to `csr` is shared with the reference model through
/// `difftest_regcpy`, so the field order must not change.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreState {
  pub gpr: [Word; NR_GPR],
  pub pc: VAddr,
  pub csr: [Word; Csr::COUNT],
  /// Last fetched instruction, diagnostics only.
  pub inst: Word,
}

/// A state field that takes part in the lockstep comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
  Gpr(usize),
  Csr(Csr),
}

impl fmt::Display for Field {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Field::Gpr(idx) => write!(f, "gpr[{idx}]({})", gpr_name(*idx)),
      Field::Csr(csr) => write!(f, "csr[{}]({})", csr.index(), csr.name()),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
  pub field: Field,
  pub dut: Word,
  pub reference: Word,
}

impl fmt::Display for Mismatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} DUT = \x1b[31m{:#010x}\x1b[0m, REF = \x1b[31m{:#010x}\x1b[0m",
      self.field, self.dut, self.reference
    )
  }
}

impl CoreState {
  pub fn csr(&self, csr: Csr) -> Word {
    self.csr[csr.index()]
  }

  pub fn set_csr(&mut self, csr: Csr, value: Word) {
    self.csr[csr.index()] = value;
  }

  /// First differing field, general-purpose registers before CSRs.
  pub fn first_mismatch(&self, reference: &CoreState) -> Option<Mismatch> {
    let gprs = self.gpr.iter().zip(reference.gpr.iter()).enumerate().map(|(i, (dut, r))| {
      (Field::Gpr(i), *dut, *r)
    });
    let csrs = Csr::ALL.iter().map(|csr| (Field::Csr(*csr), self.csr(*csr), reference.csr(*csr)));

    gprs
      .chain(csrs)
      .find(|(_, dut, r)| dut != r)
      .map(|(field, dut, reference)| Mismatch { field, dut, reference })
  }

  /// Register lookup by name: `pc`, ABI names with or without `$`, or `xN`.
  pub fn reg_str2val(&self, name: &str) -> Option<Word> {
    if name == "pc" || name == "$pc" {
      return Some(self.pc);
    }
    if let Some(idx) = GPR_NAMES.iter().position(|n| *n == name) {
      return Some(self.gpr[idx]);
    }
    let name = name.strip_prefix('$').unwrap_or(name);
    if let Some(idx) = GPR_NAMES.iter().position(|n| n.trim_start_matches('$') == name) {
      return Some(self.gpr[idx]);
    }
    if let Some(idx) = name.strip_prefix('x').and_then(|n| n.parse::<usize>().ok()) {
      return self.gpr.get(idx).copied();
    }
    Csr::ALL.iter().find(|csr| csr.name() == name).map(|csr| self.csr(*csr))
  }

  pub fn display(&self, side: &str) {
    info!("{side} registers at pc = {:#010x}:", self.pc);
    for line in self.to_string().lines() {
      info!("{line}");
    }
  }
}

impl fmt::Display for CoreState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, value) in self.gpr.iter().enumerate() {
      writeln!(
        f,
        "{:<3}: 0x_{:04x}_{:04x}  ({value})",
        gpr_name(i),
        (value >> 16) & 0xffff,
        value & 0xffff
      )?;
    }
    for csr in Csr::ALL {
      writeln!(f, "{:<8}: {:#010x}", csr.name(), self.csr(csr))?;
    }
    write!(f, "pc      : {:#010x}", self.pc)
  }
}
