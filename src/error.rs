use std::path::PathBuf;

use thiserror::Error;

use crate::config::{PAddr, VAddr};
use crate::state::Mismatch;

/// Errors raised by the simulation core.
///
/// Binding errors are fatal before the first step. Faults during a step end the run
/// as ABORTED. [`SimError::Finished`], [`SimError::BadCount`] and
/// [`SimError::WatchPoolFull`] reject a console request and leave the run state alone.
#[derive(Debug, Error)]
pub enum SimError {
  #[error("failed to load reference library {}: {source}", path.display())]
  RefLibrary {
    path: PathBuf,
    #[source]
    source: libloading::Error,
  },

  #[error("reference library lacks `{symbol}`: {source}")]
  RefSymbol {
    symbol: &'static str,
    #[source]
    source: libloading::Error,
  },

  #[error("reference model only accepts copies towards itself")]
  UnsupportedDirection,

  #[error(
    "address = {addr:#010x} is out of bound of pmem [{left:#010x}, {right:#010x}] at pc = {pc:#010x}"
  )]
  OutOfBound { addr: PAddr, left: PAddr, right: PAddr, pc: VAddr },

  #[error("difftest mismatch: {0}")]
  Mismatch(Mismatch),

  #[error("instruction at pc = {pc:#010x} is unsupported")]
  InvalidInst { pc: VAddr },

  #[error("program execution has ended, exit and run again to restart it")]
  Finished,

  #[error("watchpoint {no} can not evaluate `{expr}`")]
  WatchEval { no: usize, expr: String },

  #[error("no idle watchpoint left in the pool of {0}")]
  WatchPoolFull(usize),

  #[error("invalid instruction count `{0}`")]
  BadCount(String),
}
