pub mod dylib;
pub use dylib::DylibRef;

use tracing::debug;

use crate::{
  config::{PAddr, Word},
  error::SimError,
  state::CoreState,
};

/// Copy direction of the difftest ABI, `DIFFTEST_TO_DUT` / `DIFFTEST_TO_REF`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  ToDut = 0,
  ToRef = 1,
}

impl Direction {
  pub fn as_bool(self) -> bool {
    self == Direction::ToRef
  }
}

/// The five operations a reference model exports.
pub trait RefModel {
  fn init(&mut self, port: i32);

  /// Only [`Direction::ToRef`] is part of the contract.
  fn memcpy(&mut self, addr: PAddr, buf: &mut [u8], direction: Direction) -> Result<(), SimError>;

  fn regcpy(&mut self, state: &mut CoreState, direction: Direction);

  fn exec(&mut self, n: u64);

  fn raise_intr(&mut self, no: Word);
}

/// Reference side of the lockstep pair, with its own copy of the state mirror.
pub struct RefModule<R> {
  module: R,
  event: CoreState,
}

impl<R: RefModel> RefModule<R> {
  pub fn new(mut module: R, port: i32) -> Self {
    module.init(port);
    RefModule { module, event: CoreState::default() }
  }

  pub fn load_mem_seg(&mut self, addr: PAddr, bytes: &[u8]) -> Result<(), SimError> {
    debug!("copy {} bytes at {addr:#x} to the reference", bytes.len());
    let mut buf = bytes.to_vec();
    self.module.memcpy(addr, &mut buf, Direction::ToRef)
  }

  /// Execute one instruction and fetch the resulting state.
  pub fn step(&mut self) -> &CoreState {
    self.module.exec(1);
    self.module.regcpy(&mut self.event, Direction::ToDut);
    &self.event
  }

  /// Take interrupt `no` instead of executing and fetch the resulting state.
  pub fn raise_intr(&mut self, no: Word) -> &CoreState {
    self.module.raise_intr(no);
    self.module.regcpy(&mut self.event, Direction::ToDut);
    &self.event
  }

  /// Force the reference onto the DUT state.
  pub fn override_event(&mut self, event: &CoreState) {
    self.event = *event;
    self.module.regcpy(&mut self.event, Direction::ToRef);
  }

  pub fn event(&self) -> &CoreState {
    &self.event
  }

  pub fn module(&self) -> &R {
    &self.module
  }

  pub fn display(&self) {
    self.event.display("ref");
  }
}
