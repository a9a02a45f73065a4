use tracing::warn;

use crate::{
  config::{VAddr, Word},
  error::SimError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
  #[default]
  Stopped,
  Running,
  /// The guest halted itself.
  Ended,
  /// A fatal error stopped the guest.
  Aborted,
  /// The operator ended the session.
  Quit,
}

/// Execution state of the session. `halt_pc` and `halt_ret` only mean something
/// once the state is `Ended` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimStatus {
  state: RunState,
  halt_pc: VAddr,
  halt_ret: Word,
}

impl Default for SimStatus {
  fn default() -> Self {
    Self { state: RunState::Stopped, halt_pc: 0, halt_ret: 1 }
  }
}

impl SimStatus {
  pub fn state(&self) -> RunState {
    self.state
  }

  pub fn halt_pc(&self) -> VAddr {
    self.halt_pc
  }

  pub fn halt_ret(&self) -> Word {
    self.halt_ret
  }

  /// Enter `Running`. Only a stopped session may run; a session that ended,
  /// aborted or quit has to be restarted.
  pub fn begin_run(&mut self) -> Result<(), SimError> {
    match self.state {
      RunState::Ended | RunState::Aborted | RunState::Quit => Err(SimError::Finished),
      _ => {
        self.state = RunState::Running;
        Ok(())
      }
    }
  }

  /// A bounded run ran out of instructions, or a watchpoint fired.
  pub fn pause(&mut self) {
    if self.state == RunState::Running {
      self.state = RunState::Stopped;
    }
  }

  pub fn end(&mut self, pc: VAddr, ret: Word) {
    if self.transition(RunState::Ended) {
      self.halt_pc = pc;
      self.halt_ret = ret;
    }
  }

  pub fn abort(&mut self, pc: VAddr) {
    if self.transition(RunState::Aborted) {
      self.halt_pc = pc;
      self.halt_ret = 1;
    }
  }

  pub fn quit(&mut self) {
    self.state = RunState::Quit;
  }

  fn transition(&mut self, to: RunState) -> bool {
    if self.state != RunState::Running {
      warn!("ignore {to:?} while {:?}", self.state);
      return false;
    }
    self.state = to;
    true
  }

  /// Process exit predicate: good only after a clean guest halt, or a quit that
  /// follows one.
  pub fn is_exit_status_bad(&self) -> bool {
    let good = matches!(self.state, RunState::Ended | RunState::Quit) && self.halt_ret == 0;
    !good
  }
}
