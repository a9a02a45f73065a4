use tracing::{error, info, trace};

use crate::{
  config::{PAddr, Word},
  error::SimError,
  ref_module::{RefModel, RefModule},
  state::{CoreState, Mismatch},
};

/// What a lockstep step did with the reference model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCheck {
  /// The reference executed the instruction and matched the DUT.
  Checked,
  /// The reference was overwritten with the DUT state, nothing was compared.
  Resynced,
}

/// Lockstep checker driving the reference model one instruction behind the DUT.
pub struct Difftest<R> {
  refmodule: RefModule<R>,
}

impl<R: RefModel> Difftest<R> {
  /// Bring the reference up bit-identical to the DUT: same image at `base`, same
  /// registers.
  pub fn init(
    module: R,
    port: i32,
    base: PAddr,
    image: &[u8],
    dut: &CoreState,
  ) -> Result<Self, SimError> {
    let mut refmodule = RefModule::new(module, port);
    refmodule.load_mem_seg(base, image)?;
    refmodule.override_event(dut);
    info!("difftest: reference seeded with {} bytes at {base:#x}", image.len());
    Ok(Self { refmodule })
  }

  /// Advance the reference past the instruction the DUT just retired and
  /// compare. `skip` resyncs instead; `interrupt` makes the reference take the
  /// same interrupt the DUT took.
  pub fn step(
    &mut self,
    dut: &CoreState,
    skip: bool,
    interrupt: Option<Word>,
  ) -> Result<StepCheck, Mismatch> {
    if skip {
      // the effect can not be replayed, just copy the DUT state over
      trace!("difftest: skip at pc = {:#010x}, resync reference", dut.pc);
      self.refmodule.override_event(dut);
      return Ok(StepCheck::Resynced);
    }

    let reference = match interrupt {
      Some(no) => self.refmodule.raise_intr(no),
      None => self.refmodule.step(),
    };

    match dut.first_mismatch(reference) {
      None => Ok(StepCheck::Checked),
      Some(mismatch) => {
        error!("mismatch {mismatch}");
        Err(mismatch)
      }
    }
  }

  pub fn ref_state(&self) -> &CoreState {
    self.refmodule.event()
  }

  pub fn refmodule(&self) -> &RefModule<R> {
    &self.refmodule
  }

  pub fn display(&self) {
    self.refmodule.display();
  }
}
