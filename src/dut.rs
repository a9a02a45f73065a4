use crate::dpi::DutPort;

/// Clock-level handle on the hardware model under test.
///
/// The model reports its state and bus traffic through the [`DutPort`] it is
/// handed while it evaluates.
pub trait Dut {
  fn set_reset(&mut self, level: bool);

  /// Bus side effects are only honoured while enable is high.
  fn set_enable(&mut self, level: bool);

  /// Flip the clock once and let the model settle.
  fn half_cycle(&mut self, port: &mut DutPort);
}

#[cfg(feature = "verilator")]
pub use verilated::VerilatedCore;

#[cfg(feature = "verilator")]
mod verilated {
  use std::ffi::{c_char, c_void, CString};
  use std::path::Path;

  use anyhow::Context;
  use tracing::info;

  use super::Dut;
  use crate::dpi::{self, DutPort};

  extern "C" {
    fn dut_new(wave_path: *const c_char) -> *mut c_void;
    fn dut_delete(dut: *mut c_void);
    fn dut_set_reset(dut: *mut c_void, level: u8);
    fn dut_set_enable(dut: *mut c_void, level: u8);
    fn dut_half_cycle(dut: *mut c_void);
  }

  /// Verilated core behind the `dut_*` shim; it calls back into [`crate::dpi`].
  pub struct VerilatedCore {
    handle: *mut c_void,
  }

  impl VerilatedCore {
    pub fn new(wave_path: &Path) -> anyhow::Result<Self> {
      let path = CString::new(wave_path.to_string_lossy().as_bytes())
        .with_context(|| "wave path contains a NUL byte")?;
      let handle = unsafe { dut_new(path.as_ptr()) };
      if handle.is_null() {
        anyhow::bail!("fail creating the Verilated model");
      }
      info!("waveform is written to {}", wave_path.display());
      Ok(Self { handle })
    }
  }

  impl Dut for VerilatedCore {
    fn set_reset(&mut self, level: bool) {
      unsafe { dut_set_reset(self.handle, level as u8) }
    }

    fn set_enable(&mut self, level: bool) {
      unsafe { dut_set_enable(self.handle, level as u8) }
    }

    fn half_cycle(&mut self, port: &mut DutPort) {
      let handle = self.handle;
      dpi::with_target(port, || unsafe { dut_half_cycle(handle) });
    }
  }

  impl Drop for VerilatedCore {
    fn drop(&mut self) {
      unsafe { dut_delete(self.handle) }
    }
  }
}
