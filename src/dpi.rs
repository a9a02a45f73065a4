use std::cell::Cell;
use std::ffi::c_int;
use std::ptr::NonNull;

use tracing::{error, info, trace};

use crate::{
  bus::ShadowBus,
  config::{PAddr, SimConfig, VAddr, Word, MBASE, NR_GPR},
  error::SimError,
  ftrace::FuncTracer,
  state::{Csr, CoreState},
};

/// Guest-visible outcome reported by the DUT during one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
  /// `ebreak` with the return code the guest left in `a0`.
  Ebreak { pc: VAddr, code: Word },
  /// The decoder rejected the instruction at `pc`.
  InvalidInst { pc: VAddr },
}

/// DUT side of the lockstep pair: the architectural mirror fed by the hardware
/// model, the bus it talks to, and everything it reported during the current step.
pub struct DutPort {
  pub(crate) core: CoreState,
  pub(crate) bus: ShadowBus,
  pub(crate) ftrace: Option<FuncTracer>,

  enable: bool,
  fetch_memo: Option<(VAddr, Word)>,
  read_memo: Option<(PAddr, Word)>,
  write_memo: Option<(PAddr, u8, Word)>,
  call_memo: Option<VAddr>,

  /// The DUT took a trap during this step.
  trap: bool,
  halt: Option<Halt>,
  fault: Option<SimError>,
  interrupt: Option<Word>,
  pmem_right: PAddr,
}

impl DutPort {
  pub fn new(bus: ShadowBus, config: &SimConfig) -> Self {
    Self {
      core: CoreState::default(),
      bus,
      ftrace: None,
      enable: false,
      fetch_memo: None,
      read_memo: None,
      write_memo: None,
      call_memo: None,
      trap: false,
      halt: None,
      fault: None,
      interrupt: None,
      pmem_right: config.pmem_right(),
    }
  }

  pub fn core(&self) -> &CoreState {
    &self.core
  }

  pub fn bus_mut(&mut self) -> &mut ShadowBus {
    &mut self.bus
  }

  pub(crate) fn set_enable(&mut self, enable: bool) {
    self.enable = enable;
  }

  /// Forget everything memoised for the previous instruction.
  pub(crate) fn begin_step(&mut self) {
    self.fetch_memo = None;
    self.read_memo = None;
    self.write_memo = None;
    self.call_memo = None;
    self.trap = false;
    self.interrupt = None;
  }

  pub(crate) fn take_halt(&mut self) -> Option<Halt> {
    self.halt.take()
  }

  pub(crate) fn take_fault(&mut self) -> Option<SimError> {
    self.fault.take()
  }

  pub(crate) fn take_interrupt(&mut self) -> Option<Word> {
    self.interrupt.take()
  }

  /// Dump the trap CSRs once per step in which the DUT trapped.
  pub(crate) fn exception_trace(&mut self) {
    if !std::mem::take(&mut self.trap) {
      return;
    }
    info!(target: "etrace", "trap taken, mcause = {:#x}", self.core.csr(Csr::Mcause));
    for csr in Csr::ALL {
      info!(target: "etrace", "csr[{}] = {:#x}", csr.name(), self.core.csr(csr));
    }
  }

  fn raise(&mut self, err: SimError) {
    if self.fault.is_none() {
      error!("{err}");
      self.fault = Some(err);
    }
  }

  fn out_of_bound(&self, addr: PAddr) -> SimError {
    SimError::OutOfBound { addr, left: MBASE, right: self.pmem_right, pc: self.core.pc }
  }

  pub fn inst_fetch(&mut self) -> Word {
    if let Some((pc, inst)) = self.fetch_memo {
      if pc == self.core.pc {
        return inst;
      }
    }
    let pc = self.core.pc;
    match self.bus.read(pc) {
      Ok(inst) => {
        self.fetch_memo = Some((pc, inst));
        inst
      }
      Err(fault) => {
        self.raise(self.out_of_bound(fault.addr));
        0
      }
    }
  }

  pub fn pc_display(&mut self, pc: VAddr) {
    self.core.pc = pc;
  }

  pub fn inst_display(&mut self, inst: Word) {
    self.core.inst = inst;
  }

  pub fn regfile_update(&mut self, gpr: &[Word; NR_GPR]) {
    self.core.gpr = *gpr;
  }

  pub fn csr_update(&mut self, idx: usize, value: Word) {
    match Csr::from_index(idx) {
      Some(csr) => {
        if csr == Csr::Mcause && self.core.csr(csr) != value {
          self.trap = true;
        }
        self.core.set_csr(csr, value)
      }
      None => error!("csr_update: no csr slot {idx}"),
    }
  }

  /// Return the word containing `addr`, byte-shifted to `addr`.
  pub fn mem_read(&mut self, addr: PAddr) -> Word {
    if let Some((last, data)) = self.read_memo {
      if last == addr {
        return data;
      }
    }
    if !self.enable && self.bus.is_intercept(addr) {
      trace!("mem_read({addr:#x}) outside the enable window ignored");
      return 0;
    }
    match self.bus.read(addr) {
      Ok(data) => {
        self.read_memo = Some((addr, data));
        data
      }
      Err(fault) => {
        self.raise(self.out_of_bound(fault.addr));
        0
      }
    }
  }

  /// According to `mask`, write the byte lanes of `data` to the word at `addr & !0x3`.
  pub fn mem_write(&mut self, addr: PAddr, mask: u8, data: Word) {
    if !self.enable {
      trace!("mem_write({addr:#x}) outside the enable window ignored");
      return;
    }
    if self.write_memo == Some((addr, mask, data)) {
      return;
    }
    self.write_memo = Some((addr, mask, data));
    if matches!(self.read_memo, Some((last, _)) if last & !0x3 == addr & !0x3) {
      self.read_memo = None;
    }
    if let Err(fault) = self.bus.write(addr, mask, data) {
      self.raise(self.out_of_bound(fault.addr));
    }
  }

  pub fn ebreak_exit(&mut self) {
    if self.halt.is_none() {
      let code = self.core.gpr[10];
      info!("Simulation terminated by ebreak.");
      self.halt = Some(Halt::Ebreak { pc: self.core.pc, code });
    }
  }

  pub fn inst_invalid(&mut self) {
    if self.halt.is_none() {
      error!("Simulation terminated by invalid instruction at pc = {:#010x}.", self.core.pc);
      self.halt = Some(Halt::InvalidInst { pc: self.core.pc });
    }
  }

  /// The DUT took interrupt `no` instead of retiring an instruction.
  pub fn intr_raise(&mut self, no: Word) {
    self.interrupt = Some(no);
    self.trap = true;
  }

  pub fn func_check(&mut self, rdest: usize, addr_curr: VAddr, addr_jump: VAddr, data_rsrc1: Word) {
    if self.call_memo == Some(addr_curr) {
      return;
    }
    self.call_memo = Some(addr_curr);
    let ra = self.core.gpr[1];
    if let Some(ftrace) = self.ftrace.as_mut() {
      if rdest == 1 {
        ftrace.call(addr_curr, addr_jump);
      } else if rdest == 0 && data_rsrc1 == ra {
        ftrace.ret(addr_curr);
      }
    }
  }
}

//----------------------
// dpi functions
//----------------------

thread_local! {
  static DPI_TARGET: Cell<Option<NonNull<DutPort>>> = const { Cell::new(None) };
}

/// Expose `port` to the C callbacks while `f` evaluates the hardware model.
pub fn with_target<R>(port: &mut DutPort, f: impl FnOnce() -> R) -> R {
  struct Restore(Option<NonNull<DutPort>>);
  impl Drop for Restore {
    fn drop(&mut self) {
      DPI_TARGET.with(|t| t.set(self.0));
    }
  }

  let _restore = Restore(DPI_TARGET.with(|t| t.replace(Some(NonNull::from(port)))));
  f()
}

fn with_port<R>(name: &str, default: R, f: impl FnOnce(&mut DutPort) -> R) -> R {
  match DPI_TARGET.with(|t| t.get()) {
    // SAFETY: the pointer comes from a `&mut DutPort` that `with_target` keeps
    // borrowed for as long as it is installed.
    Some(mut port) => f(unsafe { port.as_mut() }),
    None => {
      error!("{name} called outside of a DUT evaluation");
      default
    }
  }
}

#[no_mangle]
extern "C" fn ebreak_exit() {
  with_port("ebreak_exit", (), |port| port.ebreak_exit())
}

#[no_mangle]
extern "C" fn inst_invalid() {
  with_port("inst_invalid", (), |port| port.inst_invalid())
}

#[no_mangle]
extern "C" fn inst_fetch() -> c_int {
  with_port("inst_fetch", 0, |port| port.inst_fetch() as c_int)
}

#[no_mangle]
extern "C" fn inst_display(inst: c_int) {
  with_port("inst_display", (), |port| port.inst_display(inst as Word))
}

#[no_mangle]
extern "C" fn pc_display(pc: c_int) {
  with_port("pc_display", (), |port| port.pc_display(pc as VAddr))
}

#[no_mangle]
extern "C" fn mem_read(addr: c_int) -> c_int {
  with_port("mem_read", 0, |port| port.mem_read(addr as PAddr) as c_int)
}

#[no_mangle]
extern "C" fn mem_write(addr: c_int, mask: u8, data: c_int) {
  with_port("mem_write", (), |port| port.mem_write(addr as PAddr, mask, data as Word))
}

#[no_mangle]
extern "C" fn csr_update(idx: c_int, value: c_int) {
  with_port("csr_update", (), |port| port.csr_update(idx as usize, value as Word))
}

#[no_mangle]
extern "C" fn intr_raise(no: c_int) {
  with_port("intr_raise", (), |port| port.intr_raise(no as Word))
}

#[no_mangle]
extern "C" fn func_check(rdest: c_int, addr_curr: c_int, addr_jump: c_int, data_rsrc1: c_int) {
  with_port("func_check", (), |port| {
    port.func_check(rdest as usize, addr_curr as VAddr, addr_jump as VAddr, data_rsrc1 as Word)
  })
}

#[no_mangle]
#[rustfmt::skip]
extern "C" fn regfile_update(
  regfile_0: c_int, regfile_1: c_int, regfile_2: c_int, regfile_3: c_int,
  regfile_4: c_int, regfile_5: c_int, regfile_6: c_int, regfile_7: c_int,
  regfile_8: c_int, regfile_9: c_int, regfile_10: c_int, regfile_11: c_int,
  regfile_12: c_int, regfile_13: c_int, regfile_14: c_int, regfile_15: c_int,
) {
  let gpr = [
    regfile_0, regfile_1, regfile_2, regfile_3,
    regfile_4, regfile_5, regfile_6, regfile_7,
    regfile_8, regfile_9, regfile_10, regfile_11,
    regfile_12, regfile_13, regfile_14, regfile_15,
  ]
  .map(|r| r as Word);
  with_port("regfile_update", (), |port| port.regfile_update(&gpr))
}
