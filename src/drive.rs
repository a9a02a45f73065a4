use std::{fs, time::Instant};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::{
  bus::ShadowBus,
  config::{
    PAddr, SimConfig, VAddr, Word, BUILTIN_IMAGE, BUILTIN_IMAGE_SIZE, ISA, ITRACE_LIMIT,
    ITRACE_START, MBASE, NR_GPR, RESET_VECTOR,
  },
  difftest::{Difftest, StepCheck},
  dpi::{DutPort, Halt},
  dut::Dut,
  error::SimError,
  ftrace::FuncTracer,
  itrace::{Disasm, RingBuffer},
  ref_module::RefModel,
  sim_state::{RunState, SimStatus},
  state::CoreState,
  watchpoint::{ExprEval, RegisterEval, WatchPool},
};

/// One simulation session: the DUT with its port, the lockstep checker and
/// the execution state machine.
pub struct Driver<D, R> {
  dut: D,
  port: DutPort,
  difftest: Difftest<R>,

  status: SimStatus,
  ring: RingBuffer,
  disasm: Disasm,
  watchpoints: WatchPool,
  evaluator: Box<dyn ExprEval>,

  /// Retired and checked guest instructions.
  guest_inst: u64,
  /// Host time spent inside `run`, in microseconds.
  sim_time: u64,
}

impl<D: Dut, R: RefModel> Driver<D, R> {
  pub fn new(mut dut: D, model: R, mut bus: ShadowBus, config: &SimConfig) -> anyhow::Result<Self> {
    let img_size = load_image(&mut bus, config)?;

    let mut port = DutPort::new(bus, config);
    if let Some(elf) = &config.elf {
      port.ftrace = Some(FuncTracer::load_elf(elf)?);
    }

    port.pc_display(RESET_VECTOR);
    reset(&mut dut, &mut port);

    let image = port
      .bus
      .guest_to_host(RESET_VECTOR, img_size)
      .with_context(|| format!("image of {img_size} bytes does not fit in guest memory"))?
      .to_vec();
    let difftest = Difftest::init(model, config.difftest_port, RESET_VECTOR, &image, port.core())?;

    info!("Welcome to {ISA}-diffemu!");
    Ok(Self {
      dut,
      port,
      difftest,
      status: SimStatus::default(),
      ring: RingBuffer::default(),
      disasm: Disasm::new()?,
      watchpoints: WatchPool::default(),
      evaluator: Box::new(RegisterEval),
      guest_inst: 0,
      sim_time: 0,
    })
  }

  /// Replace the expression evaluator used by watchpoints and `p`.
  pub fn with_evaluator(mut self, evaluator: impl ExprEval + 'static) -> Self {
    self.evaluator = Box::new(evaluator);
    self
  }

  pub fn status(&self) -> &SimStatus {
    &self.status
  }

  pub fn state(&self) -> RunState {
    self.status.state()
  }

  pub fn guest_inst(&self) -> u64 {
    self.guest_inst
  }

  pub fn dut_state(&self) -> &CoreState {
    self.port.core()
  }

  pub fn ref_state(&self) -> &CoreState {
    self.difftest.ref_state()
  }

  pub fn difftest(&self) -> &Difftest<R> {
    &self.difftest
  }

  pub fn port(&self) -> &DutPort {
    &self.port
  }

  pub fn watchpoints(&self) -> &WatchPool {
    &self.watchpoints
  }

  pub fn evaluate(&self, expr: &str) -> Option<Word> {
    self.evaluator.evaluate(expr, self.port.core())
  }

  /// Watch `expr`, starting from its current value.
  pub fn watch(&mut self, expr: &str) -> Result<Option<usize>, SimError> {
    match self.evaluate(expr) {
      Some(value) => self.watchpoints.add(expr, value).map(Some),
      None => Ok(None),
    }
  }

  pub fn unwatch(&mut self, no: usize) -> bool {
    self.watchpoints.delete(no)
  }

  /// `n` words of guest memory starting at `addr`, read without touching devices.
  /// Stops at the end of guest memory; an address outside it yields one `None`.
  pub fn examine(&self, addr: PAddr, n: usize) -> Vec<(PAddr, Option<Word>)> {
    let bus = &self.port.bus;
    let left = if bus.in_pmem(addr) {
      (bus.mem_size() - (addr - MBASE) as usize).div_ceil(4)
    } else {
      1
    };
    (0..n.min(left))
      .map(|i| {
        let addr = addr.wrapping_add(4 * i as PAddr);
        let word = self
          .port
          .bus
          .guest_to_host(addr, 4)
          .and_then(|bytes| bytes.try_into().ok())
          .map(Word::from_le_bytes);
        (addr, word)
      })
      .collect()
  }

  pub fn quit(&mut self) {
    self.status.quit();
  }

  pub fn is_exit_status_bad(&self) -> bool {
    self.status.is_exit_status_bad()
  }

  /// Execute `n` instructions, or until the guest stops when `n` is `None`.
  pub fn run(&mut self, n: Option<u64>) -> Result<RunState, SimError> {
    if let Err(err) = self.status.begin_run() {
      warn!("{err}");
      return Err(err);
    }

    let timer = Instant::now();
    let mut remain = n;
    while self.status.state() == RunState::Running {
      if remain == Some(0) {
        self.status.pause();
        break;
      }
      let pc_before = self.port.core().pc;
      if let Err(err) = self.exec_once(pc_before) {
        let halt_pc = match err {
          SimError::InvalidInst { pc } => pc,
          _ => pc_before,
        };
        error!("{err}");
        self.status.abort(halt_pc);
        self.sim_time += timer.elapsed().as_micros() as u64;
        self.assert_fail_msg();
        self.report();
        return Ok(self.status.state());
      }
      remain = remain.map(|n| n - 1);
    }
    self.sim_time += timer.elapsed().as_micros() as u64;

    if matches!(self.status.state(), RunState::Ended) {
      self.report();
    }
    Ok(self.status.state())
  }

  fn exec_once(&mut self, pc_before: VAddr) -> Result<(), SimError> {
    self.port.begin_step();
    let gpr_before = self.port.core().gpr;
    self.enable_update();
    self.inst_trace(pc_before, &gpr_before);
    self.one_cycle();
    self.one_cycle();
    self.port.exception_trace();

    if let Some(fault) = self.port.take_fault() {
      return Err(fault);
    }
    let halt = self.port.take_halt();
    if let Some(Halt::InvalidInst { pc }) = halt {
      return Err(SimError::InvalidInst { pc });
    }

    let skip = self.port.bus.take_skip();
    let interrupt = self.port.take_interrupt();
    match self.difftest.step(self.port.core(), skip, interrupt).map_err(SimError::Mismatch)? {
      StepCheck::Checked => {}
      StepCheck::Resynced => debug!("reference resynced after pc = {pc_before:#010x}"),
    }
    self.guest_inst += 1;

    if let Some(Halt::Ebreak { pc, code }) = halt {
      self.status.end(pc, code);
      return Ok(());
    }

    if !self.watchpoints.is_empty() {
      let hits = self.watchpoints.check(self.evaluator.as_ref(), self.port.core())?;
      for hit in &hits {
        info!("Watchpoint {}: {}", hit.no, hit.expr);
        info!("Old value = {:#x} ({})", hit.old, hit.old);
        info!("New value = {:#x} ({})", hit.new, hit.new);
      }
      if !hits.is_empty() {
        self.status.pause();
      }
    }
    Ok(())
  }

  fn half_cycle(&mut self) {
    self.dut.half_cycle(&mut self.port);
  }

  fn one_cycle(&mut self) {
    self.half_cycle();
    self.half_cycle();
  }

  /// Two clock cycles during which bus side effects are honoured.
  fn enable_update(&mut self) {
    self.dut.set_enable(true);
    self.port.set_enable(true);
    self.one_cycle();
    self.one_cycle();
    self.dut.set_enable(false);
    self.port.set_enable(false);
  }

  /// `gpr` holds the operands as they were before the instruction executed.
  fn inst_trace(&mut self, pc: VAddr, gpr: &[Word; NR_GPR]) {
    let line = self.disasm.trace_line(pc, self.port.core().inst, gpr);
    if (ITRACE_START..=ITRACE_LIMIT).contains(&self.guest_inst) {
      debug!(target: "itrace", "{line}");
    }
    self.ring.push(&line);
  }

  fn assert_fail_msg(&mut self) {
    error!("last instructions:");
    for line in self.ring.drain() {
      error!("{line}");
    }
    self.port.core().display("dut");
    self.difftest.display();
  }

  fn report(&self) {
    let pc = self.status.halt_pc();
    match self.status.state() {
      RunState::Aborted => error!("Rock Bottom: \x1b[31mABORT\x1b[0m at PC = {pc:#010x}"),
      RunState::Ended if self.status.halt_ret() == 0 => {
        info!("Rock Bottom: \x1b[32mHIT GOOD TRAP\x1b[0m at PC = {pc:#010x}")
      }
      RunState::Ended => error!(
        "Rock Bottom: \x1b[31mHIT BAD TRAP\x1b[0m at PC = {pc:#010x}, code = {}",
        self.status.halt_ret()
      ),
      _ => {}
    }
    self.statistic();
  }

  pub fn statistic(&self) {
    info!("host time spent = {} us", self.sim_time);
    info!("total guest instructions = {}", self.guest_inst);
    if self.sim_time > 0 {
      info!("simulation frequency = {} inst/s", self.guest_inst * 1_000_000 / self.sim_time);
    } else {
      info!("Finish running in less than 1 us and can not calculate the simulation frequency");
    }
  }
}

/// Built-in image first, the user image on top; returns the size to copy to
/// the reference.
fn load_image(bus: &mut ShadowBus, config: &SimConfig) -> anyhow::Result<usize> {
  let builtin: Vec<u8> = BUILTIN_IMAGE.iter().flat_map(|w| w.to_le_bytes()).collect();
  bus.load_mem_seg(RESET_VECTOR, &builtin)?;

  let Some(path) = &config.image else {
    info!("No image is given. Use the default build-in image.");
    return Ok(BUILTIN_IMAGE_SIZE.min(bus.mem_size()));
  };
  let image = fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
  bus.load_mem_seg(RESET_VECTOR, &image)?;
  info!("The image is {}, size = {}", path.display(), image.len());
  Ok(image.len())
}

fn reset<D: Dut>(dut: &mut D, port: &mut DutPort) {
  dut.set_reset(true);
  dut.half_cycle(port);
  dut.half_cycle(port);
  dut.set_reset(false);
  dut.half_cycle(port);
  dut.half_cycle(port);
}
