#![allow(dead_code)]

use std::io::{self, Cursor, Write};

use diffemu::{
  bus::{ShadowBus, Uart},
  config::{PAddr, SimConfig, VAddr, Word, MBASE, NR_GPR, RESET_VECTOR},
  dpi::DutPort,
  dut::Dut,
  ref_module::{Direction, RefModel},
  state::{CoreState, Csr},
  Driver, SimError,
};
use tempfile::NamedTempFile;

pub const MEM_SIZE: usize = 0x1000;
/// Trap vector the toy core resets to.
pub const MTVEC: VAddr = RESET_VECTOR + 0x40;

//----------------------
// tiny RV32E assembler
//----------------------

fn i_type(opcode: Word, f3: Word, rd: Word, rs1: Word, imm: i32) -> Word {
  ((imm as Word & 0xfff) << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | opcode
}

fn s_type(f3: Word, rs2: Word, rs1: Word, imm: i32) -> Word {
  let imm = imm as Word;
  (((imm >> 5) & 0x7f) << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | ((imm & 0x1f) << 7) | 0x23
}

pub fn addi(rd: Word, rs1: Word, imm: i32) -> Word {
  i_type(0x13, 0, rd, rs1, imm)
}

pub fn lui(rd: Word, imm20: Word) -> Word {
  (imm20 << 12) | (rd << 7) | 0x37
}

pub fn add(rd: Word, rs1: Word, rs2: Word) -> Word {
  (rs2 << 20) | (rs1 << 15) | (rd << 7) | 0x33
}

pub fn lw(rd: Word, rs1: Word, imm: i32) -> Word {
  i_type(0x03, 2, rd, rs1, imm)
}

pub fn lbu(rd: Word, rs1: Word, imm: i32) -> Word {
  i_type(0x03, 4, rd, rs1, imm)
}

pub fn sw(rs2: Word, rs1: Word, imm: i32) -> Word {
  s_type(2, rs2, rs1, imm)
}

pub fn sb(rs2: Word, rs1: Word, imm: i32) -> Word {
  s_type(0, rs2, rs1, imm)
}

pub const EBREAK: Word = 0x0010_0073;
pub const NOP: Word = 0x0000_0013;
/// Not part of the toy ISA.
pub const ILLEGAL: Word = 0xffff_ffff;

pub fn assemble(program: &[Word]) -> Vec<u8> {
  program.iter().flat_map(|inst| inst.to_le_bytes()).collect()
}

//----------------------
// toy executor
//----------------------

pub trait Memory {
  /// The word containing `addr`, shifted to `addr`.
  fn load(&mut self, addr: PAddr) -> Word;
  fn store(&mut self, addr: PAddr, mask: u8, data: Word);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Next,
  Ebreak,
  Invalid,
}

/// Execute `inst` at `*pc`, advancing `*pc` unless the instruction is invalid.
pub fn execute(gpr: &mut [Word; NR_GPR], pc: &mut VAddr, inst: Word, mem: &mut impl Memory) -> Outcome {
  let opcode = inst & 0x7f;
  let rd = ((inst >> 7) & 0x1f) as usize;
  let f3 = (inst >> 12) & 0x7;
  let rs1 = ((inst >> 15) & 0x1f) as usize;
  let rs2 = ((inst >> 20) & 0x1f) as usize;
  let imm_i = ((inst as i32) >> 20) as Word;
  let imm_s = ((((inst as i32) >> 25) << 5) as Word) | ((inst >> 7) & 0x1f);

  // bits 11:7 and 24:20 only name registers in the formats that have them
  let writes_rd = matches!(opcode, 0x03 | 0x13 | 0x33 | 0x37);
  let reads_rs1 = matches!(opcode, 0x03 | 0x13 | 0x23 | 0x33);
  let reads_rs2 = matches!(opcode, 0x23 | 0x33);
  if (writes_rd && rd >= NR_GPR) || (reads_rs1 && rs1 >= NR_GPR) || (reads_rs2 && rs2 >= NR_GPR) {
    return Outcome::Invalid;
  }

  let value = match (opcode, f3) {
    _ if inst == EBREAK => {
      *pc = pc.wrapping_add(4);
      return Outcome::Ebreak;
    }
    (0x13, 0) => Some(gpr[rs1].wrapping_add(imm_i)),
    (0x37, _) => Some(inst & 0xffff_f000),
    (0x33, 0) if inst >> 25 == 0 => Some(gpr[rs1].wrapping_add(gpr[rs2])),
    (0x03, 2) => Some(mem.load(gpr[rs1].wrapping_add(imm_i))),
    (0x03, 4) => Some(mem.load(gpr[rs1].wrapping_add(imm_i)) & 0xff),
    (0x23, 2) => {
      mem.store(gpr[rs1].wrapping_add(imm_s), 0b1111, gpr[rs2]);
      None
    }
    (0x23, 0) => {
      let addr = gpr[rs1].wrapping_add(imm_s);
      let lane = addr & 0x3;
      mem.store(addr, 1 << lane, (gpr[rs2] & 0xff) << (lane * 8));
      None
    }
    _ => return Outcome::Invalid,
  };

  if let Some(value) = value {
    if rd != 0 {
      gpr[rd] = value;
    }
  }
  *pc = pc.wrapping_add(4);
  Outcome::Next
}

struct PortMemory<'a>(&'a mut DutPort);

impl Memory for PortMemory<'_> {
  fn load(&mut self, addr: PAddr) -> Word {
    self.0.mem_read(addr)
  }

  fn store(&mut self, addr: PAddr, mask: u8, data: Word) {
    self.0.mem_write(addr, mask, data)
  }
}

//----------------------
// toy DUT
//----------------------

/// Commits one instruction per enable window, reporting through the port on
/// every half cycle like a clocked model would.
#[derive(Debug, Default)]
pub struct ToyDut {
  gpr: [Word; NR_GPR],
  pc: VAddr,
  csr: [Word; Csr::COUNT],
  reset: bool,
  enable: bool,
  committed: bool,

  corrupt_at: Option<VAddr>,
  interrupt_at: Option<(VAddr, Word)>,
}

impl ToyDut {
  /// Add one to x1 after executing the instruction at `pc`.
  pub fn corrupting(pc: VAddr) -> Self {
    Self { corrupt_at: Some(pc), ..Default::default() }
  }

  /// Take interrupt `no` instead of executing the instruction at `pc`.
  pub fn interrupting(pc: VAddr, no: Word) -> Self {
    Self { interrupt_at: Some((pc, no)), ..Default::default() }
  }

  fn commit(&mut self, port: &mut DutPort) {
    if let Some((pc, no)) = self.interrupt_at {
      if pc == self.pc {
        self.interrupt_at = None;
        self.take_interrupt(no);
        port.intr_raise(no);
        for csr in Csr::ALL {
          port.csr_update(csr.index(), self.csr[csr.index()]);
        }
        return;
      }
    }

    let inst = port.inst_fetch();
    port.inst_display(inst);
    let pc = self.pc;
    let outcome = execute(&mut self.gpr, &mut self.pc, inst, &mut PortMemory(port));
    if self.corrupt_at == Some(pc) {
      self.gpr[1] = self.gpr[1].wrapping_add(1);
    }
    port.regfile_update(&self.gpr);
    match outcome {
      Outcome::Next => {}
      Outcome::Ebreak => port.ebreak_exit(),
      Outcome::Invalid => port.inst_invalid(),
    }
  }

  fn take_interrupt(&mut self, no: Word) {
    self.csr[Csr::Mepc.index()] = self.pc;
    self.csr[Csr::Mcause.index()] = no;
    self.pc = self.csr[Csr::Mtvec.index()];
  }
}

impl Dut for ToyDut {
  fn set_reset(&mut self, level: bool) {
    self.reset = level;
  }

  fn set_enable(&mut self, level: bool) {
    if level && !self.enable {
      self.committed = false;
    }
    self.enable = level;
  }

  fn half_cycle(&mut self, port: &mut DutPort) {
    if self.reset {
      self.gpr = [0; NR_GPR];
      self.csr = [0; Csr::COUNT];
      self.csr[Csr::Mtvec.index()] = MTVEC;
      self.pc = RESET_VECTOR;
      for csr in Csr::ALL {
        port.csr_update(csr.index(), self.csr[csr.index()]);
      }
    }
    port.pc_display(self.pc);
    port.regfile_update(&self.gpr);

    if self.enable && !self.reset && !self.committed {
      self.committed = true;
      self.commit(port);
    }
    port.pc_display(self.pc);
  }
}

//----------------------
// toy reference model
//----------------------

#[derive(Debug)]
pub struct ToyRef {
  state: CoreState,
  mem: Vec<u8>,
  pub port: Option<i32>,
  pub execs: u64,
  pub resyncs: u64,
  pub interrupts: Vec<Word>,
}

impl ToyRef {
  pub fn new() -> Self {
    Self {
      state: CoreState::default(),
      mem: vec![0; MEM_SIZE],
      port: None,
      execs: 0,
      resyncs: 0,
      interrupts: Vec::new(),
    }
  }

  pub fn mem(&self) -> &[u8] {
    &self.mem
  }
}

struct RefMemory<'a>(&'a mut [u8]);

impl RefMemory<'_> {
  fn offset(&self, addr: PAddr) -> Option<usize> {
    let off = addr.checked_sub(MBASE)? as usize & !0x3;
    (off + 4 <= self.0.len()).then_some(off)
  }
}

impl Memory for RefMemory<'_> {
  fn load(&mut self, addr: PAddr) -> Word {
    // devices read as zero, the driver resyncs after them
    let Some(off) = self.offset(addr) else {
      return 0;
    };
    let bytes = [self.0[off], self.0[off + 1], self.0[off + 2], self.0[off + 3]];
    Word::from_le_bytes(bytes) >> ((addr & 0x3) * 8)
  }

  fn store(&mut self, addr: PAddr, mask: u8, data: Word) {
    let Some(off) = self.offset(addr) else {
      return;
    };
    for (i, byte) in data.to_le_bytes().iter().enumerate() {
      if mask & (1 << i) != 0 {
        self.0[off + i] = *byte;
      }
    }
  }
}

impl RefModel for ToyRef {
  fn init(&mut self, port: i32) {
    self.port = Some(port);
  }

  fn memcpy(&mut self, addr: PAddr, buf: &mut [u8], direction: Direction) -> Result<(), SimError> {
    if direction != Direction::ToRef {
      return Err(SimError::UnsupportedDirection);
    }
    let off = (addr - MBASE) as usize;
    self.mem[off..off + buf.len()].copy_from_slice(buf);
    Ok(())
  }

  fn regcpy(&mut self, state: &mut CoreState, direction: Direction) {
    match direction {
      Direction::ToRef => {
        self.state = *state;
        self.resyncs += 1;
      }
      Direction::ToDut => *state = self.state,
    }
  }

  fn exec(&mut self, n: u64) {
    for _ in 0..n {
      let inst = RefMemory(&mut self.mem).load(self.state.pc);
      let state = &mut self.state;
      execute(&mut state.gpr, &mut state.pc, inst, &mut RefMemory(&mut self.mem));
      self.execs += 1;
    }
  }

  fn raise_intr(&mut self, no: Word) {
    self.state.set_csr(Csr::Mepc, self.state.pc);
    self.state.set_csr(Csr::Mcause, no);
    self.state.pc = self.state.csr(Csr::Mtvec);
    self.interrupts.push(no);
  }
}

//----------------------
// session set-up
//----------------------

/// Serial output shared with the test.
#[derive(Clone, Default)]
pub struct Output(pub std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl Write for Output {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().map_err(|_| io::Error::other("poisoned"))?.extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

/// Run `f` with a subscriber that collects every event up to `level`.
pub fn capture_logs<T>(level: tracing::Level, f: impl FnOnce() -> T) -> (T, String) {
  let logs = Output::default();
  let writer = logs.clone();
  let subscriber = tracing_subscriber::fmt()
    .with_max_level(level)
    .with_ansi(false)
    .without_time()
    .with_writer(move || writer.clone())
    .finish();
  let result = tracing::subscriber::with_default(subscriber, f);
  let text = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
  (result, text)
}

pub struct Session {
  pub driver: Driver<ToyDut, ToyRef>,
  pub output: Output,
  _image: NamedTempFile,
}

pub fn session_with(program: &[Word], dut: ToyDut, input: &[u8]) -> Session {
  let mut image = NamedTempFile::new().unwrap();
  image.write_all(&assemble(program)).unwrap();
  image.flush().unwrap();

  let config = SimConfig {
    mem_size: MEM_SIZE,
    image: Some(image.path().to_path_buf()),
    ..Default::default()
  };
  let output = Output::default();
  let uart = Uart::new(Box::new(Cursor::new(input.to_vec())), Box::new(output.clone()));
  let bus = ShadowBus::with_uart(MEM_SIZE, uart);
  let driver = Driver::new(dut, ToyRef::new(), bus, &config).unwrap();
  Session { driver, output, _image: image }
}

pub fn session(program: &[Word]) -> Session {
  session_with(program, ToyDut::default(), b"")
}

pub fn reference(driver: &Driver<ToyDut, ToyRef>) -> &ToyRef {
  driver.difftest().refmodule().module()
}
