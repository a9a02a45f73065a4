use std::path::PathBuf;

use crate::SimArgs;

pub type Word = u32;
pub type VAddr = u32;
pub type PAddr = u32;

pub const ISA: &str = "RV32E";
pub const NR_GPR: usize = 16;

// 8000_0000 to 87ff_ffff, 128MB
pub const MBASE: PAddr = 0x8000_0000;
pub const MSIZE: usize = 0x0800_0000;
pub const PC_RESET_OFFSET: PAddr = 0x0;
pub const RESET_VECTOR: PAddr = MBASE + PC_RESET_OFFSET;

pub const DEVICE_BASE: PAddr = 0xa000_0000;
pub const SERIAL_ADDR: PAddr = DEVICE_BASE + 0x3f8;
pub const RTC_ADDR: PAddr = DEVICE_BASE + 0x48;

pub const RING_BUFFER_SIZE: usize = 16;
pub const RING_RECORD_WIDTH: usize = 128;

pub const ITRACE_START: u64 = 0;
pub const ITRACE_LIMIT: u64 = 10000;

pub const NR_WP: usize = 32;

pub const DIFFTEST_PORT: i32 = 3614;

/// Size reported to the reference model when the built-in image is used.
pub const BUILTIN_IMAGE_SIZE: usize = 4096;

/// Leaves x10 untouched so the halt reports a good trap; x1 ends up as 33.
pub const BUILTIN_IMAGE: [Word; 5] = [
  0x0000_0013, // nop
  0x0160_0093, // addi x1, x0, 22
  0x00b0_8093, // addi x1, x1, 11
  0x0010_0073, // ebreak
  0x0630_8093, // addi x1, x1, 99
];

/// Per-session knobs.
#[derive(Debug, Clone)]
pub struct SimConfig {
  pub mem_size: usize,
  pub image: Option<PathBuf>,
  pub elf: Option<PathBuf>,
  pub difftest_port: i32,
}

impl Default for SimConfig {
  fn default() -> Self {
    Self { mem_size: MSIZE, image: None, elf: None, difftest_port: DIFFTEST_PORT }
  }
}

impl SimConfig {
  pub fn from_args(args: &SimArgs) -> Self {
    Self {
      image: args.image.clone(),
      elf: args.elf_file.clone(),
      difftest_port: args.port,
      ..Self::default()
    }
  }

  /// Last valid physical address of guest memory.
  pub fn pmem_right(&self) -> PAddr {
    MBASE.wrapping_add(self.mem_size as PAddr).wrapping_sub(1)
  }
}
