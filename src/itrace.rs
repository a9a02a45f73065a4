use std::str::FromStr;

use regex::{Captures, Regex};
use riscv_isa::{decode_full, Target};

use crate::config::{VAddr, Word, NR_GPR, RING_BUFFER_SIZE, RING_RECORD_WIDTH};

/// Last `RING_BUFFER_SIZE` trace lines, oldest evicted first.
#[derive(Debug)]
pub struct RingBuffer {
  buffer: Vec<String>,
  // next slot to write
  head: usize,
  size: usize,
}

impl Default for RingBuffer {
  fn default() -> Self {
    Self::with_capacity(RING_BUFFER_SIZE)
  }
}

impl RingBuffer {
  pub fn with_capacity(capacity: usize) -> Self {
    assert!(capacity > 0, "ring buffer needs at least one slot");
    Self { buffer: vec![String::new(); capacity], head: 0, size: 0 }
  }

  pub fn capacity(&self) -> usize {
    self.buffer.len()
  }

  pub fn len(&self) -> usize {
    self.size
  }

  pub fn is_empty(&self) -> bool {
    self.size == 0
  }

  pub fn push(&mut self, line: &str) {
    let slot = &mut self.buffer[self.head];
    slot.clear();
    slot.push_str(truncate(line, RING_RECORD_WIDTH - 1));
    self.head = (self.head + 1) % self.capacity();
    if self.size < self.capacity() {
      self.size += 1;
    }
  }

  /// Records from oldest to newest.
  pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
    let cap = self.capacity();
    (0..self.size).map(move |i| self.buffer[(self.head + cap - self.size + i) % cap].as_str())
  }

  /// Empty the buffer, oldest first, the newest record marked with `-->`.
  pub fn drain(&mut self) -> Vec<String> {
    let last = self.size.saturating_sub(1);
    let lines = self
      .iter()
      .enumerate()
      .map(|(i, line)| if i == last { format!("--> {line}") } else { format!("    {line}") })
      .collect();
    self.size = 0;
    lines
  }
}

fn truncate(line: &str, max: usize) -> &str {
  if line.len() <= max {
    return line;
  }
  let mut end = max;
  while !line.is_char_boundary(end) {
    end -= 1;
  }
  &line[..end]
}

/// Formats one instruction-trace line: pc, raw bytes, disassembly.
pub struct Disasm {
  target: Target,
  operand: Regex,
}

impl Disasm {
  pub fn new() -> anyhow::Result<Self> {
    let target =
      Target::from_str("RV32I").map_err(|_| anyhow::anyhow!("unsupported disassembly target RV32I"))?;
    let operand = Regex::new(
      r"(?x)
        (-?\b\d+)       # offset of a memory operand
        \(
          (x\d+)        # base register
        \)
        |
        (\bx\d+\b)      # plain register
      ",
    )?;
    Ok(Self { target, operand })
  }

  /// Disassembly with register operands annotated with their values.
  pub fn disasm(&self, inst: Word, gpr: &[Word; NR_GPR]) -> String {
    let raw = decode_full(inst, &self.target).to_string();
    let reg = |name: &str| name[1..].parse::<usize>().ok().and_then(|i| gpr.get(i).copied());

    self
      .operand
      .replace_all(&raw, |caps: &Captures| {
        if let (Some(offset), Some(base)) = (caps.get(1), caps.get(2)) {
          match (offset.as_str().parse::<i32>(), reg(base.as_str())) {
            (Ok(off), Some(val)) => format!(
              "{}({}<{val:#x}>)=<{:#x}>",
              offset.as_str(),
              base.as_str(),
              val.wrapping_add(off as Word)
            ),
            _ => caps[0].to_string(),
          }
        } else if let Some(name) = caps.get(3) {
          match reg(name.as_str()) {
            Some(val) => format!("{}<{val:#x}>", name.as_str()),
            None => caps[0].to_string(),
          }
        } else {
          caps[0].to_string()
        }
      })
      .to_string()
  }

  pub fn trace_line(&self, pc: VAddr, inst: Word, gpr: &[Word; NR_GPR]) -> String {
    // compressed instructions are 2 bytes long
    let ilen = if inst & 0x3 == 0x3 { 4 } else { 2 };
    let bytes = inst.to_le_bytes();
    let hex: String = bytes[..ilen].iter().rev().map(|b| format!(" {b:02x}")).collect();
    let pad = (4 - ilen) * 3 + 2;
    format!("{pc:#010x}:{hex}{:pad$}{}", "", self.disasm(inst, gpr))
  }
}
