use super::ShadowDevice;

/// Host-backed guest memory, filled with one random byte until written.
pub struct MemDevice {
  mem: Vec<u8>,
}

impl MemDevice {
  pub fn new(size: usize) -> Self {
    Self { mem: vec![rand::random::<u8>(); size] }
  }

  pub fn size(&self) -> usize {
    self.mem.len()
  }

  pub fn slice(&self, addr: usize, len: usize) -> Option<&[u8]> {
    self.mem.get(addr..addr.checked_add(len)?)
  }
}

impl ShadowDevice for MemDevice {
  fn read_mem(&mut self, addr: usize, size: usize) -> Vec<u8> {
    self.mem[addr..addr + size].to_vec()
  }

  fn write_mem_chunk(&mut self, addr: usize, size: usize, strobe: Option<&[bool]>, data: &[u8]) {
    // NOTE: alignment is checked by ShadowBus, image loads can be unaligned anyway.
    if let Some(masks) = strobe {
      masks.iter().enumerate().for_each(|(i, mask)| {
        if *mask {
          self.mem[addr + i] = data[i];
        }
      })
    } else {
      self.mem[addr..addr + size].copy_from_slice(&data[..size]);
    }
  }
}
