use std::time::Instant;

use super::ShadowDevice;

/// Microsecond uptime split over two words: low half at offset 0, high half at
/// offset 4. Reading the high half latches a fresh value.
pub struct Rtc {
  boot: Instant,
  latched: u64,
}

impl Rtc {
  pub fn new() -> Self {
    Self { boot: Instant::now(), latched: 0 }
  }
}

impl ShadowDevice for Rtc {
  fn read_mem(&mut self, addr: usize, size: usize) -> Vec<u8> {
    if addr == 4 {
      self.latched = self.boot.elapsed().as_micros() as u64;
    }
    let bytes = self.latched.to_le_bytes();
    bytes[addr..addr + size].to_vec()
  }

  fn write_mem_chunk(&mut self, _addr: usize, _size: usize, _strobe: Option<&[bool]>, _data: &[u8]) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn high_half_latches_the_low_half() {
    let mut rtc = Rtc::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let high = rtc.read_mem(4, 4);
    let low = rtc.read_mem(0, 4);
    let us = u64::from_le_bytes([low[0], low[1], low[2], low[3], high[0], high[1], high[2], high[3]]);
    assert!(us >= 2000);
    assert_eq!(rtc.read_mem(0, 4), low);
  }
}
