mod mem;
mod rtc;
mod uart;

pub use mem::MemDevice;
pub use rtc::Rtc;
pub use uart::Uart;

use thiserror::Error;
use tracing::trace;

use crate::config::{PAddr, Word, MBASE, RTC_ADDR, SERIAL_ADDR};

/// A device mapped into the guest address space.
pub trait ShadowDevice: Send {
  /// addr: offset respect to the base of this device
  fn read_mem(&mut self, addr: usize, size: usize) -> Vec<u8>;
  /// addr: offset respect to the base of this device
  /// strobe: signals which element in data is valid, None = all valid
  fn write_mem_chunk(&mut self, addr: usize, size: usize, strobe: Option<&[bool]>, data: &[u8]);
}

struct ShadowBusDevice {
  name: &'static str,
  base: PAddr,
  size: usize,
  device: Box<dyn ShadowDevice>,
}

impl ShadowBusDevice {
  fn contains(&self, addr: PAddr) -> bool {
    addr >= self.base && ((addr - self.base) as usize) < self.size
  }
}

/// Access that hit neither guest memory nor a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("access to {addr:#010x} leads to nowhere")]
pub struct BusFault {
  pub addr: PAddr,
}

/// Word-granular bridge between the DUT bus and host-backed storage.
///
/// Devices registered on the bus are intercepts: they win over guest memory, and
/// any access to them asks the lockstep checker to resync instead of compare.
pub struct ShadowBus {
  pmem: MemDevice,
  devices: Vec<ShadowBusDevice>,
  skip_ref: bool,
}

impl ShadowBus {
  /// Guest memory at `MBASE` plus the serial port and the RTC on host stdio.
  pub fn new(mem_size: usize) -> Self {
    Self::with_uart(mem_size, Uart::stdio())
  }

  pub fn with_uart(mem_size: usize, uart: Uart) -> Self {
    let mut bus = Self { pmem: MemDevice::new(mem_size), devices: Vec::new(), skip_ref: false };
    bus.add_device("serial", SERIAL_ADDR, 4, Box::new(uart));
    bus.add_device("rtc", RTC_ADDR, 8, Box::new(Rtc::new()));
    bus
  }

  pub fn add_device(
    &mut self,
    name: &'static str,
    base: PAddr,
    size: usize,
    device: Box<dyn ShadowDevice>,
  ) {
    self.devices.push(ShadowBusDevice { name, base, size, device });
  }

  pub fn mem_size(&self) -> usize {
    self.pmem.size()
  }

  pub fn in_pmem(&self, addr: PAddr) -> bool {
    (addr.wrapping_sub(MBASE) as usize) < self.pmem.size()
  }

  pub fn is_intercept(&self, addr: PAddr) -> bool {
    self.devices.iter().any(|d| d.contains(addr & !0x3))
  }

  /// Read the word containing `addr`, shifted so that the byte at `addr` is the
  /// lowest byte of the result.
  pub fn read(&mut self, addr: PAddr) -> Result<Word, BusFault> {
    let aligned = addr & !0x3;
    let shift = (addr & 0x3) * 8;

    let data = if let Some(handler) = self.devices.iter_mut().find(|d| d.contains(aligned)) {
      let data = handler.device.read_mem((aligned - handler.base) as usize, 4);
      trace!(
        target: "dtrace",
        "\x1b[35mdevice_read\x1b[0m ({}, addr={addr:#x}, data={})",
        handler.name,
        hex::encode(&data)
      );
      self.skip_ref = true;
      data
    } else if self.in_pmem(aligned) {
      trace!(target: "mtrace", "Read from physical memory: addr = {aligned:#010x}, len = 4");
      self.pmem.read_mem((aligned - MBASE) as usize, 4)
    } else {
      return Err(BusFault { addr });
    };

    let word = Word::from_le_bytes([data[0], data[1], data[2], data[3]]);
    Ok(word >> shift)
  }

  /// Write the byte lanes of `data` selected by `mask` into the word containing
  /// `addr`; bit `i` of `mask` enables byte `i`.
  pub fn write(&mut self, addr: PAddr, mask: u8, data: Word) -> Result<(), BusFault> {
    let aligned = addr & !0x3;
    let strobe: [bool; 4] = std::array::from_fn(|i| mask & (1 << i) != 0);
    let bytes = data.to_le_bytes();

    if !strobe.iter().any(|x| *x) {
      trace!("Mask 0 write detected at {addr:#x}");
      return Ok(());
    }

    if let Some(handler) = self.devices.iter_mut().find(|d| d.contains(aligned)) {
      trace!(
        target: "dtrace",
        "\x1b[33mdevice_write\x1b[0m ({}, addr={addr:#x}, mask={mask:#06b}, data={})",
        handler.name,
        hex::encode(bytes)
      );
      handler.device.write_mem_chunk((aligned - handler.base) as usize, 4, Some(&strobe), &bytes);
      self.skip_ref = true;
      Ok(())
    } else if self.in_pmem(aligned) {
      trace!(
        target: "mtrace",
        "Write to physical memory: addr = {aligned:#010x}, mask = {mask:#06b}, data = {data:#010x}"
      );
      self.pmem.write_mem_chunk((aligned - MBASE) as usize, 4, Some(&strobe), &bytes);
      Ok(())
    } else {
      Err(BusFault { addr })
    }
  }

  /// Copy a loadable segment into guest memory.
  pub fn load_mem_seg(&mut self, vaddr: PAddr, data: &[u8]) -> anyhow::Result<()> {
    let fits = self.in_pmem(vaddr)
      && (vaddr - MBASE) as usize + data.len() <= self.pmem.size();
    if !fits {
      anyhow::bail!(
        "fail loading image with vaddr={:#x}, len={}B: load memory to nowhere",
        vaddr,
        data.len()
      );
    }
    self.pmem.write_mem_chunk((vaddr - MBASE) as usize, data.len(), None, data);
    Ok(())
  }

  /// Host view of guest memory, `None` when the range leaves it.
  pub fn guest_to_host(&self, addr: PAddr, len: usize) -> Option<&[u8]> {
    if !self.in_pmem(addr) {
      return None;
    }
    self.pmem.slice((addr - MBASE) as usize, len)
  }

  /// Consume the pending skip request.
  pub fn take_skip(&mut self) -> bool {
    std::mem::take(&mut self.skip_ref)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn small_bus(input: &[u8]) -> ShadowBus {
    let uart = Uart::new(Box::new(Cursor::new(input.to_vec())), Box::new(std::io::sink()));
    let mut bus = ShadowBus::with_uart(0x1000, uart);
    bus.load_mem_seg(MBASE, &[0u8; 0x40]).unwrap();
    bus
  }

  #[test]
  fn masked_write_touches_only_selected_lanes() {
    let mut bus = small_bus(b"");
    bus.write(MBASE + 8, 0b1111, 0xaabb_ccdd).unwrap();
    bus.write(MBASE + 12, 0b1111, 0x1122_3344).unwrap();
    bus.write(MBASE + 4, 0b1111, 0x5566_7788).unwrap();

    bus.write(MBASE + 9, 0b0011, 0x0000_beef).unwrap();

    assert_eq!(bus.read(MBASE + 8).unwrap(), 0xaabb_beef);
    assert_eq!(bus.read(MBASE + 12).unwrap(), 0x1122_3344);
    assert_eq!(bus.read(MBASE + 4).unwrap(), 0x5566_7788);
    assert!(!bus.take_skip());
  }

  #[test]
  fn unaligned_read_shifts_the_containing_word() {
    let mut bus = small_bus(b"");
    bus.write(MBASE + 0x10, 0b1111, 0x1234_5678).unwrap();

    assert_eq!(bus.read(MBASE + 0x11).unwrap(), 0x0012_3456);
    assert_eq!(bus.read(MBASE + 0x13).unwrap(), 0x0000_0012);
  }

  #[test]
  fn zero_mask_write_is_dropped() {
    let mut bus = small_bus(b"");
    bus.write(MBASE, 0b1111, 7).unwrap();
    bus.write(MBASE, 0, 0xffff_ffff).unwrap();
    assert_eq!(bus.read(MBASE).unwrap(), 7);
  }

  #[test]
  fn access_outside_memory_faults() {
    let mut bus = small_bus(b"");
    assert_eq!(bus.read(MBASE + 0x1000), Err(BusFault { addr: MBASE + 0x1000 }));
    assert_eq!(bus.write(0x1000, 0b1, 1), Err(BusFault { addr: 0x1000 }));
    assert!(bus.read(MBASE - 4).is_err());
  }

  #[test]
  fn device_access_requests_a_skip() {
    let mut bus = small_bus(b"hi");
    assert_eq!(bus.read(SERIAL_ADDR).unwrap() & 0xff, b'h' as Word);
    assert!(bus.take_skip());
    assert!(!bus.take_skip(), "skip must be consumed exactly once");

    bus.write(SERIAL_ADDR, 0b0001, b'x' as Word).unwrap();
    assert!(bus.take_skip());
  }

  #[test]
  fn image_must_fit_in_memory() {
    let mut bus = small_bus(b"");
    assert!(bus.load_mem_seg(MBASE + 0xffc, &[0; 8]).is_err());
    assert!(bus.load_mem_seg(0x1000, &[0; 4]).is_err());
    assert_eq!(bus.guest_to_host(MBASE, 4), Some(&[0u8; 4][..]));
    assert_eq!(bus.guest_to_host(MBASE + 0xffe, 4), None);
  }
}
