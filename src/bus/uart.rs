use std::io::{self, Read, Write};

use tracing::error;

use super::ShadowDevice;

/// Serial port: a byte written to offset 0 goes to the host output, a read of
/// offset 0 takes one byte from the host input (0xff once it is exhausted).
pub struct Uart {
  input: Box<dyn Read + Send>,
  output: Box<dyn Write + Send>,
}

impl Uart {
  pub fn new(input: Box<dyn Read + Send>, output: Box<dyn Write + Send>) -> Self {
    Self { input, output }
  }

  pub fn stdio() -> Self {
    Self::new(Box::new(io::stdin()), Box::new(io::stdout()))
  }

  fn getc(&mut self) -> u8 {
    let mut byte = [0u8; 1];
    match self.input.read(&mut byte) {
      Ok(1) => byte[0],
      Ok(_) => 0xff,
      Err(e) => {
        error!("serial input: {e}");
        0xff
      }
    }
  }
}

impl ShadowDevice for Uart {
  fn read_mem(&mut self, addr: usize, size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    if addr == 0 {
      data[0] = self.getc();
    }
    data
  }

  fn write_mem_chunk(&mut self, addr: usize, _size: usize, strobe: Option<&[bool]>, data: &[u8]) {
    let lane0 = strobe.map_or(true, |masks| masks[0]);
    if addr == 0 && lane0 {
      if let Err(e) = self.output.write_all(&data[..1]).and_then(|_| self.output.flush()) {
        error!("serial output: {e}");
      }
    }
  }
}
