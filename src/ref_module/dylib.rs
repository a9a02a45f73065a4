use std::ffi::{c_int, c_void};
use std::path::Path;

use libloading::Library;
use tracing::info;

use super::{Direction, RefModel};
use crate::{
  config::{PAddr, Word},
  error::SimError,
  state::CoreState,
};

type DifftestMemcpy = unsafe extern "C" fn(PAddr, *mut c_void, usize, bool);
type DifftestRegcpy = unsafe extern "C" fn(*mut c_void, bool);
type DifftestExec = unsafe extern "C" fn(u64);
type DifftestRaiseIntr = unsafe extern "C" fn(Word);
type DifftestInit = unsafe extern "C" fn(c_int);

#[derive(Clone, Copy)]
struct DifftestApi {
  memcpy: DifftestMemcpy,
  regcpy: DifftestRegcpy,
  exec: DifftestExec,
  raise_intr: DifftestRaiseIntr,
  init: DifftestInit,
}

impl DifftestApi {
  unsafe fn load(lib: &Library) -> Result<Self, SimError> {
    Ok(Self {
      memcpy: load_symbol(lib, "difftest_memcpy")?,
      regcpy: load_symbol(lib, "difftest_regcpy")?,
      exec: load_symbol(lib, "difftest_exec")?,
      raise_intr: load_symbol(lib, "difftest_raise_intr")?,
      init: load_symbol(lib, "difftest_init")?,
    })
  }
}

unsafe fn load_symbol<T: Copy>(lib: &Library, symbol: &'static str) -> Result<T, SimError> {
  let sym: libloading::Symbol<T> =
    lib.get(symbol.as_bytes()).map_err(|source| SimError::RefSymbol { symbol, source })?;
  Ok(*sym)
}

/// Reference model living in a shared library that exports the difftest ABI.
pub struct DylibRef {
  _lib: Library,
  api: DifftestApi,
}

impl DylibRef {
  pub fn load(path: &Path) -> Result<Self, SimError> {
    let lib = unsafe { Library::new(path) }
      .map_err(|source| SimError::RefLibrary { path: path.to_path_buf(), source })?;
    let api = unsafe { DifftestApi::load(&lib)? };
    info!("The result of every instruction will be compared with {}.", path.display());
    Ok(Self { _lib: lib, api })
  }
}

impl RefModel for DylibRef {
  fn init(&mut self, port: i32) {
    unsafe { (self.api.init)(port) }
  }

  fn memcpy(&mut self, addr: PAddr, buf: &mut [u8], direction: Direction) -> Result<(), SimError> {
    if direction != Direction::ToRef {
      return Err(SimError::UnsupportedDirection);
    }
    unsafe { (self.api.memcpy)(addr, buf.as_mut_ptr().cast(), buf.len(), direction.as_bool()) }
    Ok(())
  }

  fn regcpy(&mut self, state: &mut CoreState, direction: Direction) {
    let state: *mut CoreState = state;
    unsafe { (self.api.regcpy)(state.cast(), direction.as_bool()) }
  }

  fn exec(&mut self, n: u64) {
    unsafe { (self.api.exec)(n) }
  }

  fn raise_intr(&mut self, no: Word) {
    unsafe { (self.api.raise_intr)(no) }
  }
}
