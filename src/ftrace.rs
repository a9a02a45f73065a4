use std::{fs, path::Path};

use anyhow::Context;
use elf::{abi::STT_FUNC, endian::LittleEndian, ElfStream};
use tracing::{debug, trace};

use crate::config::VAddr;

#[derive(Debug)]
pub struct FunctionSym {
  pub(crate) name: String,
  pub(crate) addr: VAddr,
  pub(crate) size: u64,
}

/// Function symbols of the guest program plus the current call depth.
#[derive(Debug, Default)]
pub struct FuncTracer {
  symbols: Vec<FunctionSym>,
  depth: usize,
}

impl FuncTracer {
  pub fn load_elf(path: &Path) -> anyhow::Result<Self> {
    let file = fs::File::open(path).with_context(|| format!("reading ELF file {}", path.display()))?;
    let mut elf: ElfStream<LittleEndian, _> =
      ElfStream::open_stream(file).with_context(|| "parsing ELF file")?;

    let mut symbols = Vec::new();
    let symbol_table =
      elf.symbol_table().with_context(|| "reading symbol table(SHT_SYMTAB) from ELF")?;
    if let Some((parsed_table, string_table)) = symbol_table {
      for sym in parsed_table.iter().filter(|sym| sym.st_symtype() == STT_FUNC) {
        let name = string_table
          .get(sym.st_name as usize)
          .with_context(|| format!("fail to get name at st_name={}", sym.st_name))?;
        symbols.push(FunctionSym { name: name.to_string(), addr: sym.st_value as VAddr, size: sym.st_size });
      }
    } else {
      debug!("load_elf: symtab not found");
    }

    debug!("load_elf: {} function symbols from {}", symbols.len(), path.display());
    Ok(Self::from_symbols(symbols))
  }

  pub fn from_symbols(symbols: Vec<FunctionSym>) -> Self {
    Self { symbols, depth: 0 }
  }

  /// Name of the function whose body contains `addr`.
  pub fn lookup(&self, addr: VAddr) -> &str {
    self
      .symbols
      .iter()
      .find(|sym| {
        let start = sym.addr as u64;
        let addr = addr as u64;
        addr == start || (start..start + sym.size).contains(&addr)
      })
      .map_or("???", |sym| sym.name.as_str())
  }

  pub fn depth(&self) -> usize {
    self.depth
  }

  pub fn call(&mut self, pc: VAddr, target: VAddr) {
    trace!(
      target: "ftrace",
      "{pc:#010x}: {:indent$}call [{}@{target:#010x}]",
      "",
      self.lookup(target),
      indent = self.depth * 2
    );
    self.depth += 1;
  }

  pub fn ret(&mut self, pc: VAddr) {
    self.depth = self.depth.saturating_sub(1);
    trace!(target: "ftrace", "{pc:#010x}: {:indent$}ret  [{}]", "", self.lookup(pc), indent = self.depth * 2);
  }
}
