use std::{fs::File, path::PathBuf, sync::Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

pub mod bus;
pub mod config;
pub mod console;
pub mod difftest;
pub mod dpi;
pub mod drive;
pub mod dut;
pub mod error;
pub mod ftrace;
pub mod itrace;
pub mod ref_module;
pub mod sim_state;
pub mod state;
pub mod watchpoint;

pub use config::SimConfig;
pub use drive::Driver;
pub use error::SimError;
pub use sim_state::RunState;

/// Lockstep differential tester for an RV32E core.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct SimArgs {
  /// Run with batch mode
  #[arg(short = 'b', long)]
  pub batch: bool,

  /// Output log to FILE
  #[arg(short = 'l', long = "log", value_name = "FILE")]
  pub log_file: Option<PathBuf>,

  /// ELF file of the guest program, for function tracing
  #[arg(short = 'e', long = "elf", value_name = "FILE")]
  pub elf_file: Option<PathBuf>,

  /// Reference model shared library
  #[arg(short = 'd', long = "diff", value_name = "REF_SO")]
  pub diff_so: PathBuf,

  /// Port handed to the reference model
  #[arg(long, default_value_t = config::DIFFTEST_PORT)]
  pub port: i32,

  #[arg(long, default_value = "info")]
  pub log_level: String,

  /// Raw guest image loaded at the reset vector
  pub image: Option<PathBuf>,
}

impl SimArgs {
  pub fn setup_logger(&self) -> anyhow::Result<()> {
    let log_level: Level = self.log_level.parse()?;
    let builder = FmtSubscriber::builder()
      .with_env_filter(
        EnvFilter::builder()
          .with_default_directive(LevelFilter::from_level(log_level).into())
          .from_env_lossy(),
      )
      .without_time()
      .with_target(false)
      .compact();

    match &self.log_file {
      Some(path) => {
        let file = File::create(path)
          .with_context(|| format!("creating log file {}", path.display()))?;
        let global_logger = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
        tracing::subscriber::set_global_default(global_logger)
          .with_context(|| "fail to setup log subscriber")?;
      }
      None => {
        let global_logger = builder.with_ansi(true).finish();
        tracing::subscriber::set_global_default(global_logger)
          .with_context(|| "fail to setup log subscriber")?;
      }
    }
    Ok(())
  }
}
