use clap::Parser;
use diffemu::{bus::ShadowBus, ref_module::DylibRef, SimArgs, SimConfig};

fn main() -> anyhow::Result<()> {
  let args = SimArgs::parse();
  args.setup_logger()?;

  let config = SimConfig::from_args(&args);
  let model = DylibRef::load(&args.diff_so)?;
  let bus = ShadowBus::new(config.mem_size);

  let bad = run(&args, &config, model, bus)?;
  std::process::exit(bad as i32);
}

#[cfg(feature = "verilator")]
fn run(args: &SimArgs, config: &SimConfig, model: DylibRef, bus: ShadowBus) -> anyhow::Result<bool> {
  use std::{io, path::Path};

  use diffemu::{console, dut::VerilatedCore, Driver};

  let dut = VerilatedCore::new(Path::new("sim_record.fst"))?;
  let mut driver = Driver::new(dut, model, bus, config)?;
  if args.batch {
    console::batch(&mut driver);
  } else {
    console::mainloop(&mut driver, io::stdin().lock(), io::stdout())?;
  }
  Ok(driver.is_exit_status_bad())
}

#[cfg(not(feature = "verilator"))]
fn run(_args: &SimArgs, _config: &SimConfig, _model: DylibRef, _bus: ShadowBus) -> anyhow::Result<bool> {
  anyhow::bail!("no DUT model was linked, rebuild with `--features verilator`")
}
