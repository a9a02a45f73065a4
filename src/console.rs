use std::io::{BufRead, Write};

use tracing::warn;

use crate::{config::PAddr, drive::Driver, dut::Dut, error::SimError, ref_module::RefModel};

const HELP: &[(&str, &str)] = &[
  ("help", "Display information about all supported commands"),
  ("c", "Continue the execution of the program"),
  ("q", "Exit the simulation"),
  ("si", "Execute [N] instructions in a single step and then pause"),
  ("info", "Print program status, `info r` for registers, `info w` for watchpoints"),
  ("x", "Print [N] consecutive 4-byte words of guest memory starting at [EXPR]"),
  ("p", "Evaluate the given [EXPR] and print it in hexadecimal and decimal"),
  ("w", "Set a watchpoint at [EXPR], and pause the program when it changes"),
  ("d", "Delete watchpoint with serial number [N]"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Help(Option<String>),
  Continue,
  Quit,
  Step(u64),
  InfoRegs,
  InfoWatch,
  Examine(usize, String),
  Print(String),
  Watch(String),
  Delete(usize),
}

/// A console line that could not be turned into a command.
#[derive(Debug)]
pub enum ParseError {
  Unknown(String),
  Usage(&'static str),
  Bad(SimError),
}

fn count<T: std::str::FromStr>(arg: &str) -> Result<T, ParseError> {
  arg.parse().map_err(|_| ParseError::Bad(SimError::BadCount(arg.to_string())))
}

impl Command {
  /// `Ok(None)` for an empty line.
  pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    let (cmd, args) = match line.split_once(char::is_whitespace) {
      Some((cmd, args)) => (cmd, args.trim()),
      None => (line, ""),
    };
    let args = (!args.is_empty()).then_some(args);

    let command = match (cmd, args) {
      ("", _) => return Ok(None),
      ("help", arg) => Command::Help(arg.map(str::to_string)),
      ("c", _) => Command::Continue,
      ("q", _) => Command::Quit,
      ("si", None) => Command::Step(1),
      ("si", Some(n)) => Command::Step(count(n)?),
      ("info", Some("r")) => Command::InfoRegs,
      ("info", Some("w")) => Command::InfoWatch,
      ("info", _) => return Err(ParseError::Usage("info [r | w]")),
      ("x", Some(args)) => match args.split_once(char::is_whitespace) {
        Some((n, expr)) => Command::Examine(count(n)?, expr.trim().to_string()),
        None => return Err(ParseError::Usage("x [N] [EXPR]")),
      },
      ("x", None) => return Err(ParseError::Usage("x [N] [EXPR]")),
      ("p", Some(expr)) => Command::Print(expr.to_string()),
      ("w", Some(expr)) => Command::Watch(expr.to_string()),
      ("p" | "w", None) => return Err(ParseError::Usage("No expression provided")),
      ("d", Some(n)) => Command::Delete(count(n)?),
      ("d", None) => return Err(ParseError::Usage("d [N]")),
      (other, _) => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
  }
}

/// Line console driving one session. Returns when the operator quits or the
/// input runs out.
pub fn mainloop<D: Dut, R: RefModel>(
  driver: &mut Driver<D, R>,
  input: impl BufRead,
  mut out: impl Write,
) -> anyhow::Result<()> {
  write!(out, "(diffemu) ")?;
  out.flush()?;
  for line in input.lines() {
    let line = line?;
    match Command::parse(&line) {
      Ok(Some(command)) => {
        if !execute(driver, command, &mut out)? {
          return Ok(());
        }
      }
      Ok(None) => {}
      Err(ParseError::Unknown(cmd)) => writeln!(out, "Unknown command '{cmd}'")?,
      Err(ParseError::Usage(usage)) => writeln!(out, "Usage: {usage}")?,
      Err(ParseError::Bad(err)) => {
        warn!("{err}");
        writeln!(out, "{err}")?;
      }
    }
    write!(out, "(diffemu) ")?;
    out.flush()?;
  }
  Ok(())
}

/// Non-interactive mode: run until the guest stops.
pub fn batch<D: Dut, R: RefModel>(driver: &mut Driver<D, R>) {
  // a rejected run has already been reported
  let _ = driver.run(None);
}

/// `Ok(false)` ends the console.
fn execute<D: Dut, R: RefModel>(
  driver: &mut Driver<D, R>,
  command: Command,
  out: &mut impl Write,
) -> anyhow::Result<bool> {
  match command {
    Command::Help(None) => {
      for (name, description) in HELP {
        writeln!(out, "{name} - {description}")?;
      }
    }
    Command::Help(Some(name)) => match HELP.iter().find(|(n, _)| *n == name) {
      Some((name, description)) => writeln!(out, "{name} - {description}")?,
      None => writeln!(out, "Unknown command '{name}'")?,
    },
    Command::Continue => {
      let _ = driver.run(None);
    }
    Command::Step(n) => {
      let _ = driver.run(Some(n));
    }
    Command::Quit => {
      driver.quit();
      return Ok(false);
    }
    Command::InfoRegs => {
      driver.dut_state().display("dut");
    }
    Command::InfoWatch => writeln!(out, "{}", driver.watchpoints().display())?,
    Command::Examine(n, expr) => match driver.evaluate(&expr) {
      Some(addr) => {
        for (addr, word) in driver.examine(addr as PAddr, n) {
          match word {
            Some(word) => writeln!(out, "{addr:#x}: {word:#x} ({word})")?,
            None => writeln!(out, "{addr:#x}: out of guest memory")?,
          }
        }
      }
      None => writeln!(out, "Invalid expression: {expr}")?,
    },
    Command::Print(expr) => match driver.evaluate(&expr) {
      Some(value) => writeln!(out, "Result: {value:#x} ({value})")?,
      None => writeln!(out, "Invalid expression: {expr}")?,
    },
    Command::Watch(expr) => match driver.watch(&expr) {
      Ok(Some(_)) => {}
      Ok(None) => writeln!(out, "Expression evaluation error")?,
      Err(err) => writeln!(out, "{err}")?,
    },
    Command::Delete(no) => {
      if !driver.unwatch(no) {
        writeln!(out, "No watchpoint number {no}")?;
      }
    }
  }
  Ok(true)
}
