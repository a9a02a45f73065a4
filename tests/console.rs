mod common;

use std::io::Cursor;

use common::*;
use diffemu::{config::BUILTIN_IMAGE, console, RunState};

fn drive(s: &mut Session, script: &str) -> String {
  let mut out = Vec::new();
  console::mainloop(&mut s.driver, Cursor::new(script.to_string()), &mut out).unwrap();
  String::from_utf8(out).unwrap()
}

#[test]
fn step_watch_and_quit() {
  let mut s = session(&BUILTIN_IMAGE);
  let out = drive(&mut s, "si 2\ninfo w\nw x1\np $ra\nc\nsi x\nq\nc\n");

  assert!(out.contains("No watchpoint"), "{out}");
  assert!(out.contains("Result: 0x16 (22)"), "{out}");
  assert!(out.contains("invalid instruction count `x`"), "{out}");
  // the watchpoint paused `c` right after x1 changed, then `q` ended the console
  assert_eq!(s.driver.dut_state().gpr[1], 33);
  assert_eq!(s.driver.state(), RunState::Quit);
  assert!(s.driver.is_exit_status_bad());
}

#[test]
fn malformed_commands_leave_the_session_alone() {
  let mut s = session(&BUILTIN_IMAGE);
  let out = drive(&mut s, "si -3\nfrobnicate\ninfo\nd\n");

  assert!(out.contains("Unknown command 'frobnicate'"), "{out}");
  assert!(out.contains("Usage: info [r | w]"), "{out}");
  assert_eq!(s.driver.state(), RunState::Stopped);
  assert_eq!(s.driver.guest_inst(), 0);
}

#[test]
fn continue_runs_to_the_good_trap() {
  let mut s = session(&BUILTIN_IMAGE);
  drive(&mut s, "c\nq\n");
  assert_eq!(s.driver.state(), RunState::Quit);
  assert!(!s.driver.is_exit_status_bad());
}

#[test]
fn batch_mode_runs_to_completion() {
  let mut s = session(&BUILTIN_IMAGE);
  console::batch(&mut s.driver);
  assert_eq!(s.driver.state(), RunState::Ended);
  assert!(!s.driver.is_exit_status_bad());
}
