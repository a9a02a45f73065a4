use std::fmt::Write;

use tracing::info;

use crate::{
  config::{Word, NR_WP},
  error::SimError,
  state::CoreState,
};

/// Expression evaluation used by watchpoints and the console.
pub trait ExprEval {
  /// `None` when the expression can not be evaluated.
  fn evaluate(&self, expr: &str, state: &CoreState) -> Option<Word>;
}

/// Evaluates a single register name (`$a0`, `x5`, `pc`, `mepc`) or a decimal or
/// `0x` hexadecimal literal.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisterEval;

impl ExprEval for RegisterEval {
  fn evaluate(&self, expr: &str, state: &CoreState) -> Option<Word> {
    let expr = expr.trim();
    if let Some(hex) = expr.strip_prefix("0x").or_else(|| expr.strip_prefix("0X")) {
      return Word::from_str_radix(hex, 16).ok();
    }
    if expr.starts_with(|c: char| c.is_ascii_digit()) {
      return expr.parse().ok();
    }
    state.reg_str2val(expr)
  }
}

#[derive(Debug, Clone)]
pub struct WatchPoint {
  pub no: usize,
  pub expr: String,
  pub value: Word,
}

/// A watched expression changed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHit {
  pub no: usize,
  pub expr: String,
  pub old: Word,
  pub new: Word,
}

/// Fixed pool of watchpoint slots. Slot index is the watchpoint number.
#[derive(Debug)]
pub struct WatchPool {
  slots: Vec<Option<WatchPoint>>,
  free: Vec<usize>,
  // newest first
  active: Vec<usize>,
}

impl Default for WatchPool {
  fn default() -> Self {
    Self::with_capacity(NR_WP)
  }
}

impl WatchPool {
  pub fn with_capacity(capacity: usize) -> Self {
    Self { slots: vec![None; capacity], free: (0..capacity).rev().collect(), active: Vec::new() }
  }

  pub fn is_empty(&self) -> bool {
    self.active.is_empty()
  }

  pub fn add(&mut self, expr: &str, value: Word) -> Result<usize, SimError> {
    let no = self.free.pop().ok_or(SimError::WatchPoolFull(self.slots.len()))?;
    self.slots[no] = Some(WatchPoint { no, expr: expr.to_string(), value });
    self.active.insert(0, no);
    info!("Watchpoint {no}: {expr}");
    Ok(no)
  }

  pub fn delete(&mut self, no: usize) -> bool {
    let Some(pos) = self.active.iter().position(|n| *n == no) else {
      return false;
    };
    self.active.remove(pos);
    self.slots[no] = None;
    self.free.push(no);
    true
  }

  pub fn iter(&self) -> impl Iterator<Item = &WatchPoint> + '_ {
    self.active.iter().filter_map(|no| self.slots[*no].as_ref())
  }

  /// Re-evaluate every watchpoint and keep the new values.
  pub fn check(&mut self, eval: &dyn ExprEval, state: &CoreState) -> Result<Vec<WatchHit>, SimError> {
    let mut hits = Vec::new();
    for no in &self.active {
      let Some(wp) = self.slots[*no].as_mut() else {
        continue;
      };
      let new = eval
        .evaluate(&wp.expr, state)
        .ok_or_else(|| SimError::WatchEval { no: wp.no, expr: wp.expr.clone() })?;
      if new != wp.value {
        hits.push(WatchHit { no: wp.no, expr: wp.expr.clone(), old: wp.value, new });
        wp.value = new;
      }
    }
    Ok(hits)
  }

  pub fn display(&self) -> String {
    if self.is_empty() {
      return "No watchpoint".to_string();
    }
    let mut out = String::from("Num    Value      Expr");
    for wp in self.iter() {
      let _ = write!(out, "\n{:<6} {:<10} {}", wp.no, wp.value, wp.expr);
    }
    out
  }
}
