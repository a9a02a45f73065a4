use std::env;

fn main() {
  if env::var_os("CARGO_FEATURE_VERILATOR").is_some() {
    // libdut.a wraps the Verilated core behind the `dut_*` C functions
    let dir = env::var("DUT_LIB_DIR").expect("DUT_LIB_DIR should be set");
    println!("cargo::rustc-link-search=native={dir}");
    println!("cargo::rustc-link-lib=static=dut");

    if let Ok(verilator_dir) = env::var("VERILATOR_LIB_DIR") {
      println!("cargo::rustc-link-search=native={verilator_dir}");
    }
    println!("cargo::rustc-link-lib=static=verilated");
    println!("cargo::rustc-link-lib=z");
    println!("cargo::rustc-link-lib=stdc++");

    println!("cargo::rerun-if-env-changed=DUT_LIB_DIR");
    println!("cargo::rerun-if-env-changed=VERILATOR_LIB_DIR");
  }
}
