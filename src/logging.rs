//! Logger initialization, mirroring the teacher's `env_logger::init()` call
//! at the top of `main`, but seeded from an `RECC_LOG`-first variable so it
//! doesn't collide with `RUST_LOG` when recc is invoked from inside another
//! Rust build tool that also reads that variable.

use std::env;

use env_logger::Builder;
use log::LevelFilter;

pub fn init() {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Warn);
    let filter = env::var("RECC_LOG")
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    builder.parse_filters(&filter);
    let _ = builder.try_init();
}
