use std::{
    io::Write as _,
    path::{Path, PathBuf},
    process::exit,
};

use colored::Colorize as _;
use syjudge_core::style::ColorTheme as _;

pub fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to get current dir: {}", e);
        exit(1);
    })
}

/// `path` joined onto the current dir unless already absolute.
pub fn absolute(path: impl AsRef<Path>) -> PathBuf {
    fsutil::resolve_path(self::current_dir(), path)
}

/// `RUST_LOG` decides the level unless `-v` is given; the default is `warn`.
pub fn init_logger(verbose: u8) {
    let env = env_logger::Env::default().default_filter_or("warn");
    let mut builder = env_logger::Builder::from_env(env);
    let level = match verbose {
        0 => None,
        1 => Some(log::LevelFilter::Info),
        2 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    };
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder
        .format(|buf, record| {
            let level = record.level();
            writeln!(
                buf,
                "[{}] {}",
                level.to_string().color(level.color()).bold(),
                record.args()
            )
        })
        .init();
}
