//! Shared helpers for the policy command-line tools.

pub mod common;

/// stderr へのロガーを初期化する（既定レベル info、`RUST_LOG` で上書き可）
pub fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
}
