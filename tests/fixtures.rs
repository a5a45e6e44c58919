#![allow(dead_code)]
use std::path::PathBuf;

use std::sync::Once;

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

pub fn samples_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("samples")
        .canonicalize()
        .unwrap()
}

pub fn board_sample() -> PathBuf {
    samples_dir().join("CfgDataDef.dsc")
}

pub fn sample_with_offset_regression() -> PathBuf {
    samples_dir().join("offset_regression.dsc")
}

pub fn sample_with_unterminated_template() -> PathBuf {
    samples_dir().join("unterminated_template.dsc")
}

pub fn sample_with_unknown_template() -> PathBuf {
    samples_dir().join("unknown_template.dsc")
}
