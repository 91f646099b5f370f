pub const BACANNO_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BACANNO_BUILD_N: &str = env!("BACANNO_BUILD_N");

pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nBuild ",
    env!("BACANNO_BUILD_N"),
    "\nBacterial genome annotation pipeline orchestrator"
);

pub fn version_line() -> String {
    format!("bacanno {BACANNO_VERSION} (build {BACANNO_BUILD_N})")
}
