pub mod azure;
pub mod config;
pub mod expander;

/// Version injected at compile time via TAZURE_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("TAZURE_VERSION") {
    Some(v) => v,
    None => "dev",
};
