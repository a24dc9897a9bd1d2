//! `env:NAME` indirection for credentials and backend settings.

/// Prefix marking a value that must be read from the process environment.
pub const ENV_PREFIX: &str = "env:";

/// Resolve a configured value, reading `env:NAME` values from the environment.
///
/// A missing variable resolves to an empty string.
pub fn resolve_env(value: &str) -> String {
    match value.strip_prefix(ENV_PREFIX) {
        Some(name) => match std::env::var(name.trim()) {
            Ok(resolved) => resolved,
            Err(_) => {
                tracing::warn!(variable = %name, "Environment variable referenced by config is not set");
                String::new()
            }
        },
        None => value.to_string(),
    }
}
