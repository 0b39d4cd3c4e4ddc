//! System-wide constants and default names.

/// Token inside a derived-value query that is replaced with the quoted
/// network name of the referenced sibling.
pub const NETWORK_ID_TOKEN: &str = "{NETWORK_ID}";

/// Name of the per-build scratch directory, created under the context directory.
pub const SCRATCH_DIR_NAME: &str = "brewdock_temp";

/// File name of the resolved definition dump written into the context directory.
pub const DUMP_FILE_NAME: &str = "brewdock_config.yaml";

/// Prefix of every network created for a stack.
pub const NETWORK_PREFIX: &str = "brewdock";

/// Label attached to every container created by a stack.
pub const LABEL_STACK_NETWORK: &str = "io.brewdock.network";

/// Default file mode for injected files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Default transport protocol appended to bare port specs.
pub const DEFAULT_PORT_PROTOCOL: &str = "tcp";

/// Normalizes a port spec such as `5432` into `5432/tcp`.
#[must_use]
pub fn normalize_port(spec: &str) -> String {
    let spec = spec.trim();
    if spec.contains('/') {
        spec.to_string()
    } else {
        format!("{spec}/{DEFAULT_PORT_PROTOCOL}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_port_appends_tcp() {
        assert_eq!(normalize_port("5432"), "5432/tcp");
    }

    #[test]
    fn normalize_port_keeps_explicit_protocol() {
        assert_eq!(normalize_port("53/udp"), "53/udp");
    }
}
