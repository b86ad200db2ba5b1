//! Hostname to VIP service name resolution.
//!
//! The tailnet serves single-label names only, so everything is derived
//! from the leftmost label of the requested host.

/// Prefix of every VIP service name.
pub const SERVICE_NAME_PREFIX: &str = "svc:";

/// Leftmost DNS label of `host`.
pub fn first_label(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    match host.split_once('.') {
        Some((label, _)) => label,
        None => host,
    }
}

/// Canonical VIP service name for `host`, e.g. `my-svc.foo.ts.net` -> `svc:my-svc`.
pub fn service_name(host: &str) -> String {
    format!("{}{}", SERVICE_NAME_PREFIX, first_label(host))
}

/// Served FQDN for `host` under the tailnet's MagicDNS `suffix`.
pub fn fqdn(host: &str, suffix: &str) -> String {
    format!("{}.{}", first_label(host), suffix.trim_matches('.'))
}

/// FQDN part of a serve config `Web` key (`<fqdn>:<port>`).
pub fn fqdn_from_host_port(host_port: &str) -> Option<&str> {
    host_port
        .rsplit_once(':')
        .map(|(host, _)| host)
        .filter(|host| !host.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_label_gets_suffix() {
        assert_eq!(service_name("my-svc"), "svc:my-svc");
        assert_eq!(fqdn("my-svc", "ts.net"), "my-svc.ts.net");
    }

    #[test]
    fn test_qualified_host_is_kept_under_suffix() {
        assert_eq!(fqdn("my-svc.tailnet-xyz.ts.net", "tailnet-xyz.ts.net"), "my-svc.tailnet-xyz.ts.net");
        assert_eq!(service_name("my-svc.tailnet-xyz.ts.net"), "svc:my-svc");
    }

    #[test]
    fn test_foreign_suffix_is_replaced() {
        assert_eq!(fqdn("my-other-svc.tailnetxyz.ts.net", "ts.net"), "my-other-svc.ts.net");
        assert_eq!(fqdn("my-svc.", ".ts.net."), "my-svc.ts.net");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let hosts = ["app", "app.example.com", "app.ts.net"];
        let names: Vec<String> = hosts.iter().map(|h| service_name(h)).collect();
        assert!(names.iter().all(|n| n == "svc:app"));
    }

    #[test]
    fn test_fqdn_from_host_port() {
        assert_eq!(fqdn_from_host_port("my-svc.ts.net:443"), Some("my-svc.ts.net"));
        assert_eq!(fqdn_from_host_port(":443"), None);
        assert_eq!(fqdn_from_host_port("no-port"), None);
    }
}
