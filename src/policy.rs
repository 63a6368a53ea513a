use crate::error::PolicyError;

// known speed-test services, matched exactly or as a parent domain
const BLOCKED_DOMAINS: &[&str] = &[
    "speedtest.net",
    "fast.com",
    "speed.cloudflare.com",
    "speedcheck.org",
    "speedof.me",
    "testmy.net",
];

pub fn ensure_host_allowed(host: &str) -> Result<(), PolicyError> {
    let host = host.to_ascii_lowercase();
    for domain in BLOCKED_DOMAINS {
        if host == *domain || host.ends_with(&format!(".{domain}")) {
            return Err(PolicyError::BlockedHost(host));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_blocked() {
        assert!(ensure_host_allowed("speedtest.net").is_err());
        assert!(ensure_host_allowed("fast.com").is_err());
    }

    #[test]
    fn subdomains_are_blocked() {
        assert!(ensure_host_allowed("www.speedtest.net").is_err());
        assert!(ensure_host_allowed("a.b.speed.cloudflare.com").is_err());
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(ensure_host_allowed("SpeedTest.NET").is_err());
    }

    #[test]
    fn suffix_lookalikes_pass() {
        assert!(ensure_host_allowed("notspeedtest.net").is_ok());
        assert!(ensure_host_allowed("fast.com.example.org").is_ok());
        assert!(ensure_host_allowed("example.com").is_ok());
    }
}
