//! Static server-side request forgery checks.
//!
//! These checks need no DNS: scheme, `localhost` and literal IP addresses.
//! Fetchers that resolve names should additionally run every resolved
//! address through [`is_private_ip`].

use std::net::IpAddr;

use url::{Host, Url};

use crate::error::AppError;

/// Reject URLs that are obviously unsafe to fetch.
///
/// 1. Only `http` and `https` schemes.
/// 2. A host must be present and must not be `localhost`.
/// 3. Literal IPs must not be private, loopback or link-local.
pub fn check_url(url: &str) -> Result<Url, AppError> {
    check_url_with(url, false)
}

/// [`check_url`], skipping the private-address rules when `allow_private`
/// is set. The scheme and host requirements always apply.
pub fn check_url_with(url: &str, allow_private: bool) -> Result<Url, AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::SsrfBlocked(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    match parsed.host() {
        None => return Err(AppError::InvalidUrl(format!("{url}: missing host"))),
        Some(_) if allow_private => {}
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain == "localhost" || domain.ends_with(".localhost") {
                return Err(AppError::SsrfBlocked(format!("{domain} is a local host")));
            }
        }
        Some(Host::Ipv4(v4)) => {
            if is_private_ip(IpAddr::V4(v4)) {
                return Err(AppError::SsrfBlocked(format!("{v4} is a private/reserved IP")));
            }
        }
        Some(Host::Ipv6(v6)) => {
            if is_private_ip(IpAddr::V6(v6)) {
                return Err(AppError::SsrfBlocked(format!("{v6} is a private/reserved IP")));
            }
        }
    }

    Ok(parsed)
}

/// Check if an IP address is in a private/reserved/link-local range.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()           // 127.0.0.0/8
                || v4.is_private()     // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()  // 169.254.0.0/16 (cloud metadata!)
                || v4.is_unspecified() // 0.0.0.0
                || v4.is_broadcast()   // 255.255.255.255
                || v4.is_documentation() // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()       // ::1
                || v6.is_unspecified() // ::
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_ipv4() {
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(is_private_ip("192.168.1.1".parse().unwrap()));
        assert!(is_private_ip("169.254.169.254".parse().unwrap()));
        assert!(is_private_ip("100.64.0.1".parse().unwrap()));
        assert!(!is_private_ip("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn test_private_ipv6() {
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
        assert!(is_private_ip("::ffff:10.0.0.1".parse().unwrap()));
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[test]
    fn rejects_bad_scheme() {
        let err = check_url("file:///etc/passwd").unwrap_err();
        assert!(matches!(err, AppError::SsrfBlocked(_)));
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn rejects_localhost_and_private_literals() {
        for url in [
            "http://localhost/admin",
            "http://LOCALHOST.:8080/",
            "http://app.localhost/",
            "http://127.0.0.1/",
            "http://[::1]/",
            "http://169.254.169.254/latest/meta-data/",
        ] {
            assert!(
                matches!(check_url(url), Err(AppError::SsrfBlocked(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn accepts_public_hosts() {
        assert!(check_url("https://example.com/a?b=1").is_ok());
        assert!(check_url("http://93.184.216.34/").is_ok());
    }

    #[test]
    fn allow_private_keeps_scheme_rule() {
        assert!(check_url_with("http://127.0.0.1:8080/feed", true).is_ok());
        assert!(check_url_with("http://localhost/", true).is_ok());
        assert!(matches!(
            check_url_with("file:///etc/passwd", true),
            Err(AppError::SsrfBlocked(_))
        ));
    }

    #[test]
    fn invalid_url_is_not_ssrf() {
        assert!(matches!(check_url("not a url"), Err(AppError::InvalidUrl(_))));
    }
}
