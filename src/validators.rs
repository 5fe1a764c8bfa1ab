//! Input validation for policy documents and connection queries
//!
//! Everything a user can type into a policy document or on the command line
//! passes through here before it reaches the evaluation engine, which assumes
//! a well-formed model.

/// Maximum length of an endpoint, group, rule or policy name.
pub const MAX_NAME_LEN: usize = 128;

/// Sanitizes a display name for safe use in reports.
///
/// Removes control characters and trims surrounding whitespace.
/// Limits length to [`MAX_NAME_LEN`] characters.
///
/// # Examples
///
/// ```
/// use dfw_analyzer::validators::sanitize_name;
///
/// assert_eq!(sanitize_name("  web-01 "), "web-01");
/// assert!(!sanitize_name("db\n01").contains('\n'));
/// ```
pub fn sanitize_name(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect()
}

/// Validates an endpoint or group name.
///
/// `ANY` is reserved for "all endpoints" in rule source/destination/scope
/// lists and cannot name an endpoint. Commas are rejected because names are
/// comma-separated on the command line.
///
/// # Errors
///
/// Returns `Err` if the name is empty, too long, reserved, or contains
/// control characters or commas.
pub fn validate_endpoint_name(name: &str) -> Result<String, String> {
    if name.trim().is_empty() {
        return Err("Name cannot be empty".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name too long (max {MAX_NAME_LEN} characters)"));
    }
    if name.eq_ignore_ascii_case("any") {
        return Err("ANY is reserved for all endpoints".to_string());
    }
    if name.chars().any(|c| c.is_control() || c == ',') {
        return Err("Name contains invalid characters".to_string());
    }
    Ok(name.trim().to_string())
}

/// Validates a rule id. Ids define priority inside a category, so they must
/// be non-negative.
///
/// # Errors
///
/// Returns `Err` if the id is negative.
pub fn validate_rule_id(id: i64) -> Result<i64, String> {
    if id < 0 {
        Err("Rule id must be zero or positive".to_string())
    } else {
        Ok(id)
    }
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

/// Validates an ICMP type and optional code.
///
/// # Errors
///
/// Returns `Err` if type or code exceed 255.
pub fn validate_icmp(icmp_type: u32, code: Option<u32>) -> Result<(u8, Option<u8>), String> {
    let t = u8::try_from(icmp_type).map_err(|_| "ICMP type must be between 0 and 255".to_string())?;
    let c = code
        .map(u8::try_from)
        .transpose()
        .map_err(|_| "ICMP code must be between 0 and 255".to_string())?;
    Ok((t, c))
}

/// Checks if an external block lies in a range that is normally internal and
/// returns an informational warning.
///
/// This is informational only and does not block loading.
pub fn check_reserved_ip(ip: ipnetwork::IpNetwork) -> Option<String> {
    use std::net::IpAddr;

    match ip.ip() {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();

            if octets[0] == 127 {
                return Some("Loopback range (127.x) used as an external block".to_string());
            }

            if octets[0] == 169 && octets[1] == 254 {
                return Some("Link-local range (169.254.x.x) used as an external block".to_string());
            }

            None
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() {
                return Some("IPv6 loopback (::1) used as an external block".to_string());
            }

            if ipv6.segments()[0] & 0xffc0 == 0xfe80 {
                return Some("IPv6 link-local (fe80::/10) used as an external block".to_string());
            }

            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name_normal() {
        assert_eq!(sanitize_name("web-01"), "web-01");
        assert_eq!(sanitize_name("New VM 2"), "New VM 2");
    }

    #[test]
    fn test_sanitize_name_removes_control_chars() {
        assert_eq!(sanitize_name("db\n01"), "db01");
        assert_eq!(sanitize_name("db\t01"), "db01");
        assert_eq!(sanitize_name("db\u{7f}01"), "db01");
    }

    #[test]
    fn test_sanitize_name_length_limit() {
        let long = "a".repeat(300);
        assert_eq!(sanitize_name(&long).chars().count(), MAX_NAME_LEN);
    }

    #[test]
    fn test_validate_endpoint_name() {
        assert_eq!(validate_endpoint_name(" A ").unwrap(), "A");
        assert!(validate_endpoint_name("").is_err());
        assert!(validate_endpoint_name("   ").is_err());
        assert!(validate_endpoint_name("ANY").is_err());
        assert!(validate_endpoint_name("any").is_err());
        assert!(validate_endpoint_name("a,b").is_err());
        assert!(validate_endpoint_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_rule_id() {
        assert_eq!(validate_rule_id(1004).unwrap(), 1004);
        assert_eq!(validate_rule_id(0).unwrap(), 0);
        assert!(validate_rule_id(-1).is_err());
    }

    #[test]
    fn test_validate_port_zero() {
        assert!(validate_port(0).is_err());
    }

    #[test]
    fn test_validate_port_valid() {
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(445).unwrap(), 445);
        assert_eq!(validate_port(65535).unwrap(), 65535);
    }

    #[test]
    fn test_validate_port_range() {
        assert_eq!(validate_port_range(53, 60).unwrap(), (53, 60));
        assert!(validate_port_range(60, 53).is_err());
        assert!(validate_port_range(0, 10).is_err());
    }

    #[test]
    fn test_validate_icmp() {
        assert_eq!(validate_icmp(8, Some(0)).unwrap(), (8, Some(0)));
        assert_eq!(validate_icmp(3, None).unwrap(), (3, None));
        assert!(validate_icmp(256, None).is_err());
        assert!(validate_icmp(8, Some(300)).is_err());
    }

    #[test]
    fn test_check_reserved_ip() {
        assert!(check_reserved_ip("127.0.0.0/8".parse().unwrap()).is_some());
        assert!(check_reserved_ip("169.254.0.0/16".parse().unwrap()).is_some());
        assert!(check_reserved_ip("::1/128".parse().unwrap()).is_some());
        assert!(check_reserved_ip("203.0.113.0/24".parse().unwrap()).is_none());
    }
}
