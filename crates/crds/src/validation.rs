//! Validation helpers shared by the fabric CRDs
//!
//! Validation is pure: every check takes the objects it needs by reference and
//! returns a `ValidationError` describing the first inconsistency found.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Desired state that is internally inconsistent
///
/// These are not retried by reconcilers; the object has to change first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name {name:?} is longer than {max} characters")]
    NameTooLong { name: String, max: usize },

    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),

    #[error("invalid IPv4 address {0:?}")]
    InvalidIp(String),

    #[error("subnet {subnet} overlaps {other}")]
    Overlap { subnet: String, other: String },

    #[error("subnet {subnet} is not contained in any subnet of IPv4 namespace {namespace}")]
    OutsideNamespace { subnet: String, namespace: String },

    #[error("subnet {subnet} intersects reserved subnet {reserved}")]
    Reserved { subnet: String, reserved: String },

    #[error("VLAN {vlan} is not in VLAN namespace {namespace}")]
    VlanOutsideNamespace { vlan: u16, namespace: String },

    #[error("VLAN {vlan} is used more than once ({first} and {second})")]
    DuplicateVlan { vlan: u16, first: String, second: String },

    #[error("unknown {kind} {name:?}")]
    UnknownReference { kind: &'static str, name: String },

    #[error("{0}")]
    Invalid(String),
}

/// Maximum length of a VPC name (it is embedded in VRF and interface names)
pub const VPC_NAME_MAX_LEN: usize = 11;

/// Maximum length of an IPv4Namespace name
pub const IPV4_NAMESPACE_NAME_MAX_LEN: usize = 11;

/// Parse an IPv4 CIDR, keeping the host bits as written
pub fn parse_cidr(cidr: &str) -> Result<Ipv4Net, ValidationError> {
    cidr.parse::<Ipv4Net>()
        .map_err(|_| ValidationError::InvalidCidr(cidr.to_string()))
}

/// Parse a dotted-quad IPv4 address
pub fn parse_ip(ip: &str) -> Result<Ipv4Addr, ValidationError> {
    ip.parse::<Ipv4Addr>()
        .map_err(|_| ValidationError::InvalidIp(ip.to_string()))
}

/// Parse an address that may be written either bare or with a prefix length
pub fn parse_ip_or_cidr(ip: &str) -> Result<Ipv4Addr, ValidationError> {
    match ip.split_once('/') {
        Some(_) => parse_cidr(ip).map(|net| net.addr()),
        None => parse_ip(ip),
    }
}

/// Check the length limit on a name
pub fn check_name_len(name: &str, max: usize) -> Result<(), ValidationError> {
    if name.len() > max {
        return Err(ValidationError::NameTooLong {
            name: name.to_string(),
            max,
        });
    }
    Ok(())
}

/// True if the two networks share at least one address
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// True if `outer` contains every address of `inner`
pub fn contains_net(outer: &Ipv4Net, inner: &Ipv4Net) -> bool {
    outer.prefix_len() <= inner.prefix_len() && outer.contains(&inner.network())
}

/// Reject `subnet` if it intersects any of `reserved`
pub fn check_reserved(subnet: &Ipv4Net, reserved: &[Ipv4Net]) -> Result<(), ValidationError> {
    for r in reserved {
        if overlaps(subnet, r) {
            return Err(ValidationError::Reserved {
                subnet: subnet.to_string(),
                reserved: r.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlaps() {
        let a = parse_cidr("10.0.0.0/16").unwrap();
        let b = parse_cidr("10.0.5.0/24").unwrap();
        let c = parse_cidr("10.1.0.0/24").unwrap();

        assert!(overlaps(&a, &b));
        assert!(overlaps(&b, &a));
        assert!(!overlaps(&a, &c));
    }

    #[test]
    fn test_contains_net() {
        let outer = parse_cidr("10.0.0.0/16").unwrap();
        let inner = parse_cidr("10.0.5.0/24").unwrap();

        assert!(contains_net(&outer, &inner));
        assert!(!contains_net(&inner, &outer));
    }

    #[test]
    fn test_check_name_len() {
        assert!(check_name_len("vpc-1", VPC_NAME_MAX_LEN).is_ok());
        assert_eq!(
            check_name_len("a-very-long-vpc", VPC_NAME_MAX_LEN),
            Err(ValidationError::NameTooLong {
                name: "a-very-long-vpc".to_string(),
                max: 11
            })
        );
    }

    #[test]
    fn test_parse_ip_or_cidr() {
        assert_eq!(
            parse_ip_or_cidr("10.0.0.1/24").unwrap(),
            Ipv4Addr::new(10, 0, 0, 1)
        );
        assert_eq!(parse_ip_or_cidr("10.0.0.1").unwrap(), Ipv4Addr::new(10, 0, 0, 1));
        assert!(parse_ip_or_cidr("nope").is_err());
    }

    #[test]
    fn test_check_reserved() {
        let reserved = vec![parse_cidr("172.30.0.0/16").unwrap()];
        assert!(check_reserved(&parse_cidr("10.0.0.0/24").unwrap(), &reserved).is_ok());
        assert!(matches!(
            check_reserved(&parse_cidr("172.30.1.0/24").unwrap(), &reserved),
            Err(ValidationError::Reserved { .. })
        ));
    }
}
