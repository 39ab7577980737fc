//! NAT type labels
//!
//! The classic RFC-3489 classification. Detection needs a server with two
//! addresses and CHANGE-REQUEST handling; the label itself travels in the
//! DMTP `NAT` field as plain text.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NatType {
    #[default]
    Unknown,
    UdpBlocked,
    OpenInternet,
    SymmetricFirewall,
    FullCone,
    Restricted,
    PortRestricted,
    Symmetric,
}

impl NatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NatType::Unknown => "Unknown",
            NatType::UdpBlocked => "UDP Blocked",
            NatType::OpenInternet => "Open Internet",
            NatType::SymmetricFirewall => "Symmetric UDP Firewall",
            NatType::FullCone => "Full Cone NAT",
            NatType::Restricted => "Restricted NAT",
            NatType::PortRestricted => "Port Restricted NAT",
            NatType::Symmetric => "Symmetric NAT",
        }
    }

    /// True when a peer behind this NAT needs a relay to be reached
    pub fn needs_relay(&self) -> bool {
        matches!(self, NatType::Symmetric | NatType::UdpBlocked)
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NatType {
    type Err = ();

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label {
            "Unknown" => Ok(NatType::Unknown),
            "UDP Blocked" => Ok(NatType::UdpBlocked),
            "Open Internet" => Ok(NatType::OpenInternet),
            "Symmetric UDP Firewall" => Ok(NatType::SymmetricFirewall),
            "Full Cone NAT" => Ok(NatType::FullCone),
            "Restricted NAT" => Ok(NatType::Restricted),
            "Port Restricted NAT" => Ok(NatType::PortRestricted),
            "Symmetric NAT" => Ok(NatType::Symmetric),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_roundtrip() {
        for nat in [
            NatType::Unknown,
            NatType::UdpBlocked,
            NatType::OpenInternet,
            NatType::SymmetricFirewall,
            NatType::FullCone,
            NatType::Restricted,
            NatType::PortRestricted,
            NatType::Symmetric,
        ] {
            assert_eq!(nat.as_str().parse::<NatType>().unwrap(), nat);
        }
    }

    #[test]
    fn test_relay_policy() {
        assert!(NatType::Symmetric.needs_relay());
        assert!(!NatType::FullCone.needs_relay());
    }
}
