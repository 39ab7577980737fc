//! Socket address wire codec
//!
//! Addresses travel in the STUN MAPPED-ADDRESS shape:
//! ```text
//! ┌────────────┬────────────┬──────────────┬───────────────────────┐
//! │ reserved=0 │ family (1) │ port (2, BE) │ address (4 or 16)     │
//! └────────────┴────────────┴──────────────┴───────────────────────┘
//! ```
//! IPv4 encodes in 8 bytes, IPv6 in 20. DMTP location fields reuse the
//! same structure.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Address family code for IPv4
pub const FAMILY_IPV4: u8 = 0x01;

/// Address family code for IPv6
pub const FAMILY_IPV6: u8 = 0x02;

/// Encoded length of an IPv4 address structure
pub const IPV4_LEN: usize = 8;

/// Encoded length of an IPv6 address structure
pub const IPV6_LEN: usize = 20;

/// Encode a socket address into its wire structure
pub fn encode(addr: SocketAddr) -> Bytes {
    let mut buf = BytesMut::with_capacity(IPV6_LEN);
    encode_into(&mut buf, addr);
    buf.freeze()
}

/// Encode a socket address into an existing buffer
pub fn encode_into(buf: &mut BytesMut, addr: SocketAddr) {
    buf.put_u8(0);
    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(FAMILY_IPV4);
            buf.put_u16(addr.port());
            buf.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.put_u8(FAMILY_IPV6);
            buf.put_u16(addr.port());
            buf.extend_from_slice(&ip.octets());
        }
    }
}

/// Decode a socket address from its wire structure
pub fn decode(buf: &[u8]) -> Result<SocketAddr> {
    if buf.len() < 4 {
        return Err(Error::BufferTooSmall {
            needed: 4,
            have: buf.len(),
        });
    }
    let family = buf[1];
    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let ip = match family {
        FAMILY_IPV4 => {
            if buf.len() < IPV4_LEN {
                return Err(Error::BufferTooSmall {
                    needed: IPV4_LEN,
                    have: buf.len(),
                });
            }
            let octets: [u8; 4] = buf[4..8].try_into().unwrap();
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_IPV6 => {
            if buf.len() < IPV6_LEN {
                return Err(Error::BufferTooSmall {
                    needed: IPV6_LEN,
                    have: buf.len(),
                });
            }
            let octets: [u8; 16] = buf[4..20].try_into().unwrap();
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => {
            return Err(Error::InvalidAddress(format!(
                "unknown address family: 0x{other:02x}"
            )))
        }
    };
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_roundtrip() {
        let addr: SocketAddr = "192.0.2.1:54321".parse().unwrap();
        let wire = encode(addr);
        assert_eq!(wire.len(), IPV4_LEN);
        assert_eq!(wire[0], 0);
        assert_eq!(wire[1], FAMILY_IPV4);
        assert_eq!(decode(&wire).unwrap(), addr);
    }

    #[test]
    fn test_ipv6_roundtrip() {
        let addr: SocketAddr = "[2001:db8::7]:4444".parse().unwrap();
        let wire = encode(addr);
        assert_eq!(wire.len(), IPV6_LEN);
        assert_eq!(decode(&wire).unwrap(), addr);
    }

    #[test]
    fn test_unknown_family_rejected() {
        let wire = [0u8, 0x03, 0x12, 0x34, 1, 2, 3, 4];
        assert!(decode(&wire).is_err());
    }
}
