//! Address-validation tokens (RFC 9000 §8.1) and the 0-RTT session-ticket
//! cache keyed by client address (spec's "Session Ticket / QUIC Token").

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use blitz_core::lru::BoundedLru;

const TOKEN_LIFETIME: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Malformed,
    AddressMismatch,
}

/// Mints and validates a simple HMAC-free token: `addr || issued_at`, bound
/// to a per-process secret XORed in. Validation checks address and TTL.
pub struct TokenValidator {
    secret: [u8; 16],
}

impl TokenValidator {
    pub fn new(secret: [u8; 16]) -> Self {
        Self { secret }
    }

    pub fn mint(&self, addr: SocketAddr, now: SystemTime) -> Vec<u8> {
        let issued_at = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let mut buf = Vec::new();
        buf.extend_from_slice(&issued_at.to_be_bytes());
        let addr_bytes = addr.to_string().into_bytes();
        buf.extend_from_slice(&(addr_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(&addr_bytes);
        for (i, b) in buf.iter_mut().enumerate() {
            *b ^= self.secret[i % self.secret.len()];
        }
        buf
    }

    pub fn validate(&self, token: &[u8], addr: SocketAddr, now: SystemTime) -> Result<(), TokenError> {
        if token.len() < 12 {
            return Err(TokenError::Malformed);
        }
        let mut buf = token.to_vec();
        for (i, b) in buf.iter_mut().enumerate() {
            *b ^= self.secret[i % self.secret.len()];
        }
        let issued_at = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let addr_len = u32::from_be_bytes(buf[8..12].try_into().unwrap()) as usize;
        if buf.len() < 12 + addr_len {
            return Err(TokenError::Malformed);
        }
        let addr_str = std::str::from_utf8(&buf[12..12 + addr_len]).map_err(|_| TokenError::Malformed)?;
        if addr_str != addr.to_string() {
            return Err(TokenError::AddressMismatch);
        }
        let elapsed = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .saturating_sub(issued_at);
        if elapsed > TOKEN_LIFETIME.as_secs() {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SessionTicket {
    pub psk_identity: Vec<u8>,
    pub issued_at: SystemTime,
}

/// Bounded 0-RTT resumption-secret cache, one entry per client address.
pub struct SessionCache {
    tickets: BoundedLru<SocketAddr, SessionTicket>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            tickets: BoundedLru::new(capacity),
        }
    }

    pub fn store(&mut self, addr: SocketAddr, ticket: SessionTicket) {
        self.tickets.insert(addr, ticket);
    }

    pub fn lookup(&mut self, addr: &SocketAddr) -> Option<&SessionTicket> {
        self.tickets.get(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn minted_token_validates_for_same_address() {
        let v = TokenValidator::new([7; 16]);
        let now = SystemTime::now();
        let token = v.mint(addr(4433), now);
        assert!(v.validate(&token, addr(4433), now).is_ok());
    }

    #[test]
    fn token_rejected_for_different_address() {
        let v = TokenValidator::new([7; 16]);
        let now = SystemTime::now();
        let token = v.mint(addr(4433), now);
        assert_eq!(v.validate(&token, addr(4434), now), Err(TokenError::AddressMismatch));
    }

    #[test]
    fn expired_token_is_rejected() {
        let v = TokenValidator::new([7; 16]);
        let issued = SystemTime::now() - Duration::from_secs(120);
        let token = v.mint(addr(4433), issued);
        assert_eq!(
            v.validate(&token, addr(4433), SystemTime::now()),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn session_cache_stores_and_evicts_by_capacity() {
        let mut cache = SessionCache::new(1);
        cache.store(
            addr(1),
            SessionTicket {
                psk_identity: vec![1],
                issued_at: SystemTime::now(),
            },
        );
        cache.store(
            addr(2),
            SessionTicket {
                psk_identity: vec![2],
                issued_at: SystemTime::now(),
            },
        );
        assert!(cache.lookup(&addr(1)).is_none());
        assert!(cache.lookup(&addr(2)).is_some());
    }
}
