//! Security tokens proving a requester controls its address.

use std::fmt::{self, Debug, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crc::{Crc, CRC_32_ISCSI};
use rand::Rng;
use tracing::trace;

use crate::common::SecurityToken;

const SECRET_SIZE: usize = 20;
const TOKEN_SIZE: usize = 4;
const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Interval after which the secret is rotated, a token stays valid for up to twice as long.
pub const TOKEN_ROTATE_INTERVAL: Duration = Duration::from_secs(60 * 5);

/// Tokens generator.
///
/// A token is a checksum of the requester's IP and a secret that rotates
/// every [TOKEN_ROTATE_INTERVAL]. Tokens from the previous secret stay valid.
#[derive(Clone)]
pub struct Tokens {
    prev_secret: [u8; SECRET_SIZE],
    curr_secret: [u8; SECRET_SIZE],
    last_updated: Instant,
}

impl Debug for Tokens {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Tokens (_)")
    }
}

impl Tokens {
    /// Create a Tokens generator.
    pub fn new(now: Instant) -> Self {
        Tokens {
            prev_secret: random(),
            curr_secret: random(),
            last_updated: now,
        }
    }

    // === Public Methods ===

    /// Returns `true` if the current secret needs to be updated after an interval.
    pub fn should_update(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_updated) > TOKEN_ROTATE_INTERVAL
    }

    /// Validate that the token was generated from the current or previous secret.
    pub fn validate(&self, address: SocketAddr, token: &[u8]) -> bool {
        let prev = generate(address.ip(), &self.prev_secret);
        let curr = generate(address.ip(), &self.curr_secret);

        token == curr || token == prev
    }

    /// Rotate the tokens secret.
    pub fn rotate(&mut self, now: Instant) {
        trace!("Rotating secrets");

        self.prev_secret = self.curr_secret;
        self.curr_secret = random();

        self.last_updated = now;
    }

    /// Generates a new token for a remote peer.
    pub fn generate_token(&self, address: SocketAddr) -> SecurityToken {
        SecurityToken::new(generate(address.ip(), &self.curr_secret).to_vec())
    }
}

fn generate(ip: IpAddr, secret: &[u8; SECRET_SIZE]) -> [u8; TOKEN_SIZE] {
    let mut digest = CASTAGNOLI.digest();

    match ip {
        IpAddr::V4(ip) => digest.update(&ip.octets()),
        IpAddr::V6(ip) => digest.update(&ip.octets()),
    }
    digest.update(secret);

    digest.finalize().to_be_bytes()
}

fn random() -> [u8; SECRET_SIZE] {
    rand::thread_rng().gen()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn valid_tokens() {
        let now = Instant::now();
        let tokens = Tokens::new(now);

        let address: SocketAddr = ([127, 0, 0, 1], 6881).into();
        let token = tokens.generate_token(address);

        assert!(tokens.validate(address, token.as_bytes()));
        // Only the IP matters.
        assert!(tokens.validate(([127, 0, 0, 1], 1).into(), token.as_bytes()));
        assert!(!tokens.validate(([127, 0, 0, 2], 6881).into(), token.as_bytes()));
    }

    #[test]
    fn previous_secret_stays_valid() {
        let now = Instant::now();
        let mut tokens = Tokens::new(now);
        let address: SocketAddr = ([10, 0, 0, 1], 1).into();
        let token = tokens.generate_token(address);

        assert!(!tokens.should_update(now + TOKEN_ROTATE_INTERVAL));
        assert!(tokens.should_update(now + TOKEN_ROTATE_INTERVAL * 2));

        tokens.rotate(now + TOKEN_ROTATE_INTERVAL * 2);
        assert!(tokens.validate(address, token.as_bytes()));

        tokens.rotate(now + TOKEN_ROTATE_INTERVAL * 4);
        assert!(!tokens.validate(address, token.as_bytes()));
    }
}
