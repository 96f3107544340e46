//! Kademlia unique identifier, used both as a node id and as a value key.
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of a KUID in bytes.
pub const ID_SIZE: usize = 20;
/// The size of a KUID in bits.
pub const ID_BITS: usize = ID_SIZE * 8;
pub const MAX_DISTANCE: u8 = ID_BITS as u8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
/// 160 bit identifier ordered as a big endian unsigned integer.
///
/// Comparing two XOR results with `<` is how "nearer to a key" is decided.
pub struct Kuid([u8; ID_SIZE]);

impl Kuid {
    pub const MINIMUM: Kuid = Kuid([0; ID_SIZE]);
    pub const MAXIMUM: Kuid = Kuid([0xff; ID_SIZE]);

    pub fn random() -> Kuid {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Kuid(random_bytes)
    }

    pub const fn from_array(bytes: [u8; ID_SIZE]) -> Kuid {
        Kuid(bytes)
    }

    /// Create a new Kuid from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Kuid> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Kuid(tmp))
    }

    /// SHA-1 of `data`, the default key of a value.
    pub fn sha1(data: &[u8]) -> Kuid {
        Kuid(sha1_smol::Sha1::from(data).digest().bytes())
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn xor(&self, other: &Kuid) -> Kuid {
        let mut bytes = [0_u8; ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Kuid(bytes)
    }

    /// Returns `true` if `self` is strictly nearer to `key` than `other`.
    pub fn is_nearer_to(&self, key: &Kuid, other: &Kuid) -> bool {
        self.xor(key) < other.xor(key)
    }

    /// Simplified XOR distance between this Kuid and a target Kuid.
    ///
    /// The distance is the number of bits after the common prefix.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Kuid is 160
    /// Distance to a Kuid with 5 leading matching bits is 155
    pub fn distance(&self, other: &Kuid) -> u8 {
        for i in 0..ID_SIZE {
            let a = self.0[i];
            let b = other.0[i];

            if a != b {
                let leading_zeros = (i as u32 * 8 + (a ^ b).leading_zeros()) as u8;

                return MAX_DISTANCE - leading_zeros;
            }
        }

        0
    }

    /// Flips every bit.
    pub fn invert(&self) -> Kuid {
        let mut bytes = self.0;
        for byte in bytes.iter_mut() {
            *byte = !*byte;
        }

        Kuid(bytes)
    }

    /// Returns the bit at `index`, counting from the most significant bit.
    pub fn is_bit_set(&self, index: usize) -> bool {
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    fn set_bit(&mut self, index: usize, value: bool) {
        let mask = 0x80 >> (index % 8);
        if value {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }
    }

    /// A random Kuid that is exactly at [Self::distance] `distance` from `self`,
    /// i.e. one that falls into the bucket of that distance.
    pub fn random_at_distance(&self, distance: u8) -> Kuid {
        if distance == 0 {
            return *self;
        }

        let distance = distance.min(MAX_DISTANCE);
        let prefix = (MAX_DISTANCE - distance) as usize;

        let mut id = Kuid::random();
        for i in 0..prefix {
            id.set_bit(i, self.is_bit_set(i));
        }
        id.set_bit(prefix, !self.is_bit_set(prefix));

        id
    }
}

impl Display for Kuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl Debug for Kuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Kuid({})", self)
    }
}

impl FromStr for Kuid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Kuid> {
        if s.len() != ID_SIZE * 2 {
            return Err(Error::InvalidKuid(s.to_string()));
        }

        let mut bytes = [0_u8; ID_SIZE];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = s
                .get(i * 2..i * 2 + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| Error::InvalidKuid(s.to_string()))?;
        }

        Ok(Kuid(bytes))
    }
}

impl Serialize for Kuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Kuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Kuid, D::Error> {
        let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;

        Kuid::from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self() {
        let id = Kuid::random();
        let distance = id.distance(&id);
        assert_eq!(distance, 0)
    }

    #[test]
    fn distance_to_inverted() {
        let id = Kuid::random();
        assert_eq!(id.distance(&id.invert()), MAX_DISTANCE)
    }

    #[test]
    fn nearer_to() {
        let key = Kuid::MINIMUM;
        let near: Kuid = "0000000000000000000000000000000000000001".parse().unwrap();
        let far: Kuid = "8000000000000000000000000000000000000000".parse().unwrap();

        assert!(near.is_nearer_to(&key, &far));
        assert!(!far.is_nearer_to(&key, &near));
        assert!(!near.is_nearer_to(&key, &near));
    }

    #[test]
    fn random_at_distance() {
        let id = Kuid::random();

        for distance in [1_u8, 2, 8, 9, 100, 159, 160] {
            let other = id.random_at_distance(distance);
            assert_eq!(id.distance(&other), distance);
        }
    }

    #[test]
    fn hex_round_trip() {
        let id = Kuid::random();
        let parsed: Kuid = id.to_string().parse().unwrap();

        assert_eq!(parsed, id);
        assert!("abc".parse::<Kuid>().is_err());
        assert!(Kuid::from_bytes([0_u8; 19]).is_err());
    }

    #[test]
    fn sha1() {
        let id = Kuid::sha1(b"Hello World!");

        assert_eq!(id.to_string(), "2ef7bde608ce5404e97d5f042f95f89f1c232871");
    }
}
