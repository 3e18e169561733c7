//! 12-byte object identifiers.
//!
//! Layout:
//!
//! ```text
//! +-----------+-----------+--------+-----------+
//! | seconds   | machine   | pid    | counter   |
//! | 4 bytes BE| 3 bytes   | 2 bytes| 3 bytes BE|
//! +-----------+-----------+--------+-----------+
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use thiserror::Error;

/// Counter values wrap modulo 2^24.
const COUNTER_MASK: u32 = 0x00FF_FFFF;

static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
static MACHINE_ID: OnceLock<[u8; 3]> = OnceLock::new();

/// Error returned when parsing an object id from a hex string fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object id: {0:?}")]
pub struct ParseObjectIdError(String);

/// A 12-byte object identifier.
///
/// Identifiers generated by one process sort by creation time and then by
/// the per-process counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generates a new identifier for the current second.
    pub fn new() -> Self {
        let seconds = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        let count = counter().fetch_add(1, Ordering::SeqCst) & COUNTER_MASK;
        Self::from_parts(seconds, machine_id(), std::process::id() as u16, count)
    }

    /// Builds an identifier whose only non-zero part is the timestamp.
    ///
    /// Useful as a lower bound when querying by creation time.
    pub fn with_time(time: DateTime<Utc>) -> Self {
        let seconds = time.timestamp().clamp(0, u32::MAX as i64) as u32;
        Self::from_parts(seconds, [0; 3], 0, 0)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Returns the creation time encoded in the first four bytes.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let seconds = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(i64::from(seconds), 0).unwrap_or_default()
    }

    /// Returns the 24-bit counter part.
    pub fn counter(&self) -> u32 {
        u32::from_be_bytes([0, self.0[9], self.0[10], self.0[11]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn from_parts(seconds: u32, machine: [u8; 3], pid: u16, count: u32) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..7].copy_from_slice(&machine);
        bytes[7..9].copy_from_slice(&pid.to_be_bytes());
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }
}

fn counter() -> &'static AtomicU32 {
    COUNTER.get_or_init(|| AtomicU32::new(rand::random::<u32>() & COUNTER_MASK))
}

fn machine_id() -> [u8; 3] {
    *MACHINE_ID.get_or_init(|| {
        let name = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let digest = md5::compute(name.as_bytes());
        [digest.0[0], digest.0[1], digest.0[2]]
    })
}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s).map_err(|_| ParseObjectIdError(s.to_string()))?;
        let bytes: [u8; 12] = decoded
            .try_into()
            .map_err(|_| ParseObjectIdError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id: ObjectId = "4faf83c7dbf89b7b29000001".parse().unwrap();
        assert_eq!(id.to_string(), "4faf83c7dbf89b7b29000001");
        assert_eq!(id.bytes()[0], 0x4f);
        assert_eq!(id.counter(), 1);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("xyz".parse::<ObjectId>().is_err());
        assert!("4faf83c7".parse::<ObjectId>().is_err());
        assert!("4faf83c7dbf89b7b2900000100".parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_generated_ids_are_unique_and_ordered() {
        let ids: Vec<ObjectId> = (0..1000).map(|_| ObjectId::new()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        // Ordering holds unless the 24-bit counter wrapped inside the sample.
        let wrapped = ids.windows(2).any(|w| w[1].counter() < w[0].counter());
        if !wrapped {
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_generated_id_carries_machine_and_time() {
        let before = Utc::now().timestamp();
        let id = ObjectId::new();
        let after = Utc::now().timestamp();

        let ts = id.timestamp().timestamp();
        assert!(ts >= before && ts <= after);
        assert_eq!(&id.bytes()[4..7], &machine_id());
    }

    #[test]
    fn test_with_time() {
        let time = DateTime::from_timestamp(1_337_000_000, 0).unwrap();
        let id = ObjectId::with_time(time);
        assert_eq!(id.timestamp(), time);
        assert_eq!(&id.bytes()[4..], &[0u8; 8]);
    }
}
