//! Change sequence numbers.
//!
//! A CSN totally orders changes across replicas: timestamp, change count
//! (tiebreak within one millisecond), replica id, operation number.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Csn {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub change_count: u32,
    pub replica_id: u16,
    pub operation_number: u32,
}

impl fmt::Display for Csn {
    /// `20260801120000.123000Z#000001#001#000000`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = DateTime::<Utc>::from_timestamp_millis(self.timestamp)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        write!(
            f,
            "{}#{:06x}#{:03x}#{:06x}",
            when.format("%Y%m%d%H%M%S%.6fZ"),
            self.change_count,
            self.replica_id,
            self.operation_number
        )
    }
}

/// Issues strictly increasing CSNs for one replica.
#[derive(Debug)]
pub struct CsnFactory {
    replica_id: u16,
    state: Mutex<FactoryState>,
}

#[derive(Debug)]
struct FactoryState {
    last_timestamp: i64,
    change_count: u32,
    operation_number: u32,
}

impl CsnFactory {
    pub fn new(replica_id: u16) -> CsnFactory {
        CsnFactory {
            replica_id,
            state: Mutex::new(FactoryState {
                last_timestamp: 0,
                change_count: 0,
                operation_number: 0,
            }),
        }
    }

    pub fn replica_id(&self) -> u16 {
        self.replica_id
    }

    pub fn next(&self) -> Csn {
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if now > state.last_timestamp {
            state.last_timestamp = now;
            state.change_count = 0;
        } else {
            state.change_count += 1;
        }
        let csn = Csn {
            timestamp: state.last_timestamp,
            change_count: state.change_count,
            replica_id: self.replica_id,
            operation_number: state.operation_number,
        };
        state.operation_number = state.operation_number.wrapping_add(1);
        csn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csns_are_strictly_increasing() {
        let factory = CsnFactory::new(1);
        let mut prev = factory.next();
        for _ in 0..100 {
            let next = factory.next();
            assert!(next > prev, "{} !> {}", next, prev);
            prev = next;
        }
    }

    #[test]
    fn format_shape() {
        let csn = Csn {
            timestamp: 1_754_042_400_123,
            change_count: 1,
            replica_id: 1,
            operation_number: 7,
        };
        let s = csn.to_string();
        let parts: Vec<&str> = s.split('#').collect();
        assert_eq!(parts.len(), 4);
        assert!(parts[0].ends_with('Z'));
        assert_eq!(parts[1], "000001");
        assert_eq!(parts[2], "001");
        assert_eq!(parts[3], "000007");
    }

    #[test]
    fn ordering_is_timestamp_first() {
        let a = Csn {
            timestamp: 1,
            change_count: 99,
            replica_id: 9,
            operation_number: 9,
        };
        let b = Csn {
            timestamp: 2,
            change_count: 0,
            replica_id: 0,
            operation_number: 0,
        };
        assert!(a < b);
    }
}
