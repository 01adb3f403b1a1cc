//! Identity used to address a source throughout the destination.
//!
//! Keying per-source state on a raw `(ip, port, data_type)` tuple is
//! strictly worse once sources carry an assigned id: addresses can change
//! across a reconnect, ids don't. This keys on `(source_id, data_type)`
//! everywhere and keeps the socket address in a side table
//! (`Destination::source_addresses`) purely for the transport layer to know
//! where to send a POLL.

use crate::frame::DataType;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub source_id: u8,
    pub data_type: DataType,
}

impl SourceKey {
    pub fn new(source_id: u8, data_type: DataType) -> Self {
        Self { source_id, data_type }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source_{}_{}", self.source_id, self.data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let key = SourceKey::new(3, DataType::Position);
        assert_eq!(key.to_string(), "source_3_position");
    }

    #[test]
    fn ordering_is_by_id_then_type() {
        let a = SourceKey::new(1, DataType::Image);
        let b = SourceKey::new(2, DataType::General);
        assert!(a < b);
    }
}
