//! Scheduling policy selector shared by the source's queue-drain rule and the
//! destination's source-selection rule — the two halves have to agree on
//! which one is in effect for a run.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Maximum Age First: destination polls `argmin last_systime_received`;
    /// source clears the whole LCFS after taking the tail.
    Maf,
    /// WiFresh potential-reduction index: destination polls the source with
    /// the largest `p * Δ²`; source leaves LCFS intake cadence to the
    /// scheduler (no forced clear).
    WiFresh,
    /// No destination-side scheduler; sources push at their own rate
    /// (the FCFS-UDP / FCFS-TCP baselines).
    None,
}

impl Policy {
    /// Whether this policy clears the entire LCFS after taking the tail.
    pub fn clears_lcfs_on_drain(self) -> bool {
        matches!(self, Policy::Maf)
    }

    /// Whether the destination drives this policy with POLL frames, as
    /// opposed to sources pushing unsolicited on their own cadence.
    pub fn is_polled(self) -> bool {
        !matches!(self, Policy::None)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Policy::Maf => "maf",
            Policy::WiFresh => "wifresh",
            Policy::None => "none",
        };
        f.write_str(s)
    }
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "maf" => Ok(Policy::Maf),
            "wifresh" => Ok(Policy::WiFresh),
            "none" | "fcfs" => Ok(Policy::None),
            other => Err(format!("unknown policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maf_clears_lcfs_others_dont() {
        assert!(Policy::Maf.clears_lcfs_on_drain());
        assert!(!Policy::WiFresh.clears_lcfs_on_drain());
        assert!(!Policy::None.clears_lcfs_on_drain());
    }

    #[test]
    fn round_trip_display_parse() {
        for p in [Policy::Maf, Policy::WiFresh, Policy::None] {
            assert_eq!(p.to_string().parse::<Policy>().unwrap(), p);
        }
    }

    #[test]
    fn fcfs_alias_for_none() {
        assert_eq!("fcfs".parse::<Policy>().unwrap(), Policy::None);
    }
}
