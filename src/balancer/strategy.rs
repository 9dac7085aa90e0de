//! Load Balancing Strategies

use std::fmt;
use std::str::FromStr;

/// Selection strategy applied over the healthy candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Monotonic index mod candidate count; ignores load
    RoundRobin,
    /// Node with the fewest current connections
    LeastConnections,
    /// Node minimizing the weighted load score
    LeastLoad,
    /// Probabilistic draw weighted by 1/max_connections
    WeightedRoundRobin,
    /// Deterministic hash of the client IP; stable for a fixed fleet
    IpHash,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Strategy::RoundRobin),
            "least_connections" => Ok(Strategy::LeastConnections),
            "least_load" => Ok(Strategy::LeastLoad),
            "weighted_round_robin" => Ok(Strategy::WeightedRoundRobin),
            "ip_hash" => Ok(Strategy::IpHash),
            other => Err(format!("unknown balancing strategy: {}", other)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::LeastLoad => "least_load",
            Strategy::WeightedRoundRobin => "weighted_round_robin",
            Strategy::IpHash => "ip_hash",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for name in [
            "round_robin",
            "least_connections",
            "least_load",
            "weighted_round_robin",
            "ip_hash",
        ] {
            let strategy: Strategy = name.parse().unwrap();
            assert_eq!(strategy.to_string(), name);
        }

        assert!("fastest".parse::<Strategy>().is_err());
    }
}
