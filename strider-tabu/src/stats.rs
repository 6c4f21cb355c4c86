// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

#[derive(Debug, Clone)]
pub struct Stats {
    /// Total number of ingress lines including failures.
    pub rx_count: usize,
    /// Number of malformed ingress lines.
    pub rx_failure: usize,
    /// Total number of egress lines.
    pub tx_count: usize,
    /// Number of egress lines lost to a closed transport.
    pub tx_failure: usize,
    /// Number of replies retained as orphans.
    pub orphaned: usize,
}

impl Stats {
    /// Create new empty statistics.
    pub fn new() -> Self {
        Self {
            rx_count: 0,
            rx_failure: 0,
            tx_count: 0,
            tx_failure: 0,
            orphaned: 0,
        }
    }

    /// Calculate ingress failure rate in percentage.
    pub fn rx_failure_rate(&self) -> f64 {
        if self.rx_count > 0 {
            (self.rx_failure as f64 / self.rx_count as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Reset statistics.
    pub fn reset(&mut self) {
        *self = Self::new()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
