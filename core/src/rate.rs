/*
 * rate.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Filedist, an automatic file-distribution system.
 *
 * Filedist is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Filedist is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Filedist.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Per-process throughput limit: a token bucket refilled at `limit` bytes per second, holding
//! at most one second of tokens.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    /// Bytes per second, 0 = unlimited.
    limit: u64,
    tokens: u64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(limit: u64) -> RateLimiter {
        RateLimiter {
            limit,
            tokens: limit,
            last_refill: Instant::now(),
        }
    }

    pub fn limit(&self) -> Option<u64> {
        (self.limit != 0).then_some(self.limit)
    }

    pub fn set_limit(&mut self, limit: u64) {
        if limit > self.limit {
            self.tokens = self.tokens.saturating_add(limit - self.limit);
        }
        self.limit = limit;
        self.tokens = self.tokens.min(limit);
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let add = (self.limit as f64 * elapsed) as u64;
        if add > 0 {
            self.last_refill = now;
            self.tokens = self.tokens.saturating_add(add).min(self.limit);
        }
    }

    /// Wait until `bytes` may pass.
    pub async fn acquire(&mut self, bytes: u64) {
        let mut remaining = bytes;
        while remaining > 0 && self.limit > 0 {
            self.refill();
            let take = remaining.min(self.tokens);
            if take > 0 {
                self.tokens -= take;
                remaining -= take;
                continue;
            }
            let wait_ms = (remaining as f64 / self.limit as f64 * 1000.0) as u64;
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(10, 100))).await;
        }
    }
}
