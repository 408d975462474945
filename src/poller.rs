// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Poll pacing and block cursor.
//!
//! `PollingController` owns the watermark (next block to fetch, inclusive)
//! and the minimum-interval guard. `begin` produces a plan for one cycle;
//! `commit` advances the cursor only after the caller has fully incorporated
//! the fetched range, so a failed cycle re-fetches the same range.

use crate::error::{ClientError, ClientResult};

/// What one call to `update()` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollPlan {
    /// Invoked again before `min_time_between_updates` elapsed; no-op.
    Throttled { remaining_secs: u64 },
    /// The watermark already covers the chain head; no-op.
    UpToDate { next_from_block: u64 },
    /// Fetch `[from_block, to_block]`, split into provider-sized chunks.
    Fetch {
        from_block: u64,
        to_block: u64,
        chunks: Vec<(u64, u64)>,
    },
}

#[derive(Debug, Clone)]
pub struct PollingController {
    /// Next block to fetch (inclusive). Monotonically non-decreasing.
    next_from_block: u64,
    last_update_time: Option<u64>,
    min_time_between_updates: u64,
    /// Upper bound on blocks per `get_logs` query; larger windows are split.
    max_block_range: u64,
}

impl PollingController {
    pub fn new(
        start_block: u64,
        min_time_between_updates: u64,
        max_block_range: u64,
    ) -> ClientResult<Self> {
        if max_block_range == 0 {
            return Err(ClientError::Configuration(
                "max-block-range must be positive".to_string(),
            ));
        }
        Ok(Self {
            next_from_block: start_block,
            last_update_time: None,
            min_time_between_updates,
            max_block_range,
        })
    }

    /// Decide what this cycle should do, given the current time and the
    /// chain head. Does not mutate the cursor.
    pub fn begin(&self, now: u64, latest_block: u64) -> PollPlan {
        if let Some(last) = self.last_update_time {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.min_time_between_updates {
                return PollPlan::Throttled {
                    remaining_secs: self.min_time_between_updates - elapsed,
                };
            }
        }

        let from_block = self.next_from_block;
        if latest_block < from_block {
            return PollPlan::UpToDate {
                next_from_block: from_block,
            };
        }

        let mut chunks = Vec::new();
        let mut chunk_start = from_block;
        while chunk_start <= latest_block {
            let chunk_end = std::cmp::min(
                chunk_start.saturating_add(self.max_block_range - 1),
                latest_block,
            );
            chunks.push((chunk_start, chunk_end));
            chunk_start = chunk_end + 1;
        }

        PollPlan::Fetch {
            from_block,
            to_block: latest_block,
            chunks,
        }
    }

    /// Advance the cursor past a fully incorporated range. Only called after
    /// the cycle succeeded end to end.
    pub fn commit(&mut self, to_block: u64, now: u64) {
        debug_assert!(to_block + 1 >= self.next_from_block);
        self.next_from_block = to_block + 1;
        self.last_update_time = Some(now);
    }

    /// Record a no-op cycle so the interval guard keys off the attempt.
    pub fn touch(&mut self, now: u64) {
        self.last_update_time = Some(now);
    }

    pub fn next_from_block(&self) -> u64 {
        self.next_from_block
    }

    pub fn last_update_time(&self) -> Option<u64> {
        self.last_update_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(start: u64, min_interval: u64, range: u64) -> PollingController {
        PollingController::new(start, min_interval, range).unwrap()
    }

    #[test]
    fn test_zero_block_range_rejected() {
        let err = PollingController::new(0, 0, 0).unwrap_err();
        assert_eq!(err.error_type(), "configuration");
    }

    #[test]
    fn test_first_cycle_fetches_from_start_block() {
        let poller = controller(100, 60, 1000);
        match poller.begin(1_000_000, 150) {
            PollPlan::Fetch {
                from_block,
                to_block,
                chunks,
            } => {
                assert_eq!(from_block, 100);
                assert_eq!(to_block, 150);
                assert_eq!(chunks, vec![(100, 150)]);
            }
            other => panic!("expected Fetch, got {:?}", other),
        }
    }

    #[test]
    fn test_up_to_date_when_head_below_watermark() {
        let mut poller = controller(100, 0, 1000);
        poller.commit(150, 1000);
        assert_eq!(poller.next_from_block(), 151);
        match poller.begin(2000, 150) {
            PollPlan::UpToDate { next_from_block } => assert_eq!(next_from_block, 151),
            other => panic!("expected UpToDate, got {:?}", other),
        }
    }

    #[test]
    fn test_throttled_before_min_interval() {
        let mut poller = controller(0, 60, 1000);
        poller.commit(10, 1000);
        match poller.begin(1030, 500) {
            PollPlan::Throttled { remaining_secs } => assert_eq!(remaining_secs, 30),
            other => panic!("expected Throttled, got {:?}", other),
        }
        // At exactly the interval boundary the poll proceeds.
        assert!(matches!(poller.begin(1060, 500), PollPlan::Fetch { .. }));
    }

    #[test]
    fn test_chunking_splits_large_windows() {
        let poller = controller(0, 0, 100);
        match poller.begin(0, 250) {
            PollPlan::Fetch { chunks, .. } => {
                assert_eq!(chunks, vec![(0, 99), (100, 199), (200, 250)]);
            }
            other => panic!("expected Fetch, got {:?}", other),
        }
    }

    #[test]
    fn test_watermark_is_monotonic() {
        let mut poller = controller(0, 0, 1000);
        let mut highest_to_block = 0;
        for (now, head) in [(10u64, 50u64), (20, 80), (30, 80), (40, 200)] {
            match poller.begin(now, head) {
                PollPlan::Fetch { to_block, .. } => {
                    highest_to_block = highest_to_block.max(to_block);
                    poller.commit(to_block, now);
                }
                PollPlan::UpToDate { .. } => {}
                other => panic!("unexpected plan {:?}", other),
            }
            assert_eq!(poller.next_from_block(), highest_to_block + 1);
        }
        assert_eq!(poller.next_from_block(), 201);
    }

    #[test]
    fn test_failed_cycle_leaves_cursor_for_retry() {
        let mut poller = controller(0, 0, 1000);
        // Simulate a fetch that fails: begin produced a plan but commit is
        // never called; the same range is planned again.
        let first = poller.begin(10, 50);
        let second = poller.begin(20, 50);
        assert_eq!(first, second);
        poller.touch(20);
        assert_eq!(poller.next_from_block(), 0);
        assert_eq!(poller.last_update_time(), Some(20));
    }
}
