//! Streaming Record Source
//!
//! Fed once per decoded scalar by the wire reader. Without scores every
//! scalar is a record. With scores, scalars alternate record/score and the
//! pair is dispatched when the score arrives. At most one record is buffered,
//! and dispatch finishes before the next scalar is accepted.

use crate::filter::FilterSet;
use crate::{Result, TallyError};
use log::warn;

/// Receives each scalar value decoded from a reply, in wire order
pub trait ScalarVisitor {
    fn visit_scalar(&mut self, value: &[u8]) -> Result<()>;
}

/// Reducer state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairState {
    AwaitingValue,
    /// Holds the record waiting for its score
    AwaitingScore(Vec<u8>),
}

/// Counters for one streamed reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Scalars received from the wire
    pub scalars: u64,
    /// (record, score) units handed to the filter set
    pub records: u64,
    /// Scores that did not parse and were read as 0
    pub bad_scores: u64,
}

/// Pairs scalars into records and drives the filter set
#[derive(Debug)]
pub struct RecordStream<'a> {
    filters: &'a mut FilterSet,
    with_scores: bool,
    state: PairState,
    stats: StreamStats,
}

impl<'a> RecordStream<'a> {
    pub fn new(filters: &'a mut FilterSet, with_scores: bool) -> Self {
        Self {
            filters,
            with_scores,
            state: PairState::AwaitingValue,
            stats: StreamStats::default(),
        }
    }

    pub fn state(&self) -> &PairState {
        &self.state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Finish the stream. A record still waiting for its score is dropped
    /// with a warning.
    pub fn finish(self) -> StreamStats {
        if let PairState::AwaitingScore(pending) = &self.state {
            warn!(
                "reply ended with a record missing its score ({} bytes); record dropped",
                pending.len()
            );
        }
        self.stats
    }

    fn dispatch(&mut self, raw: &[u8], score: Option<i64>) -> Result<()> {
        self.stats.records += 1;
        self.filters.process(raw, score)
    }
}

impl ScalarVisitor for RecordStream<'_> {
    fn visit_scalar(&mut self, value: &[u8]) -> Result<()> {
        self.stats.scalars += 1;

        if !self.with_scores {
            return self.dispatch(value, None);
        }

        match std::mem::replace(&mut self.state, PairState::AwaitingValue) {
            PairState::AwaitingValue => {
                let mut pending = Vec::new();
                pending
                    .try_reserve_exact(value.len())
                    .map_err(|_| TallyError::OutOfMemory("pending record"))?;
                pending.extend_from_slice(value);
                self.state = PairState::AwaitingScore(pending);
                Ok(())
            }
            PairState::AwaitingScore(pending) => {
                let score = match parse_score(value) {
                    Some(score) => score,
                    None => {
                        self.stats.bad_scores += 1;
                        warn!("unparsable score '{}'; using 0", String::from_utf8_lossy(value));
                        0
                    }
                };
                self.dispatch(&pending, Some(score))
            }
        }
    }
}

/// Parse a score as an integer, or as a float truncated toward zero
pub fn parse_score(raw: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if let Ok(n) = text.parse::<i64>() {
        return Some(n);
    }
    let f = text.parse::<f64>().ok()?;
    if f.is_finite() {
        Some(f.trunc() as i64)
    } else if f.is_infinite() {
        Some(if f > 0.0 { i64::MAX } else { i64::MIN })
    } else {
        None
    }
}
