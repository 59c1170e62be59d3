use std::collections::VecDeque;
use time::OffsetDateTime;

/// One fall edge as the operator sees it in the alert list.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub at: OffsetDateTime,
    pub confidence: f32,
    pub reasons: Vec<String>,
}

impl AlertRecord {
    pub fn now(confidence: f32, reasons: Vec<String>) -> Self {
        Self {
            at: OffsetDateTime::now_utc(),
            confidence,
            reasons,
        }
    }
}

/// Bounded alert list, oldest first. Pushing past capacity evicts the
/// oldest record; the survivors keep their order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertHistory {
    records: VecDeque<AlertRecord>,
    capacity: usize,
}

impl AlertHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `record`, returning the evicted one when full.
    pub fn push(&mut self, record: AlertRecord) -> Option<AlertRecord> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&AlertRecord> {
        self.records.back()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &AlertRecord> + ExactSizeIterator {
        self.records.iter()
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::with_capacity(crate::config::DEFAULT_ALERT_HISTORY_CAPACITY)
    }
}
