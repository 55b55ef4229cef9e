//! Event sources feeding the reconstruction loop.

use std::collections::VecDeque;

use crate::{EnvError, EventRecord};

/// Anything that can hand out events one at a time.
pub trait EventSource {
    /// Returns the next event, or `None` when the source is exhausted.
    fn next_event(&mut self) -> Result<Option<EventRecord>, EnvError>;
}

/// Source over events already held in memory (tests, simulation).
#[derive(Debug, Default)]
pub struct MemoryEventSource {
    events: VecDeque<EventRecord>,
}

impl MemoryEventSource {
    pub fn new(events: impl IntoIterator<Item = EventRecord>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl EventSource for MemoryEventSource {
    fn next_event(&mut self) -> Result<Option<EventRecord>, EnvError> {
        Ok(self.events.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_order() {
        let mut source = MemoryEventSource::new([EventRecord::new(1), EventRecord::new(2)]);
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.next_event().unwrap().map(|e| e.number), Some(1));
        assert_eq!(source.next_event().unwrap().map(|e| e.number), Some(2));
        assert!(source.next_event().unwrap().is_none());
    }
}
