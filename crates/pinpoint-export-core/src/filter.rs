use std::collections::HashSet;

use crate::config::parse_event_list;
use crate::event::RawEvent;

/// Drops events whose name is in the configured ignore set.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    ignored: HashSet<String>,
}

impl EventFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated list such as `"heartbeat, $pageleave"`.
    pub fn from_list(raw: &str) -> Self {
        Self::new(parse_event_list(raw))
    }

    /// Exact, case-sensitive name match.
    pub fn should_ignore(&self, event: &RawEvent) -> bool {
        self.ignored.contains(&event.event)
    }

    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty()
    }
}
