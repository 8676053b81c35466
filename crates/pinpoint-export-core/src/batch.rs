//! Grouping of transformed events into one `PutEvents` request.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::event::RawEvent;
use crate::transform::{resolve_endpoint, transform_event, DestinationEndpoint, DestinationEvent};

/// One request entry: the recipient profile plus its events keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventsBatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<DestinationEndpoint>,
    pub events: BTreeMap<String, DestinationEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchRequest {
    pub batch_item: BTreeMap<String, EventsBatch>,
}

impl BatchRequest {
    /// Number of batch entries (distinct batch keys).
    pub fn len(&self) -> usize {
        self.batch_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch_item.is_empty()
    }

    /// Number of distinct events across all entries.
    pub fn event_count(&self) -> usize {
        self.batch_item.values().map(|batch| batch.events.len()).sum()
    }

    /// Merge one transformed event into the entry for `key`.
    ///
    /// Event ids that collide overwrite the earlier event. A new endpoint
    /// replaces the stored one, so the newest event's profile is sent.
    pub fn merge(
        &mut self,
        key: String,
        endpoint: Option<DestinationEndpoint>,
        id: String,
        event: DestinationEvent,
    ) {
        let entry = self.batch_item.entry(key).or_default();
        if endpoint.is_some() {
            entry.endpoint = endpoint;
        }
        entry.events.insert(id, event);
    }
}

/// Grouping key for an event: its endpoint address, or a fresh id so that
/// events without an address never share an entry.
pub fn batch_key(endpoint: Option<&DestinationEndpoint>) -> String {
    match endpoint {
        Some(endpoint) => endpoint.address.clone(),
        None => Uuid::new_v4().to_string(),
    }
}

/// Transform every buffered event and group them, in arrival order.
pub fn build_batch_request(events: &[RawEvent]) -> BatchRequest {
    let mut request = BatchRequest::default();
    for raw in events {
        let (id, event) = transform_event(raw);
        let endpoint = resolve_endpoint(raw);
        let key = batch_key(endpoint.as_ref());
        request.merge(key, endpoint, id, event);
    }
    request
}
