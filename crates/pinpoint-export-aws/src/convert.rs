//! Conversion of batch requests into `aws-sdk-pinpoint` input types.
//!
//! The SDK builders accept any combination of fields, so the shape the
//! `PutEvents` API requires is checked here before anything is built.

use aws_sdk_pinpoint::types::{
    ChannelType, EndpointDemographic, EndpointLocation, EndpointUser, Event, EventsBatch,
    EventsRequest, PublicEndpoint,
};

use pinpoint_export_core::batch::{BatchRequest, EventsBatch as Batch};
use pinpoint_export_core::error::DispatchError;
use pinpoint_export_core::transform::{
    Demographic, DestinationEndpoint, DestinationEvent, Location,
};

pub fn to_events_request(request: &BatchRequest) -> Result<EventsRequest, DispatchError> {
    validate(request)?;
    let mut builder = EventsRequest::builder();
    for (key, batch) in &request.batch_item {
        builder = builder.batch_item(key, to_events_batch(batch));
    }
    Ok(builder.build())
}

/// Reject requests the API would refuse: no entries, an entry without
/// events, or an event without a type.
fn validate(request: &BatchRequest) -> Result<(), DispatchError> {
    if request.is_empty() {
        return Err(DispatchError::Payload("request has no batch items".to_string()));
    }
    for (key, batch) in &request.batch_item {
        if batch.events.is_empty() {
            return Err(DispatchError::Payload(format!(
                "batch item {key} has no events"
            )));
        }
        if let Some(id) = batch
            .events
            .iter()
            .find_map(|(id, event)| event.event_type.trim().is_empty().then_some(id))
        {
            return Err(DispatchError::Payload(format!(
                "event {id} in batch item {key} has an empty event type"
            )));
        }
    }
    Ok(())
}

/// Entries without an address still need an endpoint record; an empty one
/// is sent.
fn to_events_batch(batch: &Batch) -> EventsBatch {
    let endpoint = batch
        .endpoint
        .as_ref()
        .map(to_public_endpoint)
        .unwrap_or_else(|| PublicEndpoint::builder().build());
    let mut builder = EventsBatch::builder().endpoint(endpoint);
    for (id, event) in &batch.events {
        builder = builder.events(id, to_event(event));
    }
    builder.build()
}

fn to_event(event: &DestinationEvent) -> Event {
    let mut builder = Event::builder()
        .app_package_name(&event.app_package_name)
        .app_title(&event.app_title)
        .app_version_code(&event.app_version_code)
        .client_sdk_version(&event.client_sdk_version)
        .event_type(&event.event_type)
        .sdk_name(&event.sdk_name)
        .timestamp(&event.timestamp);
    for (name, value) in &event.attributes {
        builder = builder.attributes(name, value);
    }
    builder.build()
}

fn to_public_endpoint(endpoint: &DestinationEndpoint) -> PublicEndpoint {
    let mut builder = PublicEndpoint::builder()
        .address(&endpoint.address)
        .channel_type(ChannelType::from(endpoint.channel_type.as_str()))
        .demographic(to_demographic(&endpoint.demographic))
        .effective_date(&endpoint.effective_date)
        .endpoint_status(&endpoint.endpoint_status)
        .location(to_location(&endpoint.location))
        .opt_out(&endpoint.opt_out);
    for (name, values) in &endpoint.attributes {
        builder = builder.attributes(name, values.clone());
    }

    let mut user = EndpointUser::builder().user_id(&endpoint.user.user_id);
    for (name, values) in &endpoint.user.user_attributes {
        user = user.user_attributes(name, values.clone());
    }
    builder.user(user.build()).build()
}

fn to_demographic(demographic: &Demographic) -> EndpointDemographic {
    EndpointDemographic::builder()
        .set_app_version(demographic.app_version.clone())
        .set_locale(demographic.locale.clone())
        .set_make(demographic.make.clone())
        .set_model(demographic.model.clone())
        .set_model_version(demographic.model_version.clone())
        .set_platform(demographic.platform.clone())
        .set_platform_version(demographic.platform_version.clone())
        .set_timezone(demographic.timezone.clone())
        .build()
}

fn to_location(location: &Location) -> EndpointLocation {
    EndpointLocation::builder()
        .set_city(location.city.clone())
        .set_country(location.country.clone())
        .set_latitude(location.latitude)
        .set_longitude(location.longitude)
        .set_postal_code(location.postal_code.clone())
        .set_region(location.region.clone())
        .build()
}

#[cfg(test)]
mod tests {
    use pinpoint_export_core::batch::build_batch_request;
    use pinpoint_export_core::event::RawEvent;

    use super::*;

    #[test]
    fn converts_endpoint_profile_and_events() {
        let request = build_batch_request(&[RawEvent::new("order/paid", "u1")
            .with_set("email", "a@example.com")
            .with_set("plan", "pro")
            .with_property("$os", "iOS")
            .with_property("$os_version", "17.2")
            .with_property("$device_manufacturer", "Apple")
            .with_property("$geoip_city_name", "Lisbon")
            .with_property("$geoip_latitude", 38.72)
            .with_property("$screen_width", 390)
            .with_property("button", "buy")]);
        let converted = to_events_request(&request).unwrap();

        let items = converted.batch_item().unwrap();
        assert_eq!(items.len(), 1);
        let batch = &items["a@example.com"];

        let endpoint = batch.endpoint().unwrap();
        assert_eq!(endpoint.address(), Some("a@example.com"));
        assert_eq!(endpoint.channel_type(), Some(&ChannelType::Email));
        assert_eq!(endpoint.endpoint_status(), Some("ACTIVE"));
        assert_eq!(endpoint.opt_out(), Some("NONE"));
        assert_eq!(
            endpoint.attributes().unwrap()["screen_width"],
            vec!["390".to_string()]
        );

        let demographic = endpoint.demographic().unwrap();
        assert_eq!(demographic.make(), Some("Apple"));
        assert_eq!(demographic.platform(), Some("iOS"));
        assert_eq!(demographic.platform_version(), Some("17.2"));
        assert_eq!(demographic.locale(), None);

        let location = endpoint.location().unwrap();
        assert_eq!(location.city(), Some("Lisbon"));
        assert_eq!(location.latitude(), Some(38.72));
        assert_eq!(location.country(), None);

        let user = endpoint.user().unwrap();
        assert_eq!(user.user_id(), Some("u1"));
        assert_eq!(user.user_attributes().unwrap()["plan"], vec!["pro".to_string()]);

        let events = batch.events().unwrap();
        assert_eq!(events.len(), 1);
        let event = events.values().next().unwrap();
        assert_eq!(event.event_type(), Some("order|paid"));
        assert_eq!(event.attributes().unwrap()["button"], "buy");
        assert!(!event.attributes().unwrap().contains_key("$os"));
    }

    #[test]
    fn address_less_entry_gets_an_empty_endpoint() {
        let request = build_batch_request(&[RawEvent::new("view", "u2")]);
        let converted = to_events_request(&request).unwrap();
        let batch = converted.batch_item().unwrap().values().next().unwrap();
        let endpoint = batch.endpoint().unwrap();
        assert_eq!(endpoint.address(), None);
        assert_eq!(endpoint.channel_type(), None);
        assert_eq!(batch.events().unwrap().len(), 1);
    }

    #[test]
    fn empty_request_is_a_payload_error() {
        let err = to_events_request(&BatchRequest::default()).unwrap_err();
        assert!(matches!(err, DispatchError::Payload(_)));
    }

    #[test]
    fn empty_event_type_is_a_payload_error() {
        let request = build_batch_request(&[RawEvent::new("click", "u1"), RawEvent::new("  ", "u1")]);
        let err = to_events_request(&request).unwrap_err();
        match err {
            DispatchError::Payload(message) => assert!(message.contains("empty event type")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn entry_without_events_is_a_payload_error() {
        let mut request = build_batch_request(&[RawEvent::new("click", "u1")]);
        request.batch_item.insert("orphan".to_string(), Batch::default());
        let err = to_events_request(&request).unwrap_err();
        assert!(matches!(err, DispatchError::Payload(m) if m.contains("orphan")));
    }
}
