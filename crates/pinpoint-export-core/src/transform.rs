//! Raw event to destination event / endpoint mapping.
//!
//! Both functions are pure apart from id generation for events that arrive
//! without one and the wall-clock fallback for events without any timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::coerce::{coerce_to_list, coerce_to_string};
use crate::event::{PropertyValue, RawEvent};

/// Properties whose name starts with this marker are system properties and
/// never become user-defined attributes.
pub const RESERVED_PREFIX: char = '$';

/// Event name that links a push device token to the user.
pub const DEVICE_LINK_EVENT: &str = "device-link";
pub const DEVICE_TOKEN_PROPERTY: &str = "$device_token";

/// Destination limit on custom attributes per event. Not enforced, only
/// logged.
pub const MAX_RECOMMENDED_ATTRIBUTES: usize = 40;

const EVENT_TYPE_FORBIDDEN: [char; 4] = ['#', ':', '?', '/'];

const ENDPOINT_ATTRIBUTES: [(&str, &str); 4] = [
    ("$screen_height", "screen_height"),
    ("$screen_width", "screen_width"),
    ("$viewport_height", "viewport_height"),
    ("$viewport_width", "viewport_width"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DestinationEvent {
    pub app_package_name: String,
    pub app_title: String,
    pub app_version_code: String,
    pub attributes: BTreeMap<String, String>,
    pub client_sdk_version: String,
    pub event_type: String,
    pub sdk_name: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelType {
    Email,
    Gcm,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "EMAIL",
            ChannelType::Gcm => "GCM",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Demographic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointUser {
    pub user_attributes: BTreeMap<String, Vec<String>>,
    pub user_id: String,
}

/// The recipient profile attached to a batch entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DestinationEndpoint {
    pub address: String,
    pub attributes: BTreeMap<String, Vec<String>>,
    pub channel_type: ChannelType,
    pub demographic: Demographic,
    pub effective_date: String,
    pub endpoint_status: String,
    pub location: Location,
    pub opt_out: String,
    pub user: EndpointUser,
}

/// Map a raw event to its destination shape, keyed by event id.
pub fn transform_event(event: &RawEvent) -> (String, DestinationEvent) {
    let id = event.uuid.unwrap_or_else(Uuid::new_v4).to_string();

    let attributes: BTreeMap<String, String> = event
        .properties
        .iter()
        .filter(|(key, _)| !key.starts_with(RESERVED_PREFIX))
        .map(|(key, value)| (key.clone(), coerce_to_string(value)))
        .collect();
    if attributes.len() > MAX_RECOMMENDED_ATTRIBUTES {
        warn!(
            event = %event.event,
            count = attributes.len(),
            max = MAX_RECOMMENDED_ATTRIBUTES,
            "Event carries more attributes than the destination accepts"
        );
    }

    let destination = DestinationEvent {
        app_package_name: string_property(event, "$app_namespace"),
        app_title: string_property(event, "$app_name"),
        app_version_code: string_property(event, "$app_version"),
        attributes,
        client_sdk_version: string_property(event, "$lib_version"),
        event_type: sanitize_event_type(&event.event),
        sdk_name: string_property(event, "$lib"),
        timestamp: format_timestamp(event_timestamp(event)),
    };
    (id, destination)
}

/// Build the endpoint profile for an event, if a contact address resolves.
pub fn resolve_endpoint(event: &RawEvent) -> Option<DestinationEndpoint> {
    let user_properties = user_properties(event);

    let (channel_type, address) = if event.event == DEVICE_LINK_EVENT {
        (
            ChannelType::Gcm,
            event.property(DEVICE_TOKEN_PROPERTY).and_then(non_empty)?,
        )
    } else {
        (
            ChannelType::Email,
            user_properties.get("email").and_then(|value| non_empty(value))?,
        )
    };

    let attributes = ENDPOINT_ATTRIBUTES
        .iter()
        .filter_map(|(property, name)| {
            present(event, property).map(|value| (name.to_string(), coerce_to_list(value)))
        })
        .collect();

    let demographic = Demographic {
        app_version: first_of(event, &["$app_version"]),
        locale: first_of(event, &["$locale"]),
        make: first_of(event, &["$device_manufacturer", "$device_type"]),
        model: first_of(event, &["$device_model", "$os"]),
        model_version: first_of(event, &["$os_version"]),
        platform: first_of(event, &["$os", "$browser"]),
        platform_version: first_of(event, &["$os_version", "$browser_version"]),
        timezone: first_of(event, &["$geoip_time_zone"]),
    };

    let location = Location {
        city: first_of(event, &["$geoip_city_name"]),
        country: first_of(event, &["$geoip_country_code"]),
        latitude: present(event, "$geoip_latitude").and_then(PropertyValue::as_f64),
        longitude: present(event, "$geoip_longitude").and_then(PropertyValue::as_f64),
        postal_code: first_of(event, &["$geoip_postal_code"]),
        region: first_of(event, &["$geoip_subdivision_1_name"]),
    };

    let user = EndpointUser {
        user_attributes: user_properties
            .iter()
            .map(|(key, value)| (key.to_string(), coerce_to_list(value)))
            .collect(),
        user_id: event.distinct_id.clone(),
    };

    Some(DestinationEndpoint {
        address,
        attributes,
        channel_type,
        demographic,
        effective_date: format_timestamp(event_timestamp(event)),
        endpoint_status: "ACTIVE".to_string(),
        location,
        opt_out: "NONE".to_string(),
        user,
    })
}

/// Replace characters the destination rejects in event type names.
pub fn sanitize_event_type(name: &str) -> String {
    name.chars()
        .map(|c| if EVENT_TYPE_FORBIDDEN.contains(&c) { '|' } else { c })
        .collect()
}

/// Event time, falling back to send time, then to now.
pub fn event_timestamp(event: &RawEvent) -> DateTime<Utc> {
    event.timestamp.or(event.sent_at).unwrap_or_else(Utc::now)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Profile properties, `$set_once` first so `$set` wins on duplicate keys.
fn user_properties(event: &RawEvent) -> BTreeMap<&str, &PropertyValue> {
    let mut merged = BTreeMap::new();
    for source in [event.set_once.as_ref(), event.set.as_ref()]
        .into_iter()
        .flatten()
    {
        for (key, value) in source {
            merged.insert(key.as_str(), value);
        }
    }
    merged
}

fn present<'a>(event: &'a RawEvent, key: &str) -> Option<&'a PropertyValue> {
    event
        .property(key)
        .filter(|value| !matches!(value, PropertyValue::Null))
}

fn first_of(event: &RawEvent, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| present(event, key))
        .map(coerce_to_string)
}

fn string_property(event: &RawEvent, key: &str) -> String {
    present(event, key).map(coerce_to_string).unwrap_or_default()
}

fn non_empty(value: &PropertyValue) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::event::Properties;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn event_type_characters_are_replaced() {
        assert_eq!(sanitize_event_type("a/b#c:d?e"), "a|b|c|d|e");
        assert_eq!(sanitize_event_type("$pageview"), "$pageview");
    }

    #[test]
    fn reserved_properties_are_excluded_from_attributes() {
        let event = RawEvent::new("click", "u1")
            .with_property("$browser", "Firefox")
            .with_property("button", "buy")
            .with_property("count", 42)
            .with_property("flag", true);
        let (_, destination) = transform_event(&event);
        assert_eq!(destination.attributes.len(), 3);
        assert_eq!(destination.attributes["button"], "buy");
        assert_eq!(destination.attributes["count"], "42");
        assert_eq!(destination.attributes["flag"], "true");
        assert!(!destination.attributes.contains_key("$browser"));
    }

    #[test]
    fn app_metadata_defaults_to_empty() {
        let event = RawEvent::new("click", "u1")
            .with_property("$app_name", "Shop")
            .with_property("$lib", "posthog-ios")
            .with_property("$lib_version", "3.1.0");
        let (_, destination) = transform_event(&event);
        assert_eq!(destination.app_title, "Shop");
        assert_eq!(destination.sdk_name, "posthog-ios");
        assert_eq!(destination.client_sdk_version, "3.1.0");
        assert_eq!(destination.app_package_name, "");
        assert_eq!(destination.app_version_code, "");
    }

    #[test]
    fn id_is_kept_or_generated() {
        let mut event = RawEvent::new("click", "u1");
        let id = Uuid::new_v4();
        event.uuid = Some(id);
        assert_eq!(transform_event(&event).0, id.to_string());

        event.uuid = None;
        let (first, _) = transform_event(&event);
        let (second, _) = transform_event(&event);
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn timestamp_falls_back_to_sent_at() {
        let mut event = RawEvent::new("click", "u1");
        event.sent_at = Some(ts(1_700_000_000));
        assert_eq!(transform_event(&event).1.timestamp, "2023-11-14T22:13:20.000Z");

        event.timestamp = Some(ts(1_600_000_000));
        assert_eq!(transform_event(&event).1.timestamp, "2020-09-13T12:26:40.000Z");
    }

    #[test]
    fn no_endpoint_without_an_address() {
        let event = RawEvent::new("click", "u1").with_property("$os", "iOS");
        assert!(resolve_endpoint(&event).is_none());

        let blank = RawEvent::new("click", "u1").with_set("email", "  ");
        assert!(resolve_endpoint(&blank).is_none());
    }

    #[test]
    fn email_endpoint_is_populated() {
        let event = RawEvent::new("click", "u1")
            .with_set("email", "a@example.com")
            .with_set("plan", "pro")
            .with_property("$screen_width", 1920)
            .with_property("$device_type", "Desktop")
            .with_property("$browser", "Chrome")
            .with_property("$browser_version", "120")
            .with_property("$geoip_city_name", "Berlin")
            .with_property(
                "$geoip_latitude",
                PropertyValue::Number(serde_json::Number::from_f64(52.52).unwrap()),
            );
        let endpoint = resolve_endpoint(&event).unwrap();

        assert_eq!(endpoint.channel_type, ChannelType::Email);
        assert_eq!(endpoint.address, "a@example.com");
        assert_eq!(endpoint.endpoint_status, "ACTIVE");
        assert_eq!(endpoint.opt_out, "NONE");
        assert_eq!(endpoint.attributes["screen_width"], vec!["1920".to_string()]);
        assert!(!endpoint.attributes.contains_key("screen_height"));
        assert_eq!(endpoint.demographic.make.as_deref(), Some("Desktop"));
        assert_eq!(endpoint.demographic.model, None);
        assert_eq!(endpoint.demographic.platform.as_deref(), Some("Chrome"));
        assert_eq!(endpoint.demographic.platform_version.as_deref(), Some("120"));
        assert_eq!(endpoint.location.city.as_deref(), Some("Berlin"));
        assert_eq!(endpoint.location.latitude, Some(52.52));
        assert_eq!(endpoint.user.user_id, "u1");
        assert_eq!(endpoint.user.user_attributes["plan"], vec!["pro".to_string()]);
        assert_eq!(
            endpoint.user.user_attributes["email"],
            vec!["a@example.com".to_string()]
        );
    }

    #[test]
    fn os_takes_precedence_over_browser_for_platform() {
        let event = RawEvent::new("click", "u1")
            .with_set("email", "a@example.com")
            .with_property("$os", "Android")
            .with_property("$os_version", "14")
            .with_property("$browser", "Chrome");
        let endpoint = resolve_endpoint(&event).unwrap();
        assert_eq!(endpoint.demographic.platform.as_deref(), Some("Android"));
        assert_eq!(endpoint.demographic.platform_version.as_deref(), Some("14"));
        assert_eq!(endpoint.demographic.model.as_deref(), Some("Android"));
    }

    #[test]
    fn device_link_uses_push_token() {
        let event = RawEvent::new(DEVICE_LINK_EVENT, "u1")
            .with_set("email", "a@example.com")
            .with_property(DEVICE_TOKEN_PROPERTY, "token-abc");
        let endpoint = resolve_endpoint(&event).unwrap();
        assert_eq!(endpoint.channel_type, ChannelType::Gcm);
        assert_eq!(endpoint.address, "token-abc");

        let without_token =
            RawEvent::new(DEVICE_LINK_EVENT, "u1").with_set("email", "a@example.com");
        assert!(resolve_endpoint(&without_token).is_none());
    }

    #[test]
    fn set_wins_over_set_once_on_duplicate_keys() {
        let mut set_once = Properties::new();
        set_once.insert("plan".to_string(), PropertyValue::from("free"));
        set_once.insert("signup".to_string(), PropertyValue::from("2024"));
        let mut event = RawEvent::new("click", "u1")
            .with_set("email", "a@example.com")
            .with_set("plan", "pro");
        event.set_once = Some(set_once);

        let endpoint = resolve_endpoint(&event).unwrap();
        assert_eq!(endpoint.user.user_attributes["plan"], vec!["pro".to_string()]);
        assert_eq!(endpoint.user.user_attributes["signup"], vec!["2024".to_string()]);
    }

    #[test]
    fn endpoint_serializes_with_destination_field_names() {
        let event = RawEvent::new("click", "u1").with_set("email", "a@example.com");
        let json = serde_json::to_value(resolve_endpoint(&event).unwrap()).unwrap();
        assert_eq!(json["ChannelType"], "EMAIL");
        assert_eq!(json["Address"], "a@example.com");
        assert_eq!(json["User"]["UserId"], "u1");
    }
}
