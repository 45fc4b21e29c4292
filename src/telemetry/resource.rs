//! Resource descriptor
//!
//! A [`Resource`] identifies the process producing telemetry. It is built once
//! when the tracer provider is constructed and shared read-only by every span.

use crate::telemetry::attribute::{self, KeyValue, Value};

/// Attribute key for the logical service name
pub const SERVICE_NAME: &str = "service.name";
/// Attribute key for the service version
pub const SERVICE_VERSION: &str = "service.version";
/// Attribute key for the telemetry SDK name
pub const TELEMETRY_SDK_NAME: &str = "telemetry.sdk.name";
/// Attribute key for the telemetry SDK language
pub const TELEMETRY_SDK_LANGUAGE: &str = "telemetry.sdk.language";

/// Immutable set of attributes describing the telemetry source
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    attributes: Vec<KeyValue>,
}

impl Resource {
    /// Create a resource from raw attributes
    ///
    /// Duplicate keys keep the last value.
    pub fn new<I>(attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        let mut deduped: Vec<KeyValue> = Vec::new();
        for kv in attributes {
            match deduped.iter_mut().find(|existing| existing.key == kv.key) {
                Some(existing) => existing.value = kv.value,
                None => deduped.push(kv),
            }
        }
        Self { attributes: deduped }
    }

    /// Create the default resource for a service
    ///
    /// Includes `service.name`, `service.version` and the SDK identification
    /// attributes.
    ///
    /// ```
    /// use traced_services::telemetry::Resource;
    ///
    /// let resource = Resource::for_service("order-service");
    /// assert_eq!(resource.service_name(), Some("order-service"));
    /// ```
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self::new([
            KeyValue::new(SERVICE_NAME, service_name.into()),
            KeyValue::new(SERVICE_VERSION, crate::VERSION),
            KeyValue::new(TELEMETRY_SDK_NAME, env!("CARGO_PKG_NAME")),
            KeyValue::new(TELEMETRY_SDK_LANGUAGE, "rust"),
        ])
    }

    /// Look up an attribute value
    pub fn get(&self, key: &str) -> Option<&Value> {
        attribute::find(&self.attributes, key)
    }

    /// The `service.name` attribute, if set
    pub fn service_name(&self) -> Option<&str> {
        self.get(SERVICE_NAME).and_then(Value::as_str)
    }

    /// Iterate over all attributes
    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.attributes.iter()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::for_service("unknown_service")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_service_sets_identity() {
        let resource = Resource::for_service("notification-service");

        assert_eq!(resource.service_name(), Some("notification-service"));
        assert_eq!(
            resource.get(TELEMETRY_SDK_LANGUAGE).and_then(Value::as_str),
            Some("rust")
        );
        assert_eq!(
            resource.get(SERVICE_VERSION).and_then(Value::as_str),
            Some(crate::VERSION)
        );
    }

    #[test]
    fn test_duplicate_keys_keep_last_value() {
        let resource = Resource::new([
            KeyValue::new(SERVICE_NAME, "first"),
            KeyValue::new("deployment.environment", "dev"),
            KeyValue::new(SERVICE_NAME, "second"),
        ]);

        assert_eq!(resource.len(), 2);
        assert_eq!(resource.service_name(), Some("second"));
    }

    #[test]
    fn test_default_resource() {
        assert_eq!(Resource::default().service_name(), Some("unknown_service"));
    }
}
