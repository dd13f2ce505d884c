//! Service identity attached to every exported batch.
//!
//! [`Resource::builder`] starts from what the environment provides:
//!
//! * `OTEL_RESOURCE_ATTRIBUTES`: `key1=value1,key2=value2,...`
//! * `OTEL_SERVICE_NAME`: overrides any `service.name` from the attributes
//!
//! and falls back to `unknown_service` when no service name is configured.
use std::env;
use std::sync::Arc;

use crate::metrics::{AttributeSet, KeyValue};

/// Attribute key carrying the logical name of the service.
pub const SERVICE_NAME: &str = "service.name";

const OTEL_RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
const UNKNOWN_SERVICE: &str = "unknown_service";

/// An immutable set of service-level attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    inner: Arc<AttributeSet>,
}

impl Default for Resource {
    fn default() -> Self {
        Resource::builder().build()
    }
}

impl Resource {
    /// Start from the attributes detected in the environment.
    pub fn builder() -> ResourceBuilder {
        ResourceBuilder {
            attributes: detect_from_env(),
        }
    }

    /// Start from an empty set of attributes.
    pub fn builder_empty() -> ResourceBuilder {
        ResourceBuilder {
            attributes: Vec::new(),
        }
    }

    /// Look up an attribute value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key)
    }

    /// The configured service name, if any.
    pub fn service_name(&self) -> Option<&str> {
        self.get(SERVICE_NAME)
    }

    /// Iterate over the attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the resource holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Builder for [Resource]. Attributes added later replace earlier ones with
/// the same key.
#[derive(Debug)]
pub struct ResourceBuilder {
    attributes: Vec<KeyValue>,
}

impl ResourceBuilder {
    /// Set `service.name`.
    pub fn with_service_name(self, name: impl Into<String>) -> Self {
        self.with_attribute(KeyValue::new(SERVICE_NAME, name))
    }

    /// Add a single attribute.
    pub fn with_attribute(mut self, kv: KeyValue) -> Self {
        self.attributes.push(kv);
        self
    }

    /// Add several attributes.
    pub fn with_attributes<T: IntoIterator<Item = KeyValue>>(mut self, kvs: T) -> Self {
        self.attributes.extend(kvs);
        self
    }

    /// Create a [Resource] with the configured attributes.
    pub fn build(self) -> Resource {
        Resource {
            inner: Arc::new(AttributeSet::from_iter(self.attributes)),
        }
    }
}

fn detect_from_env() -> Vec<KeyValue> {
    let mut attributes = match env::var(OTEL_RESOURCE_ATTRIBUTES) {
        Ok(s) if !s.is_empty() => parse_resource_attributes(&s),
        Ok(_) | Err(_) => Vec::new(),
    };

    let service_name = env::var(OTEL_SERVICE_NAME)
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            attributes
                .iter()
                .rev()
                .find(|kv| kv.key == SERVICE_NAME)
                .map(|kv| kv.value.clone())
        })
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_owned());
    attributes.push(KeyValue::new(SERVICE_NAME, service_name));
    attributes
}

/// Extract key value pairs from a string like `key1=value1,key2=value2,...`.
fn parse_resource_attributes(s: &str) -> Vec<KeyValue> {
    s.split_terminator(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some(KeyValue::new(key, value.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_from_env() {
        temp_env::with_vars(
            [
                (
                    OTEL_RESOURCE_ATTRIBUTES,
                    Some("key=value, k = v , a= x, a=z,base64=SGVsbG8sIFdvcmxkIQ=="),
                ),
                (OTEL_SERVICE_NAME, None),
                ("IRRELEVANT", Some("20200810")),
            ],
            || {
                let resource = Resource::builder().build();
                assert_eq!(resource.get("key"), Some("value"));
                assert_eq!(resource.get("k"), Some("v"));
                assert_eq!(resource.get("a"), Some("z"));
                assert_eq!(resource.get("base64"), Some("SGVsbG8sIFdvcmxkIQ=="));
                assert_eq!(resource.service_name(), Some(UNKNOWN_SERVICE));
            },
        );
    }

    #[test]
    fn service_name_resolution() {
        temp_env::with_vars_unset([OTEL_SERVICE_NAME, OTEL_RESOURCE_ATTRIBUTES], || {
            assert_eq!(
                Resource::builder().build().service_name(),
                Some("unknown_service")
            );
        });

        temp_env::with_vars(
            [
                (OTEL_SERVICE_NAME, Some("test service")),
                (OTEL_RESOURCE_ATTRIBUTES, None),
            ],
            || {
                assert_eq!(
                    Resource::builder().build().service_name(),
                    Some("test service")
                );
            },
        );

        temp_env::with_vars(
            [
                (OTEL_SERVICE_NAME, None),
                (OTEL_RESOURCE_ATTRIBUTES, Some("service.name=test service1")),
            ],
            || {
                assert_eq!(
                    Resource::builder().build().service_name(),
                    Some("test service1")
                );
            },
        );

        // OTEL_SERVICE_NAME takes priority
        temp_env::with_vars(
            [
                (OTEL_SERVICE_NAME, Some("test service")),
                (OTEL_RESOURCE_ATTRIBUTES, Some("service.name=test service3")),
            ],
            || {
                assert_eq!(
                    Resource::builder().build().service_name(),
                    Some("test service")
                );
            },
        );
    }

    #[test]
    fn builder_values_override_env() {
        temp_env::with_var(OTEL_SERVICE_NAME, Some("from-env"), || {
            let resource = Resource::builder()
                .with_service_name("showcase")
                .with_attribute(KeyValue::new("host", "a"))
                .with_attributes([KeyValue::new("host", "b")])
                .build();
            assert_eq!(resource.service_name(), Some("showcase"));
            assert_eq!(resource.get("host"), Some("b"));
        });
    }

    #[test]
    fn builder_empty_ignores_env() {
        temp_env::with_var(OTEL_SERVICE_NAME, Some("from-env"), || {
            let resource = Resource::builder_empty().build();
            assert!(resource.is_empty());
        });
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let parsed = parse_resource_attributes("novalue,=empty,ok=1,");
        assert_eq!(parsed, vec![KeyValue::new("ok", "1")]);
    }
}
