//! Decomposed resources as cached per expanded URL.

use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;

/// A model field or collection element: either a primitive leaf carried
/// verbatim from the origin document, or a reference to another resource.
///
/// References serialize in RES wire form, `{"rid": "..."}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    Primitive(Value),
    Ref(String),
}

impl Serialize for ResourceValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ResourceValue::Primitive(v) => v.serialize(serializer),
            ResourceValue::Ref(rid) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("rid", rid)?;
                map.end()
            }
        }
    }
}

/// A decomposed sub-resource, keyed by resource id in the URL's cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResource {
    Model(HashMap<String, ResourceValue>),
    Collection(Vec<ResourceValue>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_wire_form() {
        let v = ResourceValue::Ref("svc.2.stations.77".to_string());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!({"rid": "svc.2.stations.77"}));
    }

    #[test]
    fn test_primitive_wire_form() {
        let v = ResourceValue::Primitive(serde_json::from_str("1.50").unwrap());
        assert_eq!(serde_json::to_string(&v).unwrap(), "1.50");
    }
}
