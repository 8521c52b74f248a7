//! Identity capability shared by every cached record type.

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// A remote record that can live in a [`CacheStore`](crate::store::CacheStore).
///
/// The only structural requirement is a unique identifier. Everything else about
/// the record is opaque to the cache; sorting reads fields by name through
/// [`Entity::attribute`].
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identifier type. Only equality is needed to locate records.
    type Id: PartialEq + Clone + Debug + Send + Sync;

    /// Unique identifier of this record.
    fn id(&self) -> &Self::Id;

    /// Value of the named top-level field, used as a sort key.
    ///
    /// The default reads the field from the record's JSON form. Override it when
    /// serializing the whole record per lookup is too costly.
    fn attribute(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self).ok()? {
            Value::Object(mut map) => map.remove(name),
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::Item;
    use super::*;

    #[test]
    fn default_attribute_reads_serialized_field() {
        let item = Item::named(4, 120, "Uppsala");
        assert_eq!(item.attribute("pop"), Some(json!(120)));
        assert_eq!(item.attribute("name"), Some(json!("Uppsala")));
        assert_eq!(item.attribute("missing"), None);
        assert_eq!(Item::new(1).attribute("pop"), None);
    }
}
