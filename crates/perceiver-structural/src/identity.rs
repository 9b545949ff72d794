use std::collections::BTreeMap;

use locator_core_types::hash_bytes;

use crate::stability::{is_volatile_value, TEST_ID_ATTRS};

/// Attributes allowed into the identity hash, provided their values are stable.
const IDENTITY_ATTRS: &[&str] = &[
    "id",
    "name",
    "type",
    "role",
    "aria-label",
    "placeholder",
    "href",
];

/// Identity hash of a node: tag, stable attributes and ancestor path.
///
/// Auto-generated values are skipped so that re-rendering a page with fresh
/// framework ids keeps identities intact.
pub fn identity_hash(tag: &str, attributes: &BTreeMap<String, String>, ancestry: &[String]) -> String {
    let mut buf = String::with_capacity(64);
    buf.push_str(tag);
    buf.push('|');
    for attr in TEST_ID_ATTRS.iter().chain(IDENTITY_ATTRS.iter()) {
        if let Some(value) = attributes.get(*attr) {
            let value = value.trim();
            if value.is_empty() || is_volatile_value(value) {
                continue;
            }
            buf.push_str(attr);
            buf.push('=');
            buf.push_str(value);
            buf.push(';');
        }
    }
    buf.push('|');
    buf.push_str(&ancestry.join(">"));
    hash_bytes("id", buf.as_bytes())
}
