//! Document type and recursive merge.

use serde_json::{Map, Value};

/// An ordered set of named fields, the unit of data exchanged with the backend
/// and with workloads.
pub type Document = Map<String, Value>;

/// Merge `src` into `dst`, with `src` winning on key collisions.
///
/// When both sides hold an object under the same key the two objects are
/// merged recursively. Every other value (scalars, arrays, null) replaces the
/// destination value with a clone of the source value.
///
/// ```
/// use serde_json::json;
/// use tidepool_core::deep_merge;
///
/// let mut dst = json!({"x": {"p": 1}, "a": 1});
/// let src = json!({"x": {"q": 2}, "a": 2});
/// deep_merge(
///     dst.as_object_mut().expect("object"),
///     src.as_object().expect("object"),
/// );
/// assert_eq!(dst, json!({"x": {"p": 1, "q": 2}, "a": 2}));
/// ```
pub fn deep_merge(dst: &mut Document, src: &Document) {
    for (key, value) in src {
        match (dst.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                dst.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge an ordered list of layers into a fresh document, lowest precedence first.
pub fn merge_layers<'a, I>(layers: I) -> Document
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut merged = Document::new();
    for layer in layers {
        deep_merge(&mut merged, layer);
    }
    merged
}
