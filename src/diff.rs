//! Model and collection diffing.
//!
//! Both diffs compare the previous and the freshly-decomposed form of a
//! resource and produce the events a subscriber must apply, in order, to
//! move from one to the other.
//!
//! The collection diff is LCS-based: matching prefix and suffix are trimmed
//! off, a longest-common-subsequence table is built over the remaining
//! windows, and the backtrack emits `remove` events immediately (descending
//! positions, valid at the moment of removal) while recording `add`s, which
//! are then emitted in ascending source order with indices adjusted for the
//! removals and additions already applied.

use crate::resource::ResourceValue;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;

/// A model change entry: a new value for the key, or its removal.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeValue {
    Value(ResourceValue),
    /// Serialized as the RES delete action, `{"action":"delete"}`.
    Delete,
}

impl Serialize for ChangeValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ChangeValue::Value(v) => v.serialize(serializer),
            ChangeValue::Delete => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("action", "delete")?;
                map.end()
            }
        }
    }
}

/// An ordered collection mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    Remove { idx: usize },
    Add { value: ResourceValue, idx: usize },
}

/// Compute the change map between two models.
///
/// Keys missing from `new` map to [`ChangeValue::Delete`]; keys absent from
/// `old` or with byte-unequal values map to the new value. An empty map
/// means no change event needs to be emitted.
#[must_use]
pub fn diff_model(
    old: &HashMap<String, ResourceValue>,
    new: &HashMap<String, ResourceValue>,
) -> HashMap<String, ChangeValue> {
    let mut ch = HashMap::new();
    for k in old.keys() {
        if !new.contains_key(k) {
            ch.insert(k.clone(), ChangeValue::Delete);
        }
    }
    for (k, v) in new {
        if old.get(k) != Some(v) {
            ch.insert(k.clone(), ChangeValue::Value(v.clone()));
        }
    }
    ch
}

/// Compute the ordered event sequence transforming collection `a` into `b`.
///
/// Applying the events one at a time (removes shrink the collection, adds
/// insert at the given index) yields exactly `b`. The event count is
/// minimal: `len(a) + len(b) - 2·LCS(a, b)`.
#[must_use]
pub fn diff_collection(a: &[ResourceValue], b: &[ResourceValue]) -> Vec<CollectionEvent> {
    let mut events = Vec::new();

    // Trim matching prefix and suffix; the diff acts on the windows between.
    let mut s = 0;
    let mut m = a.len();
    let mut n = b.len();
    while s < m && s < n && a[s] == b[s] {
        s += 1;
    }
    if s == m && s == n {
        return events;
    }
    while s < m && s < n && a[m - 1] == b[n - 1] {
        m -= 1;
        n -= 1;
    }

    let aa = &a[s..m];
    let bb = &b[s..n];
    let m = m - s;
    let n = n - s;

    // LCS length table: c[i + w*j] = LCS(aa[..i], bb[..j]).
    let w = m + 1;
    let mut c = vec![0usize; w * (n + 1)];
    for i in 0..m {
        for j in 0..n {
            c[(i + 1) + w * (j + 1)] = if aa[i] == bb[j] {
                c[i + w * j] + 1
            } else {
                c[(i + 1) + w * j].max(c[i + w * (j + 1)])
            };
        }
    }

    struct PendingAdd {
        src: usize,
        idx: usize,
        rm: usize,
    }

    // idx tracks the absolute position in the working collection.
    let mut idx = m + s;
    let mut i = m;
    let mut j = n;
    let mut rm = 0;
    let mut adds: Vec<PendingAdd> = Vec::with_capacity(n - c[w * (n + 1) - 1]);

    loop {
        if i > 0 && j > 0 && aa[i - 1] == bb[j - 1] {
            idx -= 1;
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || c[i + w * (j - 1)] >= c[(i - 1) + w * j]) {
            adds.push(PendingAdd { src: j - 1, idx, rm });
            j -= 1;
        } else if i > 0 && (j == 0 || c[i + w * (j - 1)] < c[(i - 1) + w * j]) {
            idx -= 1;
            events.push(CollectionEvent::Remove { idx });
            rm += 1;
            i -= 1;
        } else {
            break;
        }
    }

    // Emit adds in ascending source order. Each index is shifted by the
    // removals applied since the anchor was recorded and by the adds
    // already emitted before it.
    if !adds.is_empty() {
        let l = adds.len() - 1;
        for (i, add) in adds.iter().enumerate().rev() {
            events.push(CollectionEvent::Add {
                value: bb[add.src].clone(),
                idx: add.idx + add.rm + l - rm - i,
            });
        }
    }

    events
}
