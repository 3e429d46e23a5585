//! Reserved annotation keys and the restore-hint wire format
//!
//! Workloads carry what they need to be restored after a stop in a single
//! annotation. The encoding lives only here; the rest of the crate works with
//! [`RestoreHint`] values attached to [`WorkloadResource`](crate::model::WorkloadResource).

use crate::error::Result;
use crate::model::{RestoreHint, WorkloadKind};
use std::collections::BTreeMap;
use tracing::warn;

/// Field manager used for every patch issued by the operator
pub const FIELD_MANAGER: &str = "tenant-operator";

// Restore-hint annotations
pub const ORIGINAL_REPLICAS_ANNOTATION: &str = "tenant-operator.io/original-replicas";
pub const ORIGINAL_NODE_SELECTOR_ANNOTATION: &str = "tenant-operator.io/original-node-selector";

/// Stored in place of a selector when the daemon had none
pub const EMPTY_SELECTOR_MARKER: &str = "__empty__";

// Node selector that no real node carries
pub const STOP_SELECTOR_KEY: &str = "tenant-operator.io/stopped";
pub const STOP_SELECTOR_VALUE: &str = "true";

/// The unsatisfiable node selector applied to stop a daemon.
pub fn stop_selector() -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    selector.insert(STOP_SELECTOR_KEY.to_string(), STOP_SELECTOR_VALUE.to_string());
    selector
}

/// Whether a node selector contains the reserved stop marker.
pub fn is_stop_selector(selector: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .and_then(|s| s.get(STOP_SELECTOR_KEY))
        .is_some_and(|v| v == STOP_SELECTOR_VALUE)
}

/// Drop the stop marker from a selector; an empty result becomes `None`.
pub fn without_stop_marker(
    selector: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let mut selector = selector.cloned()?;
    selector.remove(STOP_SELECTOR_KEY);
    if selector.is_empty() {
        None
    } else {
        Some(selector)
    }
}

/// Annotation key that holds the restore hint for a workload kind.
pub fn restore_hint_key(kind: WorkloadKind) -> &'static str {
    if kind.is_replica_controlled() {
        ORIGINAL_REPLICAS_ANNOTATION
    } else {
        ORIGINAL_NODE_SELECTOR_ANNOTATION
    }
}

/// Encode a restore hint as an annotation `(key, value)` pair.
pub fn encode_restore_hint(hint: &RestoreHint) -> Result<(&'static str, String)> {
    match hint {
        RestoreHint::ReplicaCount(n) => Ok((ORIGINAL_REPLICAS_ANNOTATION, n.to_string())),
        RestoreHint::PlacementSelector(selector) if selector.is_empty() => Ok((
            ORIGINAL_NODE_SELECTOR_ANNOTATION,
            EMPTY_SELECTOR_MARKER.to_string(),
        )),
        RestoreHint::PlacementSelector(selector) => Ok((
            ORIGINAL_NODE_SELECTOR_ANNOTATION,
            serde_json::to_string(selector)?,
        )),
    }
}

/// Read the restore hint for a workload of `kind` from its annotations.
///
/// Unparseable values are logged and ignored.
pub fn decode_restore_hint(
    kind: WorkloadKind,
    annotations: Option<&BTreeMap<String, String>>,
) -> Option<RestoreHint> {
    let raw = annotations?.get(restore_hint_key(kind))?;

    if kind.is_replica_controlled() {
        return match raw.trim().parse::<i32>() {
            Ok(n) if n >= 0 => Some(RestoreHint::ReplicaCount(n)),
            _ => {
                warn!(value = %raw, "Ignoring malformed original-replicas annotation");
                None
            }
        };
    }

    if raw == EMPTY_SELECTOR_MARKER {
        return Some(RestoreHint::PlacementSelector(BTreeMap::new()));
    }
    match serde_json::from_str::<BTreeMap<String, String>>(raw) {
        Ok(selector) => Some(RestoreHint::PlacementSelector(selector)),
        Err(e) => {
            warn!(value = %raw, error = %e, "Ignoring malformed original-node-selector annotation");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(key: &str, value: &str) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(key.to_string(), value.to_string());
        map
    }

    #[test]
    fn test_stop_selector_detection() {
        assert!(is_stop_selector(Some(&stop_selector())));
        assert!(!is_stop_selector(None));

        let mut zone = BTreeMap::new();
        zone.insert("zone".to_string(), "a".to_string());
        assert!(!is_stop_selector(Some(&zone)));

        zone.extend(stop_selector());
        assert!(is_stop_selector(Some(&zone)));
    }

    #[test]
    fn test_without_stop_marker() {
        assert_eq!(without_stop_marker(Some(&stop_selector())), None);
        assert_eq!(without_stop_marker(None), None);

        let mut mixed = stop_selector();
        mixed.insert("zone".to_string(), "a".to_string());
        let cleaned = without_stop_marker(Some(&mixed)).unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned["zone"], "a");
    }

    #[test]
    fn test_replica_hint_encoding() {
        let (key, value) = encode_restore_hint(&RestoreHint::ReplicaCount(3)).unwrap();
        assert_eq!(key, ORIGINAL_REPLICAS_ANNOTATION);
        assert_eq!(value, "3");

        let decoded = decode_restore_hint(WorkloadKind::Deployment, Some(&annotations(key, &value)));
        assert_eq!(decoded, Some(RestoreHint::ReplicaCount(3)));
    }

    #[test]
    fn test_empty_selector_uses_marker() {
        let hint = RestoreHint::PlacementSelector(BTreeMap::new());
        let (key, value) = encode_restore_hint(&hint).unwrap();
        assert_eq!(key, ORIGINAL_NODE_SELECTOR_ANNOTATION);
        assert_eq!(value, EMPTY_SELECTOR_MARKER);

        let decoded = decode_restore_hint(WorkloadKind::DaemonSet, Some(&annotations(key, &value)));
        assert_eq!(decoded, Some(hint));
    }

    #[test]
    fn test_selector_hint_decoding() {
        let raw = r#"{"disktype":"ssd","zone":"eu-1"}"#;
        let decoded = decode_restore_hint(
            WorkloadKind::DaemonSet,
            Some(&annotations(ORIGINAL_NODE_SELECTOR_ANNOTATION, raw)),
        );
        match decoded {
            Some(RestoreHint::PlacementSelector(selector)) => {
                assert_eq!(selector.len(), 2);
                assert_eq!(selector["disktype"], "ssd");
            }
            other => panic!("unexpected hint: {:?}", other),
        }
    }

    #[test]
    fn test_hint_is_read_from_kind_specific_key() {
        // a daemon ignores the replica annotation and vice versa
        let replicas = annotations(ORIGINAL_REPLICAS_ANNOTATION, "2");
        assert_eq!(decode_restore_hint(WorkloadKind::DaemonSet, Some(&replicas)), None);

        let selector = annotations(ORIGINAL_NODE_SELECTOR_ANNOTATION, EMPTY_SELECTOR_MARKER);
        assert_eq!(decode_restore_hint(WorkloadKind::StatefulSet, Some(&selector)), None);
    }

    #[test]
    fn test_malformed_hints_are_ignored() {
        let bad_count = annotations(ORIGINAL_REPLICAS_ANNOTATION, "three");
        assert_eq!(decode_restore_hint(WorkloadKind::Deployment, Some(&bad_count)), None);

        let negative = annotations(ORIGINAL_REPLICAS_ANNOTATION, "-1");
        assert_eq!(decode_restore_hint(WorkloadKind::Deployment, Some(&negative)), None);

        let bad_json = annotations(ORIGINAL_NODE_SELECTOR_ANNOTATION, "{zone");
        assert_eq!(decode_restore_hint(WorkloadKind::DaemonSet, Some(&bad_json)), None);
    }
}
