use crate::client::{ClientRecord, VehicleId};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("malformed packet, no '{{' found")]
    MissingDelta,
    #[error("vehicle does not exist")]
    UnknownVehicle { vid: VehicleId, car_count: usize },
    #[error("stored vehicle config has no JSON body")]
    MalformedStored { vid: VehicleId },
    #[error("stored vehicle config is not a JSON object: {0}")]
    BadStoredJson(serde_json::Error),
    #[error("vehicle delta is not a JSON object: {0}")]
    BadDeltaJson(serde_json::Error),
}

/// True when the config describes the special walking-mode vehicle, which is
/// exempt from the per-player car quota.
pub fn is_unicycle(car_json: &str) -> bool {
    match serde_json::from_str::<Value>(car_json) {
        Ok(car) => car.get("jbm").and_then(Value::as_str) == Some("unicycle"),
        Err(_) => {
            error!("failed to parse vehicle data -> {}", car_json);
            false
        }
    }
}

/// Shallow overwrite: every top-level member of `delta` lands in `base`,
/// replacing whatever was there. Nested objects are replaced wholesale, never
/// merged recursively; deeper merging would change game semantics.
fn merge_configs(base: &mut Map<String, Value>, delta: Map<String, Value>) {
    for (key, value) in delta {
        base.insert(key, value);
    }
}

/// Applies an edit packet to the stored config of vehicle `vid`.
///
/// The delta is everything from the packet's first `'{'`; the stored config
/// splits into a textual header and a JSON body at its own first `'{'`. The
/// merged body is written back under the original header. All failures leave
/// the stored config untouched.
pub fn apply_edit(client: &ClientRecord, vid: VehicleId, packet: &str) -> Result<(), MergeError> {
    let delta_start = packet.find('{').ok_or(MergeError::MissingDelta)?;
    let delta_text = &packet[delta_start..];

    let stored = client.car_data(vid).ok_or(MergeError::UnknownVehicle {
        vid,
        car_count: client.car_count(),
    })?;
    let body_start = stored.find('{').ok_or(MergeError::MalformedStored { vid })?;
    let header = &stored[..body_start];

    let mut base: Map<String, Value> =
        serde_json::from_str(&stored[body_start..]).map_err(MergeError::BadStoredJson)?;
    let delta: Map<String, Value> =
        serde_json::from_str(delta_text).map_err(MergeError::BadDeltaJson)?;

    merge_configs(&mut base, delta);

    let merged = serde_json::to_string(&base).expect("vehicle config serialization");
    client.set_car_data(vid, format!("{}{}", header, merged));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn client_with(vid: VehicleId, stored: &str) -> ClientRecord {
        let client = ClientRecord::new(7);
        client.add_car(vid, stored.to_string());
        client
    }

    #[test]
    fn test_shallow_merge_replaces_nested_objects_wholesale() {
        let client = client_with(3, r#"Oc:0:Alice:7-3:{"a":1,"b":{"x":1}}"#);

        apply_edit(&client, 3, r#"Oc:7-3:{"b":{"x":2},"c":3}"#).unwrap();

        assert_eq!(
            client.car_data(3).unwrap(),
            r#"Oc:0:Alice:7-3:{"a":1,"b":{"x":2},"c":3}"#
        );
    }

    #[test]
    fn test_header_is_preserved() {
        let client = client_with(0, r#"Os:USER:Bob:7-0:{"jbm":"pessima"}"#);
        apply_edit(&client, 0, r#"Oc:7-0:{"jbm":"covet"}"#).unwrap();
        assert!(client.car_data(0).unwrap().starts_with("Os:USER:Bob:7-0:"));
    }

    #[test]
    fn test_null_base_member_is_overwritten() {
        let client = client_with(0, r#"h:{"paint":null}"#);
        apply_edit(&client, 0, r#"{"paint":"red"}"#).unwrap();
        assert_eq!(client.car_data(0).unwrap(), r#"h:{"paint":"red"}"#);
    }

    #[test]
    fn test_empty_delta_leaves_config_unchanged() {
        let client = client_with(0, r#"h:{"a":1,"b":[1,2]}"#);
        apply_edit(&client, 0, "{}").unwrap();
        assert_eq!(client.car_data(0).unwrap(), r#"h:{"a":1,"b":[1,2]}"#);
    }

    #[test]
    fn test_missing_delta_brace_is_rejected() {
        let client = client_with(0, r#"h:{"a":1}"#);
        let err = apply_edit(&client, 0, "Oc:7-0:garbage").unwrap_err();
        assert!(matches!(err, MergeError::MissingDelta));
        assert_eq!(client.car_data(0).unwrap(), r#"h:{"a":1}"#);
    }

    #[test]
    fn test_unknown_vehicle_reports_context() {
        let client = client_with(0, r#"h:{"a":1}"#);
        let err = apply_edit(&client, 5, r#"{"a":2}"#).unwrap_err();
        match err {
            MergeError::UnknownVehicle { vid, car_count } => {
                assert_eq!(vid, 5);
                assert_eq!(car_count, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unparseable_delta_drops_mutation() {
        let client = client_with(0, r#"h:{"a":1}"#);
        assert!(apply_edit(&client, 0, r#"{"a":"#).is_err());
        assert_eq!(client.car_data(0).unwrap(), r#"h:{"a":1}"#);
    }

    #[test]
    fn test_is_unicycle() {
        assert!(is_unicycle(r#"{"jbm":"unicycle","pcs":{}}"#));
        assert!(!is_unicycle(r#"{"jbm":"pessima"}"#));
        assert!(!is_unicycle(r#"{"jbm":1}"#));
        assert!(!is_unicycle(r#"{"other":"unicycle"}"#));
        assert!(!is_unicycle("not json"));
    }

    fn to_json(map: &BTreeMap<String, i64>) -> String {
        serde_json::to_string(map).unwrap()
    }

    proptest! {
        // Applying the same delta twice must equal applying it once.
        #[test]
        fn prop_merge_is_idempotent(
            base in proptest::collection::btree_map("[a-d]{1,2}", -100i64..100, 0..6),
            delta in proptest::collection::btree_map("[a-d]{1,2}", -100i64..100, 0..6),
        ) {
            let packet = format!("Oc:7-0:{}", to_json(&delta));

            let client = client_with(0, &format!("h:{}", to_json(&base)));
            apply_edit(&client, 0, &packet).unwrap();
            let once = client.car_data(0).unwrap();

            apply_edit(&client, 0, &packet).unwrap();
            let twice = client.car_data(0).unwrap();

            prop_assert_eq!(once, twice);
        }
    }
}
