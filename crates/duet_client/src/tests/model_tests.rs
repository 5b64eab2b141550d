use super::*;
use serde_json::json;

#[test]
fn patch_preserves_fields_it_does_not_mention() {
    let mut model = MachineModel::new(json!({
        "move": {"axes": [{"homed": false, "machinePosition": 0.0}]}
    }));
    model.apply_patch(&json!({"move": {"axes": [{"homed": true}]}}));
    assert_eq!(
        model.document(),
        &json!({"move": {"axes": [{"homed": true, "machinePosition": 0.0}]}})
    );
}

#[test]
fn shorter_sequence_replaces_wholesale() {
    let mut document = json!([1, 2, 3]);
    merge_patch(&mut document, &json!([1, 2]));
    assert_eq!(document, json!([1, 2]));

    let mut model = MachineModel::new(json!({"tools": [{"number": 0}, {"number": 1}]}));
    model.apply_patch(&json!({"tools": [{"number": 0}]}));
    assert_eq!(model.pointer("/tools"), Some(&json!([{"number": 0}])));
}

#[test]
fn longer_sequence_merges_and_appends() {
    let mut document = json!({"axes": [{"letter": "X", "homed": false}]});
    merge_patch(
        &mut document,
        &json!({"axes": [{"homed": true}, {"letter": "Y", "homed": false}]}),
    );
    assert_eq!(
        document,
        json!({"axes": [
            {"letter": "X", "homed": true},
            {"letter": "Y", "homed": false}
        ]})
    );
}

#[test]
fn applying_a_patch_twice_matches_applying_it_once() {
    let base = json!({
        "state": {"status": "busy", "currentTool": -1},
        "move": {"axes": [{"homed": false, "machinePosition": 1.5}, {"homed": false}]},
        "tools": [{"offsets": [0.0, 0.0, -50.0]}]
    });
    let patch = json!({
        "state": {"status": "idle", "upTime": 12},
        "move": {"axes": [{"machinePosition": 4.0}, {"homed": true}, {"homed": false}]},
        "tools": [{"offsets": [0.0, 0.0, -51.0]}]
    });

    let mut once = MachineModel::new(base.clone());
    once.apply_patch(&patch);
    let mut twice = MachineModel::new(base);
    twice.apply_patch(&patch);
    twice.apply_patch(&patch);
    assert_eq!(once, twice);
}

#[test]
fn scalars_overwrite_containers_and_vice_versa() {
    let mut document = json!({"a": {"nested": 1}, "b": 3});
    merge_patch(&mut document, &json!({"a": null, "b": {"now": "map"}}));
    assert_eq!(document, json!({"a": null, "b": {"now": "map"}}));
}

#[test]
fn typed_accessors_read_the_object_model() {
    let model = MachineModel::new(json!({
        "state": {"status": "idle", "currentTool": 1},
        "move": {"axes": [
            {"homed": true, "machinePosition": 10.0, "min": 0.0, "max": 300.0},
            {"homed": true, "machinePosition": 20.0, "min": -5.0, "max": 290.0},
            {"homed": false, "machinePosition": 30.0, "min": 0.0, "max": 400.0}
        ]},
        "tools": [{"offsets": [0.0, 0.0, -50.0]}, null, {"offsets": [1.0, -2.0, -75.5]}]
    }));

    assert_eq!(model.status(), Some(MachineStatus::Idle));
    assert_eq!(model.current_tool(), Some(1));
    assert_eq!(
        model.axes_homed(),
        HomingState::new([true, true, false, false])
    );
    assert_eq!(model.machine_position(Axis::Y), Some(20.0));
    assert_eq!(model.machine_position(Axis::U), None);
    assert_eq!(
        model.tool_offsets(),
        vec![
            ToolOffset { x: 0.0, y: 0.0, z: -50.0 },
            ToolOffset::default(),
            ToolOffset { x: 1.0, y: -2.0, z: -75.5 },
        ]
    );
    assert_eq!(model.axis_limits()[2], AxisLimits { min: 0.0, max: 400.0 });
}
