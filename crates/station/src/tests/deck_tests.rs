use serde_json::json;

use super::*;

#[test]
fn blank_deck_has_default_idle_height() {
    let deck = DeckConfiguration::default();
    assert!(deck.plates.is_empty());
    assert_eq!(deck.safe_z, None);
    assert_eq!(deck.idle_z, 300.0);
    assert!(deck.cleaning_config.protocol.is_empty());
}

#[test]
fn legacy_files_with_partial_teach_points_load() {
    let deck: DeckConfiguration = serde_json::from_value(json!({
        "plates": {
            "2": {
                "id": "",
                "well_count": 24,
                "corner_well_centroids": [[10.5, 20.0], [null, null], [100.0, 80.0]],
                "liquid_level": {}
            }
        },
        "safe_z": null,
        "idle_z": 250,
        "cleaning_config": {}
    }))
    .expect("decode");

    let plate = deck.plate(2).expect("plate 2");
    assert_eq!(plate.corner_well_centroids[0], Some(Point::new(10.5, 20.0)));
    assert_eq!(plate.corner_well_centroids[1], None);
    assert_eq!(plate.plate_height, None);
    assert_eq!(deck.idle_z, 250.0);
    assert!(matches!(plate.mapper(2), Err(StationError::PlateNotTaught(2))));
    assert!(matches!(deck.plate(0), Err(StationError::PlateNotConfigured(0))));
}

#[test]
fn saved_configuration_reloads_identically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("deck.json");
    let mut deck = DeckConfiguration {
        safe_z: Some(120.0),
        ..DeckConfiguration::default()
    };
    let mut plate = PlateConfig::blank(96);
    plate.corner_well_centroids = [
        Some(Point::new(0.0, 0.0)),
        Some(Point::new(99.0, 0.0)),
        Some(Point::new(99.0, 63.0)),
    ];
    plate.plate_height = Some(42.0);
    deck.plates.insert(3, plate);
    deck.cleaning_config.plates.push(3);

    deck.save(&path).expect("save");
    let text = std::fs::read_to_string(&path).expect("read back");
    assert!(text.contains("\"3\": {"), "plate keys are strings: {text}");

    let (loaded, remembered) = DeckConfiguration::load_or_default(&path);
    assert_eq!(loaded, deck);
    assert_eq!(remembered.as_deref(), Some(path.as_path()));
    assert!(loaded.plate(3).expect("plate").mapper(3).is_ok());
}

#[test]
fn missing_or_malformed_files_fall_back_to_blank() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.json");
    let (deck, remembered) = DeckConfiguration::load_or_default(&missing);
    assert_eq!(deck, DeckConfiguration::default());
    assert!(remembered.is_none());
    assert!(matches!(
        DeckConfiguration::load(&missing),
        Err(StationError::Io { .. })
    ));

    let malformed = dir.path().join("broken.json");
    std::fs::write(&malformed, "{\"plates\": ").expect("write");
    let (deck, remembered) = DeckConfiguration::load_or_default(&malformed);
    assert_eq!(deck, DeckConfiguration::default());
    assert!(remembered.is_none());
}

#[test]
fn heights_are_bounded_by_the_longest_tool() {
    let offsets = [-50.0, -75.0];
    assert_eq!(validate_height("safe_z", 300.0, 400.0, &offsets).expect("valid"), 300.0);
    assert!(matches!(
        validate_height("safe_z", 330.0, 400.0, &offsets),
        Err(StationError::InvalidHeight { max, .. }) if max == 325.0
    ));
    assert!(validate_height("idle_z", -1.0, 400.0, &offsets).is_err());
    assert!(validate_height("idle_z", 400.0, 400.0, &[]).is_ok());
}
