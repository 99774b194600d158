use bobbins_types::NavigationState;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn navigation_state_wire_shape() {
    let state = NavigationState::new("chapter", "c1", "manuscript");
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(
        value,
        json!({"entityType": "chapter", "entityId": "c1", "bobbinId": "manuscript"})
    );
}

#[test]
fn metadata_accumulates() {
    let state = NavigationState::new("chapter", "c1", "manuscript")
        .with_metadata("scroll", json!(120))
        .with_metadata("mode", json!("edit"));
    let metadata = state.metadata.as_ref().unwrap();
    assert_eq!(metadata.len(), 2);
    assert_eq!(metadata["mode"], json!("edit"));
}

#[test]
fn navigation_state_decodes_without_metadata() {
    let state: NavigationState = serde_json::from_value(json!({
        "entityType": "scene",
        "entityId": "s9",
        "bobbinId": "manuscript"
    }))
    .unwrap();
    assert_eq!(state, NavigationState::new("scene", "s9", "manuscript"));
}
