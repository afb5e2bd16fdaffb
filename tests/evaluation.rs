//! End-to-end evaluation against the fixture ruleset, driving the same
//! wire format a server would deliver.
use std::fs::File;
use std::io::BufReader;

use serde_json::json;

use flagship::repository::Repository;
use flagship::{ClientConfig, User};

fn fixture_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/repo.json")
}

fn load_fixture() -> Repository {
    let file = File::open(fixture_path()).expect("fixture should exist");
    serde_json::from_reader(BufReader::new(file)).expect("fixture should parse")
}

#[test]
fn enabled_toggle_serves_the_default_variation() {
    let repo = load_fixture();
    let toggle = &repo.toggles["feature_default_on"];

    let result = toggle.eval(
        &User::new().with_key("any_user"),
        &repo.toggles,
        &repo.segments,
        None,
        20,
    );

    assert_eq!(result.variation_index, Some(1));
    assert_eq!(result.value, Some(json!(true)));
    assert_eq!(result.version, 1);
    assert_eq!(result.rule_index, None);
}

#[test]
fn disabled_toggle_serves_the_disabled_variation() {
    let repo = load_fixture();
    let toggle = &repo.toggles["feature_disabled"];

    let result = toggle.eval(
        &User::new().with_key("any_user"),
        &repo.toggles,
        &repo.segments,
        None,
        20,
    );

    assert_eq!(result.variation_index, Some(0));
    assert_eq!(result.value, Some(json!("off")));
    assert_eq!(result.reason, "Toggle disabled.");
}

#[test]
fn percentage_rollout_buckets_deterministically() {
    let repo = load_fixture();
    let toggle = &repo.toggles["rollout_half"];
    let user = User::new().with_key("test_user_key");

    let result = toggle.eval(&user, &repo.toggles, &repo.segments, None, 20);
    assert_eq!(result.variation_index, Some(0));
    assert_eq!(result.value, Some(json!("control")));

    // Same user, same ruleset, same bucket.
    let again = toggle.eval(&user, &repo.toggles, &repo.segments, None, 20);
    assert_eq!(result, again);
}

#[test]
fn first_matching_rule_decides() {
    let repo = load_fixture();
    let toggle = &repo.toggles["vip_rule"];

    let vip = User::new().with_key("u1").with("plan", "vip");
    let result = toggle.eval(&vip, &repo.toggles, &repo.segments, None, 20);
    assert_eq!(result.rule_index, Some(0));
    assert_eq!(result.value, Some(json!("vip_ui")));
    assert_eq!(result.reason, "Rule 0 hit");

    let basic = User::new().with_key("u1").with("plan", "basic");
    let result = toggle.eval(&basic, &repo.toggles, &repo.segments, None, 20);
    assert_eq!(result.rule_index, None);
    assert_eq!(result.value, Some(json!("basic_ui")));
}

#[test]
fn segment_membership_gates_the_rule() {
    let repo = load_fixture();
    let toggle = &repo.toggles["segment_feature"];

    let member = User::new().with_key("u1").with("email", "dev@beta.dev");
    let result = toggle.eval(&member, &repo.toggles, &repo.segments, None, 20);
    assert_eq!(result.value, Some(json!(true)));

    let outsider = User::new().with_key("u2").with("email", "dev@prod.dev");
    let result = toggle.eval(&outsider, &repo.toggles, &repo.segments, None, 20);
    assert_eq!(result.value, Some(json!(false)));
}

#[test]
fn missing_attribute_names_the_attribute_in_the_reason() {
    let repo = load_fixture();
    let toggle = &repo.toggles["attr_rule"];

    let user = User::new().with_key("u1");
    let result = toggle.eval(&user, &repo.toggles, &repo.segments, None, 20);

    assert_eq!(result.rule_index, None);
    assert_eq!(result.value, Some(json!(false)));
    assert!(result.reason.contains("does not have attribute name 'region'"));
}

#[test]
fn met_and_unmet_prerequisites() {
    let repo = load_fixture();
    let user = User::new().with_key("u1");

    let met = repo.toggles["prereq_feature"].eval(&user, &repo.toggles, &repo.segments, None, 20);
    assert_eq!(met.value, Some(json!("unlocked")));
    assert!(!met.reason.contains("Prerequisite"));

    // feature_disabled resolves to "off", not the required "on".
    let unmet = repo.toggles["prereq_unmet"].eval(&user, &repo.toggles, &repo.segments, None, 20);
    assert_eq!(unmet.value, Some(json!("yes")));
    assert!(unmet.reason.contains("Prerequisite not met."));
}

#[test]
fn prerequisite_depth_budget_bounds_the_chain() {
    let repo = load_fixture();
    let user = User::new().with_key("u1");
    let toggle = &repo.toggles["deep_a"];

    // deep_a -> deep_b -> feature_default_on needs a budget of three.
    let overflow = toggle.eval(&user, &repo.toggles, &repo.segments, None, 2);
    assert!(overflow.reason.contains("depth overflow"));

    let ok = toggle.eval(&user, &repo.toggles, &repo.segments, None, 3);
    assert_eq!(ok.value, Some(json!(true)));
    assert!(!ok.reason.contains("depth overflow"));
}

#[test]
fn round_trip_preserves_every_decision() {
    let repo = load_fixture();
    let reloaded: Repository =
        serde_json::from_str(&serde_json::to_string(&repo).expect("snapshot should serialize"))
            .expect("serialized snapshot should reload");

    let users = [
        User::new().with_key("test_user_key"),
        User::new()
            .with_key("u1")
            .with("plan", "vip")
            .with("email", "dev@beta.dev")
            .with("region", "eu"),
        User::new().with_key("another_user").with("plan", "basic"),
    ];

    for key in repo.toggles.keys() {
        for user in &users {
            let original = repo.toggles[key].eval(user, &repo.toggles, &repo.segments, None, 20);
            let reparsed =
                reloaded.toggles[key].eval(user, &reloaded.toggles, &reloaded.segments, None, 20);
            assert_eq!(original, reparsed, "toggle {key} diverged after round-trip");
        }
    }
}

#[test]
fn client_typed_getters_end_to_end() {
    let client = ClientConfig::from_sdk_key("test-key")
        .local_file_mode(fixture_path())
        .to_client()
        .expect("client should construct");
    assert!(client.initialized());

    let user = User::new().with_key("test_user_key").with("plan", "vip");

    assert!(client.bool_value("feature_default_on", &user, false));
    assert_eq!(client.string_value("vip_rule", &user, "fallback"), "vip_ui");
    assert_eq!(client.string_value("rollout_half", &user, "fallback"), "control");
    // Integer variation widens to f64.
    assert_eq!(client.number_value("number_toggle", &user, 0.0), 10.0);
    assert_eq!(
        client.json_value("json_toggle", &user, json!(null)),
        json!({"color": "blue"})
    );

    let detail = client.string_detail("vip_rule", &user, "fallback");
    assert_eq!(detail.rule_index, Some(0));
    assert_eq!(detail.version, Some(5));
    assert_eq!(detail.reason, "Rule 0 hit");

    client.shutdown();
}
