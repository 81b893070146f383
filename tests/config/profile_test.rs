/*!
 * Profile Environment Tests
 * env / env_<profile> merging
 */

use app_supervisor::ConfigLoader;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

fn butcapp() -> Value {
    json!({
        "apps": [{
            "name": "butcapp",
            "script": "true",
            "args": "start",
            "cwd": "/tmp",
            "instances": 1,
            "autorestart": true,
            "watch": false,
            "max_memory_restart": "1G",
            "env": { "NODE_ENV": "development", "PORT": 3000 },
            "env_production": { "NODE_ENV": "production", "PORT": 3000 },
            "time": true
        }]
    })
}

#[test]
fn test_default_profile_uses_env() {
    let apps = ConfigLoader::new().from_json(&butcapp().to_string()).unwrap();
    let env = &apps[0].env;
    assert_eq!(env.get("NODE_ENV").map(String::as_str), Some("development"));
    assert_eq!(env.get("PORT").map(String::as_str), Some("3000"));
    assert_eq!(apps[0].profile, None);
}

#[test]
fn test_production_profile_overrides() {
    let apps = ConfigLoader::new()
        .with_profile("production")
        .from_json(&butcapp().to_string())
        .unwrap();
    assert_eq!(apps[0].env.get("NODE_ENV").map(String::as_str), Some("production"));
    assert_eq!(apps[0].profile.as_deref(), Some("production"));
}

#[test]
fn test_unknown_profile_falls_back_to_env() {
    let apps = ConfigLoader::new()
        .with_profile("staging")
        .from_json(&butcapp().to_string())
        .unwrap();
    assert_eq!(apps[0].env.get("NODE_ENV").map(String::as_str), Some("development"));
}

fn env_section() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[A-Z][A-Z0-9_]{0,6}", "[a-z0-9]{0,8}", 0..6)
}

fn to_json(section: &BTreeMap<String, String>) -> Value {
    Value::Object(
        section
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<_, _>>(),
    )
}

proptest! {
    #[test]
    fn prop_merged_env_is_union_with_profile_winning(
        base in env_section(),
        profile in env_section(),
    ) {
        let descriptor = json!({
            "name": "web",
            "script": "true",
            "cwd": "/tmp",
            "env": to_json(&base),
            "env_production": to_json(&profile)
        });

        let apps = ConfigLoader::new()
            .with_profile("production")
            .from_json(&descriptor.to_string())
            .unwrap();
        let env = &apps[0].env;

        let expected_keys: BTreeSet<_> = base.keys().chain(profile.keys()).cloned().collect();
        let actual_keys: BTreeSet<_> = env.keys().cloned().collect();
        prop_assert_eq!(actual_keys, expected_keys);

        for (key, value) in env {
            let expected = profile.get(key).or_else(|| base.get(key)).unwrap();
            prop_assert_eq!(value, expected);
        }
    }
}
