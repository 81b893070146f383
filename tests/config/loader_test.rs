/*!
 * Config Loader Tests
 * Descriptor shapes, required fields and validation failures
 */

use app_supervisor::config::Backoff;
use app_supervisor::{ConfigError, ConfigLoader};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

fn load(value: serde_json::Value) -> Result<Vec<app_supervisor::AppSpec>, ConfigError> {
    ConfigLoader::new().from_json(&value.to_string())
}

#[test]
fn test_minimal_app_gets_defaults() {
    let apps = load(json!({
        "apps": [{ "name": "x", "command": "true", "cwd": "/tmp", "autorestart": false }]
    }))
    .unwrap();

    assert_eq!(apps.len(), 1);
    let app = &apps[0];
    assert_eq!(app.name, "x");
    assert_eq!(app.command, "true");
    assert!(app.program.is_absolute());
    assert_eq!(app.instances, 1);
    assert!(!app.autorestart);
    assert_eq!(app.restart.max_restarts, 15);
    assert_eq!(app.restart.min_uptime, Duration::from_secs(1));
    assert_eq!(
        app.restart.backoff,
        Backoff::Exponential {
            base: Duration::from_millis(100)
        }
    );
    assert_eq!(app.kill_timeout, Duration::from_millis(1600));
    assert!(app.logs.is_empty());
}

#[test]
fn test_accepts_bare_array_and_single_object() {
    let array = load(json!([{ "name": "a", "script": "true", "cwd": "/tmp" }])).unwrap();
    assert_eq!(array[0].name, "a");

    let single = load(json!({ "name": "b", "script": "true", "cwd": "/tmp" })).unwrap();
    assert_eq!(single[0].name, "b");
}

#[test]
fn test_missing_cwd_is_rejected() {
    let err = load(json!({ "apps": [{ "name": "web", "script": "true" }] })).unwrap_err();
    assert_eq!(
        err,
        ConfigError::MissingField {
            app: "web".into(),
            field: "cwd".into()
        }
    );
}

#[test]
fn test_nonexistent_cwd_is_rejected() {
    let err = load(json!({
        "apps": [{ "name": "web", "script": "true", "cwd": "/definitely/not/here/12345" }]
    }))
    .unwrap_err();
    assert_eq!(err.field(), Some("cwd"));
}

#[test]
fn test_duplicate_names_are_rejected() {
    let err = load(json!({
        "apps": [
            { "name": "web", "script": "true", "cwd": "/tmp" },
            { "name": "web", "script": "true", "cwd": "/tmp" }
        ]
    }))
    .unwrap_err();
    assert_eq!(err, ConfigError::DuplicateName("web".into()));
}

#[test]
fn test_empty_apps_is_rejected() {
    assert_eq!(load(json!({ "apps": [] })).unwrap_err(), ConfigError::NoApps);
}

#[test]
fn test_unresolvable_script_is_rejected() {
    let err = load(json!({
        "apps": [{ "name": "web", "script": "no-such-binary-12345", "cwd": "/tmp" }]
    }))
    .unwrap_err();
    assert_eq!(err.field(), Some("script"));
}

#[test]
fn test_memory_quantities() {
    let apps = load(json!({
        "apps": [
            { "name": "g", "script": "true", "cwd": "/tmp", "max_memory_restart": "1G" },
            { "name": "m", "script": "true", "cwd": "/tmp", "max_memory_restart": "512M" },
            { "name": "n", "script": "true", "cwd": "/tmp", "max_memory_restart": 4096 }
        ]
    }))
    .unwrap();

    let limits: Vec<_> = apps.iter().map(|a| a.max_memory).collect();
    assert_eq!(limits, vec![Some(1 << 30), Some(512 << 20), Some(4096)]);

    let err = load(json!({
        "apps": [{ "name": "bad", "script": "true", "cwd": "/tmp", "max_memory_restart": "lots" }]
    }))
    .unwrap_err();
    assert_eq!(err.field(), Some("max_memory_restart"));
}

#[test]
fn test_invalid_instances() {
    let err = load(json!({
        "apps": [{ "name": "web", "script": "true", "cwd": "/tmp", "instances": 0 }]
    }))
    .unwrap_err();
    assert_eq!(err.field(), Some("instances"));
}

#[test]
fn test_args_string_is_split() {
    let apps = load(json!({
        "apps": [{
            "name": "web",
            "script": "true",
            "cwd": "/tmp",
            "args": "start --port 3000 --title 'my app'"
        }]
    }))
    .unwrap();
    assert_eq!(apps[0].args, vec!["start", "--port", "3000", "--title", "my app"]);
}

#[test]
fn test_interpreter_prepends_script() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("server.sh"), "echo hi\n").unwrap();

    let apps = load(json!({
        "apps": [{
            "name": "web",
            "script": "server.sh",
            "interpreter": "sh",
            "args": ["--verbose"],
            "cwd": dir.path()
        }]
    }))
    .unwrap();

    assert_eq!(apps[0].command, "sh");
    assert_eq!(apps[0].args, vec!["server.sh", "--verbose"]);
}

#[test]
fn test_relative_log_paths_use_descriptor_dir() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = dir.path().join("ecosystem.json");
    std::fs::write(
        &descriptor,
        json!({
            "apps": [{
                "name": "web",
                "script": "true",
                "cwd": "/tmp",
                "out_file": "logs/../logs/out.log",
                "error_file": "/var/log/web/err.log"
            }]
        })
        .to_string(),
    )
    .unwrap();

    let apps = ConfigLoader::new().from_file(&descriptor).unwrap();
    assert_eq!(apps[0].logs.out, Some(dir.path().join("logs/out.log")));
    assert_eq!(apps[0].logs.error, Some(PathBuf::from("/var/log/web/err.log")));
}

#[test]
fn test_missing_file_is_read_error() {
    let err = ConfigLoader::new()
        .from_file("/definitely/not/here/ecosystem.json")
        .unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
