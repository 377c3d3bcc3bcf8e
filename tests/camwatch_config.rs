use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camwatch::config::{CamwatchConfig, ClassifierKind};
use camwatch::Region;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMWATCH_CONFIG",
        "CAMWATCH_CLASSIFIER_URL",
        "CAMWATCH_CLASSIFIER_LABELS",
        "CAMWATCH_MIN_CONFIDENCE",
        "CAMWATCH_RECONNECT_DELAY_SECS",
        "CAMWATCH_READ_TIMEOUT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_devices_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "devices": [
                {
                    "name": "porch",
                    "source": "http://10.0.0.5/video.cgi",
                    "login": "admin",
                    "password": "secret",
                    "motion_detection": true,
                    "object_detection": true,
                    "folder": "/var/lib/camwatch/porch",
                    "notification": "https://hooks.example/trigger/porch",
                    "crop": { "x": 10, "y": 20, "width": 320, "height": 240 }
                },
                {
                    "name": "garage",
                    "format": "image",
                    "source": "/tmp/garage.jpg",
                    "active": false
                }
            ],
            "classifier": {
                "labels": "/etc/camwatch/labels.txt",
                "min_confidence": 0.5
            },
            "reconnect": { "delay_secs": 7 },
            "stream": { "read_timeout_secs": 3 }
        }"#,
    );

    std::env::set_var("CAMWATCH_CONFIG", file.path());
    std::env::set_var("CAMWATCH_CLASSIFIER_URL", "http://127.0.0.1:8500/detect");
    std::env::set_var("CAMWATCH_MIN_CONFIDENCE", "0.75");

    let cfg = CamwatchConfig::load().expect("load config");

    assert_eq!(cfg.devices.len(), 2);
    let porch = &cfg.devices[0];
    assert_eq!(porch.name, "porch");
    assert_eq!(porch.format, "mjpeg");
    assert_eq!(porch.login, "admin");
    assert!(porch.motion_detection && porch.object_detection);
    assert_eq!(porch.folder, Some(PathBuf::from("/var/lib/camwatch/porch")));
    assert_eq!(
        porch.crop,
        Some(Region {
            x: 10,
            y: 20,
            width: 320,
            height: 240
        })
    );
    assert!(porch.active);

    let garage = &cfg.devices[1];
    assert_eq!(garage.format, "image");
    assert!(!garage.active);
    assert!(garage.notification.is_none());

    assert_eq!(cfg.classifier.kind, ClassifierKind::Remote);
    assert_eq!(
        cfg.classifier.url.as_deref(),
        Some("http://127.0.0.1:8500/detect")
    );
    assert_eq!(cfg.classifier.min_confidence, 0.75);
    assert_eq!(cfg.classifier.input_width, 300);
    assert_eq!(cfg.reconnect_delay, Duration::from_secs(7));
    assert_eq!(cfg.stream.read_timeout, Duration::from_secs(3));
    assert_eq!(cfg.stream.connect_timeout, Duration::from_secs(10));

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CamwatchConfig::load().expect("load defaults");
    assert!(cfg.devices.is_empty());
    assert_eq!(cfg.classifier.kind, ClassifierKind::None);
    assert_eq!(cfg.classifier.min_confidence, 0.6);
    assert_eq!(cfg.reconnect_delay, Duration::from_secs(2));
    assert_eq!(cfg.stream.read_timeout, Duration::from_secs(5));
}

#[test]
fn zero_sized_crop_means_no_crop() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{"devices": [{"name": "a", "source": "http://cam/a",
            "crop": {"x": 5, "y": 5, "width": 0, "height": 100}}]}"#,
    );
    let cfg = CamwatchConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.devices[0].crop, None);
}

#[test]
fn rejects_invalid_configurations() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        (
            r#"{"devices": [{"name": "a", "source": "http://cam/1"},
                            {"name": "a", "source": "http://cam/2"}]}"#,
            "duplicate device name",
        ),
        (
            r#"{"devices": [{"name": "", "source": "http://cam/1"}]}"#,
            "device name must not be empty",
        ),
        (
            r#"{"devices": [{"name": "a"}]}"#,
            "has no source",
        ),
        (
            r#"{"classifier": {"min_confidence": 1.5}}"#,
            "min_confidence must be within",
        ),
        (
            r#"{"classifier": {"kind": "remote"}}"#,
            "remote classifier requires a url",
        ),
        (
            r#"{"classifier": {"kind": "tract"}}"#,
            "tract classifier requires a model path",
        ),
        (
            r#"{"classifier": {"kind": "magic"}}"#,
            "unknown classifier kind",
        ),
        (
            r#"{"stream": {"read_timeout_secs": 0}}"#,
            "read timeout must be greater than zero",
        ),
    ];
    for (json, expected) in cases {
        let file = write_config(json);
        let err = CamwatchConfig::load_from(Some(file.path())).unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "expected '{}' in '{}'",
            expected,
            err
        );
    }
}

#[test]
fn malformed_env_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMWATCH_RECONNECT_DELAY_SECS", "soon");
    let err = CamwatchConfig::load_from(None).unwrap_err();
    assert!(err.to_string().contains("CAMWATCH_RECONNECT_DELAY_SECS"));

    clear_env();
}

#[test]
fn retain_devices_filters_by_name() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{"devices": [{"name": "a", "source": "http://cam/a"},
                        {"name": "b", "source": "http://cam/b"}]}"#,
    );
    let mut cfg = CamwatchConfig::load_from(Some(file.path())).expect("load config");
    cfg.retain_devices(&["b".to_string()]).expect("retain b");
    assert_eq!(cfg.devices.len(), 1);
    assert_eq!(cfg.devices[0].name, "b");

    assert!(cfg.retain_devices(&["missing".to_string()]).is_err());
}
