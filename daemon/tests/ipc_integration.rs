/// Integration tests for IPC communication
/// These tests pin the wire shape that scripts and older clients send
/// and check that replies survive the trip back
use common::{Command, PlayerStatus, Response, ScreenSettings, ServiceError, ServiceStatus};
use std::collections::BTreeMap;

#[test]
fn test_play_command_wire_shape() {
    let cmd = Command::Play {
        video_path: "/home/user/Videos/rain.mp4".to_string(),
        screen: 1,
        pause_on_max: true,
        volume: 40,
        paused: false,
    };

    let value: serde_json::Value = serde_json::to_value(&cmd).unwrap();
    assert_eq!(value["action"], "play");
    assert_eq!(value["video_path"], "/home/user/Videos/rain.mp4");
    assert_eq!(value["screen"], 1);
    assert_eq!(value["pause_on_max"], true);

    let deserialized: Command = serde_json::from_value(value).unwrap();
    assert_eq!(deserialized, cmd);
}

#[test]
fn test_omitted_fields_take_defaults() {
    let cmd: Command =
        serde_json::from_str(r#"{"action":"play","video_path":"/v/a.mp4"}"#).unwrap();
    assert_eq!(
        cmd,
        Command::Play {
            video_path: "/v/a.mp4".to_string(),
            screen: 0,
            pause_on_max: false,
            volume: 0,
            paused: false,
        }
    );

    let cmd: Command = serde_json::from_str(r#"{"action":"stop"}"#).unwrap();
    assert_eq!(cmd, Command::Stop { screen: 0 });
}

#[test]
fn test_update_with_per_screen_settings() {
    let json = r#"{
        "action": "update",
        "per_screen": {
            "0": {"volume": 20, "speed": 1.5},
            "2": {"paused": true}
        },
        "pause_on_max": false
    }"#;

    let cmd: Command = serde_json::from_str(json).unwrap();
    match cmd {
        Command::Update {
            screen,
            per_screen,
            pause_on_max,
            volume,
            ..
        } => {
            assert_eq!(screen, None);
            assert_eq!(volume, None);
            assert_eq!(pause_on_max, Some(false));

            let per_screen = per_screen.unwrap();
            assert_eq!(per_screen["0"].volume, Some(20));
            assert_eq!(per_screen["0"].speed, Some(1.5));
            assert_eq!(per_screen["2"].paused, Some(true));
            assert!(per_screen["2"].volume.is_none());
        }
        _ => panic!("Wrong command type"),
    }
}

#[test]
fn test_update_skips_unset_fields() {
    let cmd = Command::Update {
        screen: Some(-1),
        per_screen: None,
        volume: None,
        paused: Some(true),
        pause_on_max: None,
        speed: None,
    };

    let json = serde_json::to_string(&cmd).unwrap();
    assert_eq!(json, r#"{"action":"update","screen":-1,"paused":true}"#);

    let mut per_screen = BTreeMap::new();
    per_screen.insert("1".to_string(), ScreenSettings::default());
    assert!(per_screen["1"].is_empty());
}

#[test]
fn test_simple_commands() {
    for (json, expected) in [
        (r#"{"action":"status"}"#, Command::Status),
        (r#"{"action":"ping"}"#, Command::Ping),
        (r#"{"action":"quit"}"#, Command::Quit),
    ] {
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, expected);
    }
}

#[test]
fn test_unknown_action_is_rejected() {
    assert!(serde_json::from_str::<Command>(r#"{"action":"set_wallpaper"}"#).is_err());
    assert!(serde_json::from_str::<Command>(r#"{"screen":1}"#).is_err());
    assert!(serde_json::from_str::<Command>(r#"{"action":"play"}"#).is_err());
}

#[test]
fn test_response_types() {
    for resp in [
        Response::Ok,
        Response::Pong,
        Response::Dropped("no player on screen 3".to_string()),
        Response::Error(ServiceError::Ipc("Invalid command".to_string())),
    ] {
        let json = serde_json::to_string(&resp).unwrap();
        let deserialized: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, resp);
    }
}

#[test]
fn test_status_response() {
    let resp = Response::Status(ServiceStatus {
        service: "alive".to_string(),
        version: "0.1.0".to_string(),
        uptime_secs: 42,
        players_count: 1,
        players: vec![PlayerStatus {
            screen_index: 0,
            screen_name: Some("DP-1".to_string()),
            paused: false,
            volume: 0,
            video_path: "/v/rain.mp4".to_string(),
            rate: 1.25,
            phase: "playing".to_string(),
        }],
    });

    let json = serde_json::to_string(&resp).unwrap();
    let deserialized: Response = serde_json::from_str(&json).unwrap();

    match deserialized {
        Response::Status(status) => {
            assert_eq!(status.service, "alive");
            assert_eq!(status.players_count, status.players.len());
            assert_eq!(status.players[0].screen_name.as_deref(), Some("DP-1"));
            assert_eq!(status.players[0].rate, 1.25);
        }
        _ => panic!("Wrong response type"),
    }
}

#[test]
fn test_clamping_helpers() {
    assert_eq!(common::clamp_rate(3.0), common::HARD_MAX_RATE);
    assert_eq!(common::clamp_rate(0.1), common::MIN_RATE);
    assert_eq!(common::clamp_rate(f64::NAN), 1.0);
    assert_eq!(common::clamp_volume(250), common::MAX_VOLUME);
}
