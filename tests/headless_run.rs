use std::io::Write;
use xr_cubes::config::AppConfig;
use xr_cubes::{run_headless, DEFAULT_HEADLESS_FRAMES};

#[test]
fn default_config_renders_the_headless_frame_budget() {
    let control = run_headless(&AppConfig::default()).unwrap();
    assert!(!control.exit_loop);
    assert!(!control.request_restart);
    assert!(DEFAULT_HEADLESS_FRAMES > 0);
}

#[test]
fn config_file_drives_a_headless_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "session": {{ "visualized_spaces": ["view", "stageleftrotated"] }},
            "renderer": {{ "fence_wait_attempts": 2 }},
            "driver": {{ "max_frames": 1 }}
        }}"#
    )
    .unwrap();

    let config = AppConfig::resolve(Some(file.path())).unwrap();
    assert_eq!(config.driver.max_frames, Some(1));
    let control = run_headless(&config).unwrap();
    assert!(!control.exit_loop);
}

#[test]
fn empty_space_list_still_runs() {
    let mut config = AppConfig::default();
    config.session.visualized_spaces.clear();
    config.driver.max_frames = Some(2);
    assert!(run_headless(&config).is_ok());
}
