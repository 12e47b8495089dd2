use std::env;
use std::fs;

use tempfile::TempDir;

use mq_stress::config::CONNECTION_STRING_ENV_VAR;
use mq_stress::{lifecycle, Config, Mode, StressError};

// changes the working directory, so it stays the only test in this binary
#[test]
fn failed_connect_keeps_previous_log() {
    let dir = TempDir::new().unwrap();
    env::set_current_dir(dir.path()).unwrap();
    let previous = "Message acknowledged: Id = 0; DateTime = 2024-03-01T10:00:00.123Z; Instant = 1709287200\n";
    fs::write("sender.log", previous).unwrap();

    // nothing listens on port 1
    let config = Config::from_lookup(|key| {
        if key == CONNECTION_STRING_ENV_VAR {
            Some("amqp://127.0.0.1:1".to_owned())
        } else {
            None
        }
    })
    .unwrap();

    match lifecycle::run(Mode::Send, &config) {
        Err(StressError::Transport(_)) => {}
        other => panic!("expected a transport error, got {:?}", other),
    }
    assert_eq!(fs::read_to_string("sender.log").unwrap(), previous);
}
