//! Common test utilities

#![allow(dead_code)]

use command_expect::{Command, InteractiveProcess, ProcessConfig};
use std::time::Duration;

/// Install a test-friendly subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// Config with short timeouts so failing tests fail fast
pub fn quick_config() -> ProcessConfig {
    ProcessConfig::default()
        .with_stop_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(20))
}

/// Spawn `sh -c <script>` as an interactive session
pub fn spawn_sh(script: &str) -> InteractiveProcess {
    init_tracing();
    InteractiveProcess::spawn_with_config(Command::shell(script), quick_config())
        .expect("failed to spawn shell")
}

/// Returns true if a process with this pid still exists
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
