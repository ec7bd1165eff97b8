//! Tests for one-shot processes and their lifecycle hooks

#![cfg(unix)]

mod common;

use command_expect::{
    Disposable, DisposableProcess, Error, LaunchArgs, LaunchOptions, LifecycleState,
};
use std::sync::{Arc, Mutex};

type Calls = Arc<Mutex<Vec<&'static str>>>;

struct Recorder {
    args: Option<LaunchArgs>,
    calls: Calls,
    fail_before_join: bool,
    fail_after_join: bool,
}

impl Recorder {
    fn new(args: impl Into<LaunchArgs>) -> Self {
        Self {
            args: Some(args.into()),
            calls: Calls::default(),
            fail_before_join: false,
            fail_after_join: false,
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }
}

impl Disposable for Recorder {
    fn on_pre_start(&mut self) -> command_expect::Result<()> {
        self.record("pre_start");
        Ok(())
    }

    fn resolve_args(&mut self) -> Option<LaunchArgs> {
        self.record("resolve_args");
        self.args.clone()
    }

    fn resolve_options(&mut self) -> LaunchOptions {
        self.record("resolve_options");
        LaunchOptions::default()
    }

    fn on_before_launch(&mut self) -> command_expect::Result<()> {
        self.record("before_launch");
        Ok(())
    }

    fn on_after_launch(&mut self) -> command_expect::Result<()> {
        self.record("after_launch");
        Ok(())
    }

    fn on_before_join(&mut self) -> command_expect::Result<()> {
        self.record("before_join");
        if self.fail_before_join {
            return Err(Error::InvalidArgument("refusing to join".into()));
        }
        Ok(())
    }

    fn on_after_join(&mut self) -> command_expect::Result<()> {
        self.record("after_join");
        if self.fail_after_join {
            return Err(Error::InvalidArgument("rejecting output".into()));
        }
        Ok(())
    }
}

#[test]
fn test_hooks_run_in_order() {
    common::init_tracing();
    let mut process = DisposableProcess::new(Recorder::new(&["true"][..]));

    process.start().unwrap();
    assert_eq!(process.state(), LifecycleState::Started);
    process.join().unwrap();
    assert_eq!(process.state(), LifecycleState::Joined);

    assert_eq!(
        process.inner().calls(),
        vec![
            "pre_start",
            "resolve_args",
            "resolve_options",
            "before_launch",
            "after_launch",
            "before_join",
            "after_join",
        ]
    );
}

#[test]
fn test_join_before_start_does_nothing() {
    let mut process = DisposableProcess::new(Recorder::new("true"));

    process.join().unwrap();

    assert_eq!(process.state(), LifecycleState::Created);
    assert_eq!(process.returncode(), None);
    assert!(process.inner().calls().is_empty());
}

#[test]
fn test_second_start_is_rejected_after_pre_start() {
    let mut process = DisposableProcess::new(Recorder::new("true"));
    process.start().unwrap();

    let err = process.start().unwrap_err();
    assert!(matches!(err, Error::AlreadyStarted));
    assert!(err.is_usage());

    let calls = process.inner().calls();
    assert_eq!(calls.iter().filter(|c| **c == "pre_start").count(), 2);
    assert_eq!(calls.iter().filter(|c| **c == "resolve_args").count(), 1);
    process.join().unwrap();
}

#[test]
fn test_second_join_is_noop() {
    let mut process = DisposableProcess::new(Recorder::new("true"));
    process.start().unwrap();
    process.join().unwrap();
    process.join().unwrap();

    let calls = process.inner().calls();
    assert_eq!(calls.iter().filter(|c| **c == "after_join").count(), 1);
}

#[test]
fn test_run_captures_output() {
    let mut process = DisposableProcess::new(Recorder::new(&["echo", "hello"][..]));

    let completed = process.run().unwrap();

    assert_eq!(completed.returncode, 0);
    assert!(completed.success());
    assert_eq!(completed.stdout, "hello\n");
    assert_eq!(completed.stderr, "");
    assert_eq!(completed.args, LaunchArgs::argv(["echo", "hello"]));
}

#[test]
fn test_run_shell_with_exit_code_and_stderr() {
    let mut process = DisposableProcess::new(Recorder::new("echo out; echo err >&2; exit 3"));

    let completed = process.run().unwrap();

    assert_eq!(completed.returncode, 3);
    assert!(!completed.success());
    assert_eq!(completed.stdout, "out\n");
    assert_eq!(completed.stderr, "err\n");
    assert_eq!(process.returncode(), Some(3));
    assert_eq!(process.stdout(), Some("out\n"));
}

#[test]
fn test_failed_join_kills_child_and_records_state() {
    let mut recorder = Recorder::new(&["sleep", "30"][..]);
    recorder.fail_before_join = true;
    let mut process = DisposableProcess::new(recorder);
    process.start().unwrap();
    let pid = process.pid().unwrap();

    let err = process.join().unwrap_err();

    assert!(matches!(err, Error::ChildProcess { .. }));
    assert!(err.to_string().contains("refusing to join"));
    assert_eq!(process.state(), LifecycleState::Joined);
    assert_eq!(process.returncode(), Some(-9));
    assert!(!common::is_alive(pid));
    assert!(!process.inner().calls().contains(&"after_join"));
}

#[test]
fn test_failed_after_join_keeps_exit_code() {
    let mut recorder = Recorder::new("echo done; exit 5");
    recorder.fail_after_join = true;
    let mut process = DisposableProcess::new(recorder);
    process.start().unwrap();

    let err = process.join().unwrap_err();

    assert!(matches!(err, Error::ChildProcess { .. }));
    assert!(err.to_string().contains("rejecting output"));
    assert_eq!(process.state(), LifecycleState::Joined);
    // Exited on its own before the hook failed, so no signal was involved.
    assert_eq!(process.returncode(), Some(5));
    assert_eq!(process.stdout(), Some("done\n"));
}

#[test]
fn test_missing_args_fails_start() {
    let mut recorder = Recorder::new("true");
    recorder.args = None;
    let mut process = DisposableProcess::new(recorder);

    let err = process.run().unwrap_err();

    assert!(matches!(err, Error::MissingArgs));
    assert_eq!(process.state(), LifecycleState::Created);
    assert!(!process.inner().calls().contains(&"before_launch"));
}

#[test]
fn test_empty_args_fail_start() {
    let mut process = DisposableProcess::new(Recorder::new(Vec::<String>::new()));
    assert!(matches!(process.start().unwrap_err(), Error::MissingArgs));
}

#[test]
fn test_spawn_failure_is_reported() {
    let mut process =
        DisposableProcess::new(Recorder::new(&["this_command_does_not_exist_12345"][..]));

    let err = process.start().unwrap_err();

    assert!(matches!(err, Error::SpawnFailed { .. }));
    assert_eq!(process.state(), LifecycleState::Created);
}

struct WithEnv;

impl Disposable for WithEnv {
    fn resolve_args(&mut self) -> Option<LaunchArgs> {
        Some("printf '%s|%s' \"$GREETING\" \"$(pwd)\"".into())
    }

    fn resolve_options(&mut self) -> LaunchOptions {
        let mut options = LaunchOptions::default();
        options.env.insert("GREETING".into(), "hi".into());
        options.current_dir = Some("/".into());
        options
    }
}

#[test]
fn test_options_set_env_and_dir() {
    let mut process = DisposableProcess::new(WithEnv);

    let completed = process.run().unwrap();

    assert_eq!(completed.stdout, "hi|/");
}
