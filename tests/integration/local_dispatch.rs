//! End-to-end tests for the local dispatch backend, foreground and
//! background.

use super::test_utils::{write_command_script, write_render_comp_script};
use frameflow::context::Context;
use frameflow::dispatcher::local::{JobPool, JobStatus, LocalDispatcher};
use frameflow::dispatcher::registry;
use frameflow::dispatcher::{Dispatcher, FramesMode, SCRIPT_FILE_NAME};
use frameflow::script::Script;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn own_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_frameflow"))
}

struct Fixture {
    _temp: TempDir,
    out_dir: PathBuf,
    jobs_dir: PathBuf,
    graph: Arc<frameflow::graph::TaskGraph>,
}

fn fixture(write_script: impl Fn(&Path, &Path)) -> Fixture {
    let temp = TempDir::new().unwrap();
    let out_dir = temp.path().join("out");
    let jobs_dir = temp.path().join("jobs");
    std::fs::create_dir_all(&out_dir).unwrap();

    let script_path = temp.path().join("script.json");
    write_script(&script_path, &out_dir);
    let graph = Arc::new(Script::load(&script_path).unwrap().build().unwrap());

    Fixture {
        _temp: temp,
        out_dir,
        jobs_dir,
        graph,
    }
}

fn dispatcher_for(fixture: &Fixture, frames: &str) -> LocalDispatcher {
    let mut dispatcher = LocalDispatcher::with_pool(Arc::new(JobPool::new()));
    dispatcher.settings_mut().jobs_directory = fixture.jobs_dir.display().to_string();
    dispatcher.settings_mut().job_name = "it".to_string();
    dispatcher.settings_mut().frames_mode = FramesMode::CustomRange;
    dispatcher.settings_mut().frame_range = frames.to_string();
    dispatcher
}

#[test]
fn test_foreground_dispatch_runs_all_frames() {
    let fixture = fixture(write_render_comp_script);
    let mut dispatcher = dispatcher_for(&fixture, "1-3");

    let comp = fixture.graph.by_name("comp").unwrap();
    dispatcher
        .dispatch(&fixture.graph, &[comp], &Context::new(1))
        .unwrap();

    for frame in 1..=3 {
        assert!(fixture.out_dir.join(format!("render.{}", frame)).is_file());
        assert!(fixture.out_dir.join(format!("comp.{}", frame)).is_file());
    }

    // The job directory holds the script snapshot.
    let job_dir = fixture.jobs_dir.join("it").join("000000");
    assert!(job_dir.join(SCRIPT_FILE_NAME).is_file());

    let jobs = dispatcher.job_pool().jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status(), JobStatus::Complete);
}

#[test]
fn test_background_dispatch_returns_before_completion() {
    let fixture = fixture(write_render_comp_script);
    let mut dispatcher = dispatcher_for(&fixture, "1-2");
    dispatcher.local_settings_mut().execute_in_background = true;
    dispatcher.local_settings_mut().executable = Some(own_binary());

    let comp = fixture.graph.by_name("comp").unwrap();
    dispatcher
        .dispatch(&fixture.graph, &[comp], &Context::new(1))
        .unwrap();

    dispatcher.job_pool().wait_for_all();

    let jobs = dispatcher.job_pool().jobs();
    assert_eq!(jobs[0].status(), JobStatus::Complete);
    for frame in 1..=2 {
        assert!(fixture.out_dir.join(format!("render.{}", frame)).is_file());
        assert!(fixture.out_dir.join(format!("comp.{}", frame)).is_file());
    }
}

#[test]
fn test_background_failure_skips_downstream() {
    let fixture = fixture(|script_path, out_dir| {
        let mut script = Script::new();
        script.add(frameflow::script::NodeDef {
            name: "broken".to_string(),
            kind: frameflow::script::NodeKind::SystemCommand {
                command: "exit 3".to_string(),
            },
            pre_tasks: Vec::new(),
            post_tasks: Vec::new(),
        });
        script.add(frameflow::script::NodeDef {
            name: "after".to_string(),
            kind: frameflow::script::NodeKind::SystemCommand {
                command: format!("touch {}/after.${{frame}}", out_dir.display()),
            },
            pre_tasks: vec!["broken".to_string()],
            post_tasks: Vec::new(),
        });
        script.save(script_path).unwrap();
    });
    let mut dispatcher = dispatcher_for(&fixture, "1");
    dispatcher.local_settings_mut().execute_in_background = true;
    dispatcher.local_settings_mut().executable = Some(own_binary());

    let after = fixture.graph.by_name("after").unwrap();
    dispatcher
        .dispatch(&fixture.graph, &[after], &Context::new(1))
        .unwrap();
    dispatcher.job_pool().wait_for_all();

    assert_eq!(dispatcher.job_pool().jobs()[0].status(), JobStatus::Failed);
    assert!(!fixture.out_dir.join("after.1").exists());
}

#[test]
fn test_kill_stops_a_running_job() {
    let fixture = fixture(|script_path, _out_dir| {
        write_command_script(script_path, "slow", "sleep 30");
    });
    let mut dispatcher = dispatcher_for(&fixture, "1");
    dispatcher.local_settings_mut().execute_in_background = true;
    dispatcher.local_settings_mut().executable = Some(own_binary());

    let slow = fixture.graph.by_name("slow").unwrap();
    dispatcher
        .dispatch(&fixture.graph, &[slow], &Context::new(1))
        .unwrap();

    let job = dispatcher.job_pool().jobs().remove(0);

    // Give the controller thread a moment to launch the subprocess.
    let deadline = Instant::now() + Duration::from_secs(5);
    while job.status() == JobStatus::Waiting && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let started = Instant::now();
    job.kill();
    job.wait();

    assert_eq!(job.status(), JobStatus::Killed);
    // Killing must not wait out the sleep.
    assert!(started.elapsed() < Duration::from_secs(20));
}

#[test]
fn test_text_dispatcher_registered_alongside_local() {
    registry::register_builtin_dispatchers();
    let names = registry::registered_dispatchers();
    assert!(names.contains(&"Local".to_string()));
    assert!(names.contains(&"Text".to_string()));

    let fixture = fixture(write_render_comp_script);
    let mut dispatcher = registry::create("Text").unwrap();
    dispatcher.settings_mut().jobs_directory = fixture.jobs_dir.display().to_string();
    dispatcher.settings_mut().job_name = "report".to_string();

    let comp = fixture.graph.by_name("comp").unwrap();
    dispatcher
        .dispatch(&fixture.graph, &[comp], &Context::new(7))
        .unwrap();

    let report = std::fs::read_to_string(
        fixture
            .jobs_dir
            .join("report")
            .join("000000")
            .join("job.txt"),
    )
    .unwrap();
    assert!(report.contains("comp"));
    assert!(report.contains("render"));
    // Nothing executed.
    assert!(!fixture.out_dir.join("render.7").exists());
}
