/// Integration tests for rulemover
///
/// These tests drive the assembled engine end to end against real directories:
/// 1. Rule and task lifecycle
/// 2. Moving, conflicts and byte conservation
/// 3. Failure isolation and run status
/// 4. Concurrency and cancellation
/// 5. Persistence across restarts
use rulemover::config::AppConfig;
use rulemover::engine::{Engine, MainState, RunTrigger};
use rulemover::error::ErrorKind;
use rulemover::mover::{CancelToken, MoveResult, RunReport};
use rulemover::rule::Rule;
use rulemover::task_store::{RunStatus, TaskRecord};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Barrier;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A temporary tree with a `source` and a `dest` directory.
struct TestFixture {
    temp_dir: TempDir,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(temp_dir.path().join("source")).expect("Failed to create source");
        TestFixture { temp_dir }
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn source(&self) -> PathBuf {
        self.root().join("source")
    }

    fn dest(&self) -> PathBuf {
        self.root().join("dest")
    }

    fn create_file(&self, name: &str, size: usize) {
        let content: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        fs::write(self.source().join(name), content).expect("Failed to write file");
    }

    fn create_dest_file(&self, name: &str, content: &str) {
        fs::create_dir_all(self.dest()).expect("Failed to create dest");
        fs::write(self.dest().join(name), content).expect("Failed to write dest file");
    }

    fn rule(&self, extension: &str) -> Rule {
        Rule::new(extension, self.source(), self.dest()).expect("valid rule")
    }

    /// File name to size, for one directory (non-recursive).
    fn listing(dir: &Path) -> BTreeMap<String, u64> {
        match fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .filter(|e| e.path().is_file())
                .map(|e| {
                    let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                    (e.file_name().to_string_lossy().to_string(), size)
                })
                .collect(),
            Err(_) => BTreeMap::new(),
        }
    }

    fn assert_file_exists(&self, path: &Path) {
        assert!(path.is_file(), "File should exist: {}", path.display());
    }

    fn assert_file_not_exists(&self, path: &Path) {
        assert!(!path.exists(), "File should not exist: {}", path.display());
    }
}

fn engine() -> Engine {
    Engine::assemble(&AppConfig::default()).expect("Failed to assemble engine")
}

fn run(engine: &Engine, task: &TaskRecord) -> RunReport {
    match engine
        .run_task(task.id, &CancelToken::new())
        .expect("run should start")
    {
        RunTrigger::Completed(report) => report,
        other => panic!("expected a completed run, got {:?}", other),
    }
}

// ============================================================================
// Test Suite 1: Rules and Tasks
// ============================================================================

#[test]
fn test_each_distinct_rule_gets_an_active_task() {
    let fixture = TestFixture::new();
    let engine = engine();

    for ext in ["pdf", "jpg", "png", "tar.gz"] {
        let task = engine.add_rule(fixture.rule(ext)).expect("add rule");
        assert_eq!(task.extension, ext);
        assert_eq!(task.source, fixture.source());
        assert_eq!(task.destination, fixture.dest());
        assert!(task.is_active);
    }

    assert_eq!(engine.tasks().len(), 4);
    assert_eq!(engine.rules().len(), 4);
}

#[test]
fn test_task_subscription_follows_changes() {
    let fixture = TestFixture::new();
    let engine = engine();
    let mut tasks = engine.subscribe_tasks();

    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");
    assert_eq!(*tasks.borrow_and_update(), vec![task.clone()]);

    engine.remove_task(task.id).expect("remove");
    assert!(tasks.has_changed().expect("store alive"));
    assert!(tasks.borrow_and_update().is_empty());
}

// ============================================================================
// Test Suite 2: Moving Files
// ============================================================================

#[test]
fn test_scenario_mixed_directory() {
    let fixture = TestFixture::new();
    fixture.create_file("a.pdf", 10 * 1024);
    fixture.create_file("b.pdf", 0);
    fixture.create_file("c.txt", 5 * 1024);
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");

    let report = run(&engine, &task);

    assert_eq!(report.status, RunStatus::PartiallyFailed);
    assert_eq!(report.outcomes.len(), 2);
    for outcome in &report.outcomes {
        match outcome.candidate.file_name().as_str() {
            "a.pdf" => assert!(outcome.is_success()),
            "b.pdf" => assert_eq!(outcome.result, MoveResult::Failed(ErrorKind::EmptyContent)),
            other => panic!("unexpected candidate {}", other),
        }
    }

    fixture.assert_file_exists(&fixture.dest().join("a.pdf"));
    fixture.assert_file_not_exists(&fixture.source().join("a.pdf"));
    fixture.assert_file_exists(&fixture.source().join("b.pdf"));
    fixture.assert_file_exists(&fixture.source().join("c.txt"));

    let stats = engine.stats(task.id);
    assert_eq!(stats.files_moved, 1);
    assert_eq!(stats.bytes_moved, 10240);
    assert_eq!(stats.failures, 1);
    assert_eq!(
        engine.task_status(task.id).expect("status"),
        RunStatus::PartiallyFailed
    );
    // Per-file failures do not surface as an error state.
    assert!(matches!(
        *engine.subscribe_state().borrow(),
        MainState::Success(_)
    ));
}

#[test]
fn test_scenario_name_collision() {
    let fixture = TestFixture::new();
    fixture.create_dest_file("a.pdf", "already here");
    fixture.create_file("a.pdf", 64);
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");

    let report = run(&engine, &task);

    assert_eq!(report.status, RunStatus::Succeeded);
    fixture.assert_file_exists(&fixture.dest().join("a(1).pdf"));
    fixture.assert_file_not_exists(&fixture.source().join("a.pdf"));
    assert_eq!(
        fs::read_to_string(fixture.dest().join("a.pdf")).expect("read"),
        "already here"
    );
    assert_eq!(
        fs::metadata(fixture.dest().join("a(1).pdf")).expect("meta").len(),
        64
    );
}

#[test]
fn test_repeated_collisions_stay_unique() {
    let fixture = TestFixture::new();
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");

    for _ in 0..4 {
        fixture.create_file("report.pdf", 10);
        run(&engine, &task);
    }

    let names: Vec<String> = TestFixture::listing(&fixture.dest()).into_keys().collect();
    assert_eq!(
        names,
        vec!["report(1).pdf", "report(2).pdf", "report(3).pdf", "report.pdf"]
    );
}

#[test]
fn test_moved_set_matches_source_set() {
    let fixture = TestFixture::new();
    for i in 0..25 {
        fixture.create_file(&format!("doc_{}.PDF", i), 100 + i * 37);
    }
    fixture.create_file("notes.txt", 50);
    let before: BTreeMap<String, u64> = TestFixture::listing(&fixture.source())
        .into_iter()
        .filter(|(name, _)| name.ends_with(".PDF"))
        .collect();
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");

    let report = run(&engine, &task);

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(TestFixture::listing(&fixture.dest()), before);
    let total: u64 = before.values().sum();
    assert_eq!(engine.stats(task.id).bytes_moved, total);
    assert_eq!(
        TestFixture::listing(&fixture.source()).into_keys().collect::<Vec<_>>(),
        vec!["notes.txt"]
    );
}

#[test]
fn test_second_run_on_empty_source_succeeds() {
    let fixture = TestFixture::new();
    fixture.create_file("a.pdf", 10);
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");

    assert_eq!(run(&engine, &task).status, RunStatus::Succeeded);
    let second = run(&engine, &task);

    assert_eq!(second.status, RunStatus::Succeeded);
    assert!(second.outcomes.is_empty());
    assert_eq!(engine.stats(task.id).files_moved, 1);
}

#[test]
fn test_destination_created_on_demand() {
    let fixture = TestFixture::new();
    fixture.create_file("a.pdf", 10);
    let engine = engine();
    let nested = fixture.root().join("deep").join("er").join("dest");
    let task = engine
        .add_rule(Rule::new("pdf", fixture.source(), &nested).expect("valid rule"))
        .expect("add rule");

    run(&engine, &task);

    fixture.assert_file_exists(&nested.join("a.pdf"));
}

// ============================================================================
// Test Suite 3: Failures
// ============================================================================

#[test]
fn test_scenario_missing_source() {
    let fixture = TestFixture::new();
    let engine = engine();
    let task = engine
        .add_rule(
            Rule::new("pdf", fixture.root().join("nowhere"), fixture.dest()).expect("valid rule"),
        )
        .expect("add rule");

    let report = run(&engine, &task);

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.outcomes.is_empty());
    assert_eq!(
        report.setup_failure.as_ref().map(|f| &f.kind),
        Some(&ErrorKind::NoFileFound)
    );
    assert_eq!(engine.task_status(task.id).expect("status"), RunStatus::Failed);
    assert!(matches!(
        *engine.subscribe_state().borrow(),
        MainState::Error(_)
    ));
    assert_eq!(engine.recent_errors().len(), 1);
}

#[test]
fn test_unwritable_destination_fails_every_candidate() {
    let fixture = TestFixture::new();
    fixture.create_file("a.pdf", 10);
    fixture.create_file("b.pdf", 10);
    // A regular file where the destination directory should be.
    fs::write(fixture.dest(), "blocker").expect("write blocker");
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");

    let report = run(&engine, &task);

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.outcomes.len(), 2);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.result == MoveResult::Failed(ErrorKind::DestinationUnwritable))
    );
    fixture.assert_file_exists(&fixture.source().join("a.pdf"));
    assert_eq!(engine.stats(task.id).failures, 2);
}

// ============================================================================
// Test Suite 4: Concurrency and Cancellation
// ============================================================================

#[test]
fn test_concurrent_triggers_move_each_file_once() {
    let fixture = TestFixture::new();
    for i in 0..40 {
        fixture.create_file(&format!("f{}.pdf", i), 256);
    }
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");
    let cancel = CancelToken::new();
    let mut second: Option<RunTrigger> = None;

    // The second trigger comes from another thread while the first run is between
    // two files, so the two runs overlap.
    let first = engine
        .run_task_with(task.id, &cancel, |_| {
            if second.is_none() {
                let trigger = std::thread::scope(|s| {
                    s.spawn(|| engine.run_task(task.id, &cancel))
                        .join()
                        .expect("thread panicked")
                });
                second = Some(trigger.expect("run"));
            }
        })
        .expect("run");

    assert!(matches!(second, Some(RunTrigger::AlreadyRunning)));
    let report = first.report().expect("completed");
    assert_eq!(report.outcomes.len(), 40);
    assert!(report.outcomes.iter().all(|o| o.is_success()));
    assert_eq!(engine.stats(task.id).files_moved, 40);
    assert_eq!(engine.stats(task.id).failures, 0);
    assert_eq!(TestFixture::listing(&fixture.dest()).len(), 40);
    assert_eq!(engine.task_status(task.id).expect("status"), RunStatus::Succeeded);
}

#[test]
fn test_simultaneous_triggers_never_double_process() {
    let fixture = TestFixture::new();
    for i in 0..40 {
        fixture.create_file(&format!("f{}.pdf", i), 256);
    }
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");
    let barrier = Barrier::new(2);
    let cancel = CancelToken::new();

    let triggers: Vec<RunTrigger> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    engine.run_task(task.id, &cancel).expect("run")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .collect()
    });

    let outcomes: usize = triggers
        .iter()
        .filter_map(RunTrigger::report)
        .map(|r| r.outcomes.len())
        .sum();
    assert_eq!(outcomes, 40);
    assert_eq!(engine.stats(task.id).files_moved, 40);
}

#[test]
fn test_cancel_mid_run_keeps_remaining_files() {
    let fixture = TestFixture::new();
    for i in 0..5 {
        fixture.create_file(&format!("f{}.pdf", i), 100);
    }
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");
    let cancel = CancelToken::new();
    let mut seen = 0;

    let trigger = engine
        .run_task_with(task.id, &cancel, |_| {
            seen += 1;
            if seen == 2 {
                cancel.cancel();
            }
        })
        .expect("run");
    let report = trigger.report().expect("completed");

    assert!(report.cancelled);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(TestFixture::listing(&fixture.dest()).len(), 2);
    assert_eq!(TestFixture::listing(&fixture.source()).len(), 3);
    assert!(
        TestFixture::listing(&fixture.dest())
            .values()
            .all(|size| *size == 100)
    );
    assert_eq!(engine.stats(task.id).files_moved, 2);
}

#[test]
fn test_run_all_runs_every_active_task() {
    let fixture = TestFixture::new();
    fixture.create_file("a.pdf", 10);
    fixture.create_file("b.jpg", 20);
    fixture.create_file("c.png", 30);
    let engine = engine();
    let pdf = engine.add_rule(fixture.rule("pdf")).expect("add");
    let jpg = engine.add_rule(fixture.rule("jpg")).expect("add");
    let png = engine.add_rule(fixture.rule("png")).expect("add");
    engine.set_task_active(png.id, false).expect("disable");

    let results = engine.run_all(&CancelToken::new());

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(engine.stats(pdf.id).bytes_moved, 10);
    assert_eq!(engine.stats(jpg.id).bytes_moved, 20);
    assert_eq!(engine.stats(png.id).files_moved, 0);
    fixture.assert_file_exists(&fixture.source().join("c.png"));
}

#[test]
fn test_cancelled_run_leaves_files_in_place() {
    let fixture = TestFixture::new();
    fixture.create_file("a.pdf", 10);
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");
    let cancel = CancelToken::new();
    cancel.cancel();

    let trigger = engine.run_task(task.id, &cancel).expect("run");
    let report = trigger.report().expect("completed");

    assert!(report.cancelled);
    assert!(report.outcomes.is_empty());
    fixture.assert_file_exists(&fixture.source().join("a.pdf"));
    assert_eq!(engine.task_status(task.id).expect("status"), RunStatus::Succeeded);
}

// ============================================================================
// Test Suite 5: Persistence and Configuration
// ============================================================================

#[test]
fn test_state_survives_restart() {
    let fixture = TestFixture::new();
    fixture.create_file("a.pdf", 99);
    let config = AppConfig::parse(&format!(
        "[storage]\ndata_dir = {:?}\n",
        fixture.root().join("state")
    ))
    .expect("valid config");

    let task_id = {
        let engine = Engine::assemble(&config).expect("assemble");
        let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");
        run(&engine, &task);
        task.id
    };

    let engine = Engine::assemble(&config).expect("reassemble");
    let task = engine.task(task_id).expect("task persisted");
    assert_eq!(task.extension, "pdf");
    assert_eq!(engine.stats(task_id).bytes_moved, 99);
    assert_eq!(engine.rules()[0].task_id, Some(task_id));

    let next = engine.add_rule(fixture.rule("jpg")).expect("add rule");
    assert!(next.id > task_id);
}

#[test]
fn test_error_log_survives_restart() {
    let fixture = TestFixture::new();
    fixture.create_file("a.pdf", 10);
    fixture.create_file("b.pdf", 0);
    let config = AppConfig::parse(&format!(
        "[storage]\ndata_dir = {:?}\n",
        fixture.root().join("state")
    ))
    .expect("valid config");

    let logged = {
        let engine = Engine::assemble(&config).expect("assemble");
        let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");
        run(&engine, &task);
        engine.recent_errors()
    };
    assert_eq!(logged.len(), 1);

    let engine = Engine::assemble(&config).expect("reassemble");
    let errors = engine.recent_errors();
    assert_eq!(errors, logged);
    assert_eq!(errors[0].kind, ErrorKind::EmptyContent);
    assert!(errors[0].context.ends_with("b.pdf"));
}

#[test]
fn test_deleted_task_id_not_reused_after_restart() {
    let fixture = TestFixture::new();
    let config = AppConfig::parse(&format!(
        "[storage]\ndata_dir = {:?}\n",
        fixture.root().join("state")
    ))
    .expect("valid config");

    let (kept, removed) = {
        let engine = Engine::assemble(&config).expect("assemble");
        let kept = engine.add_rule(fixture.rule("pdf")).expect("add rule");
        let last = engine.add_rule(fixture.rule("jpg")).expect("add rule");
        engine.remove_task(last.id).expect("remove");
        (kept, last)
    };

    let engine = Engine::assemble(&config).expect("reassemble");
    let next = engine.add_rule(fixture.rule("png")).expect("add rule");
    assert!(next.id > removed.id);
    assert_eq!(engine.tasks(), vec![kept, next]);
}

#[test]
fn test_configured_rules_and_filters() {
    let fixture = TestFixture::new();
    fixture.create_file("keep.pdf.part", 10);
    fixture.create_file("movie.part.pdf", 10);
    fixture.create_file(".hidden.pdf", 10);
    fixture.create_file("real.pdf", 10);
    let config = AppConfig::parse(&format!(
        "[scan]\nexclude = [\"*.part.*\"]\n\n[[rules]]\nextension = \"pdf\"\nsource = {:?}\ndestination = {:?}\n",
        fixture.source(),
        fixture.dest()
    ))
    .expect("valid config");
    let engine = Engine::assemble(&config).expect("assemble");
    let task = engine.tasks()[0].clone();

    let report = run(&engine, &task);

    assert_eq!(report.outcomes.len(), 1);
    fixture.assert_file_exists(&fixture.dest().join("real.pdf"));
    fixture.assert_file_exists(&fixture.source().join("movie.part.pdf"));
    fixture.assert_file_exists(&fixture.source().join(".hidden.pdf"));
    fixture.assert_file_exists(&fixture.source().join("keep.pdf.part"));
}

#[test]
fn test_dry_run_plans_without_moving() {
    let fixture = TestFixture::new();
    fixture.create_dest_file("a.pdf", "x");
    fixture.create_file("a.pdf", 10);
    let engine = engine();
    let task = engine.add_rule(fixture.rule("pdf")).expect("add rule");

    let plan = engine.plan_task(task.id).expect("plan");

    assert_eq!(plan.len(), 1);
    fixture.assert_file_exists(&fixture.source().join("a.pdf"));
    fixture.assert_file_not_exists(&fixture.dest().join("a(1).pdf"));
    assert_eq!(engine.stats(task.id).files_moved, 0);
}
