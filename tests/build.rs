//! Integration tests driving Work end to end against an in-memory
//! filesystem and an executor that simulates command effects.

use ebb::build_log::BuildLog;
use ebb::fs::{FileSystem, MTime};
use ebb::graph::{EdgeId, RspFile};
use ebb::load;
use ebb::progress::SilentProgress;
use ebb::task::{Executor, FinishedTask, TaskResult, Termination};
use ebb::work::{Options, Work};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Instant;

/// Shared in-memory disk: path -> (content, mtime).
#[derive(Clone, Default)]
struct Disk(Rc<RefCell<HashMap<String, (String, u64)>>>);

impl Disk {
    fn add(&self, path: &str, content: &str, mtime: u64) {
        self.0
            .borrow_mut()
            .insert(path.to_string(), (content.to_string(), mtime));
    }

    fn exists(&self, path: &str) -> bool {
        self.0.borrow().contains_key(path)
    }

    fn mtime(&self, path: &str) -> Option<u64> {
        self.0.borrow().get(path).map(|&(_, t)| t)
    }
}

struct TestFileSystem(Disk);

impl FileSystem for TestFileSystem {
    fn read(&self, path: &str) -> std::io::Result<Vec<u8>> {
        match self.0 .0.borrow().get(path) {
            Some((content, _)) => Ok(content.clone().into_bytes()),
            None => Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
        }
    }

    fn stat(&self, path: &str) -> std::io::Result<MTime> {
        Ok(match self.0 .0.borrow().get(path) {
            Some(&(_, mtime)) => MTime::Stamp(mtime),
            None => MTime::Missing,
        })
    }
}

/// An Executor that interprets a tiny command language instead of spawning
/// processes:
///   "touch a b c"  touch the named paths at the next clock tick
///   "keep"         succeed without changing anything
///   "fail"         fail
struct TestExecutor {
    disk: Disk,
    clock: Rc<RefCell<u64>>,
    queue: VecDeque<(EdgeId, String)>,
    parallelism: usize,
}

impl TestExecutor {
    fn new(disk: Disk, clock: Rc<RefCell<u64>>, parallelism: usize) -> Self {
        TestExecutor {
            disk,
            clock,
            queue: VecDeque::new(),
            parallelism,
        }
    }
}

impl Executor for TestExecutor {
    fn can_start_more(&self) -> bool {
        self.queue.len() < self.parallelism
    }

    fn is_running(&self) -> bool {
        !self.queue.is_empty()
    }

    fn start(&mut self, edge: EdgeId, cmdline: String, _rspfile: Option<RspFile>) {
        self.queue.push_back((edge, cmdline));
    }

    fn wait(&mut self) -> FinishedTask {
        let (edge, cmdline) = self.queue.pop_front().unwrap();
        let termination = if let Some(paths) = cmdline.strip_prefix("touch ") {
            let mut clock = self.clock.borrow_mut();
            *clock += 1;
            for path in paths.split_whitespace() {
                self.disk.add(path, "", *clock);
            }
            Termination::Success
        } else if cmdline.starts_with("keep") {
            Termination::Success
        } else {
            Termination::Failure
        };
        let now = Instant::now();
        FinishedTask {
            edge,
            span: (now, now),
            result: TaskResult {
                termination,
                output: Vec::new(),
            },
        }
    }
}

struct TestSpace {
    disk: Disk,
    clock: Rc<RefCell<u64>>,
    log: BuildLog,
}

impl TestSpace {
    fn new(build_file: &str) -> Self {
        let disk = Disk::default();
        disk.add("build.ninja", build_file, 1);
        TestSpace {
            disk,
            clock: Rc::new(RefCell::new(1)),
            log: BuildLog::new(),
        }
    }

    /// Load the build file and build the target, returning the task count
    /// (None means failure).
    fn build(&mut self, target: &str, options: Options) -> anyhow::Result<Option<usize>> {
        let fs = TestFileSystem(self.disk.clone());
        let loaded = load::read(&fs, "build.ninja")?;
        self.log.set_dry_run(options.dry_run);
        let mut executor =
            TestExecutor::new(self.disk.clone(), self.clock.clone(), options.parallelism);
        let mut progress = SilentProgress::default();
        let mut work = Work::new(
            &loaded.state,
            &fs,
            &mut self.log,
            &mut executor,
            &mut progress,
            options,
        );
        work.want_file(target)?;
        work.run()
    }
}

const TOUCH_BUILD: &str = "
rule touch
  command = touch $out

build out: touch in
";

#[test]
fn basic_build_then_clean() -> anyhow::Result<()> {
    let mut space = TestSpace::new(TOUCH_BUILD);
    space.disk.add("in", "", 1);

    assert_eq!(space.build("out", Options::default())?, Some(1));
    assert!(space.disk.exists("out"));

    // Nothing changed: the second build does no work.
    assert_eq!(space.build("out", Options::default())?, Some(0));
    Ok(())
}

#[test]
fn input_change_rebuilds() -> anyhow::Result<()> {
    let mut space = TestSpace::new(TOUCH_BUILD);
    space.disk.add("in", "", 1);
    assert_eq!(space.build("out", Options::default())?, Some(1));

    // Touch the input past the output's mtime.
    let newer = space.disk.mtime("out").unwrap() + 1;
    space.disk.add("in", "", newer);
    assert_eq!(space.build("out", Options::default())?, Some(1));
    Ok(())
}

#[test]
fn command_change_rebuilds() -> anyhow::Result<()> {
    let mut space = TestSpace::new(TOUCH_BUILD);
    space.disk.add("in", "", 1);
    assert_eq!(space.build("out", Options::default())?, Some(1));

    // Same graph, different command: must rebuild even though mtimes
    // say clean.
    space.disk.add(
        "build.ninja",
        "
rule touch
  command = touch --force $out

build out: touch in
",
        1,
    );
    assert_eq!(space.build("out", Options::default())?, Some(1));
    // (the fake executor still understands the touch prefix)
    assert_eq!(space.build("out", Options::default())?, Some(0));
    Ok(())
}

#[test]
fn chain_builds_in_order() -> anyhow::Result<()> {
    let mut space = TestSpace::new(
        "
rule touch
  command = touch $out

build mid: touch in
build out: touch mid
",
    );
    space.disk.add("in", "", 1);
    assert_eq!(space.build("out", Options::default())?, Some(2));
    assert!(space.disk.mtime("out").unwrap() > space.disk.mtime("mid").unwrap());
    Ok(())
}

#[test]
fn restat_skips_downstream() -> anyhow::Result<()> {
    let mut space = TestSpace::new(
        "
rule gen
  command = keep $out
  restat = 1

rule touch
  command = touch $out

build mid: gen in
build out: touch mid
",
    );
    // A previous build produced mid and out; now in is newer than mid.
    space.disk.add("in", "", 5);
    space.disk.add("mid", "", 2);
    space.disk.add("out", "", 3);
    space.log.record_entry("out", "touch out", 0, 0, 0);

    // The gen edge runs but changes nothing, so out is skipped.
    assert_eq!(space.build("out", Options::default())?, Some(1));
    assert_eq!(space.disk.mtime("mid"), Some(2));
    assert_eq!(space.disk.mtime("out"), Some(3));

    // The recorded restat mtime keeps the whole chain stable next run.
    assert_eq!(space.build("out", Options::default())?, Some(0));
    Ok(())
}

#[test]
fn dry_run_changes_nothing() -> anyhow::Result<()> {
    let mut space = TestSpace::new(TOUCH_BUILD);
    space.disk.add("in", "", 1);

    let options = Options {
        dry_run: true,
        ..Options::default()
    };
    assert_eq!(space.build("out", options)?, Some(1));
    assert!(!space.disk.exists("out"));

    // And the real build still has the work to do.
    assert_eq!(space.build("out", Options::default())?, Some(1));
    Ok(())
}

#[test]
fn failure_stops_new_work() -> anyhow::Result<()> {
    let mut space = TestSpace::new(
        "
rule bad
  command = fail $out

rule touch
  command = touch $out

build a: bad in
build b: touch in
build all: touch a b
",
    );
    space.disk.add("in", "", 1);

    // Default keep_going=1: the first failure wedges the build.
    assert_eq!(space.build("all", Options::default())?, None);
    assert!(!space.disk.exists("all"));

    // keep_going=0 drains everything that can still run.
    let options = Options {
        keep_going: 0,
        ..Options::default()
    };
    assert_eq!(space.build("all", options)?, None);
    assert!(space.disk.exists("b"));
    assert!(!space.disk.exists("all"));
    Ok(())
}

#[test]
fn unknown_target_is_an_error() {
    let mut space = TestSpace::new(TOUCH_BUILD);
    space.disk.add("in", "", 1);
    let err = space.build("nonexistent", Options::default()).unwrap_err();
    assert!(err.to_string().contains("unknown target"), "{}", err);
}

#[test]
fn missing_source_is_an_error() {
    let mut space = TestSpace::new(TOUCH_BUILD);
    // "in" does not exist anywhere.
    let err = space.build("out", Options::default()).unwrap_err();
    assert!(err.to_string().contains("needed by"), "{}", err);
}

#[test]
fn order_only_input_is_built_but_does_not_dirty() -> anyhow::Result<()> {
    let mut space = TestSpace::new(
        "
rule touch
  command = touch $out

build gen.h: touch in
build main.o: touch main.c || gen.h
",
    );
    space.disk.add("in", "", 1);
    space.disk.add("main.c", "", 1);

    // First build makes both; gen.h goes first.
    assert_eq!(space.build("main.o", Options::default())?, Some(2));
    assert!(space.disk.mtime("main.o").unwrap() > space.disk.mtime("gen.h").unwrap());

    // A stale order-only input does not dirty main.o, so nothing runs,
    // not even the gen.h edge.
    let newer = space.disk.mtime("main.o").unwrap() + 1;
    space.disk.add("in", "", newer);
    assert_eq!(space.build("main.o", Options::default())?, Some(0));

    // Once main.o itself is dirty, the order-only input is refreshed
    // before it runs.
    let newer = space.disk.mtime("main.o").unwrap() + 2;
    space.disk.add("main.c", "", newer);
    assert_eq!(space.build("main.o", Options::default())?, Some(2));
    assert!(space.disk.mtime("main.o").unwrap() > space.disk.mtime("gen.h").unwrap());
    Ok(())
}
