//! Tests for the containerizer pipeline: bundle → depot → start →
//! readiness, plus the kill-before-delete discipline on destroy.

use arbor::bundle::Bundle;
use arbor::containerizer::{
    BundleRunner, Bundler, Depot, DepotContainerizer, Process, StdoutCheck,
};
use arbor::error::{Error, Result};
use arbor::orchestrator::Containerizer;
use arbor::spec::{DesiredContainerSpec, ProcessIo, ProcessSpec, StreamInSpec, StreamOutSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeDepot {
    create_calls: Mutex<Vec<(String, Bundle)>>,
    destroy_calls: Mutex<Vec<String>>,
    handles: Vec<String>,
    fail_create: bool,
    fail_lookup: bool,
    fail_handles: bool,
}

#[async_trait]
impl Depot for FakeDepot {
    async fn create(&self, handle: &str, bundle: &Bundle) -> Result<()> {
        self.create_calls
            .lock()
            .unwrap()
            .push((handle.to_string(), bundle.clone()));
        if self.fail_create {
            return Err(Error::HandleExists(handle.to_string()));
        }
        Ok(())
    }

    async fn lookup(&self, handle: &str) -> Result<PathBuf> {
        if self.fail_lookup {
            return Err(Error::ContainerNotFound(handle.to_string()));
        }
        Ok(PathBuf::from(format!("/path/to/{handle}")))
    }

    async fn destroy(&self, handle: &str) -> Result<()> {
        self.destroy_calls.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    async fn handles(&self) -> Result<Vec<String>> {
        if self.fail_handles {
            return Err(Error::Internal("spiderman error".to_string()));
        }
        Ok(self.handles.clone())
    }
}

struct FakeBundler;

impl Bundler for FakeBundler {
    fn bundle(&self, spec: &DesiredContainerSpec) -> Result<Bundle> {
        Ok(Bundle::default().with_rootfs(spec.rootfs_path.clone()))
    }
}

struct FakeProcess;

#[async_trait]
impl Process for FakeProcess {
    fn id(&self) -> u32 {
        1
    }

    async fn wait(&mut self) -> Result<i32> {
        Ok(0)
    }
}

/// What the fake runtime writes on its stdout after starting.
#[derive(Clone, Copy, PartialEq)]
enum StdoutScript {
    /// Report readiness the way a healthy container does.
    Ready,
    /// Crash output, then EOF.
    Garbage,
    /// Keep the stream open but never write.
    Silent,
}

struct FakeRunner {
    start_calls: Mutex<Vec<(PathBuf, String)>>,
    exec_calls: Mutex<Vec<(PathBuf, String, String)>>,
    kill_calls: Mutex<Vec<String>>,
    fail_start: bool,
    fail_kill: bool,
    script: StdoutScript,
    // Writers parked here stay open so the start check has to time out.
    parked_writers: Mutex<Vec<Pin<Box<dyn AsyncWrite + Send>>>>,
}

impl FakeRunner {
    fn new(script: StdoutScript) -> Self {
        Self {
            start_calls: Mutex::new(Vec::new()),
            exec_calls: Mutex::new(Vec::new()),
            kill_calls: Mutex::new(Vec::new()),
            fail_start: false,
            fail_kill: false,
            script,
            parked_writers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BundleRunner for FakeRunner {
    async fn start(
        &self,
        bundle_path: &Path,
        handle: &str,
        io: ProcessIo,
    ) -> Result<Box<dyn Process>> {
        self.start_calls
            .lock()
            .unwrap()
            .push((bundle_path.to_path_buf(), handle.to_string()));
        if self.fail_start {
            return Err(Error::RunnerFailed {
                handle: handle.to_string(),
                action: "start".to_string(),
                reason: "blam".to_string(),
            });
        }

        if let Some(mut stdout) = io.stdout {
            match self.script {
                StdoutScript::Ready => {
                    let _ = stdout.write_all(b"Pid 1 Running\n").await;
                }
                StdoutScript::Garbage => {
                    let _ = stdout.write_all(b"panic: exploded\n").await;
                }
                StdoutScript::Silent => {
                    self.parked_writers.lock().unwrap().push(stdout);
                }
            }
        }
        Ok(Box::new(FakeProcess))
    }

    async fn exec(
        &self,
        bundle_path: &Path,
        handle: &str,
        spec: ProcessSpec,
        _io: ProcessIo,
    ) -> Result<Box<dyn Process>> {
        self.exec_calls.lock().unwrap().push((
            bundle_path.to_path_buf(),
            handle.to_string(),
            spec.path,
        ));
        Ok(Box::new(FakeProcess))
    }

    async fn kill(&self, handle: &str) -> Result<()> {
        self.kill_calls.lock().unwrap().push(handle.to_string());
        if self.fail_kill {
            return Err(Error::RunnerFailed {
                handle: handle.to_string(),
                action: "kill".to_string(),
                reason: "killing is wrong".to_string(),
            });
        }
        Ok(())
    }

    async fn stream_in(
        &self,
        _bundle_path: &Path,
        _handle: &str,
        _spec: StreamInSpec,
    ) -> Result<()> {
        Ok(())
    }

    async fn stream_out(
        &self,
        _bundle_path: &Path,
        _handle: &str,
        _spec: StreamOutSpec,
    ) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        Ok(Box::pin(std::io::Cursor::new(Vec::new())))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    depot: Arc<FakeDepot>,
    runner: Arc<FakeRunner>,
    containerizer: DepotContainerizer,
}

fn harness_with(depot: FakeDepot, runner: FakeRunner, checker: StdoutCheck) -> Harness {
    let depot = Arc::new(depot);
    let runner = Arc::new(runner);
    let containerizer = DepotContainerizer::new(
        Arc::clone(&depot) as Arc<dyn Depot>,
        Arc::new(FakeBundler),
        Arc::clone(&runner) as Arc<dyn BundleRunner>,
        Arc::new(checker),
    );
    Harness {
        depot,
        runner,
        containerizer,
    }
}

fn harness() -> Harness {
    harness_with(
        FakeDepot::default(),
        FakeRunner::new(StdoutScript::Ready),
        StdoutCheck::default(),
    )
}

fn spec(handle: &str) -> DesiredContainerSpec {
    DesiredContainerSpec {
        handle: handle.to_string(),
        rootfs_path: PathBuf::from("/srv/rootfs"),
        ..Default::default()
    }
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_create_materializes_bundle_in_depot() {
    let h = harness();
    h.containerizer.create(spec("exuberant")).await.unwrap();

    let calls = h.depot.create_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "exuberant");
    assert_eq!(calls[0].1.root.path, PathBuf::from("/srv/rootfs"));
}

#[tokio::test]
async fn test_create_starts_container_in_depot_directory() {
    let h = harness();
    h.containerizer.create(spec("exuberant")).await.unwrap();

    let calls = h.runner.start_calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![(PathBuf::from("/path/to/exuberant"), "exuberant".to_string())]
    );
}

#[tokio::test]
async fn test_create_fails_when_depot_create_fails() {
    let h = harness_with(
        FakeDepot {
            fail_create: true,
            ..Default::default()
        },
        FakeRunner::new(StdoutScript::Ready),
        StdoutCheck::default(),
    );

    let result = h.containerizer.create(spec("exuberant")).await;

    assert!(matches!(result, Err(Error::HandleExists(_))));
    assert!(h.runner.start_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_aborts_before_start_when_lookup_fails() {
    let h = harness_with(
        FakeDepot {
            fail_lookup: true,
            ..Default::default()
        },
        FakeRunner::new(StdoutScript::Ready),
        StdoutCheck::default(),
    );

    let result = h.containerizer.create(spec("exuberant")).await;

    assert!(result.is_err());
    assert!(h.runner.start_calls.lock().unwrap().is_empty());
    // The depot directory was already created, so it must be removed.
    assert_eq!(*h.depot.destroy_calls.lock().unwrap(), vec!["exuberant"]);
}

#[tokio::test]
async fn test_create_removes_depot_directory_when_start_fails() {
    let mut runner = FakeRunner::new(StdoutScript::Ready);
    runner.fail_start = true;
    let h = harness_with(FakeDepot::default(), runner, StdoutCheck::default());

    let result = h.containerizer.create(spec("doomed")).await;

    assert!(matches!(result, Err(Error::RunnerFailed { .. })));
    assert_eq!(*h.depot.destroy_calls.lock().unwrap(), vec!["doomed"]);
}

#[tokio::test]
async fn test_create_succeeds_when_readiness_token_appears() {
    let h = harness();
    assert!(h.containerizer.create(spec("healthy")).await.is_ok());
    assert!(h.depot.destroy_calls.lock().unwrap().is_empty());
    assert!(h.runner.kill_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_create_kills_and_cleans_up_when_start_check_fails() {
    let h = harness_with(
        FakeDepot::default(),
        FakeRunner::new(StdoutScript::Garbage),
        StdoutCheck::default(),
    );

    let result = h.containerizer.create(spec("crashed")).await;

    assert!(matches!(result, Err(Error::StartFailed(_))));
    assert_eq!(*h.runner.kill_calls.lock().unwrap(), vec!["crashed"]);
    assert_eq!(*h.depot.destroy_calls.lock().unwrap(), vec!["crashed"]);
}

#[tokio::test]
async fn test_create_times_out_when_runtime_stays_silent() {
    let h = harness_with(
        FakeDepot::default(),
        FakeRunner::new(StdoutScript::Silent),
        StdoutCheck {
            expect: "Pid 1 Running".to_string(),
            timeout: Duration::from_millis(50),
        },
    );

    let result = h.containerizer.create(spec("mute")).await;

    assert!(matches!(result, Err(Error::StartTimeout { .. })));
    assert_eq!(*h.depot.destroy_calls.lock().unwrap(), vec!["mute"]);
}

// =============================================================================
// Run
// =============================================================================

#[tokio::test]
async fn test_run_execs_in_depot_directory() {
    let h = harness();
    h.containerizer
        .run(
            "some-handle",
            ProcessSpec {
                path: "hello".to_string(),
                ..Default::default()
            },
            ProcessIo::discard(),
        )
        .await
        .unwrap();

    let calls = h.runner.exec_calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![(
            PathBuf::from("/path/to/some-handle"),
            "some-handle".to_string(),
            "hello".to_string()
        )]
    );
}

#[tokio::test]
async fn test_run_does_not_exec_when_lookup_fails() {
    let h = harness_with(
        FakeDepot {
            fail_lookup: true,
            ..Default::default()
        },
        FakeRunner::new(StdoutScript::Ready),
        StdoutCheck::default(),
    );

    let result = h
        .containerizer
        .run("some-handle", ProcessSpec::default(), ProcessIo::discard())
        .await;

    assert!(result.is_err());
    assert!(h.runner.exec_calls.lock().unwrap().is_empty());
}

// =============================================================================
// Destroy
// =============================================================================

#[tokio::test]
async fn test_destroy_kills_then_removes_depot_directory() {
    let h = harness();
    h.containerizer.destroy("some-handle").await.unwrap();

    assert_eq!(*h.runner.kill_calls.lock().unwrap(), vec!["some-handle"]);
    assert_eq!(*h.depot.destroy_calls.lock().unwrap(), vec!["some-handle"]);
}

#[tokio::test]
async fn test_destroy_keeps_depot_directory_when_kill_fails() {
    let mut runner = FakeRunner::new(StdoutScript::Ready);
    runner.fail_kill = true;
    let h = harness_with(FakeDepot::default(), runner, StdoutCheck::default());

    let result = h.containerizer.destroy("some-handle").await;

    assert!(result.is_err());
    assert!(h.depot.destroy_calls.lock().unwrap().is_empty());
}

// =============================================================================
// Handles / Info
// =============================================================================

#[tokio::test]
async fn test_handles_come_from_the_depot() {
    let h = harness_with(
        FakeDepot {
            handles: vec!["banana".to_string(), "banana2".to_string()],
            ..Default::default()
        },
        FakeRunner::new(StdoutScript::Ready),
        StdoutCheck::default(),
    );

    assert_eq!(
        h.containerizer.handles().await.unwrap(),
        vec!["banana", "banana2"]
    );
}

#[tokio::test]
async fn test_handles_propagates_depot_errors() {
    let h = harness_with(
        FakeDepot {
            fail_handles: true,
            ..Default::default()
        },
        FakeRunner::new(StdoutScript::Ready),
        StdoutCheck::default(),
    );

    assert!(h.containerizer.handles().await.is_err());
}

#[tokio::test]
async fn test_info_reports_bundle_path() {
    let h = harness();
    let actual = h.containerizer.info("some-handle").await.unwrap();
    assert_eq!(actual.bundle_path, PathBuf::from("/path/to/some-handle"));
}
