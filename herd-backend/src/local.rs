//! Local pseudo-cluster backend
//!
//! Runs each job (or each array element) as a local `bash -c` child process,
//! with bounded parallelism and dependency waiting. The backend watches its
//! own processes and reports started/ended over a [`BackendEvent`] channel,
//! so generated scripts carry no notification lines.

use async_trait::async_trait;
use herd_core::backend::{
    BackendError, BackendEvent, BackendPort, CancelTarget, LaunchError, LaunchRequest,
    ScriptDialect, StagedFile,
};
use herd_core::domain::job::{JobId, JobSpec};
use herd_core::domain::log::LaunchResult;
use herd_core::domain::result::JobResult;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::Command;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LocalConfig;
use crate::staging;

const NATIVE_PREFIX: &str = "local-";

/// How many finished jobs stay known as dependency targets
const FINISHED_CAPACITY: usize = 4096;

/// Exit code reported for elements skipped because a dependency failed
const SKIPPED_EXIT_CODE: i32 = 1;

/// How a job's elements finished, as seen by its dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Canceled,
}

/// Bookkeeping for one job that has not finished yet
struct LocalJob {
    done: watch::Receiver<Option<Outcome>>,
    cancel: watch::Sender<bool>,
    running: Arc<AtomicU32>,
}

/// Running jobs, plus the outcomes of the most recently finished ones
#[derive(Default)]
struct Registry {
    active: HashMap<String, LocalJob>,
    finished: HashMap<String, Outcome>,
    finished_order: VecDeque<String>,
}

impl Registry {
    fn finish(&mut self, native_id: &str, outcome: Outcome) {
        self.active.remove(native_id);
        if self.finished.insert(native_id.to_string(), outcome).is_none() {
            self.finished_order.push_back(native_id.to_string());
        }
        while self.finished_order.len() > FINISHED_CAPACITY {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// What a launched job waits on before its elements may run
enum Dependency {
    Running(watch::Receiver<Option<Outcome>>),
    Finished(Outcome),
}

/// Everything an element task needs to run
struct LocalRun {
    job_id: JobId,
    native_id: String,
    spec: JobSpec,
    command: String,
    shell: String,
    array_index_var: String,
    registry: Arc<Mutex<Registry>>,
}

impl LocalRun {
    fn indices(&self) -> Vec<Option<u32>> {
        match self.spec.array_size() {
            Some(size) => (1..=size).map(Some).collect(),
            None => vec![None],
        }
    }
}

pub struct LocalBackend {
    config: LocalConfig,
    slots: Arc<Semaphore>,
    registry: Arc<Mutex<Registry>>,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl LocalBackend {
    /// Creates the backend and the channel its lifecycle events arrive on
    pub fn new(config: LocalConfig) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let slots = Arc::new(Semaphore::new(config.max_parallel_jobs));
        let backend = Self {
            config,
            slots,
            registry: Arc::new(Mutex::new(Registry::default())),
            events,
        };
        (backend, rx)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    fn is_canceled(&self, native_id: &str) -> bool {
        let registry = self.registry();
        match registry.active.get(native_id) {
            Some(job) => *job.cancel.borrow(),
            None => registry.finished.get(native_id) == Some(&Outcome::Canceled),
        }
    }
}

async fn wait_until_set(rx: &mut watch::Receiver<bool>) -> bool {
    rx.wait_for(|value| *value).await.is_ok()
}

async fn wait_for_outcome(rx: &mut watch::Receiver<Option<Outcome>>) -> Outcome {
    match rx.wait_for(|outcome| outcome.is_some()).await {
        Ok(outcome) => (*outcome).unwrap_or(Outcome::Failed),
        Err(_) => Outcome::Failed,
    }
}

/// Waits for every dependency, returning the first one that did not succeed
async fn await_dependencies(
    dependencies: Vec<Dependency>,
    cancel: &watch::Receiver<bool>,
) -> Result<(), Outcome> {
    for dependency in dependencies {
        let outcome = match dependency {
            Dependency::Finished(outcome) => outcome,
            Dependency::Running(mut done) => {
                let mut canceled = cancel.clone();
                tokio::select! {
                    outcome = wait_for_outcome(&mut done) => outcome,
                    _ = wait_until_set(&mut canceled) => return Err(Outcome::Canceled),
                }
            }
        };
        if outcome != Outcome::Succeeded {
            return Err(outcome);
        }
    }
    Ok(())
}

async fn run_job(
    run: Arc<LocalRun>,
    dependencies: Vec<Dependency>,
    slots: Arc<Semaphore>,
    events: mpsc::UnboundedSender<BackendEvent>,
    cancel: watch::Receiver<bool>,
    done: watch::Sender<Option<Outcome>>,
    running: Arc<AtomicU32>,
) {
    let outcome = match await_dependencies(dependencies, &cancel).await {
        Ok(()) => run_elements(&run, &slots, &events, &cancel, &running).await,
        Err(Outcome::Canceled) if *cancel.borrow() => {
            debug!("Job {} canceled while waiting for dependencies", run.job_id);
            Outcome::Canceled
        }
        Err(_) => {
            warn!("Job {} skipped: a dependency did not succeed", run.job_id);
            report_skipped(&run, &events).await;
            Outcome::Failed
        }
    };

    lock(&run.registry).finish(&run.native_id, outcome);
    done.send_replace(Some(outcome));
    debug!("Job {} finished locally: {:?}", run.job_id, outcome);
}

async fn run_elements(
    run: &Arc<LocalRun>,
    slots: &Arc<Semaphore>,
    events: &mpsc::UnboundedSender<BackendEvent>,
    cancel: &watch::Receiver<bool>,
    running: &Arc<AtomicU32>,
) -> Outcome {
    let mut elements = JoinSet::new();
    for index in run.indices() {
        elements.spawn(run_element(
            Arc::clone(run),
            index,
            Arc::clone(slots),
            events.clone(),
            cancel.clone(),
            Arc::clone(running),
        ));
    }

    let mut all_succeeded = true;
    while let Some(joined) = elements.join_next().await {
        match joined {
            Ok(succeeded) => all_succeeded &= succeeded,
            Err(e) => {
                warn!("Element task of job {} panicked: {}", run.job_id, e);
                all_succeeded = false;
            }
        }
    }

    if *cancel.borrow() {
        Outcome::Canceled
    } else if all_succeeded {
        Outcome::Succeeded
    } else {
        Outcome::Failed
    }
}

/// Ends every element of a job that will never run, like `afterok` on a
/// real scheduler
async fn report_skipped(run: &LocalRun, events: &mpsc::UnboundedSender<BackendEvent>) {
    for array_index in run.indices() {
        let output_path = run.spec.output_path(run.job_id, array_index);
        if let Err(e) = tokio::fs::write(&output_path, "skipped: a dependency did not succeed\n").await {
            debug!("Cannot write {}: {}", output_path.display(), e);
        }
        let _ = events.send(BackendEvent::Ended {
            job_id: run.job_id,
            array_index,
            exit_code: Some(SKIPPED_EXIT_CODE),
        });
    }
}

/// Runs one element, returning whether it exited with code 0
async fn run_element(
    run: Arc<LocalRun>,
    array_index: Option<u32>,
    slots: Arc<Semaphore>,
    events: mpsc::UnboundedSender<BackendEvent>,
    mut cancel: watch::Receiver<bool>,
    running: Arc<AtomicU32>,
) -> bool {
    // Elements that never got a slot before cancellation never start,
    // exactly like pending elements on a real scheduler.
    let _permit = tokio::select! {
        permit = slots.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return false,
        },
        _ = wait_until_set(&mut cancel) => return false,
    };
    if *cancel.borrow() {
        return false;
    }

    let output_path = run.spec.output_path(run.job_id, array_index);
    let (stdout, stderr) = match std::fs::File::create(&output_path)
        .and_then(|file| Ok((file.try_clone()?, file)))
    {
        Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
        Err(e) => {
            warn!("Cannot write {}: {}", output_path.display(), e);
            (Stdio::null(), Stdio::null())
        }
    };

    let mut command = Command::new(&run.shell);
    command
        .arg("-c")
        .arg(&run.command)
        .current_dir(&run.spec.working_dir)
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);
    if let Some(index) = array_index {
        command.env(&run.array_index_var, index.to_string());
    }

    let job_id = run.job_id;
    let _ = events.send(BackendEvent::Started {
        job_id,
        array_index,
    });

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to spawn job {} element {:?}: {}", job_id, array_index, e);
            let _ = events.send(BackendEvent::Ended {
                job_id,
                array_index,
                exit_code: Some(127),
            });
            return false;
        }
    };

    running.fetch_add(1, Ordering::SeqCst);
    let finished = tokio::select! {
        status = child.wait() => Some(status),
        _ = wait_until_set(&mut cancel) => None,
    };
    let exit_code = match finished {
        Some(Ok(status)) => Some(status.code().unwrap_or(-1)),
        Some(Err(e)) => {
            warn!("Failed to wait for job {} element {:?}: {}", job_id, array_index, e);
            Some(-1)
        }
        None => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill job {} element {:?}: {}", job_id, array_index, e);
            }
            None
        }
    };
    running.fetch_sub(1, Ordering::SeqCst);

    let _ = events.send(BackendEvent::Ended {
        job_id,
        array_index,
        exit_code,
    });
    exit_code == Some(0)
}

#[async_trait]
impl BackendPort for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn dialect(&self) -> ScriptDialect {
        ScriptDialect::local()
    }

    fn validate(&self, spec: &JobSpec) -> Result<(), BackendError> {
        if !spec.working_dir.is_absolute() {
            return Err(BackendError::Invalid(format!(
                "working_dir '{}' must be absolute",
                spec.working_dir.display()
            )));
        }
        Ok(())
    }

    fn validate_dependency(&self, native_id: &str) -> Result<(), BackendError> {
        let rest = native_id
            .strip_prefix(NATIVE_PREFIX)
            .ok_or_else(|| BackendError::InvalidDependency(native_id.to_string()))?;
        let (job, index) = match rest.split_once('_') {
            Some((job, index)) => (job, Some(index)),
            None => (rest, None),
        };
        let valid_job = !job.is_empty() && job.chars().all(|c| c.is_ascii_hexdigit());
        let valid_index =
            index.is_none_or(|i| !i.is_empty() && i.chars().all(|c| c.is_ascii_digit()));
        if valid_job && valid_index {
            Ok(())
        } else {
            Err(BackendError::InvalidDependency(native_id.to_string()))
        }
    }

    async fn stage(&self, folders: &[PathBuf], files: &[StagedFile]) -> Result<(), BackendError> {
        staging::stage(folders, files).await
    }

    async fn launch(&self, request: LaunchRequest<'_>) -> Result<Option<LaunchResult>, LaunchError> {
        if request.spec.array_size() == Some(0) {
            return Ok(None);
        }

        let native_id = format!("{}{}", NATIVE_PREFIX, Uuid::new_v4().simple());
        let (done_tx, done_rx) = watch::channel(None);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let running = Arc::new(AtomicU32::new(0));

        let dependencies = {
            let mut registry = self.registry();
            let mut dependencies = Vec::with_capacity(request.dependencies.len());
            for dependency in request.dependencies {
                // An element dependency waits for the whole job
                let base = dependency.split('_').next().unwrap_or_default();
                let resolved = match registry.active.get(base) {
                    Some(job) => Dependency::Running(job.done.clone()),
                    None => match registry.finished.get(base) {
                        Some(outcome) => Dependency::Finished(*outcome),
                        None => {
                            return Err(LaunchError::new(
                                format!("unknown dependency {}", dependency),
                                format!("no local job {} is known to this backend", base),
                            ));
                        }
                    },
                };
                dependencies.push(resolved);
            }
            registry.active.insert(
                native_id.clone(),
                LocalJob {
                    done: done_rx,
                    cancel: cancel_tx,
                    running: Arc::clone(&running),
                },
            );
            dependencies
        };

        let run = Arc::new(LocalRun {
            job_id: request.job_id,
            native_id: native_id.clone(),
            spec: request.spec.clone(),
            command: request.command.to_string(),
            shell: self.config.shell.clone(),
            array_index_var: self.dialect().array_index_var,
            registry: Arc::clone(&self.registry),
        });

        tokio::spawn(run_job(
            run,
            dependencies,
            Arc::clone(&self.slots),
            self.events.clone(),
            cancel_rx,
            done_tx,
            running,
        ));

        info!("Job {} launched locally as {}", request.job_id, native_id);

        Ok(Some(LaunchResult {
            native_id,
            output: String::new(),
            cleanup: Vec::new(),
        }))
    }

    async fn cancel(&self, targets: &[CancelTarget]) -> Result<(), BackendError> {
        let registry = self.registry();
        for target in targets {
            match registry.active.get(&target.native_id) {
                Some(job) => {
                    job.cancel.send_replace(true);
                    info!("Canceling local job {} ({})", target.job_id, target.native_id);
                }
                None if registry.finished.contains_key(&target.native_id) => debug!(
                    "Job {} ({}) already finished, nothing to cancel",
                    target.job_id, target.native_id
                ),
                None => warn!(
                    "Cannot cancel job {}: {} unknown to the local backend",
                    target.job_id, target.native_id
                ),
            }
        }
        Ok(())
    }

    async fn result(
        &self,
        job_id: JobId,
        spec: &JobSpec,
        launch: Option<&LaunchResult>,
        array_index: Option<u32>,
    ) -> JobResult {
        let canceled = launch.is_some_and(|launch| self.is_canceled(&launch.native_id));
        let output = staging::read_output(&spec.output_path(job_id, array_index)).await;
        if canceled {
            JobResult {
                output,
                ..JobResult::canceled("canceled on request")
            }
        } else {
            JobResult::success(output)
        }
    }

    async fn delete_files(&self, paths: &[PathBuf]) {
        staging::remove_files(paths).await;
    }

    async fn waiting_reason(&self, launch: &LaunchResult) -> Option<String> {
        let registry = self.registry();
        let job = registry.active.get(&launch.native_id)?;
        if job.done.borrow().is_some() || job.running.load(Ordering::SeqCst) > 0 {
            return None;
        }
        Some("waiting for dependencies or a free local slot".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::scratch_dir;
    use herd_core::domain::commands::Commands;
    use herd_core::domain::result::ResultType;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn spec(dir: &std::path::Path, commands: Commands) -> JobSpec {
        JobSpec {
            container: None,
            commands,
            working_dir: dir.to_path_buf(),
            env: BTreeMap::new(),
            args: BTreeMap::new(),
            dependencies: vec![],
            owner_id: None,
            owner_listener_id: None,
            web_name: "local".to_string(),
            cluster_name: "local".to_string(),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<BackendEvent>) -> BackendEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_runs_array_elements_with_index() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let (backend, mut rx) = LocalBackend::new(LocalConfig::default());
        let spec = spec(
            &dir,
            Commands::Script {
                commands: vec![],
                array_size: Some(2),
            },
        );

        let launched = backend
            .launch(LaunchRequest {
                job_id: 3,
                spec: &spec,
                dependencies: &[],
                script_path: &dir.join("herd-3.sh"),
                command: "echo element $HERD_ARRAY_INDEX",
            })
            .await
            .unwrap()
            .unwrap();
        assert!(launched.native_id.starts_with(NATIVE_PREFIX));

        let mut ended = 0;
        while ended < 2 {
            if let BackendEvent::Ended { exit_code, .. } = next_event(&mut rx).await {
                assert_eq!(exit_code, Some(0));
                ended += 1;
            }
        }

        let result = backend.result(3, &spec, Some(&launched), Some(2)).await;
        assert_eq!(result.result_type, ResultType::Success);
        assert_eq!(result.output.trim(), "element 2");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_cancel_kills_running_element() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let (backend, mut rx) = LocalBackend::new(LocalConfig::default());
        let spec = spec(
            &dir,
            Commands::Script {
                commands: vec![],
                array_size: None,
            },
        );

        let launched = backend
            .launch(LaunchRequest {
                job_id: 4,
                spec: &spec,
                dependencies: &[],
                script_path: &dir.join("herd-4.sh"),
                command: "sleep 30",
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            BackendEvent::Started {
                job_id: 4,
                array_index: None
            }
        );

        backend
            .cancel(&[CancelTarget {
                job_id: 4,
                native_id: launched.native_id.clone(),
            }])
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            BackendEvent::Ended {
                job_id: 4,
                array_index: None,
                exit_code: None
            }
        );
        let result = backend.result(4, &spec, Some(&launched), None).await;
        assert_eq!(result.result_type, ResultType::Canceled);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_unknown_dependency_fails_launch() {
        let dir = scratch_dir();
        let (backend, _rx) = LocalBackend::new(LocalConfig::default());
        let spec = spec(
            &dir,
            Commands::Script {
                commands: vec![],
                array_size: None,
            },
        );
        let deps = vec!["local-abc".to_string()];
        let err = backend
            .launch(LaunchRequest {
                job_id: 1,
                spec: &spec,
                dependencies: &deps,
                script_path: &dir.join("herd-1.sh"),
                command: "true",
            })
            .await
            .unwrap_err();
        assert!(err.message.contains("unknown dependency"));
    }

    async fn launch(
        backend: &LocalBackend,
        job_id: JobId,
        spec: &JobSpec,
        dependencies: &[String],
        command: &str,
    ) -> LaunchResult {
        let script = spec.script_path(job_id);
        backend
            .launch(LaunchRequest {
                job_id,
                spec,
                dependencies,
                script_path: &script,
                command,
            })
            .await
            .unwrap()
            .unwrap()
    }

    async fn wait_until_finished(backend: &LocalBackend, native_id: &str) {
        for _ in 0..500 {
            if backend.registry().finished.contains_key(native_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never finished", native_id);
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependent() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let (backend, mut rx) = LocalBackend::new(LocalConfig::default());
        let plain = spec(
            &dir,
            Commands::Script {
                commands: vec![],
                array_size: None,
            },
        );

        let failing = launch(&backend, 1, &plain, &[], "exit 3").await;
        let dependent = launch(&backend, 2, &plain, &[failing.native_id.clone()], "true").await;

        let mut dependent_started = false;
        loop {
            match next_event(&mut rx).await {
                BackendEvent::Started { job_id: 2, .. } => dependent_started = true,
                BackendEvent::Ended {
                    job_id: 2,
                    exit_code,
                    ..
                } => {
                    assert_eq!(exit_code, Some(SKIPPED_EXIT_CODE));
                    break;
                }
                _ => {}
            }
        }
        assert!(!dependent_started);

        let result = backend.result(2, &plain, Some(&dependent), None).await;
        assert!(result.output.contains("dependency did not succeed"));

        // a finished dependency is still honoured after it left the active set
        wait_until_finished(&backend, &failing.native_id).await;
        let late = launch(&backend, 3, &plain, &[failing.native_id.clone()], "true").await;
        loop {
            if let BackendEvent::Ended { job_id: 3, exit_code, .. } = next_event(&mut rx).await {
                assert_eq!(exit_code, Some(SKIPPED_EXIT_CODE));
                break;
            }
        }
        wait_until_finished(&backend, &late.native_id).await;
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_finished_jobs_leave_active_set() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let (backend, mut rx) = LocalBackend::new(LocalConfig::default());
        let plain = spec(
            &dir,
            Commands::Script {
                commands: vec![],
                array_size: None,
            },
        );

        let first = launch(&backend, 1, &plain, &[], "true").await;
        let second = launch(&backend, 2, &plain, &[first.native_id.clone()], "true").await;
        loop {
            if let BackendEvent::Ended { job_id: 2, exit_code, .. } = next_event(&mut rx).await {
                assert_eq!(exit_code, Some(0));
                break;
            }
        }
        wait_until_finished(&backend, &second.native_id).await;

        let registry = backend.registry();
        assert!(registry.active.is_empty());
        assert_eq!(registry.finished.get(&first.native_id), Some(&Outcome::Succeeded));
        drop(registry);
        assert_eq!(backend.waiting_reason(&second).await, None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_finished_outcomes_are_bounded() {
        let mut registry = Registry::default();
        for i in 0..FINISHED_CAPACITY + 10 {
            registry.finish(&format!("local-{:x}", i), Outcome::Succeeded);
        }
        assert_eq!(registry.finished.len(), FINISHED_CAPACITY);
        assert_eq!(registry.finished_order.len(), FINISHED_CAPACITY);
        assert!(!registry.finished.contains_key("local-0"));
        assert!(registry.finished.contains_key(&format!("local-{:x}", FINISHED_CAPACITY + 9)));
    }

    #[test]
    fn test_validate_dependency() {
        let (backend, _rx) = LocalBackend::new(LocalConfig::default());
        assert!(backend.validate_dependency("local-0af3").is_ok());
        assert!(backend.validate_dependency("local-0af3_2").is_ok());
        assert!(backend.validate_dependency("0af3").is_err());
        assert!(backend.validate_dependency("local-").is_err());
        assert!(backend.validate_dependency("local-0af3_x").is_err());
    }
}
