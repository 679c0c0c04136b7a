//! Load-test backend
//!
//! Never touches the filesystem or runs processes. Every launched element
//! "runs" for a configured duration and then reports an exit code, which
//! makes it possible to drive thousands of jobs through the orchestrator.

use async_trait::async_trait;
use herd_core::backend::{
    BackendError, BackendEvent, BackendPort, CancelTarget, LaunchError, LaunchRequest,
    ScriptDialect, StagedFile,
};
use herd_core::domain::job::{JobId, JobSpec};
use herd_core::domain::log::LaunchResult;
use herd_core::domain::result::JobResult;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::LoadTestConfig;

/// How many canceled jobs are remembered for `result`
const CANCELED_CAPACITY: usize = 4096;

/// Most recently canceled native ids, oldest evicted first
#[derive(Default)]
struct CanceledJobs {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl CanceledJobs {
    fn insert(&mut self, native_id: &str) {
        if self.ids.insert(native_id.to_string()) {
            self.order.push_back(native_id.to_string());
        }
        while self.order.len() > CANCELED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

pub struct LoadTestBackend {
    config: LoadTestConfig,
    next_id: AtomicU64,
    elements_run: Arc<AtomicU64>,
    canceled: Arc<Mutex<CanceledJobs>>,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl LoadTestBackend {
    /// Creates the backend and the channel its lifecycle events arrive on
    pub fn new(config: LoadTestConfig) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let backend = Self {
            config,
            next_id: AtomicU64::new(1),
            elements_run: Arc::new(AtomicU64::new(0)),
            canceled: Arc::new(Mutex::new(CanceledJobs::default())),
            events,
        };
        (backend, rx)
    }

    fn is_canceled(canceled: &Mutex<CanceledJobs>, native_id: &str) -> bool {
        canceled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ids
            .contains(native_id)
    }
}

#[async_trait]
impl BackendPort for LoadTestBackend {
    fn name(&self) -> &'static str {
        "loadtest"
    }

    fn dialect(&self) -> ScriptDialect {
        ScriptDialect::local()
    }

    fn validate(&self, _spec: &JobSpec) -> Result<(), BackendError> {
        Ok(())
    }

    fn validate_dependency(&self, native_id: &str) -> Result<(), BackendError> {
        if native_id.starts_with("load-") {
            Ok(())
        } else {
            Err(BackendError::InvalidDependency(native_id.to_string()))
        }
    }

    async fn stage(&self, folders: &[PathBuf], files: &[StagedFile]) -> Result<(), BackendError> {
        debug!(
            "Load test: skipping staging of {} folder(s) and {} file(s)",
            folders.len(),
            files.len()
        );
        Ok(())
    }

    async fn launch(&self, request: LaunchRequest<'_>) -> Result<Option<LaunchResult>, LaunchError> {
        let indices: Vec<Option<u32>> = match request.spec.array_size() {
            Some(0) => return Ok(None),
            Some(size) => (1..=size).map(Some).collect(),
            None => vec![None],
        };

        let native_id = format!("load-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let job_id = request.job_id;

        for array_index in indices {
            let events = self.events.clone();
            let canceled = Arc::clone(&self.canceled);
            let elements_run = Arc::clone(&self.elements_run);
            let native_id = native_id.clone();
            let duration = self.config.element_duration;
            let fail_every = self.config.fail_every;

            tokio::spawn(async move {
                if Self::is_canceled(&canceled, &native_id) {
                    return;
                }
                let _ = events.send(BackendEvent::Started {
                    job_id,
                    array_index,
                });
                tokio::time::sleep(duration).await;

                let exit_code = if Self::is_canceled(&canceled, &native_id) {
                    None
                } else {
                    let n = elements_run.fetch_add(1, Ordering::SeqCst) + 1;
                    let failed = fail_every.is_some_and(|every| n % u64::from(every) == 0);
                    Some(if failed { 1 } else { 0 })
                };
                let _ = events.send(BackendEvent::Ended {
                    job_id,
                    array_index,
                    exit_code,
                });
            });
        }

        Ok(Some(LaunchResult {
            native_id,
            output: String::new(),
            cleanup: Vec::new(),
        }))
    }

    async fn cancel(&self, targets: &[CancelTarget]) -> Result<(), BackendError> {
        let mut canceled = self.canceled.lock().unwrap_or_else(|e| e.into_inner());
        for target in targets {
            canceled.insert(&target.native_id);
        }
        Ok(())
    }

    async fn result(
        &self,
        job_id: JobId,
        _spec: &JobSpec,
        launch: Option<&LaunchResult>,
        array_index: Option<u32>,
    ) -> JobResult {
        let canceled =
            launch.is_some_and(|launch| Self::is_canceled(&self.canceled, &launch.native_id));
        if canceled {
            JobResult::canceled("canceled on request")
        } else {
            JobResult::success(format!(
                "load test job {} element {:?}",
                job_id, array_index
            ))
        }
    }

    async fn delete_files(&self, _paths: &[PathBuf]) {}

    async fn waiting_reason(&self, _launch: &LaunchResult) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::domain::commands::Commands;
    use herd_core::domain::result::ResultType;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Duration;

    fn spec(array_size: Option<u32>) -> JobSpec {
        JobSpec {
            container: None,
            commands: Commands::Script {
                commands: vec!["noop".to_string()],
                array_size,
            },
            working_dir: PathBuf::from("/nowhere"),
            env: BTreeMap::new(),
            args: BTreeMap::new(),
            dependencies: vec![],
            owner_id: None,
            owner_listener_id: None,
            web_name: "load".to_string(),
            cluster_name: "load".to_string(),
        }
    }

    #[tokio::test]
    async fn test_every_element_starts_and_ends() {
        let (backend, mut rx) = LoadTestBackend::new(LoadTestConfig {
            element_duration: Duration::from_millis(50),
            fail_every: Some(3),
        });
        let spec = spec(Some(3));

        backend
            .launch(LaunchRequest {
                job_id: 1,
                spec: &spec,
                dependencies: &[],
                script_path: Path::new("/nowhere/herd-1.sh"),
                command: "noop",
            })
            .await
            .unwrap()
            .unwrap();

        let mut started = 0;
        let mut exit_codes = Vec::new();
        while exit_codes.len() < 3 {
            match rx.recv().await.unwrap() {
                BackendEvent::Started { .. } => started += 1,
                BackendEvent::Ended { exit_code, .. } => exit_codes.push(exit_code),
            }
        }
        assert_eq!(started, 3);
        assert_eq!(exit_codes.iter().filter(|c| **c == Some(1)).count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_marks_result_canceled() {
        let (backend, mut rx) = LoadTestBackend::new(LoadTestConfig {
            element_duration: Duration::from_millis(200),
            fail_every: None,
        });
        let spec = spec(None);
        let launched = backend
            .launch(LaunchRequest {
                job_id: 2,
                spec: &spec,
                dependencies: &[],
                script_path: Path::new("/nowhere/herd-2.sh"),
                command: "noop",
            })
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(rx.recv().await, Some(BackendEvent::Started { .. })));
        backend
            .cancel(&[CancelTarget {
                job_id: 2,
                native_id: launched.native_id.clone(),
            }])
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(BackendEvent::Ended {
                job_id: 2,
                array_index: None,
                exit_code: None
            })
        );
        let result = backend.result(2, &spec, Some(&launched), None).await;
        assert_eq!(result.result_type, ResultType::Canceled);
    }

    #[test]
    fn test_canceled_jobs_are_bounded() {
        let mut canceled = CanceledJobs::default();
        for id in 0..CANCELED_CAPACITY + 10 {
            canceled.insert(&format!("load-{id}"));
        }
        canceled.insert("load-20");

        assert_eq!(canceled.ids.len(), CANCELED_CAPACITY);
        assert_eq!(canceled.order.len(), CANCELED_CAPACITY);
        assert!(!canceled.ids.contains("load-0"));
        assert!(!canceled.ids.contains("load-9"));
        assert!(canceled.ids.contains("load-10"));
        assert!(canceled.ids.contains("load-20"));
    }

    #[tokio::test]
    async fn test_empty_array_is_not_launched() {
        let (backend, _rx) = LoadTestBackend::new(LoadTestConfig::default());
        let spec = spec(Some(0));
        let launched = backend
            .launch(LaunchRequest {
                job_id: 3,
                spec: &spec,
                dependencies: &[],
                script_path: Path::new("/nowhere/herd-3.sh"),
                command: "noop",
            })
            .await
            .unwrap();
        assert!(launched.is_none());
    }
}
