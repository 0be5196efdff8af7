//! Recording doubles for every collaborator, for use in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deploy_shims::{CheckRun, PushRequest, ShimError};
use release_state::fakes::MemoryReleaseStore;
use release_state::ReleaseId;

use crate::collaborators::{
    BuildExecutor, CheckLookup, Collaborators, RefCreator, ReleaseFinalizer, SourceControl,
    VersionLookup,
};
use crate::identity::RepoContext;
use crate::outputs::OutputSink;

type ShimResult<T> = std::result::Result<T, ShimError>;

/// Build executor returning a fixed release id, or failing.
pub struct RecordingBuilder {
    release_id: ReleaseId,
    fail: bool,
    requests: Mutex<Vec<PushRequest>>,
}

impl RecordingBuilder {
    pub fn succeeding(release_id: u64) -> Self {
        Self {
            release_id: ReleaseId(release_id),
            fail: false,
            requests: Mutex::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::succeeding(0)
        }
    }

    pub fn requests(&self) -> Vec<PushRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildExecutor for RecordingBuilder {
    async fn push(&self, request: &PushRequest) -> ShimResult<ReleaseId> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(ShimError::BuildExecution(
                "Build process returned non-0 exit code".to_string(),
            ));
        }
        Ok(self.release_id)
    }
}

/// Finalizer recording the ids it was asked to promote.
#[derive(Default)]
pub struct RecordingFinalizer {
    finalized: Mutex<Vec<ReleaseId>>,
}

impl RecordingFinalizer {
    pub fn finalized(&self) -> Vec<ReleaseId> {
        self.finalized.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseFinalizer for RecordingFinalizer {
    async fn finalize(&self, id: ReleaseId) -> ShimResult<()> {
        self.finalized.lock().unwrap().push(id);
        Ok(())
    }
}

/// Version lookup answering with one fixed version.
pub struct FixedVersions(pub String);

#[async_trait]
impl VersionLookup for FixedVersions {
    async fn release_version(&self, _id: ReleaseId) -> ShimResult<String> {
        Ok(self.0.clone())
    }
}

/// How [`RecordingRefs`] answers tag creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefBehavior {
    Create,
    AlreadyExists,
    Fail,
}

/// Ref creator recording `(sha, tag)` pairs.
pub struct RecordingRefs {
    behavior: RefBehavior,
    created: Mutex<Vec<(String, String)>>,
}

impl RecordingRefs {
    pub fn new(behavior: RefBehavior) -> Self {
        Self {
            behavior,
            created: Mutex::default(),
        }
    }

    pub fn created(&self) -> Vec<(String, String)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl RefCreator for RecordingRefs {
    async fn create_tag(&self, repo: &RepoContext, tag: &str) -> ShimResult<String> {
        self.created
            .lock()
            .unwrap()
            .push((repo.sha.clone(), tag.to_string()));
        match self.behavior {
            RefBehavior::Create => Ok(format!(
                "https://api.github.com/repos/{}/git/refs/tags/{tag}",
                repo.slug()
            )),
            RefBehavior::AlreadyExists => Err(ShimError::RefAlreadyExists {
                reference: format!("refs/tags/{tag}"),
            }),
            RefBehavior::Fail => Err(ShimError::Api {
                status: 403,
                message: "Resource not accessible by integration".to_string(),
            }),
        }
    }
}

/// Check lookup replaying scripted responses, then empty lists.
#[derive(Default)]
pub struct ScriptedChecks {
    responses: Mutex<VecDeque<ShimResult<Vec<CheckRun>>>>,
    calls: AtomicUsize,
}

impl ScriptedChecks {
    pub fn new(responses: Vec<ShimResult<Vec<CheckRun>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckLookup for ScriptedChecks {
    async fn check_runs(&self, _repo: &RepoContext) -> ShimResult<Vec<CheckRun>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Source control recording `fetch` and `checkout <ref>` calls.
#[derive(Default)]
pub struct RecordingSource {
    calls: Mutex<Vec<String>>,
}

impl RecordingSource {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControl for RecordingSource {
    async fn fetch(&self) -> ShimResult<()> {
        self.calls.lock().unwrap().push("fetch".to_string());
        Ok(())
    }

    async fn checkout(&self, reference: &str) -> ShimResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("checkout {reference}"));
        Ok(())
    }
}

/// Output sink keeping outputs in order.
#[derive(Default)]
pub struct MemoryOutputs {
    values: Mutex<Vec<(String, String)>>,
}

impl MemoryOutputs {
    pub fn values(&self) -> Vec<(String, String)> {
        self.values.lock().unwrap().clone()
    }
}

impl OutputSink for MemoryOutputs {
    fn set_output(&self, name: &str, value: &str) -> std::io::Result<()> {
        self.values
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
        Ok(())
    }
}

/// A full set of doubles with typed handles kept for assertions.
pub struct FakeWorld {
    pub store: Arc<MemoryReleaseStore>,
    pub builder: Arc<RecordingBuilder>,
    pub finalizer: Arc<RecordingFinalizer>,
    pub versions: Arc<FixedVersions>,
    pub refs: Arc<RecordingRefs>,
    pub checks: Arc<ScriptedChecks>,
    pub source: Arc<RecordingSource>,
    pub outputs: Arc<MemoryOutputs>,
}

impl FakeWorld {
    /// Builder returns `release_id`; every version lookup returns `version`.
    pub fn new(release_id: u64, version: &str) -> Self {
        Self {
            store: Arc::new(MemoryReleaseStore::new()),
            builder: Arc::new(RecordingBuilder::succeeding(release_id)),
            finalizer: Arc::new(RecordingFinalizer::default()),
            versions: Arc::new(FixedVersions(version.to_string())),
            refs: Arc::new(RecordingRefs::new(RefBehavior::Create)),
            checks: Arc::new(ScriptedChecks::default()),
            source: Arc::new(RecordingSource::default()),
            outputs: Arc::new(MemoryOutputs::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            builder: self.builder.clone(),
            finalizer: self.finalizer.clone(),
            versions: self.versions.clone(),
            refs: self.refs.clone(),
            checks: self.checks.clone(),
            source: self.source.clone(),
            outputs: self.outputs.clone(),
        }
    }
}
