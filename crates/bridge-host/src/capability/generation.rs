//! Hyper3D Rodin model generation jobs, gated by [`Feature::Hyper3d`].
//!
//! A job is submitted with a text prompt or reference images, polled until
//! every sub-job reports `Done`, and its mesh is then imported into the scene
//! under a caller-chosen name. Jobs are addressed either by subscription key
//! and task uuid or by a single request id, depending on the backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use bridge_config::Feature;

use super::Capability;
use super::scene::{MeshStats, SceneHost, SceneObject};
use crate::dispatch::{HandlerError, HandlerGroup, handler_fn};

const POLLS_UNTIL_DONE: u32 = 2;
const NOT_READY: &str = "Generation failed. Please first make sure that all jobs of the task are done and then try again later.";

/// Inputs of one generation job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationRequest {
    /// Text description of the model.
    #[serde(default)]
    pub text_prompt: Option<String>,
    /// Reference image URLs.
    #[serde(default)]
    pub images: Option<Vec<String>>,
    /// Bounding box ratios normalised to whole percentages.
    #[serde(default)]
    pub bbox_condition: Option<Vec<i64>>,
}

/// Handles returned when a job is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedJob {
    /// Task uuid used to fetch the result.
    pub uuid: String,
    /// Sub-job handles.
    pub jobs: JobHandles,
    /// Seconds since the Unix epoch at submission.
    pub submit_time: String,
}

/// Sub-job handles of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandles {
    /// One uuid per sub-job.
    pub uuids: Vec<String>,
    /// Key used to poll the task's progress.
    pub subscription_key: String,
}

/// Progress of one sub-job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    /// Queued.
    Waiting,
    /// Running.
    Generating,
    /// Finished with a result.
    Done,
    /// Finished without a result.
    Failed,
}

/// Mesh produced by a finished job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratedMesh {
    /// Geometry counts.
    pub stats: MeshStats,
    /// Axis-aligned bounds at import time.
    pub bounds: [[f64; 3]; 2],
}

/// Generation service the jobs run on.
pub trait JobBackend: Send + Sync {
    /// Submits a job.
    ///
    /// # Errors
    ///
    /// Returns the service's rejection message.
    fn submit(&self, request: &GenerationRequest) -> Result<SubmittedJob, String>;

    /// Progress of every sub-job of the task identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns a description of the lookup failure.
    fn poll(&self, key: &str) -> Result<Vec<JobState>, String>;

    /// Mesh of the task identified by `task`, once every sub-job is done.
    ///
    /// # Errors
    ///
    /// Returns a description of the download failure.
    fn fetch(&self, task: &str) -> Result<Option<GeneratedMesh>, String>;
}

/// Jobs simulated in memory.
///
/// A task reports `Generating` on its first poll and `Done` from the second
/// poll onwards. Finished tasks yield a unit cube.
#[derive(Debug, Default)]
pub struct InMemoryJobs {
    sequence: AtomicU64,
    tasks: Mutex<BTreeMap<String, TaskRecord>>,
}

#[derive(Debug)]
struct TaskRecord {
    subscription_key: String,
    polls: u32,
}

impl InMemoryJobs {
    /// Creates a backend with no tasks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, TaskRecord>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobBackend for InMemoryJobs {
    fn submit(&self, request: &GenerationRequest) -> Result<SubmittedJob, String> {
        let has_prompt = request
            .text_prompt
            .as_deref()
            .is_some_and(|prompt| !prompt.trim().is_empty());
        let has_images = request.images.as_ref().is_some_and(|images| !images.is_empty());
        if !has_prompt && !has_images {
            return Err("A text prompt or at least one image is required".to_owned());
        }

        let number = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let uuid = format!("task-{number:04}");
        let subscription_key = format!("subscription-{number:04}");
        self.lock().insert(
            uuid.clone(),
            TaskRecord {
                subscription_key: subscription_key.clone(),
                polls: 0,
            },
        );
        let submitted = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Ok(SubmittedJob {
            jobs: JobHandles {
                uuids: vec![format!("{uuid}-mesh")],
                subscription_key,
            },
            uuid,
            submit_time: submitted.to_string(),
        })
    }

    fn poll(&self, key: &str) -> Result<Vec<JobState>, String> {
        let mut tasks = self.lock();
        let record = tasks
            .iter_mut()
            .find(|(uuid, record)| record.subscription_key == key || uuid.as_str() == key)
            .map(|(_, record)| record)
            .ok_or_else(|| format!("Unknown subscription: {key}"))?;
        record.polls = record.polls.saturating_add(1);
        let state = if record.polls >= POLLS_UNTIL_DONE {
            JobState::Done
        } else {
            JobState::Generating
        };
        Ok(vec![state])
    }

    fn fetch(&self, task: &str) -> Result<Option<GeneratedMesh>, String> {
        let done = self
            .lock()
            .get(task)
            .is_some_and(|record| record.polls >= POLLS_UNTIL_DONE);
        Ok(done.then_some(GeneratedMesh {
            stats: MeshStats {
                vertices: 8,
                edges: 12,
                polygons: 6,
            },
            bounds: [[-0.5, -0.5, 0.0], [0.5, 0.5, 1.0]],
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PollParams {
    #[serde(default)]
    subscription_key: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportParams {
    name: String,
    #[serde(default)]
    task_uuid: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

/// Hyper3D job handlers over a [`JobBackend`] and the scene results land in.
pub struct GenerationCapability<J, H> {
    jobs: J,
    scene: H,
}

impl<J: JobBackend, H: SceneHost> GenerationCapability<J, H> {
    /// Wraps `jobs`, importing finished meshes into `scene`.
    pub const fn new(jobs: J, scene: H) -> Self {
        Self { jobs, scene }
    }

    fn create(&self, request: &GenerationRequest) -> Value {
        match self.jobs.submit(request) {
            Ok(job) => serde_json::to_value(job)
                .unwrap_or_else(|error| json!({"error": error.to_string()})),
            Err(error) => json!({"error": error}),
        }
    }

    fn poll(&self, params: PollParams) -> Result<Value, HandlerError> {
        let key = params
            .subscription_key
            .or(params.request_id)
            .ok_or_else(|| HandlerError::failed("subscription_key or request_id is required"))?;
        Ok(match self.jobs.poll(&key) {
            Ok(states) => json!({"status_list": states}),
            Err(error) => json!({"error": error}),
        })
    }

    fn import(&self, params: ImportParams) -> Result<Value, HandlerError> {
        let task = params
            .task_uuid
            .or(params.request_id)
            .ok_or_else(|| HandlerError::failed("task_uuid or request_id is required"))?;
        let mesh = match self.jobs.fetch(&task) {
            Ok(Some(mesh)) => mesh,
            Ok(None) => return Ok(json!({"succeed": false, "error": NOT_READY})),
            Err(error) => return Ok(json!({"succeed": false, "error": error})),
        };

        let mut object = SceneObject::new(params.name, "MESH", [0.0; 3]);
        object.mesh = Some(mesh.stats);
        object.world_bounding_box = Some(mesh.bounds);
        self.scene.add_object(object.clone());
        Ok(json!({
            "succeed": true,
            "name": object.name,
            "type": object.kind,
            "location": object.location,
            "rotation": object.rotation,
            "scale": object.scale,
            "world_bounding_box": object.world_bounding_box,
        }))
    }
}

impl<J, H> Capability for GenerationCapability<J, H>
where
    J: JobBackend + 'static,
    H: SceneHost + 'static,
{
    fn feature(&self) -> Option<Feature> {
        Some(Feature::Hyper3d)
    }

    fn register(self: Arc<Self>, group: &mut HandlerGroup) {
        let generation = Arc::clone(&self);
        group.add(
            "create_rodin_job",
            handler_fn(move |request: GenerationRequest| {
                Ok::<_, HandlerError>(generation.create(&request))
            }),
        );
        let generation = Arc::clone(&self);
        group.add(
            "poll_rodin_job_status",
            handler_fn(move |params: PollParams| generation.poll(params)),
        );
        group.add(
            "import_generated_asset",
            handler_fn(move |params: ImportParams| self.import(params)),
        );
    }
}
