//! Owns the generation run: batch concept generation followed by per-concept
//! image generation, either as an in-order bulk pass or one item at a time.
//!
//! The concept list is never mutated in place. Every update derives a new list
//! from the current one with a single concept replaced, and updates address
//! concepts by their stable `id`, so a result that lands after a reset or a
//! new run finds nothing to update and is dropped.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::{self, ConceptArchive};
use crate::backoff::BackoffPolicy;
use crate::concepts;
use crate::error::{AppError, AppResult, ExportError, ImageGenerationError};
use crate::gemini::GenerativeBackend;
use crate::images;
use crate::models::{
    Concept, ConceptDetails, EmbeddedImage, GenerateRequest, GenerationParams, GenerationRun, RunSnapshot, RunStatus,
};

/// How a single image attempt settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ImageOutcome {
    Attached,
    /// The concept already had an image or a request in flight.
    Skipped,
    Failed { error: String },
    /// The batch was replaced while the request was in flight.
    Discarded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    #[serde(flatten)]
    pub outcome: ImageOutcome,
    pub concept: Option<Concept>,
}

#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn GenerativeBackend>,
    image_backoff: BackoffPolicy,
    run: Arc<RwLock<GenerationRun>>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn GenerativeBackend>, image_backoff: BackoffPolicy) -> Self {
        Self { backend, image_backoff, run: Arc::default() }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.run.read().snapshot()
    }

    /// Generates the concept batch, then enqueues the bulk image pass.
    pub async fn generate(&self, request: GenerateRequest) -> AppResult<RunSnapshot> {
        self.start_run(request, true).await
    }

    /// Validates the inputs and runs the batch concept request. Rejected inputs
    /// leave the run untouched.
    pub async fn generate_concepts(&self, request: GenerateRequest) -> AppResult<RunSnapshot> {
        self.start_run(request, false).await
    }

    /// The request and its write-back run on a spawned task, so a caller that
    /// goes away mid-request cannot leave the run in `GENERATING_CONCEPTS`.
    async fn start_run(&self, request: GenerateRequest, with_images: bool) -> AppResult<RunSnapshot> {
        let params = GenerationParams::try_from(request).map_err(AppError::Validation)?;

        let run_id = {
            let mut run = self.run.write();
            if run.status == RunStatus::GeneratingConcepts {
                return Err(AppError::Conflict("concept generation is already in progress".into()));
            }
            let now = Utc::now();
            *run = GenerationRun {
                run_id: Uuid::new_v4(),
                status: RunStatus::GeneratingConcepts,
                params: Some(params.clone()),
                started_at: Some(now),
                updated_at: Some(now),
                ..GenerationRun::default()
            };
            run.run_id
        };
        info!("🚀 Run {} started with {} reference images", run_id, params.images.len());

        let this = self.clone();
        tokio::spawn(async move {
            let snapshot = this.request_concepts(run_id, &params).await?;
            if with_images && snapshot.status == RunStatus::Complete {
                this.spawn_image_pass();
            }
            Ok::<_, AppError>(snapshot)
        })
        .await?
    }

    async fn request_concepts(&self, run_id: Uuid, params: &GenerationParams) -> AppResult<RunSnapshot> {
        let result = concepts::generate_concepts(self.backend.as_ref(), params).await;

        let mut run = self.run.write();
        if run.run_id != run_id {
            warn!("Discarding concept batch of replaced run {}", run_id);
            return Ok(run.snapshot());
        }
        run.touch();
        match result {
            Ok(concepts) => {
                run.concepts = concepts;
                run.status = RunStatus::Complete;
                Ok(run.snapshot())
            }
            Err(e) => {
                run.concepts = Vec::new();
                run.error = Some(e.to_string());
                run.status = RunStatus::Error;
                Err(e.into())
            }
        }
    }

    /// Starts the bulk pass for the current run. `None` when the run is not
    /// complete or already has a pass running; that pass covers every concept.
    fn spawn_image_pass(&self) -> Option<JoinHandle<usize>> {
        let run_id = {
            let mut run = self.run.write();
            if run.status != RunStatus::Complete || run.image_pass {
                return None;
            }
            run.image_pass = true;
            run.run_id
        };
        let this = self.clone();
        Some(tokio::spawn(async move {
            let attached = this.generate_missing_images().await;
            let mut run = this.run.write();
            if run.run_id == run_id {
                run.image_pass = false;
            }
            attached
        }))
    }

    pub fn regenerate_missing_images(&self) -> AppResult<Option<JoinHandle<usize>>> {
        self.ensure_complete()?;
        let pass = self.spawn_image_pass();
        if pass.is_none() {
            debug!("Image pass already running");
        }
        Ok(pass)
    }

    /// Bulk pass body: one request at a time, in list order. Returns how many
    /// images were attached.
    async fn generate_missing_images(&self) -> usize {
        let ids: Vec<Uuid> = {
            let run = self.run.read();
            if run.status != RunStatus::Complete {
                return 0;
            }
            run.concepts.iter().map(|c| c.id).collect()
        };

        let mut attached = 0;
        for id in ids {
            match self.generate_image_by_id(id).await {
                ImageOutcome::Attached => attached += 1,
                ImageOutcome::Discarded => break,
                _ => {}
            }
        }
        info!("🖼️ Image pass finished: {} attached", attached);
        attached
    }

    /// Single-item trigger. A no-op when the concept already has an image or
    /// an image request in flight. The claim, request and settle run on a
    /// spawned task so the in-flight flag is always cleared.
    pub async fn generate_image_for(&self, index: usize) -> AppResult<ImageReport> {
        let id = {
            let run = self.run.read();
            if run.status != RunStatus::Complete {
                return Err(AppError::Conflict("images can only be generated for a completed concept batch".into()));
            }
            run.concepts
                .get(index)
                .map(|c| c.id)
                .ok_or_else(|| AppError::NotFound(format!("no concept at index {index}")))?
        };

        let this = self.clone();
        let outcome = tokio::spawn(async move { this.generate_image_by_id(id).await }).await?;
        let concept = self.run.read().concepts.iter().find(|c| c.id == id).cloned();
        Ok(ImageReport { outcome, concept })
    }

    pub fn reset(&self) {
        *self.run.write() = GenerationRun { run_id: Uuid::new_v4(), ..GenerationRun::default() };
        info!("🔄 Run reset");
    }

    pub fn dismiss_error(&self) {
        let mut run = self.run.write();
        run.error = None;
        run.touch();
    }

    pub async fn export_archive(&self) -> AppResult<ConceptArchive> {
        let concepts = {
            let run = self.run.read();
            if run.concepts.is_empty() {
                return Err(AppError::Conflict("there are no concepts to export".into()));
            }
            if run.concepts.iter().any(|c| c.is_generating_image) {
                return Err(AppError::Conflict("images are still being generated".into()));
            }
            run.concepts.clone()
        };

        let archive = tokio::task::spawn_blocking(move || archive::export_concepts(&concepts))
            .await
            .map_err(|e| ExportError::Interrupted(e.to_string()))??;
        Ok(archive)
    }

    fn ensure_complete(&self) -> AppResult<()> {
        match self.run.read().status {
            RunStatus::Complete => Ok(()),
            _ => Err(AppError::Conflict("images can only be generated for a completed concept batch".into())),
        }
    }

    async fn generate_image_by_id(&self, id: Uuid) -> ImageOutcome {
        let Some(details) = self.claim(id) else {
            return if self.contains(id) { ImageOutcome::Skipped } else { ImageOutcome::Discarded };
        };
        let result = images::generate_concept_image(self.backend.as_ref(), &details, self.image_backoff).await;
        self.settle(id, result)
    }

    fn contains(&self, id: Uuid) -> bool {
        self.run.read().concepts.iter().any(|c| c.id == id)
    }

    /// Checks the idempotence guard and marks the concept in flight under one lock.
    fn claim(&self, id: Uuid) -> Option<ConceptDetails> {
        let mut run = self.run.write();
        if run.status != RunStatus::Complete {
            return None;
        }
        let details = run.concepts.iter().find(|c| c.id == id && c.needs_image())?.details.clone();
        let updated = replace_concept(&run.concepts, id, |c| Concept { is_generating_image: true, ..c.clone() });
        run.concepts = updated;
        run.touch();
        Some(details)
    }

    fn settle(&self, id: Uuid, result: Result<EmbeddedImage, ImageGenerationError>) -> ImageOutcome {
        let mut run = self.run.write();
        if !run.concepts.iter().any(|c| c.id == id) {
            debug!("Dropping image result for concept {} of a replaced batch", id);
            return ImageOutcome::Discarded;
        }
        let (image, outcome) = match result {
            Ok(image) => (Some(image), ImageOutcome::Attached),
            Err(e) => {
                warn!("Image generation failed for concept {}: {}", id, e);
                (None, ImageOutcome::Failed { error: e.to_string() })
            }
        };
        let updated = replace_concept(&run.concepts, id, |c| Concept {
            image_url: image.clone().or_else(|| c.image_url.clone()),
            is_generating_image: false,
            ..c.clone()
        });
        run.concepts = updated;
        run.touch();
        outcome
    }
}

fn replace_concept(concepts: &[Concept], id: Uuid, update: impl Fn(&Concept) -> Concept) -> Vec<Concept> {
    concepts.iter().map(|c| if c.id == id { update(c) } else { c.clone() }).collect()
}
