//! Scripted stand-in for the Gemini backend used across unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::gemini::{ContentPart, GeminiError, GenerativeBackend, StructuredRequest};
use crate::models::{ConceptDetails, EmbeddedImage, GenerationMode, GenerationParams};

type StructuredReply = Result<Option<String>, GeminiError>;
type ContentReply = Result<Option<Vec<ContentPart>>, GeminiError>;

/// Replies come from the queues in order; once a queue is empty the fake
/// answers with a valid ten-concept batch or a PNG image.
#[derive(Default)]
pub struct FakeBackend {
    structured: Mutex<VecDeque<StructuredReply>>,
    content: Mutex<VecDeque<ContentReply>>,
    structured_calls: AtomicUsize,
    content_calls: AtomicUsize,
    last_structured: Mutex<Option<StructuredRequest>>,
    content_prompts: Mutex<Vec<String>>,
    structured_gate: Mutex<Option<Arc<Semaphore>>>,
    content_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_structured(&self, reply: StructuredReply) {
        self.structured.lock().push_back(reply);
    }

    pub fn push_content(&self, reply: ContentReply) {
        self.content.lock().push_back(reply);
    }

    /// Holds every concept request until the returned semaphore gets permits.
    /// Waiters are released in call order.
    pub fn gate_structured(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.structured_gate.lock() = Some(gate.clone());
        gate
    }

    /// Holds every image request until the returned semaphore gets permits.
    pub fn gate_content(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.content_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn structured_calls(&self) -> usize {
        self.structured_calls.load(Ordering::SeqCst)
    }

    pub fn content_calls(&self) -> usize {
        self.content_calls.load(Ordering::SeqCst)
    }

    pub fn last_structured_request(&self) -> Option<StructuredRequest> {
        self.last_structured.lock().clone()
    }

    pub fn content_prompts(&self) -> Vec<String> {
        self.content_prompts.lock().clone()
    }
}

#[async_trait]
impl GenerativeBackend for FakeBackend {
    async fn generate_structured(&self, request: StructuredRequest) -> Result<Option<String>, GeminiError> {
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_structured.lock() = Some(request);
        pass_gate(&self.structured_gate).await;
        let reply = self.structured.lock().pop_front();
        reply.unwrap_or_else(|| Ok(Some(concept_batch_json(10))))
    }

    async fn generate_content(&self, prompt: &str) -> Result<Option<Vec<ContentPart>>, GeminiError> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        self.content_prompts.lock().push(prompt.to_string());
        pass_gate(&self.content_gate).await;
        let reply = self.content.lock().pop_front();
        reply.unwrap_or_else(|| Ok(Some(vec![ContentPart::Image(png_image())])))
    }
}

async fn pass_gate(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = gate.lock().clone();
    if let Some(gate) = gate {
        gate.acquire().await.expect("gate closed").forget();
    }
}

/// A valid batch of `count` concepts named `{prefix} 0`, `{prefix} 1`, …
pub fn named_batch_json(prefix: &str, count: usize) -> String {
    let batch: Vec<ConceptDetails> = (0..count).map(|i| details(&format!("{prefix} {i}"))).collect();
    serde_json::to_string(&batch).expect("serialize batch")
}

pub fn details(name: &str) -> ConceptDetails {
    ConceptDetails {
        name: name.to_string(),
        description: format!("A round little {name}"),
        color_scheme: format!("{name} colors"),
        size: "12cm".into(),
        yarn: "Milk cotton, DK".into(),
        hook: "2.5mm".into(),
    }
}

pub fn concept_batch_json(count: usize) -> String {
    named_batch_json("Critter", count)
}

/// A 1x1 transparent PNG.
pub fn png_image() -> EmbeddedImage {
    EmbeddedImage::new(
        "image/png",
        "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=",
    )
}

pub fn params(reference_count: usize, mode: GenerationMode, character: &str) -> GenerationParams {
    GenerationParams {
        images: vec![png_image(); reference_count],
        color_count: 3,
        style: "Kawaii".into(),
        mode,
        character: character.into(),
    }
}
