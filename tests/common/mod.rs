//! Shared fixtures for the integration suites: a temp database, a template
//! directory, and deterministic in-process model backends.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use page_rag::config::{
    ChunkingConfig, Config, DbConfig, LoggingConfig, OllamaConfig, PromptConfig,
    RetrievalConfig, ServerConfig,
};
use page_rag::embedding::Embedder;
use page_rag::error::RagResult;
use page_rag::generation::{ChatMessage, Generator};
use page_rag::indexer::{self, IndexSettings, Indexer};
use page_rag::prompt::PromptRenderer;
use page_rag::rag::RagPipeline;
use page_rag::server::{self, AppState};
use page_rag::{db, migrate};

pub const TEST_DIMS: usize = 32;

pub const GROUNDING_TEMPLATE: &str =
    "Context:\n{{retrieved_text}}\n---\nQuestion: {{question}}";

/// Bag-of-words embedder: each lowercase word bumps one hashed bucket.
/// Texts sharing words end up close in cosine distance.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; TEST_DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut h: u64 = 0xcbf29ce484222325;
            for b in word.to_lowercase().bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % TEST_DIMS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dims(&self) -> usize {
        TEST_DIMS
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| HashEmbedder::vector(t)).collect())
    }
}

/// Embeds every text as the same all-ones vector under a fixed model name.
pub struct ConstantEmbedder {
    pub model: &'static str,
    pub dims: usize,
}

#[async_trait]
impl Embedder for ConstantEmbedder {
    fn model_name(&self) -> &str {
        self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; self.dims]).collect())
    }
}

/// Generator that records every prompt and replies with a fixed prefix plus
/// the prompt, so tests can see what was sent.
pub struct RecordingGenerator {
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, _model: &str, messages: &[ChatMessage]) -> RagResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok(format!("ANSWER: {}", prompt))
    }
}

pub fn test_config(root: &Path) -> Config {
    Config {
        db: DbConfig {
            path: root.join("data").join("test.sqlite"),
        },
        ollama: OllamaConfig {
            host: "http://127.0.0.1:1".to_string(),
            generation_model: "test-model".to_string(),
            embedding_model: "hash-test".to_string(),
            embedding_dims: TEST_DIMS,
            max_retries: 0,
            timeout_secs: 2,
        },
        chunking: ChunkingConfig::default(),
        retrieval: RetrievalConfig::default(),
        prompts: PromptConfig {
            templates_dir: root.join("prompt_templates"),
            grounding_template: "grounded_answer".to_string(),
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
        logging: LoggingConfig {
            level: "warn".to_string(),
            dir: root.join("logs"),
        },
    }
}

pub struct TestEnv {
    pub tmp: TempDir,
    pub config: Config,
    pub pool: SqlitePool,
    pub embedder: Arc<HashEmbedder>,
    pub generator: Arc<RecordingGenerator>,
}

impl TestEnv {
    /// Fresh database plus a template dir holding `templates`.
    pub async fn with_templates(templates: &[(&str, &str)]) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());

        fs::create_dir_all(&config.prompts.templates_dir).unwrap();
        for (name, body) in templates {
            fs::write(
                config.prompts.templates_dir.join(format!("{}.hbs", name)),
                body,
            )
            .unwrap();
        }

        let pool = db::connect(&config.db).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        Self {
            tmp,
            config,
            pool,
            embedder: Arc::new(HashEmbedder::new()),
            generator: Arc::new(RecordingGenerator::new()),
        }
    }

    pub async fn new() -> Self {
        Self::with_templates(&[("grounded_answer", GROUNDING_TEMPLATE)]).await
    }

    pub fn pipeline(&self) -> RagPipeline {
        let prompts = PromptRenderer::load(&self.config.prompts.templates_dir).unwrap();
        RagPipeline::new(
            self.pool.clone(),
            self.embedder.clone(),
            self.generator.clone(),
            Arc::new(prompts),
            &self.config,
        )
    }

    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings::from_config(&self.config)
    }

    /// Index everything that is pending, synchronously.
    pub async fn index_all(&self) {
        let report = indexer::index_pending(&self.pool, self.embedder.as_ref(), &self.index_settings())
            .await
            .unwrap();
        assert_eq!(report.failed, 0);
    }

    /// Serve the API on an ephemeral port and return its base URL.
    pub async fn spawn_server(&self) -> String {
        let (indexer, _worker) = Indexer::spawn(
            self.pool.clone(),
            self.embedder.clone(),
            self.index_settings(),
        );
        let app = server::build_router(AppState {
            pool: self.pool.clone(),
            rag: Arc::new(self.pipeline()),
            indexer,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    /// Poll until the background worker has indexed every page.
    pub async fn wait_for_index(&self) {
        for _ in 0..100 {
            let pending = indexer::pending_pages(&self.pool, self.embedder.as_ref())
                .await
                .unwrap();
            if pending.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("indexer did not catch up");
    }
}
