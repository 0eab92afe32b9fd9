//! Shared corpus and providers for the engine tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scout_core::{AppError, AppResult};

use crate::config::RetrievalConfig;
use crate::embeddings::providers::trigram::TrigramProvider;
use crate::embeddings::EmbeddingProvider;
use crate::engine::Engine;
use crate::types::{Fragment, FragmentId, FragmentKind};

pub const DIMENSIONS: usize = 64;

pub fn fragment(id: &str, path: &str, kind: FragmentKind, text: &str) -> Fragment {
    let lines = text.lines().count().max(1) as u32;
    Fragment {
        id: FragmentId::new(id),
        source_path: path.to_string(),
        start_line: 1,
        end_line: lines,
        kind,
        text: text.to_string(),
        symbol: kind.is_code().then(|| id.to_string()),
    }
}

/// A small repository: two database helpers, two physics functions where
/// `build_grid` calls `compute_density`, a README and a CSV sample.
pub fn corpus() -> Vec<Fragment> {
    vec![
        fragment(
            "open_database_pool",
            "store/pool.py",
            FragmentKind::CodeFunction,
            "def open_database_pool(url, size):\n    connection = connect(url)\n    return Pool(connection, size)\n",
        ),
        fragment(
            "connect",
            "store/connect.py",
            FragmentKind::CodeFunction,
            "def connect(url):\n    return Connection(url)\n",
        ),
        fragment(
            "compute_density",
            "physics/density.py",
            FragmentKind::CodeFunction,
            "def compute_density(mass, volume):\n    return mass / volume\n",
        ),
        fragment(
            "build_grid",
            "physics/grid.py",
            FragmentKind::CodeFunction,
            "def build_grid(n):\n    cells = [compute_density(1.0, 2.0) for _ in range(n)]\n    return cells\n",
        ),
        fragment(
            "readme",
            "README.md",
            FragmentKind::ProseBlock,
            "Scout indexes the repository and answers questions about the physics code.",
        ),
        fragment(
            "results",
            "data/results.csv",
            FragmentKind::DataSample,
            "centrality,rapidity,pt\n0-10,0.5,1.2\n",
        ),
    ]
}

pub fn engine_with(config: RetrievalConfig) -> Engine {
    Engine::new(config, Arc::new(TrigramProvider::new(DIMENSIONS))).unwrap()
}

pub async fn indexed_engine() -> Engine {
    let engine = engine_with(RetrievalConfig::default());
    engine.build_index(corpus()).await.unwrap();
    engine
}

/// Trigram embeddings that can be made to stall or fail on demand.
#[derive(Debug)]
pub struct ControlledProvider {
    inner: TrigramProvider,
    pub slow: AtomicBool,
    pub failing: AtomicBool,
}

impl ControlledProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: TrigramProvider::new(DIMENSIONS),
            slow: AtomicBool::new(false),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set_slow(&self, slow: bool) {
        self.slow.store(slow, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for ControlledProvider {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Embedding("provider offline".to_string()));
        }
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.embed_batch(texts).await
    }
}
