//! Verification key sources.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::VerifyError;
use crate::protocol::circuits::CircuitId;

/// Supplies the raw verification key document of a circuit.
#[async_trait]
pub trait KeyLoader: Send + Sync {
    async fn load(&self, circuit: CircuitId) -> Result<Vec<u8>, VerifyError>;
}

/// Reads `<dir>/<circuitId>.json`.
#[derive(Debug, Clone)]
pub struct FsKeyLoader {
    dir: PathBuf,
}

impl FsKeyLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, circuit: CircuitId) -> PathBuf {
        self.dir.join(format!("{}.json", circuit))
    }
}

#[async_trait]
impl KeyLoader for FsKeyLoader {
    async fn load(&self, circuit: CircuitId) -> Result<Vec<u8>, VerifyError> {
        let path = self.path_for(circuit);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Verification key missing");
                Err(VerifyError::KeyNotFound(circuit.to_string()))
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "Cannot read verification key: {}", e);
                Err(VerifyError::KeyNotFound(format!("{} ({})", circuit, e)))
            }
        }
    }
}

/// Keys held in memory, e.g. compiled into the binary or produced by a
/// local trusted setup.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyLoader {
    keys: HashMap<CircuitId, Vec<u8>>,
}

impl MemoryKeyLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, circuit: CircuitId, document: Vec<u8>) -> Self {
        self.keys.insert(circuit, document);
        self
    }
}

#[async_trait]
impl KeyLoader for MemoryKeyLoader {
    async fn load(&self, circuit: CircuitId) -> Result<Vec<u8>, VerifyError> {
        self.keys
            .get(&circuit)
            .cloned()
            .ok_or_else(|| VerifyError::KeyNotFound(circuit.to_string()))
    }
}
