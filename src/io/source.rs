use crate::error::FetchError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// Where performance files (MIDI parts, audio) come from
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError>;
}

/// Files under a root directory
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetSource for FileSource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.root.join(location);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(source) => Err(FetchError::Io {
                location: path.display().to_string(),
                source,
            }),
        }
    }
}

/// In-memory assets keyed by location
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    assets: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(location.into(), bytes);
    }

    pub fn with(mut self, location: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(location, bytes);
        self
    }
}

#[async_trait]
impl AssetSource for MemorySource {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, FetchError> {
        self.assets
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(location.to_string()))
    }
}

/// Fetch the first candidate that can be read, trying them in order
pub async fn fetch_first(
    source: &dyn AssetSource,
    candidates: &[String],
) -> Result<(String, Vec<u8>), FetchError> {
    let mut failures = Vec::new();
    for candidate in candidates {
        match source.fetch(candidate).await {
            Ok(bytes) => return Ok((candidate.clone(), bytes)),
            Err(e) => {
                log::warn!("Candidate {} failed: {}", candidate, e);
                failures.push(format!("{}: {}", candidate, e));
            }
        }
    }
    Err(FetchError::AllCandidatesFailed(failures))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_first_falls_back() {
        let source = MemorySource::new().with("song.mp3", vec![1, 2, 3]);
        let candidates = vec!["song.wav".to_string(), "song.mp3".to_string()];
        let (used, bytes) = fetch_first(&source, &candidates).await.unwrap();
        assert_eq!(used, "song.mp3");
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fetch_first_reports_every_failure() {
        let source = MemorySource::new();
        let candidates = vec!["a.wav".to_string(), "b.mp3".to_string()];
        match fetch_first(&source, &candidates).await {
            Err(FetchError::AllCandidatesFailed(failures)) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected result: {:?}", other.map(|(c, _)| c)),
        }
    }

    #[tokio::test]
    async fn test_file_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part.mid"), b"MThd").unwrap();
        let source = FileSource::new(dir.path());
        assert_eq!(source.fetch("part.mid").await.unwrap(), b"MThd".to_vec());
        assert!(matches!(
            source.fetch("missing.mid").await,
            Err(FetchError::NotFound(_))
        ));
    }
}
