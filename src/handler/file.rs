//! Keeps a "latest collection" JSON snapshot on disk for inspection.
//!
//! The file is replaced atomically: the snapshot is written next to the target
//! and renamed over it, so readers never see a half-written document.

use crate::error::SolarError;
use crate::handler::{Delivery, PacketHandler};
use crate::packet::PacketCollection;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub struct LatestFileHandler {
    path: PathBuf,
    temp_path: PathBuf,
}

impl LatestFileHandler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        LatestFileHandler {
            path,
            temp_path: PathBuf::from(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PacketHandler for LatestFileHandler {
    fn name(&self) -> &str {
        "latest_file"
    }

    async fn handle(&mut self, collection: &PacketCollection) -> Result<Delivery, SolarError> {
        let json = serde_json::to_vec_pretty(collection)?;
        tokio::fs::write(&self.temp_path, json).await?;
        tokio::fs::rename(&self.temp_path, &self.path).await?;
        Ok(Delivery::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::collection;

    #[tokio::test]
    async fn test_snapshot_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.json");
        let mut handler = LatestFileHandler::new(&path);

        handler.handle(&collection("first")).await.unwrap();
        handler.handle(&collection("second")).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["id"], "second");
        assert!(!dir.path().join("latest.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = LatestFileHandler::new(dir.path().join("nope").join("latest.json"));
        let err = handler.handle(&collection("x")).await.unwrap_err();
        assert!(matches!(err, SolarError::Io(_)));
    }
}
