use std::io;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// A media payload written to local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMedia {
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
}

/// On-disk staging area for downloaded media.
///
/// Each payload is stored as a flat file at
/// `{dir}/{owner}/{chat}_{message}`, so a redelivered event overwrites its
/// own file instead of piling up copies.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub async fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media staging directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn media_path(&self, owner: i64, chat_id: i64, message_id: i64) -> PathBuf {
        self.dir
            .join(owner.to_string())
            .join(format!("{}_{}", chat_id, message_id))
    }

    /// Write `data` under the message's path. The bytes land in a temporary
    /// file first and are renamed into place, so readers never see a
    /// partial payload.
    pub async fn stage(
        &self,
        owner: i64,
        chat_id: i64,
        message_id: i64,
        data: &[u8],
    ) -> io::Result<StagedMedia> {
        let path = self.media_path(owner, chat_id, message_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let sha256 = hex::encode(Sha256::digest(data));

        let tmp = path.with_extension("part");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        debug!("Staged {} bytes at {}", data.len(), path.display());

        Ok(StagedMedia {
            path,
            sha256,
            size: data.len() as u64,
        })
    }
}
