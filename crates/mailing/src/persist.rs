//! Atomic JSON snapshots shared by the file-backed stores.

use std::path::Path;

use serde::Serialize;
use tb_domain::Result;

/// Serialize `value` and replace `path` with it via a sibling temp file.
/// Callers serialize access per path; the temp name is not unique.
pub(crate) async fn write_snapshot<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    })
    .await
    .map_err(|e| tb_domain::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
