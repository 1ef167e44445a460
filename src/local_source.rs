//! Local files picked or dropped for upload

use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::providers::{ProviderError, TreeFile, UploadFile};

fn file_name_of(path: &Path) -> Result<String, ProviderError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ProviderError::InvalidConfig(format!("Invalid file name: {}", path.display())))
}

/// Read one file with a MIME type guessed from its extension.
pub async fn read_local_file(path: &Path) -> Result<UploadFile, ProviderError> {
    let bytes = tokio::fs::read(path).await?;
    let name = file_name_of(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();
    Ok(UploadFile {
        name,
        bytes,
        mime_type: Some(mime),
    })
}

/// Collect every file below `root`, in sorted order.
///
/// Relative paths start with the folder's own name (`photos/2024/a.jpg` for
/// root `photos`), so uploading the tree recreates the folder itself.
pub async fn collect_folder_tree(root: &Path) -> Result<Vec<TreeFile>, ProviderError> {
    if !root.is_dir() {
        return Err(ProviderError::InvalidConfig(format!("{} is not a folder", root.display())));
    }
    let base = root.parent().unwrap_or(root);

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ProviderError::Io(std::io::Error::other(e.to_string())))?;
        if entry.file_type().is_file() {
            paths.push(entry.into_path());
        }
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let relative = path
            .strip_prefix(base)
            .map_err(|e| ProviderError::InvalidConfig(format!("Path error: {}", e)))?;
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        files.push(TreeFile {
            relative_path,
            file: read_local_file(&path).await?,
        });
    }

    debug!("Collected {} files under {}", files.len(), root.display());
    Ok(files)
}
