use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A video stored in the upload directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAsset {
    /// File stem, unique within the upload directory
    pub id: String,
    /// File name on disk
    pub name: String,
    pub path: PathBuf,
    /// Name given by the uploader, only known for freshly stored assets
    pub original_name: Option<String>,
}

impl VideoAsset {
    pub fn from_path(path: PathBuf, original_name: Option<String>) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&name)
            .to_string();

        Some(Self {
            id,
            name,
            path,
            original_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_splits_name_and_stem() {
        let asset = VideoAsset::from_path(
            PathBuf::from("/uploads/1718000000000-ab12.mp4"),
            Some("serve.mp4".to_string()),
        )
        .unwrap();

        assert_eq!(asset.id, "1718000000000-ab12");
        assert_eq!(asset.name, "1718000000000-ab12.mp4");
        assert_eq!(asset.original_name.as_deref(), Some("serve.mp4"));
    }

    #[test]
    fn test_from_path_without_file_name() {
        assert!(VideoAsset::from_path(PathBuf::from("/"), None).is_none());
    }
}
