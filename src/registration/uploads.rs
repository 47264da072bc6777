use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::RegistrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub photo_max_kb: u64,
    pub other_max_kb: u64,
}

impl UploadLimits {
    pub fn max_bytes(&self, document_type: &str) -> u64 {
        let kb = if is_photo_like(document_type) {
            self.photo_max_kb
        } else {
            self.other_max_kb
        };
        kb * 1024
    }
}

/// Photos and signatures share the small cap.
pub fn is_photo_like(document_type: &str) -> bool {
    let t = document_type.to_ascii_uppercase();
    t.contains("PHOTO") || t.contains("SIGN")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    fn from_signature(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(Self::Png)
        } else {
            None
        }
    }
}

fn reject(document_type: &str, reason: impl Into<String>) -> RegistrationError {
    RegistrationError::UploadRejected {
        document_type: document_type.to_string(),
        reason: reason.into(),
    }
}

/// Accepts JPEG or PNG whose extension and leading bytes agree, within the cap.
pub fn check_upload(
    document_type: &str,
    path: &Path,
    bytes: &[u8],
    limits: &UploadLimits,
) -> Result<ImageFormat, RegistrationError> {
    if bytes.is_empty() {
        return Err(reject(document_type, "file is empty"));
    }
    let max = limits.max_bytes(document_type);
    if bytes.len() as u64 > max {
        return Err(reject(
            document_type,
            format!("file is {} KB, limit is {} KB", bytes.len().div_ceil(1024), max / 1024),
        ));
    }
    let Some(by_ext) = ImageFormat::from_extension(path) else {
        return Err(reject(document_type, "only .jpg, .jpeg and .png files are accepted"));
    };
    match ImageFormat::from_signature(bytes) {
        Some(sig) if sig == by_ext => Ok(sig),
        _ => Err(reject(document_type, "file contents do not match its extension")),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Upper-case words joined by `_`, used both as the record key and the stored
/// file stem. "Photo ID", "photo_id" and "PHOTO-ID" name the same document.
pub fn canonical_document_type(document_type: &str) -> Option<String> {
    let words: Vec<String> = document_type
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
        .collect();
    (!words.is_empty()).then(|| words.join("_"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub file_name: String,
    /// Relative to the workspace root.
    pub stored_path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Validates `source` and copies it under `documents/<request>/`. One file per
/// document type: a later upload overwrites the earlier one. `document_type`
/// must already be canonical.
pub fn store_document(
    workspace: &Path,
    request_id: &str,
    document_type: &str,
    source: &Path,
    limits: &UploadLimits,
) -> Result<StoredDocument, RegistrationError> {
    let bytes = std::fs::read(source)
        .map_err(|e| RegistrationError::io(format!("read {}", source.display()), e))?;
    let format = check_upload(document_type, source, &bytes, limits)?;

    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("upload.{}", format.extension()));
    let rel_dir = Path::new(crate::db::DOCUMENTS_DIR).join(request_id);
    let stored_path = rel_dir.join(format!(
        "{}.{}",
        document_type.to_ascii_lowercase(),
        format.extension()
    ));

    let abs_dir = workspace.join(&rel_dir);
    std::fs::create_dir_all(&abs_dir)
        .map_err(|e| RegistrationError::io(format!("create {}", abs_dir.display()), e))?;
    let abs_path = workspace.join(&stored_path);
    let tmp = abs_path.with_extension("uploading");
    std::fs::write(&tmp, &bytes)
        .map_err(|e| RegistrationError::io(format!("write {}", tmp.display()), e))?;
    std::fs::rename(&tmp, &abs_path)
        .map_err(|e| RegistrationError::io(format!("move into {}", abs_path.display()), e))?;

    Ok(StoredDocument {
        file_name,
        stored_path,
        size_bytes: bytes.len() as u64,
        sha256: sha256_hex(&bytes),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadTally {
    NoFiles,
    AllUploaded,
    Partial,
    AllFailed,
}

impl UploadTally {
    pub fn of(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, 0) => Self::NoFiles,
            (_, 0) => Self::AllUploaded,
            (0, _) => Self::AllFailed,
            _ => Self::Partial,
        }
    }

    /// Whether the documents declaration may be recorded.
    pub fn confirms(self, confirm_on_partial: bool) -> bool {
        match self {
            Self::NoFiles | Self::AllUploaded => true,
            Self::Partial => confirm_on_partial,
            Self::AllFailed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: UploadLimits = UploadLimits {
        photo_max_kb: 100,
        other_max_kb: 250,
    };

    fn png(len: usize) -> Vec<u8> {
        let mut v = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        v.resize(len, 0);
        v
    }

    #[test]
    fn photo_cap_is_smaller_than_other_cap() {
        let bytes = png(150 * 1024);
        let err = check_upload("PHOTO", Path::new("me.png"), &bytes, &LIMITS).unwrap_err();
        assert_eq!(err.code(), "upload_rejected");
        assert_eq!(
            check_upload("MARKSHEET", Path::new("m.png"), &bytes, &LIMITS).unwrap(),
            ImageFormat::Png
        );
        assert!(check_upload("Signature", Path::new("s.PNG"), &bytes, &LIMITS).is_err());
    }

    #[test]
    fn extension_and_signature_must_agree() {
        let bytes = png(64);
        assert!(check_upload("AADHAAR", Path::new("a.jpg"), &bytes, &LIMITS).is_err());
        assert!(check_upload("AADHAAR", Path::new("a.pdf"), &bytes, &LIMITS).is_err());
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0];
        assert_eq!(
            check_upload("AADHAAR", Path::new("a.JPEG"), &jpeg, &LIMITS).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn tally_outcomes() {
        assert_eq!(UploadTally::of(0, 0), UploadTally::NoFiles);
        assert_eq!(UploadTally::of(3, 0), UploadTally::AllUploaded);
        assert_eq!(UploadTally::of(2, 1), UploadTally::Partial);
        assert_eq!(UploadTally::of(0, 2), UploadTally::AllFailed);
        assert!(!UploadTally::Partial.confirms(false));
        assert!(UploadTally::Partial.confirms(true));
        assert!(!UploadTally::AllFailed.confirms(true));
    }

    #[test]
    fn document_types_fold_to_one_key() {
        for raw in ["Photo ID", "photo_id", " PHOTO-ID ", "photo__id"] {
            assert_eq!(canonical_document_type(raw).as_deref(), Some("PHOTO_ID"));
        }
        assert_eq!(canonical_document_type("Marksheet").as_deref(), Some("MARKSHEET"));
        assert_eq!(canonical_document_type(" -/ "), None);
    }

    #[test]
    fn reupload_replaces_stored_file() {
        let ws = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let first = src_dir.path().join("photo.png");
        std::fs::write(&first, png(32)).unwrap();
        let a = store_document(ws.path(), "req-1", "PHOTO", &first, &LIMITS).unwrap();

        let second = src_dir.path().join("photo2.png");
        std::fs::write(&second, png(48)).unwrap();
        let b = store_document(ws.path(), "req-1", "PHOTO", &second, &LIMITS).unwrap();

        assert_eq!(a.stored_path, b.stored_path);
        assert_ne!(a.sha256, b.sha256);
        let on_disk = std::fs::read(ws.path().join(&b.stored_path)).unwrap();
        assert_eq!(on_disk.len(), 48);
    }
}
