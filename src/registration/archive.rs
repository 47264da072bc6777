use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const ARCHIVE_FORMAT: &str = "campus-documents-v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub uid: String,
    pub document_type: String,
    pub file_name: String,
    pub sha256: String,
    /// Relative to the workspace root on the way in; the entry name in the
    /// archive on the way out.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub format: String,
    pub app_version: String,
    pub exported_at: String,
    pub documents: Vec<ArchiveEntry>,
}

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub entry_count: usize,
    pub out_path: PathBuf,
}

/// Entry names are flat per student so two requests never collide.
pub fn entry_name(uid: &str, document_type: &str, file_name: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect()
    };
    format!(
        "documents/{}/{}-{}",
        clean(uid),
        clean(document_type),
        clean(file_name)
    )
}

pub fn export_document_archive(
    workspace_path: &Path,
    entries: &[ArchiveEntry],
    out_path: &Path,
    exported_at: &str,
) -> anyhow::Result<ArchiveSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut written = Vec::with_capacity(entries.len());
    for entry in entries {
        let src = workspace_path.join(&entry.path);
        let mut f = File::open(&src)
            .with_context(|| format!("failed to open stored document {}", src.to_string_lossy()))?;
        let name = entry_name(&entry.uid, &entry.document_type, &entry.file_name);
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start entry {name}"))?;
        std::io::copy(&mut f, &mut zip).with_context(|| format!("failed to write entry {name}"))?;
        written.push(ArchiveEntry {
            path: name,
            ..entry.clone()
        });
    }

    let manifest = Manifest {
        format: ARCHIVE_FORMAT.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: exported_at.to_string(),
        documents: written,
    };
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;
    zip.finish().context("failed to finalize zip archive")?;

    Ok(ArchiveSummary {
        entry_count: entries.len(),
        out_path: out_path.to_path_buf(),
    })
}

pub fn read_manifest(path: &Path) -> anyhow::Result<Manifest> {
    let f = File::open(path)
        .with_context(|| format!("failed to open archive {}", path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(f).context("invalid zip archive")?;
    let mut text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("archive missing manifest.json")?
        .read_to_string(&mut text)
        .context("failed to read manifest.json")?;
    let manifest: Manifest = serde_json::from_str(&text).context("manifest.json is invalid JSON")?;
    if manifest.format != ARCHIVE_FORMAT {
        return Err(anyhow!("unsupported archive format: {}", manifest.format));
    }
    Ok(manifest)
}
