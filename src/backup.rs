use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE_NAME;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/campus.sqlite3";
const MEDIA_PREFIX: &str = "media/";
pub const BUNDLE_FORMAT_V1: &str = "campus-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub media_files: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub media_files: usize,
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf).context("failed to read for hashing")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn list_media_files(workspace_path: &Path) -> anyhow::Result<Vec<String>> {
    let media_dir = workspace_path.join("media");
    let mut names = Vec::new();
    if !media_dir.is_dir() {
        return Ok(names);
    }
    for entry in std::fs::read_dir(&media_dir)
        .with_context(|| format!("failed to list {}", media_dir.to_string_lossy()))?
    {
        let entry = entry.context("failed to read media directory entry")?;
        if entry.file_type().context("failed to stat media entry")?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Writes the workspace bundle: a manifest with SHA-256 checksums, the
/// database, and every file under `media/`.
pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let media_names = list_media_files(workspace_path)?;
    let db_sha256 = sha256_file(&db_path)?;
    let mut media_manifest = Vec::with_capacity(media_names.len());
    for name in &media_names {
        let path = workspace_path.join("media").join(name);
        let meta = std::fs::metadata(&path)
            .with_context(|| format!("failed to stat {}", path.to_string_lossy()))?;
        media_manifest.push(json!({
            "name": name,
            "sizeBytes": meta.len(),
            "sha256": sha256_file(&path)?,
        }));
    }

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "database": { "entry": DB_ENTRY, "sha256": db_sha256 },
        "media": media_manifest,
    });

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    for name in &media_names {
        let path = workspace_path.join("media").join(name);
        zip.start_file(format!("{}{}", MEDIA_PREFIX, name), opts)
            .with_context(|| format!("failed to start media entry {}", name))?;
        let mut f = File::open(&path)
            .with_context(|| format!("failed to open media file {}", path.to_string_lossy()))?;
        std::io::copy(&mut f, &mut zip)
            .with_context(|| format!("failed to write media entry {}", name))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        media_files: media_names.len(),
    })
}

/// Restores a workspace from a bundle. The database lands via a temp file
/// and rename, and every checksum in the manifest is verified before the
/// restored file is accepted.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    if !is_zip_file(in_path)? {
        return Err(anyhow!(
            "not a workspace bundle: {}",
            in_path.to_string_lossy()
        ));
    }

    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_db_sha = manifest
        .get("database")
        .and_then(|d| d.get("sha256"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest is missing the database checksum"))?
        .to_string();

    let dst = workspace_path.join(DB_FILE_NAME);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let mut db_out = File::create(&tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/campus.sqlite3")?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    }
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    let actual_db_sha = sha256_file(&tmp_dst)?;
    if actual_db_sha != expected_db_sha {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(anyhow!(
            "database checksum mismatch: expected {}, got {}",
            expected_db_sha,
            actual_db_sha
        ));
    }

    let mut media_files = 0usize;
    let media_dir = workspace_path.join("media");
    std::fs::create_dir_all(&media_dir)
        .with_context(|| format!("failed to create {}", media_dir.to_string_lossy()))?;
    if let Some(entries) = manifest.get("media").and_then(|v| v.as_array()) {
        for entry in entries {
            let name = entry
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("media manifest entry is missing a name"))?;
            if name.contains('/') || name.contains('\\') || name.contains("..") {
                return Err(anyhow!("media manifest entry has an unsafe name: {}", name));
            }
            let expected_sha = entry
                .get("sha256")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("media manifest entry {} is missing a checksum", name))?;

            let out = media_dir.join(name);
            {
                let mut media_entry = archive
                    .by_name(&format!("{}{}", MEDIA_PREFIX, name))
                    .with_context(|| format!("bundle missing media entry {}", name))?;
                let mut media_out = File::create(&out)
                    .with_context(|| format!("failed to create {}", out.to_string_lossy()))?;
                std::io::copy(&mut media_entry, &mut media_out)
                    .with_context(|| format!("failed to extract media entry {}", name))?;
            }
            let actual_sha = sha256_file(&out)?;
            if actual_sha != expected_sha {
                return Err(anyhow!(
                    "media checksum mismatch for {}: expected {}, got {}",
                    name,
                    expected_sha,
                    actual_sha
                ));
            }
            media_files += 1;
        }
    }

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        media_files,
    })
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
