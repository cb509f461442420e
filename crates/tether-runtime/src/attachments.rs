//! Attachment fetching: download supported files into the per-thread temp
//! directory before their paths are injected into the window.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use tether_core::paths;
use tether_slack::{sanitize_for_path, FileAttachment, SlackApiClient};

/// Extensions the assistant can usefully open from a path.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    // images + pdf
    "png", "jpg", "jpeg", "gif", "webp", "pdf", "svg",
    // text, config, data
    "txt", "md", "markdown", "rst", "adoc", "json", "jsonl", "yaml", "yml", "toml", "xml", "ini",
    "cfg", "conf", "env", "log", "csv", "tsv", "diff", "patch", "lock",
    // code
    "rs", "py", "rb", "go", "java", "c", "h", "cpp", "hpp", "cc", "hh", "cs", "php", "swift",
    "kt", "kts", "scala", "clj", "ex", "exs", "erl", "hs", "ml", "lua", "pl", "pm", "r", "jl",
    "dart", "groovy", "gradle", "proto", "graphql", "sql", "sh", "bash", "zsh", "fish", "ps1",
    "bat", "js", "jsx", "ts", "tsx", "mjs", "cjs", "vue", "svelte", "html", "htm", "css", "scss",
    "less", "tf", "tfvars", "ipynb",
];

/// Extensionless files recognized by basename.
const SUPPORTED_BASENAMES: &[&str] = &[
    "Makefile",
    "Dockerfile",
    "Rakefile",
    "Gemfile",
    "Procfile",
    "Justfile",
    "Vagrantfile",
    "LICENSE",
    "README",
];

#[derive(Debug, Default)]
pub struct FetchReport {
    /// Local paths of successfully downloaded files, in inbound order.
    pub saved: Vec<PathBuf>,
    pub unsupported: Vec<String>,
    pub failed: Vec<String>,
}

impl FetchReport {
    /// Suffix appended to the outgoing message when anything was dropped.
    pub fn annotation(&self) -> Option<String> {
        let mut notes = Vec::new();
        if !self.unsupported.is_empty() {
            notes.push(format!(
                "[Unsupported file types: {}]",
                self.unsupported.join(", ")
            ));
        }
        if !self.failed.is_empty() {
            notes.push(format!("[Failed to download: {}]", self.failed.join(", ")));
        }
        if notes.is_empty() {
            None
        } else {
            Some(notes.join(" "))
        }
    }
}

pub fn is_supported_filename(name: &str) -> bool {
    if let Some(extension) = Path::new(name).extension().and_then(|ext| ext.to_str()) {
        return SUPPORTED_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str());
    }
    SUPPORTED_BASENAMES
        .iter()
        .any(|basename| basename.eq_ignore_ascii_case(name))
}

/// Disambiguate colliding names with a `-<k>` suffix before the extension.
fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (filename, None),
    };
    for k in 1.. {
        let next = match extension {
            Some(extension) => dir.join(format!("{stem}-{k}.{extension}")),
            None => dir.join(format!("{stem}-{k}")),
        };
        if !next.exists() {
            return next;
        }
    }
    unreachable!()
}

/// Download every supported attachment into the thread's temp directory.
///
/// One attachment failing (bad status, timeout) never aborts the rest; it is
/// reported in the annotation instead.
pub async fn fetch_attachments(
    client: &SlackApiClient,
    thread_id: &str,
    files: &[FileAttachment],
    download_timeout: Duration,
) -> Result<FetchReport> {
    let mut report = FetchReport::default();
    if files.is_empty() {
        return Ok(report);
    }

    let dir = paths::thread_files_dir(thread_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    for file in files {
        let name = file
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("{}.bin", file.id));

        if !is_supported_filename(&name) {
            report.unsupported.push(name);
            continue;
        }
        let Some(url) = file.url_private_download.as_deref() else {
            report.failed.push(name);
            continue;
        };

        let downloaded = tokio::time::timeout(download_timeout, client.download_file(url)).await;
        let bytes = match downloaded {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(error)) => {
                warn!(thread_id, file = %name, %error, "attachment download failed");
                report.failed.push(name);
                continue;
            }
            Err(_) => {
                warn!(thread_id, file = %name, "attachment download timed out");
                report.failed.push(name);
                continue;
            }
        };

        let path = unique_path(&dir, &sanitize_for_path(&name));
        if let Err(error) = std::fs::write(&path, &bytes) {
            warn!(thread_id, file = %name, %error, "failed to write attachment");
            report.failed.push(name);
            continue;
        }
        report.saved.push(path);
    }

    Ok(report)
}

/// Remove per-thread attachment directories older than the retention window.
///
/// Retention deliberately ignores session status: a terminated session may be
/// resurrected and still need its files.
pub fn cleanup_stale_thread_dirs(retention_days: u64) -> Result<usize> {
    let root = paths::files_root();
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(_) => return Ok(0),
    };

    let cutoff = std::time::SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
        .unwrap_or(std::time::UNIX_EPOCH);

    let mut removed = 0_usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or(std::time::UNIX_EPOCH);
        if modified < cutoff {
            if let Err(error) = std::fs::remove_dir_all(&path) {
                warn!(path = %path.display(), %error, "failed to remove stale attachment dir");
            } else {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_accepts_images_pdf_and_code() {
        assert!(is_supported_filename("a.png"));
        assert!(is_supported_filename("report.PDF"));
        assert!(is_supported_filename("main.rs"));
        assert!(is_supported_filename("notes.md"));
        assert!(!is_supported_filename("b.xyz"));
        assert!(!is_supported_filename("archive.tar"));
    }

    #[test]
    fn extensionless_well_known_names_are_supported() {
        assert!(is_supported_filename("Makefile"));
        assert!(is_supported_filename("Dockerfile"));
        assert!(!is_supported_filename("randomblob"));
    }

    #[test]
    fn unique_path_inserts_suffix_before_extension() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let dir = tempdir.path();

        assert_eq!(unique_path(dir, "a.png"), dir.join("a.png"));
        std::fs::write(dir.join("a.png"), b"x").expect("write");
        assert_eq!(unique_path(dir, "a.png"), dir.join("a-1.png"));
        std::fs::write(dir.join("a-1.png"), b"x").expect("write");
        assert_eq!(unique_path(dir, "a.png"), dir.join("a-2.png"));

        std::fs::write(dir.join("Makefile"), b"x").expect("write");
        assert_eq!(unique_path(dir, "Makefile"), dir.join("Makefile-1"));
    }

    #[test]
    fn annotation_lists_unsupported_then_failed() {
        let report = FetchReport {
            saved: Vec::new(),
            unsupported: vec!["b.xyz".to_string()],
            failed: vec!["c.png".to_string()],
        };
        assert_eq!(
            report.annotation().expect("annotation"),
            "[Unsupported file types: b.xyz] [Failed to download: c.png]"
        );

        assert!(FetchReport::default().annotation().is_none());
    }
}
