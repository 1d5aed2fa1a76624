// ========================================================================================
//
//                               Gene-set file downloader
//
// ========================================================================================

use crate::enrich::genesets::{GeneSetError, MsigdbRelease};
use dwldutil::{DLFile, Downloader};
use indicatif::ProgressStyle;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns the local path of an MSigDB release file, downloading it on first use.
///
/// The file is kept in `release.cache_dir` under its release file name, so later
/// runs reuse it without touching the network. The download as a whole is bounded
/// by `timeout`; exceeding it is reported as [`GeneSetError::TimedOut`].
pub fn fetch_release(release: &MsigdbRelease, timeout: Duration) -> Result<PathBuf, GeneSetError> {
    fs::create_dir_all(&release.cache_dir).map_err(|source| GeneSetError::Io {
        path: release.cache_dir.clone(),
        source,
    })?;

    let target = release.cache_dir.join(release.file_name());
    if is_usable(&target) {
        log::info!("Using cached gene-set file {}", target.display());
        return Ok(target);
    }

    let url = release.url();
    eprintln!("> Downloading reference gene sets from {url}");
    download_with_ceiling(&url, &target, timeout)?;

    if !is_usable(&target) {
        // A failed transfer can leave an empty file behind; never cache it.
        let _ = fs::remove_file(&target);
        return Err(GeneSetError::Unreachable(
            url,
            "the server returned no data".to_string(),
        ));
    }
    Ok(target)
}

fn is_usable(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Runs the blocking downloader on a dedicated runtime and abandons it once the
/// wall-clock ceiling has passed.
fn download_with_ceiling(url: &str, target: &Path, timeout: Duration) -> Result<(), GeneSetError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            GeneSetError::Unreachable(
                url.to_string(),
                format!("failed to create async runtime: {e}"),
            )
        })?;

    let file_to_download = DLFile::new()
        .with_url(url)
        .with_path(&target.to_string_lossy());

    // Use a progress bar style that does not require the total file size.
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .map_err(|e| GeneSetError::Unreachable(url.to_string(), e.to_string()))?
        .progress_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    let outcome = runtime.block_on(async {
        let task = tokio::task::spawn_blocking(move || {
            Downloader::new()
                .add_file(file_to_download)
                .with_style(style)
                .with_max_concurrent_downloads(1)
                .with_max_redirections(5)
                .start();
        });
        tokio::time::timeout(timeout, task).await
    });

    // The worker may still be blocked on the socket after a timeout; do not wait for it.
    runtime.shutdown_background();

    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(join_error)) => Err(GeneSetError::Unreachable(
            url.to_string(),
            join_error.to_string(),
        )),
        Err(_) => Err(GeneSetError::TimedOut {
            url: url.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::genesets::Species;
    use tempfile::tempdir;

    #[test]
    fn cached_release_is_reused_without_download() {
        let dir = tempdir().unwrap();
        let release = MsigdbRelease {
            species: Species::Human,
            cache_dir: dir.path().to_path_buf(),
            base_url: "http://127.0.0.1:9/unreachable".to_string(),
            ..MsigdbRelease::default()
        };
        let cached = dir.path().join(release.file_name());
        fs::write(&cached, "SET\tdesc\tG1\n").unwrap();

        let resolved = fetch_release(&release, Duration::from_secs(1)).unwrap();
        assert_eq!(resolved, cached);
    }

    #[test]
    fn empty_cached_file_is_not_usable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.gmt");
        fs::write(&path, "").unwrap();
        assert!(!is_usable(&path));
        assert!(!is_usable(&dir.path().join("missing.gmt")));
    }
}
