// 📥 Source Acquisition - download and extract the source archives
//
// An archive already on disk is never fetched again. Extraction always runs
// and overwrites what a previous run left behind.

use crate::config::PipelineConfig;
use crate::progress::ProgressReporter;
use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// PROVIDERS
// ============================================================================

/// Something that can stream the bytes behind a URL.
pub trait SourceProvider {
    /// Write the body of `url` into `dest`. Returns the byte count.
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64>;
}

/// Refuses every fetch; used with `--offline`.
pub struct OfflineProvider;

impl SourceProvider for OfflineProvider {
    fn fetch(&self, url: &str, _dest: &mut dyn Write) -> Result<u64> {
        bail!("offline mode: refusing to download {}", url)
    }
}

#[cfg(feature = "download")]
pub struct HttpProvider {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "download")]
impl HttpProvider {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpProvider { client })
    }
}

#[cfg(feature = "download")]
impl SourceProvider for HttpProvider {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Request failed: {}", url))?
            .error_for_status()
            .with_context(|| format!("Download failed: {}", url))?;

        let total = response.content_length().unwrap_or(0);
        copy_with_progress(response, dest, total)
            .with_context(|| format!("Download interrupted: {}", url))
    }
}

fn copy_with_progress<R: Read>(mut reader: R, dest: &mut dyn Write, total: u64) -> Result<u64> {
    let mut progress = ProgressReporter::new("download", total);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        dest.write_all(&buf[..n])?;
        progress.advance(n as u64);
    }
    dest.flush()?;
    progress.finish();
    Ok(progress.done())
}

// ============================================================================
// SOURCE ARCHIVES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceArchive {
    pub name: String,
    pub url: String,
    pub archive_path: PathBuf,
    pub extract_dir: PathBuf,
}

/// What `ensure_local` did for one archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquiredSource {
    pub name: String,
    pub archive_path: PathBuf,
    pub downloaded: bool,
    pub bytes: u64,
    pub sha256: String,
    pub extracted_entries: usize,
}

/// Every archive the pipeline needs, attribute tables first.
pub fn planned_sources(config: &PipelineConfig) -> Vec<SourceArchive> {
    let mut sources: Vec<SourceArchive> = config
        .attribute_sources
        .iter()
        .map(|s| SourceArchive {
            name: s.name.clone(),
            url: s.url.clone(),
            archive_path: config.archive_path(&s.archive),
            extract_dir: config.source_dir.clone(),
        })
        .collect();

    let geometry = &config.geometry_source;
    sources.push(SourceArchive {
        name: "boundaries".to_string(),
        url: geometry.url.clone(),
        archive_path: config.archive_path(&geometry.archive),
        extract_dir: config.source_dir.clone(),
    });

    sources
}

/// Make sure `source` is downloaded and extracted.
pub fn ensure_local(provider: &dyn SourceProvider, source: &SourceArchive) -> Result<AcquiredSource> {
    let archive = &source.archive_path;

    let downloaded = if archive.is_file() {
        info!(
            "event=download_skipped source={} archive={}",
            source.name,
            archive.display()
        );
        false
    } else {
        download(provider, &source.url, archive)
            .with_context(|| format!("Failed to acquire source {}", source.name))?;
        true
    };

    let extracted_entries = extract_archive(archive, &source.extract_dir)?;
    let bytes = fs::metadata(archive)
        .with_context(|| format!("Failed to stat {}", archive.display()))?
        .len();
    let sha256 = sha256_file(archive)?;

    info!(
        "event=source_ready source={} archive={} bytes={} sha256={} entries={}",
        source.name,
        archive.display(),
        bytes,
        sha256,
        extracted_entries
    );

    Ok(AcquiredSource {
        name: source.name.clone(),
        archive_path: archive.clone(),
        downloaded,
        bytes,
        sha256,
        extracted_entries,
    })
}

/// Stream into `<archive>.part`, rename on success.
fn download(provider: &dyn SourceProvider, url: &str, archive: &Path) -> Result<u64> {
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let partial = partial_path(archive);
    info!("event=download_start url={} dest={}", url, archive.display());

    let result = File::create(&partial)
        .with_context(|| format!("Failed to create {}", partial.display()))
        .and_then(|mut file| provider.fetch(url, &mut file));

    match result {
        Ok(bytes) => {
            fs::rename(&partial, archive)
                .with_context(|| format!("Failed to move {} into place", partial.display()))?;
            Ok(bytes)
        }
        Err(err) => {
            let _ = fs::remove_file(&partial);
            Err(err)
        }
    }
}

fn partial_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Extract every entry of a zip archive into `dir`, overwriting.
pub fn extract_archive(archive: &Path, dir: &Path) -> Result<usize> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("Not a zip archive: {}", archive.display()))?;

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    zip.extract(dir)
        .with_context(|| format!("Failed to extract {} into {}", archive.display(), dir.display()))?;

    info!(
        "event=archive_extracted archive={} dest={} entries={}",
        archive.display(),
        dir.display(),
        zip.len()
    );
    Ok(zip.len())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Acquire every planned source. The first failure aborts.
pub fn acquire_all(provider: &dyn SourceProvider, config: &PipelineConfig) -> Result<Vec<AcquiredSource>> {
    planned_sources(config)
        .iter()
        .map(|source| ensure_local(provider, source))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Serves one in-memory zip for every URL and counts fetches.
    struct FakeProvider {
        body: Vec<u8>,
        calls: Cell<usize>,
    }

    impl FakeProvider {
        fn with_entry(name: &str, contents: &str) -> Self {
            let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
            writer
                .start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
            let body = writer.finish().unwrap().into_inner();
            FakeProvider {
                body,
                calls: Cell::new(0),
            }
        }
    }

    impl SourceProvider for FakeProvider {
        fn fetch(&self, _url: &str, dest: &mut dyn Write) -> Result<u64> {
            self.calls.set(self.calls.get() + 1);
            copy_with_progress(self.body.as_slice(), dest, self.body.len() as u64)
        }
    }

    struct FailingProvider;

    impl SourceProvider for FailingProvider {
        fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
            dest.write_all(b"partial")?;
            bail!("connection reset while fetching {}", url)
        }
    }

    fn source_in(dir: &Path) -> SourceArchive {
        SourceArchive {
            name: "US".to_string(),
            url: "http://example.invalid/US.zip".to_string(),
            archive_path: dir.join("nested").join("US.zip"),
            extract_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_download_then_extract() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::with_entry("US.txt", "US\t90210\n");
        let source = source_in(dir.path());

        let acquired = ensure_local(&provider, &source).unwrap();

        assert!(acquired.downloaded);
        assert_eq!(acquired.extracted_entries, 1);
        assert_eq!(acquired.sha256.len(), 64);
        assert_eq!(provider.calls.get(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("US.txt")).unwrap(),
            "US\t90210\n"
        );
        assert!(!partial_path(&source.archive_path).exists());
    }

    #[test]
    fn test_present_archive_not_refetched() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::with_entry("US.txt", "first");
        let source = source_in(dir.path());

        ensure_local(&provider, &source).unwrap();
        fs::write(dir.path().join("US.txt"), "stale").unwrap();
        let second = ensure_local(&provider, &source).unwrap();

        assert!(!second.downloaded);
        assert_eq!(provider.calls.get(), 1);
        // extraction still overwrites
        assert_eq!(fs::read_to_string(dir.path().join("US.txt")).unwrap(), "first");
    }

    #[test]
    fn test_failed_fetch_leaves_no_archive() {
        let dir = TempDir::new().unwrap();
        let source = source_in(dir.path());

        let err = ensure_local(&FailingProvider, &source).unwrap_err();

        assert!(format!("{:#}", err).contains("Failed to acquire source US"));
        assert!(!source.archive_path.exists());
        assert!(!partial_path(&source.archive_path).exists());
    }

    #[test]
    fn test_offline_provider_refuses() {
        let dir = TempDir::new().unwrap();
        let err = ensure_local(&OfflineProvider, &source_in(dir.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("offline mode"));
    }

    #[test]
    fn test_corrupt_archive_is_fatal() {
        let dir = TempDir::new().unwrap();
        let source = source_in(dir.path());
        fs::create_dir_all(source.archive_path.parent().unwrap()).unwrap();
        fs::write(&source.archive_path, b"not a zip").unwrap();

        let err = ensure_local(&OfflineProvider, &source).unwrap_err();
        assert!(format!("{:#}", err).contains("Not a zip archive"));
    }

    #[test]
    fn test_planned_sources_follow_config() {
        let config = PipelineConfig::default();
        let sources = planned_sources(&config);

        assert_eq!(sources.len(), 6);
        assert_eq!(sources[0].archive_path, PathBuf::from("source_data/US.zip"));
        assert_eq!(sources[5].name, "boundaries");
        assert_eq!(sources[5].archive_path, PathBuf::from("source_data/census.zip"));
    }
}
