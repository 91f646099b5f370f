use crate::error::{PipelineError, Result};
use crate::logging::RunLog;
use bacanno_protocol::ReferenceDatasetSpec;
use flate2::read::MultiGzDecoder;
use reqwest::blocking::get;
use sha1::{Digest, Sha1};
use std::{
    collections::HashMap,
    ffi::OsString,
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDataset {
    pub id: String,
    pub remote_url: String,
    pub local_path: PathBuf,
    pub sha1: Option<String>,
}

impl ReferenceDataset {
    pub fn from_spec(spec: &ReferenceDatasetSpec, ref_dir: &Path) -> Self {
        Self {
            id: spec.id.clone(),
            remote_url: spec.remote_url.clone(),
            local_path: ref_dir.join(&spec.local_name),
            sha1: spec.sha1.clone(),
        }
    }

    /// Present means the file exists and is not empty; contents are not
    /// re-verified.
    pub fn is_present(&self) -> bool {
        fs::metadata(&self.local_path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObtainedReference {
    pub id: String,
    pub local_path: PathBuf,
    pub reused_existing: bool,
}

/// Fetches each distinct local path at most once per cache instance.
#[derive(Debug, Default)]
pub struct ReferenceDataCache {
    obtained: Mutex<HashMap<PathBuf, ObtainedReference>>,
    fetches: AtomicUsize,
}

impl ReferenceDataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of source transfers performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn obtained(&self) -> Vec<ObtainedReference> {
        let mut out: Vec<ObtainedReference> = self
            .obtained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn obtain(&self, dataset: &ReferenceDataset, log: &RunLog) -> Result<ObtainedReference> {
        // Held for the whole fetch so concurrent callers never download twice.
        let mut obtained = self.obtained.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(done) = obtained.get(&dataset.local_path) {
            return Ok(done.clone());
        }

        let reused_existing = if dataset.is_present() {
            log.info(format!(
                "Reference dataset '{}' already present at {}",
                dataset.id,
                dataset.local_path.display()
            ));
            true
        } else {
            log.info(format!(
                "Fetching reference dataset '{}' from {}",
                dataset.id, dataset.remote_url
            ));
            self.fetches.fetch_add(1, Ordering::Relaxed);
            let bytes = fetch_and_decompress(dataset).map_err(|reason| {
                PipelineError::ReferenceFetch {
                    dataset: dataset.id.clone(),
                    url: dataset.remote_url.clone(),
                    reason,
                }
            })?;
            log.info(format!(
                "Reference dataset '{}' stored at {} ({bytes} bytes)",
                dataset.id,
                dataset.local_path.display()
            ));
            false
        };

        let report = ObtainedReference {
            id: dataset.id.clone(),
            local_path: dataset.local_path.clone(),
            reused_existing,
        };
        obtained.insert(dataset.local_path.clone(), report.clone());
        Ok(report)
    }
}

fn is_http_source(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn is_gzip_source(source: &str) -> bool {
    source.to_ascii_lowercase().ends_with(".gz")
}

fn open_source_reader(source: &str) -> std::result::Result<Box<dyn Read>, String> {
    if is_http_source(source) {
        let response = get(source)
            .map_err(|e| format!("Could not fetch '{source}': {e}"))?
            .error_for_status()
            .map_err(|e| format!("Could not fetch '{source}': {e}"))?;
        return Ok(Box::new(response));
    }
    let path = source
        .strip_prefix("file://")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(source));
    let file = File::open(&path)
        .map_err(|e| format!("Could not open source file '{}': {e}", path.display()))?;
    Ok(Box::new(file))
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha1,
    bytes: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut tmp_os: OsString = destination.as_os_str().to_os_string();
    tmp_os.push(".part");
    PathBuf::from(tmp_os)
}

/// Downloads into a temporary file next to the destination, decompresses
/// into `<dest>.part` and renames that into place, so a reader never sees a
/// partially written dataset at the final path.
fn fetch_and_decompress(dataset: &ReferenceDataset) -> std::result::Result<u64, String> {
    let destination = &dataset.local_path;
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| {
        format!(
            "Could not create destination directory '{}': {e}",
            parent.display()
        )
    })?;

    let mut download = tempfile::Builder::new()
        .prefix(&format!(".{}.", dataset.id))
        .suffix(".download")
        .tempfile_in(parent)
        .map_err(|e| format!("Could not create temporary download file: {e}"))?;
    let mut reader = open_source_reader(&dataset.remote_url)?;
    io::copy(&mut reader, &mut download)
        .map_err(|e| format!("Transfer of '{}' failed: {e}", dataset.remote_url))?;
    download
        .flush()
        .map_err(|e| format!("Could not flush temporary download: {e}"))?;

    let downloaded = download
        .reopen()
        .map_err(|e| format!("Could not reopen temporary download: {e}"))?;
    let tmp_path = part_path(destination);
    let mut writer = HashingWriter {
        inner: BufWriter::new(
            File::create(&tmp_path)
                .map_err(|e| format!("Could not create '{}': {e}", tmp_path.display()))?,
        ),
        hasher: Sha1::new(),
        bytes: 0,
    };

    let copy_result = if is_gzip_source(&dataset.remote_url) {
        let mut decoder = MultiGzDecoder::new(downloaded);
        io::copy(&mut decoder, &mut writer)
            .map_err(|e| format!("Could not decompress '{}': {e}", dataset.remote_url))
    } else {
        let mut plain = downloaded;
        io::copy(&mut plain, &mut writer)
            .map_err(|e| format!("Could not copy '{}': {e}", dataset.remote_url))
    }
    .and_then(|_| {
        writer
            .flush()
            .map_err(|e| format!("Could not flush '{}': {e}", tmp_path.display()))
    });
    if let Err(e) = copy_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    let HashingWriter { hasher, bytes, .. } = writer;
    if bytes == 0 {
        let _ = fs::remove_file(&tmp_path);
        return Err("Source produced an empty file".to_string());
    }
    if let Some(expected) = &dataset.sha1 {
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(format!(
                "SHA-1 mismatch: expected {}, got {actual}",
                expected.trim()
            ));
        }
    }

    fs::rename(&tmp_path, destination).map_err(|e| {
        format!(
            "Could not finalize destination '{}': {e}",
            destination.display()
        )
    })?;
    download
        .close()
        .map_err(|e| format!("Could not remove temporary download: {e}"))?;
    Ok(bytes)
}
