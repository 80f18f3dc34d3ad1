//! Extract acquisition and the local cache.
//!
//! Every extract lives in the cache directory as `<file>.ssp` (or `.xpt` /
//! `.csv` when placed there by hand). Downloads (feature `fetch`) unpack the
//! transport member from the published zip archive and record its SHA-256 in
//! `manifest.json`; later runs verify cached files against that manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use svy_core::{Error, Result};

use crate::catalog::{Catalog, ExtractId};

/// Manifest file name inside the cache directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Options for [`fetch_extract`] / [`fetch_all`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Cache directory.
    pub cache_dir: PathBuf,
    /// Re-download even when a cached copy exists.
    pub force: bool,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl FetchOptions {
    /// Options with defaults for the given cache directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self { cache_dir: cache_dir.into(), force: false, timeout_secs: 300 }
    }
}

/// One cached extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Source URL (empty for files placed by hand or simulated).
    pub url: String,
    /// File name inside the cache directory.
    pub path: String,
    /// Hex SHA-256 of the cached file.
    pub sha256: String,
    /// Size in bytes.
    pub bytes: u64,
}

/// Cache manifest keyed by extract identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Entries keyed by file identifier (`h216`).
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Load `manifest.json` from `cache_dir`; a missing file is an empty manifest.
    pub fn load(cache_dir: &Path) -> Result<Self> {
        let path = cache_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write `manifest.json` into `cache_dir`.
    pub fn save(&self, cache_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(cache_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(cache_dir.join(MANIFEST_FILE), json + "\n")?;
        Ok(())
    }

    /// Record (or refresh) an entry for a cached file.
    pub fn record(&mut self, id: &ExtractId, url: &str, path: &Path) -> Result<&ManifestEntry> {
        let bytes = std::fs::read(path)?;
        let entry = ManifestEntry {
            url: url.to_string(),
            path: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            sha256: sha256_hex(&bytes),
            bytes: bytes.len() as u64,
        };
        self.entries.insert(id.file.clone(), entry);
        Ok(&self.entries[&id.file])
    }

    /// Check a cached file against its recorded digest (no entry = accepted).
    pub fn verify(&self, id: &ExtractId, path: &Path) -> Result<()> {
        let Some(entry) = self.entries.get(&id.file) else {
            return Ok(());
        };
        let actual = sha256_file(path)?;
        if actual != entry.sha256 {
            return Err(Error::Validation(format!(
                "{}: SHA-256 mismatch (manifest {}, file {}); re-fetch with --force",
                path.display(),
                entry.sha256,
                actual
            )));
        }
        Ok(())
    }
}

/// Paths of every extract an analysis needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedExtracts {
    /// `(year, path)` for each full-year file, ascending by year.
    pub full_year: Vec<(i32, PathBuf)>,
    /// Linkage file path.
    pub linkage: PathBuf,
}

/// Existing cached copy of an extract (`.ssp`, `.xpt` or `.csv`).
pub fn locate_cached(cache_dir: &Path, id: &ExtractId) -> Option<PathBuf> {
    ["ssp", "xpt", "csv"]
        .iter()
        .map(|ext| cache_dir.join(format!("{}.{ext}", id.file)))
        .find(|p| p.is_file())
}

/// Return a local path for `id`, downloading it when needed.
pub fn fetch_extract(catalog: &Catalog, id: &ExtractId, opts: &FetchOptions) -> Result<PathBuf> {
    let mut manifest = Manifest::load(&opts.cache_dir)?;
    let path = fetch_with_manifest(catalog, id, opts, &mut manifest)?;
    manifest.save(&opts.cache_dir)?;
    Ok(path)
}

/// Fetch every extract in the catalog.
pub fn fetch_all(catalog: &Catalog, opts: &FetchOptions) -> Result<FetchedExtracts> {
    let mut manifest = Manifest::load(&opts.cache_dir)?;
    let mut full_year = Vec::with_capacity(catalog.full_year.len());
    for id in &catalog.full_year {
        let path = fetch_with_manifest(catalog, id, opts, &mut manifest)?;
        let year = id
            .year
            .ok_or_else(|| Error::Validation(format!("full-year extract {} has no year", id.file)))?;
        full_year.push((year, path));
    }
    let linkage = fetch_with_manifest(catalog, &catalog.linkage, opts, &mut manifest)?;
    manifest.save(&opts.cache_dir)?;
    Ok(FetchedExtracts { full_year, linkage })
}

fn fetch_with_manifest(
    catalog: &Catalog,
    id: &ExtractId,
    opts: &FetchOptions,
    manifest: &mut Manifest,
) -> Result<PathBuf> {
    if !opts.force
        && let Some(path) = locate_cached(&opts.cache_dir, id)
    {
        manifest.verify(id, &path)?;
        tracing::debug!(file = %id.file, path = %path.display(), "using cached extract");
        return Ok(path);
    }

    let url = catalog.url(id);
    let path = download(&url, id, opts)?;
    let entry = manifest.record(id, &url, &path)?;
    tracing::info!(file = %id.file, bytes = entry.bytes, sha256 = %entry.sha256, "fetched extract");
    Ok(path)
}

#[cfg(feature = "fetch")]
fn download(url: &str, id: &ExtractId, opts: &FetchOptions) -> Result<PathBuf> {
    use reqwest::blocking::ClientBuilder;
    use std::io::Read;

    std::fs::create_dir_all(&opts.cache_dir)?;
    tracing::info!(url, "downloading");

    let client = ClientBuilder::new()
        .timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| Error::Computation(format!("HTTP client: {e}")))?;
    let mut resp = client
        .get(url)
        .send()
        .map_err(|e| Error::Computation(format!("GET {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(Error::Computation(format!("GET {url}: HTTP status {}", resp.status())));
    }
    let mut archive_bytes = Vec::new();
    resp.read_to_end(&mut archive_bytes)?;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(archive_bytes))
        .map_err(|e| Error::Validation(format!("{url}: not a zip archive: {e}")))?;
    let member = id.member_name();
    let index = (0..archive.len())
        .find(|&i| {
            archive
                .by_index(i)
                .map(|f| f.mangled_name().to_string_lossy().eq_ignore_ascii_case(&member))
                .unwrap_or(false)
        })
        .or_else(|| (archive.len() == 1).then_some(0))
        .ok_or_else(|| Error::MissingField { table: url.to_string(), field: member.clone() })?;
    let mut file = archive
        .by_index(index)
        .map_err(|e| Error::Validation(format!("{url}: {e}")))?;

    let out_path = opts.cache_dir.join(&member);
    write_atomically(&mut file, &out_path)?;
    Ok(out_path)
}

/// Stream `src` into `<path>.part`, then rename it over `path`. The partial
/// file is removed when the copy fails.
fn write_atomically(src: &mut impl std::io::Read, path: &Path) -> Result<()> {
    use std::io::Write;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".part");
    let tmp_path = PathBuf::from(tmp_name);
    let written = std::fs::File::create(&tmp_path).and_then(|mut out| {
        std::io::copy(src, &mut out)?;
        out.flush()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(not(feature = "fetch"))]
fn download(url: &str, id: &ExtractId, opts: &FetchOptions) -> Result<PathBuf> {
    Err(Error::FeatureDisabled(format!(
        "downloading {url} requires the `fetch` feature; place {} in {} instead",
        id.member_name(),
        opts.cache_dir.display()
    )))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let out = h.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    Ok(sha256_hex(&std::fs::read(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Yields `n` bytes, then fails.
    struct Truncated(usize);

    impl std::io::Read for Truncated {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0 == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
            }
            let n = self.0.min(buf.len());
            buf[..n].fill(b'x');
            self.0 -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_failed_copy_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h216.ssp");
        assert!(write_atomically(&mut Truncated(100), &path).is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        write_atomically(&mut &b"HEADER"[..], &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"HEADER");
        assert!(!dir.path().join("h216.ssp.part").exists());
    }

    #[test]
    fn test_cached_extract_is_used_and_verified() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::meps();
        let id = catalog.full_year_for(2019).unwrap().clone();
        let path = dir.path().join("h216.csv");
        std::fs::write(&path, "DUPERSID\n1\n").unwrap();

        let opts = FetchOptions::new(dir.path());
        assert_eq!(fetch_extract(&catalog, &id, &opts).unwrap(), path);

        let mut manifest = Manifest::default();
        manifest.record(&id, "", &path).unwrap();
        manifest.save(dir.path()).unwrap();
        assert!(fetch_extract(&catalog, &id, &opts).is_ok());

        std::fs::write(&path, "DUPERSID\n2\n").unwrap();
        let err = fetch_extract(&catalog, &id, &opts).unwrap_err();
        assert!(err.to_string().contains("SHA-256 mismatch"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h36u21.ssp");
        std::fs::write(&path, b"abc").unwrap();
        let mut m = Manifest::default();
        let entry = m.record(&ExtractId::linkage("h36u21"), "u", &path).unwrap().clone();
        assert_eq!(
            entry.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        m.save(dir.path()).unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap(), m);
    }

    #[cfg(not(feature = "fetch"))]
    #[test]
    fn test_missing_extract_without_fetch_feature() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::meps();
        let err = fetch_all(&catalog, &FetchOptions::new(dir.path())).unwrap_err();
        assert!(matches!(err, Error::FeatureDisabled(_)));
        assert!(err.to_string().contains("h192.ssp"));
    }
}
