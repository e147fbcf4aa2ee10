//! In-memory Lambda deployment archive exported as a zip file.
//!
//! A `provided.*` runtime starts the executable named `bootstrap` from the root of the archive
//! and adds `lib/` to `LD_LIBRARY_PATH`, so these are the two locations the builder knows about.

use crate::Error;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Component, Path};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive path of the executable started by the Lambda runtime.
pub const BOOTSTRAP: &str = "bootstrap";
/// Archive directory for the dependency closure.
pub const LIB_DIR: &str = "lib";

const EXECUTABLE_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;
/// Debug builds of a handler are tens of MB. The fastest deflate level keeps zipping them to a fraction of
/// the default level's time at a slightly bigger archive.
const COMPRESSION_LEVEL: i64 = 1;

struct ArchiveEntry {
    contents: Vec<u8>,
    unix_mode: u32,
}

/// Files keyed by their path inside the archive. Paths are kept sorted so the zip is reproducible.
pub struct LambdaArchive {
    name: String,
    entries: BTreeMap<String, ArchiveEntry>,
}

impl LambdaArchive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds the compiled handler as the `bootstrap` executable.
    pub fn add_bootstrap(&mut self, executable: &Path) -> Result<&mut Self, Error> {
        let contents = read_source(executable)?;
        self.insert(BOOTSTRAP, contents, EXECUTABLE_MODE)
    }

    /// Adds a file from disk at the given archive path.
    pub fn add_file(&mut self, archive_path: &str, source: &Path) -> Result<&mut Self, Error> {
        let contents = read_source(source)?;
        self.insert(archive_path, contents, FILE_MODE)
    }

    pub fn add_bytes(&mut self, archive_path: &str, contents: impl Into<Vec<u8>>) -> Result<&mut Self, Error> {
        self.insert(archive_path, contents.into(), FILE_MODE)
    }

    /// Adds a dependency artifact as `lib/<file name>`.
    pub fn add_library(&mut self, source: &Path) -> Result<&mut Self, Error> {
        let file_name = source
            .file_name()
            .and_then(|v| v.to_str())
            .ok_or_else(|| format!("Library path has no UTF-8 file name: {}", source.display()))?;
        let archive_path = format!("{LIB_DIR}/{file_name}");
        let contents = read_source(source)?;
        self.insert(&archive_path, contents, FILE_MODE)
    }

    pub fn add_libraries<I, P>(&mut self, sources: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for source in sources {
            self.add_library(source.as_ref())?;
        }
        Ok(self)
    }

    pub fn contains(&self, archive_path: &str) -> bool {
        normalize(archive_path)
            .map(|path| self.entries.contains_key(&path))
            .unwrap_or(false)
    }

    /// Archive paths of all files in zip order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exports the archive as deflated zip bytes with the unix modes of the entries.
    pub fn to_zip(&self) -> Result<Vec<u8>, Error> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for (path, entry) in &self.entries {
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(COMPRESSION_LEVEL))
                .unix_permissions(entry.unix_mode)
                .large_file(entry.contents.len() as u64 >= u32::MAX as u64);
            zip.start_file(path.as_str(), options)?;
            zip.write_all(&entry.contents)?;
        }

        let bytes = zip.finish()?.into_inner();
        debug!("Zipped {} entries of {} into {} bytes", self.entries.len(), self.name, bytes.len());

        Ok(bytes)
    }

    /// Writes the zip into a new file in the system temp directory, e.g. `/tmp/lambda-a1B2c3.zip`.
    /// The file is removed when the returned handle is dropped.
    pub fn write_temp_file(&self, prefix: &str, suffix: &str) -> Result<NamedTempFile, Error> {
        let mut file = tempfile::Builder::new().prefix(prefix).suffix(suffix).tempfile()?;
        file.write_all(&self.to_zip()?)?;
        file.flush()?;
        info!("Archive {} written to {}", self.name, file.path().display());
        Ok(file)
    }

    fn insert(&mut self, archive_path: &str, contents: Vec<u8>, unix_mode: u32) -> Result<&mut Self, Error> {
        let path = normalize(archive_path)?;
        if self.entries.contains_key(&path) {
            return Err(format!("Duplicate archive entry: {path}").into());
        }
        debug!("Adding {path} ({} bytes)", contents.len());
        self.entries.insert(path, ArchiveEntry { contents, unix_mode });
        Ok(self)
    }
}

/// Lists the archive the same way for every scenario:
/// the name, then every directory and file as an absolute archive path.
impl fmt::Display for LambdaArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;

        let mut listed_dirs = std::collections::BTreeSet::new();
        for (path, entry) in &self.entries {
            // parent directories first, each one once
            let parts = path.split('/').collect::<Vec<_>>();
            let mut dir = String::new();
            for part in &parts[..parts.len() - 1] {
                dir.push('/');
                dir.push_str(part);
                if listed_dirs.insert(dir.clone()) {
                    writeln!(f, "{dir}/")?;
                }
            }
            writeln!(f, "/{path} ({} bytes)", entry.contents.len())?;
        }

        Ok(())
    }
}

impl fmt::Debug for LambdaArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaArchive")
            .field("name", &self.name)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Converts `/lib/x.so`, `lib//x.so` or `./lib/x.so` into `lib/x.so`.
/// Rejects empty paths and paths leaving the archive root.
fn normalize(archive_path: &str) -> Result<String, Error> {
    let mut parts = Vec::new();
    for component in Path::new(archive_path).components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| format!("Non-UTF-8 archive path: {archive_path}"))?,
            ),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(format!("Archive path must stay inside the archive: {archive_path}").into())
            }
        }
    }

    if parts.is_empty() {
        return Err(format!("Empty archive path: {archive_path:?}").into());
    }

    Ok(parts.join("/"))
}

fn read_source(source: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(source).map_err(|e| format!("Failed to read {}: {e}", source.display()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn unzip(bytes: Vec<u8>) -> ZipArchive<Cursor<Vec<u8>>> {
        ZipArchive::new(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn normalizes_archive_paths() {
        assert_eq!(normalize("/lib/libfoo.so").unwrap(), "lib/libfoo.so");
        assert_eq!(normalize("./lib//libfoo.so").unwrap(), "lib/libfoo.so");
        assert_eq!(normalize("bootstrap").unwrap(), "bootstrap");
        assert!(normalize("").is_err());
        assert!(normalize("/").is_err());
        assert!(normalize("../bootstrap").is_err());
        assert!(normalize("lib/../../bootstrap").is_err());
    }

    #[test]
    fn bootstrap_is_executable_and_libraries_go_to_lib() {
        let dir = tempfile::tempdir().unwrap();
        let executable = dir.path().join("my-handler");
        let library = dir.path().join("libdep-0123.rlib");
        std::fs::write(&executable, b"\x7fELF").unwrap();
        std::fs::write(&library, b"rlib").unwrap();

        let mut archive = LambdaArchive::new("test.zip");
        archive.add_bootstrap(&executable).unwrap().add_library(&library).unwrap();

        assert!(archive.contains("bootstrap"));
        assert!(archive.contains("/lib/libdep-0123.rlib"));
        assert_eq!(archive.paths().collect::<Vec<_>>(), vec!["bootstrap", "lib/libdep-0123.rlib"]);

        let mut zip = unzip(archive.to_zip().unwrap());
        assert_eq!(zip.len(), 2);

        let mut bootstrap = zip.by_name("bootstrap").unwrap();
        assert_eq!(bootstrap.unix_mode().map(|m| m & 0o777), Some(0o755));
        let mut contents = Vec::new();
        bootstrap.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"\x7fELF");
        drop(bootstrap);

        let library = zip.by_name("lib/libdep-0123.rlib").unwrap();
        assert_eq!(library.unix_mode().map(|m| m & 0o777), Some(0o644));
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let mut archive = LambdaArchive::new("test.zip");
        archive.add_bytes("lib/a.so", "a").unwrap();
        assert!(archive.add_bytes("/lib/a.so", "b").is_err());
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn missing_source_is_an_error() {
        let mut archive = LambdaArchive::new("test.zip");
        let err = archive.add_bootstrap(Path::new("/definitely/not/here")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"));
        assert!(archive.is_empty());
    }

    #[test]
    fn listing_shows_directories_once() {
        let mut archive = LambdaArchive::new("lambda.zip");
        archive
            .add_bytes("bootstrap", "x")
            .unwrap()
            .add_bytes("lib/a.so", "aa")
            .unwrap()
            .add_bytes("lib/b.so", "bbb")
            .unwrap();

        assert_eq!(
            archive.to_string(),
            "lambda.zip:\n/bootstrap (1 bytes)\n/lib/\n/lib/a.so (2 bytes)\n/lib/b.so (3 bytes)\n"
        );
    }

    #[test]
    fn temp_file_holds_the_zip_until_dropped() {
        let mut archive = LambdaArchive::new("test.zip");
        archive.add_bytes("bootstrap", "x").unwrap();

        let file = archive.write_temp_file("lambda-", ".zip").unwrap();
        let path = file.path().to_path_buf();
        let file_name = path.file_name().unwrap().to_str().unwrap().to_owned();
        assert!(file_name.starts_with("lambda-") && file_name.ends_with(".zip"));

        let zip = unzip(std::fs::read(&path).unwrap());
        assert_eq!(zip.len(), 1);

        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn entries_use_the_fast_compression_level() {
        let mut archive = LambdaArchive::new("test.zip");
        archive.add_bytes("bootstrap", vec![b'x'; 64 * 1024]).unwrap();

        let mut zip = unzip(archive.to_zip().unwrap());
        let bootstrap = zip.by_index(0).unwrap();
        assert_eq!(bootstrap.compression(), CompressionMethod::Deflated);
        assert!(bootstrap.compressed_size() < bootstrap.size() / 10);
    }
}
