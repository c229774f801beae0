//! Content fingerprints for build contexts
//!
//! The fingerprint is the SHA-1 of a canonical tar stream of the build
//! context plus its Dockerfile. The stream is written straight into the
//! hasher, never buffered. Canonical means:
//!
//! - entries sorted by file name within each directory
//! - every mtime set to 2000-01-01T00:00Z, uid/gid 0, modes 0644/0755
//! - deny-listed vendor paths and `.dockerignore` matches left out
//!
//! The 40-character hex digest is used verbatim as the image tag, so any
//! nondeterminism here silently defeats image reuse.

mod ignore;

pub use ignore::{DenyList, IgnoreRules, DEFAULT_EXCLUDES};

use crate::error::{KilnError, KilnResult};
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// 2000-01-01T00:00:00Z
pub const FINGERPRINT_MTIME: u64 = 946_684_800;

/// Archive name of the Dockerfile entry
const DOCKERFILE_ENTRY: &str = "Dockerfile";

/// Archive prefix for context entries
const CONTEXT_ENTRY: &str = "context";

/// Input to the fingerprint calculator
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub context_path: PathBuf,
    pub dockerfile_path: PathBuf,
    pub ignore_file: Option<PathBuf>,
}

impl BuildContext {
    /// Create a context, picking up `<context>/.dockerignore` when it exists
    pub fn new(context_path: impl Into<PathBuf>, dockerfile_path: impl Into<PathBuf>) -> Self {
        let context_path = context_path.into();
        let dockerignore = context_path.join(".dockerignore");
        let ignore_file = dockerignore.is_file().then_some(dockerignore);

        Self {
            context_path,
            dockerfile_path: dockerfile_path.into(),
            ignore_file,
        }
    }

    /// Override the ignore file
    pub fn with_ignore_file(mut self, ignore_file: Option<PathBuf>) -> Self {
        self.ignore_file = ignore_file;
        self
    }
}

/// A 40-character lowercase hex content hash
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `prefix-<hash>`, or the bare hash for an empty prefix
    pub fn with_prefix(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(p) if !p.is_empty() => format!("{}-{}", p, self.0),
            _ => self.0.clone(),
        }
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of a build context.
///
/// `extra_excludes` extends the built-in deny-list.
pub fn fingerprint(context: &BuildContext, extra_excludes: &[String]) -> KilnResult<ContentFingerprint> {
    let deny = DenyList::with_extra(extra_excludes);
    let ignore = match &context.ignore_file {
        Some(path) => IgnoreRules::load(path)?,
        None => IgnoreRules::default(),
    };

    debug!(
        "Fingerprinting {} with {}",
        context.context_path.display(),
        context.dockerfile_path.display()
    );

    let mut builder = Builder::new(Sha1::new());
    builder.follow_symlinks(false);

    append_tree(&mut builder, &context.context_path, &deny, &ignore)?;
    append_dockerfile(&mut builder, &context.dockerfile_path)?;

    let hasher = builder
        .into_inner()
        .map_err(|e| KilnError::io("finishing fingerprint archive", e))?;
    let hash = hex::encode(hasher.finalize());

    debug!("Content fingerprint: {}", hash);
    Ok(ContentFingerprint(hash))
}

fn append_tree<W: io::Write>(
    builder: &mut Builder<W>,
    root: &Path,
    deny: &DenyList,
    ignore: &IgnoreRules,
) -> KilnResult<()> {
    let root_meta = fs::metadata(root)
        .map_err(|e| KilnError::io(format!("reading build path {}", root.display()), e))?;
    if !root_meta.is_dir() {
        return Err(KilnError::io(
            format!("build path {} is not a directory", root.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    // Excluded directories can only be skipped wholesale when nothing below
    // them may be re-included.
    let prune = !ignore.has_negations();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if !prune || !entry.file_type().is_dir() {
                return true;
            }
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            !(deny.matches(rel) || ignore.is_excluded(rel))
        });

    let mut count = 0usize;
    for entry in walker {
        let entry = entry.map_err(|e| {
            let context = format!(
                "walking {}",
                e.path().unwrap_or(root).display()
            );
            KilnError::io(context, io::Error::from(e))
        })?;

        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .map_err(|e| KilnError::Internal(format!("path outside build context: {}", e)))?;

        if deny.matches(rel) || ignore.is_excluded(rel) {
            continue;
        }

        let name = Path::new(CONTEXT_ENTRY).join(rel);
        append_entry(builder, path, &name)?;
        count += 1;
    }

    debug!("Archived {} context entries", count);
    Ok(())
}

fn append_dockerfile<W: io::Write>(builder: &mut Builder<W>, dockerfile: &Path) -> KilnResult<()> {
    let meta = fs::metadata(dockerfile)
        .map_err(|e| KilnError::io(format!("reading Dockerfile {}", dockerfile.display()), e))?;
    if !meta.is_file() {
        return Err(KilnError::io(
            format!("Dockerfile {} is not a file", dockerfile.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "not a file"),
        ));
    }
    append_entry(builder, dockerfile, Path::new(DOCKERFILE_ENTRY))
}

fn append_entry<W: io::Write>(builder: &mut Builder<W>, path: &Path, name: &Path) -> KilnResult<()> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
    let file_type = metadata.file_type();

    let mut header = Header::new_gnu();
    header.set_mtime(FINGERPRINT_MTIME);
    header.set_uid(0);
    header.set_gid(0);

    let archive_err = |e: io::Error| KilnError::io(format!("archiving {}", path.display()), e);

    if file_type.is_dir() {
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        builder
            .append_data(&mut header, name, io::empty())
            .map_err(archive_err)?;
    } else if file_type.is_file() {
        header.set_entry_type(EntryType::Regular);
        header.set_mode(if is_executable(&metadata) { 0o755 } else { 0o644 });
        header.set_size(metadata.len());
        let file = File::open(path)
            .map_err(|e| KilnError::io(format!("opening {}", path.display()), e))?;
        builder
            .append_data(&mut header, name, file)
            .map_err(archive_err)?;
    } else if file_type.is_symlink() {
        let target = fs::read_link(path)
            .map_err(|e| KilnError::io(format!("reading link {}", path.display()), e))?;
        header.set_entry_type(EntryType::Symlink);
        header.set_mode(0o777);
        header.set_size(0);
        builder
            .append_link(&mut header, name, &target)
            .map_err(archive_err)?;
    } else {
        debug!("Skipping special file {}", path.display());
    }

    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
