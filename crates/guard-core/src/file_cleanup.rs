//! Conservative rollback of uploaded artifacts after a cancelled booking.
//!
//! Every ambiguous or failing path returns `false` instead of deleting: the
//! worst outcome of a failed cleanup is one orphaned upload, never the loss of
//! a file another ledger row still references.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_CLEANUP_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_CLEANUP_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("refusing to delete `{0}`: outside managed storage")]
    OutsideStorageRoot(String),
    #[error("refusing to delete `{0}`: reference is not owned by this system")]
    ExternalReference(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("remote artifact deletion is not configured")]
    RemoteUnavailable,
    #[error("artifact deletion failed transiently: {0}")]
    Transient(String),
    #[error("artifact deletion failed: {0}")]
    Failed(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CleanupError {
    /// Failures worth one more attempt after recovery.
    pub fn is_transient(&self) -> bool {
        match self {
            CleanupError::Transient(_) => true,
            CleanupError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }

    /// Rejections made to protect files outside this system's ownership.
    pub fn is_security_rejection(&self) -> bool {
        matches!(
            self,
            CleanupError::OutsideStorageRoot(_) | CleanupError::ExternalReference(_)
        )
    }
}

/// Remote artifact storage capable of deleting an uploaded file by id.
pub trait ArtifactApi: Send + Sync {
    fn delete_artifact(&self, file_id: &str) -> Result<(), CleanupError>;
}

/// Hook run between a transient failure and the retry.
pub trait CleanupRecovery: Send + Sync {
    /// Returns `false` to abandon the retry.
    fn recover(
        &self,
        context: &CleanupContext,
        location: &ArtifactLocation,
        error: &CleanupError,
    ) -> bool;
}

/// Clears a read-only flag on local files; remote failures are retried as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRecovery;

impl CleanupRecovery for DefaultRecovery {
    fn recover(
        &self,
        context: &CleanupContext,
        location: &ArtifactLocation,
        _error: &CleanupError,
    ) -> bool {
        if let ArtifactLocation::Local(path) = location {
            if let Ok(metadata) = fs::metadata(path) {
                let mut permissions = metadata.permissions();
                if permissions.readonly() {
                    #[allow(clippy::permissions_set_readonly_false)]
                    permissions.set_readonly(false);
                    if let Err(err) = fs::set_permissions(path, permissions) {
                        warn!(%err, attempt = context.attempt_count, "could not clear read-only flag");
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupContext {
    pub new_artifact_ref: String,
    pub existing_artifact_ref: Option<String>,
    pub attempt_count: u32,
}

/// Where a deletable artifact lives once a reference has been vetted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// Canonical path of a regular file under the storage root.
    Local(PathBuf),
    Remote { file_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupSettings {
    pub storage_root: PathBuf,
    /// Hosts whose http(s) URLs point at this system's artifact API.
    pub owned_hosts: Vec<String>,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl CleanupSettings {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            owned_hosts: Vec::new(),
            max_attempts: DEFAULT_CLEANUP_MAX_ATTEMPTS,
            backoff: DEFAULT_CLEANUP_BACKOFF,
        }
    }

    pub fn with_owned_host(mut self, host: impl Into<String>) -> Self {
        self.owned_hosts.push(host.into().to_ascii_lowercase());
        self
    }
}

/// Shape of a raw artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ParsedRef<'a> {
    Empty,
    Http {
        host: String,
        path: &'a str,
        query: Option<&'a str>,
    },
    OtherScheme(&'a str),
    Local(String),
}

fn parse_ref(reference: &str) -> ParsedRef<'_> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return ParsedRef::Empty;
    }
    if let Some((scheme, rest)) = trimmed.split_once("://") {
        let scheme = scheme.to_ascii_lowercase();
        if scheme == "http" || scheme == "https" {
            let without_fragment = rest.split('#').next().unwrap_or_default();
            let (before_query, query) = match without_fragment.split_once('?') {
                Some((head, query)) => (head, Some(query)),
                None => (without_fragment, None),
            };
            let (authority, path) = match before_query.find('/') {
                Some(idx) => before_query.split_at(idx),
                None => (before_query, ""),
            };
            let host = authority
                .rsplit('@')
                .next()
                .unwrap_or_default()
                .split(':')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            return ParsedRef::Http { host, path, query };
        }
        return ParsedRef::OtherScheme(trimmed);
    }
    if let Some((scheme, _)) = trimmed.split_once(':') {
        // Single letters are drive prefixes, handled as local paths.
        if scheme.len() > 1 && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return ParsedRef::OtherScheme(trimmed);
        }
    }
    ParsedRef::Local(trimmed.replace('\\', "/"))
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value)
}

/// Identifier embedded in a share link, e.g. `?id=...` or `/d/<id>/view`.
fn share_link_id<'a>(path: &'a str, query: Option<&'a str>) -> Option<&'a str> {
    if let Some(id) = query_param(query, "id") {
        return Some(id);
    }
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "d" {
            return segments.next();
        }
    }
    None
}

fn normalize_local(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical identifier of an artifact reference, ignoring query and sharing
/// parameters. Equal identifiers mean the same underlying file.
pub fn canonical_artifact_id(reference: &str) -> String {
    match parse_ref(reference) {
        ParsedRef::Empty => String::new(),
        ParsedRef::Http { host, path, query } => match share_link_id(path, query) {
            Some(id) => format!("id:{id}"),
            None => format!("{}{}", host, path.trim_end_matches('/')),
        },
        ParsedRef::OtherScheme(raw) => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
        ParsedRef::Local(path) => format!("local:{}", normalize_local(&path)),
    }
}

/// True only when the new upload and the kept artifact are different files.
pub fn should_cleanup_file(new_artifact_ref: &str, existing_artifact_ref: &str) -> bool {
    canonical_artifact_id(new_artifact_ref) != canonical_artifact_id(existing_artifact_ref)
}

/// Deletes rejected uploads from local storage or the remote artifact API.
pub struct FileCleanupManager {
    settings: CleanupSettings,
    remote: Option<Arc<dyn ArtifactApi>>,
    recovery: Arc<dyn CleanupRecovery>,
}

impl FileCleanupManager {
    pub fn new(settings: CleanupSettings) -> Self {
        Self {
            settings,
            remote: None,
            recovery: Arc::new(DefaultRecovery),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn ArtifactApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<dyn CleanupRecovery>) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn settings(&self) -> &CleanupSettings {
        &self.settings
    }

    pub fn should_cleanup_file(&self, new_artifact_ref: &str, existing_artifact_ref: &str) -> bool {
        should_cleanup_file(new_artifact_ref, existing_artifact_ref)
    }

    /// Attempts deletion and reports success. Never panics or propagates.
    pub fn cleanup_uploaded_file(&self, file_ref: &str, file_id: Option<&str>) -> bool {
        match self.try_cleanup(file_ref, file_id, None) {
            Ok(()) => true,
            Err(err) if err.is_security_rejection() => {
                warn!(%err, "artifact cleanup rejected");
                false
            }
            Err(err) => {
                warn!(%err, "artifact cleanup failed; artifact may require manual removal");
                false
            }
        }
    }

    /// Vets the reference, then deletes with a bounded retry.
    pub fn try_cleanup(
        &self,
        file_ref: &str,
        file_id: Option<&str>,
        existing_artifact_ref: Option<&str>,
    ) -> Result<(), CleanupError> {
        let location = self.resolve(file_ref, file_id)?;
        let mut context = CleanupContext {
            new_artifact_ref: file_ref.to_string(),
            existing_artifact_ref: existing_artifact_ref.map(str::to_string),
            attempt_count: 0,
        };
        let max_attempts = self.settings.max_attempts.max(1);

        loop {
            context.attempt_count += 1;
            match self.delete(&location) {
                Ok(()) => {
                    info!(
                        artifact = file_ref,
                        attempts = context.attempt_count,
                        "uploaded artifact removed"
                    );
                    return Ok(());
                }
                Err(err) if err.is_transient() && context.attempt_count < max_attempts => {
                    warn!(%err, attempt = context.attempt_count, "artifact cleanup failed, retrying");
                    if !self.recovery.recover(&context, &location, &err) {
                        return Err(err);
                    }
                    thread::sleep(self.settings.backoff * context.attempt_count);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Maps a reference to a deletable location, rejecting anything not owned.
    pub fn resolve(
        &self,
        file_ref: &str,
        file_id: Option<&str>,
    ) -> Result<ArtifactLocation, CleanupError> {
        match parse_ref(file_ref) {
            ParsedRef::Empty => Err(CleanupError::NotFound(String::new())),
            ParsedRef::OtherScheme(raw) => Err(CleanupError::ExternalReference(raw.to_string())),
            ParsedRef::Http { host, path, query } => {
                if !self.settings.owned_hosts.iter().any(|owned| *owned == host) {
                    return Err(CleanupError::ExternalReference(file_ref.to_string()));
                }
                let id = file_id
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .or_else(|| share_link_id(path, query))
                    .or_else(|| path.rsplit('/').find(|segment| !segment.is_empty()))
                    .ok_or_else(|| CleanupError::NotFound(file_ref.to_string()))?;
                Ok(ArtifactLocation::Remote {
                    file_id: id.to_string(),
                })
            }
            ParsedRef::Local(path) => self.resolve_local(file_ref, &path),
        }
    }

    fn resolve_local(&self, file_ref: &str, path: &str) -> Result<ArtifactLocation, CleanupError> {
        let relative = Path::new(path);
        let has_drive = path.len() >= 2 && path.as_bytes()[1] == b':';
        let escapes = relative.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });
        if has_drive || escapes {
            return Err(CleanupError::OutsideStorageRoot(file_ref.to_string()));
        }

        let root = fs::canonicalize(&self.settings.storage_root)?;
        let candidate = root.join(relative);
        let resolved = match fs::canonicalize(&candidate) {
            Ok(resolved) => resolved,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CleanupError::NotFound(file_ref.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        // Symlinks may still point outside the root after canonicalization.
        if !resolved.starts_with(&root) || resolved == root {
            return Err(CleanupError::OutsideStorageRoot(file_ref.to_string()));
        }
        if !resolved.is_file() {
            return Err(CleanupError::Failed(format!(
                "`{file_ref}` is not a regular file"
            )));
        }
        Ok(ArtifactLocation::Local(resolved))
    }

    fn delete(&self, location: &ArtifactLocation) -> Result<(), CleanupError> {
        match location {
            ArtifactLocation::Local(path) => match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    Err(CleanupError::NotFound(path.display().to_string()))
                }
                Err(err) => Err(err.into()),
            },
            ArtifactLocation::Remote { file_id } => {
                let remote = self.remote.as_ref().ok_or(CleanupError::RemoteUnavailable)?;
                debug!(file_id, "deleting remote artifact");
                remote.delete_artifact(file_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<String>>,
        failures_before_success: Mutex<u32>,
    }

    impl ArtifactApi for RecordingApi {
        fn delete_artifact(&self, file_id: &str) -> Result<(), CleanupError> {
            self.calls.lock().unwrap().push(file_id.to_string());
            let mut remaining = self.failures_before_success.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CleanupError::Transient("503 Service Unavailable".into()));
            }
            Ok(())
        }
    }

    fn settings(root: &Path) -> CleanupSettings {
        let mut settings = CleanupSettings::new(root).with_owned_host("store");
        settings.backoff = Duration::from_millis(1);
        settings
    }

    #[test]
    fn same_reference_is_never_cleaned() {
        for reference in ["", "https://store/fileA", "uploads/a.pdf", "mailto:ap@example.com"] {
            assert!(!should_cleanup_file(reference, reference), "{reference}");
        }
    }

    #[test]
    fn sharing_parameters_are_ignored() {
        assert!(!should_cleanup_file(
            "https://store/fileA?dl=0&token=abc",
            "https://STORE/fileA/#preview"
        ));
        assert!(!should_cleanup_file(
            "https://drive.example.com/file/d/XYZ123/view?usp=sharing",
            "https://drive.example.com/open?id=XYZ123"
        ));
        assert!(!should_cleanup_file("./uploads//a.pdf", "uploads/a.pdf"));
        assert!(should_cleanup_file("https://store/fileA", "https://store/fileB"));
        assert!(should_cleanup_file("uploads/a.pdf", ""));
    }

    #[test]
    fn local_cleanup_removes_file_under_root() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("uploads")).unwrap();
        let file = dir.path().join("uploads/invoice.pdf");
        fs::write(&file, b"%PDF").unwrap();

        let manager = FileCleanupManager::new(settings(dir.path()));
        assert!(manager.cleanup_uploaded_file("uploads/invoice.pdf", None));
        assert!(!file.exists());
        assert!(!manager.cleanup_uploaded_file("uploads/invoice.pdf", None));
    }

    #[test]
    fn traversal_and_absolute_paths_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("storage");
        fs::create_dir_all(&root).unwrap();
        let outside = dir.path().join("secret.txt");
        fs::write(&outside, b"keep").unwrap();

        let manager = FileCleanupManager::new(settings(&root));
        assert!(!manager.cleanup_uploaded_file("../secret.txt", None));
        assert!(!manager.cleanup_uploaded_file("..\\secret.txt", None));
        assert!(!manager.cleanup_uploaded_file(outside.to_str().unwrap(), None));
        assert!(!manager.cleanup_uploaded_file("C:\\Windows\\win.ini", None));
        assert!(!manager.cleanup_uploaded_file("", None));
        assert!(outside.exists());
        assert!(matches!(
            manager.try_cleanup("../secret.txt", None, None),
            Err(CleanupError::OutsideStorageRoot(_))
        ));
    }

    #[test]
    fn external_urls_are_never_deleted() {
        let dir = tempdir().expect("tempdir");
        let api = Arc::new(RecordingApi::default());
        let manager = FileCleanupManager::new(settings(dir.path())).with_remote(api.clone());

        assert!(!manager.cleanup_uploaded_file("mailto:ap@vendor.example", None));
        assert!(!manager.cleanup_uploaded_file("https://outlook.example.com/mail/id/AAMk", None));
        assert!(!manager.cleanup_uploaded_file("file:///etc/passwd", None));
        assert!(api.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn remote_cleanup_retries_once() {
        let dir = tempdir().expect("tempdir");
        let api = Arc::new(RecordingApi::default());
        *api.failures_before_success.lock().unwrap() = 1;
        let manager = FileCleanupManager::new(settings(dir.path())).with_remote(api.clone());

        assert!(manager.cleanup_uploaded_file("https://store/fileA?dl=1", None));
        assert_eq!(*api.calls.lock().unwrap(), vec!["fileA", "fileA"]);
    }

    #[test]
    fn remote_cleanup_gives_up_after_max_attempts() {
        let dir = tempdir().expect("tempdir");
        let api = Arc::new(RecordingApi::default());
        *api.failures_before_success.lock().unwrap() = 5;
        let manager = FileCleanupManager::new(settings(dir.path())).with_remote(api.clone());

        assert!(!manager.cleanup_uploaded_file("https://store/fileA", Some("f-42")));
        assert_eq!(*api.calls.lock().unwrap(), vec!["f-42", "f-42"]);
    }

    #[test]
    fn owned_url_without_api_fails_closed() {
        let dir = tempdir().expect("tempdir");
        let manager = FileCleanupManager::new(settings(dir.path()));
        assert!(matches!(
            manager.try_cleanup("https://store/fileA", None, None),
            Err(CleanupError::RemoteUnavailable)
        ));
    }
}
