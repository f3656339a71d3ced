//! Diagnostic artifacts captured when a dispatch terminates in failure.
//!
//! The dispatcher calls a [`FailureReporter`] exactly once per failed
//! invocation, at the boundary where the error is decorated. Whatever the
//! reporter returns is attached to the error; a reporter failure is logged
//! and never replaces the original cause.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::result::{EsperarError, EsperarResult};
use crate::session::ResolutionContext;

/// What an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// PNG screenshot, base64 encoded
    Screenshot,
    /// Serialized document
    PageSource,
}

impl ArtifactKind {
    /// File extension used when writing to disk
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Screenshot => "png",
            Self::PageSource => "html",
        }
    }
}

/// Opaque diagnostic attached to a terminal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique id, also the file stem on disk
    pub id: Uuid,
    /// Content kind
    pub kind: ArtifactKind,
    /// Capture time
    pub captured_at: DateTime<Utc>,
    /// Content (base64 for screenshots)
    pub content: String,
    /// SHA-256 of the raw bytes
    pub digest: String,
    /// Where the artifact was written, if anywhere
    pub path: Option<PathBuf>,
}

impl Artifact {
    /// Screenshot artifact from raw PNG bytes
    #[must_use]
    pub fn screenshot(png: &[u8]) -> Self {
        Self::new(ArtifactKind::Screenshot, BASE64.encode(png), digest(png))
    }

    /// Page source artifact
    #[must_use]
    pub fn page_source(html: String) -> Self {
        let digest = digest(html.as_bytes());
        Self::new(ArtifactKind::PageSource, html, digest)
    }

    fn new(kind: ArtifactKind, content: String, digest: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            captured_at: Utc::now(),
            content,
            digest,
            path: None,
        }
    }

    /// Raw bytes of the artifact
    pub fn bytes(&self) -> EsperarResult<Vec<u8>> {
        match self.kind {
            ArtifactKind::Screenshot => BASE64.decode(&self.content).map_err(|e| {
                EsperarError::invalid_argument(format!(
                    "corrupt screenshot artifact {}: {e}",
                    self.id
                ))
            }),
            ArtifactKind::PageSource => Ok(self.content.clone().into_bytes()),
        }
    }

    /// Write the raw bytes below `folder` and remember the path
    pub fn write_to(&mut self, folder: &Path) -> EsperarResult<&Path> {
        fs::create_dir_all(folder)?;
        let path = folder.join(format!("{}.{}", self.id, self.kind.extension()));
        fs::write(&path, self.bytes()?)?;
        Ok(self.path.insert(path).as_path())
    }
}

fn digest(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    let result = hasher.finalize();
    format!("{result:x}")
}

/// Hook invoked once per terminal failure
pub trait FailureReporter: Send + Sync {
    /// Capture artifacts for `error`, which is the undecorated cause
    fn on_terminal_failure(
        &self,
        context: &dyn ResolutionContext,
        error: &EsperarError,
    ) -> EsperarResult<Vec<Artifact>>;
}

impl<F> FailureReporter for F
where
    F: Fn(&dyn ResolutionContext, &EsperarError) -> EsperarResult<Vec<Artifact>> + Send + Sync,
{
    fn on_terminal_failure(
        &self,
        context: &dyn ResolutionContext,
        error: &EsperarError,
    ) -> EsperarResult<Vec<Artifact>> {
        self(context, error)
    }
}

/// Reporter that captures a screenshot and the page source
#[derive(Debug, Clone)]
pub struct SnapshotReporter {
    screenshots: bool,
    page_source: bool,
    reports_folder: Option<PathBuf>,
}

impl Default for SnapshotReporter {
    fn default() -> Self {
        Self {
            screenshots: true,
            page_source: true,
            reports_folder: None,
        }
    }
}

impl SnapshotReporter {
    /// Capture both kinds, keep them in memory only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow the capture switches and reports folder of `config`
    #[must_use]
    pub fn from_configuration(config: &Configuration) -> Self {
        Self {
            screenshots: config.screenshots,
            page_source: config.save_page_source,
            reports_folder: Some(config.reports_folder.clone()),
        }
    }

    /// Enable or disable screenshots
    #[must_use]
    pub const fn with_screenshots(mut self, enabled: bool) -> Self {
        self.screenshots = enabled;
        self
    }

    /// Enable or disable page source capture
    #[must_use]
    pub const fn with_page_source(mut self, enabled: bool) -> Self {
        self.page_source = enabled;
        self
    }

    /// Also write artifacts below `folder`
    #[must_use]
    pub fn with_reports_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.reports_folder = Some(folder.into());
        self
    }

    /// Folder artifacts are written to, if any
    #[must_use]
    pub fn reports_folder(&self) -> Option<&Path> {
        self.reports_folder.as_deref()
    }
}

impl FailureReporter for SnapshotReporter {
    fn on_terminal_failure(
        &self,
        context: &dyn ResolutionContext,
        error: &EsperarError,
    ) -> EsperarResult<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        if self.screenshots {
            match context.screenshot() {
                Ok(png) => artifacts.push(Artifact::screenshot(&png)),
                Err(e) => warn!(error = %e, "screenshot capture failed"),
            }
        }
        if self.page_source {
            match context.page_source() {
                Ok(html) => artifacts.push(Artifact::page_source(html)),
                Err(e) => warn!(error = %e, "page source capture failed"),
            }
        }
        if let Some(folder) = &self.reports_folder {
            for artifact in &mut artifacts {
                match artifact.write_to(folder) {
                    Ok(path) => {
                        debug!(path = %path.display(), cause = %error, "wrote failure artifact");
                    }
                    // Kept in memory with `path: None`
                    Err(e) => warn!(
                        error = %e,
                        folder = %folder.display(),
                        id = %artifact.id,
                        "failed to write failure artifact"
                    ),
                }
            }
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDocument, NodeSpec};

    fn not_found() -> EsperarError {
        EsperarError::NotFound {
            locator: "#gone".into(),
        }
    }

    fn document() -> MemoryDocument {
        let doc = MemoryDocument::new();
        doc.append(None, NodeSpec::new("p").text("hi")).unwrap();
        doc
    }

    mod artifact_tests {
        use super::*;

        #[test]
        fn test_screenshot_is_base64() {
            let artifact = Artifact::screenshot(&[0x89, b'P', b'N', b'G']);
            assert_eq!(artifact.kind, ArtifactKind::Screenshot);
            assert_eq!(artifact.content, "iVBORw==");
            assert_eq!(artifact.bytes().unwrap(), vec![0x89, b'P', b'N', b'G']);
            assert_eq!(artifact.digest.len(), 64);
        }

        #[test]
        fn test_write_to_folder() {
            let dir = tempfile::tempdir().unwrap();
            let mut artifact = Artifact::page_source("<p>hi</p>".into());
            let path = artifact.write_to(dir.path()).unwrap().to_path_buf();
            assert!(path.ends_with(format!("{}.html", artifact.id)));
            assert_eq!(fs::read_to_string(path).unwrap(), "<p>hi</p>");
        }

        #[test]
        fn test_serializes_kind_snake_case() {
            let artifact = Artifact::page_source(String::new());
            let json = serde_json::to_string(&artifact).unwrap();
            assert!(json.contains("\"page_source\""));
        }
    }

    mod reporter_tests {
        use super::*;

        #[test]
        fn test_skips_unsupported_screenshot() {
            let doc = document();
            let artifacts = SnapshotReporter::new()
                .on_terminal_failure(&doc, &not_found())
                .unwrap();
            assert_eq!(artifacts.len(), 1);
            assert_eq!(artifacts[0].kind, ArtifactKind::PageSource);
            assert!(artifacts[0].content.contains("<p>hi</p>"));
        }

        #[test]
        fn test_captures_screenshot_when_available() {
            let doc = document();
            doc.set_screenshot(vec![1, 2, 3]);
            let artifacts = SnapshotReporter::new()
                .with_page_source(false)
                .on_terminal_failure(&doc, &not_found())
                .unwrap();
            assert_eq!(artifacts.len(), 1);
            assert_eq!(artifacts[0].bytes().unwrap(), vec![1, 2, 3]);
        }

        #[test]
        fn test_writes_to_reports_folder() {
            let dir = tempfile::tempdir().unwrap();
            let doc = document();
            let reporter = SnapshotReporter::new().with_reports_folder(dir.path());
            let artifacts = reporter.on_terminal_failure(&doc, &not_found()).unwrap();
            let path = artifacts[0].path.as_ref().unwrap();
            assert!(path.starts_with(dir.path()));
            assert!(path.exists());
        }

        #[test]
        fn test_write_failure_keeps_artifacts_in_memory() {
            let dir = tempfile::tempdir().unwrap();
            let occupied = dir.path().join("not-a-folder");
            fs::write(&occupied, "taken").unwrap();
            let doc = document();
            doc.set_screenshot(vec![1, 2, 3]);
            let artifacts = SnapshotReporter::new()
                .with_reports_folder(&occupied)
                .on_terminal_failure(&doc, &not_found())
                .unwrap();
            assert_eq!(artifacts.len(), 2);
            assert!(artifacts.iter().all(|a| a.path.is_none()));
            assert_eq!(artifacts[0].bytes().unwrap(), vec![1, 2, 3]);
            assert!(artifacts[1].content.contains("<p>hi</p>"));
        }

        #[test]
        fn test_from_configuration() {
            let config = Configuration::default().with_screenshots(false);
            let reporter = SnapshotReporter::from_configuration(&config);
            assert!(!reporter.screenshots);
            assert_eq!(reporter.reports_folder(), Some(config.reports_folder.as_path()));
        }

        #[test]
        fn test_closure_reporter() {
            let doc = document();
            let reporter = |_: &dyn ResolutionContext, _: &EsperarError| -> EsperarResult<Vec<Artifact>> {
                Ok(Vec::new())
            };
            assert!(reporter.on_terminal_failure(&doc, &not_found()).unwrap().is_empty());
        }
    }
}
