//! Registry-backed `PluginSource`.
//!
//! Packages are addressed by `{namespace}/{name}/{version}`. The registry
//! answers `GET {registry}/plugins/{namespace}/{name}/{version}` with a
//! [`PackageMetadata`] document; the archive it points to is a `.tar.gz`
//! whose root contains `plugin.toml`.
//!
//! Install layout:
//!
//! ```text
//! {plugins_dir}/{namespace}/{name}/{version}/
//!     plugin.toml
//!     <entrypoint>
//!     .package.tar.gz   downloaded archive
//!     .checksum         expected SHA-256 recorded at install time
//! ```
//!
//! A package is reused without network access when the stored archive
//! still hashes to the recorded checksum. New installs are unpacked into a
//! hidden sibling directory and renamed into place, so readers never see a
//! half-extracted package. Callers serialise installs of one package.

use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flowforge_core::plugin::checksum::{sha256_hex, verify_checksum};
use flowforge_core::plugin::{InstalledPlugin, PluginError, PluginSource};
use flowforge_types::plugin::{PluginManifest, PluginRef};
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

pub const MANIFEST_FILE: &str = "plugin.toml";
const ARCHIVE_FILE: &str = ".package.tar.gz";
const CHECKSUM_FILE: &str = ".checksum";

/// Versions must be exact semver and names plain path segments, since both
/// become directories under the install root.
fn check_reference(plugin: &PluginRef) -> Result<(), PluginError> {
    semver::Version::parse(&plugin.version)
        .map_err(|e| PluginError::Manifest(format!("{plugin}: invalid version '{}': {e}", plugin.version)))?;
    for segment in [&plugin.namespace, &plugin.name] {
        if segment.is_empty() || segment.contains(['/', '\\']) || segment.starts_with('.') {
            return Err(PluginError::Manifest(format!("{plugin}: invalid path segment '{segment}'")));
        }
    }
    Ok(())
}

/// Registry answer for one package version.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    /// Hex SHA-256 of the archive, optionally `sha256:`-prefixed.
    pub checksum: String,
    /// Absolute, or relative to the registry base URL.
    pub download_url: String,
}

pub struct RegistryPluginSource {
    registry_url: String,
    plugins_dir: PathBuf,
    token: Option<SecretString>,
    http: reqwest::Client,
}

impl RegistryPluginSource {
    pub fn new(registry_url: impl Into<String>, plugins_dir: impl Into<PathBuf>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("flowforge-plugin-host/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            plugins_dir: plugins_dir.into(),
            token: None,
            http,
        }
    }

    /// Send `Authorization: Bearer <token>` to the registry.
    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.token = token;
        self
    }

    pub fn install_dir(&self, plugin: &PluginRef) -> PathBuf {
        self.plugins_dir
            .join(&plugin.namespace)
            .join(&plugin.name)
            .join(&plugin.version)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn fetch_metadata(&self, plugin: &PluginRef) -> Result<PackageMetadata, PluginError> {
        let url = format!(
            "{}/plugins/{}/{}/{}",
            self.registry_url, plugin.namespace, plugin.name, plugin.version
        );
        let fetch = |message: String| PluginError::Fetch {
            plugin: plugin.to_string(),
            message,
        };

        self.request(&url)
            .send()
            .await
            .map_err(|e| fetch(format!("GET {url}: {e}")))?
            .error_for_status()
            .map_err(|e| fetch(format!("GET {url}: {e}")))?
            .json::<PackageMetadata>()
            .await
            .map_err(|e| fetch(format!("invalid metadata from {url}: {e}")))
    }

    async fn download(&self, plugin: &PluginRef, metadata: &PackageMetadata) -> Result<Vec<u8>, PluginError> {
        let url = if metadata.download_url.starts_with("http://")
            || metadata.download_url.starts_with("https://")
        {
            metadata.download_url.clone()
        } else {
            format!("{}/{}", self.registry_url, metadata.download_url.trim_start_matches('/'))
        };
        let fetch = |message: String| PluginError::Fetch {
            plugin: plugin.to_string(),
            message,
        };

        let response = self
            .request(&url)
            .send()
            .await
            .map_err(|e| fetch(format!("GET {url}: {e}")))?
            .error_for_status()
            .map_err(|e| fetch(format!("GET {url}: {e}")))?;

        let mut bytes = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| fetch(format!("reading {url}: {e}")))?;
            bytes.extend_from_slice(&chunk);
        }
        tracing::debug!(plugin = %plugin, bytes = bytes.len(), "plugin package downloaded");
        Ok(bytes)
    }
}

impl PluginSource for RegistryPluginSource {
    async fn ensure_installed(&self, plugin: &PluginRef) -> Result<InstalledPlugin, PluginError> {
        check_reference(plugin)?;
        let dir = self.install_dir(plugin);

        if let Some(manifest) = installed_manifest(&dir).await? {
            tracing::debug!(plugin = %plugin, path = %dir.display(), "plugin already installed");
            return Ok(InstalledPlugin {
                plugin: plugin.clone(),
                path: dir,
                manifest,
            });
        }

        let metadata = self.fetch_metadata(plugin).await?;
        let archive = self.download(plugin, &metadata).await?;
        let manifest = install_archive(plugin, &dir, archive, &metadata.checksum).await?;

        tracing::info!(plugin = %plugin, path = %dir.display(), "plugin installed");
        Ok(InstalledPlugin {
            plugin: plugin.clone(),
            path: dir,
            manifest,
        })
    }

    async fn uninstall(&self, plugin: &PluginRef) -> Result<(), PluginError> {
        let dir = self.install_dir(plugin);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(plugin = %plugin, "plugin uninstalled");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PluginError::Unload(format!("{}: {e}", dir.display()))),
        }
    }
}

// ---------------------------------------------------------------------------
// Install helpers
// ---------------------------------------------------------------------------

/// The manifest of a complete, checksum-valid install in `dir`, if any.
pub async fn installed_manifest(dir: &Path) -> Result<Option<PluginManifest>, PluginError> {
    let (Ok(recorded), Ok(archive)) = (
        tokio::fs::read_to_string(dir.join(CHECKSUM_FILE)).await,
        tokio::fs::read(dir.join(ARCHIVE_FILE)).await,
    ) else {
        return Ok(None);
    };

    if !sha256_hex(&archive).eq_ignore_ascii_case(recorded.trim()) {
        tracing::warn!(path = %dir.display(), "stored plugin archive no longer matches its checksum");
        return Ok(None);
    }
    read_manifest(dir).await.map(Some)
}

/// Verify `archive` against `expected`, unpack it beside `dir` and swap it
/// into place. A failed install leaves any previous contents of `dir` intact.
pub async fn install_archive(
    plugin: &PluginRef,
    dir: &Path,
    archive: Vec<u8>,
    expected: &str,
) -> Result<PluginManifest, PluginError> {
    verify_checksum(&plugin.to_string(), &archive, expected)?;

    let staging = sibling(dir, "staging");
    let result = stage_and_swap(plugin, dir, &staging, archive).await;
    if result.is_err()
        && let Err(e) = tokio::fs::remove_dir_all(&staging).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %staging.display(), error = %e, "failed to clean up plugin staging directory");
    }
    result
}

async fn stage_and_swap(
    plugin: &PluginRef,
    dir: &Path,
    staging: &Path,
    archive: Vec<u8>,
) -> Result<PluginManifest, PluginError> {
    let label = plugin.to_string();
    let fail = |message: String| PluginError::Extract {
        plugin: label.clone(),
        message,
    };

    let extract = {
        let staging = staging.to_path_buf();
        move || -> std::io::Result<()> {
            std::fs::create_dir_all(&staging)?;
            tar::Archive::new(GzDecoder::new(archive.as_slice())).unpack(&staging)?;
            std::fs::write(staging.join(ARCHIVE_FILE), &archive)?;
            std::fs::write(staging.join(CHECKSUM_FILE), sha256_hex(&archive))
        }
    };
    tokio::task::spawn_blocking(extract)
        .await
        .map_err(|e| fail(e.to_string()))?
        .map_err(|e| fail(e.to_string()))?;

    let manifest = read_manifest(staging).await?;
    if manifest.name != plugin.name || manifest.version != plugin.version {
        return Err(PluginError::Manifest(format!(
            "package declares {}@{}, expected {}@{}",
            manifest.name, manifest.version, plugin.name, plugin.version
        )));
    }

    let swap = {
        let (staging, dir) = (staging.to_path_buf(), dir.to_path_buf());
        move || swap_into_place(&staging, &dir)
    };
    tokio::task::spawn_blocking(swap)
        .await
        .map_err(|e| fail(e.to_string()))?
        .map_err(|e| fail(e.to_string()))?;
    Ok(manifest)
}

/// Replace `dir` with `staging` using renames, restoring the previous
/// install if the second rename fails.
fn swap_into_place(staging: &Path, dir: &Path) -> std::io::Result<()> {
    if let Some(parent) = dir.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let retired = sibling(dir, "retired");
    let had_previous = match std::fs::rename(dir, &retired) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    if let Err(e) = std::fs::rename(staging, dir) {
        if had_previous {
            let _ = std::fs::rename(&retired, dir);
        }
        return Err(e);
    }
    if had_previous && let Err(e) = std::fs::remove_dir_all(&retired) {
        tracing::warn!(path = %retired.display(), error = %e, "failed to remove replaced plugin install");
    }
    Ok(())
}

/// A unique hidden directory next to `dir`.
fn sibling(dir: &Path, purpose: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!(".{name}.{purpose}-{}", uuid::Uuid::now_v7()))
}

pub async fn read_manifest(dir: &Path) -> Result<PluginManifest, PluginError> {
    let path = dir.join(MANIFEST_FILE);
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| PluginError::Manifest(format!("{}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| PluginError::Manifest(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn plugin() -> PluginRef {
        PluginRef {
            name: "echo".into(),
            version: "1.2.0".into(),
            namespace: "core".into(),
        }
    }

    /// A `.tar.gz` holding the given `(path, contents)` entries.
    fn package(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    const MANIFEST: &[u8] = br#"
name = "echo"
version = "1.2.0"
runtime = "process"
entrypoint = "bin/echo.sh"
operations = ["execute"]

[[specifications]]
name = "message"
type = "string"
required = true
"#;

    #[tokio::test]
    async fn installs_and_reuses_a_verified_package() {
        let root = tempfile::tempdir().unwrap();
        // Unroutable registry: the second call must not touch the network.
        let source = RegistryPluginSource::new("http://127.0.0.1:9", root.path());
        let archive = package(&[("plugin.toml", MANIFEST), ("bin/echo.sh", b"#!/bin/sh\ncat\n")]);
        let checksum = sha256_hex(&archive);

        let dir = source.install_dir(&plugin());
        let manifest = install_archive(&plugin(), &dir, archive, &checksum).await.unwrap();
        assert_eq!(manifest.entrypoint, "bin/echo.sh");
        assert_eq!(manifest.specifications.len(), 1);
        assert!(dir.join("bin/echo.sh").exists());

        let installed = source.ensure_installed(&plugin()).await.unwrap();
        assert_eq!(installed.path, dir);
        assert_eq!(installed.entrypoint(), dir.join("bin/echo.sh"));
    }

    #[tokio::test]
    async fn checksum_mismatch_installs_nothing() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("core/echo/1.2.0");
        let archive = package(&[("plugin.toml", MANIFEST)]);

        let err = install_archive(&plugin(), &dir, archive, &sha256_hex(b"something else"))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::ChecksumMismatch { .. }));
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn tampered_install_is_not_reused() {
        let root = tempfile::tempdir().unwrap();
        let source = RegistryPluginSource::new("http://127.0.0.1:9", root.path());
        let archive = package(&[("plugin.toml", MANIFEST)]);
        let dir = source.install_dir(&plugin());
        install_archive(&plugin(), &dir, archive.clone(), &sha256_hex(&archive))
            .await
            .unwrap();

        std::fs::write(dir.join(ARCHIVE_FILE), b"corrupted").unwrap();
        assert!(installed_manifest(&dir).await.unwrap().is_none());
        // Falls through to the registry, which is unreachable.
        assert!(matches!(
            source.ensure_installed(&plugin()).await,
            Err(PluginError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn manifest_must_match_the_reference() {
        let root = tempfile::tempdir().unwrap();
        let archive = package(&[("plugin.toml", MANIFEST)]);
        let mut other = plugin();
        other.version = "2.0.0".into();

        let err = install_archive(&other, &root.path().join("x"), archive.clone(), &sha256_hex(&archive))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Manifest(_)));
    }

    #[tokio::test]
    async fn reinstall_swaps_in_place_and_failures_keep_the_old_install() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("core/echo/1.2.0");
        let first = package(&[("plugin.toml", MANIFEST), ("bin/echo.sh", b"v1".as_slice())]);
        install_archive(&plugin(), &dir, first.clone(), &sha256_hex(&first))
            .await
            .unwrap();

        let other_manifest: &[u8] = b"name = \"other\"\nversion = \"1.2.0\"\nruntime = \"process\"\nentrypoint = \"x\"\n";
        let wrong = package(&[("plugin.toml", other_manifest)]);
        let err = install_archive(&plugin(), &dir, wrong.clone(), &sha256_hex(&wrong))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Manifest(_)));
        assert_eq!(std::fs::read(dir.join("bin/echo.sh")).unwrap(), b"v1");
        assert!(installed_manifest(&dir).await.unwrap().is_some());

        let second = package(&[("plugin.toml", MANIFEST), ("bin/echo.sh", b"v2".as_slice())]);
        install_archive(&plugin(), &dir, second.clone(), &sha256_hex(&second))
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.join("bin/echo.sh")).unwrap(), b"v2");

        let leftovers: Vec<_> = std::fs::read_dir(root.path().join("core/echo"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("1.2.0")]);
    }

    #[tokio::test]
    async fn malformed_references_are_rejected_before_fetching() {
        let root = tempfile::tempdir().unwrap();
        let source = RegistryPluginSource::new("http://127.0.0.1:9", root.path());

        let mut bad_version = plugin();
        bad_version.version = "latest".into();
        assert!(matches!(
            source.ensure_installed(&bad_version).await,
            Err(PluginError::Manifest(_))
        ));

        let mut traversal = plugin();
        traversal.namespace = "../etc".into();
        assert!(matches!(
            source.ensure_installed(&traversal).await,
            Err(PluginError::Manifest(_))
        ));
    }

    #[tokio::test]
    async fn uninstall_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let source = RegistryPluginSource::new("http://127.0.0.1:9", root.path());
        source.uninstall(&plugin()).await.unwrap();
    }
}
