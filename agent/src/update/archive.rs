//! Archive swap for working trees without version control metadata

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Where the canonical branch snapshot is downloaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    /// `.tar.gz` snapshot of the canonical branch
    pub url: String,

    /// Top-level directory the archive is expected to unpack into
    pub root: Option<String>,
}

impl ArchiveSource {
    /// Resolve the archive source from settings.
    ///
    /// An explicit URL wins. Otherwise a GitHub remote URL yields
    /// `<repo url>/archive/refs/heads/<branch>.tar.gz`, which unpacks into
    /// `<repo>-<branch>`.
    pub fn resolve(
        remote_url: &str,
        branch: &str,
        archive_url: Option<&str>,
        archive_root: Option<&str>,
    ) -> Option<Self> {
        if let Some(url) = archive_url.filter(|u| !u.trim().is_empty()) {
            return Some(Self {
                url: url.trim().to_string(),
                root: archive_root.map(str::to_string),
            });
        }

        let (base, repo) = github_repo(remote_url)?;
        Some(Self {
            url: format!("{}/archive/refs/heads/{}.tar.gz", base, branch),
            root: Some(
                archive_root
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}-{}", repo, branch.replace('/', "-"))),
            ),
        })
    }
}

/// `https://github.com/<owner>/<repo>` and `<repo>` for a GitHub remote,
/// accepting https and scp-style ssh forms
fn github_repo(remote_url: &str) -> Option<(String, String)> {
    let trimmed = remote_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let path = trimmed
        .strip_prefix("https://github.com/")
        .or_else(|| trimmed.strip_prefix("http://github.com/"))
        .or_else(|| trimmed.strip_prefix("git@github.com:"))
        .or_else(|| trimmed.strip_prefix("ssh://git@github.com/"))?;

    let mut parts = path.split('/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    if parts.next().is_some() {
        return None;
    }
    Some((format!("https://github.com/{}/{}", owner, repo), repo.to_string()))
}

/// Download `url` into `dest`
pub async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64, AgentError> {
    info!("Downloading archive {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AgentError::ArchiveError(format!("download failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AgentError::ArchiveError(format!(
            "download failed: HTTP {}",
            status
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AgentError::ArchiveError(format!("download interrupted: {}", e)))?;
    fs::write(dest, &bytes).await?;
    debug!("Downloaded {} bytes to {:?}", bytes.len(), dest);
    Ok(bytes.len() as u64)
}

/// Unpack a gzip-compressed tarball into `dest`
pub async fn extract(archive: &Path, dest: &Path) -> Result<(), AgentError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let file = std::fs::File::open(&archive)?;
        let decoder = flate2::read::GzDecoder::new(io::BufReader::new(file));
        let mut tarball = tar::Archive::new(decoder);
        tarball.set_preserve_permissions(true);
        tarball.unpack(&dest)
    })
    .await
    .map_err(|e| AgentError::Internal(format!("extraction task failed: {}", e)))?
    .map_err(|e| AgentError::ArchiveError(format!("extraction failed: {}", e)))
}

/// Find the directory the archive unpacked into: the expected name when
/// present, otherwise the first subdirectory found.
pub async fn locate_root(extracted: &Dir, expected: Option<&str>) -> Result<PathBuf, AgentError> {
    if let Some(name) = expected {
        let conventional = extracted.subdir(name);
        if conventional.exists().await {
            return Ok(conventional.path().to_path_buf());
        }
        debug!("Expected archive root {:?} missing, scanning", name);
    }

    extracted
        .list_dirs()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::ArchiveError("extracted directory not found".to_string()))
}

/// Version identifier recorded in a tree's version file: the value of a
/// `Version:` line, or else the first non-empty line.
pub async fn read_version(tree: &Path, version_file: &str) -> Option<String> {
    let contents = File::new(tree.join(version_file)).read_string().await.ok()?;
    parse_version(&contents)
}

fn parse_version(contents: &str) -> Option<String> {
    let header = contents.lines().find_map(|line| {
        let line = line.trim().trim_start_matches(['*', '#', ' ']);
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("version")
            .then(|| value.trim().to_string())
    });

    header
        .or_else(|| {
            contents
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
        .filter(|v| !v.is_empty())
}

/// What an archive swap copied over a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    pub files: usize,
    /// Name of the archive's top-level directory
    pub root: String,
}

/// Download, unpack and copy the archive over `tree`, using a fresh
/// directory under `scratch_parent` that is removed afterwards.
pub async fn swap(
    client: &reqwest::Client,
    source: &ArchiveSource,
    scratch_parent: &Path,
    tree: &Path,
) -> Result<Installed, AgentError> {
    let scratch = Dir::create_scratch(scratch_parent, "update").await?;
    let result = swap_in(client, source, &scratch, tree).await;

    if let Err(e) = scratch.delete().await {
        debug!("Failed to remove scratch dir {:?}: {}", scratch.path(), e);
    }
    result
}

async fn swap_in(
    client: &reqwest::Client,
    source: &ArchiveSource,
    scratch: &Dir,
    tree: &Path,
) -> Result<Installed, AgentError> {
    let archive = scratch.file("snapshot.tar.gz");
    download(client, &source.url, archive.path()).await?;

    let extracted = scratch.subdir("extracted");
    extracted.create().await?;
    extract(archive.path(), extracted.path()).await?;

    let root = locate_root(&extracted, source.root.as_deref()).await?;
    let copied = Dir::new(&root)
        .copy_into(tree)
        .await
        .map_err(|e| AgentError::ArchiveError(format!("copy failed: {}", e)))?;

    info!("Copied {} file(s) from {:?} into {:?}", copied, root, tree);
    Ok(Installed {
        files: copied,
        root: root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    })
}
