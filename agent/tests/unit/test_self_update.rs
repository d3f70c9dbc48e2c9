use std::io::Write;
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;

use fleetsync::models::DeployMethod;
use fleetsync::update::{ArchiveSource, SelfUpdater, SELF_SLUG};

use crate::common::{fail, git_tree, ok, update_options, ScriptedRunner};

fn updater(runner: ScriptedRunner, scratch: &std::path::Path) -> (SelfUpdater, Arc<ScriptedRunner>) {
    let runner = Arc::new(runner);
    let updater = SelfUpdater::new(update_options(scratch, None), runner.clone()).unwrap();
    (updater, runner)
}

/// Gzipped tarball with every entry under `root/`
fn tarball(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", root, name), contents.as_bytes())
            .unwrap();
    }
    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_second_update_reports_no_change() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = ScriptedRunner::new().git(
        &["rev-parse", "--short", "HEAD"],
        vec![ok("9f8e7d6\n"), ok("abc1234\n")],
    );
    let (updater, runner) = updater(runner, scratch.path());

    let first = updater.update(SELF_SLUG, tree.path()).await;
    assert!(first.success);
    assert!(first.updated());
    assert_eq!(first.message, "updated 9f8e7d6 -> abc1234");

    let second = updater.update(SELF_SLUG, tree.path()).await;
    assert!(second.success);
    assert!(!second.updated());
    assert_eq!(second.after_version.as_deref(), Some("abc1234"));
    assert_eq!(second.message, "already at abc1234");

    assert_eq!(runner.git_calls("reset").len(), 2);
}

#[tokio::test]
async fn test_failed_reset_is_failure_when_strict() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = ScriptedRunner::new()
        .git(&["rev-parse"], vec![ok("9f8e7d6\n")])
        .git(&["reset"], vec![fail(128, "fatal: unable to write new index file")]);
    let (updater, _) = updater(runner, scratch.path());

    let outcome = updater.update(SELF_SLUG, tree.path()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.method, DeployMethod::VcsReset);
    assert!(outcome.message.contains("unable to write new index file"));
}

#[tokio::test]
async fn test_failed_reset_is_reported_when_lenient() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .git(&["rev-parse"], vec![ok("9f8e7d6\n")])
            .git(&["fetch"], vec![fail(1, "Could not resolve host: github.com")]),
    );
    let mut options = update_options(scratch.path(), None);
    options.strict_vcs = false;
    let updater = SelfUpdater::new(options, runner.clone()).unwrap();

    let outcome = updater.update(SELF_SLUG, tree.path()).await;

    assert!(outcome.success);
    assert!(!outcome.updated());
    assert!(outcome.message.contains("reset reported errors"));
    assert!(runner.git_calls("reset").is_empty());
}

#[tokio::test]
async fn test_tracked_changes_block_reset() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = ScriptedRunner::new()
        .git(&["status"], vec![ok(" M wp-config.php\nD  old.php\n?? notes.txt\n")]);
    let (updater, runner) = updater(runner, scratch.path());

    let outcome = updater.update(SELF_SLUG, tree.path()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.method, DeployMethod::VcsReset);
    assert!(outcome.message.contains("2 uncommitted change(s)"));
    assert!(runner.git_calls("fetch").is_empty());
    assert!(runner.git_calls("reset").is_empty());
}

#[tokio::test]
async fn test_untracked_files_do_not_block_reset() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = ScriptedRunner::new()
        .git(&["status"], vec![ok("?? uploads/cache.bin\n")])
        .git(&["rev-parse"], vec![ok("9f8e7d6\n"), ok("abc1234\n")]);
    let (updater, runner) = updater(runner, scratch.path());

    let outcome = updater.update(SELF_SLUG, tree.path()).await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(runner.git_calls("reset").len(), 1);
}

#[tokio::test]
async fn test_missing_tree_fails_without_running_git() {
    let scratch = tempfile::TempDir::new().unwrap();
    let (updater, runner) = updater(ScriptedRunner::new(), scratch.path());
    let missing = scratch.path().join("no-such-site");

    let outcome = updater.update("bar", &missing).await;

    assert!(!outcome.success);
    assert!(outcome.message.contains("does not exist"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_archive_swap_with_unexpected_root() {
    let mut server = mockito::Server::new_async().await;
    let body = tarball(
        "kit-4f2a9c1",
        &[("VERSION", "Version: 0.4.0\n"), ("inc/app.php", "<?php\n")],
    );
    let download = server
        .mock("GET", "/kit.tar.gz")
        .with_status(200)
        .with_header("content-type", "application/gzip")
        .with_body(body)
        .expect(1)
        .create_async()
        .await;

    let tree = tempfile::TempDir::new().unwrap();
    std::fs::write(tree.path().join("VERSION"), "0.3.0\n").unwrap();
    std::fs::write(tree.path().join("local-config.php"), "keep me").unwrap();
    let scratch = tempfile::TempDir::new().unwrap();

    let source = ArchiveSource {
        url: format!("{}/kit.tar.gz", server.url()),
        root: Some("kit-main".to_string()),
    };
    let runner = Arc::new(ScriptedRunner::new());
    let updater =
        SelfUpdater::new(update_options(scratch.path(), Some(source)), runner.clone()).unwrap();

    let outcome = updater.update(SELF_SLUG, tree.path()).await;

    download.assert_async().await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.method, DeployMethod::ArchiveSwap);
    assert_eq!(outcome.before_version.as_deref(), Some("0.3.0"));
    assert_eq!(outcome.after_version.as_deref(), Some("0.4.0"));
    assert!(outcome.updated());

    assert!(tree.path().join("inc/app.php").is_file());
    assert_eq!(
        std::fs::read_to_string(tree.path().join("local-config.php")).unwrap(),
        "keep me"
    );
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_archive_without_version_file_reports_root() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/kit.tar.gz")
        .with_status(200)
        .with_body(tarball("kit-4f2a9c1", &[("index.php", "<?php\n")]))
        .create_async()
        .await;

    let tree = tempfile::TempDir::new().unwrap();
    let scratch = tempfile::TempDir::new().unwrap();
    let source = ArchiveSource {
        url: format!("{}/kit.tar.gz", server.url()),
        root: None,
    };
    let updater = SelfUpdater::new(
        update_options(scratch.path(), Some(source)),
        Arc::new(ScriptedRunner::new()),
    )
    .unwrap();

    let outcome = updater.update(SELF_SLUG, tree.path()).await;

    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.after_version.as_deref(), Some("kit-4f2a9c1"));
    assert!(outcome.message.contains("VERSION not found"));
    assert!(tree.path().join("index.php").is_file());
}

#[tokio::test]
async fn test_archive_download_failure_cleans_scratch() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/kit.tar.gz")
        .with_status(404)
        .create_async()
        .await;

    let tree = tempfile::TempDir::new().unwrap();
    std::fs::write(tree.path().join("VERSION"), "0.3.0\n").unwrap();
    let scratch = tempfile::TempDir::new().unwrap();

    let source = ArchiveSource {
        url: format!("{}/kit.tar.gz", server.url()),
        root: None,
    };
    let updater = SelfUpdater::new(
        update_options(scratch.path(), Some(source)),
        Arc::new(ScriptedRunner::new()),
    )
    .unwrap();

    let outcome = updater.update(SELF_SLUG, tree.path()).await;

    assert!(!outcome.success);
    assert!(outcome.message.contains("404"));
    assert_eq!(
        std::fs::read_to_string(tree.path().join("VERSION")).unwrap(),
        "0.3.0\n"
    );
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_tree_without_vcs_or_archive_source_fails() {
    let tree = tempfile::TempDir::new().unwrap();
    let scratch = tempfile::TempDir::new().unwrap();
    let (updater, _) = updater(ScriptedRunner::new(), scratch.path());

    let outcome = updater.update(SELF_SLUG, tree.path()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.method, DeployMethod::ArchiveSwap);
    assert!(outcome.message.contains("no archive source"));
}

#[tokio::test]
async fn test_concurrent_updates_on_one_tree_serialize() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = ScriptedRunner::new().git(
        &["rev-parse", "--short", "HEAD"],
        vec![ok("1111111\n"), ok("2222222\n"), ok("2222222\n")],
    );
    let (updater, runner) = updater(runner, scratch.path());
    let updater = Arc::new(updater);

    let a = {
        let updater = updater.clone();
        let tree = tree.path().to_path_buf();
        tokio::spawn(async move { updater.update("a", &tree).await })
    };
    let b = {
        let updater = updater.clone();
        let tree = tree.path().to_path_buf();
        tokio::spawn(async move { updater.update("b", &tree).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    // Serialized runs read before/after in pairs, so exactly one moved
    assert_eq!([a.updated(), b.updated()].iter().filter(|u| **u).count(), 1);
    let order: Vec<String> = runner
        .calls()
        .into_iter()
        .map(|c| c.args[0].clone())
        .collect();
    assert_eq!(
        order,
        vec![
            "status", "rev-parse", "fetch", "reset", "rev-parse",
            "status", "rev-parse", "fetch", "reset", "rev-parse",
        ]
    );
}
