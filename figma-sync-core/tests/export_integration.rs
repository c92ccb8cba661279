use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use figma_sync_core::config::{
    DocumentRef, ExportConfig, ImageFormat, PublishConfig, SessionConfig, Timings,
};
use figma_sync_core::contract::{
    BrowserSession, MockBrowserLauncher, MockBrowserSession, MockObjectStore, MockRenderApi,
};
use figma_sync_core::{export, ExportError, ExportStage};
use tempfile::tempdir;
use tokio::time::Instant;

const STORE_BASE: &str = "https://store.example/storage/v1/object/public/bucket";

fn export_config(dir: &Path, node_ids: &[&str]) -> ExportConfig {
    let cookies_path = dir.join("cookies.json");
    std::fs::write(
        &cookies_path,
        r#"[{"name":"sid","value":"abc","domain":".figma.com","path":"/","secure":true}]"#,
    )
    .expect("write cookie fixture");

    ExportConfig {
        document: DocumentRef::new(
            "https://www.figma.com/design/KEY/Doc",
            "KEY",
            node_ids.iter().map(|s| s.to_string()).collect(),
            ImageFormat::Png,
        ),
        session: SessionConfig {
            cookies_path,
            ..SessionConfig::default()
        },
        publish: PublishConfig {
            export_dir: dir.join("exports"),
            prefix: "figma".to_string(),
        },
        timings: Timings::default(),
    }
}

fn launcher_for(session: MockBrowserSession) -> MockBrowserLauncher {
    let mut launcher = MockBrowserLauncher::new();
    launcher
        .expect_launch()
        .withf(|cookies| cookies.len() == 1 && cookies[0].name == "sid")
        .times(1)
        .return_once(move |_| Ok(Box::new(session) as Box<dyn BrowserSession>));
    launcher
}

/// A page where the control is clickable immediately and the sync finishes
/// after `busy_polls` checks.
fn syncing_page(busy_polls: u32) -> MockBrowserSession {
    let mut session = MockBrowserSession::new();
    session
        .expect_goto()
        .withf(|url| url == "https://www.figma.com/design/KEY/Doc")
        .times(1)
        .returning(|_| Ok(()));
    let mut busy_checks = 0u32;
    session.expect_evaluate_bool().returning(move |script| {
        if script.contains("const target") {
            Ok(true)
        } else {
            busy_checks += 1;
            Ok(busy_checks <= busy_polls)
        }
    });
    session.expect_close().times(1).returning(|| Ok(()));
    session
}

fn store_accepting(uploads: usize) -> MockObjectStore {
    let mut store = MockObjectStore::new();
    store.expect_remove().returning(|_| Ok(()));
    store
        .expect_upload()
        .withf(|_, _, content_type| content_type == "image/png")
        .times(uploads)
        .returning(|_, _, _| Ok(()));
    store
        .expect_public_url()
        .returning(|key| format!("{STORE_BASE}/{key}"));
    store
}

fn assert_fresh_url(url: &str, node_file_prefix: &str) {
    let prefix = format!("{STORE_BASE}/figma/{node_file_prefix}");
    assert!(url.starts_with(&prefix), "unexpected public url: {url}");
    let (_, stamp) = url.rsplit_once("?t=").expect("url has a freshness parameter");
    assert!(
        !stamp.is_empty() && stamp.chars().all(|c| c.is_ascii_digit()),
        "freshness parameter must be a millisecond timestamp, got: {url}"
    );
}

#[tokio::test(start_paused = true)]
async fn single_node_run_publishes_one_cache_busted_url() {
    let dir = tempdir().unwrap();
    let config = export_config(dir.path(), &["0:1"]);

    let launcher = launcher_for(syncing_page(2));

    let mut api = MockRenderApi::new();
    api.expect_file_version()
        .withf(|key| key == "KEY")
        .times(1)
        .returning(|_| Ok("v42".to_string()));
    api.expect_image_urls()
        .withf(|key, ids, version, format| {
            key == "KEY"
                && ids.len() == 1
                && ids[0] == "0:1"
                && version == "v42"
                && *format == ImageFormat::Png
        })
        .times(1)
        .returning(|_, _, _, _| {
            Ok(HashMap::from([(
                "0:1".to_string(),
                Some("https://renders.example/tmp/0-1.png".to_string()),
            )]))
        });
    api.expect_download()
        .withf(|url| url == "https://renders.example/tmp/0-1.png")
        .times(1)
        .returning(|_| Ok(vec![0x89, b'P', b'N', b'G']));

    let store = store_accepting(1);

    let started = Instant::now();
    let report = export(&config, &launcher, &api, &store)
        .await
        .expect("export should succeed");

    assert_eq!(report.version, "v42");
    let urls = report.urls();
    assert_eq!(urls.len(), 1);
    assert_fresh_url(&urls[0], "0_1_");
    assert_eq!(report.artifacts[0].content_type, "image/png");
    assert!(
        started.elapsed() >= Duration::from_secs(15),
        "the settle delay must be observed before the version is fetched"
    );

    let written: Vec<_> = std::fs::read_dir(dir.path().join("exports"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(written, vec![report.artifacts[0].file_name.clone()]);
}

#[tokio::test(start_paused = true)]
async fn control_never_found_fails_after_budget_and_releases_browser() {
    let dir = tempdir().unwrap();
    let config = export_config(dir.path(), &["0:1"]);

    let mut session = MockBrowserSession::new();
    session.expect_goto().returning(|_| Ok(()));
    session
        .expect_evaluate_bool()
        .withf(|script| script.contains("const target"))
        .times(30)
        .returning(|_| Ok(false));
    session.expect_close().times(1).returning(|| Ok(()));
    let launcher = launcher_for(session);

    // No expectations: any provider or store call fails the test.
    let api = MockRenderApi::new();
    let store = MockObjectStore::new();

    let started = Instant::now();
    let failure = export(&config, &launcher, &api, &store)
        .await
        .expect_err("run must fail when the control never appears");

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(failure.stage, ExportStage::ControlSearch);
    assert!(
        matches!(failure.error, ExportError::ControlNotFound { waited_ms: 30_000, .. }),
        "expected ControlNotFound, got {:?}",
        failure.error
    );
    assert!(failure.published.is_empty());
}

#[tokio::test(start_paused = true)]
async fn sync_that_never_finishes_times_out_and_releases_browser() {
    let dir = tempdir().unwrap();
    let config = export_config(dir.path(), &["0:1"]);

    let launcher = launcher_for(syncing_page(u32::MAX));
    let api = MockRenderApi::new();
    let store = MockObjectStore::new();

    let failure = export(&config, &launcher, &api, &store)
        .await
        .expect_err("run must fail when the busy indicator never goes away");

    assert_eq!(failure.stage, ExportStage::SyncWait);
    assert!(matches!(
        failure.error,
        ExportError::SyncTimeout { waited_ms: 90_000, .. }
    ));
    assert!(failure.to_string().contains("Fetching images"));
}

#[tokio::test(start_paused = true)]
async fn navigation_failure_closes_the_launched_browser() {
    let dir = tempdir().unwrap();
    let config = export_config(dir.path(), &["0:1"]);

    let mut session = MockBrowserSession::new();
    session.expect_goto().times(1).returning(|url| {
        Err(ExportError::Navigation {
            url: url.to_string(),
            reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
        })
    });
    session.expect_evaluate_bool().never();
    session.expect_close().times(1).returning(|| Ok(()));
    let launcher = launcher_for(session);

    let failure = export(&config, &launcher, &MockRenderApi::new(), &MockObjectStore::new())
        .await
        .expect_err("navigation failure must fail the run");

    assert_eq!(failure.stage, ExportStage::Init);
    assert!(matches!(failure.error, ExportError::Navigation { .. }));
}

#[tokio::test]
async fn missing_cookie_file_fails_before_launching_a_browser() {
    let dir = tempdir().unwrap();
    let mut config = export_config(dir.path(), &["0:1"]);
    config.session.cookies_path = dir.path().join("absent.json");

    let mut launcher = MockBrowserLauncher::new();
    launcher.expect_launch().never();

    let failure = export(&config, &launcher, &MockRenderApi::new(), &MockObjectStore::new())
        .await
        .expect_err("missing cookies must fail the run");
    assert!(matches!(failure.error, ExportError::Credentials { .. }));
}

#[tokio::test(start_paused = true)]
async fn failed_download_keeps_already_published_artifacts() {
    let dir = tempdir().unwrap();
    let config = export_config(dir.path(), &["1:2", "1:3"]);

    let launcher = launcher_for(syncing_page(0));

    let mut api = MockRenderApi::new();
    api.expect_file_version()
        .times(1)
        .returning(|_| Ok("v7".to_string()));
    api.expect_image_urls()
        .withf(|_, ids, version, _| ids.len() == 2 && version == "v7")
        .times(1)
        .returning(|_, _, _, _| {
            Ok(HashMap::from([
                ("1:3".to_string(), Some("https://renders.example/1-3".to_string())),
                ("1:2".to_string(), Some("https://renders.example/1-2".to_string())),
            ]))
        });
    api.expect_download().times(2).returning(|url| {
        if url.ends_with("1-2") {
            Ok(vec![1, 2, 3])
        } else {
            Err(ExportError::Download {
                url: url.to_string(),
                reason: "HTTP 500".to_string(),
            })
        }
    });

    let store = store_accepting(1);

    let failure = export(&config, &launcher, &api, &store)
        .await
        .expect_err("a failed download fails the whole run");

    assert!(matches!(failure.error, ExportError::Download { .. }));
    // Stages never move backwards: the run was already publishing.
    assert_eq!(failure.stage, ExportStage::Publishing);
    assert_eq!(failure.published.len(), 1, "1:2 was published before 1:3 failed");
    assert!(failure.published[0].file_name.starts_with("1_2_"));
    assert_fresh_url(&failure.published_urls()[0], "1_2_");
}

#[tokio::test(start_paused = true)]
async fn renders_are_published_in_requested_node_order() {
    let dir = tempdir().unwrap();
    let config = export_config(dir.path(), &["4:4", "1:2", "9:1"]);

    let launcher = launcher_for(syncing_page(1));

    let mut api = MockRenderApi::new();
    api.expect_file_version()
        .times(1)
        .returning(|_| Ok("v1".to_string()));
    api.expect_image_urls().times(1).returning(|_, ids, _, _| {
        Ok(ids
            .iter()
            .rev()
            .map(|id| (id.clone(), Some(format!("https://renders.example/{id}"))))
            .collect())
    });
    api.expect_download()
        .times(3)
        .returning(|url| Ok(url.as_bytes().to_vec()));

    let store = store_accepting(3);

    let report = export(&config, &launcher, &api, &store)
        .await
        .expect("export should succeed");

    let names: Vec<_> = report
        .artifacts
        .iter()
        .map(|a| a.file_name.split('_').take(2).collect::<Vec<_>>().join(":"))
        .collect();
    assert_eq!(names, vec!["4:4", "1:2", "9:1"]);

    let unique: HashSet<String> = report.urls().into_iter().collect();
    assert_eq!(unique.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn unrendered_node_is_a_remote_api_failure() {
    let dir = tempdir().unwrap();
    let config = export_config(dir.path(), &["1:2"]);
    let launcher = launcher_for(syncing_page(0));

    let mut api = MockRenderApi::new();
    api.expect_file_version().returning(|_| Ok("v1".to_string()));
    api.expect_image_urls()
        .returning(|_, _, _, _| Ok(HashMap::from([("1:2".to_string(), None)])));
    api.expect_download().never();

    let failure = export(&config, &launcher, &api, &MockObjectStore::new())
        .await
        .expect_err("a node without a render fails the run");
    assert_eq!(failure.stage, ExportStage::VersionFetched);
    assert!(matches!(failure.error, ExportError::RemoteApi { .. }));
}

#[tokio::test(start_paused = true)]
async fn first_download_failure_fails_in_rendering() {
    let dir = tempdir().unwrap();
    let config = export_config(dir.path(), &["1:2"]);
    let launcher = launcher_for(syncing_page(0));

    let mut api = MockRenderApi::new();
    api.expect_file_version().returning(|_| Ok("v1".to_string()));
    api.expect_image_urls().returning(|_, _, _, _| {
        Ok(HashMap::from([(
            "1:2".to_string(),
            Some("https://renders.example/1-2".to_string()),
        )]))
    });
    api.expect_download().times(1).returning(|url| {
        Err(ExportError::Download {
            url: url.to_string(),
            reason: "HTTP 403".to_string(),
        })
    });
    let mut store = MockObjectStore::new();
    store.expect_upload().never();

    let failure = export(&config, &launcher, &api, &store)
        .await
        .expect_err("download failure fails the run");
    assert_eq!(failure.stage, ExportStage::Rendering);
    assert!(failure.published.is_empty());
}
