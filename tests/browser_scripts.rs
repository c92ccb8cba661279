//! Runs the session scripts in a real headless Chromium.
//!
//! Needs a Chromium binary (found on PATH or via `CHROME_PATH`), so these are
//! ignored by default: `cargo test --test browser_scripts -- --ignored`.

use std::path::PathBuf;
use std::time::Duration;

use figma_sync::browser::ChromiumLauncher;
use figma_sync::load_config::BrowserSettings;
use figma_sync_core::contract::{BrowserLauncher, BrowserSession};
use figma_sync_core::session::{busy_indicator_script, control_click_script};

const SELECTOR: &str = "div.panel div";
const CONTROL_TEXT: &str = "Re-sync Google Sheets Data";
const BUSY_TEXT: &str = "Fetching images";

const PAGE: &str = r#"<!doctype html>
<html><head><meta charset="utf-8"></head><body>
<div class="panel">
  <div onclick="window.clicked = (window.clicked || []).concat('beta')">Re-sync Google Sheets Data (beta)</div>
  <div onclick="window.clicked = (window.clicked || []).concat('short')">Re-sync Google</div>
  <div onclick="window.clicked = (window.clicked || []).concat('exact')">  Re-sync Google Sheets Data  </div>
</div>
<div id="busy" style="display:none">Fetching images… 3 of 7</div>
</body></html>"#;

fn data_url(html: &str) -> String {
    let mut url = String::from("data:text/html;charset=utf-8,");
    for byte in html.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.~".contains(&byte) {
            url.push(byte as char);
        } else {
            url.push_str(&format!("%{byte:02X}"));
        }
    }
    url
}

async fn open_page() -> Box<dyn BrowserSession> {
    let settings = BrowserSettings {
        executable: std::env::var("CHROME_PATH").ok().map(PathBuf::from),
        headless: true,
    };
    let launcher = ChromiumLauncher::new(&settings, Duration::from_secs(60));
    let page = launcher.launch(vec![]).await.expect("chromium should launch");
    tokio::time::timeout(Duration::from_secs(60), page.goto(&data_url(PAGE)))
        .await
        .expect("page should load in time")
        .expect("navigation should succeed");
    page
}

#[tokio::test]
#[ignore = "requires a Chromium binary"]
async fn control_script_clicks_only_the_exact_label() {
    let page = open_page().await;

    let clicked = page
        .evaluate_bool(&control_click_script(SELECTOR, CONTROL_TEXT))
        .await
        .expect("script runs");
    assert!(clicked, "the exact label is present");

    let only_exact = page
        .evaluate_bool("JSON.stringify(window.clicked) === '[\"exact\"]'")
        .await
        .unwrap();
    assert!(only_exact, "superstring and substring labels must not be clicked");

    let missing = page
        .evaluate_bool(&control_click_script(SELECTOR, "Re-sync"))
        .await
        .unwrap();
    assert!(!missing, "a prefix of a label is not a match");

    page.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a Chromium binary"]
async fn hidden_busy_indicator_does_not_block_completion() {
    let page = open_page().await;
    let script = busy_indicator_script(BUSY_TEXT);

    let busy = page.evaluate_bool(&script).await.expect("script runs");
    assert!(!busy, "an element without a layout parent is not visible");

    page.evaluate_bool("(() => { document.getElementById('busy').style.display = 'block'; return true; })()")
        .await
        .unwrap();
    let busy = page.evaluate_bool(&script).await.unwrap();
    assert!(busy, "a visible element containing the busy text blocks completion");

    page.close().await.unwrap();
    // A second close is a no-op.
    page.close().await.unwrap();
}
