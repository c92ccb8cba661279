//! Chromium over CDP (`chromiumoxide`) implementing the browser contracts.
//!
//! [`ChromiumLauncher`] starts a headless browser, spawns the CDP handler
//! task, opens a blank page and installs the session cookies on it before any
//! navigation. [`ChromiumSession::close`] shuts the browser down and joins the
//! handler task; it is safe to call more than once.
//!
//! `Page::goto` gives up after a fixed 30s inside chromiumoxide, shorter
//! than the configured navigation budget. [`ChromiumSession::goto`] issues
//! `Page.navigate` itself and polls the document's ready state instead, so
//! the caller's timeout is the only deadline.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::Page;
use figma_sync_core::contract::{BrowserLauncher, BrowserSession, SameSite, SessionCookie};
use figma_sync_core::ExportError;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::load_config::BrowserSettings;

const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// True once a navigation away from the initial blank page has fully loaded.
const DOCUMENT_LOADED_SCRIPT: &str =
    "document.readyState === 'complete' && location.href !== 'about:blank'";

pub struct ChromiumLauncher {
    executable: Option<PathBuf>,
    headless: bool,
    request_timeout: Duration,
}

impl ChromiumLauncher {
    /// `request_timeout` bounds single CDP commands; it should be at least
    /// the navigation budget.
    pub fn new(settings: &BrowserSettings, request_timeout: Duration) -> Self {
        Self {
            executable: settings.executable.clone(),
            headless: settings.headless,
            request_timeout,
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, ExportError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .request_timeout(self.request_timeout);
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(ExportError::BrowserLaunch)
    }
}

/// Maps a persisted cookie to a CDP cookie. Cookies without a domain cannot
/// be installed before navigation and are skipped.
fn cookie_param(cookie: &SessionCookie) -> Option<CookieParam> {
    let domain = cookie.domain.clone()?;
    let mut param = CookieParam::new(cookie.name.clone(), cookie.value.clone());
    param.domain = Some(domain);
    param.path = cookie.path.clone();
    param.secure = cookie.secure;
    param.http_only = cookie.http_only;
    param.same_site = cookie.same_site.map(|s| match s {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    });
    // Non-positive expiry marks a session cookie.
    param.expires = cookie
        .expires
        .filter(|e| *e > 0.0)
        .map(TimeSinceEpoch::new);
    Some(param)
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(
        &self,
        cookies: Vec<SessionCookie>,
    ) -> Result<Box<dyn BrowserSession>, ExportError> {
        let config = self.browser_config()?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ExportError::BrowserLaunch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "[BROWSER] CDP handler event error");
                }
            }
        });

        let params: Vec<CookieParam> = cookies.iter().filter_map(cookie_param).collect();
        if params.len() < cookies.len() {
            warn!(
                skipped = cookies.len() - params.len(),
                "[BROWSER] Skipping cookies without a domain"
            );
        }

        let page = match open_page(&browser, params).await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    warn!(error = %close_err, "[BROWSER] Close after failed setup failed");
                }
                let _ = browser.wait().await;
                handler_task.abort();
                return Err(e);
            }
        };

        info!(cookies = cookies.len(), headless = self.headless, "[BROWSER] Browser launched");
        Ok(Box::new(ChromiumSession {
            page,
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler_task)),
        }))
    }
}

async fn open_page(browser: &Browser, cookies: Vec<CookieParam>) -> Result<Page, ExportError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| ExportError::BrowserLaunch(format!("failed to open page: {e}")))?;
    if !cookies.is_empty() {
        page.set_cookies(cookies)
            .await
            .map_err(|e| ExportError::BrowserLaunch(format!("failed to install cookies: {e}")))?;
    }
    Ok(page)
}

pub struct ChromiumSession {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    /// Navigates and waits for the load to complete with no deadline of its
    /// own; the caller bounds it.
    async fn goto(&self, url: &str) -> Result<(), ExportError> {
        let failed = |reason: String| ExportError::Navigation {
            url: url.to_string(),
            reason,
        };
        let navigation = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .map_err(|e| failed(e.to_string()))?;
        if let Some(error_text) = navigation.result.error_text.clone() {
            return Err(failed(error_text));
        }

        loop {
            match self.evaluate_bool(DOCUMENT_LOADED_SCRIPT).await {
                Ok(true) => break,
                Ok(false) => {}
                // The execution context is replaced while the new document commits.
                Err(e) => debug!(url, error = %e, "[BROWSER] Ready-state check failed, retrying"),
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
        debug!(url, "[BROWSER] Navigation finished");
        Ok(())
    }

    async fn evaluate_bool(&self, script: &str) -> Result<bool, ExportError> {
        self.page
            .evaluate(script.to_string())
            .await
            .map_err(|e| ExportError::Script(e.to_string()))?
            .into_value::<bool>()
            .map_err(|e| ExportError::Script(format!("script did not return a boolean: {e}")))
    }

    async fn close(&self) -> Result<(), ExportError> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        let closed = browser.close().await;
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "[BROWSER] Waiting for the browser process failed");
        }
        if let Some(task) = self.handler.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "[BROWSER] CDP handler task ended abnormally");
            }
        }
        closed
            .map(|_| ())
            .map_err(|e| ExportError::BrowserClose(e.to_string()))
    }
}
