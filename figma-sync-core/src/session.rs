//! Browser-side protocols: open an authenticated page, click the resync
//! control, wait for the busy indicator to go away.
//!
//! The page offers no completion events, so both protocols poll a script on a
//! fixed interval until their condition holds or their budget runs out. The
//! two scripts built here are the only code that knows anything about the
//! document's DOM:
//! - the control is matched on its *exact* trimmed text, so a similarly
//!   labelled control is never clicked;
//! - the busy indicator is matched as a *substring* of any visible element
//!   (one with a layout parent), since its text carries variable suffixes.

use std::path::Path;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::contract::{BrowserLauncher, BrowserSession, SessionCookie};
use crate::error::ExportError;

/// Reads the persisted cookie jar (a JSON array of cookie records).
pub async fn load_session_cookies(path: &Path) -> Result<Vec<SessionCookie>, ExportError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        error!(error = ?e, path = %path.display(), "[SESSION] Failed to read cookie file");
        ExportError::Credentials {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;
    let cookies: Vec<SessionCookie> = serde_json::from_str(&raw).map_err(|e| {
        error!(error = ?e, path = %path.display(), "[SESSION] Cookie file is not a JSON cookie array");
        ExportError::Credentials {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;
    info!(count = cookies.len(), path = %path.display(), "[SESSION] Loaded session cookies");
    Ok(cookies)
}

/// An open page on the target document. Must be released with
/// [`SessionHandle::close`] on every exit path.
pub struct SessionHandle {
    page: Box<dyn BrowserSession>,
    url: String,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("url", &self.url).finish()
    }
}

/// Launches a browser with `cookies` installed and navigates to `url`.
///
/// Fails with [`ExportError::Navigation`] if the page does not finish loading
/// within `navigation_timeout`; the browser is closed before returning.
pub async fn open_authenticated_session<L>(
    launcher: &L,
    url: &str,
    cookies: Vec<SessionCookie>,
    navigation_timeout: Duration,
) -> Result<SessionHandle, ExportError>
where
    L: BrowserLauncher + ?Sized,
{
    info!(url, "[SESSION] Launching browser");
    let page = launcher.launch(cookies).await?;

    let outcome = match timeout(navigation_timeout, page.goto(url)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(ExportError::Navigation { url, reason })) => {
            Err(ExportError::Navigation { url, reason })
        }
        Ok(Err(e)) => Err(ExportError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ExportError::Navigation {
            url: url.to_string(),
            reason: format!(
                "page did not load within {}ms",
                navigation_timeout.as_millis()
            ),
        }),
    };

    match outcome {
        Ok(()) => {
            info!(url, "[SESSION] Document loaded");
            Ok(SessionHandle {
                page,
                url: url.to_string(),
            })
        }
        Err(e) => {
            error!(error = %e, "[SESSION] Navigation failed, closing browser");
            if let Err(close_err) = page.close().await {
                warn!(error = %close_err, "[SESSION] Browser close after failed navigation also failed");
            }
            Err(e)
        }
    }
}

impl SessionHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Polls until an element under `selector` whose trimmed text equals
    /// `text` has been clicked. Fails with [`ExportError::ControlNotFound`]
    /// once `max_wait` has elapsed without a click.
    pub async fn activate_control(
        &self,
        selector: &str,
        text: &str,
        max_wait: Duration,
        poll_interval: Duration,
    ) -> Result<(), ExportError> {
        let script = control_click_script(selector, text);
        let started = Instant::now();
        let mut attempts = 0u32;

        while started.elapsed() < max_wait {
            attempts += 1;
            if self.page.evaluate_bool(&script).await? {
                info!(
                    text,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[SESSION] Control clicked"
                );
                return Ok(());
            }
            debug!(text, attempts, "[SESSION] Control not present yet");
            sleep(poll_interval).await;
        }

        error!(text, attempts, "[SESSION] Control never appeared");
        Err(ExportError::ControlNotFound {
            text: text.to_string(),
            waited_ms: max_wait.as_millis() as u64,
        })
    }

    /// Polls until no visible element contains `busy_text`. Fails with
    /// [`ExportError::SyncTimeout`] if the indicator is still there after
    /// `sync_timeout`.
    pub async fn await_completion(
        &self,
        busy_text: &str,
        sync_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), ExportError> {
        let script = busy_indicator_script(busy_text);
        let started = Instant::now();
        let mut attempts = 0u32;

        while started.elapsed() < sync_timeout {
            attempts += 1;
            if !self.page.evaluate_bool(&script).await? {
                info!(
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[SESSION] Busy indicator gone"
                );
                return Ok(());
            }
            debug!(busy_text, attempts, "[SESSION] Sync still running");
            sleep(poll_interval).await;
        }

        error!(busy_text, attempts, "[SESSION] Sync did not finish in time");
        Err(ExportError::SyncTimeout {
            busy_text: busy_text.to_string(),
            waited_ms: sync_timeout.as_millis() as u64,
        })
    }

    /// Releases the page and its browser.
    pub async fn close(self) -> Result<(), ExportError> {
        info!(url = %self.url, "[SESSION] Closing browser");
        self.page.close().await
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Clicks the first element under `selector` whose trimmed text is exactly
/// `text`; evaluates to whether a click happened.
pub fn control_click_script(selector: &str, text: &str) -> String {
    format!(
        r#"(() => {{
  const target = {text};
  for (const el of document.querySelectorAll({selector})) {{
    if ((el.textContent || '').trim() === target) {{
      el.click();
      return true;
    }}
  }}
  return false;
}})()"#,
        text = js_string(text),
        selector = js_string(selector),
    )
}

/// Evaluates to whether any visible element's text contains `busy_text`.
/// Elements without a layout parent (hidden) are ignored.
pub fn busy_indicator_script(busy_text: &str) -> String {
    format!(
        r#"(() => {{
  const needle = {needle};
  return Array.from(document.querySelectorAll('body *'))
    .filter(el => el.offsetParent !== null)
    .some(el => (el.textContent || '').includes(needle));
}})()"#,
        needle = js_string(busy_text),
    )
}
