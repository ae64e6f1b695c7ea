//! Page surface backed by headless Chromium through chromiumoxide.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::surface::{DomOp, PageSurface, SurfaceFactory};
use super::AutomationConfig;
use crate::error::{ErrorKind, FailureCode, ProviderError};

/// Locate a Chromium binary: explicit path, `TRANSCRIPTOR_CHROMIUM_PATH`, then PATH
pub fn find_chromium(configured: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Some(path.clone());
        }
    }

    if let Ok(p) = std::env::var("TRANSCRIPTOR_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

fn surface_error(message: impl Into<String>) -> ProviderError {
    ProviderError::new(ErrorKind::Transport, message).with_code(FailureCode::SurfaceUnavailable)
}

/// Launches Chromium on first use and hands out one page per session.
///
/// A browser that can no longer open pages is dropped and launched again.
pub struct ChromiumSurfaceFactory {
    config: AutomationConfig,
    browser: Mutex<Option<Browser>>,
}

impl ChromiumSurfaceFactory {
    pub fn new(config: AutomationConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
        }
    }

    async fn launch(&self) -> Result<Browser, ProviderError> {
        let chrome_path = find_chromium(self.config.chromium_path.as_ref())
            .ok_or_else(|| surface_error("Chromium not found; set automation.chromium_path or TRANSCRIPTOR_CHROMIUM_PATH"))?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path.clone())
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if !self.config.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| surface_error(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| surface_error(format!("failed to launch Chromium: {e}")))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "cdp_handler_error");
                }
            }
        });

        info!(path = %chrome_path.display(), headless = self.config.headless, "chromium_launched");
        Ok(browser)
    }
}

#[async_trait]
impl SurfaceFactory for ChromiumSurfaceFactory {
    async fn open(&self) -> Result<Box<dyn PageSurface>, ProviderError> {
        let mut slot = self.browser.lock().await;

        if let Some(browser) = slot.as_ref() {
            match browser.new_page("about:blank").await {
                Ok(page) => return Ok(Box::new(ChromiumSurface { page })),
                Err(e) => {
                    warn!(error = %e, "chromium_unresponsive");
                    if let Some(mut stale) = slot.take() {
                        let _ = stale.kill().await;
                    }
                }
            }
        }

        let browser = slot.insert(self.launch().await?);
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| surface_error(format!("failed to open page: {e}")))?;
        Ok(Box::new(ChromiumSurface { page }))
    }
}

/// One Chromium tab
pub struct ChromiumSurface {
    page: Page,
}

#[async_trait]
impl PageSurface for ChromiumSurface {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), ProviderError> {
        let load = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProviderError::new(ErrorKind::Transport, format!("navigation failed: {e}"))),
            Err(_) => Err(ProviderError::new(
                ErrorKind::Transport,
                format!("page did not load within {}ms", timeout.as_millis()),
            )
            .with_code(FailureCode::PageLoadTimeout)),
        }
    }

    async fn run(&mut self, op: &DomOp) -> Result<Value, ProviderError> {
        let result = self
            .page
            .evaluate(op.script())
            .await
            .map_err(|e| ProviderError::new(ErrorKind::Unknown, format!("{} script failed: {e}", op.name())))?;
        // `undefined` comes back without a value
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn close(self: Box<Self>) {
        let _ = self.page.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_path_must_exist() {
        let missing = PathBuf::from("/definitely/not/a/chrome");
        let found = find_chromium(Some(&missing));
        assert_ne!(found, Some(missing));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_dead_browser_is_relaunched() {
        let factory = ChromiumSurfaceFactory::new(AutomationConfig::default());
        factory.open().await.expect("failed to open surface").close().await;

        if let Some(browser) = factory.browser.lock().await.as_mut() {
            let _ = browser.kill().await;
        }

        let mut surface = factory.open().await.expect("factory should relaunch Chromium");
        surface
            .navigate("data:text/html,<p>relaunched</p>", Duration::from_secs(10))
            .await
            .expect("navigation failed");
        surface.close().await;
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_runs_page_text() {
        let factory = ChromiumSurfaceFactory::new(AutomationConfig::default());
        let mut surface = factory.open().await.expect("failed to open surface");
        surface
            .navigate("data:text/html,<p>Subtitles Not Available</p>", Duration::from_secs(10))
            .await
            .expect("navigation failed");
        let text = surface.run(&DomOp::PageText).await.expect("script failed");
        assert_eq!(text.as_str(), Some("Subtitles Not Available"));
        surface.close().await;
    }
}
