use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::prelude::IndexedRandom;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(45);
const SETTLE_DELAY: Duration = Duration::from_millis(2000);

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1280, 720), (1440, 900)];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

/// Shim evaluated on every rendered page before scraping it.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = window.chrome || { runtime: {} };
"#;

struct BrowserHandle {
    browser: Browser,
    event_task: JoinHandle<()>,
}

/// One shared headless browser per process; a fresh page per fetch, closed
/// on every exit path. Optional: when disabled or launch fails, callers
/// skip browser-dependent strategies.
pub struct BrowserPool {
    enabled: bool,
    handle: Mutex<Option<BrowserHandle>>,
}

impl BrowserPool {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            handle: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn new_page(&self, url: &str) -> Result<Page> {
        if !self.enabled {
            return Err(anyhow!("browser rendering is disabled"));
        }

        let mut guard = self.handle.lock().await;
        if guard.is_none() {
            let &(width, height) = VIEWPORTS.choose(&mut rand::rng()).expect("non-empty viewports");
            let user_agent = USER_AGENTS.choose(&mut rand::rng()).expect("non-empty agents");
            let config = BrowserConfig::builder()
                .window_size(width, height)
                .args(vec![
                    "--no-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-blink-features=AutomationControlled",
                    "--disable-extensions",
                    "--no-first-run",
                    "--hide-scrollbars",
                    "--mute-audio",
                ])
                .arg(format!("--user-agent={user_agent}"))
                .build()
                .map_err(|e| anyhow!("building browser config: {e}"))?;

            let (browser, mut handler) = Browser::launch(config).await.context("launching headless browser")?;
            let event_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });
            info!(width, height, "headless browser launched");
            *guard = Some(BrowserHandle { browser, event_task });
        }

        let handle = guard.as_ref().expect("browser just ensured");
        let page = handle.browser.new_page("about:blank").await.context("opening page")?;
        drop(guard);
        Ok(page)
    }

    /// Navigate, wait for the network to settle, and return the rendered HTML.
    pub async fn render(&self, url: &str) -> Result<String> {
        let page = self.new_page(url).await?;
        let result = render_on_page(&page, url, false).await;
        close_page(page).await;
        result
    }

    /// Like `render`, but scrolls to force lazy message widgets to load:
    /// to the bottom, back to the top, then a few up-and-back cycles.
    pub async fn render_scrolled(&self, url: &str) -> Result<String> {
        let page = self.new_page(url).await?;
        let result = render_on_page(&page, url, true).await;
        close_page(page).await;
        result
    }

    pub async fn shutdown(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(mut handle) = guard.take() {
            if let Err(e) = handle.browser.close().await {
                warn!(error = %e, "browser close failed");
            }
            handle.event_task.abort();
            debug!("headless browser stopped");
        }
    }
}

async fn render_on_page(page: &Page, url: &str, scroll: bool) -> Result<String> {
    tokio::time::timeout(NAVIGATION_TIMEOUT, async {
        page.goto(url).await.context("navigating")?;
        page.wait_for_navigation().await.context("waiting for navigation")?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow!("navigation timed out for {url}"))??;

    let _ = page.evaluate(STEALTH_SCRIPT).await;
    tokio::time::sleep(SETTLE_DELAY).await;

    if scroll {
        let _ = page.evaluate("window.scrollTo(0, document.body.scrollHeight)").await;
        tokio::time::sleep(Duration::from_millis(800)).await;
        let _ = page.evaluate("window.scrollTo(0, 0)").await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        for _ in 0..3 {
            let _ = page.evaluate("window.scrollBy(0, -600)").await;
            tokio::time::sleep(Duration::from_millis(250)).await;
            let _ = page.evaluate("window.scrollBy(0, 600)").await;
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    page.content().await.context("reading rendered content")
}

async fn close_page(page: Page) {
    if let Err(e) = page.close().await {
        debug!(error = %e, "page close failed");
    }
}
