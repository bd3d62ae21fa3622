//! Headless Chrome implementation of [`PortalPage`].

use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use super::{js_str, ClickOutcome, ClickTarget, PortalPage, ScrapeSession, SessionLauncher};
use crate::config::BrowserSettings;
use crate::error::PageError;

pub struct ChromePage {
    // Dropping the Browser kills the Chrome process, so it lives as long as the tab.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn launch(settings: &BrowserSettings) -> Result<Self, PageError> {
        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--window-position=0,0"),
        ];
        // New headless mode is only reachable through args; `headless` below stays false.
        if settings.headless {
            args.push(OsStr::new("--headless=new"));
        }

        let browser = Browser::new(LaunchOptions {
            headless: false,
            window_size: Some(settings.window_size),
            path: settings.chrome_path.clone(),
            idle_browser_timeout: Duration::from_secs(600),
            args,
            ..Default::default()
        })
        .map_err(|e| PageError::Launch(format!("{:#}", e)))?;

        let tab = browser.new_tab().map_err(|e| PageError::Launch(format!("{:#}", e)))?;
        tracing::info!("🌐 Chrome launched (headless: {})", settings.headless);

        Ok(Self { _browser: browser, tab })
    }

    fn eval_value(&self, script: &str) -> Result<serde_json::Value, PageError> {
        let remote = self
            .tab
            .evaluate(script, false)
            .map_err(|e| PageError::Script(format!("{:#}", e)))?;
        Ok(remote.value.unwrap_or(serde_json::Value::Null))
    }

    fn eval_string(&self, script: &str) -> Result<String, PageError> {
        match self.eval_value(script)? {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

impl PortalPage for ChromePage {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<(), PageError> {
        self.tab.set_default_timeout(timeout);
        self.tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(|e| PageError::Navigation { url: url.to_string(), reason: format!("{:#}", e) })?;
        Ok(())
    }

    fn current_url(&self) -> String {
        self.tab.get_url()
    }

    fn content(&self) -> Result<String, PageError> {
        Ok(self.tab.get_content()?)
    }

    fn body_text(&self) -> Result<String, PageError> {
        self.eval_string("document.body ? document.body.innerText : ''")
    }

    fn navigation_id(&self) -> Result<String, PageError> {
        // timeOrigin is fixed per committed document.
        self.eval_string("String(performance.timeOrigin)")
    }

    fn evaluate(&self, script: &str) -> Result<serde_json::Value, PageError> {
        self.eval_value(script)
    }

    fn force_click(&self, target: &ClickTarget) -> Result<ClickOutcome, PageError> {
        let before = self.navigation_id()?;
        match self.eval_value(&target.to_script()) {
            Ok(serde_json::Value::Bool(true)) => Ok(ClickOutcome::Clicked),
            Ok(_) => Ok(ClickOutcome::NotFound),
            Err(err) => {
                // The context may be gone because the click navigated away.
                std::thread::sleep(Duration::from_millis(300));
                match self.navigation_id() {
                    Ok(after) if after != before => Ok(ClickOutcome::NavigationStarted),
                    // Still between documents; the caller's poll decides.
                    Err(_) => Ok(ClickOutcome::NavigationStarted),
                    Ok(_) => Err(err),
                }
            }
        }
    }

    fn set_value(&self, selector: &str, value: &str) -> Result<bool, PageError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.removeAttribute('readonly');
                el.value = {val};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                el.dispatchEvent(new Event('blur', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_str(selector),
            val = js_str(value)
        );
        Ok(matches!(self.eval_value(&script)?, serde_json::Value::Bool(true)))
    }

    fn row_cells(&self, row_selector: &str, index: usize) -> Result<Vec<String>, PageError> {
        // Objects don't come back by value; ship the cells as a JSON string.
        let script = format!(
            r#"(() => {{
                const row = document.querySelectorAll({sel})[{idx}];
                if (!row) return '[]';
                return JSON.stringify(Array.from(row.querySelectorAll(':scope > td'))
                    .map(td => (td.innerText || '').trim()));
            }})()"#,
            sel = js_str(row_selector),
            idx = index
        );
        let raw = self.eval_string(&script)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|e| PageError::Script(format!("row cells: {}", e)))
    }

    fn close(&self) {
        if let Err(e) = self.tab.close(true) {
            tracing::debug!("Tab close failed (browser exiting anyway): {}", e);
        }
    }
}

/// Launches one Chrome instance per session.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    pub settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

impl SessionLauncher for ChromeLauncher {
    fn launch(&self) -> Result<ScrapeSession, PageError> {
        let page = ChromePage::launch(&self.settings)?;
        Ok(ScrapeSession::new(Box::new(page)))
    }
}
