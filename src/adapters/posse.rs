//! Computronix POSSE. The search button starts out `disabled` until client
//! validation has run, and every row link is a `__doPostBack` anchor, so
//! applicants only come from detail pages reached via postback.

use async_trait::async_trait;
use tokio::time::sleep;

use super::{apply_filters, FamilyProfile, Pager, PortalAdapter};
use crate::browser::{js_str, ClickOutcome, ClickTarget, PortalPage};
use crate::config::{PortalFamily, ScrapeConfig};
use crate::error::{EngineError, EngineResult};
use crate::extract::{ColumnMap, SelectorSet};

pub static PROFILE: FamilyProfile = FamilyProfile {
    family: PortalFamily::Posse,
    selectors: SelectorSet {
        row: "table.possegrid tr",
        permit_id: &["td:first-child a", "span[id^='PermitNumber']"],
        permit_type: &["span[id^='PermitType']"],
        address: &["span[id^='Address']"],
        status: &["span[id^='Status']"],
        applicant: &["span[id^='Applicant']"],
        detail_link: &["td:first-child a", "a[href*='__doPostBack']"],
        columns: ColumnMap { permit_id: 0, permit_type: 1, address: Some(2), status: Some(3) },
    },
    results_container: &["table.possegrid"],
    no_records_markers: &["no records found", "no matching records", "your search returned no results"],
    error_markers: &["posse error", "an error occurred while processing"],
    pager: Pager {
        next_selectors: &["a[id^='NextPage']"],
        link_scope: "span.possegridpager a, tr.possegridpager a",
        next_texts: &["Next", ">"],
    },
    detail_patterns: &["PosseObjectId="],
    date_format: "%b %d, %Y",
};

const DATE_FROM: &str = "input[id^='IssueDateFrom']";
const DATE_TO: &str = "input[id^='IssueDateTo']";
const PERMIT_TYPE: &str = "select[id^='PermitType']";
const SEARCH_BUTTON: &str = "input[id^='PerformSearch']";

pub struct PosseAdapter {
    config: ScrapeConfig,
}

impl PosseAdapter {
    pub fn new(config: ScrapeConfig) -> Self {
        Self { config }
    }
}

fn enable_script() -> String {
    format!(
        r#"(() => {{
            const btn = document.querySelector({sel});
            if (!btn) return false;
            btn.removeAttribute('disabled');
            btn.disabled = false;
            return true;
        }})()"#,
        sel = js_str(SEARCH_BUTTON)
    )
}

#[async_trait]
impl PortalAdapter for PosseAdapter {
    fn profile(&self) -> &FamilyProfile {
        &PROFILE
    }

    fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    fn search_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.contains("PossePresentation") {
            base.to_string()
        } else {
            format!("{}/Default.aspx?PossePresentation=PermitSearch", base)
        }
    }

    async fn fill_filters(&self, page: &dyn PortalPage) -> EngineResult<()> {
        apply_filters(page, &self.config, &PROFILE, DATE_FROM, DATE_TO, PERMIT_TYPE)
    }

    async fn submit_search(&self, page: &dyn PortalPage) -> EngineResult<()> {
        page.evaluate(&enable_script())?;
        match page.force_click(&ClickTarget::Css(SEARCH_BUTTON.to_string()))? {
            ClickOutcome::NotFound => return Err(EngineError::MissingControl(SEARCH_BUTTON.to_string())),
            outcome => tracing::debug!("POSSE search submitted: {:?}", outcome),
        }
        sleep(self.config.settle()).await;
        Ok(())
    }
}
