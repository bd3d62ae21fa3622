//! ViewPoint Cloud (OpenGov) record search. The search form is submitted
//! through `requestSubmit()` so the page's own submit handlers run.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

use super::{apply_filters, FamilyProfile, Pager, PortalAdapter};
use crate::browser::{js_str, PortalPage};
use crate::config::{PortalFamily, ScrapeConfig};
use crate::error::{EngineError, EngineResult};
use crate::extract::{ColumnMap, SelectorSet};

pub static PROFILE: FamilyProfile = FamilyProfile {
    family: PortalFamily::Viewpoint,
    selectors: SelectorSet {
        row: "table.records-table tbody tr",
        permit_id: &["td.record-number a", "td.record-number"],
        permit_type: &["td.record-type"],
        address: &["td.record-address"],
        status: &["td.record-status"],
        applicant: &["td.record-applicant"],
        detail_link: &["td.record-number a"],
        columns: ColumnMap { permit_id: 0, permit_type: 1, address: Some(2), status: Some(3) },
    },
    results_container: &["table.records-table", "div.search-results"],
    no_records_markers: &["no records match", "no results", "0 records"],
    error_markers: &["something went wrong"],
    pager: Pager {
        next_selectors: &["a[rel='next']", "button.pagination-next"],
        link_scope: "nav.pagination a",
        next_texts: &["Next"],
    },
    detail_patterns: &["/records/"],
    date_format: "%Y-%m-%d",
};

const SEARCH_FORM: &str = "form#record-search, form.search-form";
const DATE_FROM: &str = "input[name='dateFrom']";
const DATE_TO: &str = "input[name='dateTo']";
const RECORD_TYPE: &str = "select[name='recordType']";

pub struct ViewpointAdapter {
    config: ScrapeConfig,
}

impl ViewpointAdapter {
    pub fn new(config: ScrapeConfig) -> Self {
        Self { config }
    }
}

fn submit_script() -> String {
    format!(
        r#"(() => {{
            const form = document.querySelector({form});
            if (!form) return false;
            if (form.requestSubmit) {{ form.requestSubmit(); }} else {{ form.submit(); }}
            return true;
        }})()"#,
        form = js_str(SEARCH_FORM)
    )
}

#[async_trait]
impl PortalAdapter for ViewpointAdapter {
    fn profile(&self) -> &FamilyProfile {
        &PROFILE
    }

    fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    fn search_url(&self) -> String {
        format!("{}/search?category={}", self.config.base_url.trim_end_matches('/'), self.config.module)
    }

    async fn fill_filters(&self, page: &dyn PortalPage) -> EngineResult<()> {
        apply_filters(page, &self.config, &PROFILE, DATE_FROM, DATE_TO, RECORD_TYPE)
    }

    async fn submit_search(&self, page: &dyn PortalPage) -> EngineResult<()> {
        let before = page.navigation_id()?;
        match page.evaluate(&submit_script()) {
            Ok(serde_json::Value::Bool(false)) => {
                return Err(EngineError::MissingControl(SEARCH_FORM.to_string()));
            }
            Ok(_) => {}
            Err(err) => {
                // A submit that navigates tears the context down before a value comes back.
                sleep(Duration::from_millis(300)).await;
                match page.navigation_id() {
                    Ok(after) if after == before => return Err(err.into()),
                    _ => tracing::debug!("🔎 Search submit replaced the document"),
                }
            }
        }
        sleep(self.config.settle()).await;
        Ok(())
    }
}
