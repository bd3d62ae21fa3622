//! Tyler EnerGov self-service (Angular SPA). Everything after the initial load
//! happens client-side under `#/search`, so results refresh in place.

use async_trait::async_trait;
use tokio::time::sleep;

use super::{apply_filters, first_present, FamilyProfile, Pager, PortalAdapter};
use crate::browser::{ClickOutcome, ClickTarget, PortalPage};
use crate::config::{PortalFamily, ScrapeConfig};
use crate::error::{EngineError, EngineResult};
use crate::extract::{ColumnMap, SelectorSet};

pub static PROFILE: FamilyProfile = FamilyProfile {
    family: PortalFamily::Energov,
    selectors: SelectorSet {
        row: "div.search-results-list div.row, #entityRecordDiv div.search-result",
        permit_id: &["a[name='label-SearchResult-PermitNumber']", "span[id^='entityRecordNumber']"],
        permit_type: &["span[name='label-SearchResult-Type']", "span[id^='entityRecordType']"],
        address: &["span[name='label-SearchResult-Address']", "span[id^='entityRecordAddress']"],
        status: &["span[name='label-SearchResult-Status']", "span[id^='entityRecordStatus']"],
        applicant: &["span[name='label-SearchResult-Applicant']"],
        detail_link: &["a[name='label-SearchResult-PermitNumber']", "a[id^='entityRecordNumber']"],
        columns: ColumnMap { permit_id: 0, permit_type: 1, address: Some(2), status: Some(3) },
    },
    results_container: &["div.search-results-list", "#entityRecordDiv"],
    no_records_markers: &["no results found", "0 results", "there are no results"],
    error_markers: &["an error has occurred while processing your request"],
    pager: Pager {
        next_selectors: &["#link-NextPage", "a[aria-label='Next page']"],
        link_scope: "ul.pagination li a",
        next_texts: &["Next", "›", "»"],
    },
    detail_patterns: &["#/permit/", "#/plan/"],
    date_format: "%m/%d/%Y",
};

const MODULE_SELECT: &str = "#SearchModule";
const DATE_FROM: &str = "#IssueDateFrom";
const DATE_TO: &str = "#IssueDateTo";
const PERMIT_TYPE: &str = "#PermitCriteria_PermitTypeId";
const SEARCH_BUTTONS: &[&str] = &["#button-Search", "button[name='button-Search']"];

pub struct EnergovAdapter {
    config: ScrapeConfig,
}

impl EnergovAdapter {
    pub fn new(config: ScrapeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PortalAdapter for EnergovAdapter {
    fn profile(&self) -> &FamilyProfile {
        &PROFILE
    }

    fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    fn search_url(&self) -> String {
        format!("{}/#/search", self.config.base_url.trim_end_matches('/'))
    }

    async fn fill_filters(&self, page: &dyn PortalPage) -> EngineResult<()> {
        if !page.set_value(MODULE_SELECT, &self.config.module)? {
            return Err(EngineError::MissingControl(MODULE_SELECT.to_string()));
        }
        // The criteria panel re-renders after the module changes.
        sleep(self.config.settle()).await;
        apply_filters(page, &self.config, &PROFILE, DATE_FROM, DATE_TO, PERMIT_TYPE)
    }

    async fn submit_search(&self, page: &dyn PortalPage) -> EngineResult<()> {
        let button = first_present(page, SEARCH_BUTTONS)?
            .ok_or_else(|| EngineError::MissingControl(SEARCH_BUTTONS.join(", ")))?;
        if page.force_click(&ClickTarget::Css(button.to_string()))? == ClickOutcome::NotFound {
            return Err(EngineError::MissingControl(button.to_string()));
        }
        sleep(self.config.settle()).await;
        Ok(())
    }
}
