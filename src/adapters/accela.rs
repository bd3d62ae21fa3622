//! Accela Citizen Access (ASP.NET WebForms). Searches are postbacks on
//! `CapHome.aspx`; detail links are mostly real URLs, but some agencies render
//! them as `__doPostBack` anchors.

use async_trait::async_trait;
use tokio::time::sleep;

use super::{apply_filters, FamilyProfile, Pager, PortalAdapter};
use crate::browser::{ClickOutcome, ClickTarget, PortalPage};
use crate::config::{PortalFamily, ScrapeConfig};
use crate::error::{EngineError, EngineResult};
use crate::extract::{ColumnMap, SelectorSet};

pub static PROFILE: FamilyProfile = FamilyProfile {
    family: PortalFamily::Accela,
    selectors: SelectorSet {
        row: "table[id$='gdvPermitList'] tr",
        permit_id: &["span[id$='lblPermitNumber']", "a[id$='hlPermitNumber']", "td:nth-child(2) a"],
        permit_type: &["span[id$='lblType']", "span[id$='lblRecordType']"],
        address: &["span[id$='lblAddress']"],
        status: &["span[id$='lblStatus']"],
        applicant: &["span[id$='lblApplicant']", "span[id$='lblLicensedProfessional']"],
        detail_link: &["a[id$='hlPermitNumber']", "td:nth-child(2) a"],
        columns: ColumnMap { permit_id: 1, permit_type: 2, address: Some(3), status: Some(5) },
    },
    results_container: &["table[id$='gdvPermitList']", "div[id$='dvSearchList']"],
    no_records_markers: &["no records found", "returned no results", "your search returned no results"],
    error_markers: &["we are experiencing technical difficulties"],
    pager: Pager {
        next_selectors: &["a[id$='lnkNext']"],
        link_scope: "tr.ACA_Table_Pages a, td.aca_pagination_td a",
        next_texts: &["Next >", "Next"],
    },
    detail_patterns: &["CapDetail.aspx"],
    date_format: "%m/%d/%Y",
};

const START_DATE: &str = "input[id$='txtGSStartDate']";
const END_DATE: &str = "input[id$='txtGSEndDate']";
const PERMIT_TYPE: &str = "select[id$='ddlGSPermitType']";
const SEARCH_BUTTON: &str = "a[id$='btnNewSearch']";

pub struct AccelaAdapter {
    config: ScrapeConfig,
}

impl AccelaAdapter {
    pub fn new(config: ScrapeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PortalAdapter for AccelaAdapter {
    fn profile(&self) -> &FamilyProfile {
        &PROFILE
    }

    fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    fn search_url(&self) -> String {
        format!(
            "{}/Cap/CapHome.aspx?module={module}&TabName={module}",
            self.config.base_url.trim_end_matches('/'),
            module = self.config.module
        )
    }

    async fn fill_filters(&self, page: &dyn PortalPage) -> EngineResult<()> {
        apply_filters(page, &self.config, &PROFILE, START_DATE, END_DATE, PERMIT_TYPE)
    }

    async fn submit_search(&self, page: &dyn PortalPage) -> EngineResult<()> {
        // The search "button" is a __doPostBack anchor.
        match page.force_click(&ClickTarget::Css(SEARCH_BUTTON.to_string()))? {
            ClickOutcome::NotFound => return Err(EngineError::MissingControl(SEARCH_BUTTON.to_string())),
            outcome => tracing::debug!("Accela search submitted: {:?}", outcome),
        }
        sleep(self.config.settle()).await;
        Ok(())
    }
}
