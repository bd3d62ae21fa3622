//! End-to-end scrapes replayed from recorded portal HTML.

use permit_crawler::browser::SnapshotPage;
use permit_crawler::config::{PortalFamily, ScrapeConfig};
use permit_crawler::engine::{scrape_many, PermitScraper};
use permit_crawler::error::{EngineError, PageError, ScraperError};
use permit_crawler::record::DetailRef;
use permit_crawler::status::PermitStatus;

const POSSE_BASE: &str = "https://permits.example.gov/posse";
const POSSE_SEARCH: &str = "https://permits.example.gov/posse/Default.aspx?PossePresentation=PermitSearch";
const POSSE_RESULTS: &str = "https://permits.example.gov/posse/Default.aspx?PossePresentation=PermitSearch&PosseSubmit=1";
const FA_TOKEN: &str = "javascript:__doPostBack('ctl00$grid$ctl02$lnk','')";
const BP_TOKEN: &str = "javascript:__doPostBack('ctl00$grid$ctl03$lnk','')";
const FA_DETAIL: &str = "https://permits.example.gov/posse/Default.aspx?PosseObjectId=778812";
const BP_DETAIL: &str = "https://permits.example.gov/posse/Default.aspx?PosseObjectId=778813";

const ACCELA_BASE: &str = "https://aca.example.gov/COSA";
const ACCELA_SEARCH: &str = "https://aca.example.gov/COSA/Cap/CapHome.aspx?module=Fire&TabName=Fire";
const ACCELA_P1: &str = "https://aca.example.gov/COSA/Cap/CapHome.aspx?module=Fire&TabName=Fire&page=1";
const ACCELA_P2: &str = "https://aca.example.gov/COSA/Cap/CapHome.aspx?module=Fire&TabName=Fire&page=2";
const ACCELA_SEARCH_BTN: &str = "javascript:__doPostBack('ctl00$PlaceHolderMain$btnNewSearch','')";
const ACCELA_NEXT: &str = "javascript:__doPostBack('ctl00$PlaceHolderMain$dgvPermitList$lnkNext','')";
const ACCELA_DETAIL_103: &str =
    "https://aca.example.gov/COSA/Cap/CapDetail.aspx?Module=Fire&capID1=25FIR&capID2=00000&capID3=00103";

const ENERGOV_BASE: &str = "https://energov.example.gov/EnerGov_Prod/SelfService";
const ENERGOV_SEARCH: &str = "https://energov.example.gov/EnerGov_Prod/SelfService/#/search";
const ENERGOV_P1: &str = "https://energov.example.gov/EnerGov_Prod/SelfService/#/search?page=1";
const ENERGOV_P2: &str = "https://energov.example.gov/EnerGov_Prod/SelfService/#/search?page=2";
const ENERGOV_DETAIL_0043: &str = "https://energov.example.gov/EnerGov_Prod/SelfService/#/permit/5d1e0a43";

const VIEWPOINT_BASE: &str = "https://tahoe.viewpointcloud.example.com";
const VIEWPOINT_SEARCH: &str = "https://tahoe.viewpointcloud.example.com/search?category=Building";
const VIEWPOINT_P1: &str = "https://tahoe.viewpointcloud.example.com/search/results";
const VIEWPOINT_P2: &str = "https://tahoe.viewpointcloud.example.com/search/results?page=2";
const VIEWPOINT_DETAIL_88122: &str = "https://tahoe.viewpointcloud.example.com/records/88122";

fn fast(mut config: ScrapeConfig) -> ScrapeConfig {
    config.navigation_timeout_secs = 1;
    config.postback_timeout_secs = 1;
    config.base_delay_ms = 1;
    config.settle_ms = 0;
    config
}

fn posse_config() -> ScrapeConfig {
    fast(ScrapeConfig::new(PortalFamily::Posse, "EDM", "Building", POSSE_BASE))
}

fn posse_portal() -> SnapshotPage {
    SnapshotPage::new()
        .with_page(POSSE_SEARCH, include_str!("fixtures/posse_search.html"))
        .with_page(POSSE_RESULTS, include_str!("fixtures/posse_results.html"))
        .with_page(FA_DETAIL, include_str!("fixtures/posse_detail_fa.html"))
        .with_page(BP_DETAIL, include_str!("fixtures/posse_detail_bp.html"))
        .on_click("#PerformSearch_1026_0", POSSE_RESULTS)
}

#[tokio::test]
async fn test_posse_postback_applicant_from_detail_page() {
    let portal = posse_portal().on_click(FA_TOKEN, FA_DETAIL).on_click(BP_TOKEN, BP_DETAIL);
    let records = PermitScraper::new(portal.clone(), posse_config()).scrape().await.unwrap();

    assert_eq!(records.len(), 2);
    let fa = &records[0];
    assert_eq!(fa.source, "posse_EDM_building");
    assert_eq!(fa.permit_id, "FA-2025-001");
    assert_eq!(fa.permit_type, "Fire Alarm");
    assert_eq!(fa.applicant_name.as_deref(), Some("Acme Fire LLC"));
    assert_eq!(fa.address, None);
    assert_eq!(fa.status, PermitStatus::Issued);
    assert_eq!(fa.detail_ref, Some(DetailRef::Postback { raw_token: FA_TOKEN.into() }));

    let bp = &records[1];
    assert_eq!(bp.applicant_name.as_deref(), Some("Prairie Builders Ltd"));
    assert_eq!(bp.address.as_deref(), Some("10104 Jasper Avenue NW"));
    assert_eq!(bp.status, PermitStatus::Pending);

    // Date filters were typed and the disabled search button was re-enabled.
    let values = portal.values_set();
    assert!(values.iter().any(|(sel, _)| sel == "input[id^='IssueDateFrom']"));
    assert!(values.iter().any(|(sel, _)| sel == "input[id^='IssueDateTo']"));
    assert!(portal.scripts_run().iter().any(|s| s.contains("removeAttribute('disabled')")));
    assert!(portal.is_closed());
}

#[tokio::test]
async fn test_failed_detail_resolution_keeps_row_values() {
    // Only the first row's postback is wired; the second never reaches a detail page.
    let portal = posse_portal().on_click(FA_TOKEN, FA_DETAIL);
    let records = PermitScraper::new(portal.clone(), posse_config()).scrape().await.unwrap();

    let bp = records.iter().find(|r| r.permit_id == "BP-2025-0117").unwrap();
    assert_eq!(bp.address.as_deref(), Some("10104 Jasper Ave NW"));
    assert_eq!(bp.applicant_name, None);
    // Returned to the results page after the failed attempt.
    assert_eq!(portal.visited().last().map(String::as_str), Some(POSSE_RESULTS));
}

#[tokio::test]
async fn test_detail_page_of_another_permit_is_ignored() {
    // The first row's postback lands on the second permit's detail page.
    let portal = posse_portal().on_click(FA_TOKEN, BP_DETAIL).on_click(BP_TOKEN, BP_DETAIL);
    let records = PermitScraper::new(portal, posse_config()).scrape().await.unwrap();

    let fa = records.iter().find(|r| r.permit_id == "FA-2025-001").unwrap();
    assert_eq!(fa.address, None);
    assert_ne!(fa.applicant_name.as_deref(), Some("Prairie Builders Ltd"));
    let bp = records.iter().find(|r| r.permit_id == "BP-2025-0117").unwrap();
    assert_eq!(bp.applicant_name.as_deref(), Some("Prairie Builders Ltd"));
}

#[tokio::test]
async fn test_no_records_is_an_empty_success() {
    let portal = SnapshotPage::new()
        .with_page(POSSE_SEARCH, include_str!("fixtures/posse_search.html"))
        .with_page(POSSE_RESULTS, include_str!("fixtures/posse_no_records.html"))
        .on_click("#PerformSearch_1026_0", POSSE_RESULTS);

    let records = PermitScraper::new(portal.clone(), posse_config()).scrape().await.unwrap();
    assert!(records.is_empty());
    assert!(portal.is_closed());
}

#[tokio::test]
async fn test_unreachable_portal_exhausts_retries() {
    let portal = SnapshotPage::new();
    let mut config = posse_config();
    config.max_retries = 2;

    let err = PermitScraper::new(portal.clone(), config).scrape().await.unwrap_err();
    match err {
        ScraperError::RetriesExhausted { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(source, EngineError::Page(PageError::Navigation { .. })));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(portal.is_closed());
}

#[tokio::test]
async fn test_accela_paging_dedup_and_url_detail() {
    let portal = SnapshotPage::new()
        .with_page(ACCELA_SEARCH, include_str!("fixtures/accela_search.html"))
        .with_page(ACCELA_P1, include_str!("fixtures/accela_results_p1.html"))
        .with_page(ACCELA_P2, include_str!("fixtures/accela_results_p2.html"))
        .with_page(
            ACCELA_DETAIL_103,
            "<html><body><h1>Record FIR-25-00103</h1><p>Work Location: 300 Alamo Plaza</p></body></html>",
        )
        .on_click(ACCELA_SEARCH_BTN, ACCELA_P1)
        .on_click(ACCELA_NEXT, ACCELA_P2);

    let mut config = fast(ScrapeConfig::new(PortalFamily::Accela, "COSA", "Fire", ACCELA_BASE));
    config.min_rows_per_page = 2;
    config.extract_applicant = false;

    let records = PermitScraper::new(portal, config).scrape().await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.permit_id.as_str()).collect();
    assert_eq!(ids, vec!["FIR-25-00101", "FIR-25-00102", "FIR-25-00103"]);

    assert_eq!(records[0].applicant_name.as_deref(), Some("Alamo Fire Protection LLC"));
    // Page 2's copy replaced page 1's.
    assert_eq!(records[1].status, PermitStatus::Issued);
    // Placeholder address and applicant were rejected, then the address came from the detail page.
    assert_eq!(records[2].address.as_deref(), Some("300 Alamo Plaza"));
    assert_eq!(records[2].applicant_name, None);
    assert_eq!(records[2].status, PermitStatus::Closed);
    assert_eq!(records[2].detail_ref, Some(DetailRef::Url { href: ACCELA_DETAIL_103.into() }));
}

#[tokio::test]
async fn test_energov_module_search_with_result_count() {
    let portal = SnapshotPage::new()
        .with_page(ENERGOV_SEARCH, include_str!("fixtures/energov_search.html"))
        .with_page(ENERGOV_P1, include_str!("fixtures/energov_results_p1.html"))
        .with_page(ENERGOV_P2, include_str!("fixtures/energov_results_p2.html"))
        .with_page(ENERGOV_DETAIL_0043, include_str!("fixtures/energov_detail_0043.html"))
        .on_click("#button-Search", ENERGOV_P1)
        .on_click("#link-NextPage", ENERGOV_P2);

    let mut config = fast(ScrapeConfig::new(PortalFamily::Energov, "HOU", "Permit", ENERGOV_BASE));
    config.min_rows_per_page = 2;

    let records = PermitScraper::new(portal.clone(), config).scrape().await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.permit_id.as_str()).collect();
    // "Found 120 results" is a count, not an empty result set.
    assert_eq!(ids, vec!["BLD-25-0042", "BLD-25-0043", "BLD-25-0050"]);

    assert_eq!(records[0].applicant_name.as_deref(), Some("Bayou City Builders LLC"));
    assert_eq!(records[0].status, PermitStatus::Issued);
    assert_eq!(records[1].applicant_name.as_deref(), Some("Gulf Coast Contractors Inc"));
    assert_eq!(records[1].address.as_deref(), Some("901 Bagby St"));
    assert_eq!(records[1].detail_ref, Some(DetailRef::Url { href: ENERGOV_DETAIL_0043.into() }));
    assert_eq!(records[2].status, PermitStatus::Closed);

    let values = portal.values_set();
    assert!(values.contains(&("#SearchModule".to_string(), "Permit".to_string())));
    assert!(values.iter().any(|(sel, _)| sel == "#IssueDateFrom"));
    assert!(values.iter().any(|(sel, _)| sel == "#IssueDateTo"));
}

#[tokio::test]
async fn test_viewpoint_form_submit_and_paging() {
    // The submit replaces the document before the script returns.
    let portal = SnapshotPage::new()
        .with_page(VIEWPOINT_SEARCH, include_str!("fixtures/viewpoint_search.html"))
        .with_page(VIEWPOINT_P1, include_str!("fixtures/viewpoint_results_p1.html"))
        .with_page(VIEWPOINT_P2, include_str!("fixtures/viewpoint_results_p2.html"))
        .with_page(VIEWPOINT_DETAIL_88122, include_str!("fixtures/viewpoint_detail_88122.html"))
        .on_script("requestSubmit", VIEWPOINT_P1)
        .on_click("/search/results?page=2", VIEWPOINT_P2);

    let mut config = fast(ScrapeConfig::new(PortalFamily::Viewpoint, "Tahoe", "Building", VIEWPOINT_BASE));
    config.min_rows_per_page = 2;

    let records = PermitScraper::new(portal.clone(), config).scrape().await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.permit_id.as_str()).collect();
    assert_eq!(ids, vec!["BLD25-0311", "BLD25-0312", "ENC25-0019"]);

    assert_eq!(records[0].status, PermitStatus::Issued);
    assert_eq!(records[1].status, PermitStatus::Closed);
    // Placeholder address replaced from the detail page; the row's applicant stays.
    assert_eq!(records[1].address.as_deref(), Some("515 Emerald Bay Rd"));
    assert_eq!(records[1].applicant_name.as_deref(), Some("Emerald Bay Homes Inc"));
    assert_eq!(records[2].status, PermitStatus::Pending);

    let values = portal.values_set();
    assert!(values.iter().any(|(sel, _)| sel == "input[name='dateFrom']"));
    assert!(portal.scripts_run().iter().any(|s| s.contains("requestSubmit")));
    assert!(portal.is_closed());
}

#[tokio::test]
async fn test_scrape_many_reports_per_source() {
    let mut bad = posse_config();
    bad.base_url = "not a url".into();
    bad.jurisdiction = "BAD".into();
    let mut unreachable = posse_config();
    unreachable.max_retries = 1;

    let results = scrape_many(SnapshotPage::new(), vec![bad, unreachable]).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "posse_BAD_building");
    assert!(matches!(results[0].1, Err(ScraperError::Config(_))));
    assert_eq!(results[1].0, "posse_EDM_building");
    assert!(matches!(results[1].1, Err(ScraperError::RetriesExhausted { attempts: 1, .. })));
}
