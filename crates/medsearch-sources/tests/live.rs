//! Hits the real services. Run with `cargo test -p medsearch-sources -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use medsearch_access::{AccessStrategy, RateLimiter, SearchRequest, StrategyContext, StrategyResult};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::{DateRange, SourceCatalog};
use medsearch_sources::sources::{ChemblMolecules, EmaMedicines, MhraProducts, OpenFdaLabels, PubMedApi, RxNavDrugs};

fn ctx(source_id: &str) -> StrategyContext {
    StrategyContext::new(
        source_id,
        SourceCatalog::builtin().get_database_config(source_id),
        Arc::new(RateLimiter::new()),
    )
}

fn client() -> SandboxClient {
    SandboxClient::new(Duration::from_secs(30)).unwrap()
}

fn assert_records(result: StrategyResult) {
    match result {
        StrategyResult::Success(records) => {
            assert!(!records.is_empty());
            assert!(records.iter().all(|r| !r.id.is_empty() && !r.title.is_empty()));
        }
        other => panic!("expected records, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn pubmed_api_live() {
    let request = SearchRequest::new("paracetamol hepatotoxicity", 3)
        .with_date_range(DateRange::parse(Some("2020-01-01"), Some("2023-12-31")).unwrap());
    let result = PubMedApi::new(client(), None).search(&request, &ctx("pubmed")).await;
    assert_records(result);
}

#[tokio::test]
#[ignore]
async fn openfda_labels_live() {
    let result = OpenFdaLabels::new(client())
        .search(&SearchRequest::new("acetaminophen", 3), &ctx("fda-drugs"))
        .await;
    assert_records(result);
}

#[tokio::test]
#[ignore]
async fn chembl_molecules_live() {
    let result = ChemblMolecules::new(client())
        .search(&SearchRequest::new("imatinib", 3), &ctx("chembl"))
        .await;
    assert_records(result);
}

#[tokio::test]
#[ignore]
async fn rxnav_drugs_live() {
    let result = RxNavDrugs::new(client())
        .search(&SearchRequest::new("metformin", 3), &ctx("rxnav"))
        .await;
    assert_records(result);
}

#[tokio::test]
#[ignore]
async fn ema_medicines_live() {
    let result = EmaMedicines::new(client())
        .search(&SearchRequest::new("paracetamol", 3), &ctx("ema-medicines"))
        .await;
    assert_records(result);
}

#[tokio::test]
#[ignore]
async fn mhra_products_live() {
    let result = MhraProducts::new(client())
        .search(&SearchRequest::new("ibuprofen", 3), &ctx("mhra"))
        .await;
    assert_records(result);
}
