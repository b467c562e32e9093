use serde::{Deserialize, Serialize};

/// Opaque enrichment keyword fetched from the control plane.
///
/// The orchestrator never interprets `keyword`; it only uses `id` to report
/// back `companies_found`/`companies_scraped` once the derived tasks settle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentKeyword {
    pub id: String,
    pub keyword: String,
    pub num_companies: Option<u64>,
}

/// Result reported back to the control plane for a processed keyword.
///
/// Both counts are best-effort: a worker that errors partway through a
/// keyword's task fan-out may leave either field `None` rather than forcing
/// a guess (SPEC_FULL.md §9 Open Question decisions).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub keyword_id: String,
    pub companies_found: Option<u64>,
    pub companies_scraped: Option<u64>,
}
