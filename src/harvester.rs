//! Paginated advertiser-listing harvest from the affiliate network API.
//!
//! Every request carries an MD5 signature computed over the concatenated
//! non-empty parameter values (salt included in the base string but never
//! sent on the wire). Pages are fetched in order until the total reported by
//! the first page is exhausted, with bounded per-page retry.

use std::time::{Duration, Instant};

use md5::{Digest, Md5};
use tracing::{debug, info, warn};

use crate::api::latency::LatencyStats;
use crate::config::{Config, PAGE_RETRY_BACKOFF_MS};
use crate::error::{AppError, Result};
use crate::types::AdvertiserRecord;

#[derive(Debug, Default)]
pub struct HarvestStats {
    /// Records the API reported in total.
    pub api_total: usize,
    pub pages_fetched: usize,
    pub parsed: usize,
    pub rejected_missing_id: usize,
    pub retried_pages: usize,
}

/// Fetch the full advertiser listing, page by page.
pub async fn fetch_advertisers(
    cfg: &Config,
    latency: &LatencyStats,
) -> Result<(Vec<AdvertiserRecord>, HarvestStats)> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut records = Vec::new();
    let mut stats = HarvestStats::default();
    let mut page = 1usize;
    let mut total_pages = 1usize;

    loop {
        let payload = fetch_page_with_retry(&client, cfg, page, latency, &mut stats).await?;
        stats.pages_fetched += 1;

        if page == 1 {
            let total = payload
                .get("total")
                .and_then(|t| {
                    t.as_u64()
                        .or_else(|| t.as_str().and_then(|s| s.parse().ok()))
                })
                .unwrap_or(0) as usize;
            stats.api_total = total;
            total_pages = total.div_ceil(cfg.page_size).max(1);
            if total_pages > cfg.max_pages {
                warn!(
                    "Listing reports {total_pages} pages, capping at {}",
                    cfg.max_pages,
                );
                total_pages = cfg.max_pages;
            }
        }

        let items = payload
            .get("list")
            .and_then(|l| l.as_array())
            .cloned()
            .unwrap_or_default();

        for item in &items {
            match parse_advertiser(item) {
                Some(record) => {
                    records.push(record);
                    stats.parsed += 1;
                }
                None => stats.rejected_missing_id += 1,
            }
        }

        debug!(page, total_pages, parsed = records.len(), "listing page ingested");

        if page >= total_pages || items.is_empty() {
            break;
        }
        page += 1;
    }

    info!(
        pages = stats.pages_fetched,
        parsed = stats.parsed,
        rejected = stats.rejected_missing_id,
        api_total = stats.api_total,
        "Listing harvest complete: {} advertisers from {} pages",
        stats.parsed,
        stats.pages_fetched,
    );

    Ok((records, stats))
}

/// Fetch one listing page, retrying transient failures with backoff.
async fn fetch_page_with_retry(
    client: &reqwest::Client,
    cfg: &Config,
    page: usize,
    latency: &LatencyStats,
    stats: &mut HarvestStats,
) -> Result<serde_json::Value> {
    let mut attempt = 0usize;
    loop {
        let started = Instant::now();
        match fetch_page(client, cfg, page).await {
            Ok(payload) => {
                latency.record(started.elapsed());
                return Ok(payload);
            }
            Err(e) if attempt < PAGE_RETRY_BACKOFF_MS.len() => {
                let backoff = PAGE_RETRY_BACKOFF_MS[attempt];
                warn!(page, attempt = attempt + 1, "page fetch failed ({e}), retrying in {backoff}ms");
                stats.retried_pages += 1;
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Fetch and validate a single page, returning the response `payload` object.
async fn fetch_page(
    client: &reqwest::Client,
    cfg: &Config,
    page: usize,
) -> Result<serde_json::Value> {
    let params = listing_params(cfg, page);
    let sign = sign_params(&params);

    let query = params
        .iter()
        .filter(|(key, _)| *key != "salt")
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    let url = format!("{}?c=programs&a=list&sign={sign}&{query}", cfg.api_url);

    let mut request = client
        .get(&url)
        .header("Accept", "application/json")
        .header(
            "User-Agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        );
    if !cfg.auth_token.is_empty() {
        request = request.header("lh-authorization", &cfg.auth_token);
    }

    let resp: serde_json::Value = request.send().await?.json().await?;

    let code = resp.get("code").and_then(|c| c.as_str()).unwrap_or("");
    if code != "0200" {
        let msg = resp.get("msg").and_then(|m| m.as_str()).unwrap_or("unknown");
        return Err(AppError::Harvest(format!(
            "listing page {page} rejected: code={code} msg={msg}"
        )));
    }

    resp.get("payload")
        .cloned()
        .ok_or_else(|| AppError::Harvest(format!("listing page {page} missing payload")))
}

/// Ordered request parameters for one listing page. The salt participates in
/// the signature base string only; `fetch_page` strips it from the URL.
fn listing_params(cfg: &Config, page: usize) -> Vec<(&'static str, String)> {
    vec![
        ("channel", cfg.channel.clone()),
        ("join_status", "adopt".to_string()),
        ("adv_category", String::new()),
        ("adv_type", String::new()),
        ("region", String::new()),
        ("mailing_region", String::new()),
        ("approval_type", String::new()),
        ("page", page.to_string()),
        ("page_size", cfg.page_size.to_string()),
        ("m_ids", String::new()),
        ("order_by", String::new()),
        ("salt", cfg.api_salt.clone()),
    ]
}

/// MD5 hex digest over the concatenated values of all non-empty parameters,
/// in order. Empty-string parameters are excluded from the base string even
/// though they are still sent on the wire.
pub fn sign_params(params: &[(&str, String)]) -> String {
    let mut hasher = Md5::new();
    for (_, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
        hasher.update(value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Parse one advertiser entry from a listing page. Returns None only when
/// the record has no usable identity; numeric fields arrive as either JSON
/// numbers or strings and unparseable EPC values are recorded as 0.
pub fn parse_advertiser(v: &serde_json::Value) -> Option<AdvertiserRecord> {
    let adv_id = v.get("adv_id").and_then(|s| s.as_str())?.to_string();
    if adv_id.is_empty() {
        return None;
    }

    let name = v
        .get("adv_name")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string();

    Some(AdvertiserRecord {
        adv_id,
        name,
        merchant_id: str_field(v, "m_id"),
        category: str_field(v, "adv_category"),
        adv_type: str_field(v, "adv_type"),
        mailing_region: str_field(v, "mailing_region"),
        approval_type: str_field(v, "approval_type"),
        logo_url: str_field(v, "adv_logo"),
        epc: num_field(v, "30_epc").unwrap_or(0.0).max(0.0),
        rate: num_field(v, "30_rate"),
    })
}

fn str_field(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Numeric field that may arrive as a JSON number or a numeric string.
fn num_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key)
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_skips_empty_values() {
        let full = vec![
            ("channel", "14681".to_string()),
            ("join_status", "adopt".to_string()),
            ("adv_category", String::new()),
            ("page", "1".to_string()),
            ("page_size", "100".to_string()),
            ("m_ids", String::new()),
            ("salt", "TSf03xGHykY".to_string()),
        ];
        let filtered = vec![
            ("channel", "14681".to_string()),
            ("join_status", "adopt".to_string()),
            ("page", "1".to_string()),
            ("page_size", "100".to_string()),
            ("salt", "TSf03xGHykY".to_string()),
        ];
        assert_eq!(sign_params(&full), sign_params(&filtered));
        // md5("14681adopt1100TSf03xGHykY")
        assert_eq!(sign_params(&full), "9b894e049837596fd22bbe607c460b45");
    }

    #[test]
    fn parses_numeric_fields_from_strings_or_numbers() {
        let from_string = json!({
            "adv_id": "A100",
            "adv_name": "Acme Outfitters",
            "30_epc": "1.25",
            "30_rate": "0.04"
        });
        let rec = parse_advertiser(&from_string).unwrap();
        assert_eq!(rec.epc, 1.25);
        assert_eq!(rec.rate, Some(0.04));

        let from_number = json!({"adv_id": "A101", "adv_name": "Acme", "30_epc": 2.5});
        assert_eq!(parse_advertiser(&from_number).unwrap().epc, 2.5);
    }

    #[test]
    fn missing_or_garbage_epc_is_recorded_as_zero() {
        let missing = json!({"adv_id": "A102", "adv_name": "NoEpc Co"});
        assert_eq!(parse_advertiser(&missing).unwrap().epc, 0.0);

        let garbage = json!({"adv_id": "A103", "adv_name": "Bad", "30_epc": "n/a"});
        assert_eq!(parse_advertiser(&garbage).unwrap().epc, 0.0);
    }

    #[test]
    fn record_without_identity_is_rejected() {
        assert!(parse_advertiser(&json!({"adv_name": "Anonymous"})).is_none());
        assert!(parse_advertiser(&json!({"adv_id": "", "adv_name": "Empty"})).is_none());
    }

    #[test]
    fn empty_optional_strings_become_none() {
        let rec = parse_advertiser(&json!({
            "adv_id": "A104",
            "adv_name": "Acme",
            "adv_category": "",
            "mailing_region": "US"
        }))
        .unwrap();
        assert_eq!(rec.category, None);
        assert_eq!(rec.mailing_region, Some("US".to_string()));
    }
}
