//! Component B: ledger client (spec §4.B).
//!
//! Grounded on the pack's `transaction_monitor.rs` (`list_account_transactions`
//! cursor pagination over `HorizonTransactionRecord`/`paging_token`),
//! adapted to the spec's counting rule instead of transaction matching.

use crate::error::ApiError;
use crate::models::{Counters, WalletAddress};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Hard upper bound on the number of payment records scanned per wallet,
/// to cap worst-case scan cost (spec §4.B step 1).
const MAX_SCANNED_TRANSACTIONS: usize = 10_000;
const PAGE_LIMIT: u32 = 200;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn fetch_payments(&self, wallet: &WalletAddress) -> Result<Counters, ApiError>;
}

#[derive(Debug, Deserialize)]
struct PaymentsPage {
    #[serde(rename = "_embedded")]
    embedded: Embedded,
    #[serde(default)]
    #[serde(rename = "_links")]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<LinkHref>,
}

#[derive(Debug, Deserialize)]
struct LinkHref {
    href: String,
}

#[derive(Debug, Deserialize)]
struct Embedded {
    records: Vec<PaymentRecord>,
}

#[derive(Debug, Deserialize)]
struct PaymentRecord {
    #[serde(rename = "type")]
    kind: String,
    from: Option<String>,
    to: Option<String>,
    paging_token: String,
}

const PAYMENT_TYPES: &[&str] = &[
    "payment",
    "path_payment",
    "path_payment_strict_send",
    "path_payment_strict_receive",
];

/// Horizon-style REST client over `{LEDGER_BASE}/accounts/{wallet}/payments`.
pub struct HorizonLedgerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HorizonLedgerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn fetch_page(
        &self,
        wallet: &WalletAddress,
        cursor: Option<&str>,
    ) -> Result<Option<PaymentsPage>, ApiError> {
        let url = format!("{}/accounts/{}/payments", self.base_url, wallet);
        let mut query = vec![("limit", PAGE_LIMIT.to_string()), ("order", "desc".to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let response = self.http.get(&url).query(&query).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            log::warn!(
                "ledger responded with non-2xx status {} for {}",
                response.status(),
                wallet
            );
            return Err(ApiError::LedgerUnavailable);
        }

        let page: PaymentsPage = response.json().await?;
        Ok(Some(page))
    }
}

#[async_trait]
impl LedgerClient for HorizonLedgerClient {
    async fn fetch_payments(&self, wallet: &WalletAddress) -> Result<Counters, ApiError> {
        let mut total: u64 = 0;
        let mut credited: u64 = 0;
        let mut counterparties: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut scanned = 0usize;

        loop {
            let page = match self.fetch_page(wallet, cursor.as_deref()).await? {
                None => return Ok(Counters::default()),
                Some(page) => page,
            };

            let record_count = page.embedded.records.len();
            let mut last_token: Option<String> = None;

            for record in &page.embedded.records {
                last_token = Some(record.paging_token.clone());
                if !PAYMENT_TYPES.contains(&record.kind.as_str()) {
                    continue;
                }

                total += 1;
                scanned += 1;

                let to = record.to.as_deref();
                let from = record.from.as_deref();

                if to == Some(wallet.as_ref()) {
                    credited += 1;
                }

                let counterparty = if from == Some(wallet.as_ref()) { to } else { from };
                if let Some(counterparty) = counterparty {
                    if counterparty != wallet.as_ref() {
                        counterparties.insert(counterparty.to_string());
                    }
                }
            }

            let has_next = page.links.next.is_some();
            if record_count < PAGE_LIMIT as usize || !has_next || scanned >= MAX_SCANNED_TRANSACTIONS
            {
                break;
            }

            cursor = last_token;
            if cursor.is_none() {
                break;
            }
        }

        Ok(Counters {
            total,
            credited,
            unique_counterparties: counterparties.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn wallet(tail: char) -> WalletAddress {
        WalletAddress(format!("G{}", tail.to_string().repeat(55)))
    }

    fn record(kind: &str, from: &str, to: &str, token: &str) -> serde_json::Value {
        serde_json::json!({
            "type": kind,
            "from": from,
            "to": to,
            "paging_token": token,
        })
    }

    #[tokio::test]
    async fn returns_zero_counters_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/GAAAA/payments"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HorizonLedgerClient::new(server.uri(), Duration::from_secs(5));
        let counters = client
            .fetch_payments(&WalletAddress("GAAAA".to_string()))
            .await
            .unwrap();
        assert_eq!(counters, Counters::default());
    }

    #[tokio::test]
    async fn counts_payments_and_counterparties_single_page() {
        let server = MockServer::start().await;
        let w = wallet('A');
        let body = serde_json::json!({
            "_embedded": {
                "records": [
                    record("payment", w.as_ref(), "GBBB1", "1"),
                    record("payment", "GBBB2", w.as_ref(), "2"),
                    record("path_payment_strict_send", w.as_ref(), "GBBB1", "3"),
                    record("create_account", w.as_ref(), "GBBB3", "4"),
                ]
            },
            "_links": {}
        });
        Mock::given(method("GET"))
            .and(path(format!("/accounts/{}/payments", w)))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let client = HorizonLedgerClient::new(server.uri(), Duration::from_secs(5));
        let counters = client.fetch_payments(&w).await.unwrap();

        // 3 counted (payment, payment, path_payment_strict_send); create_account excluded.
        assert_eq!(counters.total, 3);
        assert_eq!(counters.credited, 1);
        assert_eq!(counters.unique_counterparties, 2); // GBBB1, GBBB2
    }

    #[tokio::test]
    async fn paginates_until_short_page() {
        let server = MockServer::start().await;
        let w = wallet('C');

        let mut full_records = Vec::new();
        for i in 0..PAGE_LIMIT {
            full_records.push(record("payment", w.as_ref(), "GBBB1", &format!("p1-{i}")));
        }
        let page1 = serde_json::json!({
            "_embedded": { "records": full_records },
            "_links": { "next": { "href": "ignored" } }
        });
        let page2 = serde_json::json!({
            "_embedded": { "records": [record("payment", w.as_ref(), "GBBB2", "p2-0")] },
            "_links": {}
        });

        Mock::given(method("GET"))
            .and(path(format!("/accounts/{}/payments", w)))
            .respond_with(ResponseTemplate::new(200).set_body_json(&page1))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/accounts/{}/payments", w)))
            .respond_with(ResponseTemplate::new(200).set_body_json(&page2))
            .mount(&server)
            .await;

        let client = HorizonLedgerClient::new(server.uri(), Duration::from_secs(5));
        let counters = client.fetch_payments(&w).await.unwrap();
        assert_eq!(counters.total, PAGE_LIMIT as u64 + 1);
        assert_eq!(counters.unique_counterparties, 2);
    }
}
