//! Mockito wrapper for chain RPC and marketplace responses.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

/// Builder for mock upstream responses.
///
/// Mocks stay registered for as long as the builder lives. [`reset`](Self::reset) clears them,
/// which is how tests turn a healthy upstream into a failing one.
pub struct UpstreamMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl UpstreamMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Mocks the `eth_blockNumber` + `eth_chainId` batch.
    pub async fn mock_evm_head(&mut self, chain_id: u64, block_number: u64) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::Regex(r#""method"\s*:\s*"eth_blockNumber""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    { "jsonrpc": "2.0", "id": 1, "result": format!("0x{block_number:x}") },
                    { "jsonrpc": "2.0", "id": 2, "result": format!("0x{chain_id:x}") },
                ])
                .to_string(),
            )
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Mocks Solana `getSlot`.
    pub async fn mock_solana_slot(&mut self, slot: u64) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::Regex(r#""method"\s*:\s*"getSlot""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": slot }).to_string())
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    pub async fn mock_opensea_stats(&mut self, slug: &str, floor_price: f64) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/api/v2/collections/{slug}/stats").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "total": {
                        "volume": 1000.0,
                        "floor_price": floor_price,
                        "floor_price_symbol": "ETH",
                        "num_owners": 5000
                    },
                    "intervals": []
                })
                .to_string(),
            )
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Magic Eden quotes floors in lamports.
    pub async fn mock_magic_eden_stats(&mut self, symbol: &str, floor_lamports: u64) -> &mut Self {
        let mock = self
            .server
            .mock("GET", format!("/v2/collections/{symbol}/stats").as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "symbol": symbol, "floorPrice": floor_lamports, "listedCount": 120 })
                    .to_string(),
            )
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    pub async fn mock_reservoir_collection(
        &mut self,
        collection: &str,
        name: &str,
        floor_price: f64,
    ) -> &mut Self {
        let mock = self
            .server
            .mock("GET", "/collections/v7")
            .match_query(Matcher::UrlEncoded("id".to_string(), collection.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "collections": [{
                        "id": collection,
                        "name": name,
                        "tokenCount": "10000",
                        "ownerCount": 4500,
                        "floorAsk": {
                            "price": {
                                "currency": { "symbol": "ETH" },
                                "amount": { "decimal": floor_price }
                            }
                        }
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Answers every `method` request, on any path, with `status`.
    pub async fn mock_status(&mut self, method: &str, status: usize) -> &mut Self {
        let mock = self
            .server
            .mock(method, Matcher::Any)
            .with_status(status)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        self.mocks.push(mock);
        self
    }

    /// Removes every registered mock.
    pub async fn reset(&mut self) {
        self.mocks.clear();
        self.server.reset_async().await;
    }

    /// Returns a reference to the underlying mockito server for advanced mocking.
    pub fn get_server(&mut self) -> &mut ServerGuard {
        &mut self.server
    }
}
