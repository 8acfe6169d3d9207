use crate::error::Result;
use crate::rest::BackpackHttpClient;
use crate::types::DepthSnapshot;

impl BackpackHttpClient {
    /// GET /api/v1/depth?symbol= - Full order book depth for a market.
    pub async fn get_depth(&self, symbol: &str) -> Result<DepthSnapshot> {
        self.get_json("/api/v1/depth", &[("symbol", symbol)]).await
    }
}
