use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{client::project, DuneClient, DuneError};

/// Columns requested from the DEX pairs endpoint.
pub const DEX_PAIR_COLUMNS: &str =
    "token_pair, projects, all_time_volume, usd_liquidity, seven_day_volume_liquidity_ratio";

const TOP_PAIRS_LIMIT: usize = 100;

/// One row of the DEX pairs table, restricted to [`DEX_PAIR_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexPairMetrics {
    #[serde(default)]
    pub token_pair: Value,
    #[serde(default)]
    pub projects: Value,
    #[serde(default)]
    pub all_time_volume: Value,
    #[serde(default)]
    pub usd_liquidity: Value,
    #[serde(default)]
    pub seven_day_volume_liquidity_ratio: Value,
}

impl DuneClient {
    /// Metrics for one `token_pair` (e.g. `USDC-WETH`) on `chain`.
    pub async fn dex_pair_metrics(
        &self,
        chain: &str,
        token_pair: &str,
    ) -> Result<Vec<DexPairMetrics>, DuneError> {
        let rows = self
            .get_rows(
                &["v1", "dex", "pairs", chain],
                &[
                    ("token_pair", token_pair.to_string()),
                    ("columns", DEX_PAIR_COLUMNS.to_string()),
                ],
            )
            .await?;
        project(rows)
    }

    /// The most liquid pairs on `chain`, highest USD liquidity first.
    pub async fn top_token_pairs(&self, chain: &str) -> Result<Vec<DexPairMetrics>, DuneError> {
        let rows = self
            .get_rows(
                &["v1", "dex", "pairs", chain],
                &[
                    ("columns", DEX_PAIR_COLUMNS.to_string()),
                    ("sort_by", "usd_liquidity desc".to_string()),
                    ("limit", TOP_PAIRS_LIMIT.to_string()),
                ],
            )
            .await?;
        project(rows)
    }
}
