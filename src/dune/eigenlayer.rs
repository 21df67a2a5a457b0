use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    client::{project, str_field},
    DuneClient, DuneError,
};

/// Per-AVS figures, passed through exactly as the API reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvsMetrics {
    #[serde(default)]
    pub num_operators: Value,
    #[serde(rename = "total_TVL", default)]
    pub total_tvl: Value,
    #[serde(default)]
    pub num_stakers: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorMetrics {
    pub operator_name: String,
    #[serde(rename = "total_TVL", default)]
    pub total_tvl: Value,
    #[serde(default)]
    pub num_stakers: Value,
}

/// SQL-style equality filter; single quotes in the value are doubled.
fn avs_filter(avs_name: &str) -> String {
    format!("avs_name = '{}'", avs_name.replace('\'', "''"))
}

impl DuneClient {
    /// Stats for the AVS named exactly `avs_name`, gathered over every page.
    pub async fn avs_metrics(&self, avs_name: &str) -> Result<Vec<AvsMetrics>, DuneError> {
        let rows = self
            .fetch_all_pages(&["v1", "eigenlayer", "avs-stats"], &[])
            .await?;
        project(
            rows.into_iter()
                .filter(|row| str_field(row, "avs_name") == Some(avs_name)),
        )
    }

    /// Stats for every operator mapped to `avs_name`.
    ///
    /// The mapping table is queried with a server-side filter, then the full
    /// operator table is walked and joined by operator name. Rows without a
    /// string `operator_name` never match.
    pub async fn operator_metrics(&self, avs_name: &str) -> Result<Vec<OperatorMetrics>, DuneError> {
        let mapping = self
            .fetch_all_pages(
                &["v1", "eigenlayer", "operator-to-avs-mapping"],
                &[("filters", avs_filter(avs_name))],
            )
            .await?;
        let operators: HashSet<&str> = mapping
            .iter()
            .filter_map(|row| str_field(row, "operator_name"))
            .collect();
        tracing::debug!(avs_name, operators = operators.len(), "resolved operator mapping");
        if operators.is_empty() {
            return Ok(Vec::new());
        }

        let stats = self
            .fetch_all_pages(&["v1", "eigenlayer", "operator-stats"], &[])
            .await?;
        project(stats.into_iter().filter(|row| {
            str_field(row, "operator_name").is_some_and(|name| operators.contains(name))
        }))
    }
}
