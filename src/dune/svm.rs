use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{client::project, DuneClient, DuneError};

/// A token held by a Solana wallet. Fields are kept as the API sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Raw amount, usually a decimal string.
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub price_usd: Value,
    #[serde(default)]
    pub symbol: Value,
    #[serde(default)]
    pub name: Value,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    balances: Vec<Value>,
}

impl DuneClient {
    /// Solana token balances of `wallet_address`, priced where Dune has a price.
    pub async fn svm_token_balances(
        &self,
        wallet_address: &str,
    ) -> Result<Vec<TokenBalance>, DuneError> {
        let body = self
            .get_json(
                &["echo", "beta", "balances", "svm", wallet_address],
                &[("chains", "solana".to_string())],
            )
            .await?;
        let response: BalancesResponse = serde_json::from_value(body)?;
        project(response.balances)
    }
}
