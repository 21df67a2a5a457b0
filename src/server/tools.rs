//! The Dune tools: their advertised definitions and how a call is executed.

use std::{fmt::Display, sync::Arc};

use rmcp::{
    model::{CallToolResult, Content, JsonObject, Tool},
    ErrorData as McpError,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dune::DuneClient;

/// Why a tool call could not run at all.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: &'static str,
        source: serde_json::Error,
    },
    #[error("failed to encode tool output: {0}")]
    Encode(serde_json::Error),
}

impl From<ToolError> for McpError {
    fn from(error: ToolError) -> Self {
        match &error {
            ToolError::InvalidArguments { .. } => McpError::invalid_params(error.to_string(), None),
            ToolError::Encode(_) => McpError::internal_error(error.to_string(), None),
        }
    }
}

/// The five Dune tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuneTool {
    DexPairMetrics,
    TokenPairsLiquidity,
    SvmTokenBalances,
    EigenlayerAvsMetrics,
    EigenlayerOperatorMetrics,
}

#[derive(Deserialize)]
struct DexPairArgs {
    chain: String,
    token_pair: String,
}

#[derive(Deserialize)]
struct ChainArgs {
    chain: String,
}

#[derive(Deserialize)]
struct WalletArgs {
    wallet_address: String,
}

#[derive(Deserialize)]
struct AvsArgs {
    avs_name: String,
}

#[derive(Serialize)]
struct MetricsReport<'a, T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    avs_name: Option<&'a str>,
    metrics: Vec<T>,
}

/// Object schema whose properties are all required strings.
fn string_schema(properties: &[(&str, &str)]) -> JsonObject {
    let props: JsonObject = properties
        .iter()
        .map(|(name, description)| {
            (
                name.to_string(),
                json!({"type": "string", "description": description}),
            )
        })
        .collect();
    let required: Vec<&str> = properties.iter().map(|(name, _)| *name).collect();

    let mut schema = JsonObject::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(props));
    schema.insert("required".into(), json!(required));
    schema
}

impl DuneTool {
    /// Every tool, in `tools/list` order.
    pub const ALL: [DuneTool; 5] = [
        DuneTool::DexPairMetrics,
        DuneTool::TokenPairsLiquidity,
        DuneTool::SvmTokenBalances,
        DuneTool::EigenlayerAvsMetrics,
        DuneTool::EigenlayerOperatorMetrics,
    ];

    /// Name clients call the tool by.
    pub fn name(self) -> &'static str {
        match self {
            DuneTool::DexPairMetrics => "get_dex_pair_metrics",
            DuneTool::TokenPairsLiquidity => "get_token_pairs_liquidity",
            DuneTool::SvmTokenBalances => "get_svm_token_balances",
            DuneTool::EigenlayerAvsMetrics => "get_eigenlayer_avs_metrics",
            DuneTool::EigenlayerOperatorMetrics => "get_eigenlayer_operator_metrics",
        }
    }

    /// Inverse of [`DuneTool::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            DuneTool::DexPairMetrics => {
                "Given a blockchain, retrieves essential metadata and statistical data for a given token pair"
            }
            DuneTool::TokenPairsLiquidity => {
                "Identify the token pair with the highest USD liquidity on a given chain"
            }
            DuneTool::SvmTokenBalances => {
                "Get the balances of a specific wallet address on the Solana blockchain"
            }
            DuneTool::EigenlayerAvsMetrics => "Get the stats for a specific AVS",
            DuneTool::EigenlayerOperatorMetrics => {
                "Get the stats for all operators in a specific AVS"
            }
        }
    }

    fn input_schema(self) -> JsonObject {
        match self {
            DuneTool::DexPairMetrics => string_schema(&[
                ("chain", "The chain to get the DEX stats for"),
                ("token_pair", "The token pair to get the DEX stats for"),
            ]),
            DuneTool::TokenPairsLiquidity => {
                string_schema(&[("chain", "The chain to get the DEX stats for")])
            }
            DuneTool::SvmTokenBalances => string_schema(&[(
                "wallet_address",
                "The address of the wallet to get the balance for",
            )]),
            DuneTool::EigenlayerAvsMetrics => {
                string_schema(&[("avs_name", "The name of the AVS to get the stats for")])
            }
            DuneTool::EigenlayerOperatorMetrics => string_schema(&[(
                "avs_name",
                "The name of the AVS to get operator stats for",
            )]),
        }
    }

    /// The `tools/list` entry for this tool.
    pub fn definition(self) -> Tool {
        Tool::new(self.name(), self.description(), Arc::new(self.input_schema()))
    }

    fn args<T: DeserializeOwned>(self, arguments: JsonObject) -> Result<T, ToolError> {
        serde_json::from_value(Value::Object(arguments)).map_err(|source| {
            ToolError::InvalidArguments {
                tool: self.name(),
                source,
            }
        })
    }

    /// Run the tool. `Err` is reserved for malformed arguments and encoding
    /// failures; data-source failures come back as an error result.
    pub async fn call(
        self,
        client: &DuneClient,
        arguments: JsonObject,
    ) -> Result<CallToolResult, ToolError> {
        match self {
            DuneTool::DexPairMetrics => {
                let DexPairArgs { chain, token_pair } = self.args(arguments)?;
                report(None, client.dex_pair_metrics(&chain, &token_pair).await)
            }
            DuneTool::TokenPairsLiquidity => {
                let ChainArgs { chain } = self.args(arguments)?;
                report(None, client.top_token_pairs(&chain).await)
            }
            DuneTool::SvmTokenBalances => {
                let WalletArgs { wallet_address } = self.args(arguments)?;
                report(None, client.svm_token_balances(&wallet_address).await)
            }
            DuneTool::EigenlayerAvsMetrics => {
                let AvsArgs { avs_name } = self.args(arguments)?;
                report(None, client.avs_metrics(&avs_name).await)
            }
            DuneTool::EigenlayerOperatorMetrics => {
                let AvsArgs { avs_name } = self.args(arguments)?;
                let metrics = client.operator_metrics(&avs_name).await;
                report(Some(&avs_name), metrics)
            }
        }
    }
}

fn report<T: Serialize, E: Display>(
    avs_name: Option<&str>,
    fetched: Result<Vec<T>, E>,
) -> Result<CallToolResult, ToolError> {
    match fetched {
        Ok(metrics) => {
            let text = serde_json::to_string_pretty(&MetricsReport { avs_name, metrics })
                .map_err(ToolError::Encode)?;
            Ok(CallToolResult::success(vec![Content::text(text)]))
        }
        Err(error) => {
            tracing::warn!(%error, "tool fetch failed");
            let prefix = if avs_name.is_some() {
                "Error fetching operator metrics"
            } else {
                "Error fetching metrics"
            };
            Ok(CallToolResult::error(vec![Content::text(format!(
                "{prefix}: {error}"
            ))]))
        }
    }
}
