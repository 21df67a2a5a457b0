//! Protocol server core: the MCP handler exposing the Dune tools.

mod tools;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Implementation, InitializeRequestParam,
        InitializeResult, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    ErrorData as McpError, RoleServer, ServerHandler,
};

use crate::dune::DuneClient;

pub use tools::{DuneTool, ToolError};

/// `serverInfo.name` reported on `initialize`.
pub const SERVER_NAME: &str = "dune-analytics-server";

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[ProtocolVersion] =
    &[ProtocolVersion::V_2025_03_26, ProtocolVersion::V_2024_11_05];

const INSTRUCTIONS: &str = "Dune Analytics data for DEX pairs, Solana wallets and EigenLayer AVSs.\n\n\
    Tools:\n\
    - get_dex_pair_metrics: metadata and statistics for a token pair on a chain\n\
    - get_token_pairs_liquidity: the pair with the most USD liquidity on a chain\n\
    - get_svm_token_balances: token balances of a Solana wallet\n\
    - get_eigenlayer_avs_metrics: stats for one AVS\n\
    - get_eigenlayer_operator_metrics: stats for every operator of one AVS\n";

/// MCP handler for the Dune tools. Cheap to clone; each session gets a copy.
#[derive(Debug, Clone)]
pub struct McpServer {
    client: DuneClient,
}

impl McpServer {
    /// Serve tools backed by `client`.
    pub fn new(client: DuneClient) -> Self {
        Self { client }
    }
}

/// The client's version when supported, otherwise the newest one.
fn negotiate_version(requested: &ProtocolVersion) -> ProtocolVersion {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|supported| *supported == requested)
        .unwrap_or(&SUPPORTED_PROTOCOL_VERSIONS[0])
        .clone()
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: SUPPORTED_PROTOCOL_VERSIONS[0].clone(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        let protocol_version = negotiate_version(&request.protocol_version);
        tracing::info!(
            requested = ?request.protocol_version,
            negotiated = ?protocol_version,
            client = %request.client_info.name,
            "client initialized"
        );
        Ok(InitializeResult {
            protocol_version,
            ..self.get_info()
        })
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: DuneTool::ALL.iter().map(|tool| tool.definition()).collect(),
            meta: Default::default(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let Some(tool) = DuneTool::from_name(&request.name) else {
            return Err(McpError::invalid_params(
                format!("Unknown tool: {}", request.name),
                None,
            ));
        };
        tracing::info!(tool = tool.name(), "calling tool");
        let arguments = request.arguments.unwrap_or_default();
        Ok(tool.call(&self.client, arguments).await?)
    }
}
