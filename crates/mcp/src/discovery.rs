//! One-shot snapshot of what a server offers.

use tracing::debug;

use crate::error::McpError;
use crate::session::McpSession;
use crate::types::{PromptInfo, ResourceInfo, ResourceTemplateInfo, ToolInfo};

/// Everything a ready session advertised at discovery time. There is no
/// live update; rediscover to refresh.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub operations: Vec<ToolInfo>,
    pub resources: Vec<ResourceInfo>,
    pub templates: Vec<ResourceTemplateInfo>,
    pub prompts: Vec<PromptInfo>,
}

pub async fn discover(session: &McpSession) -> Result<Discovery, McpError> {
    let operations = session.list_operations().await?;
    let resources = session.list_resources().await?;
    let templates = session.list_resource_templates().await?;
    let prompts = session.list_prompts().await?;

    debug!(
        server = %session.name(),
        operations = operations.len(),
        resources = resources.len(),
        templates = templates.len(),
        prompts = prompts.len(),
        "Discovery complete"
    );

    Ok(Discovery {
        operations,
        resources,
        templates,
        prompts,
    })
}
