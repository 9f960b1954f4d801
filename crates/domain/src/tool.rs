use serde::{Deserialize, Serialize};

/// Tool definition exposed to the LLM orchestrator.
///
/// This is the agent-facing shape: the manager converts each discovered
/// MCP tool into one of these, with the parameter schema already
/// sanitized for the agent's function-calling dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_schema() {
        let def = ToolDefinition {
            name: "get_weather".into(),
            description: "Fetch the current weather".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "city": { "type": "string" } }
            }),
        };
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains("\"name\":\"get_weather\""));
        assert!(json.contains("\"parameters\""));
    }
}
