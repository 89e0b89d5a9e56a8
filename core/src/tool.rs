use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named or anonymous unit of instructions the engine can execute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub instructions: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export: Vec<String>,

    /// JSON schema describing the tool's arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_tool: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub chat: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub json_response: bool,
}

impl Tool {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_global_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_arguments(mut self, schema: Value) -> Self {
        self.arguments = Some(schema);
        self
    }

    pub fn with_sub_tool(mut self, sub_tool: impl Into<String>) -> Self {
        self.sub_tool = Some(sub_tool.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_name = Some(model.into());
        self
    }

    pub fn chat(mut self, chat: bool) -> Self {
        self.chat = chat;
        self
    }
}

/// Ordered tool definitions submitted together. The first one is the entry
/// point unless `RunOptions::sub_tool` names another.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSet(Vec<Tool>);

impl ToolSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

}

impl From<Tool> for ToolSet {
    fn from(tool: Tool) -> Self {
        Self(vec![tool])
    }
}

impl From<Vec<Tool>> for ToolSet {
    fn from(tools: Vec<Tool>) -> Self {
        Self(tools)
    }
}

impl FromIterator<Tool> for ToolSet {
    fn from_iter<I: IntoIterator<Item = Tool>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
