use serde::Deserialize;

/// A user-selectable completion model
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Short name shown to users and used as callback payload
    pub alias: String,
    /// Backend routing slug
    pub slug: String,
    /// Button caption; the alias is used when empty
    #[serde(default)]
    pub label: String,
}

impl ModelDescriptor {
    pub fn new(alias: &str, slug: &str, label: &str) -> Self {
        Self {
            alias: alias.to_string(),
            slug: slug.to_string(),
            label: label.to_string(),
        }
    }

    pub fn button_label(&self) -> &str {
        if self.label.is_empty() {
            &self.alias
        } else {
            &self.label
        }
    }
}

/// Fixed alias -> backend mapping, in display order
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ModelDescriptor::new("GLM", "glm", "🤖 GLM-4"),
            ModelDescriptor::new("DeepSeek", "deepseek", "🧠 DeepSeek"),
            ModelDescriptor::new("Qwen", "qwen", "👁️ Qwen"),
            ModelDescriptor::new("Kimi", "kimi", "🌙 Kimi"),
        ])
    }

    pub fn get(&self, alias: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.alias == alias)
    }

    /// Resolve a user's selection, falling back to `default_alias` when the
    /// selection is absent or no longer registered.
    pub fn resolve(&self, selected: Option<&str>, default_alias: &str) -> Option<&ModelDescriptor> {
        selected
            .and_then(|alias| self.get(alias))
            .or_else(|| self.get(default_alias))
    }

    pub fn aliases(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.alias.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }
}
