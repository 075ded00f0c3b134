use serde::Serialize;
use tracing::warn;

use crate::ai::InferenceClient;

/// The model selector's options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelChoices {
    /// Identifiers in server order; never empty.
    pub models: Vec<String>,
    /// Index into `models` of the preselected entry.
    pub selected: usize,
    /// Whether the server answered the listing request.
    pub reachable: bool,
    /// The server answered but offered no models.
    pub none_installed: bool,
}

impl ModelChoices {
    /// The single-option fallback used when the server cannot be listed.
    pub fn fallback(default_model: &str) -> Self {
        Self {
            models: vec![default_model.to_string()],
            selected: 0,
            reachable: false,
            none_installed: false,
        }
    }

    pub fn from_listing(models: Vec<String>, default_model: &str) -> Self {
        if models.is_empty() {
            return Self {
                reachable: true,
                none_installed: true,
                ..Self::fallback(default_model)
            };
        }

        let selected = models.iter().position(|m| m == default_model).unwrap_or(0);
        Self {
            models,
            selected,
            reachable: true,
            none_installed: false,
        }
    }

    pub fn selected_model(&self) -> &str {
        &self.models[self.selected]
    }

    /// Prefer `model` when the server offers it, keeping the current choice otherwise.
    pub fn prefer(mut self, model: &str) -> Self {
        if let Some(index) = self.models.iter().position(|m| m == model) {
            self.selected = index;
        }
        self
    }
}

/// List the server's models, degrading to `[default_model]` on any failure.
pub async fn list_models_or_default(client: &InferenceClient, default_model: &str) -> ModelChoices {
    match client.list_models().await {
        Ok(models) => ModelChoices::from_listing(models, default_model),
        Err(e) => {
            warn!(error = %e, default_model, "model listing failed, offering default model only");
            ModelChoices::fallback(default_model)
        }
    }
}
