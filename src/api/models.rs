use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::ApiResult;

use super::gateway_config::load_config;
use super::state::AppState;

pub const DEFAULT_PRIMARY_MODEL: &str = "anthropic/claude-sonnet-4-5";

/// Models every gateway knows without explicit provider config.
const BUILTIN_PROVIDERS: &[(&str, &[(&str, &str)])] = &[
    (
        "anthropic",
        &[
            ("anthropic/claude-opus-4-6", "Claude Opus 4.6"),
            ("anthropic/claude-opus-4-5", "Claude Opus 4.5"),
            ("anthropic/claude-sonnet-4-5", "Claude Sonnet 4.5"),
            ("anthropic/claude-haiku-4-5", "Claude Haiku 4.5"),
        ],
    ),
    (
        "openai",
        &[
            ("openai/gpt-4.1", "GPT-4.1"),
            ("openai/gpt-4.1-mini", "GPT-4.1 Mini"),
            ("openai/o3", "o3"),
            ("openai/o4-mini", "o4-mini"),
        ],
    ),
    (
        "google",
        &[
            ("google/gemini-2.5-pro", "Gemini 2.5 Pro"),
            ("google/gemini-2.5-flash", "Gemini 2.5 Flash"),
        ],
    ),
    (
        "perplexity",
        &[
            ("perplexity/sonar-pro", "Sonar Pro"),
            ("perplexity/sonar", "Sonar"),
        ],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasEntry {
    pub id: String,
    pub name: String,
    pub resolves: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsOverview {
    pub primary_model: String,
    pub fallbacks: Vec<String>,
    pub builtin: Vec<ModelEntry>,
    pub custom: Vec<ModelEntry>,
    pub aliases: Vec<AliasEntry>,
}

fn provider_of(model: &str) -> &str {
    model.split('/').next().unwrap_or_default()
}

pub fn models_overview(config: &Value) -> ModelsOverview {
    let default_model = config.pointer("/agents/defaults/model");
    let primary_model = match default_model {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(m) => m
            .get("primary")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_PRIMARY_MODEL)
            .to_string(),
        None => DEFAULT_PRIMARY_MODEL.to_string(),
    };
    let fallbacks: Vec<String> = default_model
        .and_then(|m| m.get("fallbacks"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let aliases: Vec<AliasEntry> = config
        .get("aliases")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(alias, target)| {
                    Some(AliasEntry {
                        id: alias.clone(),
                        name: alias.clone(),
                        resolves: target.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let referenced: Vec<&str> = std::iter::once(primary_model.as_str())
        .chain(fallbacks.iter().map(String::as_str))
        .chain(aliases.iter().map(|a| a.resolves.as_str()))
        .map(provider_of)
        .collect();

    let builtin = BUILTIN_PROVIDERS
        .iter()
        .filter(|(provider, _)| referenced.contains(provider))
        .flat_map(|(provider, models)| {
            models.iter().map(move |(id, name)| ModelEntry {
                id: (*id).to_string(),
                name: (*name).to_string(),
                provider: (*provider).to_string(),
            })
        })
        .collect();

    let mut custom = Vec::new();
    if let Some(providers) = config.pointer("/models/providers").and_then(Value::as_object) {
        for (provider, data) in providers {
            let models = data.get("models").and_then(Value::as_array);
            for model in models.into_iter().flatten() {
                let Some(id) = model.get("id").and_then(Value::as_str) else {
                    continue;
                };
                custom.push(ModelEntry {
                    id: format!("{provider}/{id}"),
                    name: model
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(id)
                        .to_string(),
                    provider: provider.clone(),
                });
            }
        }
    }

    ModelsOverview {
        primary_model,
        fallbacks,
        builtin,
        custom,
        aliases,
    }
}

#[instrument(skip(state))]
pub async fn get_models(State(state): State<AppState>) -> ApiResult<Json<ModelsOverview>> {
    let config = load_config(&state).await?.value;
    Ok(Json(models_overview(&config)))
}
