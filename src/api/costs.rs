use std::time::Duration;

use axum::{extract::State, Json};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::ApiResult;
use crate::ssh::{remote_path, sanitize_id};

use super::agents::agent_list;
use super::extract::ApiQuery;
use super::gateway_config::load_config;
use super::state::AppState;

const COST_TIMEOUT: Duration = Duration::from_secs(60);

/// Aggregates cost-bearing transcript lines into totals per model and day.
const COST_JQ: &str = r#"[.[] | select(.message.usage.cost.total > 0)] |
{
  total: ([.[].message.usage.cost.total] | add // 0),
  count: length,
  byModel: (group_by(.message.model) | map({
    model: .[0].message.model,
    cost: ([.[].message.usage.cost.total] | add),
    calls: length
  })),
  byDay: (group_by(.timestamp | split("T")[0]) | map({
    date: .[0].timestamp | split("T")[0],
    cost: ([.[].message.usage.cost.total] | add),
    calls: length
  }))
}"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCost {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub calls: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCost {
    pub date: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub calls: u64,
}

/// Output of [`COST_JQ`] for one agent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub by_model: Vec<ModelCost>,
    #[serde(default)]
    pub by_day: Vec<DayCost>,
}

impl CostSummary {
    /// Anything unparseable counts as zero spend.
    pub fn parse(stdout: &str) -> Self {
        serde_json::from_str(stdout.trim()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCost {
    pub id: String,
    pub name: String,
    pub total: f64,
    pub calls: u64,
    pub by_model: Vec<ModelCost>,
    pub by_day: Vec<DayCost>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostsResponse {
    pub agents: Vec<AgentCost>,
    pub daily: Vec<DayCost>,
    pub by_model: Vec<ModelCost>,
    pub total: f64,
}

/// Combine per-agent summaries: days ascending, models by cost descending.
pub fn merge_costs(agents: Vec<AgentCost>) -> CostsResponse {
    let mut daily: IndexMap<String, DayCost> = IndexMap::new();
    let mut models: IndexMap<Option<String>, ModelCost> = IndexMap::new();
    let mut total = 0.0;

    for agent in &agents {
        total += agent.total;
        for day in &agent.by_day {
            let entry = daily.entry(day.date.clone()).or_insert_with(|| DayCost {
                date: day.date.clone(),
                ..DayCost::default()
            });
            entry.cost += day.cost;
            entry.calls += day.calls;
        }
        for model in &agent.by_model {
            let entry = models.entry(model.model.clone()).or_insert_with(|| ModelCost {
                model: model.model.clone(),
                ..ModelCost::default()
            });
            entry.cost += model.cost;
            entry.calls += model.calls;
        }
    }

    let mut daily: Vec<DayCost> = daily.into_values().collect();
    daily.sort_by(|a, b| a.date.cmp(&b.date));
    let mut by_model: Vec<ModelCost> = models.into_values().collect();
    by_model.sort_by(|a, b| b.cost.total_cmp(&a.cost));

    CostsResponse {
        agents,
        daily,
        by_model,
        total,
    }
}

fn cost_command(sessions_dir: &str, days: u32) -> String {
    format!(
        "find {} -name \"*.jsonl\" -mtime -{days} -exec grep -h '\"cost\"' {{}} + 2>/dev/null | jq -s '{COST_JQ}' 2>/dev/null",
        remote_path(sessions_dir)
    )
}

#[derive(Debug, Deserialize)]
pub struct CostsQuery {
    pub days: Option<u32>,
}

#[instrument(skip(state))]
pub async fn get_costs(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CostsQuery>,
) -> ApiResult<Json<CostsResponse>> {
    let shell = state.shell()?;
    let days = query.days.unwrap_or(7);
    let config = load_config(&state).await?.value;

    let mut agents = Vec::new();
    for agent in agent_list(&config) {
        let id = sanitize_id(agent.get("id").and_then(Value::as_str).unwrap_or_default());
        if id.is_empty() {
            continue;
        }
        let name = agent
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(id.as_str())
            .to_string();

        let output = shell
            .exec(&cost_command(&state.paths().sessions_dir(&id), days), COST_TIMEOUT)
            .await?;
        let summary = CostSummary::parse(&output.stdout);
        debug!(agent = %id, total = summary.total, calls = summary.count, "agent costs");

        agents.push(AgentCost {
            id,
            name,
            total: summary.total,
            calls: summary.count,
            by_model: summary.by_model,
            by_day: summary.by_day,
        });
    }

    Ok(Json(merge_costs(agents)))
}
