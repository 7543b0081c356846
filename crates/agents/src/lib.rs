use std::env;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tmpa_core::{
    normalize_text, ConversationState, FlowCatalog, FlowCommand, InboundMessage, OutboundMessage,
    RouteDecision, RouteMatch, RouterConfig, RuleKind, SlotChange, StepEmission, SupportBot,
};
use tmpa_observability::AppMetrics;
use tmpa_storage::{SlotRepository, StoredConversation};
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const ROUTER_CONFIG_ENV: &str = "TMPA_ROUTER_CONFIG";
/// Idle time after which a stored conversation may be dropped.
pub const DEFAULT_STATE_TTL_HOURS: i64 = 24 * 30;

/// Loads the routing tables from `TMPA_ROUTER_CONFIG` when set, otherwise the
/// built-in reference deployment.
pub fn load_router_config() -> Result<RouterConfig> {
    let config = match env::var(ROUTER_CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => RouterConfig::from_path(&path)
            .with_context(|| format!("failed loading router config from {}", path))?,
        _ => RouterConfig::default()
            .prepare()
            .context("built-in router config is invalid")?,
    };

    for flow_id in config.dangling_flow_triggers() {
        warn!(flow_id = %flow_id, "flow trigger references a flow with no steps");
    }

    Ok(config)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: Option<String>,
    pub text: String,
    pub intent: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub conversation_id: String,
    pub rule: RuleKind,
    pub decision: Option<RouteDecision>,
    pub command: Option<FlowCommand>,
    pub emission: Option<StepEmission>,
    pub messages: Vec<OutboundMessage>,
    pub slot_changes: Vec<SlotChange>,
    pub state: ConversationState,
}

#[derive(Clone)]
pub struct SupportAgent<S>
where
    S: SlotRepository,
{
    bot: Arc<SupportBot>,
    store: Arc<S>,
    metrics: Arc<AppMetrics>,
}

impl<S> SupportAgent<S>
where
    S: SlotRepository,
{
    pub fn new(config: RouterConfig, store: Arc<S>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            bot: Arc::new(SupportBot::new(config)),
            store,
            metrics,
        }
    }

    #[instrument(skip(self, request))]
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply> {
        let started = Instant::now();
        self.metrics.inc_turn();

        let conversation_id = request
            .conversation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut conversation = self
            .store
            .load_state(&conversation_id)
            .await
            .with_context(|| format!("failed loading slots for {}", conversation_id))?
            .unwrap_or_else(|| StoredConversation::fresh(&conversation_id));

        let inbound = InboundMessage {
            text: Some(request.text),
            intent: request.intent.filter(|name| !name.trim().is_empty()),
            lang: request.lang,
        };
        let outcome = self.bot.handle(&inbound, &mut conversation.state);

        if !outcome.slot_changes.is_empty() {
            conversation.updated_at = Utc::now();
            self.store
                .save_state(&conversation)
                .await
                .with_context(|| format!("failed saving slots for {}", conversation_id))?;
        }

        self.record(outcome.rule, outcome.emission.as_ref());
        self.metrics.observe_latency(started.elapsed());
        info!(
            conversation_id = %conversation_id,
            intent = ?inbound.intent,
            rule = outcome.rule.as_str(),
            decision = ?outcome.decision,
            active_flow = ?conversation.state.active_flow,
            step_index = conversation.state.step_index,
            slot_changes = outcome.slot_changes.len(),
            "turn handled"
        );

        Ok(TurnReply {
            conversation_id,
            rule: outcome.rule,
            decision: outcome.decision,
            command: outcome.command,
            emission: outcome.emission,
            messages: outcome.messages,
            slot_changes: outcome.slot_changes,
            state: conversation.state,
        })
    }

    /// Stateless routing decision for an utterance; nothing is emitted or saved.
    pub fn preview_route(&self, text: &str, intent: Option<&str>) -> Option<RouteMatch> {
        self.bot.router().classify(&normalize_text(text), intent)
    }

    pub fn flows(&self) -> &FlowCatalog {
        self.bot.engine().catalog()
    }

    pub fn metrics(&self) -> &AppMetrics {
        &self.metrics
    }

    pub async fn purge_idle(&self, idle_for: Duration) -> Result<u64> {
        self.store.purge_idle(Utc::now() - idle_for).await
    }

    fn record(&self, rule: RuleKind, emission: Option<&StepEmission>) {
        match (rule, emission) {
            (RuleKind::Fallback, _) => self.metrics.inc_fallback(),
            (RuleKind::Phrase | RuleKind::Token | RuleKind::Rescue, _) => {
                self.metrics.inc_faq_answer()
            }
            (RuleKind::Flow, Some(_)) => self.metrics.inc_flow_start(),
            (RuleKind::Command, Some(emission)) if emission.completed => {
                self.metrics.inc_flow_completion()
            }
            (RuleKind::Command, Some(_)) => self.metrics.inc_flow_step(),
            _ => {}
        }
    }
}
