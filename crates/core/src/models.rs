use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_LANG: &str = "EN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaqTopic {
    InvoicesStatus,
    PaymentStatus,
    InvoiceHolds,
}

impl FaqTopic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvoicesStatus => "invoices_status",
            Self::PaymentStatus => "payment_status",
            Self::InvoiceHolds => "invoice_holds",
        }
    }

    pub fn template_key(self) -> String {
        format!("utter_faq/{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum RouteDecision {
    FaqAnswer(FaqTopic),
    FlowStart(String),
    Unrecognized,
}

/// Which tier of the routing pipeline produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Phrase,
    Token,
    Rescue,
    Flow,
    Command,
    Fallback,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phrase => "phrase",
            Self::Token => "token",
            Self::Rescue => "rescue",
            Self::Flow => "flow",
            Self::Command => "command",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCommand {
    Next,
    Back,
    Reset,
}

/// Per-conversation slots. Owned by the caller and mutated by the flow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub active_flow: Option<String>,
    #[serde(default)]
    pub step_index: usize,
    #[serde(default = "default_lang")]
    pub lang: String,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            active_flow: None,
            step_index: 0,
            lang: DEFAULT_LANG.to_string(),
        }
    }
}

impl ConversationState {
    pub fn is_idle(&self) -> bool {
        self.active_flow.is_none()
    }

    /// Slot writes needed to turn `before` into `self`, in the order the
    /// flow engine sets them.
    pub fn diff(&self, before: &ConversationState) -> Vec<SlotChange> {
        let mut changes = Vec::new();
        if self.lang != before.lang {
            changes.push(SlotChange::new(SlotName::Lang, json!(self.lang)));
        }
        if self.active_flow != before.active_flow {
            changes.push(SlotChange::new(SlotName::ActiveFlow, json!(self.active_flow)));
        }
        if self.step_index != before.step_index {
            changes.push(SlotChange::new(SlotName::StepIndex, json!(self.step_index)));
        }
        changes
    }
}

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotName {
    Lang,
    ActiveFlow,
    StepIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotChange {
    pub slot: SlotName,
    pub value: Value,
}

impl SlotChange {
    pub fn new(slot: SlotName, value: Value) -> Self {
        Self { slot, value }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEmission {
    pub step_index: usize,
    pub total_steps: usize,
    pub completed: bool,
    pub content: String,
}

/// Machine-readable progress payload sent after step content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub step_index: usize,
    pub total_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

impl From<&StepEmission> for StepMetadata {
    fn from(emission: &StepEmission) -> Self {
        Self {
            step_index: emission.step_index,
            total_steps: emission.total_steps,
            completed: emission.completed.then_some(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A response template rendered by the messaging layer.
    Template { key: String },
    Text { text: String },
    Metadata(StepMetadata),
}

impl OutboundMessage {
    pub fn template(key: impl Into<String>) -> Self {
        Self::Template { key: key.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: Option<String>,
    pub intent: Option<String>,
    /// Client UI language (`EN`, `FR`); the stored `lang` slot is kept when absent.
    #[serde(default)]
    pub lang: Option<String>,
}

impl InboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            intent: None,
            lang: None,
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }
}

/// Everything one inbound message produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub rule: RuleKind,
    pub decision: Option<RouteDecision>,
    pub command: Option<FlowCommand>,
    pub emission: Option<StepEmission>,
    pub messages: Vec<OutboundMessage>,
    pub slot_changes: Vec<SlotChange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_lists_only_changed_slots() {
        let before = ConversationState::default();
        let after = ConversationState {
            active_flow: Some("forgot_password".to_string()),
            step_index: 0,
            lang: "EN".to_string(),
        };

        let changes = after.diff(&before);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].slot, SlotName::ActiveFlow);
        assert_eq!(changes[0].value, json!("forgot_password"));
    }

    #[test]
    fn metadata_omits_completed_until_the_end() {
        let emission = StepEmission {
            step_index: 1,
            total_steps: 4,
            completed: false,
            content: "utter_fp_step_2".to_string(),
        };
        let payload = serde_json::to_value(StepMetadata::from(&emission)).unwrap();
        assert_eq!(payload, json!({ "step_index": 1, "total_steps": 4 }));
    }
}
