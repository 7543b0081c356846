use std::sync::Arc;

use crate::config::{FlowCatalog, FlowDefinition};
use crate::models::{ConversationState, OutboundMessage, StepEmission, StepMetadata};

pub const FLOW_NOT_CONFIGURED: &str = "Flow not configured.";
pub const NO_ACTIVE_FLOW: &str = "No active flow.";
pub const COMPLETION_TEMPLATE: &str = "utter_done_end";

/// Result of one flow engine transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub emission: Option<StepEmission>,
    pub messages: Vec<OutboundMessage>,
}

impl Transition {
    fn notice(text: &str) -> Self {
        Self {
            emission: None,
            messages: vec![OutboundMessage::text(text)],
        }
    }

    fn emitted(emission: StepEmission, content: OutboundMessage) -> Self {
        let metadata = OutboundMessage::Metadata(StepMetadata::from(&emission));
        Self {
            messages: vec![content, metadata],
            emission: Some(emission),
        }
    }
}

/// Steps a conversation through the guided flows of a catalog.
///
/// The engine holds no per-conversation data; every transition mutates the
/// caller's [`ConversationState`].
#[derive(Debug, Clone)]
pub struct FlowEngine {
    catalog: Arc<FlowCatalog>,
}

impl FlowEngine {
    pub fn new(catalog: Arc<FlowCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &FlowCatalog {
        &self.catalog
    }

    pub fn start(&self, state: &mut ConversationState, flow_id: &str, lang: &str) -> Transition {
        self.emit_step(state, flow_id, 0, lang)
    }

    pub fn advance(&self, state: &mut ConversationState) -> Transition {
        let Some(flow_id) = state.active_flow.clone() else {
            return Transition::notice(NO_ACTIVE_FLOW);
        };
        let Some(flow) = self.catalog.get(&flow_id) else {
            return Transition::notice(FLOW_NOT_CONFIGURED);
        };

        let last = flow.last_index();
        if state.step_index >= last {
            // Completion reports the last real step; the stored slots stay as they are.
            let emission = StepEmission {
                step_index: last,
                total_steps: flow.total_steps(),
                completed: true,
                content: COMPLETION_TEMPLATE.to_string(),
            };
            return Transition::emitted(emission, OutboundMessage::template(COMPLETION_TEMPLATE));
        }

        let next = (state.step_index + 1).min(last);
        let lang = state.lang.clone();
        self.emit_step(state, &flow_id, next, &lang)
    }

    pub fn retreat(&self, state: &mut ConversationState) -> Transition {
        let Some(flow_id) = state.active_flow.clone() else {
            return Transition::notice(NO_ACTIVE_FLOW);
        };

        let previous = state.step_index.saturating_sub(1);
        let lang = state.lang.clone();
        self.emit_step(state, &flow_id, previous, &lang)
    }

    /// Silent: clears the flow slots and emits nothing.
    pub fn reset(&self, state: &mut ConversationState) -> Transition {
        state.active_flow = None;
        state.step_index = 0;
        Transition::default()
    }

    fn emit_step(
        &self,
        state: &mut ConversationState,
        flow_id: &str,
        step_index: usize,
        lang: &str,
    ) -> Transition {
        let Some(flow) = self.catalog.get(flow_id) else {
            return Transition::notice(FLOW_NOT_CONFIGURED);
        };

        let emission = step_emission(flow, step_index);
        state.lang = lang.to_string();
        state.active_flow = Some(flow.id.clone());
        state.step_index = emission.step_index;

        let content = OutboundMessage::template(emission.content.clone());
        Transition::emitted(emission, content)
    }
}

fn step_emission(flow: &FlowDefinition, requested: usize) -> StepEmission {
    let step_index = requested.min(flow.last_index());
    StepEmission {
        step_index,
        total_steps: flow.total_steps(),
        completed: false,
        content: flow.steps[step_index].clone(),
    }
}
