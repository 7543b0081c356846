use std::sync::Arc;

use crate::config::RouterConfig;
use crate::flow::{FlowEngine, Transition};
use crate::intent::{normalize_optional, parse_flow_command};
use crate::models::{
    ConversationState, FlowCommand, InboundMessage, OutboundMessage, RouteDecision, RuleKind,
    TurnOutcome,
};
use crate::router::KeywordRouter;

pub const FALLBACK_TEXT: &str = "I didn’t recognize the request. Try a quick action on the left.";

/// Handles one inbound message against the caller's conversation state.
///
/// Flow commands go straight to the [`FlowEngine`]; everything else is routed
/// by keyword. A flow-start decision always emits step 0 of that flow.
#[derive(Debug, Clone)]
pub struct SupportBot {
    router: KeywordRouter,
    engine: FlowEngine,
}

impl SupportBot {
    /// `config` must have gone through [`RouterConfig::prepare`].
    pub fn new(config: RouterConfig) -> Self {
        Self {
            router: KeywordRouter::new(&config.keywords),
            engine: FlowEngine::new(Arc::new(config.flows)),
        }
    }

    pub fn router(&self) -> &KeywordRouter {
        &self.router
    }

    pub fn engine(&self) -> &FlowEngine {
        &self.engine
    }

    pub fn handle(&self, inbound: &InboundMessage, state: &mut ConversationState) -> TurnOutcome {
        // The client language is not a slot change of its own; it is stored
        // with whatever the turn does next.
        if let Some(lang) = client_lang(inbound.lang.as_deref()) {
            state.lang = lang;
        }
        let before = state.clone();
        let text = normalize_optional(inbound.text.as_deref());
        let intent = inbound.intent.as_deref();

        let mut outcome = match parse_flow_command(intent, &text) {
            Some(command) => self.run_command(command, state),
            None => self.route(&text, intent, state),
        };

        outcome.slot_changes = state.diff(&before);
        outcome
    }

    fn run_command(&self, command: FlowCommand, state: &mut ConversationState) -> TurnOutcome {
        let transition = match command {
            FlowCommand::Next => self.engine.advance(state),
            FlowCommand::Back => self.engine.retreat(state),
            FlowCommand::Reset => self.engine.reset(state),
        };
        outcome(RuleKind::Command, None, Some(command), transition)
    }

    fn route(&self, text: &str, intent: Option<&str>, state: &mut ConversationState) -> TurnOutcome {
        let Some(found) = self.router.classify(text, intent) else {
            let transition = Transition {
                emission: None,
                messages: vec![OutboundMessage::text(FALLBACK_TEXT)],
            };
            return outcome(
                RuleKind::Fallback,
                Some(RouteDecision::Unrecognized),
                None,
                transition,
            );
        };

        let transition = match &found.decision {
            RouteDecision::FaqAnswer(topic) => Transition {
                emission: None,
                messages: vec![OutboundMessage::template(topic.template_key())],
            },
            RouteDecision::FlowStart(flow_id) => {
                let lang = state.lang.clone();
                self.engine.start(state, flow_id, &lang)
            }
            RouteDecision::Unrecognized => Transition::default(),
        };

        outcome(found.rule, Some(found.decision), None, transition)
    }
}

impl Default for SupportBot {
    fn default() -> Self {
        Self {
            router: KeywordRouter::default(),
            engine: FlowEngine::new(Arc::default()),
        }
    }
}

fn client_lang(lang: Option<&str>) -> Option<String> {
    lang.map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_ascii_uppercase)
}

fn outcome(
    rule: RuleKind,
    decision: Option<RouteDecision>,
    command: Option<FlowCommand>,
    transition: Transition,
) -> TurnOutcome {
    TurnOutcome {
        rule,
        decision,
        command,
        emission: transition.emission,
        messages: transition.messages,
        slot_changes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FaqTopic, SlotName, StepMetadata};
    use serde_json::json;

    fn turn(bot: &SupportBot, state: &mut ConversationState, text: &str) -> TurnOutcome {
        bot.handle(&InboundMessage::new(text), state)
    }

    #[test]
    fn faq_answer_does_not_touch_state() {
        let bot = SupportBot::default();
        let mut state = ConversationState::default();
        let outcome = turn(&bot, &mut state, "Voir mes factures");

        assert_eq!(
            outcome.decision,
            Some(RouteDecision::FaqAnswer(FaqTopic::InvoicesStatus))
        );
        assert_eq!(
            outcome.messages,
            vec![OutboundMessage::template("utter_faq/invoices_status")]
        );
        assert!(outcome.slot_changes.is_empty());
    }

    #[test]
    fn flow_start_emits_step_zero_and_slots() {
        let bot = SupportBot::default();
        let mut state = ConversationState::default();
        let outcome = turn(&bot, &mut state, "devenir fournisseur");

        assert_eq!(outcome.rule, RuleKind::Flow);
        let emission = outcome.emission.unwrap();
        assert_eq!((emission.step_index, emission.total_steps), (0, 7));
        assert_eq!(
            outcome.messages[1],
            OutboundMessage::Metadata(StepMetadata {
                step_index: 0,
                total_steps: 7,
                completed: None,
            })
        );
        assert_eq!(outcome.slot_changes.len(), 1);
        assert_eq!(outcome.slot_changes[0].slot, SlotName::ActiveFlow);
        assert_eq!(outcome.slot_changes[0].value, json!("supplier_registration"));
    }

    #[test]
    fn commands_drive_the_active_flow() {
        let bot = SupportBot::default();
        let mut state = ConversationState::default();
        turn(&bot, &mut state, "forgot password");

        let next = turn(&bot, &mut state, "next");
        assert_eq!(next.command, Some(FlowCommand::Next));
        assert_eq!(next.emission.unwrap().step_index, 1);

        let back = bot.handle(
            &InboundMessage::new("whatever").with_intent("back_step"),
            &mut state,
        );
        assert_eq!(back.emission.unwrap().step_index, 0);

        let reset = turn(&bot, &mut state, "/reset_flow");
        assert!(reset.messages.is_empty());
        assert!(state.is_idle());
        assert_eq!(reset.slot_changes[0].slot, SlotName::ActiveFlow);
    }

    #[test]
    fn fallback_keeps_state() {
        let bot = SupportBot::default();
        let mut state = ConversationState {
            active_flow: Some("work_confirmation".to_string()),
            step_index: 2,
            lang: "FR".to_string(),
        };
        let snapshot = state.clone();
        let outcome = turn(&bot, &mut state, "hello there");

        assert_eq!(outcome.rule, RuleKind::Fallback);
        assert_eq!(outcome.messages, vec![OutboundMessage::text(FALLBACK_TEXT)]);
        assert_eq!(state, snapshot);
    }

    #[test]
    fn missing_text_falls_back() {
        let bot = SupportBot::default();
        let mut state = ConversationState::default();
        let outcome = bot.handle(
            &InboundMessage {
                text: None,
                intent: None,
                lang: None,
            },
            &mut state,
        );
        assert_eq!(outcome.decision, Some(RouteDecision::Unrecognized));
    }

    #[test]
    fn client_lang_is_carried_through_flow_steps() {
        let bot = SupportBot::default();
        let mut state = ConversationState::default();

        let start = bot.handle(
            &InboundMessage::new("mot de passe oublié").with_lang("fr"),
            &mut state,
        );
        assert_eq!(start.rule, RuleKind::Flow);
        assert_eq!(state.lang, "FR");
        assert!(start
            .slot_changes
            .iter()
            .all(|change| change.slot != SlotName::Lang));

        let next = turn(&bot, &mut state, "suivant");
        assert_eq!(next.emission.unwrap().step_index, 1);
        assert_eq!(state.lang, "FR");

        bot.handle(&InboundMessage::new("back").with_lang("EN"), &mut state);
        assert_eq!(state.lang, "EN");
        assert_eq!(state.step_index, 0);
    }

    #[test]
    fn fallback_text_matches_client_copy() {
        assert_eq!(
            FALLBACK_TEXT,
            "I didn’t recognize the request. Try a quick action on the left."
        );
    }
}
