//! First-match-wins keyword routing over normalized text.
//!
//! Rules are built from a [`KeywordTable`] in priority order: exact phrases,
//! token conjunctions, intent rescue, then guided-flow triggers. The table is
//! data; the evaluation below never looks at specific words.

use crate::config::{KeywordTable, RescueCandidate};
use crate::intent::contains_any;
use crate::models::{FaqTopic, RouteDecision, RuleKind};

#[derive(Debug, Clone)]
enum Rule {
    Phrase {
        topic: FaqTopic,
        phrases: Vec<String>,
    },
    Tokens {
        topic: FaqTopic,
        subjects: Vec<String>,
        qualifiers: Vec<String>,
    },
    Rescue {
        intents: Vec<String>,
        candidates: Vec<RescueCandidate>,
    },
    Flow {
        flow_id: String,
        phrases: Vec<String>,
    },
}

impl Rule {
    fn kind(&self) -> RuleKind {
        match self {
            Rule::Phrase { .. } => RuleKind::Phrase,
            Rule::Tokens { .. } => RuleKind::Token,
            Rule::Rescue { .. } => RuleKind::Rescue,
            Rule::Flow { .. } => RuleKind::Flow,
        }
    }

    fn evaluate(&self, text: &str, intent: Option<&str>) -> Option<RouteDecision> {
        match self {
            Rule::Phrase { topic, phrases } => {
                contains_any(text, phrases).then_some(RouteDecision::FaqAnswer(*topic))
            }
            Rule::Tokens {
                topic,
                subjects,
                qualifiers,
            } => (contains_any(text, subjects) && contains_any(text, qualifiers))
                .then_some(RouteDecision::FaqAnswer(*topic)),
            Rule::Rescue {
                intents,
                candidates,
            } => {
                let intent = intent?;
                if !intents.iter().any(|known| known == intent) {
                    return None;
                }
                candidates
                    .iter()
                    .find(|candidate| contains_any(text, &candidate.tokens))
                    .map(|candidate| RouteDecision::FaqAnswer(candidate.topic))
            }
            Rule::Flow { flow_id, phrases } => {
                contains_any(text, phrases).then(|| RouteDecision::FlowStart(flow_id.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub decision: RouteDecision,
    pub rule: RuleKind,
}

#[derive(Debug, Clone)]
pub struct KeywordRouter {
    rules: Vec<Rule>,
}

impl KeywordRouter {
    /// `table` is expected to be normalized already (see
    /// [`KeywordTable::normalized`]).
    pub fn new(table: &KeywordTable) -> Self {
        let mut rules = Vec::new();

        rules.extend(table.phrases.iter().map(|trigger| Rule::Phrase {
            topic: trigger.topic,
            phrases: trigger.phrases.clone(),
        }));
        rules.extend(table.token_rules.iter().map(|rule| Rule::Tokens {
            topic: rule.topic,
            subjects: rule.subjects.clone(),
            qualifiers: rule.qualifiers.clone(),
        }));
        if !table.rescue.intents.is_empty() {
            rules.push(Rule::Rescue {
                intents: table.rescue.intents.clone(),
                candidates: table.rescue.candidates.clone(),
            });
        }
        rules.extend(table.flow_triggers.iter().map(|trigger| Rule::Flow {
            flow_id: trigger.flow_id.clone(),
            phrases: trigger.phrases.clone(),
        }));

        Self { rules }
    }

    /// The first matching rule, or `None` when the caller should fall back.
    pub fn classify(&self, text: &str, intent: Option<&str>) -> Option<RouteMatch> {
        let intent = intent.map(str::trim).filter(|name| !name.is_empty());
        self.rules.iter().find_map(|rule| {
            rule.evaluate(text, intent).map(|decision| RouteMatch {
                decision,
                rule: rule.kind(),
            })
        })
    }

    /// Total routing function over normalized text. The language does not
    /// influence matching; keyword lists carry both English and French.
    pub fn route(&self, text: &str, intent: Option<&str>, _lang: &str) -> RouteDecision {
        self.classify(text, intent)
            .map(|found| found.decision)
            .unwrap_or(RouteDecision::Unrecognized)
    }
}

impl Default for KeywordRouter {
    fn default() -> Self {
        Self::new(&KeywordTable::default().normalized())
    }
}
