use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::normalize_text;
use crate::models::FaqTopic;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed reading router config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid router config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("flow `{0}` has no steps")]
    EmptyFlow(String),
    #[error("flow `{0}` is defined more than once")]
    DuplicateFlow(String),
    #[error("empty keyword in {0}")]
    EmptyKeyword(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    pub steps: Vec<String>,
}

impl FlowDefinition {
    pub fn new(id: &str, steps: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            steps: steps.iter().map(|step| step.to_string()).collect(),
        }
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn last_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowCatalog {
    flows: Vec<FlowDefinition>,
}

impl FlowCatalog {
    pub fn new(flows: Vec<FlowDefinition>) -> Self {
        Self { flows }
    }

    /// Returns the flow only when it has at least one step.
    pub fn get(&self, flow_id: &str) -> Option<&FlowDefinition> {
        self.flows
            .iter()
            .find(|flow| flow.id == flow_id && !flow.steps.is_empty())
    }

    pub fn flows(&self) -> &[FlowDefinition] {
        &self.flows
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl Default for FlowCatalog {
    fn default() -> Self {
        Self::new(vec![
            FlowDefinition::new(
                "supplier_registration",
                &[
                    "utter_sr_step_1",
                    "utter_sr_step_2",
                    "utter_sr_step_3",
                    "utter_sr_step_4",
                    "utter_sr_step_5",
                    "utter_sr_step_6",
                    "utter_sr_step_7",
                ],
            ),
            FlowDefinition::new(
                "forgot_password",
                &[
                    "utter_fp_step_1",
                    "utter_fp_step_2",
                    "utter_fp_step_3",
                    "utter_fp_step_4",
                ],
            ),
            FlowDefinition::new(
                "work_confirmation",
                &[
                    "utter_wc_step_1",
                    "utter_wc_step_2",
                    "utter_wc_step_3",
                    "utter_wc_step_4",
                ],
            ),
            FlowDefinition::new(
                "invoice_creation",
                &[
                    "utter_inv_step_1",
                    "utter_inv_step_2",
                    "utter_inv_step_3",
                    "utter_inv_step_4",
                    "utter_inv_step_5",
                    "utter_inv_step_6",
                ],
            ),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseTrigger {
    pub topic: FaqTopic,
    pub phrases: Vec<String>,
}

/// Both groups must contribute at least one hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConjunction {
    pub topic: FaqTopic,
    pub subjects: Vec<String>,
    pub qualifiers: Vec<String>,
}

/// Intents known to swallow invoice/payment questions, and the tokens that
/// pull them back out. Candidates are tried in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRescue {
    pub intents: Vec<String>,
    pub candidates: Vec<RescueCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescueCandidate {
    pub topic: FaqTopic,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTrigger {
    pub flow_id: String,
    pub phrases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordTable {
    pub phrases: Vec<PhraseTrigger>,
    pub token_rules: Vec<TokenConjunction>,
    pub rescue: IntentRescue,
    pub flow_triggers: Vec<FlowTrigger>,
}

impl KeywordTable {
    /// Runs every keyword through the normalizer so accented or upper-case
    /// entries still match normalized input.
    pub fn normalized(mut self) -> Self {
        for trigger in &mut self.phrases {
            normalize_all(&mut trigger.phrases);
        }
        for rule in &mut self.token_rules {
            normalize_all(&mut rule.subjects);
            normalize_all(&mut rule.qualifiers);
        }
        for candidate in &mut self.rescue.candidates {
            normalize_all(&mut candidate.tokens);
        }
        for trigger in &mut self.flow_triggers {
            normalize_all(&mut trigger.phrases);
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let phrase_groups = self
            .phrases
            .iter()
            .map(|t| ("phrase triggers", &t.phrases))
            .chain(self.token_rules.iter().map(|r| ("token subjects", &r.subjects)))
            .chain(self.token_rules.iter().map(|r| ("token qualifiers", &r.qualifiers)))
            .chain(self.rescue.candidates.iter().map(|c| ("rescue tokens", &c.tokens)))
            .chain(self.flow_triggers.iter().map(|t| ("flow triggers", &t.phrases)));

        for (label, group) in phrase_groups {
            if group.iter().any(|phrase| phrase.trim().is_empty()) {
                return Err(ConfigError::EmptyKeyword(label));
            }
        }
        Ok(())
    }
}

fn normalize_all(values: &mut Vec<String>) {
    for value in values.iter_mut() {
        *value = normalize_text(value);
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self {
            phrases: vec![
                PhraseTrigger {
                    topic: FaqTopic::InvoicesStatus,
                    phrases: owned(&[
                        "invoice details",
                        "invoice detail",
                        "invoice status",
                        "invoices status",
                        "view invoices",
                        "pending invoices",
                        "invoices",
                        "my invoices",
                        "invoices history",
                        "invoices list",
                        "voir factures",
                        "voir mes factures",
                        "mes factures",
                        "consulter mes factures",
                        "liste des factures",
                        "statut des factures",
                        "etat des factures",
                        "factures en attente",
                        "details facture",
                        "details factures",
                        "afficher mes factures",
                        "ou voir les factures",
                        "ou voir mes factures",
                    ]),
                },
                PhraseTrigger {
                    topic: FaqTopic::PaymentStatus,
                    phrases: owned(&[
                        "payment status",
                        "view payments",
                        "show payments",
                        "see payments",
                        "payments",
                        "my payments",
                        "statut paiement",
                        "statut de paiement",
                        "voir paiements",
                        "afficher mes paiements",
                        "ou voir les paiements",
                        "suivi paiement",
                        "suivi des paiements",
                        "reglement",
                        "reglements",
                    ]),
                },
                PhraseTrigger {
                    topic: FaqTopic::InvoiceHolds,
                    phrases: owned(&[
                        "invoice holds",
                        "resolve invoice holds",
                        "on hold",
                        "facture bloque",
                        "facture bloquee",
                        "facture en attente",
                        "blocages facture",
                        "lever le hold",
                        "resoudre blocages facture",
                    ]),
                },
            ],
            token_rules: vec![
                TokenConjunction {
                    topic: FaqTopic::InvoicesStatus,
                    subjects: owned(&["facture", "factures", "invoice", "invoices"]),
                    qualifiers: owned(&[
                        "statut",
                        "status",
                        "detail",
                        "details",
                        "en attente",
                        "pending",
                    ]),
                },
                TokenConjunction {
                    topic: FaqTopic::PaymentStatus,
                    subjects: owned(&["paiement", "paiements", "payment", "payments"]),
                    qualifiers: owned(&["statut", "status", "voir", "show", "suivi", "see"]),
                },
            ],
            rescue: IntentRescue {
                intents: owned(&["facturation_details.step_1"]),
                candidates: vec![
                    RescueCandidate {
                        topic: FaqTopic::PaymentStatus,
                        tokens: owned(&["payment", "paiement", "paiements"]),
                    },
                    RescueCandidate {
                        topic: FaqTopic::InvoicesStatus,
                        tokens: owned(&[
                            "invoice",
                            "invoices",
                            "facture",
                            "factures",
                            "pending",
                            "en attente",
                            "statut",
                            "status",
                            "details",
                            "detail",
                        ]),
                    },
                ],
            },
            flow_triggers: vec![
                FlowTrigger {
                    flow_id: "supplier_registration".to_string(),
                    phrases: owned(&[
                        "referencement",
                        "inscrire",
                        "devenir fournisseur",
                        "supplier registration",
                        "register",
                    ]),
                },
                FlowTrigger {
                    flow_id: "forgot_password".to_string(),
                    phrases: owned(&[
                        "mot de passe",
                        "mot de passe oublie",
                        "forgot password",
                        "reset password",
                        "login help",
                    ]),
                },
                FlowTrigger {
                    flow_id: "work_confirmation".to_string(),
                    phrases: owned(&[
                        "confirmation travaux",
                        "confirmation de travaux",
                        "work confirmation",
                    ]),
                },
                FlowTrigger {
                    flow_id: "invoice_creation".to_string(),
                    phrases: owned(&[
                        "creer facture",
                        "créer facture",
                        "create invoice",
                        "submit invoice",
                    ]),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub keywords: KeywordTable,
    pub flows: FlowCatalog,
}

impl RouterConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig = serde_json::from_str(raw)?;
        config.prepare()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Validates the tables and normalizes every keyword.
    pub fn prepare(self) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for flow in self.flows.flows() {
            if flow.steps.is_empty() {
                return Err(ConfigError::EmptyFlow(flow.id.clone()));
            }
            if !seen.insert(flow.id.as_str()) {
                return Err(ConfigError::DuplicateFlow(flow.id.clone()));
            }
        }
        self.keywords.validate()?;

        Ok(Self {
            keywords: self.keywords.normalized(),
            flows: self.flows,
        })
    }

    /// Flow triggers that name a flow the catalog does not define.
    pub fn dangling_flow_triggers(&self) -> Vec<&str> {
        self.keywords
            .flow_triggers
            .iter()
            .filter(|trigger| self.flows.get(&trigger.flow_id).is_none())
            .map(|trigger| trigger.flow_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_catalog_step_counts() {
        let catalog = FlowCatalog::default();
        let counts = catalog
            .flows()
            .iter()
            .map(|flow| flow.total_steps())
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![7, 4, 4, 6]);
    }

    #[test]
    fn prepare_normalizes_accented_keywords() {
        let config = RouterConfig::default().prepare().unwrap();
        let creation = config
            .keywords
            .flow_triggers
            .iter()
            .find(|trigger| trigger.flow_id == "invoice_creation")
            .unwrap();
        assert!(creation.phrases.iter().all(|phrase| phrase != "créer facture"));
        assert!(config.dangling_flow_triggers().is_empty());
    }

    #[test]
    fn rejects_stepless_and_duplicate_flows() {
        let mut config = RouterConfig::default();
        config.flows = FlowCatalog::new(vec![FlowDefinition::new("empty", &[])]);
        assert!(matches!(config.prepare(), Err(ConfigError::EmptyFlow(id)) if id == "empty"));

        let mut config = RouterConfig::default();
        config.flows = FlowCatalog::new(vec![
            FlowDefinition::new("dup", &["a"]),
            FlowDefinition::new("dup", &["b"]),
        ]);
        assert!(matches!(config.prepare(), Err(ConfigError::DuplicateFlow(_))));
    }

    #[test]
    fn reports_triggers_without_flows() {
        let mut config = RouterConfig::default();
        config.flows = FlowCatalog::new(vec![FlowDefinition::new("forgot_password", &["x"])]);
        let config = config.prepare().unwrap();
        assert_eq!(config.dangling_flow_triggers().len(), 3);
    }

    #[test]
    fn parses_json_and_rejects_garbage() {
        let raw = serde_json::to_string(&RouterConfig::default()).unwrap();
        let parsed = RouterConfig::from_json_str(&raw).unwrap();
        assert_eq!(parsed.flows.len(), 4);
        assert!(matches!(
            RouterConfig::from_json_str("{\"keywords\": 3}"),
            Err(ConfigError::Parse(_))
        ));
    }
}
