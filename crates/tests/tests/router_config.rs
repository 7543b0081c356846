use std::path::PathBuf;
use std::sync::Arc;

use tmpa_agents::{SupportAgent, TurnRequest};
use tmpa_core::{FaqTopic, RouteDecision, RouterConfig};
use tmpa_observability::AppMetrics;
use tmpa_storage::MemoryStore;

fn shipped_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/router.json")
}

#[test]
fn shipped_config_matches_builtin_tables() {
    let shipped = RouterConfig::from_path(shipped_config_path()).expect("shipped config loads");
    let builtin = RouterConfig::default().prepare().unwrap();
    assert_eq!(shipped, builtin);
}

#[tokio::test]
async fn reference_scenarios_through_shipped_config() {
    let config = RouterConfig::from_path(shipped_config_path()).unwrap();
    let agent = SupportAgent::new(config, Arc::new(MemoryStore::new()), AppMetrics::shared());

    let cases = [
        (None, "voir mes factures", RouteDecision::FaqAnswer(FaqTopic::InvoicesStatus)),
        (None, "statut paiement", RouteDecision::FaqAnswer(FaqTopic::PaymentStatus)),
        (
            Some("facturation_details.step_1"),
            "pending invoice",
            RouteDecision::FaqAnswer(FaqTopic::InvoicesStatus),
        ),
        (
            Some("facturation_details.step_1"),
            "facture",
            RouteDecision::FaqAnswer(FaqTopic::InvoicesStatus),
        ),
        (None, "facture", RouteDecision::Unrecognized),
        (
            None,
            "devenir fournisseur",
            RouteDecision::FlowStart("supplier_registration".to_string()),
        ),
        (None, "hello there", RouteDecision::Unrecognized),
    ];

    for (intent, text, expected) in cases {
        let reply = agent
            .handle_turn(TurnRequest {
                conversation_id: None,
                text: text.to_string(),
                intent: intent.map(str::to_string),
                lang: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.decision, Some(expected), "utterance {text:?}");
    }
}
