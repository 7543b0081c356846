use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tmpa_api::{build_app_with, ApiConfig};
use tmpa_core::RouterConfig;
use tower::ServiceExt;

const API_KEY: &str = "dev-tmpa-key";

async fn app_with(config: ApiConfig) -> Router {
    let router_config = RouterConfig::default()
        .prepare()
        .expect("default router config is valid");
    build_app_with(config, router_config)
        .await
        .expect("app should build")
}

async fn app() -> Router {
    app_with(ApiConfig::default()).await
}

fn post_json(uri: &str, body: &Value, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed["flows"], json!(4));
    assert_eq!(parsed["store"], json!("memory"));
}

#[tokio::test]
async fn turn_requires_api_key() {
    let app = app().await;
    let body = json!({ "text": "devenir fournisseur" });

    let request = post_json("/v1/turn", &body, &[]);

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn turn_starts_and_advances_a_flow() {
    let app = app().await;

    let start = json!({ "conversation_id": "supplier-42", "text": "Je veux devenir fournisseur" });
    let response = app
        .clone()
        .oneshot(post_json("/v1/turn", &start, &[("x-api-key", API_KEY)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    assert_eq!(parsed["decision"]["kind"], json!("flow_start"));
    assert_eq!(parsed["emission"]["step_index"], json!(0));
    assert_eq!(parsed["emission"]["total_steps"], json!(7));
    assert_eq!(parsed["state"]["active_flow"], json!("supplier_registration"));

    let next = json!({ "conversation_id": "supplier-42", "text": "", "intent": { "name": "next_step" } });
    let response = app
        .oneshot(post_json("/v1/turn", &next, &[("x-api-key", API_KEY)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    assert_eq!(parsed["emission"]["step_index"], json!(1));
    assert_eq!(parsed["emission"]["content"], json!("utter_sr_step_2"));
    assert_eq!(parsed["state"]["step_index"], json!(1));
}

#[tokio::test]
async fn webhook_accepts_allowed_origin_and_returns_channel_messages() {
    let app = app().await;
    let body = json!({ "sender": "web-user", "message": "Mot de passe oublié" });

    let response = app
        .oneshot(post_json("/webhooks/rest/webhook", &body, &[("origin", "http://localhost:5173")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    assert_eq!(
        parsed,
        json!([
            { "recipient_id": "web-user", "response": "utter_fp_step_1" },
            { "recipient_id": "web-user", "custom": { "step_index": 0, "total_steps": 4 } }
        ])
    );
}

#[tokio::test]
async fn webhook_falls_back_on_unrelated_text() {
    let app = app().await;
    let body = json!({ "sender": "web-user", "message": "hello there" });

    let response = app
        .oneshot(post_json("/webhooks/rest/webhook", &body, &[("x-api-key", API_KEY)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    let messages = parsed.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0]["text"]
        .as_str()
        .unwrap()
        .contains("quick action"));
}

#[tokio::test]
async fn rate_limit_applies_per_client() {
    let app = app_with(ApiConfig {
        rate_limit_max: 1,
        ..ApiConfig::default()
    })
    .await;

    let request = || {
        Request::builder()
            .uri("/v1/flows")
            .header("x-api-key", API_KEY)
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let flows = json_body(first).await;
    assert_eq!(flows.as_array().unwrap().len(), 4);

    let second = app.oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn french_client_keeps_lang_across_webhook_and_turn() {
    let app = app().await;

    let start = json!({
        "sender": "fr-user",
        "message": "mot de passe oublié",
        "metadata": { "lang": "FR" }
    });
    let response = app
        .clone()
        .oneshot(post_json("/webhooks/rest/webhook", &start, &[("x-api-key", API_KEY)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let next = json!({ "conversation_id": "fr-user", "text": "suivant", "lang": "FR" });
    let response = app
        .oneshot(post_json("/v1/turn", &next, &[("x-api-key", API_KEY)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    assert_eq!(
        parsed["state"],
        json!({ "active_flow": "forgot_password", "step_index": 1, "lang": "FR" })
    );
}

#[tokio::test]
async fn webhook_accepts_token_query_parameter() {
    let app = app().await;
    let body = json!({ "sender": "web-user", "message": "statut paiement" });

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/webhooks/rest/webhook?token={API_KEY}"),
            &body,
            &[],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(post_json("/webhooks/rest/webhook?token=wrong", &body, &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_accepts_inline_screenshot_but_turn_keeps_small_limit() {
    let app = app().await;
    let screenshot = "A".repeat(512 * 1024);

    let body = json!({
        "sender": "web-user",
        "message": "statut paiement",
        "metadata": {
            "lang": "EN",
            "attachment": { "name": "shot.png", "type": "image/png", "size": 393216, "data": screenshot }
        }
    });
    let response = app
        .clone()
        .oneshot(post_json("/webhooks/rest/webhook", &body, &[("x-api-key", API_KEY)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed[0]["response"], json!("utter_faq/payment_status"));

    let oversized = json!({ "text": "statut paiement", "padding": screenshot });
    let response = app
        .oneshot(post_json("/v1/turn", &oversized, &[("x-api-key", API_KEY)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
