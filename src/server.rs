use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{FormRejection, JsonRejection},
        Query, State,
    },
    response::Html,
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;

use crate::error::AppError;
use crate::evaluator::{RiskEvaluator, RiskResult};
use crate::records::PatientRecord;
use crate::render::{HtmlPresenter, Layout, Presenter};

/// Shared read-only state. The artifacts are loaded once before serving.
pub struct AppState {
    pub evaluator: RiskEvaluator,
}

#[derive(Debug, Default, Deserialize)]
pub struct LayoutParams {
    #[serde(default)]
    pub layout: Layout,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn form_page(Query(params): Query<LayoutParams>) -> Html<String> {
    let presenter = HtmlPresenter {
        layout: params.layout,
    };
    Html(presenter.form_page(&PatientRecord::default()))
}

/// Form submission. Failures are rendered into the page rather than returned as errors.
pub async fn predict_form(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LayoutParams>,
    payload: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Html<String> {
    let (record, outcome) = match payload {
        Ok(Form(fields)) => {
            let lookup = |name: &str| fields.get(name).cloned();
            let outcome = PatientRecord::from_fields(lookup)
                .map_err(AppError::from)
                .and_then(|record| state.evaluator.evaluate(&record).map_err(AppError::from));
            (PatientRecord::prefill(lookup), outcome)
        }
        Err(rejection) => (
            PatientRecord::default(),
            Err(AppError::BadRequest(rejection.body_text())),
        ),
    };
    match &outcome {
        Ok(result) => log::info!("form evaluation: {}", result.tier),
        Err(AppError::Inference(e)) => log::error!("form evaluation failed: {e}"),
        Err(e) => log::warn!("form evaluation rejected: {e}"),
    }
    let presenter = HtmlPresenter {
        layout: params.layout,
    };
    Html(presenter.render(&record, &outcome))
}

/// JSON evaluation. Any object is accepted so that every bad field can be
/// reported; numbers may also be sent as strings.
pub async fn evaluate_json(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RiskResult>, AppError> {
    let Json(body) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let record = PatientRecord::from_fields(|name| json_field(&body, name))?;
    let result = state.evaluator.evaluate(&record)?;
    log::info!(
        "api evaluation: {} ({:.1}%)",
        result.tier,
        result.probability
    );
    Ok(Json(result))
}

fn json_field(body: &Value, name: &str) -> Option<String> {
    match body.get(name)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(form_page))
        .route("/predict", post(predict_form))
        .route("/v1/evaluate", post(evaluate_json))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, bind_addr: SocketAddr) -> Result<(), AppError> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::io(format!("failed to bind {bind_addr}"), e))?;
    log::info!("heart-risk listening on http://{bind_addr}");
    axum::serve(listener, app(state))
        .await
        .map_err(|e| AppError::io("server stopped", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::RiskTier;
    use crate::model::{LogisticModel, StandardScaler};
    use crate::records::{sample, FEATURE_COUNT, FIELDS};
    use axum::body::{self, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use tower::util::ServiceExt;

    /// Positive for the sample record, about 88% probability.
    fn state() -> Arc<AppState> {
        let mut coefficients = vec![0.0; FEATURE_COUNT];
        coefficients[0] = 1.0;
        Arc::new(AppState {
            evaluator: RiskEvaluator::new(
                Box::new(StandardScaler {
                    mean: vec![43.0; FEATURE_COUNT],
                    scale: vec![1.0; FEATURE_COUNT],
                }),
                Box::new(LogisticModel {
                    coefficients,
                    intercept: 0.0,
                    threshold: 0.5,
                }),
            ),
        })
    }

    fn form_fields(record: &PatientRecord) -> HashMap<String, String> {
        FIELDS
            .iter()
            .zip(record.features())
            .map(|(spec, value)| (spec.name.to_string(), value.to_string()))
            .collect()
    }

    async fn post(uri: &str, content_type: &str, body: String) -> Response {
        let req = Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap();
        app(state()).oneshot(req).await.unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn json_endpoint_returns_the_tier() {
        let body = serde_json::to_value(sample()).unwrap();
        let Json(result) = evaluate_json(State(state()), Ok(Json(body))).await.unwrap();
        assert_eq!(result.tier, RiskTier::High);
        assert!(result.message.contains("88.1%"));
    }

    #[tokio::test]
    async fn json_endpoint_rejects_out_of_domain_records() {
        let mut record = sample();
        record.age = 12;
        let body = serde_json::to_value(record).unwrap();
        let err = evaluate_json(State(state()), Ok(Json(body))).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn json_endpoint_reports_missing_fields_as_json() {
        let resp = post("/v1/evaluate", "application/json", r#"{"age":45}"#.to_string()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(v["error"]["type"], "validation_failure");
        assert_eq!(v["error"]["status"], 400);
        let message = v["error"]["message"].as_str().unwrap();
        assert!(message.contains("sex is missing"));
        assert!(message.contains("thalassemia is missing"));
        assert!(!message.contains("age"));
    }

    #[tokio::test]
    async fn json_endpoint_rejects_fractions_and_bad_types() {
        let mut body = serde_json::to_value(sample()).unwrap();
        body["age"] = serde_json::json!(45.5);
        body["sex"] = serde_json::json!(true);
        let resp = post("/v1/evaluate", "application/json", body.to_string()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        let message = v["error"]["message"].as_str().unwrap();
        assert!(message.contains("age = 45.5 is not a whole number"));
        assert!(message.contains("sex = \"true\" is not a number"));
    }

    #[tokio::test]
    async fn json_endpoint_answers_unreadable_bodies_with_json() {
        let resp = post("/v1/evaluate", "application/json", "{not json".to_string()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(v["error"]["type"], "bad_request");
    }

    #[tokio::test]
    async fn form_submission_renders_result_page() {
        let Html(page) = predict_form(
            State(state()),
            Query(LayoutParams {
                layout: Layout::Decorated,
            }),
            Ok(Form(form_fields(&sample()))),
        )
        .await;
        assert!(page.contains("High Risk: Probability: 88.1%"));
        assert!(page.contains("Your Input"));
    }

    #[tokio::test]
    async fn form_submission_reports_validation_failures_inline() {
        let mut record = sample();
        record.thalassemia = 5;
        let Html(page) = predict_form(
            State(state()),
            Query(LayoutParams::default()),
            Ok(Form(form_fields(&record))),
        )
        .await;
        assert!(page.contains("Invalid input:"));
        assert!(page.contains("thalassemia = 5 is not one of [3, 6, 7]"));
    }

    #[tokio::test]
    async fn form_submission_with_missing_fields_rerenders_the_page() {
        let resp = post(
            "/predict",
            "application/x-www-form-urlencoded",
            "age=45".to_string(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_text(resp).await;
        assert!(page.contains("Invalid input:"));
        assert!(page.contains("sex is missing"));
        assert!(page.contains("<label class=\"invalid\">Sex"));
        assert!(page.contains("name=\"age\" min=\"18\" max=\"90\" step=\"1\" value=\"45\""));
    }

    #[tokio::test]
    async fn form_submission_flags_non_numeric_values() {
        let mut fields = form_fields(&sample());
        fields.insert("age".to_string(), "abc".to_string());
        let Html(page) =
            predict_form(State(state()), Query(LayoutParams::default()), Ok(Form(fields))).await;
        assert!(page.contains("age = &quot;abc&quot; is not a number"));
        assert!(page.contains("<label class=\"invalid\">Age"));
    }

    #[tokio::test]
    async fn form_submission_hides_inference_details() {
        let broken = Arc::new(AppState {
            evaluator: RiskEvaluator::new(
                Box::new(StandardScaler {
                    mean: vec![0.0; FEATURE_COUNT],
                    scale: vec![1.0; FEATURE_COUNT],
                }),
                Box::new(LogisticModel {
                    coefficients: vec![0.0; FEATURE_COUNT],
                    intercept: f64::NAN,
                    threshold: 0.5,
                }),
            ),
        });
        let Html(page) = predict_form(
            State(broken),
            Query(LayoutParams::default()),
            Ok(Form(form_fields(&sample()))),
        )
        .await;
        assert!(page.contains("Prediction failed, please try again."));
        assert!(!page.contains("NaN"));
    }

    #[tokio::test]
    async fn form_page_uses_defaults() {
        let Html(page) = form_page(Query(LayoutParams::default())).await;
        assert!(page.contains("value=\"30\""));
        assert!(page.contains("Predict"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(health) = health_check().await;
        assert_eq!(health.status, "ok");
    }
}
