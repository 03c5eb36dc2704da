//! Presentation of an evaluation outcome.
//!
//! The evaluator knows nothing about output formats; every surface (terminal,
//! HTML page) goes through a `Presenter`.

use serde::Deserialize;

use crate::error::AppError;
use crate::evaluator::{RiskResult, RiskTier};
use crate::records::{Domain, FieldSpec, PatientRecord, FIELDS};

pub const DISCLAIMER: &str = "This is a predictive demo model. Not a medical diagnosis.";
const INFERENCE_FAILED: &str = "Prediction failed, please try again.";

pub trait Presenter {
    fn render(&self, record: &PatientRecord, outcome: &Result<RiskResult, AppError>) -> String;
}

/// Plain lines of the outcome, shared by both presenters.
fn outcome_lines(outcome: &Result<RiskResult, AppError>) -> Vec<String> {
    match outcome {
        Ok(result) => vec![
            format!("Prediction: {}", result.message),
            result.advice.clone(),
        ],
        Err(AppError::Validation(err)) => {
            let mut lines = vec!["Invalid input:".to_string()];
            lines.extend(err.violations.iter().map(|v| format!("  - {v}")));
            lines
        }
        Err(AppError::Inference(_)) => vec![INFERENCE_FAILED.to_string()],
        Err(other) => vec![format!("Error: {other}")],
    }
}

/// Terminal output. `echo_inputs` prints the submitted record as a table first.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextPresenter {
    pub echo_inputs: bool,
}

impl Presenter for TextPresenter {
    fn render(&self, record: &PatientRecord, outcome: &Result<RiskResult, AppError>) -> String {
        let mut out = String::new();
        if self.echo_inputs {
            out.push_str("Your input\n");
            for (spec, shown) in echo_rows(record) {
                out.push_str(&format!("  {:<36} {shown}\n", spec.label));
            }
            out.push('\n');
        }
        for line in outcome_lines(outcome) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(&format!("\n{DISCLAIMER}\n"));
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Plain,
    Decorated,
}

impl Layout {
    fn query(&self) -> &'static str {
        match self {
            Layout::Plain => "",
            Layout::Decorated => "?layout=decorated",
        }
    }
}

/// Full HTML page: the form, pre-filled with `record`, and the outcome if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlPresenter {
    pub layout: Layout,
}

const PLAIN_STYLE: &str = "body{font-family:sans-serif;max-width:720px;margin:auto}\
h1,.note{text-align:center}h1{color:red}.note{color:grey}\
label{display:block;margin-top:8px}.invalid{color:red}\
.low{background:#e6f4ea}.medium{background:#fff4e5}.high{background:#fdecea}\
.result,.error{padding:12px;margin-top:16px;border-radius:6px}.error{background:#fdecea}";

const DECORATED_STYLE: &str = "body{font-family:'Segoe UI',Roboto,Arial,sans-serif;\
background:linear-gradient(135deg,#a8edea 0%,#fed6e3 100%);color:#222;margin:0;padding:24px}\
h1,h2,h3{color:#4f9a94;font-weight:600}.note{color:grey;text-align:center}\
.card{background:rgba(255,255,255,0.22);border-radius:22px;box-shadow:0 4px 24px rgba(0,0,0,0.09);\
border:1.2px solid rgba(255,255,255,0.23);padding:30px;margin:0 auto 36px;max-width:960px}.invalid{color:#b00020}\
.grid{display:grid;grid-template-columns:repeat(3,1fr);gap:12px}label{display:block}\
button{background:linear-gradient(90deg,#ffdde1 0%,#a2d5f2 100%);border:none;border-radius:16px;\
font-weight:bold;height:52px;width:100%;margin-top:16px}\
table{border-collapse:collapse;width:100%}td,th{padding:4px 8px;border-bottom:1px solid #ddd;text-align:left}\
.low{color:#1e7b34}.medium{color:#b26a00}.high{color:#b00020}.error{color:#b00020}";

impl HtmlPresenter {
    /// The empty form, as served before any submission.
    pub fn form_page(&self, record: &PatientRecord) -> String {
        self.page(record, None)
    }

    fn page(&self, record: &PatientRecord, outcome: Option<&Result<RiskResult, AppError>>) -> String {
        let decorated = self.layout == Layout::Decorated;
        let mut html = String::new();
        html.push_str(&format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
             <title>Heart Attack Risk Predictor</title><style>{}</style></head><body>",
            if decorated { DECORATED_STYLE } else { PLAIN_STYLE }
        ));
        html.push_str("<h1>Heart Attack Risk Predictor</h1>");
        html.push_str(
            "<p class=\"note\">Enter your health details below to predict the risk of heart disease.</p>",
        );
        if decorated {
            html.push_str("<div class=\"card\">");
        }
        let invalid: Vec<&str> = match outcome {
            Some(Err(AppError::Validation(err))) => err.violations.iter().map(|v| v.field()).collect(),
            _ => Vec::new(),
        };
        self.form(&mut html, record, &invalid);
        if decorated {
            html.push_str("</div>");
        }

        if let Some(outcome) = outcome {
            if decorated {
                html.push_str("<div class=\"card\">");
                if outcome.is_ok() {
                    echo_table(&mut html, record);
                }
            }
            result_block(&mut html, outcome);
            if decorated {
                html.push_str("</div>");
            }
        }

        html.push_str(&format!("<hr><p class=\"note\">{DISCLAIMER}</p></body></html>"));
        html
    }

    fn form(&self, html: &mut String, record: &PatientRecord, invalid: &[&str]) {
        html.push_str(&format!(
            "<h3>Personal &amp; Health Information</h3><form method=\"post\" action=\"/predict{}\">",
            self.layout.query()
        ));
        if self.layout == Layout::Decorated {
            html.push_str("<div class=\"grid\">");
        }
        for (spec, value) in FIELDS.iter().zip(record.features()) {
            let class = if invalid.contains(&spec.name) { " class=\"invalid\"" } else { "" };
            html.push_str(&format!("<label{class}>{}", escape(spec.label)));
            match spec.domain {
                Domain::Choices(codes) => {
                    html.push_str(&format!("<select name=\"{}\">", spec.name));
                    for code in codes {
                        let selected = if f64::from(*code) == value { " selected" } else { "" };
                        html.push_str(&format!(
                            "<option value=\"{code}\"{selected}>{}</option>",
                            escape(&spec.option_label(*code))
                        ));
                    }
                    html.push_str("</select>");
                }
                Domain::Range { min, max } => {
                    html.push_str(&format!(
                        "<input type=\"number\" name=\"{}\" min=\"{min}\" max=\"{max}\" step=\"1\" value=\"{value}\" required>",
                        spec.name
                    ));
                }
                Domain::Continuous { min, max } => {
                    html.push_str(&format!(
                        "<input type=\"number\" name=\"{}\" min=\"{min:.1}\" max=\"{max:.1}\" step=\"0.1\" value=\"{value:.1}\" required>",
                        spec.name
                    ));
                }
            }
            html.push_str("</label>");
        }
        if self.layout == Layout::Decorated {
            html.push_str("</div>");
        }
        html.push_str("<button type=\"submit\">Predict</button></form>");
    }
}

fn tier_class(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Low => "low",
        RiskTier::Medium => "medium",
        RiskTier::High => "high",
    }
}

fn result_block(html: &mut String, outcome: &Result<RiskResult, AppError>) {
    let class = match outcome {
        Ok(result) => tier_class(result.tier),
        Err(_) => "error",
    };
    let lines = outcome_lines(outcome);
    html.push_str(&format!("<div class=\"result {class}\">"));
    for (idx, line) in lines.iter().enumerate() {
        if idx == 0 {
            html.push_str(&format!("<strong>{}</strong>", escape(line)));
        } else {
            html.push_str(&format!("<br>{}", escape(line.trim_start())));
        }
    }
    html.push_str("</div>");
}

/// Field specs paired with the display text of the record's values.
fn echo_rows(record: &PatientRecord) -> Vec<(&'static FieldSpec, String)> {
    FIELDS
        .iter()
        .zip(record.features())
        .map(|(spec, value)| {
            let shown = if spec.is_integral() {
                spec.option_label(value as i32)
            } else {
                format!("{value:.1}")
            };
            (spec, shown)
        })
        .collect()
}

fn echo_table(html: &mut String, record: &PatientRecord) {
    html.push_str("<h3>Your Input</h3><table><tr><th>Field</th><th>Value</th></tr>");
    for (spec, shown) in echo_rows(record) {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>",
            escape(spec.label),
            escape(&shown)
        ));
    }
    html.push_str("</table>");
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl Presenter for HtmlPresenter {
    fn render(&self, record: &PatientRecord, outcome: &Result<RiskResult, AppError>) -> String {
        self.page(record, Some(outcome))
    }
}
