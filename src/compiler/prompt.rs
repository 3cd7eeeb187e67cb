//! Grounding document assembly.

use std::fmt::Write as _;

use serde_json::Value;

use super::extract::PAYLOAD_DELIMITER;
use crate::metadata::DatasetMetadata;
use crate::schema::SchemaCatalog;

/// Role instructions sent as the system message.
pub const SYSTEM_PROMPT: &str = "You translate analytics questions into queries for a tabular \
query service. You only use fields that appear in the data model, and you only produce queries \
that follow the grammar you are given.";

/// The previous attempt's failure, fed into the next compile.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    /// Error text from the failing stage.
    pub error: String,
    /// Raw payload that failed, if one was produced.
    pub payload: Option<Value>,
}

impl Feedback {
    pub fn new(error: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            error: error.into(),
            payload,
        }
    }
}

/// One titled block of the grounding document.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: &'static str,
    pub body: String,
}

/// Everything the model sees for one compile, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingDocument {
    sections: Vec<Section>,
}

impl GroundingDocument {
    /// Assemble the document for `task`.
    pub fn build(
        task: &str,
        metadata: &DatasetMetadata,
        catalog: &SchemaCatalog,
        feedback: &[Feedback],
    ) -> Self {
        let mut sections = vec![
            Section {
                title: "Task",
                body: task.trim().to_string(),
            },
            Section {
                title: "Data model",
                body: pretty(&metadata.to_prompt_value()),
            },
            Section {
                title: "Query grammar",
                body: catalog.grammar().to_string(),
            },
            Section {
                title: "Worked examples",
                body: render_examples(catalog),
            },
            Section {
                title: "Common mistakes",
                body: render_anti_patterns(catalog),
            },
        ];

        if !feedback.is_empty() {
            sections.push(Section {
                title: "Previous attempts failed",
                body: render_feedback(feedback),
            });
        }

        sections.push(Section {
            title: "Response format",
            body: response_contract(),
        });

        Self { sections }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.title == title)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            let _ = write!(out, "## {}\n\n{}\n\n", section.title, section.body);
        }
        out.trim_end().to_string()
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn render_examples(catalog: &SchemaCatalog) -> String {
    catalog
        .examples()
        .iter()
        .map(|ex| format!("Question: {}\nQuery: {}", ex.question, ex.query))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_anti_patterns(catalog: &SchemaCatalog) -> String {
    catalog
        .anti_patterns()
        .iter()
        .map(|ap| {
            format!(
                "Mistake: {}\nWrong: {}\nError: {}\nCorrect: {}",
                ap.description, ap.query, ap.error, ap.correction
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_feedback(feedback: &[Feedback]) -> String {
    let mut body = String::new();
    for (i, attempt) in feedback.iter().enumerate() {
        let _ = writeln!(body, "Attempt {}:", i + 1);
        if let Some(payload) = &attempt.payload {
            let _ = writeln!(body, "Query that was tried:\n{}", payload);
        }
        let _ = writeln!(body, "Error:\n{}\n", attempt.error.trim());
    }
    body.push_str(
        "Write a corrected query. Do not repeat these mistakes; if an error names a field, \
         do not use that field again.",
    );
    body
}

fn response_contract() -> String {
    format!(
        r#"Respond with one JSON object and nothing else:
{{"rationale": "<how the query answers the task>", "query": {{ ...Query... }}}}

If the data model has no fields that can answer the task, respond with:
{{"rationale": "<what is missing>", "cannot_answer": "<reason>"}}

If you cannot produce bare JSON, write your reasoning first, then the line {PAYLOAD_DELIMITER}, then the JSON object."#
    )
}
