//! The query vocabulary taught to the language model.
//!
//! A [`SchemaCatalog`] bundles three things:
//! - the grammar text, rendered from the typed enums in [`super::query`]
//! - worked examples mapping a question to a valid query
//! - anti-pattern/correction pairs showing common mistakes and their fixes

use serde::Serialize;
use serde_json::{json, Value};

use super::query::{DateRangeType, Function, PeriodType, QuantitativeFilterType};

/// A question paired with a query that answers it.
#[derive(Debug, Clone, Serialize)]
pub struct WorkedExample {
    pub question: String,
    pub query: Value,
}

/// A known-bad query, the error it produces, and its corrected form.
#[derive(Debug, Clone, Serialize)]
pub struct AntiPattern {
    pub description: String,
    pub error: String,
    pub query: Value,
    pub correction: Value,
}

/// Grammar, examples and corrections for one query dialect.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    grammar: String,
    examples: Vec<WorkedExample>,
    anti_patterns: Vec<AntiPattern>,
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl SchemaCatalog {
    /// Build a catalog from explicit parts.
    pub fn new(
        grammar: String,
        examples: Vec<WorkedExample>,
        anti_patterns: Vec<AntiPattern>,
    ) -> Self {
        Self {
            grammar,
            examples,
            anti_patterns,
        }
    }

    /// The catalog for the tabular query service grammar.
    pub fn standard() -> Self {
        Self::new(render_grammar(), standard_examples(), standard_anti_patterns())
    }

    pub fn grammar(&self) -> &str {
        &self.grammar
    }

    pub fn examples(&self) -> &[WorkedExample] {
        &self.examples
    }

    pub fn anti_patterns(&self) -> &[AntiPattern] {
        &self.anti_patterns
    }
}

fn join_names<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| n.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}

fn render_grammar() -> String {
    let numeric_aggs = join_names(
        Function::ALL
            .iter()
            .filter(|f| f.requires_numeric())
            .map(|f| f.as_str()),
    );
    let any_aggs = join_names(
        Function::ALL
            .iter()
            .filter(|f| f.is_aggregation() && !f.requires_numeric())
            .map(|f| f.as_str()),
    );
    let date_parts = join_names(
        Function::ALL
            .iter()
            .filter(|f| f.is_date_part())
            .map(|f| f.as_str()),
    );
    let quantitative = join_names(QuantitativeFilterType::ALL.iter().map(|q| q.as_str()));
    let periods = join_names(PeriodType::ALL);
    let ranges = join_names(DateRangeType::ALL);

    format!(
        r#"Query := {{ "fields": [Field, ...], "filters": [Filter, ...] }}
  "fields" is required and holds at least one Field. "filters" is optional.
  No other top-level properties are allowed.

Field := {{
  "fieldCaption": string,         caption from the data model, or a name for a calculation
  "function"?: Function,
  "calculation"?: string,         expression; when present fieldCaption is only a label
  "fieldAlias"?: string,
  "maxDecimalPlaces"?: integer >= 0,
  "sortDirection"?: "ASC" | "DESC",
  "sortPriority"?: integer > 0    lower sorts first
}}

FilterField := {{ "fieldCaption": string, "function"?: Function }} | {{ "calculation": string }}

Function :=
  numeric aggregations:  {numeric_aggs}
  any-type aggregations: {any_aggs}
  date functions (DATE and DATETIME fields only): {date_parts}

Filter := one of the objects below, discriminated by "filterType".
  Every filter has "field": FilterField and may set "context": boolean.
  SET:                    "values": [value, ...] (at least one), "exclude"?: boolean
  MATCH:                  "contains"? | "startsWith"? | "endsWith"? (at least one), "exclude"?: boolean
  QUANTITATIVE_NUMERICAL: "quantitativeFilterType": {quantitative},
                          "min"?: number, "max"?: number, "includeNulls"?: boolean
  QUANTITATIVE_DATE:      "quantitativeFilterType": {quantitative},
                          "minDate"?: "YYYY-MM-DD", "maxDate"?: "YYYY-MM-DD", "includeNulls"?: boolean
  DATE:                   "periodType": {periods},
                          "dateRangeType": {ranges},
                          "rangeN"?: integer > 0 (required for LASTN and NEXTN),
                          "anchorDate"?: "YYYY-MM-DD"
  TOP:                    "howMany": integer > 0, "fieldToMeasure": FilterField,
                          "direction"?: "TOP" | "BOTTOM"

Rules:
  - RANGE needs both bounds, MIN needs only the lower bound, MAX needs only the upper bound.
  - At most one filter per (field, function) pair. Two bounds on the same field form one RANGE filter.
  - sortDirection and sortPriority belong on a Field, never on the query.
  - Use fieldCaption values exactly as they appear in the data model.
  - Use the sample values of a field when filtering it with SET."#
    )
}

fn example(question: &str, query: Value) -> WorkedExample {
    WorkedExample {
        question: question.to_string(),
        query,
    }
}

fn standard_examples() -> Vec<WorkedExample> {
    vec![
        example(
            "Total sales by region, highest first",
            json!({
                "fields": [
                    {"fieldCaption": "Region"},
                    {"fieldCaption": "Sales", "function": "SUM", "sortDirection": "DESC", "sortPriority": 1}
                ],
                "filters": []
            }),
        ),
        example(
            "Profit by category for the Consumer and Home Office segments",
            json!({
                "fields": [
                    {"fieldCaption": "Category"},
                    {"fieldCaption": "Profit", "function": "SUM", "maxDecimalPlaces": 2}
                ],
                "filters": [
                    {
                        "field": {"fieldCaption": "Segment"},
                        "filterType": "SET",
                        "values": ["Consumer", "Home Office"],
                        "exclude": false
                    }
                ]
            }),
        ),
        example(
            "Orders per ship mode, excluding Same Day",
            json!({
                "fields": [
                    {"fieldCaption": "Ship Mode"},
                    {"fieldCaption": "Order ID", "function": "COUNTD", "fieldAlias": "Orders"}
                ],
                "filters": [
                    {
                        "field": {"fieldCaption": "Ship Mode"},
                        "filterType": "SET",
                        "values": ["Same Day"],
                        "exclude": true
                    }
                ]
            }),
        ),
        example(
            "Monthly sales for orders placed between 2024-01-01 and 2024-06-30",
            json!({
                "fields": [
                    {"fieldCaption": "Order Date", "function": "TRUNC_MONTH", "sortDirection": "ASC", "sortPriority": 1},
                    {"fieldCaption": "Sales", "function": "SUM"}
                ],
                "filters": [
                    {
                        "field": {"fieldCaption": "Order Date"},
                        "filterType": "QUANTITATIVE_DATE",
                        "quantitativeFilterType": "RANGE",
                        "minDate": "2024-01-01",
                        "maxDate": "2024-06-30"
                    }
                ]
            }),
        ),
        example(
            "Customers whose total sales exceed 10000",
            json!({
                "fields": [
                    {"fieldCaption": "Customer Name"},
                    {"fieldCaption": "Sales", "function": "SUM"}
                ],
                "filters": [
                    {
                        "field": {"fieldCaption": "Sales", "function": "SUM"},
                        "filterType": "QUANTITATIVE_NUMERICAL",
                        "quantitativeFilterType": "MIN",
                        "min": 10000
                    }
                ]
            }),
        ),
        example(
            "Sales by sub-category over the last 3 months",
            json!({
                "fields": [
                    {"fieldCaption": "Sub-Category"},
                    {"fieldCaption": "Sales", "function": "SUM"}
                ],
                "filters": [
                    {
                        "field": {"fieldCaption": "Order Date"},
                        "filterType": "DATE",
                        "periodType": "MONTHS",
                        "dateRangeType": "LASTN",
                        "rangeN": 3
                    }
                ]
            }),
        ),
        example(
            "Top 5 states by profit",
            json!({
                "fields": [
                    {"fieldCaption": "State"},
                    {"fieldCaption": "Profit", "function": "SUM", "sortDirection": "DESC", "sortPriority": 1}
                ],
                "filters": [
                    {
                        "field": {"fieldCaption": "State"},
                        "filterType": "TOP",
                        "howMany": 5,
                        "fieldToMeasure": {"fieldCaption": "Profit", "function": "SUM"},
                        "direction": "TOP"
                    }
                ]
            }),
        ),
        example(
            "Average discount for products whose name contains Chair",
            json!({
                "fields": [
                    {"fieldCaption": "Product Name"},
                    {"fieldCaption": "Discount", "function": "AVG"}
                ],
                "filters": [
                    {
                        "field": {"fieldCaption": "Product Name"},
                        "filterType": "MATCH",
                        "contains": "Chair"
                    }
                ]
            }),
        ),
        example(
            "Profit ratio by region",
            json!({
                "fields": [
                    {"fieldCaption": "Region"},
                    {"fieldCaption": "Profit Ratio", "calculation": "SUM([Profit])/SUM([Sales])"}
                ],
                "filters": []
            }),
        ),
    ]
}

fn standard_anti_patterns() -> Vec<AntiPattern> {
    vec![
        AntiPattern {
            description: "Two filters on the same field to express a date window".to_string(),
            error: "Only one filter is allowed per field and function. Merge the bounds into a single RANGE filter.".to_string(),
            query: json!({
                "fields": [{"fieldCaption": "Sales", "function": "SUM"}],
                "filters": [
                    {
                        "field": {"fieldCaption": "Order Date"},
                        "filterType": "QUANTITATIVE_DATE",
                        "quantitativeFilterType": "MIN",
                        "minDate": "2024-01-01"
                    },
                    {
                        "field": {"fieldCaption": "Order Date"},
                        "filterType": "QUANTITATIVE_DATE",
                        "quantitativeFilterType": "MAX",
                        "maxDate": "2024-03-31"
                    }
                ]
            }),
            correction: json!({
                "fields": [{"fieldCaption": "Sales", "function": "SUM"}],
                "filters": [
                    {
                        "field": {"fieldCaption": "Order Date"},
                        "filterType": "QUANTITATIVE_DATE",
                        "quantitativeFilterType": "RANGE",
                        "minDate": "2024-01-01",
                        "maxDate": "2024-03-31"
                    }
                ]
            }),
        },
        AntiPattern {
            description: "Sorting declared on the query instead of on a field".to_string(),
            error: "Unknown property `sortDirection` on the query. Sorting is set per field.".to_string(),
            query: json!({
                "fields": [
                    {"fieldCaption": "Category"},
                    {"fieldCaption": "Sales", "function": "SUM"}
                ],
                "sortDirection": "DESC"
            }),
            correction: json!({
                "fields": [
                    {"fieldCaption": "Category"},
                    {"fieldCaption": "Sales", "function": "SUM", "sortDirection": "DESC", "sortPriority": 1}
                ],
                "filters": []
            }),
        },
        AntiPattern {
            description: "Relative date filter spelled with an unknown filterType".to_string(),
            error: "unknown variant `RELATIVE_DATE`. Relative date windows use filterType DATE.".to_string(),
            query: json!({
                "fields": [{"fieldCaption": "Sales", "function": "SUM"}],
                "filters": [
                    {
                        "field": {"fieldCaption": "Order Date"},
                        "filterType": "RELATIVE_DATE",
                        "periodType": "YEARS",
                        "dateRangeType": "CURRENT"
                    }
                ]
            }),
            correction: json!({
                "fields": [{"fieldCaption": "Sales", "function": "SUM"}],
                "filters": [
                    {
                        "field": {"fieldCaption": "Order Date"},
                        "filterType": "DATE",
                        "periodType": "YEARS",
                        "dateRangeType": "CURRENT"
                    }
                ]
            }),
        },
    ]
}
