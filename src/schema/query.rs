//! Typed query grammar accepted by the tabular query service.
//!
//! These types mirror the JSON body the service accepts under `query`:
//!
//! ```json
//! {
//!   "fields": [{"fieldCaption": "Region"}, {"fieldCaption": "Sales", "function": "SUM"}],
//!   "filters": [{"field": {"fieldCaption": "Region"}, "filterType": "SET", "values": ["West"]}]
//! }
//! ```

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// Functions and sorting
// ============================================================================

/// Aggregation or date-part function applied to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Function {
    Sum,
    Avg,
    Median,
    Count,
    Countd,
    Min,
    Max,
    Stdev,
    Var,
    Collect,
    Year,
    Quarter,
    Month,
    Week,
    Day,
    TruncYear,
    TruncQuarter,
    TruncMonth,
    TruncWeek,
    TruncDay,
}

impl Function {
    /// Every function, in grammar order.
    pub const ALL: [Function; 20] = [
        Function::Sum,
        Function::Avg,
        Function::Median,
        Function::Count,
        Function::Countd,
        Function::Min,
        Function::Max,
        Function::Stdev,
        Function::Var,
        Function::Collect,
        Function::Year,
        Function::Quarter,
        Function::Month,
        Function::Week,
        Function::Day,
        Function::TruncYear,
        Function::TruncQuarter,
        Function::TruncMonth,
        Function::TruncWeek,
        Function::TruncDay,
    ];

    /// Wire name of the function.
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::Sum => "SUM",
            Function::Avg => "AVG",
            Function::Median => "MEDIAN",
            Function::Count => "COUNT",
            Function::Countd => "COUNTD",
            Function::Min => "MIN",
            Function::Max => "MAX",
            Function::Stdev => "STDEV",
            Function::Var => "VAR",
            Function::Collect => "COLLECT",
            Function::Year => "YEAR",
            Function::Quarter => "QUARTER",
            Function::Month => "MONTH",
            Function::Week => "WEEK",
            Function::Day => "DAY",
            Function::TruncYear => "TRUNC_YEAR",
            Function::TruncQuarter => "TRUNC_QUARTER",
            Function::TruncMonth => "TRUNC_MONTH",
            Function::TruncWeek => "TRUNC_WEEK",
            Function::TruncDay => "TRUNC_DAY",
        }
    }

    /// Aggregations that only make sense over numeric values.
    pub fn requires_numeric(&self) -> bool {
        matches!(
            self,
            Function::Sum | Function::Avg | Function::Median | Function::Stdev | Function::Var
        )
    }

    /// Date-part and date-truncation functions.
    pub fn is_date_part(&self) -> bool {
        matches!(
            self,
            Function::Year
                | Function::Quarter
                | Function::Month
                | Function::Week
                | Function::Day
                | Function::TruncYear
                | Function::TruncQuarter
                | Function::TruncMonth
                | Function::TruncWeek
                | Function::TruncDay
        )
    }

    /// Check if this function aggregates rows (as opposed to bucketing dates).
    pub fn is_aggregation(&self) -> bool {
        !self.is_date_part()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction for a field. Ascending when omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

// ============================================================================
// Fields
// ============================================================================

/// A projected column, optionally aggregated, aliased and sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldSpec {
    /// Catalog caption, or the user-supplied name of a calculation.
    pub field_caption: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<Function>,

    /// Calculation expression; when present the caption is just a label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_alias: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_decimal_places: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<SortDirection>,

    /// Lower numbers sort first. Must be positive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_priority: Option<i64>,
}

impl FieldSpec {
    /// A plain field reference.
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            field_caption: caption.into(),
            function: None,
            calculation: None,
            field_alias: None,
            max_decimal_places: None,
            sort_direction: None,
            sort_priority: None,
        }
    }

    /// A named calculation.
    pub fn calculated(caption: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            calculation: Some(expression.into()),
            ..Self::new(caption)
        }
    }

    pub fn with_function(mut self, function: Function) -> Self {
        self.function = Some(function);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.field_alias = Some(alias.into());
        self
    }

    pub fn sorted(mut self, direction: SortDirection, priority: i64) -> Self {
        self.sort_direction = Some(direction);
        self.sort_priority = Some(priority);
        self
    }

    /// Whether this field is a calculation rather than a catalog column.
    pub fn is_calculation(&self) -> bool {
        self.calculation.is_some()
    }

    /// Column name the service uses for this field in result rows.
    pub fn output_name(&self) -> &str {
        self.field_alias.as_deref().unwrap_or(&self.field_caption)
    }
}

/// Field reference inside a filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilterField {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_caption: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<Function>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<String>,
}

impl FilterField {
    pub fn caption(caption: impl Into<String>) -> Self {
        Self {
            field_caption: Some(caption.into()),
            function: None,
            calculation: None,
        }
    }

    pub fn with_function(mut self, function: Function) -> Self {
        self.function = Some(function);
        self
    }

    pub fn calculation(expression: impl Into<String>) -> Self {
        Self {
            field_caption: None,
            function: None,
            calculation: Some(expression.into()),
        }
    }

    /// Identity used for the one-filter-per-(field, function) rule.
    pub fn key(&self) -> (String, Option<Function>) {
        let name = match (&self.field_caption, &self.calculation) {
            (Some(caption), _) => caption.clone(),
            (None, Some(calc)) => format!("calculation:{calc}"),
            (None, None) => String::new(),
        };
        (name, self.function)
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.field_caption, &self.calculation, self.function) {
            (Some(caption), _, Some(function)) => write!(f, "{function}({caption})"),
            (Some(caption), _, None) => write!(f, "{caption}"),
            (None, Some(calc), _) => write!(f, "calculation `{calc}`"),
            (None, None, _) => f.write_str("<unnamed field>"),
        }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// A typed predicate narrowing rows. Discriminated on `filterType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filterType")]
pub enum FilterSpec {
    #[serde(rename = "SET")]
    Set(SetFilter),

    #[serde(rename = "MATCH")]
    Match(MatchFilter),

    #[serde(rename = "QUANTITATIVE_NUMERICAL")]
    QuantitativeNumerical(QuantitativeNumericalFilter),

    #[serde(rename = "QUANTITATIVE_DATE")]
    QuantitativeDate(QuantitativeDateFilter),

    /// Relative date window anchored on a date (wire name `DATE`).
    #[serde(rename = "DATE")]
    RelativeDate(RelativeDateFilter),

    /// Top/bottom N by a measure (wire name `TOP`).
    #[serde(rename = "TOP")]
    TopN(TopNFilter),
}

impl FilterSpec {
    /// The field this filter narrows.
    pub fn field(&self) -> &FilterField {
        match self {
            FilterSpec::Set(f) => &f.field,
            FilterSpec::Match(f) => &f.field,
            FilterSpec::QuantitativeNumerical(f) => &f.field,
            FilterSpec::QuantitativeDate(f) => &f.field,
            FilterSpec::RelativeDate(f) => &f.field,
            FilterSpec::TopN(f) => &f.field,
        }
    }

    /// Wire discriminator of this filter.
    pub fn kind(&self) -> &'static str {
        match self {
            FilterSpec::Set(_) => "SET",
            FilterSpec::Match(_) => "MATCH",
            FilterSpec::QuantitativeNumerical(_) => "QUANTITATIVE_NUMERICAL",
            FilterSpec::QuantitativeDate(_) => "QUANTITATIVE_DATE",
            FilterSpec::RelativeDate(_) => "DATE",
            FilterSpec::TopN(_) => "TOP",
        }
    }

    pub fn is_context(&self) -> bool {
        match self {
            FilterSpec::Set(f) => f.context,
            FilterSpec::Match(f) => f.context,
            FilterSpec::QuantitativeNumerical(f) => f.context,
            FilterSpec::QuantitativeDate(f) => f.context,
            FilterSpec::RelativeDate(f) => f.context,
            FilterSpec::TopN(f) => f.context,
        }
    }

    /// Quantitative sub-kind, for the two quantitative filter families.
    pub fn quantitative_type(&self) -> Option<QuantitativeFilterType> {
        match self {
            FilterSpec::QuantitativeNumerical(f) => f.quantitative_filter_type,
            FilterSpec::QuantitativeDate(f) => f.quantitative_filter_type,
            _ => None,
        }
    }
}

/// Membership in (or exclusion from) an explicit value set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SetFilter {
    pub field: FilterField,

    #[serde(default)]
    pub values: Vec<Value>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub exclude: bool,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub context: bool,
}

impl SetFilter {
    pub fn new(field: FilterField, values: Vec<Value>) -> Self {
        Self {
            field,
            values,
            exclude: false,
            context: false,
        }
    }

    pub fn excluding(mut self) -> Self {
        self.exclude = true;
        self
    }
}

/// Text match on a string field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatchFilter {
    pub field: FilterField,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,

    #[serde(default, deserialize_with = "lenient_bool")]
    pub exclude: bool,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub context: bool,
}

/// Sub-kind shared by numeric and date quantitative filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuantitativeFilterType {
    Range,
    Min,
    Max,
    OnlyNull,
    OnlyNonNull,
}

impl QuantitativeFilterType {
    pub const ALL: [QuantitativeFilterType; 5] = [
        QuantitativeFilterType::Range,
        QuantitativeFilterType::Min,
        QuantitativeFilterType::Max,
        QuantitativeFilterType::OnlyNull,
        QuantitativeFilterType::OnlyNonNull,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuantitativeFilterType::Range => "RANGE",
            QuantitativeFilterType::Min => "MIN",
            QuantitativeFilterType::Max => "MAX",
            QuantitativeFilterType::OnlyNull => "ONLY_NULL",
            QuantitativeFilterType::OnlyNonNull => "ONLY_NON_NULL",
        }
    }

    /// (needs lower bound, needs upper bound)
    pub fn required_bounds(&self) -> (bool, bool) {
        match self {
            QuantitativeFilterType::Range => (true, true),
            QuantitativeFilterType::Min => (true, false),
            QuantitativeFilterType::Max => (false, true),
            QuantitativeFilterType::OnlyNull | QuantitativeFilterType::OnlyNonNull => {
                (false, false)
            }
        }
    }
}

/// Numeric bounds on a measure or numeric dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuantitativeNumericalFilter {
    pub field: FilterField,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantitative_filter_type: Option<QuantitativeFilterType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_nulls: Option<bool>,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub context: bool,
}

impl QuantitativeNumericalFilter {
    pub fn range(field: FilterField, min: f64, max: f64) -> Self {
        Self {
            field,
            quantitative_filter_type: Some(QuantitativeFilterType::Range),
            min: Some(min),
            max: Some(max),
            include_nulls: None,
            context: false,
        }
    }
}

/// Absolute date bounds (`YYYY-MM-DD`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QuantitativeDateFilter {
    pub field: FilterField,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantitative_filter_type: Option<QuantitativeFilterType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_nulls: Option<bool>,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub context: bool,
}

impl QuantitativeDateFilter {
    pub fn range(
        field: FilterField,
        min_date: impl Into<String>,
        max_date: impl Into<String>,
    ) -> Self {
        Self {
            field,
            quantitative_filter_type: Some(QuantitativeFilterType::Range),
            min_date: Some(min_date.into()),
            max_date: Some(max_date.into()),
            include_nulls: None,
            context: false,
        }
    }
}

/// Units of a relative date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeriodType {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Quarters,
    Years,
}

impl PeriodType {
    pub const ALL: [&'static str; 7] = [
        "MINUTES", "HOURS", "DAYS", "WEEKS", "MONTHS", "QUARTERS", "YEARS",
    ];
}

/// Direction of a relative date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DateRangeType {
    Current,
    Last,
    LastN,
    Next,
    NextN,
    ToDate,
}

impl DateRangeType {
    pub const ALL: [&'static str; 6] = ["CURRENT", "LAST", "LASTN", "NEXT", "NEXTN", "TODATE"];

    /// LASTN and NEXTN carry a `rangeN` count.
    pub fn needs_range_n(&self) -> bool {
        matches!(self, DateRangeType::LastN | DateRangeType::NextN)
    }
}

/// Date window relative to an anchor (today when omitted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RelativeDateFilter {
    pub field: FilterField,

    pub period_type: PeriodType,

    pub date_range_type: DateRangeType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_n: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_nulls: Option<bool>,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub context: bool,
}

/// Which end of the ranking a top-N filter keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TopDirection {
    #[default]
    Top,
    Bottom,
}

/// Keep the N members of `field` ranked by `fieldToMeasure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TopNFilter {
    pub field: FilterField,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub how_many: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_to_measure: Option<FilterField>,

    #[serde(default)]
    pub direction: TopDirection,

    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "is_false")]
    pub context: bool,
}

// ============================================================================
// Query
// ============================================================================

/// The `query` body sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Query {
    pub fields: Vec<FieldSpec>,

    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

impl Query {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            filters: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: FilterSpec) -> Self {
        self.filters.push(filter);
        self
    }

    /// Single-field probe used to sample distinct values of a column.
    pub fn probe(caption: impl Into<String>) -> Self {
        Self::new(vec![FieldSpec::new(caption)])
    }

    /// Decode a query from a JSON value.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn to_value(&self) -> Value {
        // Serializing plain data into a Value cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Compact JSON rendering, as echoed back to the model and the caller.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Captions projected by this query (calculations included).
    pub fn captions(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.field_caption.as_str())
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

fn is_false(value: &bool) -> bool {
    !*value
}

/// Accept `true`/`false` as booleans or as strings.
///
/// Model output frequently quotes booleans (`"exclude": "false"`).
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(D::Error::custom(format!(
                "expected a boolean, found \"{other}\""
            ))),
        },
    }
}
