//! Structural validation of candidate queries.
//!
//! Runs entirely offline against the grounded catalog, so a bad candidate
//! never reaches the service. Every violation is collected and reported at
//! once; the rendered list becomes the next attempt's feedback.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::metadata::{DataType, DatasetMetadata};
use crate::schema::{FieldSpec, FilterField, FilterSpec, Function, Query};

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])$").unwrap()
});

/// Validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Payload does not decode into the grammar.
    Malformed { location: String, message: String },
    /// Query projects nothing.
    NoFields,
    /// A field or filter names no caption.
    EmptyCaption { location: String },
    /// Reference to a field missing from the catalog.
    UnknownField {
        location: String,
        caption: String,
        suggestions: Vec<String>,
    },
    /// Two filters on the same (field, function) pair.
    DuplicateFilter {
        field: String,
        first: usize,
        second: usize,
        mergeable: bool,
    },
    /// A filter lacks a property its kind requires.
    MissingProperty {
        location: String,
        filter_type: String,
        property: String,
    },
    /// A property holds an unusable value.
    InvalidValue {
        location: String,
        property: String,
        issue: String,
    },
    /// Function does not apply to the field's declared type.
    IncompatibleFunction {
        location: String,
        caption: String,
        function: Function,
        data_type: DataType,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Malformed { location, message } => {
                write!(f, "{}: {}", location, message)
            }
            ValidationError::NoFields => {
                write!(f, "query must project at least one field")
            }
            ValidationError::EmptyCaption { location } => {
                write!(f, "{}: fieldCaption must not be empty", location)
            }
            ValidationError::UnknownField {
                location,
                caption,
                suggestions,
            } => {
                write!(f, "{}: unknown field '{}'", location, caption)?;
                match suggestions.as_slice() {
                    [] => write!(f, " (not in the data model)"),
                    names => write!(f, " (did you mean '{}'?)", names.join("', '")),
                }
            }
            ValidationError::DuplicateFilter {
                field,
                first,
                second,
                mergeable,
            } => {
                write!(
                    f,
                    "query.filters[{}] and query.filters[{}] both filter {}; only one filter per field and function is allowed",
                    first, second, field
                )?;
                if *mergeable {
                    write!(f, ". Merge the bounds into a single RANGE filter")?;
                }
                Ok(())
            }
            ValidationError::MissingProperty {
                location,
                filter_type,
                property,
            } => {
                write!(f, "{}: {} filter requires {}", location, filter_type, property)
            }
            ValidationError::InvalidValue {
                location,
                property,
                issue,
            } => {
                write!(f, "{}.{}: {}", location, property, issue)
            }
            ValidationError::IncompatibleFunction {
                location,
                caption,
                function,
                data_type,
            } => {
                write!(
                    f,
                    "{}: {} cannot be applied to '{}' ({})",
                    location, function, caption, data_type
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Every violation found in one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub errors: Vec<ValidationError>,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "query failed validation:")?;
        for error in &self.errors {
            write!(f, "\n- {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

/// Decode and validate a candidate payload.
pub fn check(payload: &Value, metadata: &DatasetMetadata) -> Result<Query, ValidationFailure> {
    let query = decode_query(payload).map_err(|errors| ValidationFailure { errors })?;
    validate(&query, metadata).map_err(|errors| ValidationFailure { errors })?;
    Ok(query)
}

/// Decode a payload into the grammar, reporting serde messages per item.
pub fn decode_query(payload: &Value) -> Result<Query, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let Some(object) = payload.as_object() else {
        return Err(vec![ValidationError::Malformed {
            location: "query".to_string(),
            message: format!("expected a JSON object, found {}", json_kind(payload)),
        }]);
    };

    for key in object.keys() {
        if key != "fields" && key != "filters" {
            let mut message = format!("unknown property `{}`, expected `fields` or `filters`", key);
            if key.starts_with("sort") {
                message.push_str("; sorting is set per field with sortDirection and sortPriority");
            }
            errors.push(ValidationError::Malformed {
                location: "query".to_string(),
                message,
            });
        }
    }

    let fields: Vec<FieldSpec> = match object.get("fields") {
        None => {
            errors.push(ValidationError::Malformed {
                location: "query".to_string(),
                message: "missing property `fields`".to_string(),
            });
            Vec::new()
        }
        Some(value) => decode_list(value, "query.fields", &mut errors),
    };

    let filters: Vec<FilterSpec> = match object.get("filters") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => decode_list(value, "query.filters", &mut errors),
    };

    if errors.is_empty() {
        Ok(Query { fields, filters })
    } else {
        Err(errors)
    }
}

fn decode_list<T>(value: &Value, location: &str, errors: &mut Vec<ValidationError>) -> Vec<T>
where
    T: for<'de> Deserialize<'de>,
{
    let Some(items) = value.as_array() else {
        errors.push(ValidationError::Malformed {
            location: location.to_string(),
            message: format!("expected an array, found {}", json_kind(value)),
        });
        return Vec::new();
    };

    let mut decoded = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match T::deserialize(item) {
            Ok(v) => decoded.push(v),
            Err(e) => errors.push(ValidationError::Malformed {
                location: format!("{}[{}]", location, i),
                message: e.to_string(),
            }),
        }
    }
    decoded
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Validate a decoded query against the dataset catalog.
pub fn validate(query: &Query, metadata: &DatasetMetadata) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Validate projected fields
    validate_fields(query, metadata, &mut errors);

    // Validate filter references and kind-specific properties
    validate_filters(query, metadata, &mut errors);

    // Validate one filter per (field, function)
    validate_unique_filters(query, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_fields(query: &Query, metadata: &DatasetMetadata, errors: &mut Vec<ValidationError>) {
    if query.fields.is_empty() {
        errors.push(ValidationError::NoFields);
    }

    for (i, field) in query.fields.iter().enumerate() {
        let location = format!("query.fields[{}]", i);

        if field.field_caption.trim().is_empty() {
            errors.push(ValidationError::EmptyCaption { location });
            continue;
        }

        if !field.is_calculation() {
            match metadata.field(&field.field_caption) {
                Some(catalog_field) => {
                    if let Some(function) = field.function {
                        check_function(
                            &location,
                            &field.field_caption,
                            function,
                            catalog_field.data_type,
                            errors,
                        );
                    }
                }
                None => errors.push(unknown_field(&location, &field.field_caption, metadata)),
            }
        }

        if let Some(priority) = field.sort_priority {
            if priority <= 0 {
                errors.push(ValidationError::InvalidValue {
                    location: location.clone(),
                    property: "sortPriority".to_string(),
                    issue: format!("must be a positive integer, found {}", priority),
                });
            }
        }

        if let Some(places) = field.max_decimal_places {
            if places < 0 {
                errors.push(ValidationError::InvalidValue {
                    location,
                    property: "maxDecimalPlaces".to_string(),
                    issue: format!("must not be negative, found {}", places),
                });
            }
        }
    }
}

fn check_function(
    location: &str,
    caption: &str,
    function: Function,
    data_type: DataType,
    errors: &mut Vec<ValidationError>,
) {
    if !data_type.is_known() {
        return;
    }
    let incompatible = (function.requires_numeric() && !data_type.is_numeric())
        || (function.is_date_part() && !data_type.is_temporal());
    if incompatible {
        errors.push(ValidationError::IncompatibleFunction {
            location: location.to_string(),
            caption: caption.to_string(),
            function,
            data_type,
        });
    }
}

fn unknown_field(location: &str, caption: &str, metadata: &DatasetMetadata) -> ValidationError {
    ValidationError::UnknownField {
        location: location.to_string(),
        caption: caption.to_string(),
        suggestions: metadata
            .similar_captions(caption)
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}

/// Resolve a filter's field reference; returns the catalog type when known.
fn resolve_filter_field(
    location: &str,
    field: &FilterField,
    query: &Query,
    metadata: &DatasetMetadata,
    errors: &mut Vec<ValidationError>,
) -> Option<DataType> {
    let caption = match (&field.field_caption, &field.calculation) {
        (Some(caption), _) if !caption.trim().is_empty() => caption,
        (_, Some(_)) => return None,
        _ => {
            errors.push(ValidationError::EmptyCaption {
                location: location.to_string(),
            });
            return None;
        }
    };

    if let Some(catalog_field) = metadata.field(caption) {
        if let Some(function) = field.function {
            check_function(location, caption, function, catalog_field.data_type, errors);
        }
        return Some(catalog_field.data_type);
    }

    // Calculations declared in `fields` may be filtered by name.
    let declared = query
        .fields
        .iter()
        .any(|f| f.is_calculation() && &f.field_caption == caption);
    if !declared {
        errors.push(unknown_field(location, caption, metadata));
    }
    None
}

fn validate_filters(query: &Query, metadata: &DatasetMetadata, errors: &mut Vec<ValidationError>) {
    for (i, filter) in query.filters.iter().enumerate() {
        let location = format!("query.filters[{}]", i);
        let field_location = format!("{}.field", location);
        let data_type =
            resolve_filter_field(&field_location, filter.field(), query, metadata, errors);
        let kind = filter.kind();

        let missing = |property: &str| ValidationError::MissingProperty {
            location: location.clone(),
            filter_type: kind.to_string(),
            property: property.to_string(),
        };

        match filter {
            FilterSpec::Set(set) => {
                if set.values.is_empty() {
                    errors.push(missing("at least one value in `values`"));
                }
            }
            FilterSpec::Match(m) => {
                let patterns = [&m.contains, &m.starts_with, &m.ends_with];
                if !patterns
                    .iter()
                    .any(|p| p.as_deref().is_some_and(|s| !s.is_empty()))
                {
                    errors.push(missing("one of `contains`, `startsWith` or `endsWith`"));
                }
            }
            FilterSpec::QuantitativeNumerical(q) => match q.quantitative_filter_type {
                None => errors.push(missing("`quantitativeFilterType`")),
                Some(qtype) => {
                    let (needs_min, needs_max) = qtype.required_bounds();
                    if needs_min && q.min.is_none() {
                        errors.push(missing(&format!("`min` for {}", qtype.as_str())));
                    }
                    if needs_max && q.max.is_none() {
                        errors.push(missing(&format!("`max` for {}", qtype.as_str())));
                    }
                    if let (Some(min), Some(max)) = (q.min, q.max) {
                        if min > max {
                            errors.push(ValidationError::InvalidValue {
                                location: location.clone(),
                                property: "min".to_string(),
                                issue: format!("min {} is greater than max {}", min, max),
                            });
                        }
                    }
                }
            },
            FilterSpec::QuantitativeDate(q) => {
                require_temporal(&field_location, filter, data_type, errors);
                check_date(&location, "minDate", q.min_date.as_deref(), errors);
                check_date(&location, "maxDate", q.max_date.as_deref(), errors);
                match q.quantitative_filter_type {
                    None => errors.push(missing("`quantitativeFilterType`")),
                    Some(qtype) => {
                        let (needs_min, needs_max) = qtype.required_bounds();
                        if needs_min && q.min_date.is_none() {
                            errors.push(missing(&format!("`minDate` for {}", qtype.as_str())));
                        }
                        if needs_max && q.max_date.is_none() {
                            errors.push(missing(&format!("`maxDate` for {}", qtype.as_str())));
                        }
                    }
                }
                if let (Some(min), Some(max)) = (&q.min_date, &q.max_date) {
                    // ISO dates order lexicographically
                    if is_date(min) && is_date(max) && min > max {
                        errors.push(ValidationError::InvalidValue {
                            location: location.clone(),
                            property: "minDate".to_string(),
                            issue: format!("minDate {} is after maxDate {}", min, max),
                        });
                    }
                }
            }
            FilterSpec::RelativeDate(r) => {
                require_temporal(&field_location, filter, data_type, errors);
                check_date(&location, "anchorDate", r.anchor_date.as_deref(), errors);
                if r.date_range_type.needs_range_n() {
                    match r.range_n {
                        None => errors.push(missing("`rangeN` for LASTN and NEXTN")),
                        Some(n) if n <= 0 => errors.push(ValidationError::InvalidValue {
                            location: location.clone(),
                            property: "rangeN".to_string(),
                            issue: format!("must be a positive integer, found {}", n),
                        }),
                        Some(_) => {}
                    }
                }
            }
            FilterSpec::TopN(top) => {
                match top.how_many {
                    None => errors.push(missing("`howMany`")),
                    Some(n) if n <= 0 => errors.push(ValidationError::InvalidValue {
                        location: location.clone(),
                        property: "howMany".to_string(),
                        issue: format!("must be a positive integer, found {}", n),
                    }),
                    Some(_) => {}
                }
                match &top.field_to_measure {
                    None => errors.push(missing("`fieldToMeasure`")),
                    Some(measure) => {
                        resolve_filter_field(
                            &format!("{}.fieldToMeasure", location),
                            measure,
                            query,
                            metadata,
                            errors,
                        );
                    }
                }
            }
        }
    }
}

fn require_temporal(
    location: &str,
    filter: &FilterSpec,
    data_type: Option<DataType>,
    errors: &mut Vec<ValidationError>,
) {
    let Some(data_type) = data_type else {
        return;
    };
    if data_type.is_known() && !data_type.is_temporal() && filter.field().function.is_none() {
        errors.push(ValidationError::InvalidValue {
            location: location.to_string(),
            property: "fieldCaption".to_string(),
            issue: format!(
                "{} filters need a DATE or DATETIME field, '{}' is {}",
                filter.kind(),
                filter.field(),
                data_type
            ),
        });
    }
}

fn is_date(value: &str) -> bool {
    DATE_PATTERN.is_match(value)
}

fn check_date(
    location: &str,
    property: &str,
    value: Option<&str>,
    errors: &mut Vec<ValidationError>,
) {
    if let Some(value) = value {
        if !is_date(value) {
            errors.push(ValidationError::InvalidValue {
                location: location.to_string(),
                property: property.to_string(),
                issue: format!("'{}' is not a YYYY-MM-DD date", value),
            });
        }
    }
}

fn validate_unique_filters(query: &Query, errors: &mut Vec<ValidationError>) {
    let mut seen: HashMap<(String, Option<Function>), usize> = HashMap::new();

    for (i, filter) in query.filters.iter().enumerate() {
        let key = filter.field().key();
        if key.0.is_empty() {
            continue;
        }
        match seen.get(&key) {
            Some(&first) => {
                let mergeable = query.filters[first].quantitative_type().is_some()
                    && filter.quantitative_type().is_some();
                errors.push(ValidationError::DuplicateFilter {
                    field: filter.field().to_string(),
                    first,
                    second: i,
                    mergeable,
                });
            }
            None => {
                seen.insert(key, i);
            }
        }
    }
}
