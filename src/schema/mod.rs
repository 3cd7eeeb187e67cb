//! Query grammar and the catalog used to teach it.

pub mod catalog;
pub mod query;

pub use catalog::{AntiPattern, SchemaCatalog, WorkedExample};
pub use query::{
    DateRangeType, FieldSpec, FilterField, FilterSpec, Function, MatchFilter, PeriodType,
    QuantitativeDateFilter, QuantitativeFilterType, QuantitativeNumericalFilter, Query,
    RelativeDateFilter, SetFilter, SortDirection, TopDirection, TopNFilter,
};
