//! Query string assembly.
//!
//! Everything here is pure string building over an album's field schema;
//! the live connection is only needed to look that schema up.

pub mod quicksearch;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::schema::{escape_value, quote_column, quote_table, table_name_for, ID_COLUMN};
use crate::db::{Database, MetaItemField};
use crate::error::{Result, StoreError};
use crate::types::{self, FieldType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryOperator {
    Equals,
    NotEquals,
    Contains,
    Smaller,
    SmallerOrEqual,
    Bigger,
    BiggerOrEqual,
    DateEquals,
    DateBefore,
    DateBeforeOrEqual,
    DateAfterOrEqual,
    DateAfter,
}

impl QueryOperator {
    pub const ALL: [QueryOperator; 12] = [
        QueryOperator::Equals,
        QueryOperator::NotEquals,
        QueryOperator::Contains,
        QueryOperator::Smaller,
        QueryOperator::SmallerOrEqual,
        QueryOperator::Bigger,
        QueryOperator::BiggerOrEqual,
        QueryOperator::DateEquals,
        QueryOperator::DateBefore,
        QueryOperator::DateBeforeOrEqual,
        QueryOperator::DateAfterOrEqual,
        QueryOperator::DateAfter,
    ];

    /// Comparison token emitted into the query.
    pub fn sql_token(&self) -> &'static str {
        match self {
            QueryOperator::Equals => "=",
            QueryOperator::NotEquals => "!=",
            QueryOperator::Contains => "like",
            QueryOperator::Smaller => "<",
            QueryOperator::SmallerOrEqual => "<=",
            QueryOperator::Bigger => ">",
            QueryOperator::BiggerOrEqual => ">=",
            QueryOperator::DateEquals => "=",
            QueryOperator::DateBefore => "<",
            QueryOperator::DateBeforeOrEqual => "<=",
            QueryOperator::DateAfterOrEqual => ">=",
            QueryOperator::DateAfter => ">",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueryOperator::Equals => "EQUALS",
            QueryOperator::NotEquals => "NOT_EQUALS",
            QueryOperator::Contains => "CONTAINS",
            QueryOperator::Smaller => "SMALLER",
            QueryOperator::SmallerOrEqual => "SMALLER_OR_EQUAL",
            QueryOperator::Bigger => "BIGGER",
            QueryOperator::BiggerOrEqual => "BIGGER_OR_EQUAL",
            QueryOperator::DateEquals => "DATE_EQUALS",
            QueryOperator::DateBefore => "DATE_BEFORE",
            QueryOperator::DateBeforeOrEqual => "DATE_BEFORE_OR_EQUAL",
            QueryOperator::DateAfterOrEqual => "DATE_AFTER_OR_EQUAL",
            QueryOperator::DateAfter => "DATE_AFTER",
        }
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryOperator {
    type Err = String;

    /// Accepts operator names (`SMALLER_OR_EQUAL`) and comparison tokens (`<=`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        QueryOperator::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(wanted))
            .or_else(|| {
                QueryOperator::ALL
                    .into_iter()
                    .find(|op| op.sql_token().eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| format!("unknown query operator: {s}"))
    }
}

/// One `field operator value` condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryComponent {
    pub field_name: String,
    pub operator: QueryOperator,
    pub value: String,
}

impl QueryComponent {
    pub fn new(field_name: impl Into<String>, operator: QueryOperator, value: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            operator,
            value: value.into(),
        }
    }
}

/// What a query is built against: an album and its current fields.
#[derive(Debug, Clone, Copy)]
pub struct QueryTarget<'a> {
    pub album: &'a str,
    pub fields: &'a [MetaItemField],
    pub date_format: &'a str,
}

impl QueryTarget<'_> {
    fn field(&self, name: &str) -> Result<&MetaItemField> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| StoreError::FieldNotFound {
                album: self.album.to_string(),
                field: name.to_string(),
            })
    }
}

pub fn select_all(album: &str) -> String {
    format!("SELECT * FROM {}", quote_table(&table_name_for(album)))
}

pub fn select_column(album: &str, column: &str) -> String {
    format!(
        " SELECT {} FROM {}",
        quote_column(column),
        quote_table(&table_name_for(album))
    )
}

pub fn count_as(album: &str, alias: &str) -> String {
    format!(
        " SELECT COUNT(*) AS {} FROM {}",
        alias,
        quote_table(&table_name_for(album))
    )
}

/// Build a query joining every component with the same combinator.
///
/// Text-like values are quoted with single quotes doubled, `CONTAINS`
/// wraps them in `%` wildcards, and all other values are inlined unquoted
/// after checking they are numbers (dates and times become milliseconds).
pub fn build_query(
    target: &QueryTarget<'_>,
    components: &[QueryComponent],
    combine_with_and: bool,
    sort_field: Option<&str>,
    sort_ascending: bool,
) -> Result<String> {
    let mut query = select_all(target.album);

    if !components.is_empty() {
        let combinator = if combine_with_and { " AND " } else { " OR " };
        let conditions = components
            .iter()
            .map(|component| {
                let field = target.field(&component.field_name)?;
                let value = render_value(field, component, target.date_format)?;
                Ok(format!(
                    "({} {} {})",
                    quote_column(&field.name),
                    component.operator.sql_token(),
                    value
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        query.push_str(" WHERE ");
        query.push_str(&conditions.join(combinator));
    }

    if let Some(sort) = sort_field.filter(|s| !s.is_empty()) {
        if sort != ID_COLUMN {
            target.field(sort)?;
        }
        query.push_str(&format!(
            " ORDER BY {} {}",
            quote_column(sort),
            if sort_ascending { "ASC" } else { "DESC" }
        ));
    }

    Ok(query)
}

fn render_value(field: &MetaItemField, component: &QueryComponent, date_format: &str) -> Result<String> {
    if field.field_type.is_text_like() {
        let escaped = escape_value(&component.value);
        return Ok(if component.operator == QueryOperator::Contains {
            format!("'%{escaped}%'")
        } else {
            format!("'{escaped}'")
        });
    }

    numeric_literal(field.field_type, &component.value, date_format).ok_or_else(|| {
        StoreError::InvalidValue {
            field: field.name.clone(),
            value: component.value.clone(),
            expected: field.field_type,
        }
    })
}

fn numeric_literal(field_type: FieldType, raw: &str, date_format: &str) -> Option<String> {
    let raw = raw.trim();
    match field_type {
        FieldType::Id | FieldType::Integer | FieldType::StarRating => {
            raw.parse::<i64>().ok().map(|v| v.to_string())
        }
        FieldType::Decimal => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.to_string()),
        FieldType::Date => raw.parse::<i64>().ok().map(|v| v.to_string()).or_else(|| {
            types::parse_date(raw, date_format).map(|d| types::date_to_millis(d).to_string())
        }),
        FieldType::Time => raw.parse::<i64>().ok().map(|v| v.to_string()).or_else(|| {
            types::parse_time(raw).map(|t| types::time_to_millis(t).to_string())
        }),
        FieldType::Text | FieldType::Url | FieldType::Uuid | FieldType::Option => None,
    }
}

impl Database {
    /// Build a query against the current schema of `album`.
    pub fn build_query(
        &self,
        components: &[QueryComponent],
        combine_with_and: bool,
        album: &str,
        sort_field: Option<&str>,
        sort_ascending: bool,
    ) -> Result<String> {
        let (album, fields) = self.album_with_schema(album)?;
        let target = QueryTarget {
            album: &album.name,
            fields: &fields,
            date_format: self.date_format(),
        };
        build_query(&target, components, combine_with_and, sort_field, sort_ascending)
    }
}
