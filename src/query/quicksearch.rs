//! Free-text search across the quicksearchable fields of an album.

use crate::db::{AlbumItem, Database, MetaItemField};
use crate::error::Result;
use crate::types::{self, FieldType};

use super::{build_query, select_all, QueryComponent, QueryOperator, QueryTarget};

/// Build a query matching any term in any quicksearchable field.
///
/// Text-like fields get a pattern match. Numeric and date fields only take
/// part for terms that parse as their type, and then as an equality match.
/// Blank terms are ignored; no terms at all selects every item.
pub fn quick_search(target: &QueryTarget<'_>, terms: &[String]) -> Result<String> {
    let terms: Vec<&str> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    let fields: Vec<&MetaItemField> = target.fields.iter().filter(|f| f.quicksearchable).collect();

    if terms.is_empty() || fields.is_empty() {
        return Ok(select_all(target.album));
    }

    let components: Vec<QueryComponent> = terms
        .iter()
        .flat_map(|term| fields.iter().filter_map(|field| component_for(field, term, target.date_format)))
        .collect();

    if components.is_empty() {
        // Nothing searchable can match any of the terms.
        return Ok(format!("{} WHERE 0", select_all(target.album)));
    }

    build_query(target, &components, false, None, true)
}

fn component_for(field: &MetaItemField, term: &str, date_format: &str) -> Option<QueryComponent> {
    let operator = match field.field_type {
        FieldType::Text | FieldType::Url | FieldType::Option | FieldType::Uuid => {
            QueryOperator::Contains
        }
        FieldType::Integer | FieldType::StarRating | FieldType::Id => {
            term.parse::<i64>().ok()?;
            QueryOperator::Equals
        }
        FieldType::Decimal => {
            term.parse::<f64>().ok().filter(|v| v.is_finite())?;
            QueryOperator::Equals
        }
        FieldType::Date => {
            types::parse_date(term, date_format)?;
            QueryOperator::DateEquals
        }
        FieldType::Time => return None,
    };
    Some(QueryComponent::new(field.name.clone(), operator, term))
}

impl Database {
    pub fn quick_search(&self, album: &str, terms: &[String]) -> Result<String> {
        let (album, fields) = self.album_with_schema(album)?;
        let target = QueryTarget {
            album: &album.name,
            fields: &fields,
            date_format: self.date_format(),
        };
        quick_search(&target, terms)
    }

    pub fn quick_search_items(&self, album: &str, terms: &[String]) -> Result<Vec<AlbumItem>> {
        let query = self.quick_search(album, terms)?;
        self.query_items(album, &query)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::FieldValue;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    pub(crate) fn insert_dvds(db: &mut Database) {
        db.create_album(
            "DVDs",
            &[
                MetaItemField::new("Title", FieldType::Text).quicksearchable(),
                MetaItemField::new("Actors", FieldType::Text).quicksearchable(),
                MetaItemField::new("Year", FieldType::Integer).quicksearchable(),
            ],
            false,
        )
        .unwrap();

        for (title, actors, year) in [
            ("Independence Day", "Will Smith, Bill Pullman", 1996),
            ("Wild Wild West", "Will Smith, Kevin Kline", 1999),
            ("RED", "Bruce Willis", 2010),
        ] {
            let item = AlbumItem::new("DVDs")
                .with_field("Title", FieldValue::Text(title.into()))
                .with_field("Actors", FieldValue::Text(actors.into()))
                .with_field("Year", FieldValue::Integer(year));
            db.add_item(&item, true).unwrap();
        }
    }

    fn titles(items: &[AlbumItem]) -> BTreeSet<String> {
        items
            .iter()
            .filter_map(|i| i.value("Title"))
            .map(|v| v.to_string())
            .collect()
    }

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_query_shape() {
        let fields = [
            MetaItemField::new("Title", FieldType::Text).quicksearchable(),
            MetaItemField::new("Year", FieldType::Integer).quicksearchable(),
            MetaItemField::new("Notes", FieldType::Text),
        ];
        let target = QueryTarget {
            album: "DVDs",
            fields: &fields,
            date_format: "%d/%m/%Y",
        };

        assert_eq!(quick_search(&target, &[]).unwrap(), "SELECT * FROM 'dvds'");
        assert_eq!(quick_search(&target, &terms(&["  "])).unwrap(), "SELECT * FROM 'dvds'");
        assert_eq!(
            quick_search(&target, &terms(&["red", "1999"])).unwrap(),
            "SELECT * FROM 'dvds' WHERE ([Title] like '%red%') OR ([Title] like '%1999%') OR ([Year] = 1999)"
        );
    }

    #[test]
    fn test_no_applicable_field_matches_nothing() {
        let fields = [MetaItemField::new("Year", FieldType::Integer).quicksearchable()];
        let target = QueryTarget {
            album: "DVDs",
            fields: &fields,
            date_format: "%d/%m/%Y",
        };
        assert_eq!(
            quick_search(&target, &terms(&["Smith"])).unwrap(),
            "SELECT * FROM 'dvds' WHERE 0"
        );
    }

    #[test]
    fn test_smith_finds_the_first_two() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        insert_dvds(&mut db);

        let found = db.quick_search_items("DVDs", &terms(&["Smith"])).unwrap();
        assert_eq!(
            titles(&found),
            BTreeSet::from(["Independence Day".to_string(), "Wild Wild West".to_string()])
        );
        assert_eq!(db.quick_search_items("DVDs", &[]).unwrap().len(), 3);
    }

    #[test]
    fn test_terms_are_or_combined() {
        let dir = tempdir().unwrap();
        let mut db = Database::open(dir.path()).unwrap();
        insert_dvds(&mut db);

        for (a, b) in [("Kline", "Willis"), ("Pullman", "2010"), ("Smith", "West"), ("zzz", "RED")] {
            let left = titles(&db.quick_search_items("DVDs", &terms(&[a])).unwrap());
            let right = titles(&db.quick_search_items("DVDs", &terms(&[b])).unwrap());
            let both = titles(&db.quick_search_items("DVDs", &terms(&[a, b])).unwrap());
            assert_eq!(both, left.union(&right).cloned().collect(), "{a} {b}");
        }
    }
}
