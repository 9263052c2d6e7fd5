//! Naming utilities for schema_catalog
//!
//! Singular/plural table matching, identifier splitting and similarity, and
//! per-engine identifier quoting.

use inflector::Inflector;
use std::collections::HashMap;

use crate::catalog::types::EngineKind;

/// Convert a singular name to plural
pub fn pluralize(name: &str) -> String {
    // Handle special cases first
    match name.to_lowercase().as_str() {
        "person" => "people".to_string(),
        "child" => "children".to_string(),
        "man" => "men".to_string(),
        "woman" => "women".to_string(),
        "mouse" => "mice".to_string(),
        _ => name.to_plural(),
    }
}

/// Convert a plural name to singular
pub fn singularize(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "people" => "person".to_string(),
        "children" => "child".to_string(),
        "men" => "man".to_string(),
        "women" => "woman".to_string(),
        "mice" => "mouse".to_string(),
        "status" | "address" | "analysis" => name.to_lowercase(),
        _ => name.to_singular(),
    }
}

/// Whether a table name and an entity name refer to the same thing,
/// e.g. `customers` and `customer`
pub fn same_entity(table_name: &str, entity: &str) -> bool {
    let table = table_name.to_lowercase();
    let entity = entity.to_lowercase();
    table == entity || singularize(&table) == entity || pluralize(&entity) == table
}

/// Split a compound name (camelCase, snake_case, etc.) into lowercase words
pub fn split_into_words(name: &str) -> Vec<String> {
    if name.contains('_') || name.contains('-') || name.contains(' ') {
        return name
            .split(|c| c == '_' || c == '-' || c == ' ')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();
    }

    let mut words = Vec::new();
    let mut current_word = String::new();

    for (i, c) in name.char_indices() {
        if i > 0 && c.is_uppercase() && !current_word.is_empty() {
            words.push(std::mem::take(&mut current_word));
        }
        current_word.push(c);
    }

    if !current_word.is_empty() {
        words.push(current_word);
    }

    words.iter().map(|w| w.to_lowercase()).collect()
}

fn bigrams(s: &str) -> HashMap<(char, char), usize> {
    let chars: Vec<char> = s.to_lowercase().chars().collect();
    let mut grams = HashMap::new();
    for pair in chars.windows(2) {
        *grams.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    grams
}

/// Sørensen–Dice coefficient over character bigrams, in [0, 1]
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let (left, right) = (bigrams(a), bigrams(b));
    let total: usize = left.values().sum::<usize>() + right.values().sum::<usize>();
    if total == 0 {
        return if a.eq_ignore_ascii_case(b) { 1.0 } else { 0.0 };
    }
    let shared: usize = left
        .iter()
        .map(|(gram, n)| right.get(gram).map_or(0, |m| (*n).min(*m)))
        .sum();
    2.0 * shared as f64 / total as f64
}

/// Quote an identifier for the given engine, escaping embedded quote characters
pub fn quote_identifier(name: &str, engine: EngineKind) -> String {
    match engine {
        EngineKind::Postgres | EngineKind::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        EngineKind::SqlServer => format!("[{}]", name.replace(']', "]]")),
    }
}
