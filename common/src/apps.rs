use std::{collections::BTreeSet, path::Path, sync::Arc};

use crate::kv::KeyValue;

/// Funciones de negocio que el worker ejecuta en Progress.
pub trait MapReduceApp: Send + Sync {
    fn map(&self, filename: &str, contents: &str) -> Vec<KeyValue>;
    fn reduce(&self, key: &str, values: &[String]) -> String;
}

/// Busca una app por nombre ("wordcount", "indexer").
pub fn app_by_name(name: &str) -> Option<Arc<dyn MapReduceApp>> {
    match name {
        "wordcount" | "wc" => Some(Arc::new(WordCount)),
        "indexer" => Some(Arc::new(Indexer)),
        _ => None,
    }
}

/// Limpia un token: sólo alfanumérico y '_', en minúscula.
fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

fn tokens(contents: &str) -> impl Iterator<Item = String> + '_ {
    contents
        .split_whitespace()
        .map(normalize)
        .filter(|t| !t.is_empty())
}

/// WordCount clásico: (palabra, "1") por aparición, reduce = cantidad.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCount;

impl MapReduceApp for WordCount {
    fn map(&self, _filename: &str, contents: &str) -> Vec<KeyValue> {
        tokens(contents).map(|t| KeyValue::new(t, "1")).collect()
    }

    fn reduce(&self, _key: &str, values: &[String]) -> String {
        values.len().to_string()
    }
}

/// Índice invertido: para cada palabra, en qué documentos aparece.
#[derive(Debug, Clone, Copy, Default)]
pub struct Indexer;

impl MapReduceApp for Indexer {
    fn map(&self, filename: &str, contents: &str) -> Vec<KeyValue> {
        let doc = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(filename)
            .to_string();

        // una sola vez por documento
        let words: BTreeSet<String> = tokens(contents).collect();
        words
            .into_iter()
            .map(|w| KeyValue::new(w, doc.clone()))
            .collect()
    }

    fn reduce(&self, _key: &str, values: &[String]) -> String {
        let docs: BTreeSet<&str> = values.iter().map(|s| s.as_str()).collect();
        let list: Vec<&str> = docs.into_iter().collect();
        format!("{} {}", list.len(), list.join(","))
    }
}
