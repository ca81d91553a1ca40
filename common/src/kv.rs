use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Par clave/valor emitido por las funciones map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no se pudo serializar el par {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("línea {line} mal formada: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Formato de los archivos intermedios. Intercambiable por nodo.
pub trait KvCodec: Send + Sync {
    fn serialize(&self, pairs: &[KeyValue]) -> Result<String, CodecError>;
    fn deserialize(&self, data: &str) -> Result<Vec<KeyValue>, CodecError>;
}

/// Un registro JSON por línea: `{"key":..,"value":..}`.
/// Claves y valores pueden llevar espacios o saltos de línea.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesCodec;

impl KvCodec for JsonLinesCodec {
    fn serialize(&self, pairs: &[KeyValue]) -> Result<String, CodecError> {
        let mut out = String::new();
        for (index, kv) in pairs.iter().enumerate() {
            let line =
                serde_json::to_string(kv).map_err(|source| CodecError::Encode { index, source })?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    fn deserialize(&self, data: &str) -> Result<Vec<KeyValue>, CodecError> {
        let mut out = Vec::new();
        for (idx, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let kv = serde_json::from_str::<KeyValue>(line)
                .map_err(|source| CodecError::Decode {
                    line: idx + 1,
                    source,
                })?;
            out.push(kv);
        }
        Ok(out)
    }
}

/// Partición reduce de una clave: hash(key) % n_reduce.
/// Todos los workers deben estar compilados con la misma toolchain.
pub fn partition_for(key: &str, n_reduce: u32) -> u32 {
    let mut h = DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() % n_reduce.max(1) as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_conserva_espacios_y_saltos_de_linea() {
        let pairs = vec![
            KeyValue::new("new york", "1"),
            KeyValue::new("b", "2 x.txt,y.txt"),
            KeyValue::new("multi", "a\nb"),
        ];
        let data = JsonLinesCodec.serialize(&pairs).unwrap();
        assert_eq!(data.lines().count(), 3);

        let back = JsonLinesCodec.deserialize(&data).unwrap();
        assert_eq!(back, pairs);
    }

    #[test]
    fn json_lines_ignora_lineas_vacias_y_rechaza_mal_formadas() {
        assert!(JsonLinesCodec.deserialize("").unwrap().is_empty());
        let one = "\n{\"key\":\"x\",\"value\":\"1\"}\n\n";
        assert_eq!(JsonLinesCodec.deserialize(one).unwrap().len(), 1);

        let bad = "{\"key\":\"x\",\"value\":\"1\"}\nx 1\n";
        match JsonLinesCodec.deserialize(bad) {
            Err(CodecError::Decode { line, .. }) => assert_eq!(line, 2),
            other => panic!("se esperaba Decode, vino {:?}", other),
        }
    }

    #[test]
    fn partition_for_es_determinista_y_en_rango() {
        for key in ["a", "b", "c", "xyz", "otro"] {
            let p = partition_for(key, 7);
            assert!(p < 7);
            assert_eq!(p, partition_for(key, 7));
        }
        // n_reduce = 1 siempre cae en la partición 0
        assert_eq!(partition_for("lo-que-sea", 1), 0);
    }
}
