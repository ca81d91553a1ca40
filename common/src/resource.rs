use std::fmt;

use serde::{Deserialize, Serialize};

pub type NodeId = String;

/// Tipo de unidad de trabajo. Cada tipo tiene su propio espacio de ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Map,
    Reduce,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Map => "map",
            ResourceKind::Reduce => "reduce",
        }
    }

    /// Acepta "map" / "reduce" (cualquier capitalización).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "map" => Some(ResourceKind::Map),
            "reduce" => Some(ResourceKind::Reduce),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identidad de un recurso: el índice sólo es único dentro de su tipo,
/// por eso toda búsqueda usa el par (tipo, índice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub index: u32,
}

impl ResourceId {
    pub fn map(index: u32) -> Self {
        Self {
            kind: ResourceKind::Map,
            index,
        }
    }

    pub fn reduce(index: u32) -> Self {
        Self {
            kind: ResourceKind::Reduce,
            index,
        }
    }

    /// Nombre de tarea del lado worker: "map-3", "reduce-0".
    pub fn task_name(&self) -> String {
        format!("{}-{}", self.kind, self.index)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Pending,
    InProgress,
    Done,
}

/// Ubicación de datos (por ahora siempre un archivo).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
}

impl Location {
    pub fn new(file: impl Into<String>) -> Self {
        Self { file: file.into() }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file)
    }
}

/// Par (partición destino, ubicación) producido por un map
/// y consumido por el reduce de esa partición.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionResult {
    pub partition: u32,
    pub location: Location,
}
