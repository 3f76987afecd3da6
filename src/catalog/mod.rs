//! Schema catalog: what can be measured and how each field is typed.
//!
//! The catalog is the read-mostly tree Item → Parametro → CampoParametro.
//! Measurement rows point into it but never own it; mutation is rare and
//! administrative.

use serde::{Deserialize, Serialize};

/// Capability tag declaring which value slot is legal for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipoValor {
    Number,
    Text,
    Boolean,
    Json,
}

impl TipoValor {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipoValor::Number => "number",
            TipoValor::Text => "text",
            TipoValor::Boolean => "boolean",
            TipoValor::Json => "json",
        }
    }
}

/// A measurement category, one section of the clinical form
/// (e.g. "Control Fetal").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub codigo: String, // unique
    pub nombre: String,
}

/// One measurable quantity within an Item (e.g. "Frec. Cardiaca").
///
/// `activo` soft-disables a parameter without deleting its history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parametro {
    pub id: i64,
    pub item_id: i64,
    pub codigo: String, // unique within the item
    pub nombre: String,
    pub unidad: Option<String>,
    pub orden: u32,
    pub activo: bool,
}

impl Parametro {
    /// Display order: item, then explicit orden, then identity.
    pub fn sort_key(&self) -> (i64, u32, i64) {
        (self.item_id, self.orden, self.id)
    }
}

/// One typed sub-field of a Parametro (e.g. "Sistólica" under
/// "Tensión arterial").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampoParametro {
    pub id: i64,
    pub parametro_id: i64,
    pub codigo: String, // unique within the parametro
    pub nombre: String,
    pub tipo_valor: TipoValor,
    pub unidad: Option<String>,
    pub orden: u32,
}

impl CampoParametro {
    pub fn sort_key(&self) -> (i64, u32, i64) {
        (self.parametro_id, self.orden, self.id)
    }
}

/// Create/replace payload for an Item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoItem {
    pub codigo: String,
    pub nombre: String,
}

/// Create/replace payload for a Parametro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoParametro {
    pub item_id: i64,
    pub codigo: String,
    pub nombre: String,
    pub unidad: Option<String>,
    #[serde(default = "orden_inicial")]
    pub orden: u32,
    #[serde(default = "activo_inicial")]
    pub activo: bool,
}

/// Create/replace payload for a CampoParametro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoCampoParametro {
    pub parametro_id: i64,
    pub codigo: String,
    pub nombre: String,
    pub tipo_valor: TipoValor,
    pub unidad: Option<String>,
    #[serde(default = "orden_inicial")]
    pub orden: u32,
}

fn orden_inicial() -> u32 {
    1
}

fn activo_inicial() -> bool {
    true
}
