//! Tagged measurement store types.
//!
//! A Medicion is one timestamped observation of a Parametro within a
//! Formulario; each of its values is typed at runtime. The storage schema's
//! four mutually-exclusive nullable columns are modeled as an explicit sum
//! type — an invalid cell (zero or two populated slots) is unrepresentable
//! in the domain and can only appear at the wire boundary, where it is
//! rejected before anything is written.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::TipoValor;
use crate::error::StoreError;

/// One typed measurement value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Valor {
    Number(Decimal),
    Text(String),
    Boolean(bool),
    Json(serde_json::Value),
}

impl Valor {
    pub fn tipo(&self) -> TipoValor {
        match self {
            Valor::Number(_) => TipoValor::Number,
            Valor::Text(_) => TipoValor::Text,
            Valor::Boolean(_) => TipoValor::Boolean,
            Valor::Json(_) => TipoValor::Json,
        }
    }
}

/// One timestamped observation of a single Parametro within a Formulario.
/// At most one exists per (formulario, parametro, tomada_en); repeated
/// capture at the same instant updates the existing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medicion {
    pub id: i64,
    pub formulario_id: i64,
    pub parametro_id: i64,
    pub tomada_en: DateTime<Utc>,
    pub observacion: Option<String>,
}

/// One typed value for one CampoParametro within one Medicion.
/// Unique per (medicion, campo); a repeat write replaces the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicionValor {
    pub id: i64,
    pub medicion_id: i64,
    pub campo_id: i64,
    pub valor: Valor,
}

/// Wire form of a value: the four-column shape clients submit and read.
///
/// Exactly one slot must be non-null. This is validated here, before any
/// write path sees the payload — never silently coerced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValorPayload {
    pub valor_number: Option<Decimal>,
    pub valor_text: Option<String>,
    pub valor_boolean: Option<bool>,
    pub valor_json: Option<serde_json::Value>,
}

impl ValorPayload {
    pub fn into_valor(self) -> Result<Valor, StoreError> {
        let presentes = [
            self.valor_number.is_some(),
            self.valor_text.is_some(),
            self.valor_boolean.is_some(),
            self.valor_json.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();

        if presentes != 1 {
            return Err(StoreError::validation(
                "Debe proporcionarse exactamente un tipo de valor (number, text, boolean o json).",
            ));
        }

        Ok(if let Some(n) = self.valor_number {
            Valor::Number(n)
        } else if let Some(t) = self.valor_text {
            Valor::Text(t)
        } else if let Some(b) = self.valor_boolean {
            Valor::Boolean(b)
        } else {
            // presentes == 1 and the first three slots are empty
            Valor::Json(self.valor_json.unwrap_or(serde_json::Value::Null))
        })
    }
}

/// Create payload for a Medicion, optionally carrying nested values.
/// Posting the same (formulario, parametro, tomada_en) again updates the
/// existing row instead of duplicating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevaMedicion {
    pub formulario_id: i64,
    pub parametro_id: i64,
    pub tomada_en: DateTime<Utc>,
    pub observacion: Option<String>,
    #[serde(default)]
    pub valores: Vec<NuevoValor>,
}

/// One nested value in a Medicion create, or the body of a value upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoValor {
    pub campo_id: i64,
    #[serde(flatten)]
    pub valor: ValorPayload,
}

impl From<&Valor> for ValorPayload {
    fn from(valor: &Valor) -> Self {
        let mut payload = ValorPayload::default();
        match valor {
            Valor::Number(n) => payload.valor_number = Some(*n),
            Valor::Text(t) => payload.valor_text = Some(t.clone()),
            Valor::Boolean(b) => payload.valor_boolean = Some(*b),
            Valor::Json(j) => payload.valor_json = Some(j.clone()),
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn payload_with_one_slot_becomes_the_matching_variant() {
        let payload = ValorPayload {
            valor_number: Some(Decimal::from_str("36.5").unwrap()),
            ..Default::default()
        };
        let valor = payload.into_valor().unwrap();
        assert_eq!(valor, Valor::Number(Decimal::from_str("36.5").unwrap()));
        assert_eq!(valor.tipo(), TipoValor::Number);
    }

    #[test]
    fn empty_payload_is_rejected() {
        let payload = ValorPayload::default();
        assert!(payload.into_valor().is_err());
    }

    #[test]
    fn payload_with_two_slots_is_rejected_not_coerced() {
        let payload = ValorPayload {
            valor_text: Some("alta".into()),
            valor_boolean: Some(true),
            ..Default::default()
        };
        assert!(payload.into_valor().is_err());
    }

    #[test]
    fn valor_round_trips_through_the_four_column_wire_shape() {
        let valor = Valor::Boolean(true);
        let payload = ValorPayload::from(&valor);
        assert_eq!(payload.valor_boolean, Some(true));
        assert!(payload.valor_number.is_none());
        assert_eq!(payload.into_valor().unwrap(), valor);
    }

    #[test]
    fn json_null_payload_counts_as_a_present_slot() {
        let payload = ValorPayload {
            valor_json: Some(serde_json::json!({"notas": "sin cambios"})),
            ..Default::default()
        };
        let valor = payload.into_valor().unwrap();
        assert_eq!(valor.tipo(), TipoValor::Json);
    }
}
