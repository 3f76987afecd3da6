//! Form records: patients, insurers and the clinical-episode form that
//! anchors a set of measurements.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Blood type of a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipoSangre {
    #[serde(rename = "O+")]
    OPositivo,
    #[serde(rename = "O-")]
    ONegativo,
    #[serde(rename = "A+")]
    APositivo,
    #[serde(rename = "A-")]
    ANegativo,
    #[serde(rename = "B+")]
    BPositivo,
    #[serde(rename = "B-")]
    BNegativo,
    #[serde(rename = "AB+")]
    AbPositivo,
    #[serde(rename = "AB-")]
    AbNegativo,
}

impl TipoSangre {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipoSangre::OPositivo => "O+",
            TipoSangre::ONegativo => "O-",
            TipoSangre::APositivo => "A+",
            TipoSangre::ANegativo => "A-",
            TipoSangre::BPositivo => "B+",
            TipoSangre::BNegativo => "B-",
            TipoSangre::AbPositivo => "AB+",
            TipoSangre::AbNegativo => "AB-",
        }
    }
}

/// Obstetric-history state code on the form (G_P_C_A_V_M).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstadoFormulario {
    G,
    P,
    C,
    A,
    V,
    M,
}

impl EstadoFormulario {
    pub fn display(&self) -> &'static str {
        match self {
            EstadoFormulario::G => "G",
            EstadoFormulario::P => "P",
            EstadoFormulario::C => "C",
            EstadoFormulario::A => "A",
            EstadoFormulario::V => "V",
            EstadoFormulario::M => "M",
        }
    }
}

/// An insurer. Independent root; deleting one must never cascade into
/// clinical records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aseguradora {
    pub id: i64,
    pub nombre: String, // unique
}

/// A patient. `num_historia_clinica` and `num_identificacion` are unique
/// identity keys, immutable once a form references the patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paciente {
    pub id: i64,
    pub num_historia_clinica: String,
    pub num_identificacion: String,
    pub nombres: String,
    pub fecha_nacimiento: Option<NaiveDate>,
    pub tipo_sangre: Option<TipoSangre>,
}

/// One clinical-encounter snapshot. Owned by its Paciente (cascade);
/// the Aseguradora reference is nulled when the insurer goes away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formulario {
    pub id: i64,
    pub codigo: String,
    pub version: String,
    pub fecha_elabora: NaiveDate,
    pub fecha_actualizacion: DateTime<Utc>,
    pub num_hoja: u32,
    pub aseguradora_id: Option<i64>,
    pub paciente_id: i64,
    pub diagnostico: Option<String>,
    pub edad_snapshot: Option<u32>,
    pub edad_gestion: Option<u32>,
    pub estado: EstadoFormulario,
    pub n_controles_prenatales: Option<u32>,
    pub responsable: String,
}

impl Formulario {
    /// Sheet number must be positive. The nullable numeric snapshots are
    /// typed unsigned, so the >= 0 rules hold by construction.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.num_hoja == 0 {
            return Err(StoreError::validation(
                "el número de hoja debe ser mayor que cero",
            ));
        }
        Ok(())
    }
}

/// Declares that a Parametro (under an Item) applies to a Formulario.
/// Unique per (formulario, parametro); the parametro must belong to the
/// item, checked before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormularioItemParametro {
    pub id: i64,
    pub formulario_id: i64,
    pub item_id: i64,
    pub parametro_id: i64,
    pub requerido: bool,
}

/// Create/replace payload for an Aseguradora.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevaAseguradora {
    pub nombre: String,
}

/// Create/replace payload for a Paciente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoPaciente {
    pub num_historia_clinica: String,
    pub num_identificacion: String,
    pub nombres: String,
    pub fecha_nacimiento: Option<NaiveDate>,
    pub tipo_sangre: Option<TipoSangre>,
}

/// Create/replace payload for a Formulario. `fecha_actualizacion` is
/// server-assigned, never client-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevoFormulario {
    pub codigo: String,
    pub version: String,
    pub fecha_elabora: NaiveDate,
    pub num_hoja: u32,
    pub aseguradora_id: Option<i64>,
    pub paciente_id: i64,
    pub diagnostico: Option<String>,
    pub edad_snapshot: Option<u32>,
    pub edad_gestion: Option<u32>,
    pub estado: EstadoFormulario,
    pub n_controles_prenatales: Option<u32>,
    pub responsable: String,
}

/// Create/replace payload for a FormularioItemParametro declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NuevaDeclaracion {
    pub formulario_id: i64,
    pub item_id: i64,
    pub parametro_id: i64,
    #[serde(default)]
    pub requerido: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn formulario_base() -> Formulario {
        Formulario {
            id: 1,
            codigo: "FRSPA-022".into(),
            version: "01".into(),
            fecha_elabora: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            fecha_actualizacion: Utc::now(),
            num_hoja: 1,
            aseguradora_id: None,
            paciente_id: 1,
            diagnostico: None,
            edad_snapshot: Some(28),
            edad_gestion: Some(39),
            estado: EstadoFormulario::G,
            n_controles_prenatales: Some(6),
            responsable: "Dra. Rojas".into(),
        }
    }

    #[test]
    fn num_hoja_must_be_positive() {
        let mut formulario = formulario_base();
        assert!(formulario.validate().is_ok());
        formulario.num_hoja = 0;
        assert!(formulario.validate().is_err());
    }

    #[test]
    fn tipo_sangre_uses_clinical_notation_on_the_wire() {
        let tipo: TipoSangre = serde_json::from_str("\"AB-\"").unwrap();
        assert_eq!(tipo, TipoSangre::AbNegativo);
        assert_eq!(serde_json::to_string(&TipoSangre::OPositivo).unwrap(), "\"O+\"");
    }

    #[test]
    fn estado_serializes_lowercase_but_displays_uppercase() {
        let estado: EstadoFormulario = serde_json::from_str("\"g\"").unwrap();
        assert_eq!(estado, EstadoFormulario::G);
        assert_eq!(estado.display(), "G");
    }
}
