//! Wire models for the REST surface.
//!
//! Read bodies nest the related definitions (a value always travels with
//! its campo, a measurement with its parametro) so API consumers never
//! need a second lookup to interpret what they received.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CampoParametro, Item, Parametro};
use crate::error::StoreError;
use crate::forms::{Aseguradora, Formulario, FormularioItemParametro, Paciente};
use crate::measurements::{Medicion, MedicionValor, ValorPayload};
use crate::storage::Store;

/// Client-facing error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct PacienteDetalle {
    #[serde(flatten)]
    pub paciente: Paciente,
    pub tipo_sangre_display: Option<&'static str>,
}

impl From<Paciente> for PacienteDetalle {
    fn from(paciente: Paciente) -> Self {
        let tipo_sangre_display = paciente.tipo_sangre.map(|t| t.as_str());
        PacienteDetalle {
            paciente,
            tipo_sangre_display,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FormularioDetalle {
    #[serde(flatten)]
    pub formulario: Formulario,
    pub paciente: Paciente,
    pub aseguradora: Option<Aseguradora>,
    pub estado_display: &'static str,
}

pub fn formulario_detalle(
    store: &Store,
    formulario: Formulario,
) -> Result<FormularioDetalle, StoreError> {
    let paciente = store.get_paciente(formulario.paciente_id)?;
    let aseguradora = formulario
        .aseguradora_id
        .and_then(|id| store.get_aseguradora(id).ok());
    let estado_display = formulario.estado.display();
    Ok(FormularioDetalle {
        formulario,
        paciente,
        aseguradora,
        estado_display,
    })
}

#[derive(Debug, Serialize)]
pub struct ParametroDetalle {
    #[serde(flatten)]
    pub parametro: Parametro,
    pub item: Item,
}

pub fn parametro_detalle(store: &Store, parametro: Parametro) -> Result<ParametroDetalle, StoreError> {
    let item = store.get_item(parametro.item_id)?;
    Ok(ParametroDetalle { parametro, item })
}

#[derive(Debug, Serialize)]
pub struct DeclaracionDetalle {
    #[serde(flatten)]
    pub declaracion: FormularioItemParametro,
    pub item: Item,
    pub parametro: Parametro,
}

pub fn declaracion_detalle(
    store: &Store,
    declaracion: FormularioItemParametro,
) -> Result<DeclaracionDetalle, StoreError> {
    let item = store.get_item(declaracion.item_id)?;
    let parametro = store.get_parametro(declaracion.parametro_id)?;
    Ok(DeclaracionDetalle {
        declaracion,
        item,
        parametro,
    })
}

/// One value joined to its field definition, in the four-column wire
/// shape.
#[derive(Debug, Serialize)]
pub struct ValorDetalle {
    pub id: i64,
    pub medicion_id: i64,
    pub campo: CampoParametro,
    #[serde(flatten)]
    pub valor: ValorPayload,
}

pub fn valor_detalle(fila: MedicionValor, campo: CampoParametro) -> ValorDetalle {
    let valor = ValorPayload::from(&fila.valor);
    ValorDetalle {
        id: fila.id,
        medicion_id: fila.medicion_id,
        campo,
        valor,
    }
}

#[derive(Debug, Serialize)]
pub struct MedicionDetalle {
    pub id: i64,
    pub formulario_id: i64,
    pub parametro: Parametro,
    pub tomada_en: DateTime<Utc>,
    pub observacion: Option<String>,
    pub valores: Vec<ValorDetalle>,
}

pub fn medicion_detalle(store: &Store, medicion: Medicion) -> Result<MedicionDetalle, StoreError> {
    let parametro = store.get_parametro(medicion.parametro_id)?;
    let valores = store
        .valores_detallados(medicion.id)?
        .into_iter()
        .map(|(fila, campo)| valor_detalle(fila, campo))
        .collect();
    Ok(MedicionDetalle {
        id: medicion.id,
        formulario_id: medicion.formulario_id,
        parametro,
        tomada_en: medicion.tomada_en,
        observacion: medicion.observacion,
        valores,
    })
}

/// Standalone value upsert body for `POST /mediciones-valores`.
#[derive(Debug, Clone, Deserialize)]
pub struct NuevoValorSuelto {
    pub medicion_id: i64,
    pub campo_id: i64,
    #[serde(flatten)]
    pub valor: ValorPayload,
}
