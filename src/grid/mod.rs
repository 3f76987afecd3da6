//! EAV grid projection
//!
//! Pivots the flat measurement/value rows of one Formulario into the
//! time-column grid the clinical chart prints: rows are parametros in
//! display order, columns are the distinct capture timestamps, cells are
//! decoded display strings. Nothing stored is lost — parametros with data
//! but no declaration still get a row, and absent cells read back as the
//! placeholder.

pub mod decode;
pub mod labels;

pub use decode::{decode_valor, PLACEHOLDER};
pub use labels::{LabelRule, LabelTable};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::catalog::{CampoParametro, Parametro};
use crate::error::StoreError;
use crate::storage::Store;

/// One projected grid: ordered timestamp columns plus a cell map keyed
/// parametro → timestamp → campo.
#[derive(Debug)]
pub struct Grid {
    pub columnas: Vec<DateTime<Utc>>,
    pub filas: Vec<GridFila>,
    celdas: BTreeMap<i64, BTreeMap<DateTime<Utc>, BTreeMap<i64, String>>>,
}

/// One grid row: a parametro and its ordered fields.
#[derive(Debug)]
pub struct GridFila {
    pub parametro: Parametro,
    pub campos: Vec<CampoParametro>,
}

impl Grid {
    /// Decoded display string for one cell; absent cells render the
    /// placeholder.
    pub fn celda(&self, parametro_id: i64, tomada_en: &DateTime<Utc>, campo_id: i64) -> &str {
        self.celdas
            .get(&parametro_id)
            .and_then(|columnas| columnas.get(tomada_en))
            .and_then(|campos| campos.get(&campo_id))
            .map(String::as_str)
            .unwrap_or(PLACEHOLDER)
    }

    /// The full cell map: parametro id → timestamp → campo id → string.
    pub fn celdas(&self) -> &BTreeMap<i64, BTreeMap<DateTime<Utc>, BTreeMap<i64, String>>> {
        &self.celdas
    }
}

/// Project the measurements of one form into a display grid.
///
/// Columns are the distinct `tomada_en` values in chronological order,
/// capped at `max_columnas` for the printed sheet (oldest retained).
/// Rows are the form's declared parametros, plus any parametro that has
/// recorded data without a declaration.
pub fn project_grid(
    store: &Store,
    labels: &LabelTable,
    max_columnas: usize,
    formulario_id: i64,
) -> Result<Grid, StoreError> {
    let mut mediciones = store.mediciones_de_formulario(formulario_id)?;
    mediciones.sort_by(|a, b| a.tomada_en.cmp(&b.tomada_en).then(a.id.cmp(&b.id)));

    let mut columnas: Vec<DateTime<Utc>> = Vec::new();
    for medicion in &mediciones {
        if !columnas.contains(&medicion.tomada_en) {
            columnas.push(medicion.tomada_en);
        }
    }
    if columnas.len() > max_columnas {
        warn!(
            formulario_id,
            descartadas = columnas.len() - max_columnas,
            "la grilla supera el máximo de columnas, se conservan las más antiguas"
        );
        columnas.truncate(max_columnas);
    }

    // Declared parametros first; undeclared ones with data are appended so
    // the projection stays lossless.
    let declaraciones = store.parametros_de_formulario(formulario_id)?;
    let mut parametros: Vec<Parametro> = Vec::new();
    for declaracion in &declaraciones {
        if let Ok(parametro) = store.get_parametro(declaracion.parametro_id) {
            parametros.push(parametro);
        }
    }
    for medicion in &mediciones {
        if !parametros.iter().any(|p| p.id == medicion.parametro_id) {
            if let Ok(parametro) = store.get_parametro(medicion.parametro_id) {
                parametros.push(parametro);
            }
        }
    }
    parametros.sort_by_key(Parametro::sort_key);
    parametros.dedup_by_key(|p| p.id);

    let mut filas = Vec::with_capacity(parametros.len());
    for parametro in parametros {
        let campos = store.campos_de_parametro(parametro.id)?;
        filas.push(GridFila { parametro, campos });
    }

    let mut celdas: BTreeMap<i64, BTreeMap<DateTime<Utc>, BTreeMap<i64, String>>> = BTreeMap::new();
    for medicion in &mediciones {
        if !columnas.contains(&medicion.tomada_en) {
            continue;
        }
        let parametro = store.get_parametro(medicion.parametro_id)?;
        for (valor, campo) in store.valores_detallados(medicion.id)? {
            let texto = decode_valor(&valor.valor, &parametro.codigo, &campo.codigo, labels);
            celdas
                .entry(parametro.id)
                .or_default()
                .entry(medicion.tomada_en)
                .or_default()
                .insert(campo.id, texto);
        }
    }

    Ok(Grid {
        columnas,
        filas,
        celdas,
    })
}
