//! Printable clinical charts.
//!
//! One self-contained HTML document per Formulario (institutional header,
//! patient block, form metadata, the projected measurement grid and a flat
//! listing) and one per Paciente covering all of their forms. These are
//! presentation renderings of already-validated data: unknown ids surface
//! as not-found before anything is drawn, and nothing is re-validated
//! here.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::forms::{Formulario, Paciente};
use crate::grid::{decode_valor, project_grid, Grid, LabelTable, PLACEHOLDER};
use crate::storage::Store;

const TITULO_FORMULARIO: &str = "CONTROL DE TRABAJO DE PARTO";

/// Printable chart for one form.
pub fn render_formulario(
    store: &Store,
    labels: &LabelTable,
    max_columnas: usize,
    formulario_id: i64,
) -> Result<String, StoreError> {
    let formulario = store.get_formulario(formulario_id)?;
    let paciente = store.get_paciente(formulario.paciente_id)?;
    let grid = project_grid(store, labels, max_columnas, formulario_id)?;

    let mut cuerpo = String::new();
    cuerpo.push_str(&encabezado(&formulario));
    cuerpo.push_str(&datos_paciente(&paciente, &formulario));
    cuerpo.push_str(&datos_formulario(store, &formulario));
    cuerpo.push_str("<h2>Mediciones</h2>\n");
    cuerpo.push_str(&tabla_grid(&grid));
    cuerpo.push_str(&listado_mediciones(store, labels, formulario_id)?);

    Ok(documento(
        &format!("Formulario {}", formulario.codigo),
        &cuerpo,
    ))
}

/// Printable chart for one patient: every form, same structure.
pub fn render_paciente(
    store: &Store,
    labels: &LabelTable,
    max_columnas: usize,
    paciente_id: i64,
) -> Result<String, StoreError> {
    let paciente = store.get_paciente(paciente_id)?;
    let formularios = store.formularios_de_paciente(paciente_id)?;

    let mut cuerpo = String::new();
    cuerpo.push_str(&format!("<h1>{}</h1>\n", escapar(TITULO_FORMULARIO)));
    cuerpo.push_str(&bloque_paciente(&paciente));

    if formularios.is_empty() {
        cuerpo.push_str("<p>No hay formularios registrados.</p>\n");
    }
    for formulario in formularios {
        cuerpo.push_str(&format!(
            "<h2>Formulario {} v{} hoja {}</h2>\n",
            escapar(&formulario.codigo),
            escapar(&formulario.version),
            formulario.num_hoja
        ));
        cuerpo.push_str(&datos_formulario(store, &formulario));
        let grid = project_grid(store, labels, max_columnas, formulario.id)?;
        cuerpo.push_str(&tabla_grid(&grid));
        cuerpo.push_str(&listado_mediciones(store, labels, formulario.id)?);
    }

    Ok(documento(
        &format!("Paciente {}", paciente.num_identificacion),
        &cuerpo,
    ))
}

fn documento(titulo: &str, cuerpo: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n<style>\n\
         body {{ font-family: Helvetica, Arial, sans-serif; font-size: 12px; margin: 1.5cm; }}\n\
         h1 {{ font-size: 16px; text-align: center; }}\n\
         h2 {{ font-size: 13px; margin-top: 1em; }}\n\
         table {{ border-collapse: collapse; width: 100%; margin-bottom: 0.8em; }}\n\
         th, td {{ border: 1px solid #000; padding: 3px 6px; text-align: left; }}\n\
         th {{ background: #ddd; }}\n\
         .casillas td {{ vertical-align: top; }}\n\
         .etiqueta {{ font-size: 9px; color: #333; display: block; }}\n\
         .valor {{ font-weight: bold; }}\n\
         @media print {{ body {{ margin: 0.5cm; }} }}\n\
         </style>\n</head>\n<body>\n{}</body>\n</html>\n",
        escapar(titulo),
        cuerpo
    )
}

/// Institutional header: title plus the form's code, version and dates.
fn encabezado(formulario: &Formulario) -> String {
    format!(
        "<h1>{}</h1>\n<table class=\"casillas\"><tr>\
         <td><span class=\"etiqueta\">CÓDIGO</span><span class=\"valor\">{}</span></td>\
         <td><span class=\"etiqueta\">VERSIÓN</span><span class=\"valor\">{}</span></td>\
         <td><span class=\"etiqueta\">FECHA DE ELABORACIÓN</span><span class=\"valor\">{}</span></td>\
         <td><span class=\"etiqueta\">FECHA DE ACTUALIZACIÓN</span><span class=\"valor\">{}</span></td>\
         </tr></table>\n",
        escapar(TITULO_FORMULARIO),
        escapar(&formulario.codigo),
        escapar(&formulario.version),
        formulario.fecha_elabora.format("%d/%m/%Y"),
        hora_local(&formulario.fecha_actualizacion),
    )
}

fn bloque_paciente(paciente: &Paciente) -> String {
    let fecha_nacimiento = paciente
        .fecha_nacimiento
        .map(|f| f.format("%d/%m/%Y").to_string())
        .unwrap_or_default();
    let tipo_sangre = paciente.tipo_sangre.map(|t| t.as_str()).unwrap_or("");
    format!(
        "<table class=\"casillas\"><tr>\
         <td><span class=\"etiqueta\">Paciente</span><span class=\"valor\">{}</span></td>\
         <td><span class=\"etiqueta\">Documento</span><span class=\"valor\">{}</span></td>\
         <td><span class=\"etiqueta\">Historia</span><span class=\"valor\">{}</span></td>\
         <td><span class=\"etiqueta\">Grupo Sanguíneo</span><span class=\"valor\">{}</span></td>\
         <td><span class=\"etiqueta\">Fecha Nacimiento</span><span class=\"valor\">{}</span></td>\
         </tr></table>\n",
        escapar(&paciente.nombres),
        escapar(&paciente.num_identificacion),
        escapar(&paciente.num_historia_clinica),
        escapar(tipo_sangre),
        fecha_nacimiento,
    )
}

/// Patient block for the form document: identity plus the form's age
/// snapshot.
fn datos_paciente(paciente: &Paciente, formulario: &Formulario) -> String {
    let edad = formulario
        .edad_snapshot
        .map(|e| e.to_string())
        .unwrap_or_default();
    let mut bloque = bloque_paciente(paciente);
    bloque.push_str(&format!(
        "<table class=\"casillas\"><tr>\
         <td><span class=\"etiqueta\">Edad</span><span class=\"valor\">{}</span></td>\
         </tr></table>\n",
        edad,
    ));
    bloque
}

fn datos_formulario(store: &Store, formulario: &Formulario) -> String {
    let aseguradora = formulario
        .aseguradora_id
        .and_then(|id| store.get_aseguradora(id).ok())
        .map(|a| a.nombre)
        .unwrap_or_else(|| "N/A".to_string());

    let filas = [
        ("Código", escapar(&formulario.codigo)),
        ("Versión", escapar(&formulario.version)),
        ("Hoja", formulario.num_hoja.to_string()),
        (
            "Fecha de Elaboración",
            formulario.fecha_elabora.format("%d/%m/%Y").to_string(),
        ),
        (
            "Fecha de Actualización",
            hora_local(&formulario.fecha_actualizacion),
        ),
        ("Aseguradora", escapar(&aseguradora)),
        (
            "Diagnóstico",
            formulario
                .diagnostico
                .as_deref()
                .map(escapar)
                .unwrap_or_else(|| "N/A".to_string()),
        ),
        (
            "Edad",
            formulario
                .edad_snapshot
                .map(|e| format!("{} años", e))
                .unwrap_or_else(|| "N/A".to_string()),
        ),
        (
            "Edad Gestacional",
            formulario
                .edad_gestion
                .map(|e| format!("{} semanas", e))
                .unwrap_or_else(|| "N/A".to_string()),
        ),
        (
            "Estado (G_P_C_A_V_M)",
            formulario.estado.display().to_string(),
        ),
        (
            "N° Controles Prenatales",
            formulario
                .n_controles_prenatales
                .map(|n| n.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
        ),
        ("Responsable", escapar(&formulario.responsable)),
    ];

    let mut tabla = String::from("<table>\n");
    for (etiqueta, valor) in filas {
        tabla.push_str(&format!("<tr><th>{}</th><td>{}</td></tr>\n", etiqueta, valor));
    }
    tabla.push_str("</table>\n");
    tabla
}

/// The measurement grid: parameter rows against the capture-time columns.
fn tabla_grid(grid: &Grid) -> String {
    if grid.columnas.is_empty() {
        return "<p>No hay mediciones registradas.</p>\n".to_string();
    }

    let mut tabla = String::from("<table>\n<tr><th>Parámetro</th><th>Campo</th>");
    for columna in &grid.columnas {
        tabla.push_str(&format!("<th>{}</th>", hora_local(columna)));
    }
    tabla.push_str("</tr>\n");

    for fila in &grid.filas {
        let nombre_parametro = match &fila.parametro.unidad {
            Some(unidad) => format!("{} ({})", fila.parametro.nombre, unidad),
            None => fila.parametro.nombre.clone(),
        };
        for campo in &fila.campos {
            tabla.push_str(&format!(
                "<tr><td>{}</td><td>{}</td>",
                escapar(&nombre_parametro),
                escapar(&campo.nombre)
            ));
            for columna in &grid.columnas {
                tabla.push_str(&format!(
                    "<td>{}</td>",
                    escapar(grid.celda(fila.parametro.id, columna, campo.id))
                ));
            }
            tabla.push_str("</tr>\n");
        }
        if fila.campos.is_empty() {
            tabla.push_str(&format!(
                "<tr><td>{}</td><td>{}</td>",
                escapar(&nombre_parametro),
                PLACEHOLDER
            ));
            for _ in &grid.columnas {
                tabla.push_str(&format!("<td>{}</td>", PLACEHOLDER));
            }
            tabla.push_str("</tr>\n");
        }
    }
    tabla.push_str("</table>\n");
    tabla
}

/// Flat listing: every measurement with every field, nothing dropped.
fn listado_mediciones(
    store: &Store,
    labels: &LabelTable,
    formulario_id: i64,
) -> Result<String, StoreError> {
    let mut mediciones = store.mediciones_de_formulario(formulario_id)?;
    mediciones.sort_by(|a, b| a.tomada_en.cmp(&b.tomada_en).then(a.id.cmp(&b.id)));
    if mediciones.is_empty() {
        return Ok(String::new());
    }

    let mut listado = String::from("<h2>Detalle de mediciones</h2>\n");
    for medicion in mediciones {
        let parametro = store.get_parametro(medicion.parametro_id)?;
        listado.push_str(&format!(
            "<h3>{} · {}</h3>\n",
            escapar(&parametro.nombre),
            hora_local(&medicion.tomada_en)
        ));
        if let Some(observacion) = &medicion.observacion {
            listado.push_str(&format!("<p>{}</p>\n", escapar(observacion)));
        }

        listado.push_str("<table>\n<tr><th>Campo</th><th>Valor</th><th>Unidad</th></tr>\n");
        for (valor, campo) in store.valores_detallados(medicion.id)? {
            let texto = decode_valor(&valor.valor, &parametro.codigo, &campo.codigo, labels);
            listado.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escapar(&campo.nombre),
                escapar(&texto),
                escapar(campo.unidad.as_deref().unwrap_or("")),
            ));
        }
        listado.push_str("</table>\n");
    }
    Ok(listado)
}

fn hora_local(momento: &DateTime<Utc>) -> String {
    momento.format("%d/%m/%Y %H:%M").to_string()
}

fn escapar(texto: &str) -> String {
    texto
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
