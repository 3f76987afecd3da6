//! Per-cell value decoding.
//!
//! Turns one typed measurement value into the display string the grid and
//! the printed chart show. Decoding priority: text (with the 12-hour
//! rewrite for the two time-of-day fields), number (integral values
//! collapse to integer form), boolean (generic Sí/No with the membrane
//! overrides), then the placeholder.

use rust_decimal::Decimal;

use crate::grid::labels::LabelTable;
use crate::measurements::Valor;

/// Marker for a cell with no recorded value.
pub const PLACEHOLDER: &str = "—";

// The two time-of-day fields that store "HH:MM" and print in 12-hour form.
const CAMPOS_HORA: [(&str, &str); 2] = [("HORA", "TIEMPO"), ("HORA_RUPTURA", "TIEMPO")];

// Membrane findings display a domain phrase instead of a bare "Sí".
const FRASES_MEMBRANA: [(&str, &str, &str); 2] = [
    ("MEMB_INTEGRAS", "ESTADO", "Bolsa amniótica íntegra"),
    ("MEMB_ROTAS", "ESTADO", "Bolsa amniótica rota"),
];

/// Decode one value for display, including code-to-label expansion for
/// text and number values.
pub fn decode_valor(
    valor: &Valor,
    parametro_codigo: &str,
    campo_codigo: &str,
    labels: &LabelTable,
) -> String {
    match valor {
        Valor::Text(texto) => {
            let crudo = if es_campo_hora(parametro_codigo, campo_codigo) {
                formato_12_horas(texto).unwrap_or_else(|| texto.clone())
            } else {
                texto.clone()
            };
            labels.expand(parametro_codigo, campo_codigo, &crudo)
        }
        Valor::Number(numero) => {
            labels.expand(parametro_codigo, campo_codigo, &numero_a_texto(numero))
        }
        Valor::Boolean(activo) => etiqueta_booleana(*activo, parametro_codigo, campo_codigo),
        Valor::Json(json) => json.to_string(),
    }
}

fn es_campo_hora(parametro_codigo: &str, campo_codigo: &str) -> bool {
    CAMPOS_HORA
        .iter()
        .any(|(p, c)| *p == parametro_codigo && *c == campo_codigo)
}

/// Rewrite a 24-hour "HH:MM" string in 12-hour form with the localized
/// day-period marker. Anything that does not parse as a time is left for
/// the caller to display as stored.
fn formato_12_horas(valor: &str) -> Option<String> {
    let (hh, mm) = valor.split_once(':')?;
    if hh.is_empty() || hh.len() > 2 || mm.len() != 2 {
        return None;
    }
    let horas: u32 = hh.parse().ok()?;
    let minutos: u32 = mm.parse().ok()?;
    if horas > 23 || minutos > 59 {
        return None;
    }
    let marcador = if horas >= 12 { "p. m." } else { "a. m." };
    let hora_12 = match horas % 12 {
        0 => 12,
        hora => hora,
    };
    Some(format!("{:02}:{} {}", hora_12, mm, marcador))
}

/// Numbers render without trailing zeros; integral values collapse to an
/// integer (legacy rows stored "120.000000").
fn numero_a_texto(numero: &Decimal) -> String {
    numero.normalize().to_string()
}

fn etiqueta_booleana(activo: bool, parametro_codigo: &str, campo_codigo: &str) -> String {
    if activo {
        if let Some((_, _, frase)) = FRASES_MEMBRANA
            .iter()
            .find(|(p, c, _)| *p == parametro_codigo && *c == campo_codigo)
        {
            return frase.to_string();
        }
        "Sí".to_string()
    } else {
        "No".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn labels() -> LabelTable {
        LabelTable::with_defaults(vec![])
    }

    #[test]
    fn plain_text_passes_straight_through() {
        let valor = Valor::Text("cefálica variedad izquierda".into());
        assert_eq!(
            decode_valor(&valor, "PRESENTACION", "OTRO", &labels()),
            "cefálica variedad izquierda"
        );
    }

    #[test]
    fn time_of_day_fields_render_in_12_hour_form() {
        let valor = Valor::Text("14:30".into());
        assert_eq!(
            decode_valor(&valor, "HORA", "TIEMPO", &labels()),
            "02:30 p. m."
        );
        assert_eq!(
            decode_valor(&valor, "HORA_RUPTURA", "TIEMPO", &labels()),
            "02:30 p. m."
        );
        // The same stored text on any other field is untouched
        assert_eq!(
            decode_valor(&valor, "FRECUENCIA", "TIEMPO", &labels()),
            "14:30"
        );
    }

    #[test]
    fn midnight_and_noon_render_as_twelve() {
        assert_eq!(
            decode_valor(&Valor::Text("00:05".into()), "HORA", "TIEMPO", &labels()),
            "12:05 a. m."
        );
        assert_eq!(
            decode_valor(&Valor::Text("12:00".into()), "HORA", "TIEMPO", &labels()),
            "12:00 p. m."
        );
    }

    #[test]
    fn unparseable_time_text_is_left_as_stored() {
        assert_eq!(
            decode_valor(&Valor::Text("madrugada".into()), "HORA", "TIEMPO", &labels()),
            "madrugada"
        );
    }

    #[test]
    fn integral_numbers_collapse_to_integer_form() {
        let valor = Valor::Number(Decimal::from_str("120.000000").unwrap());
        assert_eq!(decode_valor(&valor, "TENSION_ART", "SISTOLICA", &labels()), "120");
    }

    #[test]
    fn fractional_numbers_keep_their_fraction() {
        let valor = Valor::Number(Decimal::from_str("36.500000").unwrap());
        // 36.5 sits inside the 36-37.4 default band
        assert_eq!(
            decode_valor(&valor, "TEMPERATURA", "VALOR", &labels()),
            "36 – 37.4 Normal"
        );
        assert_eq!(
            decode_valor(&valor, "TENSION_ART", "SISTOLICA", &labels()),
            "36.5"
        );
    }

    #[test]
    fn booleans_render_si_no_by_default() {
        assert_eq!(
            decode_valor(&Valor::Boolean(true), "OTRO", "ESTADO", &labels()),
            "Sí"
        );
        assert_eq!(
            decode_valor(&Valor::Boolean(false), "OTRO", "ESTADO", &labels()),
            "No"
        );
    }

    #[test]
    fn membrane_fields_use_the_domain_phrase() {
        assert_eq!(
            decode_valor(&Valor::Boolean(true), "MEMB_INTEGRAS", "ESTADO", &labels()),
            "Bolsa amniótica íntegra"
        );
        assert_eq!(
            decode_valor(&Valor::Boolean(true), "MEMB_ROTAS", "ESTADO", &labels()),
            "Bolsa amniótica rota"
        );
        // The negative finding stays generic
        assert_eq!(
            decode_valor(&Valor::Boolean(false), "MEMB_INTEGRAS", "ESTADO", &labels()),
            "No"
        );
    }

    #[test]
    fn json_values_render_compact() {
        let valor = Valor::Json(serde_json::json!({"lat": 1}));
        assert_eq!(
            decode_valor(&valor, "OTRO", "DETALLE", &labels()),
            "{\"lat\":1}"
        );
    }

    #[test]
    fn stored_code_expands_to_clinical_label() {
        let valor = Valor::Text("121-150".into());
        assert_eq!(
            decode_valor(&valor, "FREC_CARD", "VALOR", &labels()),
            "121 – 150 Taquicardia"
        );
    }
}
