//! Code-to-label expansion for grid cells.
//!
//! Historical captures stored short select codes ("121-150", "+", "CEF")
//! while the printed form shows descriptive clinical labels. The table is
//! keyed by stable (parametro, campo) codes and can be extended from
//! configuration; it is a display-time compatibility shim, not part of the
//! measurement data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One expansion rule: for a given (parametro, campo) pair, stored values
/// matching `codigo` display as `etiqueta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRule {
    pub parametro: String,
    pub campo: String,
    pub codigo: String,
    pub etiqueta: String,
}

impl LabelRule {
    fn new(parametro: &str, campo: &str, codigo: &str, etiqueta: &str) -> Self {
        LabelRule {
            parametro: parametro.to_string(),
            campo: campo.to_string(),
            codigo: codigo.to_string(),
            etiqueta: etiqueta.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct LabelTable {
    rules: HashMap<(String, String), Vec<LabelRule>>,
}

impl LabelTable {
    pub fn new(rules: Vec<LabelRule>) -> Self {
        let mut table = LabelTable::default();
        for rule in rules {
            table
                .rules
                .entry((rule.parametro.clone(), rule.campo.clone()))
                .or_default()
                .push(rule);
        }
        table
    }

    /// Built-in obstetric rules plus any extra rules from configuration.
    pub fn with_defaults(extra: Vec<LabelRule>) -> Self {
        let mut rules = default_rules();
        rules.extend(extra);
        LabelTable::new(rules)
    }

    /// Expand a decoded text/number value to its clinical label.
    ///
    /// Matching order: exact code, then substring containment both ways,
    /// then numeric range membership for codes shaped `low-high`, `>x`,
    /// `<x`, `>=x`, `<=x`. No match passes the value through unchanged.
    pub fn expand(&self, parametro: &str, campo: &str, valor: &str) -> String {
        if valor.is_empty() {
            return valor.to_string();
        }
        let clave = (parametro.to_string(), campo.to_string());
        let Some(rules) = self.rules.get(&clave) else {
            return valor.to_string();
        };

        if let Some(rule) = rules.iter().find(|r| r.codigo == valor) {
            return rule.etiqueta.clone();
        }
        if let Some(rule) = rules
            .iter()
            .find(|r| r.codigo.contains(valor) || valor.contains(&r.codigo))
        {
            return rule.etiqueta.clone();
        }
        if let Ok(numero) = valor.parse::<f64>() {
            if let Some(rule) = rules.iter().find(|r| rango_contiene(&r.codigo, numero)) {
                return rule.etiqueta.clone();
            }
        }
        valor.to_string()
    }
}

/// Whether a range-shaped code contains the number. Bounded ranges are
/// inclusive on both ends; comparison codes follow their operator.
fn rango_contiene(codigo: &str, numero: f64) -> bool {
    let codigo = codigo.trim();
    if let Some(resto) = codigo.strip_prefix(">=") {
        return resto.trim().parse::<f64>().is_ok_and(|x| numero >= x);
    }
    if let Some(resto) = codigo.strip_prefix("<=") {
        return resto.trim().parse::<f64>().is_ok_and(|x| numero <= x);
    }
    if let Some(resto) = codigo.strip_prefix('>') {
        return resto.trim().parse::<f64>().is_ok_and(|x| numero > x);
    }
    if let Some(resto) = codigo.strip_prefix('<') {
        return resto.trim().parse::<f64>().is_ok_and(|x| numero < x);
    }
    if let Some((lo, hi)) = codigo.split_once('-') {
        if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<f64>(), hi.trim().parse::<f64>()) {
            return numero >= lo && numero <= hi;
        }
    }
    false
}

/// The labels the printed obstetric chart expects for the seeded catalog.
fn default_rules() -> Vec<LabelRule> {
    vec![
        // Maternal heart rate
        LabelRule::new("FREC_CARD", "VALOR", "40-59", "40 – 59 Bradicardia"),
        LabelRule::new("FREC_CARD", "VALOR", "60-100", "60 – 100 Normal"),
        LabelRule::new("FREC_CARD", "VALOR", "101-120", "101 – 120 Taquicardia leve"),
        LabelRule::new("FREC_CARD", "VALOR", "121-150", "121 – 150 Taquicardia"),
        // Respiratory rate
        LabelRule::new("FREC_RESP", "VALOR", "<8", "< 8 Bradipnea"),
        LabelRule::new("FREC_RESP", "VALOR", "12-20", "12 – 20 Normal"),
        LabelRule::new("FREC_RESP", "VALOR", ">20", "> 20 Taquipnea"),
        // Temperature
        LabelRule::new("TEMPERATURA", "VALOR", "<36", "< 36 Hipotermia"),
        LabelRule::new("TEMPERATURA", "VALOR", "36-37.4", "36 – 37.4 Normal"),
        LabelRule::new("TEMPERATURA", "VALOR", ">=37.5", "≥ 37.5 Fiebre"),
        // Fetal heart rate
        LabelRule::new("FREC_CARD_FETAL", "VALOR", "<110", "< 110 Bradicardia fetal"),
        LabelRule::new("FREC_CARD_FETAL", "VALOR", "110-160", "110 – 160 Normal"),
        LabelRule::new("FREC_CARD_FETAL", "VALOR", ">160", "> 160 Taquicardia fetal"),
        // Contraction intensity
        LabelRule::new("INTENSIDAD", "DESCRIPCION", "+", "+ Leve"),
        LabelRule::new("INTENSIDAD", "DESCRIPCION", "++", "++ Moderada"),
        LabelRule::new("INTENSIDAD", "DESCRIPCION", "+++", "+++ Fuerte"),
        // Fetal movements
        LabelRule::new("MOV_FETALES", "DESCRIPCION", "PRES", "Presentes"),
        LabelRule::new("MOV_FETALES", "DESCRIPCION", "DISM", "Disminuidos"),
        LabelRule::new("MOV_FETALES", "DESCRIPCION", "AUS", "Ausentes"),
        // Presentation
        LabelRule::new("PRESENTACION", "DESCRIPCION", "CEF", "Cefálica"),
        LabelRule::new("PRESENTACION", "DESCRIPCION", "POD", "Podálica"),
        LabelRule::new("PRESENTACION", "DESCRIPCION", "TRANS", "Transversa"),
        // Amniotic fluid
        LabelRule::new("LIQ_AMNIOTICO", "DESCRIPCION", "CLARO", "Claro"),
        LabelRule::new("LIQ_AMNIOTICO", "DESCRIPCION", "MECONIAL", "Meconial"),
        LabelRule::new("LIQ_AMNIOTICO", "DESCRIPCION", "SANGUINOLENTO", "Sanguinolento"),
        // Cervical dilation
        LabelRule::new("DILATACION", "VALOR", "1-3", "1 – 3 Fase latente"),
        LabelRule::new("DILATACION", "VALOR", "4-7", "4 – 7 Fase activa"),
        LabelRule::new("DILATACION", "VALOR", "8-10", "8 – 10 Transición"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> LabelTable {
        LabelTable::with_defaults(vec![])
    }

    #[test]
    fn exact_code_match_expands() {
        assert_eq!(
            table().expand("FREC_CARD", "VALOR", "121-150"),
            "121 – 150 Taquicardia"
        );
    }

    #[test]
    fn unmatched_value_passes_through_unchanged() {
        assert_eq!(table().expand("FREC_CARD", "VALOR", "999"), "999");
    }

    #[test]
    fn unknown_pair_passes_through() {
        assert_eq!(table().expand("TENSION_ART", "SISTOLICA", "120"), "120");
    }

    #[test]
    fn numeric_value_matches_bounded_range() {
        assert_eq!(
            table().expand("FREC_CARD", "VALOR", "130"),
            "121 – 150 Taquicardia"
        );
    }

    #[test]
    fn open_ended_ranges_match_by_operator() {
        let table = table();
        assert_eq!(table.expand("FREC_RESP", "VALOR", "6"), "< 8 Bradipnea");
        assert_eq!(table.expand("FREC_RESP", "VALOR", "30"), "> 20 Taquipnea");
        assert_eq!(table.expand("TEMPERATURA", "VALOR", "37.5"), "≥ 37.5 Fiebre");
        // Boundary values stay outside strict comparisons
        assert_eq!(table.expand("FREC_RESP", "VALOR", "8.0"), "8.0");
    }

    #[test]
    fn substring_of_a_code_expands_before_range_logic_runs() {
        // "8" is contained in the "<8" code, so the containment pass wins
        // even though 8 < 8 is false.
        assert_eq!(table().expand("FREC_RESP", "VALOR", "8"), "< 8 Bradipnea");
    }

    #[test]
    fn containment_matches_before_ranges() {
        // "4-7" contains "4", so the substring pass wins over range logic
        assert_eq!(table().expand("DILATACION", "VALOR", "4-7"), "4 – 7 Fase activa");
        assert_eq!(table().expand("INTENSIDAD", "DESCRIPCION", "++"), "++ Moderada");
    }

    #[test]
    fn extra_rules_extend_the_builtin_table() {
        let table = LabelTable::with_defaults(vec![LabelRule::new(
            "FREC_CARD",
            "VALOR",
            "151-200",
            "151 – 200 Taquicardia severa",
        )]);
        assert_eq!(
            table.expand("FREC_CARD", "VALOR", "151-200"),
            "151 – 200 Taquicardia severa"
        );
        // Built-ins still present
        assert_eq!(table.expand("FREC_CARD", "VALOR", "40-59"), "40 – 59 Bradicardia");
    }

    #[test]
    fn empty_value_is_never_expanded() {
        assert_eq!(table().expand("FREC_CARD", "VALOR", ""), "");
    }
}
