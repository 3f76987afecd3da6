//! Core store
//!
//! Relational tables held in memory behind a single RwLock, with the
//! unique keys, cascade rules and find-or-create semantics the clinical
//! data model requires. Multi-step writes (find-or-create, cascaded
//! deletes, nested measurement creates) run under one write lock, so
//! concurrent upserts on the same key resolve to a single row with the
//! last writer winning.

mod persistence;
pub use persistence::Persistence;

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CampoParametro, Item, NuevoCampoParametro, NuevoItem, NuevoParametro, Parametro};
use crate::error::StoreError;
use crate::forms::{
    Aseguradora, Formulario, FormularioItemParametro, NuevaAseguradora, NuevaDeclaracion,
    NuevoFormulario, NuevoPaciente, Paciente,
};
use crate::measurements::{Medicion, MedicionValor, NuevaMedicion, Valor};

/// Every table in one snapshot-serializable struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    aseguradoras: BTreeMap<i64, Aseguradora>,
    pacientes: BTreeMap<i64, Paciente>,
    formularios: BTreeMap<i64, Formulario>,
    items: BTreeMap<i64, Item>,
    parametros: BTreeMap<i64, Parametro>,
    campos: BTreeMap<i64, CampoParametro>,
    declaraciones: BTreeMap<i64, FormularioItemParametro>,
    mediciones: BTreeMap<i64, Medicion>,
    valores: BTreeMap<i64, MedicionValor>,
}

// Ids follow the highest key present, which keeps them stable across
// snapshot reloads without a separate sequence table.
fn next_id<T>(tabla: &BTreeMap<i64, T>) -> i64 {
    tabla.keys().next_back().map_or(1, |max| max + 1)
}

#[derive(Debug, Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn from_tables(tables: Tables) -> Self {
        Store {
            tables: RwLock::new(tables),
        }
    }

    /// Clone of the full table set, for snapshotting.
    pub fn export_tables(&self) -> Tables {
        self.tables.read().unwrap().clone()
    }

    // ---- Aseguradora ----------------------------------------------------

    pub fn list_aseguradoras(&self) -> Vec<Aseguradora> {
        let tables = self.tables.read().unwrap();
        let mut filas: Vec<_> = tables.aseguradoras.values().cloned().collect();
        filas.sort_by(|a, b| a.nombre.cmp(&b.nombre));
        filas
    }

    pub fn get_aseguradora(&self, id: i64) -> Result<Aseguradora, StoreError> {
        self.tables
            .read()
            .unwrap()
            .aseguradoras
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "aseguradora",
                id,
            })
    }

    pub fn create_aseguradora(&self, nueva: NuevaAseguradora) -> Result<Aseguradora, StoreError> {
        let mut tables = self.tables.write().unwrap();
        tables.check_aseguradora_nombre(&nueva.nombre, None)?;
        let fila = Aseguradora {
            id: next_id(&tables.aseguradoras),
            nombre: nueva.nombre,
        };
        tables.aseguradoras.insert(fila.id, fila.clone());
        Ok(fila)
    }

    pub fn update_aseguradora(
        &self,
        id: i64,
        nueva: NuevaAseguradora,
    ) -> Result<Aseguradora, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.aseguradoras.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "aseguradora",
                id,
            });
        }
        tables.check_aseguradora_nombre(&nueva.nombre, Some(id))?;
        let fila = Aseguradora {
            id,
            nombre: nueva.nombre,
        };
        tables.aseguradoras.insert(id, fila.clone());
        Ok(fila)
    }

    /// Deleting an insurer clears the reference on its forms; clinical
    /// records are never cascade-deleted through an Aseguradora.
    pub fn delete_aseguradora(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if tables.aseguradoras.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                recurso: "aseguradora",
                id,
            });
        }
        for formulario in tables.formularios.values_mut() {
            if formulario.aseguradora_id == Some(id) {
                formulario.aseguradora_id = None;
            }
        }
        Ok(())
    }

    // ---- Paciente -------------------------------------------------------

    /// List patients, optionally filtered by an identity key. Filter
    /// values are trimmed; a failed lookup is an empty result, not an
    /// error.
    pub fn list_pacientes(
        &self,
        num_identificacion: Option<&str>,
        num_historia_clinica: Option<&str>,
    ) -> Vec<Paciente> {
        let tables = self.tables.read().unwrap();
        let num_identificacion = num_identificacion.map(str::trim);
        let num_historia_clinica = num_historia_clinica.map(str::trim);
        let mut filas: Vec<_> = tables
            .pacientes
            .values()
            .filter(|p| match num_identificacion {
                Some(filtro) => p.num_identificacion == filtro,
                None => true,
            })
            .filter(|p| match num_historia_clinica {
                Some(filtro) => p.num_historia_clinica == filtro,
                None => true,
            })
            .cloned()
            .collect();
        filas.sort_by(|a, b| a.nombres.cmp(&b.nombres).then(a.id.cmp(&b.id)));
        filas
    }

    pub fn get_paciente(&self, id: i64) -> Result<Paciente, StoreError> {
        self.tables
            .read()
            .unwrap()
            .pacientes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "paciente",
                id,
            })
    }

    pub fn create_paciente(&self, nuevo: NuevoPaciente) -> Result<Paciente, StoreError> {
        let mut tables = self.tables.write().unwrap();
        tables.check_paciente_claves(&nuevo, None)?;
        let fila = Paciente {
            id: next_id(&tables.pacientes),
            num_historia_clinica: nuevo.num_historia_clinica,
            num_identificacion: nuevo.num_identificacion,
            nombres: nuevo.nombres,
            fecha_nacimiento: nuevo.fecha_nacimiento,
            tipo_sangre: nuevo.tipo_sangre,
        };
        tables.pacientes.insert(fila.id, fila.clone());
        Ok(fila)
    }

    pub fn update_paciente(&self, id: i64, nuevo: NuevoPaciente) -> Result<Paciente, StoreError> {
        let mut tables = self.tables.write().unwrap();
        let actual = tables
            .pacientes
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "paciente",
                id,
            })?;

        // Identity keys freeze once any form references the patient.
        let referenciado = tables.formularios.values().any(|f| f.paciente_id == id);
        if referenciado
            && (actual.num_historia_clinica != nuevo.num_historia_clinica
                || actual.num_identificacion != nuevo.num_identificacion)
        {
            return Err(StoreError::validation(
                "los identificadores del paciente no pueden cambiar una vez referenciados por formularios",
            ));
        }

        tables.check_paciente_claves(&nuevo, Some(id))?;
        let fila = Paciente {
            id,
            num_historia_clinica: nuevo.num_historia_clinica,
            num_identificacion: nuevo.num_identificacion,
            nombres: nuevo.nombres,
            fecha_nacimiento: nuevo.fecha_nacimiento,
            tipo_sangre: nuevo.tipo_sangre,
        };
        tables.pacientes.insert(id, fila.clone());
        Ok(fila)
    }

    /// Deleting a patient removes their forms and every measurement under
    /// them.
    pub fn delete_paciente(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if tables.pacientes.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                recurso: "paciente",
                id,
            });
        }
        let formularios: Vec<i64> = tables
            .formularios
            .values()
            .filter(|f| f.paciente_id == id)
            .map(|f| f.id)
            .collect();
        for formulario_id in formularios {
            tables.delete_formulario_tree(formulario_id);
        }
        Ok(())
    }

    pub fn formularios_de_paciente(&self, id: i64) -> Result<Vec<Formulario>, StoreError> {
        let tables = self.tables.read().unwrap();
        if !tables.pacientes.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "paciente",
                id,
            });
        }
        Ok(tables.formularios_ordenados(|f| f.paciente_id == id))
    }

    // ---- Formulario -----------------------------------------------------

    /// List forms, optionally filtered by the patient's identification
    /// number. The filter is trimmed before use; an unknown number yields
    /// an empty set rather than an error.
    pub fn list_formularios(&self, paciente_num_identificacion: Option<&str>) -> Vec<Formulario> {
        let tables = self.tables.read().unwrap();
        match paciente_num_identificacion.map(str::trim) {
            None => tables.formularios_ordenados(|_| true),
            Some(filtro) => {
                let paciente = tables
                    .pacientes
                    .values()
                    .find(|p| p.num_identificacion == filtro);
                match paciente {
                    Some(paciente) => {
                        let paciente_id = paciente.id;
                        tables.formularios_ordenados(|f| f.paciente_id == paciente_id)
                    }
                    None => Vec::new(),
                }
            }
        }
    }

    pub fn get_formulario(&self, id: i64) -> Result<Formulario, StoreError> {
        self.tables
            .read()
            .unwrap()
            .formularios
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "formulario",
                id,
            })
    }

    pub fn create_formulario(&self, nuevo: NuevoFormulario) -> Result<Formulario, StoreError> {
        let mut tables = self.tables.write().unwrap();
        tables.check_formulario_refs(&nuevo)?;
        let fila = Formulario {
            id: next_id(&tables.formularios),
            codigo: nuevo.codigo,
            version: nuevo.version,
            fecha_elabora: nuevo.fecha_elabora,
            fecha_actualizacion: Utc::now(),
            num_hoja: nuevo.num_hoja,
            aseguradora_id: nuevo.aseguradora_id,
            paciente_id: nuevo.paciente_id,
            diagnostico: nuevo.diagnostico,
            edad_snapshot: nuevo.edad_snapshot,
            edad_gestion: nuevo.edad_gestion,
            estado: nuevo.estado,
            n_controles_prenatales: nuevo.n_controles_prenatales,
            responsable: nuevo.responsable,
        };
        fila.validate()?;
        tables.formularios.insert(fila.id, fila.clone());
        Ok(fila)
    }

    pub fn update_formulario(
        &self,
        id: i64,
        nuevo: NuevoFormulario,
    ) -> Result<Formulario, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.formularios.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "formulario",
                id,
            });
        }
        tables.check_formulario_refs(&nuevo)?;
        let fila = Formulario {
            id,
            codigo: nuevo.codigo,
            version: nuevo.version,
            fecha_elabora: nuevo.fecha_elabora,
            fecha_actualizacion: Utc::now(),
            num_hoja: nuevo.num_hoja,
            aseguradora_id: nuevo.aseguradora_id,
            paciente_id: nuevo.paciente_id,
            diagnostico: nuevo.diagnostico,
            edad_snapshot: nuevo.edad_snapshot,
            edad_gestion: nuevo.edad_gestion,
            estado: nuevo.estado,
            n_controles_prenatales: nuevo.n_controles_prenatales,
            responsable: nuevo.responsable,
        };
        fila.validate()?;
        tables.formularios.insert(id, fila.clone());
        Ok(fila)
    }

    pub fn delete_formulario(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.formularios.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "formulario",
                id,
            });
        }
        tables.delete_formulario_tree(id);
        Ok(())
    }

    pub fn mediciones_de_formulario(&self, id: i64) -> Result<Vec<Medicion>, StoreError> {
        let tables = self.tables.read().unwrap();
        if !tables.formularios.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "formulario",
                id,
            });
        }
        Ok(tables.mediciones_ordenadas(|m| m.formulario_id == id))
    }

    pub fn parametros_de_formulario(
        &self,
        id: i64,
    ) -> Result<Vec<FormularioItemParametro>, StoreError> {
        let tables = self.tables.read().unwrap();
        if !tables.formularios.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "formulario",
                id,
            });
        }
        let mut filas: Vec<_> = tables
            .declaraciones
            .values()
            .filter(|d| d.formulario_id == id)
            .cloned()
            .collect();
        filas.sort_by_key(|d| d.id);
        Ok(filas)
    }

    // ---- Item -----------------------------------------------------------

    pub fn list_items(&self) -> Vec<Item> {
        let tables = self.tables.read().unwrap();
        let mut filas: Vec<_> = tables.items.values().cloned().collect();
        filas.sort_by(|a, b| a.codigo.cmp(&b.codigo));
        filas
    }

    pub fn get_item(&self, id: i64) -> Result<Item, StoreError> {
        self.tables
            .read()
            .unwrap()
            .items
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { recurso: "item", id })
    }

    pub fn create_item(&self, nuevo: NuevoItem) -> Result<Item, StoreError> {
        let mut tables = self.tables.write().unwrap();
        tables.check_item_codigo(&nuevo.codigo, None)?;
        let fila = Item {
            id: next_id(&tables.items),
            codigo: nuevo.codigo,
            nombre: nuevo.nombre,
        };
        tables.items.insert(fila.id, fila.clone());
        Ok(fila)
    }

    pub fn update_item(&self, id: i64, nuevo: NuevoItem) -> Result<Item, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.items.contains_key(&id) {
            return Err(StoreError::NotFound { recurso: "item", id });
        }
        tables.check_item_codigo(&nuevo.codigo, Some(id))?;
        let fila = Item {
            id,
            codigo: nuevo.codigo,
            nombre: nuevo.nombre,
        };
        tables.items.insert(id, fila.clone());
        Ok(fila)
    }

    pub fn delete_item(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if tables.items.remove(&id).is_none() {
            return Err(StoreError::NotFound { recurso: "item", id });
        }
        let parametros: Vec<i64> = tables
            .parametros
            .values()
            .filter(|p| p.item_id == id)
            .map(|p| p.id)
            .collect();
        for parametro_id in parametros {
            tables.delete_parametro_tree(parametro_id);
        }
        tables.declaraciones.retain(|_, d| d.item_id != id);
        Ok(())
    }

    pub fn parametros_de_item(
        &self,
        id: i64,
        solo_activos: bool,
    ) -> Result<Vec<Parametro>, StoreError> {
        let tables = self.tables.read().unwrap();
        if !tables.items.contains_key(&id) {
            return Err(StoreError::NotFound { recurso: "item", id });
        }
        let mut filas: Vec<_> = tables
            .parametros
            .values()
            .filter(|p| p.item_id == id && (!solo_activos || p.activo))
            .cloned()
            .collect();
        filas.sort_by_key(Parametro::sort_key);
        Ok(filas)
    }

    // ---- Parametro ------------------------------------------------------

    pub fn list_parametros(&self) -> Vec<Parametro> {
        let tables = self.tables.read().unwrap();
        let mut filas: Vec<_> = tables.parametros.values().cloned().collect();
        filas.sort_by_key(Parametro::sort_key);
        filas
    }

    pub fn get_parametro(&self, id: i64) -> Result<Parametro, StoreError> {
        self.tables
            .read()
            .unwrap()
            .parametros
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "parametro",
                id,
            })
    }

    pub fn create_parametro(&self, nuevo: NuevoParametro) -> Result<Parametro, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.items.contains_key(&nuevo.item_id) {
            return Err(StoreError::NotFound {
                recurso: "item",
                id: nuevo.item_id,
            });
        }
        tables.check_parametro_codigo(nuevo.item_id, &nuevo.codigo, None)?;
        let fila = Parametro {
            id: next_id(&tables.parametros),
            item_id: nuevo.item_id,
            codigo: nuevo.codigo,
            nombre: nuevo.nombre,
            unidad: nuevo.unidad,
            orden: nuevo.orden,
            activo: nuevo.activo,
        };
        tables.parametros.insert(fila.id, fila.clone());
        Ok(fila)
    }

    pub fn update_parametro(&self, id: i64, nuevo: NuevoParametro) -> Result<Parametro, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.parametros.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "parametro",
                id,
            });
        }
        if !tables.items.contains_key(&nuevo.item_id) {
            return Err(StoreError::NotFound {
                recurso: "item",
                id: nuevo.item_id,
            });
        }
        tables.check_parametro_codigo(nuevo.item_id, &nuevo.codigo, Some(id))?;
        let fila = Parametro {
            id,
            item_id: nuevo.item_id,
            codigo: nuevo.codigo,
            nombre: nuevo.nombre,
            unidad: nuevo.unidad,
            orden: nuevo.orden,
            activo: nuevo.activo,
        };
        tables.parametros.insert(id, fila.clone());
        Ok(fila)
    }

    pub fn delete_parametro(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.parametros.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "parametro",
                id,
            });
        }
        tables.delete_parametro_tree(id);
        Ok(())
    }

    pub fn campos_de_parametro(&self, id: i64) -> Result<Vec<CampoParametro>, StoreError> {
        let tables = self.tables.read().unwrap();
        if !tables.parametros.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "parametro",
                id,
            });
        }
        let mut filas: Vec<_> = tables
            .campos
            .values()
            .filter(|c| c.parametro_id == id)
            .cloned()
            .collect();
        filas.sort_by_key(CampoParametro::sort_key);
        Ok(filas)
    }

    pub fn mediciones_de_parametro(&self, id: i64) -> Result<Vec<Medicion>, StoreError> {
        let tables = self.tables.read().unwrap();
        if !tables.parametros.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "parametro",
                id,
            });
        }
        Ok(tables.mediciones_ordenadas(|m| m.parametro_id == id))
    }

    // ---- CampoParametro -------------------------------------------------

    pub fn list_campos(&self) -> Vec<CampoParametro> {
        let tables = self.tables.read().unwrap();
        let mut filas: Vec<_> = tables.campos.values().cloned().collect();
        filas.sort_by_key(CampoParametro::sort_key);
        filas
    }

    pub fn get_campo(&self, id: i64) -> Result<CampoParametro, StoreError> {
        self.tables
            .read()
            .unwrap()
            .campos
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "campo de parámetro",
                id,
            })
    }

    pub fn create_campo(&self, nuevo: NuevoCampoParametro) -> Result<CampoParametro, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.parametros.contains_key(&nuevo.parametro_id) {
            return Err(StoreError::NotFound {
                recurso: "parametro",
                id: nuevo.parametro_id,
            });
        }
        tables.check_campo_codigo(nuevo.parametro_id, &nuevo.codigo, None)?;
        let fila = CampoParametro {
            id: next_id(&tables.campos),
            parametro_id: nuevo.parametro_id,
            codigo: nuevo.codigo,
            nombre: nuevo.nombre,
            tipo_valor: nuevo.tipo_valor,
            unidad: nuevo.unidad,
            orden: nuevo.orden,
        };
        tables.campos.insert(fila.id, fila.clone());
        Ok(fila)
    }

    pub fn update_campo(
        &self,
        id: i64,
        nuevo: NuevoCampoParametro,
    ) -> Result<CampoParametro, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.campos.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "campo de parámetro",
                id,
            });
        }
        if !tables.parametros.contains_key(&nuevo.parametro_id) {
            return Err(StoreError::NotFound {
                recurso: "parametro",
                id: nuevo.parametro_id,
            });
        }
        tables.check_campo_codigo(nuevo.parametro_id, &nuevo.codigo, Some(id))?;
        let fila = CampoParametro {
            id,
            parametro_id: nuevo.parametro_id,
            codigo: nuevo.codigo,
            nombre: nuevo.nombre,
            tipo_valor: nuevo.tipo_valor,
            unidad: nuevo.unidad,
            orden: nuevo.orden,
        };
        tables.campos.insert(id, fila.clone());
        Ok(fila)
    }

    pub fn delete_campo(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if tables.campos.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                recurso: "campo de parámetro",
                id,
            });
        }
        tables.valores.retain(|_, v| v.campo_id != id);
        Ok(())
    }

    // ---- FormularioItemParametro ----------------------------------------

    pub fn list_declaraciones(&self) -> Vec<FormularioItemParametro> {
        let tables = self.tables.read().unwrap();
        let mut filas: Vec<_> = tables.declaraciones.values().cloned().collect();
        filas.sort_by_key(|d| d.id);
        filas
    }

    pub fn get_declaracion(&self, id: i64) -> Result<FormularioItemParametro, StoreError> {
        self.tables
            .read()
            .unwrap()
            .declaraciones
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "declaración de parámetro",
                id,
            })
    }

    pub fn create_declaracion(
        &self,
        nueva: NuevaDeclaracion,
    ) -> Result<FormularioItemParametro, StoreError> {
        let mut tables = self.tables.write().unwrap();
        tables.check_declaracion(&nueva, None)?;
        let fila = FormularioItemParametro {
            id: next_id(&tables.declaraciones),
            formulario_id: nueva.formulario_id,
            item_id: nueva.item_id,
            parametro_id: nueva.parametro_id,
            requerido: nueva.requerido,
        };
        tables.declaraciones.insert(fila.id, fila.clone());
        Ok(fila)
    }

    pub fn update_declaracion(
        &self,
        id: i64,
        nueva: NuevaDeclaracion,
    ) -> Result<FormularioItemParametro, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.declaraciones.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "declaración de parámetro",
                id,
            });
        }
        tables.check_declaracion(&nueva, Some(id))?;
        let fila = FormularioItemParametro {
            id,
            formulario_id: nueva.formulario_id,
            item_id: nueva.item_id,
            parametro_id: nueva.parametro_id,
            requerido: nueva.requerido,
        };
        tables.declaraciones.insert(id, fila.clone());
        Ok(fila)
    }

    pub fn delete_declaracion(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if tables.declaraciones.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                recurso: "declaración de parámetro",
                id,
            });
        }
        Ok(())
    }

    // ---- Medicion -------------------------------------------------------

    pub fn list_mediciones(&self) -> Vec<Medicion> {
        let tables = self.tables.read().unwrap();
        tables.mediciones_ordenadas(|_| true)
    }

    pub fn get_medicion(&self, id: i64) -> Result<Medicion, StoreError> {
        self.tables
            .read()
            .unwrap()
            .mediciones
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "medición",
                id,
            })
    }

    /// Find-or-create a measurement event, plus upsert of any nested
    /// values, under one lock. All value payloads are validated before the
    /// first write so a failed request cannot leave partial state behind.
    pub fn create_medicion(&self, nueva: NuevaMedicion) -> Result<Medicion, StoreError> {
        let mut tables = self.tables.write().unwrap();

        if !tables.formularios.contains_key(&nueva.formulario_id) {
            return Err(StoreError::NotFound {
                recurso: "formulario",
                id: nueva.formulario_id,
            });
        }
        if !tables.parametros.contains_key(&nueva.parametro_id) {
            return Err(StoreError::NotFound {
                recurso: "parametro",
                id: nueva.parametro_id,
            });
        }

        // Decode and type-check every nested value first.
        let mut valores: Vec<(i64, Valor)> = Vec::with_capacity(nueva.valores.len());
        for nuevo in nueva.valores {
            let valor = nuevo.valor.into_valor()?;
            tables.check_tipo_valor(nuevo.campo_id, &valor)?;
            valores.push((nuevo.campo_id, valor));
        }

        let (medicion, _) = tables.record_medicion(
            nueva.formulario_id,
            nueva.parametro_id,
            nueva.tomada_en,
            nueva.observacion,
        );
        for (campo_id, valor) in valores {
            tables.upsert_valor(medicion.id, campo_id, valor);
        }
        Ok(medicion)
    }

    pub fn update_medicion(&self, id: i64, nueva: NuevaMedicion) -> Result<Medicion, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.mediciones.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "medición",
                id,
            });
        }
        if !tables.formularios.contains_key(&nueva.formulario_id) {
            return Err(StoreError::NotFound {
                recurso: "formulario",
                id: nueva.formulario_id,
            });
        }
        if !tables.parametros.contains_key(&nueva.parametro_id) {
            return Err(StoreError::NotFound {
                recurso: "parametro",
                id: nueva.parametro_id,
            });
        }
        let duplicada = tables.mediciones.values().any(|m| {
            m.id != id
                && m.formulario_id == nueva.formulario_id
                && m.parametro_id == nueva.parametro_id
                && m.tomada_en == nueva.tomada_en
        });
        if duplicada {
            return Err(StoreError::Duplicate {
                recurso: "medición",
                campo: "formulario/parametro/tomada_en",
                valor: nueva.tomada_en.to_rfc3339(),
            });
        }
        let fila = Medicion {
            id,
            formulario_id: nueva.formulario_id,
            parametro_id: nueva.parametro_id,
            tomada_en: nueva.tomada_en,
            observacion: nueva.observacion,
        };
        tables.mediciones.insert(id, fila.clone());
        Ok(fila)
    }

    pub fn delete_medicion(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.mediciones.contains_key(&id) {
            return Err(StoreError::NotFound {
                recurso: "medición",
                id,
            });
        }
        tables.delete_medicion_tree(id);
        Ok(())
    }

    // ---- MedicionValor --------------------------------------------------

    pub fn list_valores(&self) -> Vec<MedicionValor> {
        let tables = self.tables.read().unwrap();
        let mut filas: Vec<_> = tables.valores.values().cloned().collect();
        filas.sort_by_key(|v| v.id);
        filas
    }

    pub fn get_valor(&self, id: i64) -> Result<MedicionValor, StoreError> {
        self.tables
            .read()
            .unwrap()
            .valores
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                recurso: "valor de medición",
                id,
            })
    }

    /// Upsert one value keyed by (medicion, campo): the stored value is
    /// replaced entirely, never appended to.
    pub fn upsert_valor(
        &self,
        medicion_id: i64,
        campo_id: i64,
        valor: Valor,
    ) -> Result<MedicionValor, StoreError> {
        let mut tables = self.tables.write().unwrap();
        if !tables.mediciones.contains_key(&medicion_id) {
            return Err(StoreError::NotFound {
                recurso: "medición",
                id: medicion_id,
            });
        }
        tables.check_tipo_valor(campo_id, &valor)?;
        Ok(tables.upsert_valor(medicion_id, campo_id, valor))
    }

    /// Replace the value of an existing row, keeping its (medicion, campo)
    /// key.
    pub fn update_valor(&self, id: i64, valor: Valor) -> Result<MedicionValor, StoreError> {
        let mut tables = self.tables.write().unwrap();
        let campo_id = tables
            .valores
            .get(&id)
            .map(|v| v.campo_id)
            .ok_or(StoreError::NotFound {
                recurso: "valor de medición",
                id,
            })?;
        tables.check_tipo_valor(campo_id, &valor)?;
        let fila = tables.valores.get_mut(&id).unwrap();
        fila.valor = valor;
        Ok(fila.clone())
    }

    pub fn delete_valor(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap();
        if tables.valores.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                recurso: "valor de medición",
                id,
            });
        }
        Ok(())
    }

    pub fn valores_de_medicion(&self, medicion_id: i64) -> Result<Vec<MedicionValor>, StoreError> {
        let tables = self.tables.read().unwrap();
        if !tables.mediciones.contains_key(&medicion_id) {
            return Err(StoreError::NotFound {
                recurso: "medición",
                id: medicion_id,
            });
        }
        let mut filas: Vec<_> = tables
            .valores
            .values()
            .filter(|v| v.medicion_id == medicion_id)
            .cloned()
            .collect();
        filas.sort_by_key(|v| v.id);
        Ok(filas)
    }

    /// Values of a measurement joined to their field definitions, so a
    /// consumer never needs a second lookup to interpret a value.
    pub fn valores_detallados(
        &self,
        medicion_id: i64,
    ) -> Result<Vec<(MedicionValor, CampoParametro)>, StoreError> {
        let tables = self.tables.read().unwrap();
        if !tables.mediciones.contains_key(&medicion_id) {
            return Err(StoreError::NotFound {
                recurso: "medición",
                id: medicion_id,
            });
        }
        let mut filas: Vec<_> = tables
            .valores
            .values()
            .filter(|v| v.medicion_id == medicion_id)
            .filter_map(|v| {
                tables
                    .campos
                    .get(&v.campo_id)
                    .map(|c| (v.clone(), c.clone()))
            })
            .collect();
        filas.sort_by_key(|(v, _)| v.id);
        Ok(filas)
    }
}

impl Tables {
    fn formularios_ordenados(&self, filtro: impl Fn(&Formulario) -> bool) -> Vec<Formulario> {
        let mut filas: Vec<_> = self.formularios.values().filter(|f| filtro(f)).cloned().collect();
        // Most recently updated first.
        filas.sort_by(|a, b| {
            b.fecha_actualizacion
                .cmp(&a.fecha_actualizacion)
                .then(b.id.cmp(&a.id))
        });
        filas
    }

    fn mediciones_ordenadas(&self, filtro: impl Fn(&Medicion) -> bool) -> Vec<Medicion> {
        let mut filas: Vec<_> = self.mediciones.values().filter(|m| filtro(m)).cloned().collect();
        filas.sort_by(|a, b| b.tomada_en.cmp(&a.tomada_en).then(b.id.cmp(&a.id)));
        filas
    }

    fn check_aseguradora_nombre(
        &self,
        nombre: &str,
        propio_id: Option<i64>,
    ) -> Result<(), StoreError> {
        if self
            .aseguradoras
            .values()
            .any(|a| a.nombre == nombre && Some(a.id) != propio_id)
        {
            return Err(StoreError::Duplicate {
                recurso: "aseguradora",
                campo: "nombre",
                valor: nombre.to_string(),
            });
        }
        Ok(())
    }

    fn check_paciente_claves(
        &self,
        nuevo: &NuevoPaciente,
        propio_id: Option<i64>,
    ) -> Result<(), StoreError> {
        for paciente in self.pacientes.values() {
            if Some(paciente.id) == propio_id {
                continue;
            }
            if paciente.num_historia_clinica == nuevo.num_historia_clinica {
                return Err(StoreError::Duplicate {
                    recurso: "paciente",
                    campo: "num_historia_clinica",
                    valor: nuevo.num_historia_clinica.clone(),
                });
            }
            if paciente.num_identificacion == nuevo.num_identificacion {
                return Err(StoreError::Duplicate {
                    recurso: "paciente",
                    campo: "num_identificacion",
                    valor: nuevo.num_identificacion.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_formulario_refs(&self, nuevo: &NuevoFormulario) -> Result<(), StoreError> {
        if !self.pacientes.contains_key(&nuevo.paciente_id) {
            return Err(StoreError::NotFound {
                recurso: "paciente",
                id: nuevo.paciente_id,
            });
        }
        if let Some(aseguradora_id) = nuevo.aseguradora_id {
            if !self.aseguradoras.contains_key(&aseguradora_id) {
                return Err(StoreError::NotFound {
                    recurso: "aseguradora",
                    id: aseguradora_id,
                });
            }
        }
        Ok(())
    }

    fn check_item_codigo(&self, codigo: &str, propio_id: Option<i64>) -> Result<(), StoreError> {
        if self
            .items
            .values()
            .any(|i| i.codigo == codigo && Some(i.id) != propio_id)
        {
            return Err(StoreError::Duplicate {
                recurso: "item",
                campo: "codigo",
                valor: codigo.to_string(),
            });
        }
        Ok(())
    }

    fn check_parametro_codigo(
        &self,
        item_id: i64,
        codigo: &str,
        propio_id: Option<i64>,
    ) -> Result<(), StoreError> {
        if self
            .parametros
            .values()
            .any(|p| p.item_id == item_id && p.codigo == codigo && Some(p.id) != propio_id)
        {
            return Err(StoreError::Duplicate {
                recurso: "parametro",
                campo: "codigo",
                valor: codigo.to_string(),
            });
        }
        Ok(())
    }

    fn check_campo_codigo(
        &self,
        parametro_id: i64,
        codigo: &str,
        propio_id: Option<i64>,
    ) -> Result<(), StoreError> {
        if self
            .campos
            .values()
            .any(|c| c.parametro_id == parametro_id && c.codigo == codigo && Some(c.id) != propio_id)
        {
            return Err(StoreError::Duplicate {
                recurso: "campo de parámetro",
                campo: "codigo",
                valor: codigo.to_string(),
            });
        }
        Ok(())
    }

    fn check_declaracion(
        &self,
        nueva: &NuevaDeclaracion,
        propio_id: Option<i64>,
    ) -> Result<(), StoreError> {
        if !self.formularios.contains_key(&nueva.formulario_id) {
            return Err(StoreError::NotFound {
                recurso: "formulario",
                id: nueva.formulario_id,
            });
        }
        if !self.items.contains_key(&nueva.item_id) {
            return Err(StoreError::NotFound {
                recurso: "item",
                id: nueva.item_id,
            });
        }
        let parametro = self
            .parametros
            .get(&nueva.parametro_id)
            .ok_or(StoreError::NotFound {
                recurso: "parametro",
                id: nueva.parametro_id,
            })?;
        // The declared parametro must belong to the declared item; checked
        // here, not left to referential accidents.
        if parametro.item_id != nueva.item_id {
            return Err(StoreError::ItemMismatch);
        }
        if self.declaraciones.values().any(|d| {
            d.formulario_id == nueva.formulario_id
                && d.parametro_id == nueva.parametro_id
                && Some(d.id) != propio_id
        }) {
            return Err(StoreError::Duplicate {
                recurso: "declaración de parámetro",
                campo: "formulario/parametro",
                valor: format!("{}/{}", nueva.formulario_id, nueva.parametro_id),
            });
        }
        Ok(())
    }

    fn check_tipo_valor(&self, campo_id: i64, valor: &Valor) -> Result<(), StoreError> {
        let campo = self.campos.get(&campo_id).ok_or(StoreError::NotFound {
            recurso: "campo de parámetro",
            id: campo_id,
        })?;
        if campo.tipo_valor != valor.tipo() {
            return Err(StoreError::TypeMismatch {
                campo: campo.codigo.clone(),
                esperado: campo.tipo_valor.as_str(),
                recibido: valor.tipo().as_str(),
            });
        }
        Ok(())
    }

    /// Find-or-create on the (formulario, parametro, tomada_en) unique
    /// triple. When found and a new observacion is supplied, it replaces
    /// the stored one.
    fn record_medicion(
        &mut self,
        formulario_id: i64,
        parametro_id: i64,
        tomada_en: DateTime<Utc>,
        observacion: Option<String>,
    ) -> (Medicion, bool) {
        let existente = self
            .mediciones
            .values()
            .find(|m| {
                m.formulario_id == formulario_id
                    && m.parametro_id == parametro_id
                    && m.tomada_en == tomada_en
            })
            .map(|m| m.id);

        match existente {
            Some(id) => {
                let fila = self.mediciones.get_mut(&id).unwrap();
                if observacion.is_some() {
                    fila.observacion = observacion;
                }
                (fila.clone(), false)
            }
            None => {
                let fila = Medicion {
                    id: next_id(&self.mediciones),
                    formulario_id,
                    parametro_id,
                    tomada_en,
                    observacion,
                };
                self.mediciones.insert(fila.id, fila.clone());
                (fila, true)
            }
        }
    }

    /// Find-or-create on the (medicion, campo) unique pair; the stored
    /// value is replaced entirely.
    fn upsert_valor(&mut self, medicion_id: i64, campo_id: i64, valor: Valor) -> MedicionValor {
        let existente = self
            .valores
            .values()
            .find(|v| v.medicion_id == medicion_id && v.campo_id == campo_id)
            .map(|v| v.id);

        match existente {
            Some(id) => {
                let fila = self.valores.get_mut(&id).unwrap();
                fila.valor = valor;
                fila.clone()
            }
            None => {
                let fila = MedicionValor {
                    id: next_id(&self.valores),
                    medicion_id,
                    campo_id,
                    valor,
                };
                self.valores.insert(fila.id, fila.clone());
                fila
            }
        }
    }

    fn delete_formulario_tree(&mut self, formulario_id: i64) {
        self.formularios.remove(&formulario_id);
        self.declaraciones.retain(|_, d| d.formulario_id != formulario_id);
        let mediciones: Vec<i64> = self
            .mediciones
            .values()
            .filter(|m| m.formulario_id == formulario_id)
            .map(|m| m.id)
            .collect();
        for medicion_id in mediciones {
            self.delete_medicion_tree(medicion_id);
        }
    }

    fn delete_parametro_tree(&mut self, parametro_id: i64) {
        self.parametros.remove(&parametro_id);
        let campos: Vec<i64> = self
            .campos
            .values()
            .filter(|c| c.parametro_id == parametro_id)
            .map(|c| c.id)
            .collect();
        for campo_id in campos {
            self.campos.remove(&campo_id);
            self.valores.retain(|_, v| v.campo_id != campo_id);
        }
        let mediciones: Vec<i64> = self
            .mediciones
            .values()
            .filter(|m| m.parametro_id == parametro_id)
            .map(|m| m.id)
            .collect();
        for medicion_id in mediciones {
            self.delete_medicion_tree(medicion_id);
        }
        self.declaraciones.retain(|_, d| d.parametro_id != parametro_id);
    }

    fn delete_medicion_tree(&mut self, medicion_id: i64) {
        self.mediciones.remove(&medicion_id);
        self.valores.retain(|_, v| v.medicion_id != medicion_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TipoValor;
    use crate::forms::EstadoFormulario;
    use crate::measurements::{NuevoValor, ValorPayload};
    use chrono::{NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn store_con_catalogo() -> Store {
        let store = Store::new();
        let item = store
            .create_item(NuevoItem {
                codigo: "CTRL_MAT".into(),
                nombre: "Controles Maternos".into(),
            })
            .unwrap();
        let parametro = store
            .create_parametro(NuevoParametro {
                item_id: item.id,
                codigo: "FREC_CARD".into(),
                nombre: "Frec. Cardiaca".into(),
                unidad: Some("lpm".into()),
                orden: 1,
                activo: true,
            })
            .unwrap();
        store
            .create_campo(NuevoCampoParametro {
                parametro_id: parametro.id,
                codigo: "VALOR".into(),
                nombre: "Valor".into(),
                tipo_valor: TipoValor::Number,
                unidad: Some("lpm".into()),
                orden: 1,
            })
            .unwrap();
        store
    }

    fn paciente_y_formulario(store: &Store) -> (Paciente, Formulario) {
        let paciente = store
            .create_paciente(NuevoPaciente {
                num_historia_clinica: "HC-001".into(),
                num_identificacion: "123".into(),
                nombres: "María Pérez".into(),
                fecha_nacimiento: NaiveDate::from_ymd_opt(1996, 5, 4),
                tipo_sangre: None,
            })
            .unwrap();
        let formulario = store
            .create_formulario(NuevoFormulario {
                codigo: "FRSPA-022".into(),
                version: "01".into(),
                fecha_elabora: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
                num_hoja: 1,
                aseguradora_id: None,
                paciente_id: paciente.id,
                diagnostico: None,
                edad_snapshot: Some(28),
                edad_gestion: Some(39),
                estado: EstadoFormulario::G,
                n_controles_prenatales: None,
                responsable: "Dra. Rojas".into(),
            })
            .unwrap();
        (paciente, formulario)
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn recording_the_same_instant_twice_updates_instead_of_duplicating() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);

        let primera = store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(10, 30),
                observacion: Some("inicial".into()),
                valores: vec![],
            })
            .unwrap();
        let segunda = store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(10, 30),
                observacion: Some("corregida".into()),
                valores: vec![],
            })
            .unwrap();

        assert_eq!(primera.id, segunda.id);
        assert_eq!(segunda.observacion.as_deref(), Some("corregida"));
        assert_eq!(store.list_mediciones().len(), 1);
    }

    #[test]
    fn found_medicion_keeps_observacion_when_none_is_supplied() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);
        store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(8, 0),
                observacion: Some("nota".into()),
                valores: vec![],
            })
            .unwrap();
        let repetida = store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(8, 0),
                observacion: None,
                valores: vec![],
            })
            .unwrap();
        assert_eq!(repetida.observacion.as_deref(), Some("nota"));
    }

    #[test]
    fn upserting_a_value_replaces_it_and_keeps_one_row() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);
        let medicion = store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(9, 0),
                observacion: None,
                valores: vec![],
            })
            .unwrap();

        store
            .upsert_valor(medicion.id, 1, Valor::Number(Decimal::from(80)))
            .unwrap();
        store
            .upsert_valor(medicion.id, 1, Valor::Number(Decimal::from(95)))
            .unwrap();

        let valores = store.valores_de_medicion(medicion.id).unwrap();
        assert_eq!(valores.len(), 1);
        assert_eq!(valores[0].valor, Valor::Number(Decimal::from(95)));
    }

    #[test]
    fn concurrent_upserts_on_the_same_key_leave_one_row() {
        use std::sync::Arc;

        let store = Arc::new(store_con_catalogo());
        let (_, formulario) = paciente_y_formulario(&store);
        let medicion = store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(9, 0),
                observacion: None,
                valores: vec![],
            })
            .unwrap();

        let hilos: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                let medicion_id = medicion.id;
                std::thread::spawn(move || {
                    store
                        .upsert_valor(medicion_id, 1, Valor::Number(Decimal::from(60 + n)))
                        .unwrap();
                })
            })
            .collect();
        for hilo in hilos {
            hilo.join().unwrap();
        }

        let valores = store.valores_de_medicion(medicion.id).unwrap();
        assert_eq!(valores.len(), 1);
        // Last writer wins; whichever it was, the slot invariant holds.
        assert!(matches!(valores[0].valor, Valor::Number(_)));
    }

    #[test]
    fn value_type_must_match_the_field_declaration() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);
        let medicion = store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(9, 0),
                observacion: None,
                valores: vec![],
            })
            .unwrap();

        let resultado = store.upsert_valor(medicion.id, 1, Valor::Text("alto".into()));
        assert!(matches!(resultado, Err(StoreError::TypeMismatch { .. })));
        assert!(store.valores_de_medicion(medicion.id).unwrap().is_empty());
    }

    #[test]
    fn nested_values_validate_before_anything_is_written() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);

        let resultado = store.create_medicion(NuevaMedicion {
            formulario_id: formulario.id,
            parametro_id: 1,
            tomada_en: ts(11, 0),
            observacion: None,
            valores: vec![NuevoValor {
                campo_id: 1,
                valor: ValorPayload::default(), // zero slots
            }],
        });

        assert!(resultado.is_err());
        assert!(store.list_mediciones().is_empty());
        assert!(store.list_valores().is_empty());
    }

    #[test]
    fn declaracion_rejects_parametro_outside_the_item() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);
        let otro_item = store
            .create_item(NuevoItem {
                codigo: "CTRL_FETAL".into(),
                nombre: "Control Fetal".into(),
            })
            .unwrap();

        let resultado = store.create_declaracion(NuevaDeclaracion {
            formulario_id: formulario.id,
            item_id: otro_item.id,
            parametro_id: 1, // belongs to CTRL_MAT
            requerido: true,
        });
        assert!(matches!(resultado, Err(StoreError::ItemMismatch)));
    }

    #[test]
    fn declaracion_is_unique_per_formulario_parametro() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);
        let nueva = NuevaDeclaracion {
            formulario_id: formulario.id,
            item_id: 1,
            parametro_id: 1,
            requerido: false,
        };
        store.create_declaracion(nueva.clone()).unwrap();
        assert!(matches!(
            store.create_declaracion(nueva),
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn deleting_the_insurer_clears_the_form_reference() {
        let store = store_con_catalogo();
        let (paciente, _) = paciente_y_formulario(&store);
        let aseguradora = store
            .create_aseguradora(NuevaAseguradora {
                nombre: "Sura EPS".into(),
            })
            .unwrap();
        let formulario = store
            .create_formulario(NuevoFormulario {
                codigo: "FRSPA-022".into(),
                version: "01".into(),
                fecha_elabora: NaiveDate::from_ymd_opt(2024, 3, 3).unwrap(),
                num_hoja: 2,
                aseguradora_id: Some(aseguradora.id),
                paciente_id: paciente.id,
                diagnostico: None,
                edad_snapshot: None,
                edad_gestion: None,
                estado: EstadoFormulario::P,
                n_controles_prenatales: None,
                responsable: "Dra. Rojas".into(),
            })
            .unwrap();

        store.delete_aseguradora(aseguradora.id).unwrap();

        let recargado = store.get_formulario(formulario.id).unwrap();
        assert_eq!(recargado.aseguradora_id, None);
    }

    #[test]
    fn deleting_a_patient_cascades_through_forms_and_measurements() {
        let store = store_con_catalogo();
        let (paciente, formulario) = paciente_y_formulario(&store);
        store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(7, 15),
                observacion: None,
                valores: vec![NuevoValor {
                    campo_id: 1,
                    valor: ValorPayload {
                        valor_number: Some(Decimal::from(88)),
                        ..Default::default()
                    },
                }],
            })
            .unwrap();

        store.delete_paciente(paciente.id).unwrap();

        assert!(store.get_formulario(formulario.id).is_err());
        assert!(store.list_mediciones().is_empty());
        assert!(store.list_valores().is_empty());
    }

    #[test]
    fn formulario_filter_trims_whitespace_and_misses_quietly() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);

        let con_espacios = store.list_formularios(Some(" 123 "));
        let exacto = store.list_formularios(Some("123"));
        assert_eq!(con_espacios.len(), 1);
        assert_eq!(con_espacios[0].id, formulario.id);
        assert_eq!(
            con_espacios.iter().map(|f| f.id).collect::<Vec<_>>(),
            exacto.iter().map(|f| f.id).collect::<Vec<_>>()
        );

        assert!(store.list_formularios(Some("no-existe")).is_empty());
    }

    #[test]
    fn patient_identity_keys_freeze_once_referenced() {
        let store = store_con_catalogo();
        let (paciente, _) = paciente_y_formulario(&store);

        let resultado = store.update_paciente(
            paciente.id,
            NuevoPaciente {
                num_historia_clinica: "HC-999".into(),
                num_identificacion: paciente.num_identificacion.clone(),
                nombres: paciente.nombres.clone(),
                fecha_nacimiento: paciente.fecha_nacimiento,
                tipo_sangre: paciente.tipo_sangre,
            },
        );
        assert!(resultado.is_err());

        // Non-identity fields stay editable.
        let resultado = store.update_paciente(
            paciente.id,
            NuevoPaciente {
                num_historia_clinica: paciente.num_historia_clinica.clone(),
                num_identificacion: paciente.num_identificacion.clone(),
                nombres: "María José Pérez".into(),
                fecha_nacimiento: paciente.fecha_nacimiento,
                tipo_sangre: paciente.tipo_sangre,
            },
        );
        assert!(resultado.is_ok());
    }

    #[test]
    fn unique_keys_reject_duplicates() {
        let store = store_con_catalogo();
        assert!(matches!(
            store.create_item(NuevoItem {
                codigo: "CTRL_MAT".into(),
                nombre: "Duplicado".into(),
            }),
            Err(StoreError::Duplicate { .. })
        ));
        assert!(matches!(
            store.create_parametro(NuevoParametro {
                item_id: 1,
                codigo: "FREC_CARD".into(),
                nombre: "Duplicado".into(),
                unidad: None,
                orden: 9,
                activo: true,
            }),
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[test]
    fn valores_detallados_joins_field_definitions() {
        let store = store_con_catalogo();
        let (_, formulario) = paciente_y_formulario(&store);
        let medicion = store
            .create_medicion(NuevaMedicion {
                formulario_id: formulario.id,
                parametro_id: 1,
                tomada_en: ts(12, 0),
                observacion: None,
                valores: vec![NuevoValor {
                    campo_id: 1,
                    valor: ValorPayload {
                        valor_number: Some(Decimal::from(76)),
                        ..Default::default()
                    },
                }],
            })
            .unwrap();

        let detallados = store.valores_detallados(medicion.id).unwrap();
        assert_eq!(detallados.len(), 1);
        let (valor, campo) = &detallados[0];
        assert_eq!(valor.valor, Valor::Number(Decimal::from(76)));
        assert_eq!(campo.codigo, "VALOR");
        assert_eq!(campo.tipo_valor, TipoValor::Number);
    }
}
