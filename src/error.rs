use std::io;
use thiserror::Error;

/// Errors raised by the store and its validation layer.
///
/// Client-facing messages are Spanish, matching the language the clinical
/// staff sees on the capture forms.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{recurso} {id} no existe")]
    NotFound { recurso: &'static str, id: i64 },

    #[error("ya existe {recurso} con {campo} = \"{valor}\"")]
    Duplicate {
        recurso: &'static str,
        campo: &'static str,
        valor: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("el parámetro debe pertenecer al item especificado")]
    ItemMismatch,

    #[error("el campo \"{campo}\" espera un valor de tipo {esperado}, se recibió {recibido}")]
    TypeMismatch {
        campo: String,
        esperado: &'static str,
        recibido: &'static str,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl StoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }
}

/// Snapshot save/load failures.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Configuration file failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Parse(#[from] serde_yaml::Error),
}
