use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use tracing::error;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::api::wire::{
    declaracion_detalle, formulario_detalle, medicion_detalle, parametro_detalle, valor_detalle,
    ErrorBody, NuevoValorSuelto, PacienteDetalle,
};
use crate::api::AppContext;
use crate::catalog::{NuevoCampoParametro, NuevoItem, NuevoParametro};
use crate::error::StoreError;
use crate::forms::{NuevaAseguradora, NuevaDeclaracion, NuevoFormulario, NuevoPaciente};
use crate::measurements::{NuevaMedicion, NuevoValor, ValorPayload};
use crate::report;

/// The REST surface: full CRUD per resource plus the nested actions and
/// print endpoints the clinical front end uses.
pub struct RestApi {
    ctx: Arc<AppContext>,
}

impl RestApi {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        RestApi { ctx }
    }

    pub fn routes(&self) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
        self.auth()
            .and(
                self.aseguradoras()
                    .or(self.pacientes())
                    .unify()
                    .or(self.formularios())
                    .unify()
                    .or(self.items())
                    .unify()
                    .or(self.parametros())
                    .unify()
                    .or(self.campos_parametro())
                    .unify()
                    .or(self.declaraciones())
                    .unify()
                    .or(self.mediciones())
                    .unify()
                    .or(self.mediciones_valores())
                    .unify(),
            )
            .recover(handle_rejection)
            .unify()
    }

    /// Optional static bearer token. Routes stay open when no token is
    /// configured.
    fn auth(&self) -> impl Filter<Extract = (), Error = Rejection> + Clone {
        let token = self.ctx.config.api.auth_token.clone();
        warp::header::optional::<String>("authorization")
            .and_then(move |header: Option<String>| {
                let token = token.clone();
                async move {
                    match token {
                        None => Ok(()),
                        Some(token) => {
                            let esperado = format!("Bearer {}", token);
                            if header.as_deref() == Some(esperado.as_str()) {
                                Ok(())
                            } else {
                                Err(warp::reject::custom(Unauthorized))
                            }
                        }
                    }
                }
            })
            .untuple_one()
    }

    fn aseguradoras(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("aseguradoras")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|ctx: Arc<AppContext>| async move {
                ok(json_ok(&ctx.store.list_aseguradoras()))
            });

        let retrieve = warp::path!("aseguradoras" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(respond(ctx.store.get_aseguradora(id)))
            });

        let create = warp::path!("aseguradoras")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nueva: NuevaAseguradora, ctx: Arc<AppContext>| async move {
                ok(mutate_created(&ctx, ctx.store.create_aseguradora(nueva)))
            });

        let update = warp::path!("aseguradoras" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(
                |id, nueva: NuevaAseguradora, ctx: Arc<AppContext>| async move {
                    ok(mutate(&ctx, ctx.store.update_aseguradora(id, nueva)))
                },
            );

        let delete = warp::path!("aseguradoras" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_aseguradora(id)))
            });

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .boxed()
    }

    fn pacientes(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("pacientes")
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .and(with_ctx(&self.ctx))
            .and_then(
                |params: HashMap<String, String>, ctx: Arc<AppContext>| async move {
                    let filas: Vec<PacienteDetalle> = ctx
                        .store
                        .list_pacientes(
                            params.get("num_identificacion").map(String::as_str),
                            params.get("num_historia_clinica").map(String::as_str),
                        )
                        .into_iter()
                        .map(Into::into)
                        .collect();
                    ok(json_ok(&filas))
                },
            );

        let retrieve = warp::path!("pacientes" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(respond(ctx.store.get_paciente(id).map(PacienteDetalle::from)))
            });

        let create = warp::path!("pacientes")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nuevo: NuevoPaciente, ctx: Arc<AppContext>| async move {
                ok(mutate_created(
                    &ctx,
                    ctx.store.create_paciente(nuevo).map(PacienteDetalle::from),
                ))
            });

        let update = warp::path!("pacientes" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|id, nuevo: NuevoPaciente, ctx: Arc<AppContext>| async move {
                ok(mutate(
                    &ctx,
                    ctx.store.update_paciente(id, nuevo).map(PacienteDetalle::from),
                ))
            });

        let delete = warp::path!("pacientes" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_paciente(id)))
            });

        let formularios = warp::path!("pacientes" / i64 / "formularios")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx.store.formularios_de_paciente(id).and_then(|filas| {
                    filas
                        .into_iter()
                        .map(|f| formulario_detalle(&ctx.store, f))
                        .collect::<Result<Vec<_>, _>>()
                });
                ok(respond(resultado))
            });

        let imprimir = warp::path!("pacientes" / i64 / "imprimir")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(respond_html(report::render_paciente(
                    &ctx.store,
                    &ctx.labels,
                    ctx.config.report.max_time_columns,
                    id,
                )))
            });

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .or(formularios)
            .unify()
            .or(imprimir)
            .unify()
            .boxed()
    }

    fn formularios(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("formularios")
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .and(with_ctx(&self.ctx))
            .and_then(
                |params: HashMap<String, String>, ctx: Arc<AppContext>| async move {
                    let filas = ctx.store.list_formularios(
                        params
                            .get("paciente__num_identificacion")
                            .map(String::as_str),
                    );
                    let resultado = filas
                        .into_iter()
                        .map(|f| formulario_detalle(&ctx.store, f))
                        .collect::<Result<Vec<_>, _>>();
                    ok(respond(resultado))
                },
            );

        let retrieve = warp::path!("formularios" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .get_formulario(id)
                    .and_then(|f| formulario_detalle(&ctx.store, f));
                ok(respond(resultado))
            });

        let create = warp::path!("formularios")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nuevo: NuevoFormulario, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .create_formulario(nuevo)
                    .and_then(|f| formulario_detalle(&ctx.store, f));
                ok(mutate_created(&ctx, resultado))
            });

        let update = warp::path!("formularios" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|id, nuevo: NuevoFormulario, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .update_formulario(id, nuevo)
                    .and_then(|f| formulario_detalle(&ctx.store, f));
                ok(mutate(&ctx, resultado))
            });

        let delete = warp::path!("formularios" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_formulario(id)))
            });

        let mediciones = warp::path!("formularios" / i64 / "mediciones")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx.store.mediciones_de_formulario(id).and_then(|filas| {
                    filas
                        .into_iter()
                        .map(|m| medicion_detalle(&ctx.store, m))
                        .collect::<Result<Vec<_>, _>>()
                });
                ok(respond(resultado))
            });

        let parametros = warp::path!("formularios" / i64 / "parametros")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx.store.parametros_de_formulario(id).and_then(|filas| {
                    filas
                        .into_iter()
                        .map(|d| declaracion_detalle(&ctx.store, d))
                        .collect::<Result<Vec<_>, _>>()
                });
                ok(respond(resultado))
            });

        let imprimir = warp::path!("formularios" / i64 / "imprimir")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(respond_html(report::render_formulario(
                    &ctx.store,
                    &ctx.labels,
                    ctx.config.report.max_time_columns,
                    id,
                )))
            });

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .or(mediciones)
            .unify()
            .or(parametros)
            .unify()
            .or(imprimir)
            .unify()
            .boxed()
    }

    fn items(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("items")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|ctx: Arc<AppContext>| async move { ok(json_ok(&ctx.store.list_items())) });

        let retrieve = warp::path!("items" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move { ok(respond(ctx.store.get_item(id))) });

        let create = warp::path!("items")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nuevo: NuevoItem, ctx: Arc<AppContext>| async move {
                ok(mutate_created(&ctx, ctx.store.create_item(nuevo)))
            });

        let update = warp::path!("items" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|id, nuevo: NuevoItem, ctx: Arc<AppContext>| async move {
                ok(mutate(&ctx, ctx.store.update_item(id, nuevo)))
            });

        let delete = warp::path!("items" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_item(id)))
            });

        let parametros = warp::path!("items" / i64 / "parametros")
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .and(with_ctx(&self.ctx))
            .and_then(
                |id, params: HashMap<String, String>, ctx: Arc<AppContext>| async move {
                    let solo_activos = params
                        .get("activos")
                        .is_some_and(|v| v.trim() == "true" || v.trim() == "1");
                    ok(respond(ctx.store.parametros_de_item(id, solo_activos)))
                },
            );

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .or(parametros)
            .unify()
            .boxed()
    }

    fn parametros(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("parametros")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .list_parametros()
                    .into_iter()
                    .map(|p| parametro_detalle(&ctx.store, p))
                    .collect::<Result<Vec<_>, _>>();
                ok(respond(resultado))
            });

        let retrieve = warp::path!("parametros" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .get_parametro(id)
                    .and_then(|p| parametro_detalle(&ctx.store, p));
                ok(respond(resultado))
            });

        let create = warp::path!("parametros")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nuevo: NuevoParametro, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .create_parametro(nuevo)
                    .and_then(|p| parametro_detalle(&ctx.store, p));
                ok(mutate_created(&ctx, resultado))
            });

        let update = warp::path!("parametros" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|id, nuevo: NuevoParametro, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .update_parametro(id, nuevo)
                    .and_then(|p| parametro_detalle(&ctx.store, p));
                ok(mutate(&ctx, resultado))
            });

        let delete = warp::path!("parametros" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_parametro(id)))
            });

        let campos = warp::path!("parametros" / i64 / "campos")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(respond(ctx.store.campos_de_parametro(id)))
            });

        let mediciones = warp::path!("parametros" / i64 / "mediciones")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx.store.mediciones_de_parametro(id).and_then(|filas| {
                    filas
                        .into_iter()
                        .map(|m| medicion_detalle(&ctx.store, m))
                        .collect::<Result<Vec<_>, _>>()
                });
                ok(respond(resultado))
            });

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .or(campos)
            .unify()
            .or(mediciones)
            .unify()
            .boxed()
    }

    fn campos_parametro(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("campos-parametro")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|ctx: Arc<AppContext>| async move { ok(json_ok(&ctx.store.list_campos())) });

        let retrieve = warp::path!("campos-parametro" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move { ok(respond(ctx.store.get_campo(id))) });

        let create = warp::path!("campos-parametro")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nuevo: NuevoCampoParametro, ctx: Arc<AppContext>| async move {
                ok(mutate_created(&ctx, ctx.store.create_campo(nuevo)))
            });

        let update = warp::path!("campos-parametro" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(
                |id, nuevo: NuevoCampoParametro, ctx: Arc<AppContext>| async move {
                    ok(mutate(&ctx, ctx.store.update_campo(id, nuevo)))
                },
            );

        let delete = warp::path!("campos-parametro" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_campo(id)))
            });

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .boxed()
    }

    fn declaraciones(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("formularios-items-parametros")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .list_declaraciones()
                    .into_iter()
                    .map(|d| declaracion_detalle(&ctx.store, d))
                    .collect::<Result<Vec<_>, _>>();
                ok(respond(resultado))
            });

        let retrieve = warp::path!("formularios-items-parametros" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .get_declaracion(id)
                    .and_then(|d| declaracion_detalle(&ctx.store, d));
                ok(respond(resultado))
            });

        let create = warp::path!("formularios-items-parametros")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nueva: NuevaDeclaracion, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .create_declaracion(nueva)
                    .and_then(|d| declaracion_detalle(&ctx.store, d));
                ok(mutate_created(&ctx, resultado))
            });

        let update = warp::path!("formularios-items-parametros" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|id, nueva: NuevaDeclaracion, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .update_declaracion(id, nueva)
                    .and_then(|d| declaracion_detalle(&ctx.store, d));
                ok(mutate(&ctx, resultado))
            });

        let delete = warp::path!("formularios-items-parametros" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_declaracion(id)))
            });

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .boxed()
    }

    fn mediciones(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("mediciones")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .list_mediciones()
                    .into_iter()
                    .map(|m| medicion_detalle(&ctx.store, m))
                    .collect::<Result<Vec<_>, _>>();
                ok(respond(resultado))
            });

        let retrieve = warp::path!("mediciones" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .get_medicion(id)
                    .and_then(|m| medicion_detalle(&ctx.store, m));
                ok(respond(resultado))
            });

        // Posting the same (formulario, parametro, tomada_en) again is an
        // update of the existing event, never a duplicate row.
        let create = warp::path!("mediciones")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nueva: NuevaMedicion, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .create_medicion(nueva)
                    .and_then(|m| medicion_detalle(&ctx.store, m));
                ok(mutate_created(&ctx, resultado))
            });

        let update = warp::path!("mediciones" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|id, nueva: NuevaMedicion, ctx: Arc<AppContext>| async move {
                let resultado = ctx
                    .store
                    .update_medicion(id, nueva)
                    .and_then(|m| medicion_detalle(&ctx.store, m));
                ok(mutate(&ctx, resultado))
            });

        let delete = warp::path!("mediciones" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_medicion(id)))
            });

        let valores_get = warp::path!("mediciones" / i64 / "valores")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx.store.valores_detallados(id).map(|filas| {
                    filas
                        .into_iter()
                        .map(|(fila, campo)| valor_detalle(fila, campo))
                        .collect::<Vec<_>>()
                });
                ok(respond(resultado))
            });

        let valores_post = warp::path!("mediciones" / i64 / "valores")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|id, nuevo: NuevoValor, ctx: Arc<AppContext>| async move {
                let resultado = nuevo
                    .valor
                    .into_valor()
                    .and_then(|valor| ctx.store.upsert_valor(id, nuevo.campo_id, valor))
                    .and_then(|fila| {
                        let campo = ctx.store.get_campo(fila.campo_id)?;
                        Ok(valor_detalle(fila, campo))
                    });
                ok(mutate_created(&ctx, resultado))
            });

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .or(valores_get)
            .unify()
            .or(valores_post)
            .unify()
            .boxed()
    }

    fn mediciones_valores(&self) -> BoxedFilter<(Response,)> {
        let list = warp::path!("mediciones-valores")
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|ctx: Arc<AppContext>| async move {
                let filas: Vec<_> = ctx
                    .store
                    .list_valores()
                    .into_iter()
                    .filter_map(|fila| {
                        let campo = ctx.store.get_campo(fila.campo_id).ok()?;
                        Some(valor_detalle(fila, campo))
                    })
                    .collect();
                ok(json_ok(&filas))
            });

        let retrieve = warp::path!("mediciones-valores" / i64)
            .and(warp::get())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                let resultado = ctx.store.get_valor(id).and_then(|fila| {
                    let campo = ctx.store.get_campo(fila.campo_id)?;
                    Ok(valor_detalle(fila, campo))
                });
                ok(respond(resultado))
            });

        // POST is the documented upsert: one row per (medicion, campo),
        // replaced on repeat.
        let create = warp::path!("mediciones-valores")
            .and(warp::post())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|nuevo: NuevoValorSuelto, ctx: Arc<AppContext>| async move {
                let resultado = nuevo
                    .valor
                    .into_valor()
                    .and_then(|valor| {
                        ctx.store
                            .upsert_valor(nuevo.medicion_id, nuevo.campo_id, valor)
                    })
                    .and_then(|fila| {
                        let campo = ctx.store.get_campo(fila.campo_id)?;
                        Ok(valor_detalle(fila, campo))
                    });
                ok(mutate_created(&ctx, resultado))
            });

        let update = warp::path!("mediciones-valores" / i64)
            .and(warp::put())
            .and(warp::body::json())
            .and(with_ctx(&self.ctx))
            .and_then(|id, payload: ValorPayload, ctx: Arc<AppContext>| async move {
                let resultado = payload
                    .into_valor()
                    .and_then(|valor| ctx.store.update_valor(id, valor))
                    .and_then(|fila| {
                        let campo = ctx.store.get_campo(fila.campo_id)?;
                        Ok(valor_detalle(fila, campo))
                    });
                ok(mutate(&ctx, resultado))
            });

        let delete = warp::path!("mediciones-valores" / i64)
            .and(warp::delete())
            .and(with_ctx(&self.ctx))
            .and_then(|id, ctx: Arc<AppContext>| async move {
                ok(mutate_deleted(&ctx, ctx.store.delete_valor(id)))
            });

        list.or(retrieve)
            .unify()
            .or(create)
            .unify()
            .or(update)
            .unify()
            .or(delete)
            .unify()
            .boxed()
    }
}

#[derive(Debug)]
struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

fn with_ctx(
    ctx: &Arc<AppContext>,
) -> impl Filter<Extract = (Arc<AppContext>,), Error = Infallible> + Clone {
    let ctx = Arc::clone(ctx);
    warp::any().map(move || Arc::clone(&ctx))
}

// Every handler resolves to a Response; rejections only carry routing,
// body and auth failures.
fn ok(response: Response) -> Result<Response, Rejection> {
    Ok(response)
}

fn json_ok<T: Serialize>(body: &T) -> Response {
    warp::reply::with_status(warp::reply::json(body), StatusCode::OK).into_response()
}

fn json_created<T: Serialize>(body: &T) -> Response {
    warp::reply::with_status(warp::reply::json(body), StatusCode::CREATED).into_response()
}

fn json_error(status: StatusCode, mensaje: &str) -> Response {
    let body = ErrorBody {
        error: mensaje.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn error_response(err: &StoreError) -> Response {
    match err {
        StoreError::NotFound { .. } => json_error(StatusCode::NOT_FOUND, &err.to_string()),
        StoreError::Persistence(_) => {
            error!(error = %err, "fallo inesperado de almacenamiento");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "error interno del servidor",
            )
        }
        _ => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

fn respond<T: Serialize>(resultado: Result<T, StoreError>) -> Response {
    match resultado {
        Ok(cuerpo) => json_ok(&cuerpo),
        Err(err) => error_response(&err),
    }
}

fn respond_html(resultado: Result<String, StoreError>) -> Response {
    match resultado {
        Ok(html) => warp::reply::html(html).into_response(),
        Err(err) => error_response(&err),
    }
}

fn mutate<T: Serialize>(ctx: &AppContext, resultado: Result<T, StoreError>) -> Response {
    match resultado {
        Ok(cuerpo) => {
            ctx.snapshot_after_write();
            json_ok(&cuerpo)
        }
        Err(err) => error_response(&err),
    }
}

fn mutate_created<T: Serialize>(ctx: &AppContext, resultado: Result<T, StoreError>) -> Response {
    match resultado {
        Ok(cuerpo) => {
            ctx.snapshot_after_write();
            json_created(&cuerpo)
        }
        Err(err) => error_response(&err),
    }
}

fn mutate_deleted(ctx: &AppContext, resultado: Result<(), StoreError>) -> Response {
    match resultado {
        Ok(()) => {
            ctx.snapshot_after_write();
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(&err),
    }
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.is_not_found() {
        return Ok(json_error(StatusCode::NOT_FOUND, "recurso no encontrado"));
    }
    if err.find::<Unauthorized>().is_some() {
        return Ok(json_error(
            StatusCode::UNAUTHORIZED,
            "se requiere un token de acceso válido",
        ));
    }
    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(json_error(StatusCode::BAD_REQUEST, &e.to_string()));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(json_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "método no permitido",
        ));
    }
    error!(rechazo = ?err, "rechazo no manejado");
    Ok(json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "error interno del servidor",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::Store;
    use pretty_assertions::assert_eq;

    fn api(config: Config) -> RestApi {
        let ctx = AppContext::new(config, Store::new(), None);
        RestApi::new(Arc::new(ctx))
    }

    fn api_abierta() -> RestApi {
        api(Config::default())
    }

    async fn sembrar_catalogo(api: &RestApi) {
        let routes = api.routes();
        let item = warp::test::request()
            .method("POST")
            .path("/items")
            .json(&serde_json::json!({"codigo": "CTRL_MAT", "nombre": "Controles Maternos"}))
            .reply(&routes)
            .await;
        assert_eq!(item.status(), StatusCode::CREATED);

        let parametro = warp::test::request()
            .method("POST")
            .path("/parametros")
            .json(&serde_json::json!({
                "item_id": 1,
                "codigo": "FREC_CARD",
                "nombre": "Frec. Cardiaca",
                "unidad": "lpm",
                "orden": 1
            }))
            .reply(&routes)
            .await;
        assert_eq!(parametro.status(), StatusCode::CREATED);

        let campo = warp::test::request()
            .method("POST")
            .path("/campos-parametro")
            .json(&serde_json::json!({
                "parametro_id": 1,
                "codigo": "VALOR",
                "nombre": "Valor",
                "tipo_valor": "number",
                "unidad": "lpm"
            }))
            .reply(&routes)
            .await;
        assert_eq!(campo.status(), StatusCode::CREATED);
    }

    async fn sembrar_paciente_y_formulario(api: &RestApi) {
        let routes = api.routes();
        let paciente = warp::test::request()
            .method("POST")
            .path("/pacientes")
            .json(&serde_json::json!({
                "num_historia_clinica": "HC-001",
                "num_identificacion": "123",
                "nombres": "María Pérez",
                "fecha_nacimiento": "1996-05-04",
                "tipo_sangre": "O+"
            }))
            .reply(&routes)
            .await;
        assert_eq!(paciente.status(), StatusCode::CREATED);

        let formulario = warp::test::request()
            .method("POST")
            .path("/formularios")
            .json(&serde_json::json!({
                "codigo": "FRSPA-022",
                "version": "01",
                "fecha_elabora": "2024-03-02",
                "num_hoja": 1,
                "paciente_id": 1,
                "estado": "g",
                "responsable": "Dra. Rojas"
            }))
            .reply(&routes)
            .await;
        assert_eq!(formulario.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn crud_basico_de_pacientes() {
        let api = api_abierta();
        sembrar_catalogo(&api).await;
        sembrar_paciente_y_formulario(&api).await;
        let routes = api.routes();

        let lista = warp::test::request().path("/pacientes").reply(&routes).await;
        assert_eq!(lista.status(), StatusCode::OK);
        let cuerpo: serde_json::Value = serde_json::from_slice(lista.body()).unwrap();
        assert_eq!(cuerpo.as_array().unwrap().len(), 1);
        assert_eq!(cuerpo[0]["tipo_sangre_display"], "O+");

        let desconocido = warp::test::request().path("/pacientes/99").reply(&routes).await;
        assert_eq!(desconocido.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn filtro_de_formularios_recorta_espacios() {
        let api = api_abierta();
        sembrar_catalogo(&api).await;
        sembrar_paciente_y_formulario(&api).await;
        let routes = api.routes();

        let con_espacios = warp::test::request()
            .path("/formularios?paciente__num_identificacion=%20123%20")
            .reply(&routes)
            .await;
        assert_eq!(con_espacios.status(), StatusCode::OK);
        let cuerpo: serde_json::Value = serde_json::from_slice(con_espacios.body()).unwrap();
        assert_eq!(cuerpo.as_array().unwrap().len(), 1);

        let sin_coincidencia = warp::test::request()
            .path("/formularios?paciente__num_identificacion=999")
            .reply(&routes)
            .await;
        assert_eq!(sin_coincidencia.status(), StatusCode::OK);
        let cuerpo: serde_json::Value = serde_json::from_slice(sin_coincidencia.body()).unwrap();
        assert!(cuerpo.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn crear_medicion_con_valores_anidados() {
        let api = api_abierta();
        sembrar_catalogo(&api).await;
        sembrar_paciente_y_formulario(&api).await;
        let routes = api.routes();

        let respuesta = warp::test::request()
            .method("POST")
            .path("/mediciones")
            .json(&serde_json::json!({
                "formulario_id": 1,
                "parametro_id": 1,
                "tomada_en": "2024-03-02T10:30:00Z",
                "valores": [
                    {"campo_id": 1, "valor_number": 88}
                ]
            }))
            .reply(&routes)
            .await;
        assert_eq!(respuesta.status(), StatusCode::CREATED);
        let cuerpo: serde_json::Value = serde_json::from_slice(respuesta.body()).unwrap();
        assert_eq!(cuerpo["parametro"]["codigo"], "FREC_CARD");
        assert_eq!(cuerpo["valores"][0]["campo"]["codigo"], "VALOR");
        assert_eq!(cuerpo["valores"][0]["valor_number"], "88");

        // Same instant again: still one measurement row, value replaced.
        let repetida = warp::test::request()
            .method("POST")
            .path("/mediciones")
            .json(&serde_json::json!({
                "formulario_id": 1,
                "parametro_id": 1,
                "tomada_en": "2024-03-02T10:30:00Z",
                "valores": [
                    {"campo_id": 1, "valor_number": 92}
                ]
            }))
            .reply(&routes)
            .await;
        assert_eq!(repetida.status(), StatusCode::CREATED);

        let lista = warp::test::request().path("/mediciones").reply(&routes).await;
        let cuerpo: serde_json::Value = serde_json::from_slice(lista.body()).unwrap();
        assert_eq!(cuerpo.as_array().unwrap().len(), 1);
        assert_eq!(cuerpo[0]["valores"][0]["valor_number"], "92");
    }

    #[tokio::test]
    async fn payload_multivaluado_se_rechaza() {
        let api = api_abierta();
        sembrar_catalogo(&api).await;
        sembrar_paciente_y_formulario(&api).await;
        let routes = api.routes();

        warp::test::request()
            .method("POST")
            .path("/mediciones")
            .json(&serde_json::json!({
                "formulario_id": 1,
                "parametro_id": 1,
                "tomada_en": "2024-03-02T10:30:00Z"
            }))
            .reply(&routes)
            .await;

        let respuesta = warp::test::request()
            .method("POST")
            .path("/mediciones/1/valores")
            .json(&serde_json::json!({
                "campo_id": 1,
                "valor_number": 88,
                "valor_text": "88"
            }))
            .reply(&routes)
            .await;
        assert_eq!(respuesta.status(), StatusCode::BAD_REQUEST);
        let cuerpo: serde_json::Value = serde_json::from_slice(respuesta.body()).unwrap();
        assert!(cuerpo["error"]
            .as_str()
            .unwrap()
            .contains("exactamente un tipo"));
    }

    #[tokio::test]
    async fn declaracion_con_item_equivocado_es_400() {
        let api = api_abierta();
        sembrar_catalogo(&api).await;
        sembrar_paciente_y_formulario(&api).await;
        let routes = api.routes();

        let otro_item = warp::test::request()
            .method("POST")
            .path("/items")
            .json(&serde_json::json!({"codigo": "CTRL_FETAL", "nombre": "Control Fetal"}))
            .reply(&routes)
            .await;
        assert_eq!(otro_item.status(), StatusCode::CREATED);

        let respuesta = warp::test::request()
            .method("POST")
            .path("/formularios-items-parametros")
            .json(&serde_json::json!({
                "formulario_id": 1,
                "item_id": 2,
                "parametro_id": 1
            }))
            .reply(&routes)
            .await;
        assert_eq!(respuesta.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn token_configurado_exige_autorizacion() {
        let mut config = Config::default();
        config.api.auth_token = Some("secreto".into());
        let api = api(config);
        let routes = api.routes();

        let sin_token = warp::test::request().path("/pacientes").reply(&routes).await;
        assert_eq!(sin_token.status(), StatusCode::UNAUTHORIZED);

        let con_token = warp::test::request()
            .path("/pacientes")
            .header("authorization", "Bearer secreto")
            .reply(&routes)
            .await;
        assert_eq!(con_token.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn imprimir_formulario_desconocido_es_404() {
        let api = api_abierta();
        let routes = api.routes();
        let respuesta = warp::test::request()
            .path("/formularios/7/imprimir")
            .reply(&routes)
            .await;
        assert_eq!(respuesta.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tipo_incompatible_es_400() {
        let api = api_abierta();
        sembrar_catalogo(&api).await;
        sembrar_paciente_y_formulario(&api).await;
        let routes = api.routes();

        let respuesta = warp::test::request()
            .method("POST")
            .path("/mediciones")
            .json(&serde_json::json!({
                "formulario_id": 1,
                "parametro_id": 1,
                "tomada_en": "2024-03-02T10:30:00Z",
                "valores": [
                    {"campo_id": 1, "valor_text": "alto"}
                ]
            }))
            .reply(&routes)
            .await;
        assert_eq!(respuesta.status(), StatusCode::BAD_REQUEST);
        let cuerpo: serde_json::Value = serde_json::from_slice(respuesta.body()).unwrap();
        assert!(cuerpo["error"].as_str().unwrap().contains("tipo"));
    }
}
