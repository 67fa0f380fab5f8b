use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use serde::{Deserialize, Serialize};
use anyhow::Context;

mod compositor;
mod config;
mod context;
mod coords;
mod editor;
mod gateway;
mod mapping;
mod render;
mod signature;
mod signing;
mod store;

pub use context::GlobalContext;


use clap::{Parser, Subcommand};
use compositor::{CompositeError, SignatureJob, sign_document};
use context::SessionId;
use editor::{EditorAction, EditorError};
use mapping::Mapping;
use signature::{Cpf, SignatureKind, SignatureRaster};
use signing::{SignRequest, SigningError};
use store::{DocumentStore, PersistenceError, unix_now};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        /// Where documents and records are stored
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Sign a PDF offline, placing the signature at the bottom-right of each page
    Sign {
        pdf: PathBuf,
        /// Signature image (PNG or JPEG)
        #[arg(short, long)]
        signature: PathBuf,
        #[arg(long)]
        cpf: String,
        /// Pages to sign, 1-based
        #[arg(long, value_delimiter = ',', required = true)]
        pages: Vec<u32>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print the placements of a mapping file, page by page
    Inspect {
        mapping: PathBuf,
    },
}

type AppState = Arc<GlobalContext>;

/// An error as the HTTP client sees it.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_server_error() {
            log::error!("{}", self.1);
        }
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> ApiError {
        let status = match e {
            PersistenceError::NotFound(_) => StatusCode::NOT_FOUND,
            PersistenceError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            PersistenceError::AlreadyExists(_) => StatusCode::CONFLICT,
            PersistenceError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            PersistenceError::Io(_) | PersistenceError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl From<EditorError> for ApiError {
    fn from(e: EditorError) -> ApiError {
        let status = match e {
            EditorError::Persistence(e) => return e.into(),
            EditorError::DragInProgress => StatusCode::CONFLICT,
            EditorError::Render(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError(status, e.to_string())
    }
}

impl From<CompositeError> for ApiError {
    fn from(e: CompositeError) -> ApiError {
        let status = match e {
            CompositeError::Embed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        ApiError(status, e.to_string())
    }
}

impl From<SigningError> for ApiError {
    fn from(e: SigningError) -> ApiError {
        match e {
            SigningError::Validation(e) => ApiError(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            SigningError::Composite(e) => e.into(),
            SigningError::Persistence(e) => e.into(),
        }
    }
}

#[derive(Serialize)]
struct Status {
    status: String,
    sessions: usize,
}

async fn get_status(State(ctx): State<AppState>) -> Json<Status> {
    Json(Status {
        status: "ok".to_string(),
        sessions: ctx.sessions().lock().await.len(),
    })
}

async fn attach_template(
    State(ctx): State<AppState>,
    Path(template_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Mapping>, ApiError> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        ApiError(StatusCode::BAD_REQUEST, e.to_string())
    };
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        if field.name() == Some("file") {
            let data = field.bytes().await.map_err(bad_request)?;
            // Refuse anything the editor could not open later on.
            render::MediaBoxRenderer::from_bytes(&data)
                .map_err(|e| ApiError(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
            let mapping = ctx.gateway().attach_template(&template_id, data.to_vec()).await?;
            return Ok(Json(mapping));
        }
    }
    Err(ApiError(StatusCode::BAD_REQUEST, "missing `file` part".to_string()))
}

async fn remove_template(
    State(ctx): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if ctx.gateway().remove_template(&template_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(StatusCode::NOT_FOUND, format!("no template `{template_id}`")))
    }
}

async fn get_mapping(
    State(ctx): State<AppState>,
    Path(template_id): Path<String>,
) -> Result<Json<Mapping>, ApiError> {
    let mapping = ctx
        .gateway()
        .load(&template_id)
        .await?
        .ok_or_else(|| PersistenceError::NotFound(template_id))?;
    Ok(Json(mapping))
}

#[derive(Deserialize)]
struct FillParams {
    values: HashMap<String, String>,
}

async fn fill_template(
    State(ctx): State<AppState>,
    Path(template_id): Path<String>,
    Json(params): Json<FillParams>,
) -> Result<Response, ApiError> {
    let gateway = ctx.gateway();
    let mapping = gateway
        .load(&template_id)
        .await?
        .ok_or_else(|| PersistenceError::NotFound(template_id))?;
    let pdf = gateway.template_pdf(&mapping).await?;
    let filled = compositor::fill_fields(&pdf, &mapping, &params.values)?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], filled.pdf).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenSession {
    #[serde(default)]
    field_keys: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionCreated {
    session_id: SessionId,
}

async fn open_session(
    State(ctx): State<AppState>,
    Path(template_id): Path<String>,
    Json(params): Json<OpenSession>,
) -> Result<Json<SessionCreated>, ApiError> {
    let session_id = ctx.open_session(&template_id, &params.field_keys).await?;
    Ok(Json(SessionCreated { session_id }))
}

fn no_session(id: SessionId) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, format!("no editor session {id}"))
}

async fn get_session(
    State(ctx): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Response, ApiError> {
    let sessions = ctx.sessions().lock().await;
    let session = sessions.get(&id).ok_or_else(|| no_session(id))?;
    Ok(Json(session.view()).into_response())
}

async fn session_action(
    State(ctx): State<AppState>,
    Path(id): Path<SessionId>,
    Json(action): Json<EditorAction>,
) -> Result<Response, ApiError> {
    let mut sessions = ctx.sessions().lock().await;
    let session = sessions.get_mut(&id).ok_or_else(|| no_session(id))?;
    let needs_capture = matches!(
        action,
        EditorAction::GoToPage { .. } | EditorAction::SetZoom { .. }
    );
    session.apply(action)?;
    if needs_capture {
        session.capture_current_page()?;
    }
    Ok(Json(session.view()).into_response())
}

async fn save_session(
    State(ctx): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Mapping>, ApiError> {
    let mapping = ctx.save_session(id).await?.ok_or_else(|| no_session(id))?;
    Ok(Json(mapping))
}

async fn close_session(
    State(ctx): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    if ctx.close_session(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(no_session(id))
    }
}

async fn sign(
    State(ctx): State<AppState>,
    Json(request): Json<SignRequest>,
) -> Result<Response, ApiError> {
    let receipt = ctx.signer().sign(&request, ctx.config.legend_now()).await?;
    Ok(Json(receipt).into_response())
}

#[derive(Deserialize)]
struct FileParams {
    expires: i64,
    token: String,
}

async fn read_file(
    State(ctx): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<FileParams>,
) -> Result<Response, ApiError> {
    if !ctx
        .docs
        .signer()
        .verify(&path, params.expires, &params.token, unix_now())
    {
        return Err(ApiError(StatusCode::FORBIDDEN, "invalid or expired link".to_string()));
    }
    let data = ctx.docs.download(&path).await?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], Bytes::from(data)).into_response())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(config::default_config_path);
    let mut config = match &config_path {
        Some(path) => config::Config::load(path),
        None => config::Config::default(),
    };

    match cli.command {
        Some(Commands::Sign {
            pdf,
            signature,
            cpf,
            pages,
            out,
        }) => sign_offline(&config, pdf, signature, &cpf, &pages, out),
        Some(Commands::Inspect { mapping }) => inspect(&mapping),
        Some(Commands::Serve { port, data_dir }) => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            serve(config).await
        }
        None => serve(config).await,
    }
}

fn sign_offline(
    config: &config::Config,
    pdf_path: PathBuf,
    signature_path: PathBuf,
    cpf: &str,
    pages: &[u32],
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let cpf = Cpf::parse(cpf).with_context(|| format!("invalid CPF `{cpf}`"))?;
    let pdf = std::fs::read(&pdf_path)
        .with_context(|| format!("cannot read {}", pdf_path.display()))?;
    let image = std::fs::read(&signature_path)
        .with_context(|| format!("cannot read {}", signature_path.display()))?;
    let raster = SignatureRaster::new(SignatureKind::Uploaded, image);

    let signed = sign_document(&SignatureJob {
        pdf: &pdf,
        raster: &raster,
        cpf: &cpf,
        pages,
        page_dims: &HashMap::new(),
        placements: &HashMap::new(),
        signed_at: config.legend_now(),
    })?;

    let out = out.unwrap_or_else(|| pdf_path.with_extension("signed.pdf"));
    std::fs::write(&out, &signed.pdf)
        .with_context(|| format!("cannot write {}", out.display()))?;
    println!("Signed pages {:?} into {}", signed.signed_pages, out.display());
    for failure in &signed.failures {
        println!("Skipped page {}: {}", failure.page, failure.reason);
    }
    Ok(())
}

fn inspect(path: &std::path::Path) -> anyhow::Result<()> {
    let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let mapping: Mapping = serde_json::from_slice(&data).context("not a mapping document")?;

    println!("Template: {}", mapping.template_url);
    let mut pages: Vec<u32> = mapping.fields.iter().filter_map(|f| f.page()).collect();
    pages.sort_unstable();
    pages.dedup();
    for page in pages {
        println!("Page {page}:");
        for (_, field) in mapping.placements_on_page(page) {
            if let Some(c) = &field.coordinates {
                println!(
                    "  {:<24} x={:6.2}% y={:6.2}% {:.1}x{:.1}% {}pt {:?}",
                    field.field_key, c.x, c.y, c.width, c.height, c.font_size, c.font_family
                );
            }
        }
    }
    let unplaced = mapping.unplaced_fields();
    if !unplaced.is_empty() {
        println!("Unplaced: {}", unplaced.join(", "));
    }
    Ok(())
}

async fn serve(config: config::Config) -> anyhow::Result<()> {
    let port = config.port;
    log::info!("Storing data in {}", config.data_dir.display());
    let state = Arc::new(GlobalContext::new(config));

    let app = Router::new()
        .route("/api/status", get(get_status))
        .route(
            "/api/templates/:id",
            post(attach_template).delete(remove_template),
        )
        .route("/api/templates/:id/mapping", get(get_mapping))
        .route("/api/templates/:id/fill", post(fill_template))
        .route("/api/templates/:id/sessions", post(open_session))
        .route("/api/sessions/:id", get(get_session).delete(close_session))
        .route("/api/sessions/:id/action", post(session_action))
        .route("/api/sessions/:id/save", post(save_session))
        .route("/api/sign", post(sign))
        .route("/files/*path", get(read_file))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Backend listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
