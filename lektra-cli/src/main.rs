use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::cursor;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use directories::ProjectDirs;
use lektra_core::backend::EncryptInfo;
use lektra_core::config::{self, EngineConfig};
use lektra_core::recent::RecentFilesStore;
use lektra_core::session::{self, ViewState};
use lektra_core::types::FitMode;
use lektra_core::{DocumentModel, ModelEvent, Rotation, Viewport};
use lektra_render::PdfiumProvider;
use lektra_tty::TerminalGeometry;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod app;
mod commands;
mod outline;
mod watch;

use app::App;
use watch::FileWatcher;

const RECENT_FILES: &str = "recent_files.json";

#[derive(Debug, Parser)]
#[command(
    name = "lektra",
    version,
    about = "kitty-native PDF viewer",
    args_conflicts_with_subcommands = true
)]
struct Args {
    #[command(subcommand)]
    command: Option<BatchCommand>,

    /// Page to open on (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Initial fit mode
    #[arg(long, value_enum)]
    fit: Option<FitArg>,

    /// Configuration file to use instead of the default one
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Restore a saved session by name
    #[arg(short = 's', long)]
    session: Option<String>,

    /// Password for an encrypted document
    #[arg(long)]
    password: Option<String>,

    /// Document to open
    file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum BatchCommand {
    /// Print document properties
    Info { file: PathBuf },
    /// Print the outline
    Outline { file: PathBuf },
    /// Print the text under highlight annotations
    Highlights {
        file: PathBuf,
        /// One entry per highlighted line instead of per annotation
        #[arg(long)]
        by_line: bool,
    },
    /// Rewrite the file with AES-256 encryption
    Encrypt {
        file: PathBuf,
        /// Owner password, defaults to the user password
        #[arg(long)]
        owner: Option<String>,
    },
    /// Rewrite the file without encryption
    Decrypt { file: PathBuf },
    /// List saved sessions
    Sessions,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FitArg {
    None,
    Width,
    Height,
    Window,
}

impl From<FitArg> for FitMode {
    fn from(value: FitArg) -> Self {
        match value {
            FitArg::None => FitMode::None,
            FitArg::Width => FitMode::Width,
            FitArg::Height => FitMode::Height,
            FitArg::Window => FitMode::Window,
        }
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs =
        config::project_dirs().ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs, args.command.is_some())?;
    let sessions_dir = project_dirs.data_local_dir().join("sessions");

    if let Some(BatchCommand::Sessions) = args.command {
        for name in session::list_sessions(&sessions_dir)? {
            println!("{name}");
        }
        return Ok(());
    }

    let config_path = args.config.clone().or_else(EngineConfig::default_path);
    let engine_config = match &config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let provider = Arc::new(PdfiumProvider::new(
        engine_config.rendering.pdfium_library.as_deref(),
    )?);
    let (model, mut events) = DocumentModel::new(provider, engine_config.clone())?;

    if let Some(command) = args.command {
        return run_batch(command, &model, &mut events, args.password).await;
    }

    let restored = match &args.session {
        Some(name) => Some(restore_session(&sessions_dir, name)?),
        None => None,
    };
    let path = match (&args.file, &restored) {
        (Some(file), _) => file.clone(),
        (None, Some(view)) => view.file_path.clone(),
        (None, None) => bail!("no input file provided"),
    };

    let page_count = open_document(&model, &mut events, &path, args.password.clone()).await?;
    info!(page_count, path = %path.display(), "opened");

    let recent_path = project_dirs.data_local_dir().join(RECENT_FILES);
    let mut recent = if engine_config.behavior.recent_files {
        match RecentFilesStore::load(&recent_path) {
            Ok(store) => Some(store),
            Err(err) => {
                warn!(?err, "ignoring unreadable recent files");
                Some(RecentFilesStore::new(&recent_path))
            }
        }
    } else {
        None
    };

    let start_page = args
        .page
        .map(|page| page.saturating_sub(1))
        .or_else(|| restored.as_ref().map(ViewState::page))
        .or_else(|| recent.as_ref().and_then(|store| store.page_number(&path)))
        .unwrap_or(0);

    let geometry = TerminalGeometry::query()?;
    let (width, height) = geometry.view_pixels();
    let mut viewport = Viewport::new(Arc::clone(&model), width as f32, height as f32);
    if let Some(view) = &restored {
        if view.invert_color {
            viewport.toggle_invert();
        }
        viewport.set_rotation(Rotation::from_degrees(view.rotation));
        viewport.set_fit(view.fit_mode);
        if view.fit_mode == FitMode::None {
            viewport.set_zoom(view.zoom);
        }
    }
    if let Some(fit) = args.fit {
        viewport.set_fit(fit.into());
    }
    viewport.reset(start_page);

    let watcher = if engine_config.behavior.auto_reload {
        match FileWatcher::new(&path) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(?err, "auto reload disabled");
                None
            }
        }
    } else {
        None
    };

    let mut app = App::new(viewport, events, geometry, watcher, Some(sessions_dir));
    {
        let _raw = RawModeGuard::new()?;
        crossterm::execute!(
            io::stdout(),
            cursor::Hide,
            event::EnableMouseCapture
        )?;
        let result = app.run();
        let _ = crossterm::execute!(io::stdout(), event::DisableMouseCapture);
        result?;
    }

    if let Some(store) = recent.as_mut() {
        let page = app.viewport().current_page();
        store.upsert(&path, page, Utc::now());
        store.trim(engine_config.behavior.num_recent_files);
        if let Err(err) = store.save() {
            warn!(?err, "failed to save recent files");
        }
    }
    if model.is_modified() {
        eprintln!("unsaved annotation changes were discarded");
    }
    model.close();
    Ok(())
}

fn restore_session(dir: &Path, name: &str) -> Result<ViewState> {
    let path = session::session_path(dir, name)?;
    let tabs = session::load_session(&path)?;
    let view = tabs
        .first()
        .and_then(|tab| tab.views().first().map(|view| (*view).clone()))
        .with_context(|| format!("session {name} has no views"))?;
    debug!(file = %view.file_path.display(), page = view.current_page, "restoring session");
    Ok(view)
}

/// Waits for `path` to finish opening, asking for a password if needed.
async fn open_document(
    model: &Arc<DocumentModel>,
    events: &mut UnboundedReceiver<ModelEvent>,
    path: &Path,
    password: Option<String>,
) -> Result<usize> {
    model.open_async(path, password);
    while let Some(event) = events.recv().await {
        match event {
            ModelEvent::OpenFinished { page_count } => return Ok(page_count),
            ModelEvent::OpenFailed(err) => return Err(err.into()),
            ModelEvent::PasswordRequired { path } => match prompt_password(&path, false)? {
                Some(password) => model.submit_password(password)?,
                None => {
                    model.cancel_open();
                    bail!("no password given for {}", path.display());
                }
            },
            ModelEvent::PasswordRejected { path } => match prompt_password(&path, true)? {
                Some(password) => model.submit_password(password)?,
                None => {
                    model.cancel_open();
                    bail!("no password given for {}", path.display());
                }
            },
            other => debug!(?other, "event before the document opened"),
        }
    }
    bail!("document model stopped before {} opened", path.display())
}

/// Reads a password without echoing it. Esc or ctrl-c gives up.
fn prompt_password(path: &Path, rejected: bool) -> Result<Option<String>> {
    let mut stderr = io::stderr();
    let label = if rejected {
        "Wrong password, try again"
    } else {
        "Password"
    };
    write!(stderr, "{} for {}: ", label, path.display())?;
    stderr.flush()?;

    let _raw = RawModeGuard::new()?;
    let mut password = String::new();
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) = event::read()?
        else {
            continue;
        };
        match code {
            KeyCode::Enter => break,
            KeyCode::Esc => {
                write!(stderr, "\r\n")?;
                return Ok(None);
            }
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                write!(stderr, "\r\n")?;
                return Ok(None);
            }
            KeyCode::Backspace => {
                password.pop();
            }
            KeyCode::Char(c) => password.push(c),
            _ => {}
        }
    }
    write!(stderr, "\r\n")?;
    Ok(Some(password))
}

async fn run_batch(
    command: BatchCommand,
    model: &Arc<DocumentModel>,
    events: &mut UnboundedReceiver<ModelEvent>,
    password: Option<String>,
) -> Result<()> {
    let file = match &command {
        BatchCommand::Info { file }
        | BatchCommand::Outline { file }
        | BatchCommand::Highlights { file, .. }
        | BatchCommand::Encrypt { file, .. }
        | BatchCommand::Decrypt { file } => file.clone(),
        BatchCommand::Sessions => return Ok(()),
    };
    open_document(model, events, &file, password.clone()).await?;

    let mut out = io::stdout().lock();
    match command {
        BatchCommand::Info { .. } => {
            for (key, value) in model.properties()? {
                writeln!(out, "{key}: {value}")?;
            }
        }
        BatchCommand::Outline { .. } => {
            for item in model.outline()? {
                writeln!(out, "{}{} ({})", "  ".repeat(item.depth), item.title, item.page + 1)?;
            }
        }
        BatchCommand::Highlights { by_line, .. } => {
            for highlight in model.collect_highlight_texts(by_line)? {
                writeln!(out, "p{}: {}", highlight.page + 1, highlight.text)?;
            }
        }
        BatchCommand::Encrypt { owner, .. } => {
            let user_password = match password {
                Some(password) => password,
                None => prompt_password(&file, false)?.context("no password given")?,
            };
            model.encrypt(&EncryptInfo {
                user_password,
                owner_password: owner,
            })?;
            writeln!(out, "encrypted {}", file.display())?;
        }
        BatchCommand::Decrypt { .. } => {
            model.decrypt()?;
            writeln!(out, "decrypted {}", file.display())?;
        }
        BatchCommand::Sessions => {}
    }
    model.close();
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "lektra.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // The viewer owns the terminal, so only batch commands log to stderr.
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
