use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rowmirror::{
    adapter::RowSource, create_router, query::RawParams, DataMode, LocalStore,
    MirrorConfig, QueryDescriptor, RemoteAdapter, Session,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "rowmirror")]
#[command(about = "Paginated row browser over a remote source with a local mirror", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the remote /data endpoints
    #[arg(long, global = true)]
    remote_url: Option<String>,

    /// Bearer token for the remote source
    #[arg(long, global = true)]
    token: Option<String>,

    /// Local store directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the session API over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Replicate the filtered remote subset into the local store
    Sync {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Write every matching row to a timestamped CSV file
    Export {
        #[arg(long, value_enum)]
        mode: Option<DataMode>,

        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        #[command(flatten)]
        query: QueryArgs,
    },
    /// Print one page as JSON
    Query {
        #[arg(long, value_enum)]
        mode: Option<DataMode>,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long)]
        page_size: Option<usize>,

        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    /// Substring filter, repeatable (e.g. --filter City=oslo)
    #[arg(long = "filter", value_name = "COLUMN=PATTERN")]
    filters: Vec<String>,

    #[arg(long)]
    sort_by: Option<String>,

    #[arg(long)]
    sort_dir: Option<String>,
}

impl QueryArgs {
    fn raw_params(&self) -> anyhow::Result<RawParams> {
        let mut raw = RawParams::new();
        for filter in &self.filters {
            let (column, pattern) = filter
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("invalid filter {:?}, expected COLUMN=PATTERN", filter))?;
            raw.insert(column.trim().to_string(), pattern.to_string());
        }
        if let Some(sort_by) = &self.sort_by {
            raw.insert("sortBy".to_string(), sort_by.clone());
        }
        if let Some(sort_dir) = &self.sort_dir {
            raw.insert("sortDir".to_string(), sort_dir.clone());
        }
        Ok(raw)
    }

    fn descriptor(&self) -> anyhow::Result<QueryDescriptor> {
        Ok(rowmirror::plan(&self.raw_params()?))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rowmirror=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = MirrorConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.remote_url {
        config.remote_url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.token = Some(token.clone());
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Command::Serve { port: Some(port) } = &cli.command {
        config.port = *port;
    }
    config.validate()?;

    let session = build_session(&config)?;

    match cli.command {
        Command::Serve { .. } => serve(session, config.port).await,
        Command::Sync { query } => sync(session, query.descriptor()?).await,
        Command::Export {
            mode,
            output_dir,
            query,
        } => export(session, mode, output_dir, query.descriptor()?).await,
        Command::Query {
            mode,
            page,
            page_size,
            query,
        } => {
            let mut raw = query.raw_params()?;
            raw.insert("page".to_string(), page.to_string());
            if let Some(size) = page_size {
                raw.insert("pageSize".to_string(), size.to_string());
            }
            if let Some(mode) = mode {
                session.set_mode(mode);
            }
            let view = session.query(rowmirror::plan(&raw)).await?.into_view()?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
    }
}

fn build_session(config: &MirrorConfig) -> anyhow::Result<Arc<Session>> {
    let store = Arc::new(LocalStore::open(&config.data_dir)?);
    let remote: Arc<dyn RowSource> = Arc::new(RemoteAdapter::with_timeout(
        &config.remote_url,
        config.token.clone(),
        config.request_timeout(),
    )?);
    tracing::info!(
        "Remote source {}, local store {:?}, default mode {}",
        config.remote_url,
        config.data_dir,
        config.default_mode
    );
    Ok(Arc::new(Session::new(remote, store, config.session_config())))
}

async fn serve(session: Arc<Session>, port: u16) -> anyhow::Result<()> {
    let app = create_router(session);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn progress_bar() -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Mirror job status updates onto a progress bar until the job ends.
fn follow_job(session: &Session, pb: ProgressBar) -> tokio::task::JoinHandle<()> {
    let mut rx = session.subscribe_jobs();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            pb.set_length(status.progress.total);
            pb.set_position(status.progress.fetched);
            if let Some(eta) = status.progress.eta_seconds {
                pb.set_message(format!("eta {:.0}s", eta));
            }
            if status.state.is_terminal() {
                break;
            }
        }
    })
}

/// First Ctrl+C asks the running job to stop after its current chunk.
fn cancel_on_ctrl_c(session: &Arc<Session>) -> tokio::task::JoinHandle<()> {
    let session = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            session.cancel_job();
        }
    })
}

async fn sync(session: Arc<Session>, descriptor: QueryDescriptor) -> anyhow::Result<()> {
    let pb = progress_bar()?;
    let follower = follow_job(&session, pb.clone());

    let canceller = cancel_on_ctrl_c(&session);

    let result = session.sync(&descriptor).await;
    canceller.abort();
    let _ = follower.await;

    match result {
        Ok(report) if report.cancelled => {
            pb.abandon_with_message("Cancelled");
            Ok(())
        }
        Ok(report) => {
            pb.finish_with_message(format!(
                "Synced {} rows in {} ms",
                report.fetched, report.duration_ms
            ));
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("Failed");
            Err(e.into())
        }
    }
}

async fn export(
    session: Arc<Session>,
    mode: Option<DataMode>,
    output_dir: PathBuf,
    descriptor: QueryDescriptor,
) -> anyhow::Result<()> {
    let mode = mode.unwrap_or_else(|| session.mode());
    let pb = progress_bar()?;
    let follower = follow_job(&session, pb.clone());

    let canceller = cancel_on_ctrl_c(&session);

    let result = session.export(mode, &descriptor).await;
    canceller.abort();
    let _ = follower.await;

    let artifact = match result {
        Ok(artifact) => artifact,
        Err(e) => {
            pb.abandon_with_message("Failed");
            return Err(e.into());
        }
    };

    std::fs::create_dir_all(&output_dir)?;
    let path = output_dir.join(&artifact.filename);
    std::fs::write(&path, &artifact.bytes)?;

    if artifact.cancelled {
        pb.abandon_with_message("Cancelled (partial file written)");
    } else {
        pb.finish_with_message("Done");
    }
    println!("{} ({} rows)", path.display(), artifact.rows);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down");
}
