use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use client_core::{
    pdf_file_name, Outcome, ReportExporter, ResearchApi, ResearchController, ResearchSession,
    SessionEvent, StreamConnector,
};
use shared::{
    domain::{CompanyId, JobId},
    protocol::ResearchRequest,
};
use storage::{NewCompany, Storage};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::{load_settings, prepare_database_url, Settings};
use render::{summary, ProgressPrinter};

#[derive(Parser, Debug)]
#[command(name = "research", about = "Run a company research job and follow its progress")]
struct Args {
    /// Company to research.
    company: Option<String>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    industry: Option<String>,
    #[arg(long)]
    hq: Option<String>,
    /// Research a company from the saved list instead.
    #[arg(long, conflicts_with = "company")]
    saved: Option<String>,
    /// Add the company to the saved list before submitting.
    #[arg(long, requires = "company")]
    save: bool,
    /// Follow an already running job instead of submitting a new one.
    #[arg(long, conflicts_with_all = ["company", "saved"])]
    job_id: Option<String>,
    /// Write the final report here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,
    /// Also export the report as `{company}.pdf`.
    #[arg(long)]
    pdf: bool,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    /// Treat a stream silent for this many seconds as lost.
    #[arg(long)]
    idle_timeout: Option<u64>,
}

enum Job {
    Submit(ResearchRequest),
    Follow(JobId),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    apply_cli_overrides(&mut settings, &args);
    debug!(?settings, "settings loaded");

    let api = Arc::new(
        ResearchApi::new(&settings.api_url)
            .with_context(|| format!("invalid api url '{}'", settings.api_url))?,
    );
    let job = resolve_job(&args, &settings).await?;

    let controller = ResearchController::new(
        api.clone(),
        StreamConnector::with_options(api.clone(), settings.connector_options()),
    );
    let mut events = controller.subscribe_events();

    let company_name = match job {
        Job::Submit(request) => {
            let company = request.company.clone();
            let job_id = controller.submit(request).await?;
            println!("Research started for {company} (job {job_id})");
            company
        }
        Job::Follow(job_id) => {
            println!("Following job {job_id}");
            controller.attach(job_id).await;
            String::new()
        }
    };

    let mut printer = ProgressPrinter::new();
    let session = tokio::select! {
        session = follow(&controller, &mut events, &mut printer) => session,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            controller.reset().await;
            info!("research cancelled by user");
            eprintln!("Cancelled.");
            return Ok(());
        }
    };

    for line in summary(&session) {
        println!("{line}");
    }

    match &session.outcome {
        Outcome::Complete => {}
        Outcome::Error(message) => bail!("research failed: {message}"),
        Outcome::Pending => bail!("research stream closed without a result"),
    }

    write_report(&session.report, args.output.as_ref()).await?;
    if args.pdf {
        let pdf = api.export_pdf(&session.report, &company_name).await?;
        let path = pdf_file_name(&company_name);
        tokio::fs::write(&path, pdf)
            .await
            .with_context(|| format!("failed to write {path}"))?;
        println!("PDF saved to {path}");
    }

    Ok(())
}

fn apply_cli_overrides(settings: &mut Settings, args: &Args) {
    if let Some(v) = &args.api_url {
        settings.api_url = v.clone();
    }
    if let Some(v) = &args.database_url {
        settings.database_url = v.clone();
    }
    if let Some(v) = args.idle_timeout {
        settings.stream_idle_timeout_secs = Some(v);
    }
}

async fn resolve_job(args: &Args, settings: &Settings) -> Result<Job> {
    if let Some(job_id) = &args.job_id {
        return Ok(Job::Follow(JobId::from(job_id.as_str())));
    }

    if let Some(saved_id) = &args.saved {
        let storage = open_storage(settings).await?;
        let company = storage
            .find_company(&CompanyId::from(saved_id.as_str()))
            .await?
            .ok_or_else(|| anyhow!("no saved company with id {saved_id}"))?;
        return Ok(Job::Submit(ResearchRequest::from_saved(&company)));
    }

    let Some(company) = args.company.as_deref() else {
        bail!("a company name, --saved id or --job-id is required");
    };
    let request = ResearchRequest::from_form(
        company,
        args.url.as_deref(),
        args.industry.as_deref(),
        args.hq.as_deref(),
    );
    if request.company.is_empty() {
        bail!("company name is required");
    }

    if args.save {
        let storage = open_storage(settings).await?;
        let saved = storage
            .add_company(NewCompany {
                name: request.company.clone(),
                url: request.company_url.clone(),
                hq: request.hq_location.clone(),
                industry: request.industry.clone(),
            })
            .await?;
        println!("Saved {} as {}", saved.name, saved.id);
    }
    Ok(Job::Submit(request))
}

async fn open_storage(settings: &Settings) -> Result<Storage> {
    let database_url = prepare_database_url(&settings.database_url)?;
    Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open saved companies at {database_url}"))
}

/// Prints progress until the controller reports the stream closed, then returns the final
/// session.
async fn follow(
    controller: &ResearchController,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    printer: &mut ProgressPrinter,
) -> ResearchSession {
    for line in printer.update(&controller.snapshot().await) {
        println!("{line}");
    }
    loop {
        match events.recv().await {
            Ok(SessionEvent::Updated(session)) => {
                for line in printer.update(&session) {
                    println!("{line}");
                }
            }
            Ok(SessionEvent::DecodeFailed { reason, .. }) => {
                debug!(reason, "skipped undecodable event");
            }
            Ok(SessionEvent::StreamClosed { .. }) | Err(RecvError::Closed) => break,
            Ok(SessionEvent::Reset) => printer.reset(),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "progress renderer fell behind");
            }
        }
    }
    controller.snapshot().await
}

async fn write_report(report: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(path, report)
                .await
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            println!("Report saved to {}", path.display());
        }
        None => println!("\n{report}"),
    }
    Ok(())
}
