// ============================================================================
// delivery-verify — operator front end for delivery verification
// ============================================================================
// Usage:
//   delivery-verify verify [ID | /verify/ID | /thank-you]   Interactive form
//   delivery-verify details ID [--json]                       Show expected items
//   delivery-verify confirm ID --received NAME=QTY... [--proof FILE]
//
// The backend URL comes from VERIFY_API_BASE_URL (a .env file is honoured)
// or --api-url.
// ============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use verify_core::{
    parse_received, AppConfig, HttpBackend, ItemFilter, Route, SubmitOutcome, UploadStatus,
    VerificationSession, VerifyError, VideoFormat,
};

/// Delivery verification operator tool
#[derive(Parser)]
#[command(
    name = "delivery-verify",
    version,
    about = "Check delivered quantities against the delivery backend and confirm them"
)]
struct Cli {
    /// Backend base URL, e.g. http://localhost:8000
    #[arg(long, global = true, env = "VERIFY_API_BASE_URL")]
    api_url: Option<String>,

    /// Per-request timeout in seconds (at least 1)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,

    /// Hide items with this name (repeatable)
    #[arg(long = "exclude-field", global = true)]
    exclude_fields: Vec<String>,

    /// Hide the usual non-product sheet columns and lines with nothing sent
    #[arg(long, global = true)]
    non_product_filter: bool,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive verification form
    Verify {
        /// Request ID or route path; defaults to the sample request
        target: Option<String>,
    },

    /// Fetch and print the expected items for a request
    Details {
        request_id: String,

        /// Print the fetched details as JSON
        #[arg(long)]
        json: bool,
    },

    /// Submit received quantities without prompting
    Confirm {
        request_id: String,

        /// Received quantity as NAME=QTY (repeat for every item)
        #[arg(long = "received", value_parser = parse_received_pair, required = true)]
        received: Vec<(String, u32)>,

        /// Proof clip to attach when quantities mismatch
        #[arg(long)]
        proof: Option<PathBuf>,
    },
}

fn parse_received_pair(s: &str) -> std::result::Result<(String, u32), String> {
    let (name, qty) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=QTY, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing item name in '{}'", s));
    }
    match parse_received(qty) {
        Ok(Some(qty)) => Ok((name.to_string(), qty)),
        Ok(None) => Err(format!("missing quantity for '{}'", name)),
        Err(e) => Err(e.to_string()),
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("verify_core={}", level).parse()?)
                .add_directive(format!("delivery_verify={}", level).parse()?),
        )
        .init();
    Ok(())
}

fn build_config(cli: &Cli) -> AppConfig {
    let mut config = AppConfig::from_env();
    if let Some(url) = &cli.api_url {
        config.api_base_url = Some(url.clone());
    }
    if let Some(secs) = cli.timeout_secs {
        config.http_timeout = Duration::from_secs(secs);
    }
    if cli.non_product_filter {
        let mut filter = ItemFilter::non_product_fields();
        filter.excluded.extend(config.item_filter.excluded.drain(..));
        config.item_filter = filter;
    }
    config.item_filter.excluded.extend(cli.exclude_fields.iter().cloned());
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap reads env-backed flags
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    if let Err(e) = dotenv {
        info!("No .env file loaded: {}", e);
    }

    let config = build_config(&cli);

    match cli.command {
        Commands::Verify { target } => cmd_verify(&config, target).await,
        Commands::Details { request_id, json } => cmd_details(&config, &request_id, json).await,
        Commands::Confirm {
            request_id,
            received,
            proof,
        } => cmd_confirm(&config, &request_id, received, proof).await,
    }
}

fn connect(config: &AppConfig) -> Result<HttpBackend> {
    let backend = HttpBackend::new(config.backend()?)?;
    info!("Using backend {}", backend.config().base_url());
    Ok(backend)
}

// ============================================================================
// details
// ============================================================================

async fn cmd_details(config: &AppConfig, request_id: &str, json: bool) -> Result<()> {
    let backend = connect(config)?;
    let mut session = VerificationSession::from_config(config);
    session.load(&backend, request_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session.details())?);
    } else {
        print_details(&session);
    }
    Ok(())
}

// ============================================================================
// confirm
// ============================================================================

async fn cmd_confirm(
    config: &AppConfig,
    request_id: &str,
    received: Vec<(String, u32)>,
    proof: Option<PathBuf>,
) -> Result<()> {
    let backend = connect(config)?;
    let mut session = VerificationSession::from_config(config);
    session.load(&backend, request_id).await?;

    for (name, qty) in &received {
        session.set_received(name, &qty.to_string())?;
    }

    if let Some(path) = proof {
        if session.capture_available() {
            record_clip(&mut session, &path).await?;
        } else {
            warn!("All quantities match; not attaching {}", path.display());
        }
    }

    let outcome = session.submit(&backend).await?;
    print_thank_you(Some(&outcome));
    Ok(())
}

// ============================================================================
// verify (interactive)
// ============================================================================

/// Line-oriented reader over stdin
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Print `prompt` and read one line; `None` on end of input
    async fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{}", prompt);
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }
}

async fn cmd_verify(config: &AppConfig, target: Option<String>) -> Result<()> {
    let route = match target.as_deref().map(str::trim) {
        Some(t) if t.starts_with('/') => Route::resolve(t, &config.default_request_id),
        Some(id) if !id.is_empty() => Route::Verify(id.to_string()),
        _ => Route::resolve("/", &config.default_request_id),
    };

    let mut request_id = match route {
        Route::ThankYou => {
            print_thank_you(None);
            return Ok(());
        }
        Route::Verify(id) => id,
    };

    let backend = connect(config)?;
    let mut session = VerificationSession::from_config(config);
    let mut prompt = Prompt::new();

    // Fetch until a request loads or the operator gives up
    loop {
        println!("Fetching {}...", request_id);
        match session.load(&backend, &request_id).await {
            Ok(()) => break,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                eprintln!("{}", e);
                match prompt.ask("Request ID (blank to quit): ").await? {
                    Some(id) if !id.trim().is_empty() => request_id = id.trim().to_string(),
                    _ => return Ok(()),
                }
            }
        }
    }

    print_details(&session);
    println!("\nEnter the received quantity for each item (blank to skip).");
    let names: Vec<String> = session.rows().map(|r| r.name().to_string()).collect();
    for name in &names {
        if !enter_quantity(&mut session, &mut prompt, name).await? {
            return abandon(&mut session);
        }
    }

    loop {
        println!();
        print_rows(&session);
        print_summary(&session);

        let mut menu = String::from("[s]ubmit  [e]dit ITEM");
        if session.capture_available() {
            menu.push_str("  [r]ecord proof");
        }
        if session.proof().is_some() {
            menu.push_str("  [d]iscard proof");
        }
        menu.push_str("  [q]uit > ");

        let line = match prompt.ask(&menu).await? {
            Some(line) => line,
            None => return abandon(&mut session),
        };
        let line = line.trim();
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));

        match cmd {
            "s" | "submit" => match session.submit(&backend).await {
                Ok(outcome) => {
                    print_thank_you(Some(&outcome));
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e @ VerifyError::Submit(_)) => {
                    eprintln!("{}", e);
                    eprintln!("Your entries are kept; submit again to retry.");
                }
                Err(e) => eprintln!("{}", e),
            },
            "e" | "edit" => {
                let name = arg.trim();
                if session.row(name).is_none() {
                    eprintln!("Unknown item '{}'", name);
                    continue;
                }
                if !enter_quantity(&mut session, &mut prompt, name).await? {
                    return abandon(&mut session);
                }
            }
            "r" | "record" => {
                let path = match prompt.ask("Path to proof clip: ").await? {
                    Some(p) if !p.trim().is_empty() => PathBuf::from(p.trim()),
                    _ => continue,
                };
                if let Err(e) = record_clip(&mut session, &path).await {
                    eprintln!("{:#}", e);
                }
            }
            "d" | "discard" => session.discard_proof(),
            "q" | "quit" => return abandon(&mut session),
            "" => {}
            other => eprintln!("Unknown command '{}'", other),
        }
    }
}

/// Prompt for one row until the input parses; `false` on end of input
async fn enter_quantity(
    session: &mut VerificationSession,
    prompt: &mut Prompt,
    name: &str,
) -> Result<bool> {
    loop {
        let sent = session.row(name).map(|r| r.sent()).unwrap_or_default();
        let line = match prompt.ask(&format!("  {} (sent {}): ", name, sent)).await? {
            Some(line) => line,
            None => return Ok(false),
        };
        match session.set_received(name, &line) {
            Ok(status) if status.is_mismatch() => {
                println!("    -> {}", status);
                return Ok(true);
            }
            Ok(_) => return Ok(true),
            Err(e) => eprintln!("    {}", e),
        }
    }
}

fn abandon(session: &mut VerificationSession) -> Result<()> {
    if let Some(id) = session.request_id() {
        println!("Abandoned {} without submitting.", id);
    }
    session.reset();
    Ok(())
}

async fn record_clip(session: &mut VerificationSession, path: &Path) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .map(VideoFormat::from_extension)
        .unwrap_or_default();
    session.set_capture_format(format);

    let video = session.record_proof(file).await?;
    println!(
        "Recorded proof clip: {:.1} MB ({})",
        video.len() as f64 / (1024.0 * 1024.0),
        video.format.extension
    );
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_details(session: &VerificationSession) {
    let Some(details) = session.details() else {
        return;
    };
    println!("\n=== {} ===", details.name);
    println!("Request:  {}", details.cid);
    println!("Project:  {}", details.project);
    if !details.address.is_empty() {
        println!("Address:  {}", details.address);
    }
    println!();
    println!("{:>3}  {:<28} {:>5}  {:>9}", "#", "ITEM", "SENT", "ON RECORD");
    println!("{}", "-".repeat(52));
    for row in session.rows() {
        println!(
            "{:>3}  {:<28} {:>5}  {:>9}",
            row.position() + 1,
            row.name(),
            row.sent(),
            row.previously_recorded()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".into())
        );
    }
}

fn print_rows(session: &VerificationSession) {
    for row in session.rows() {
        println!("{}", row);
    }
}

fn print_summary(session: &VerificationSession) {
    let summary = session.summary();
    if summary.pending > 0 {
        println!("{} item(s) still need a received quantity.", summary.pending);
    }
    if summary.has_mismatch() {
        println!(
            "Mismatch in {} item(s): {} short, {} over.",
            summary.mismatched(),
            summary.shortages,
            summary.excesses
        );
        match session.proof() {
            Some(video) => println!("Proof clip attached ({} bytes).", video.len()),
            None => println!("You may record a proof clip before submitting."),
        }
    }
}

fn print_thank_you(outcome: Option<&SubmitOutcome>) {
    println!("\nThank you! Your delivery confirmation has been recorded.");
    let Some(outcome) = outcome else {
        return;
    };
    println!("Request {} confirmed.", outcome.cid);
    match &outcome.upload {
        UploadStatus::NotRequired => {}
        UploadStatus::Uploaded { file_name } => println!("Proof clip uploaded as {}.", file_name),
        UploadStatus::Failed(e) => eprintln!("{} (the confirmation itself was saved)", e),
    }
}
