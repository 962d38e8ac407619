use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::ValueEnum;
use eyre::{Result, bail};
use log::{debug, info};

use subgrab::bilibili::BilibiliClient;
use subgrab::cache::{CacheInterceptor, TranscriptCache};
use subgrab::capture::{self, CaptureInterceptor, TokenLookup, TokenRelay, TokenStore};
use subgrab::clock::{Clock, SystemClock};
use subgrab::config::{Config, config_path};
use subgrab::extract::{Extractor, PageSnapshot};
use subgrab::http::{HttpClient, ReqwestTransport};
use subgrab::storage::MemoryStore;
use subgrab::submit::{BackendSink, SubmissionPayload, SubmissionSink};
use subgrab::youtube::TranscriptFetcher;

mod cli;

use cli::{Cli, OutputFormat};

fn setup_logging() -> Result<()> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = log_dir.join("subgrab.log");

    let target = Box::new(std::fs::OpenOptions::new().create(true).append(true).open(&log_file)?);

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized: {}", log_file.display());
    Ok(())
}

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("subgrab")
        .join("logs")
}

fn build_after_help() -> String {
    format!(
        "\nSUPPORTED PAGES:\n  https://www.youtube.com/watch?v=ID\n  https://youtu.be/ID\n  https://www.youtube.com/embed/ID\n  https://www.bilibili.com/video/BV...\n  https://www.bilibili.com/video/av...\n  <11-character YouTube video ID>\n\nConfig is read from: {}\nLogs are written to: {}",
        config_path().display(),
        log_dir().join("subgrab.log").display()
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let after_help = build_after_help();
    let cmd = <Cli as clap::CommandFactory>::command().after_help(after_help);
    let matches = cmd.get_matches();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches)?;

    // Load config file (non-fatal if missing/invalid)
    let config = Config::load().unwrap_or_default();

    // Apply config defaults (CLI flags take priority)
    let lang = cli.lang.clone().or_else(|| config.default_lang.clone());
    let format = cli
        .format
        .or_else(|| {
            config
                .default_format
                .as_deref()
                .and_then(|f| OutputFormat::from_str(f, true).ok())
        })
        .unwrap_or(OutputFormat::Text);

    if cli.verbose {
        let config_path = config_path();
        if config_path.exists() {
            eprintln!("Config: {}", config_path.display());
        }
        if let Some(ref default_lang) = config.default_lang {
            debug!("Config default_lang: {default_lang}");
        }
    }

    // Page context: observes caption traffic and fills the page token store and the cache
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (bus, inbox) = capture::channel();
    let page_tokens = Arc::new(TokenStore::new(clock.clone(), config.token_max_age()));
    let page_hook = Arc::new(CaptureInterceptor::new(page_tokens, bus));
    let cache = Arc::new(TranscriptCache::new(clock.clone()));

    let transport = ReqwestTransport::new()?.with_user_agent(config.user_agent.clone());
    let http = HttpClient::new(Arc::new(transport))
        .with_interceptor(page_hook.clone())
        .with_interceptor(Arc::new(CacheInterceptor::new(cache.clone())));

    // Extension context: relays captured tokens to the fetcher
    let relay = TokenRelay::new(TokenStore::new(clock, config.token_max_age())).spawn(inbox);
    let lookup = TokenLookup::new(Some(relay), config.token_lookup_timeout());

    let extractor = Extractor::new(
        TranscriptFetcher::new(http.clone(), cache, lookup),
        BilibiliClient::new(http.clone()),
    )
    .with_lang(lang);

    let store = MemoryStore::new();
    config.seed(&store);
    let sink = BackendSink::from_store(http.clone(), &store);

    // Collect URLs: from arg or stdin
    let urls = if let Some(ref url) = cli.url {
        vec![url.clone()]
    } else {
        let stdin = io::stdin();
        stdin.lock().lines().collect::<Result<Vec<_>, _>>()?
    };

    if urls.is_empty() {
        bail!("no URL or video ID provided\n\nUsage: subgrab <URL>\n       echo <URL> | subgrab");
    }

    for url_input in &urls {
        let url_input = url_input.trim().to_string();
        if url_input.is_empty() {
            continue;
        }

        page_hook.set_page_url(&url_input);
        let mut page = PageSnapshot::new(&url_input);
        if let Some(ref path) = cli.html {
            page = page.with_html(std::fs::read_to_string(path)?);
        }

        if let Some(ref request_url) = cli.player_request {
            let response = http.get(request_url).await?;
            debug!("Player request returned HTTP {}", response.status);
        }

        let bundle = extractor.extract(&page).await?;

        if cli.verbose {
            eprintln!(
                "Platform: {}\nVideo: {} ({})\nUploader: {}\nSubtitles: {} ({}, {} items)",
                bundle.metadata.platform,
                bundle.metadata.title,
                bundle.metadata.video_id,
                bundle.metadata.uploader_name.as_deref().unwrap_or("unknown"),
                bundle.subtitles.title,
                bundle.subtitles.language_code,
                bundle.subtitles.items.len(),
            );
        }

        let rendered = match format {
            OutputFormat::Text => subgrab::output::render_text(&bundle),
            OutputFormat::Json => subgrab::output::render_json(&bundle)?,
            OutputFormat::Srt => subgrab::output::render_srt(&bundle),
        };

        if let Some(ref path) = cli.output {
            std::fs::write(path, &rendered)?;
            if cli.verbose {
                eprintln!("Output written to: {}", path.display());
            }
        } else {
            println!("{rendered}");
        }

        if cli.submit {
            let payload = SubmissionPayload::from_bundle(&bundle, Utc::now());
            let receipt = sink.submit(&payload).await?;
            match receipt.id {
                Some(id) => eprintln!("Submitted to {} (id {id}): {}", sink.endpoint(), receipt.message),
                None => eprintln!("Submitted to {}: {}", sink.endpoint(), receipt.message),
            }
        }
    }

    Ok(())
}
