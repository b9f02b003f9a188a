mod config;
mod events;
mod server;
mod tui;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc;

use config::ServerConfig;
use events::ServerEvent;
use pecs::{ArchiverPublisher, BatteryLayout, HeaderWidth, JournalStore, RetryPolicy, Sinks};
use server::IngestServer;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "pecs-server")]
#[command(about = "PECS mote telemetry ingest server")]
struct Args {
    #[arg(short, long, default_value = "::")]
    bind: IpAddr,

    #[arg(short, long, default_value_t = pecs::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = HeaderWidth::Three, help = "Read pointer width in bytes (2 or 3)")]
    header_width: HeaderWidth,

    #[arg(long, value_parser = parse_pointer, help = "Mote log size, defaults per header width")]
    log_size: Option<u32>,

    #[arg(long, default_value_t = BatteryLayout::ThreeBit, help = "Battery record layout (three-bit or four-bit)")]
    battery_layout: BatteryLayout,

    #[arg(long, help = "Send bare read pointers without the observer timestamp")]
    no_ack_timestamp: bool,

    #[arg(long, default_value = pecs::sink::DEFAULT_QUERY_URL)]
    query_url: String,

    #[arg(long, default_value = pecs::sink::DEFAULT_INGEST_URL)]
    ingest_url: String,

    #[arg(long, default_value = "pecs-boots.jsonl", help = "Boot event journal")]
    journal: PathBuf,

    #[arg(long, default_value_t = 100)]
    metrics_interval_ms: u64,

    #[arg(long, default_value_t = 256)]
    max_in_flight: usize,

    #[arg(long, default_value_t = 3, help = "Retries for failed archiver and journal writes")]
    retries: u32,

    #[arg(long, default_value_t = 100)]
    retry_base_ms: u64,

    #[arg(long)]
    headless: bool,
}

fn parse_pointer(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    match parsed {
        Ok(0) => Err("log size must be non-zero".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(format!("invalid log size '{}': {}", s, e)),
    }
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let retry = RetryPolicy {
            max_retries: self.retries,
            base_delay: Duration::from_millis(self.retry_base_ms),
            ..RetryPolicy::default()
        };

        ServerConfig {
            bind: SocketAddr::new(self.bind, self.port),
            session: pecs::SessionConfig {
                header_width: self.header_width,
                log_size: self
                    .log_size
                    .unwrap_or_else(|| self.header_width.default_log_size()),
                battery_layout: self.battery_layout,
                metrics_interval: Duration::from_millis(self.metrics_interval_ms.max(1)),
                retry,
            },
            ack_timestamp: !self.no_ack_timestamp,
            max_in_flight: self.max_in_flight,
            query_url: self.query_url.clone(),
            ingest_url: self.ingest_url.clone(),
            journal_path: self.journal.clone(),
        }
    }
}

async fn build_sinks(config: &ServerConfig) -> Result<Sinks> {
    let telemetry = ArchiverPublisher::new(&config.query_url, &config.ingest_url);
    let journal = JournalStore::open(&config.journal_path)
        .await
        .with_context(|| format!("cannot open journal {}", config.journal_path.display()))?;
    Ok(Sinks::new(Arc::new(telemetry), Arc::new(journal)))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.server_config();

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let (server, events) = runtime.block_on(async {
        let sinks = build_sinks(&config).await?;
        IngestServer::bind(config.clone(), sinks)
            .await
            .with_context(|| format!("cannot bind {}", config.bind))
    })?;
    let server = Arc::new(server);

    if args.headless {
        drop(events);
        log::info!(
            "Listening on {} ({}-byte pointers, log size {:#x})",
            server.local_addr(),
            config.session.header_width,
            config.session.log_size
        );
        runtime.block_on(async {
            let cancel = server.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Interrupted, draining in-flight datagrams");
                    cancel.cancel();
                }
            });
            server.run().await;
        });
        log::info!("Server shutting down");
    } else {
        let serving = runtime.spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });
        let result = run_with_tui(&server, events);
        server.cancel_token().cancel();
        runtime.block_on(serving)?;
        result?;
    }

    Ok(())
}

fn run_with_tui(
    server: &IngestServer,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let cancel = server.cancel_token();
    let mut tui_state = TuiState::new();

    tui_state.log_info(format!("Listening on {}", server.local_addr()));

    while !cancel.is_cancelled() {
        while let Ok(event) = events.try_recv() {
            match event {
                ServerEvent::DeviceDiscovered { serial, addr } => {
                    tui_state.log_info(format!("Mote {:04x} reporting from {}", serial, addr));
                }
                ServerEvent::Resynced {
                    serial,
                    expected,
                    got,
                } => {
                    tui_state.log_warn(format!(
                        "Mote {:04x} resynced: expected {:#x}, got {:#x}",
                        serial, expected, got
                    ));
                }
                ServerEvent::DatagramRejected { addr, reason } => {
                    tui_state.log_warn(format!("Rejected datagram from {}: {}", addr, reason));
                }
                ServerEvent::Error { message } => {
                    tui_state.log_error(message);
                }
            }
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => cancel.cancel(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        _ => {}
                    }
                }
            }
        }

        let stats = server.stats();
        let views = server.views();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &views);
        })?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
