pub mod commands;
pub mod engine;
pub mod error;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod settings;
pub mod track;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use commands::CommandHandler;
use engine::{engine_event_channel, StubEngineFactory};
use registry::SessionRegistry;
use resolver::CatalogResolver;
use service::MusicService;
use session::GuildId;
use settings::Settings;
use transport::{ChannelRef, StubTransport};

pub use error::JukeboxError;

/// How much faster than real time the demo engine plays.
const DEMO_PLAYBACK_SPEED: f64 = 30.0;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Install the global subscriber. `RUST_LOG` wins over `log_filter`.
/// Logs go to stderr so replies on stdout stay readable.
pub fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if settings.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        eprintln!("tracing already initialised: {err}");
    }
}

/// One chat message as read by the demo front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub guild: GuildId,
    pub voice: Option<ChannelRef>,
    pub message: String,
}

/// Parse `<guild> <channel|-> <message>`. `-` means the author is not in a
/// voice channel.
pub fn parse_request(line: &str) -> Result<Request, JukeboxError> {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let guild = parts
        .next()
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| JukeboxError::Command("missing guild id".to_string()))?;
    let guild = guild
        .parse::<u64>()
        .map(GuildId)
        .map_err(|_| JukeboxError::Command(format!("invalid guild id: {guild}")))?;
    let voice = match parts.next() {
        Some("-") => None,
        Some(channel) if !channel.is_empty() => Some(ChannelRef::new(channel)),
        _ => return Err(JukeboxError::Command("missing voice channel".to_string())),
    };
    let message = parts.next().map(str::trim).unwrap_or_default();
    if message.is_empty() {
        return Err(JukeboxError::Command("missing message".to_string()));
    }
    Ok(Request {
        guild,
        voice,
        message: message.to_string(),
    })
}

/// Requests read line by line from `reader`. Blank and malformed lines are
/// skipped; the stream ends with the input.
pub fn request_stream<R>(reader: R) -> impl Stream<Item = Request>
where
    R: AsyncBufRead + Unpin,
{
    futures_util::stream::unfold(reader.lines(), |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match parse_request(&line) {
                    Ok(request) => return Some((request, lines)),
                    Err(err) => warn!(line = %line, error = %err, "skipping input line"),
                },
                Ok(None) => return None,
                Err(err) => {
                    warn!(error = %err, "failed to read input");
                    return None;
                }
            }
        }
    })
}

/// Run the jukebox on stub collaborators, reading requests from stdin until
/// EOF or Ctrl-C.
pub async fn run(settings: Settings) -> Result<()> {
    settings.validate().context("Invalid settings")?;

    let (events_tx, events_rx) = engine_event_channel();
    let engines = Arc::new(
        StubEngineFactory::new(settings.default_volume).with_playback_clock(DEMO_PLAYBACK_SPEED),
    );
    let registry = Arc::new(SessionRegistry::new(engines, events_tx));
    let service = Arc::new(MusicService::new(
        registry,
        Arc::new(CatalogResolver::demo(&settings.search_prefix)),
        Arc::new(StubTransport::new()),
        settings.default_volume,
    ));
    let pump = service.spawn_event_pump(events_rx);
    let handler = CommandHandler::new(service.clone(), &settings);

    info!(prefix = %settings.command_prefix, "guild jukebox ready");

    let requests = request_stream(BufReader::new(tokio::io::stdin()));
    futures_util::pin_mut!(requests);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);

    loop {
        tokio::select! {
            request = requests.next() => {
                let Some(request) = request else {
                    info!("input closed");
                    break;
                };
                let reply = handler
                    .handle(request.guild, request.voice, &request.message)
                    .await;
                if let Some(reply) = reply {
                    println!("{reply}\n");
                }
            }
            _ = housekeeping.tick() => {
                let evicted = service.registry().evict_inactive();
                debug!(evicted, active = service.registry().active_count(), "housekeeping");
            }
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
    }

    service.shutdown();
    pump.abort();
    Ok(())
}
