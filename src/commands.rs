//! Chat command front end: parses prefixed messages, calls the
//! [`MusicService`] and renders replies.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::JukeboxError;
use crate::resolver::TrackLoadResult;
use crate::service::MusicService;
use crate::session::GuildId;
use crate::settings::Settings;
use crate::track::Track;
use crate::transport::ChannelRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Stop,
    Skip,
    Pause,
    Resume,
    Queue,
    NowPlaying,
    /// `None` asks for the current volume.
    Volume(Option<u8>),
    Shuffle,
    Clear,
    Repeat,
    /// 0-based; users type it 1-based.
    Remove(usize),
    Help,
}

impl Command {
    /// Parse a chat message. Messages without the prefix and unknown
    /// commands yield `Ok(None)`; a known command with bad arguments is an
    /// error carrying the text to show the user.
    pub fn parse(message: &str, prefix: &str) -> Result<Option<Self>, JukeboxError> {
        let Some(body) = message.trim().strip_prefix(prefix) else {
            return Ok(None);
        };
        let mut words = body.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match name.to_lowercase().as_str() {
            "play" | "p" => {
                if args.is_empty() {
                    return Err(JukeboxError::Command(format!(
                        "Usage: `{prefix}play <url or search terms>`"
                    )));
                }
                Command::Play(args.join(" "))
            }
            "stop" => Command::Stop,
            "skip" | "s" => Command::Skip,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "queue" | "q" => Command::Queue,
            "np" => Command::NowPlaying,
            "volume" | "vol" => match args.first() {
                None => Command::Volume(None),
                Some(raw) => Command::Volume(Some(parse_volume(raw)?)),
            },
            "shuffle" => Command::Shuffle,
            "clear" => Command::Clear,
            "repeat" | "loop" => Command::Repeat,
            "remove" => {
                let position = args
                    .first()
                    .and_then(|raw| raw.parse::<usize>().ok())
                    .filter(|position| *position > 0)
                    .ok_or_else(|| {
                        JukeboxError::Command(format!("Usage: `{prefix}remove <position>`"))
                    })?;
                Command::Remove(position - 1)
            }
            "help" => Command::Help,
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

fn parse_volume(raw: &str) -> Result<u8, JukeboxError> {
    let volume: i64 = raw
        .parse()
        .map_err(|_| JukeboxError::Command("Volume must be a number".to_string()))?;
    if !(0..=100).contains(&volume) {
        return Err(JukeboxError::Command(
            "Volume must be between 0 and 100".to_string(),
        ));
    }
    Ok(volume as u8)
}

/// Direct links pass through; anything else becomes a search.
pub fn normalize_query(query: &str, search_prefix: &str) -> String {
    let query = query.trim();
    if query.starts_with("http://")
        || query.starts_with("https://")
        || query.starts_with(search_prefix)
    {
        query.to_string()
    } else {
        format!("{search_prefix}{query}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub title: String,
    pub body: String,
    pub tone: Tone,
}

impl Reply {
    fn new(tone: Tone, title: &str, body: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            body: body.into(),
            tone,
        }
    }

    fn error(body: impl Into<String>) -> Self {
        Self::new(Tone::Error, "Error", body)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.tone {
            Tone::Success => "+",
            Tone::Info => "i",
            Tone::Warning => "!",
            Tone::Error => "x",
        };
        write!(f, "[{marker}] {}\n{}", self.title, self.body)
    }
}

pub struct CommandHandler {
    service: Arc<MusicService>,
    prefix: String,
    search_prefix: String,
    page_size: usize,
}

impl CommandHandler {
    pub fn new(service: Arc<MusicService>, settings: &Settings) -> Self {
        Self {
            service,
            prefix: settings.command_prefix.clone(),
            search_prefix: settings.search_prefix.clone(),
            page_size: settings.queue_page_size,
        }
    }

    /// Handle one chat message from `guild`. `voice` is the channel the
    /// author is sitting in, if any. Returns `None` for messages that are
    /// not commands.
    pub async fn handle(
        &self,
        guild: GuildId,
        voice: Option<ChannelRef>,
        message: &str,
    ) -> Option<Reply> {
        let command = match Command::parse(message, &self.prefix) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(JukeboxError::Command(text)) => return Some(Reply::error(text)),
            Err(err) => return Some(Reply::error(err.to_string())),
        };
        debug!(guild = %guild, ?command, "handling command");
        Some(self.execute(guild, voice, command).await)
    }

    pub async fn execute(
        &self,
        guild: GuildId,
        voice: Option<ChannelRef>,
        command: Command,
    ) -> Reply {
        match command {
            Command::Play(query) => self.play(guild, voice, &query).await,
            Command::Stop => {
                self.service.stop(guild);
                Reply::new(Tone::Error, "Stopped", "Playback stopped")
            }
            Command::Skip => match self.service.skip(guild) {
                Some(next) => Reply::new(
                    Tone::Warning,
                    "Skipped",
                    format!("Next up: **{}**", next.title()),
                ),
                None => Reply::new(Tone::Warning, "Skipped", "The queue is empty"),
            },
            Command::Pause => {
                if self.service.pause(guild) {
                    Reply::new(Tone::Warning, "Paused", "Playback paused")
                } else {
                    Reply::error("Nothing to pause")
                }
            }
            Command::Resume => {
                if self.service.resume(guild) {
                    Reply::new(Tone::Success, "Resumed", "Playback resumed")
                } else {
                    Reply::error("Nothing to resume")
                }
            }
            Command::Queue => self.queue_listing(guild),
            Command::NowPlaying => match self.service.current_track(guild) {
                Some(track) => Reply::new(
                    Tone::Info,
                    "Now playing",
                    format!(
                        "**{}**\n{}\n{}",
                        track.title(),
                        track.author(),
                        track.formatted_duration()
                    ),
                ),
                None => Reply::error(format!("Nothing is playing. Use `{}play`", self.prefix)),
            },
            Command::Volume(None) => Reply::new(
                Tone::Info,
                "Volume",
                format!("Current volume: **{}%**", self.service.volume(guild)),
            ),
            Command::Volume(Some(volume)) => {
                let applied = self.service.set_volume(guild, i64::from(volume));
                Reply::new(Tone::Success, "Volume", format!("Set to **{applied}%**"))
            }
            Command::Shuffle => {
                self.service.shuffle(guild);
                Reply::new(Tone::Success, "Shuffled", "The queue was shuffled")
            }
            Command::Clear => {
                self.service.clear_queue(guild);
                Reply::new(Tone::Warning, "Cleared", "The queue was cleared")
            }
            Command::Repeat => {
                if self.service.toggle_repeat(guild) {
                    Reply::new(Tone::Success, "Repeat", "Repeat is on")
                } else {
                    Reply::new(Tone::Info, "Repeat", "Repeat is off")
                }
            }
            Command::Remove(index) => match self.service.remove_track(guild, index) {
                Some(track) => Reply::new(
                    Tone::Success,
                    "Removed",
                    format!("Removed **{}**", track.title()),
                ),
                None => Reply::error(format!("There is no track at position {}", index + 1)),
            },
            Command::Help => Reply::new(Tone::Info, "Help", self.help_text()),
        }
    }

    async fn play(&self, guild: GuildId, voice: Option<ChannelRef>, query: &str) -> Reply {
        let Some(channel) = voice else {
            return Reply::error("You must be in a voice channel");
        };
        if let Err(err) = self.service.connect_to_channel(guild, &channel) {
            warn!(guild = %guild, error = %err, "could not join voice channel");
            return Reply::error(err.to_string());
        }

        let query = normalize_query(query, &self.search_prefix);
        match self.service.load_and_queue(guild, &query).await {
            TrackLoadResult::Loaded(track) => {
                Reply::new(Tone::Success, "Added", format!("**{}**", track.title()))
            }
            TrackLoadResult::PlaylistLoaded(tracks) => Reply::new(
                Tone::Info,
                "Playlist",
                format!("Added **{}** tracks", tracks.len()),
            ),
            TrackLoadResult::NotFound => Reply::error(format!("No track found for: {query}")),
            TrackLoadResult::Failed(message) => {
                Reply::error(format!("Could not load track: {message}"))
            }
        }
    }

    fn queue_listing(&self, guild: GuildId) -> Reply {
        let current = self.service.current_track(guild);
        let total = self.service.queue_size(guild);
        if current.is_none() && total == 0 {
            return Reply::new(Tone::Warning, "Queue is empty", "Nothing is playing");
        }
        let page = self.service.queue_page(guild, self.page_size);
        let title = if self.service.is_shuffled(guild) {
            "Queue (shuffled)"
        } else {
            "Queue"
        };
        Reply::new(Tone::Info, title, render_queue(current.as_ref(), &page, total))
    }

    fn help_text(&self) -> String {
        let p = &self.prefix;
        [
            format!("`{p}play <url or search>` play a track or playlist"),
            format!("`{p}stop` stop and leave the channel"),
            format!("`{p}skip` skip the current track"),
            format!("`{p}pause` / `{p}resume` pause or resume"),
            format!("`{p}volume [0-100]` show or set the volume"),
            format!("`{p}queue` show the queue"),
            format!("`{p}np` show the current track"),
            format!("`{p}shuffle` shuffle the queue"),
            format!("`{p}clear` clear the queue"),
            format!("`{p}repeat` toggle repeat"),
            format!("`{p}remove <position>` remove a queued track"),
            format!("`{p}help` this help"),
        ]
        .join("\n")
    }
}

fn render_queue(current: Option<&Track>, page: &[Track], total: usize) -> String {
    let mut out = String::new();
    if let Some(track) = current {
        out.push_str(&format!("**Now playing:**\n{}\n", track.title()));
    }
    if !page.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("**Up next:**\n");
        for (position, track) in page.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} ({})\n",
                position + 1,
                track.title(),
                track.formatted_duration()
            ));
        }
        if total > page.len() {
            out.push_str(&format!("... and {} more", total - page.len()));
        }
    }
    out.trim_end().to_string()
}
