/// Media source adapter: asks the player application for the current track.
///
/// `OsaScriptSource` drives `osascript`.  The child is polled with
/// `try_wait` until the deadline and killed if it overruns; stdout and stderr
/// are read on helper threads because artwork hex dumps exceed the pipe
/// buffer.
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use cbnp_proto::config::MediaPlayer;
use tracing::debug;

use crate::error::SourceError;

/// Joins field values in the script output; must not occur in track data.
pub const FIELD_SEPARATOR: &str = "<~cbnp~>";

const POLL_STEP: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackField {
    Name,
    Artist,
    Album,
    Id,
    Artwork,
}

/// Fields the pipeline asks for, in this order.
pub const TRACK_FIELDS: [TrackField; 5] = [
    TrackField::Name,
    TrackField::Artist,
    TrackField::Album,
    TrackField::Id,
    TrackField::Artwork,
];

impl TrackField {
    /// AppleScript expression for this field of `current track`.
    fn script_expr(self, player: MediaPlayer) -> &'static str {
        match (self, player) {
            (TrackField::Name, _) => "name of current track",
            (TrackField::Artist, _) => "artist of current track",
            (TrackField::Album, _) => "album of current track",
            (TrackField::Id, MediaPlayer::Music) => "persistent ID of current track",
            (TrackField::Id, MediaPlayer::Spotify) => "id of current track",
            (TrackField::Artwork, MediaPlayer::Music) => "raw data of artwork 1 of current track",
            (TrackField::Artwork, MediaPlayer::Spotify) => "artwork url of current track",
        }
    }
}

pub trait MediaSource {
    /// Values for `fields`, in the same order.
    fn fetch(
        &self,
        fields: &[TrackField],
        player: MediaPlayer,
        timeout: Duration,
    ) -> Result<Vec<String>, SourceError>;
}

// ── osascript ─────────────────────────────────────────────────────────────────

pub struct OsaScriptSource {
    binary: String,
}

impl OsaScriptSource {
    pub fn new() -> Self {
        Self {
            binary: "osascript".to_string(),
        }
    }
}

impl Default for OsaScriptSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for OsaScriptSource {
    fn fetch(
        &self,
        fields: &[TrackField],
        player: MediaPlayer,
        timeout: Duration,
    ) -> Result<Vec<String>, SourceError> {
        let script = build_script(fields, player);
        let output = run_bounded(&self.binary, &["-e", &script], timeout)?;
        parse_output(&output, fields.len())
    }
}

/// Script returning a list whose items are the field values, each but the
/// last suffixed with `FIELD_SEPARATOR`; osascript prints it as
/// `A<sep>, X<sep>, …, «data tdta…»`.  Nothing is printed when the player is
/// not running.  Each field is read inside `try` so a track without artwork
/// still reports its other fields.  Artwork is left uncoerced so raw data
/// keeps its `«data …»` rendering; it must be the last field.
pub fn build_script(fields: &[TrackField], player: MediaPlayer) -> String {
    let mut body = String::new();
    for (i, field) in fields.iter().enumerate() {
        let read = match field {
            TrackField::Artwork => format!("({})", field.script_expr(player)),
            _ => format!("({}) as text", field.script_expr(player)),
        };
        body.push_str(&format!(
            "\t\tset v{i} to \"\"\n\
             \t\ttry\n\
             \t\t\tset v{i} to {read}\n\
             \t\tend try\n",
            i = i,
            read = read,
        ));
    }
    let last = fields.len().saturating_sub(1);
    let items = (0..fields.len())
        .map(|i| {
            if i == last {
                format!("v{}", i)
            } else {
                format!("v{} & \"{}\"", i, FIELD_SEPARATOR)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "if application \"{app}\" is running then\n\
         \ttell application \"{app}\"\n\
         {body}\
         \t\treturn {{{items}}}\n\
         \tend tell\n\
         end if",
        app = player.app_name(),
        body = body,
        items = items,
    )
}

pub fn parse_output(output: &str, expected: usize) -> Result<Vec<String>, SourceError> {
    let trimmed = output.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return Err(SourceError::NoTrack);
    }
    let delimiter = format!("{}, ", FIELD_SEPARATOR);
    let values: Vec<String> = trimmed
        .split(delimiter.as_str())
        .map(|v| v.to_string())
        .collect();
    if values.len() != expected {
        return Err(SourceError::Parse {
            expected,
            got: values.len(),
        });
    }
    // player running but stopped: every field read failed
    if values.iter().all(|v| v.trim().is_empty()) {
        return Err(SourceError::NoTrack);
    }
    Ok(values)
}

fn run_bounded(binary: &str, args: &[&str], timeout: Duration) -> Result<String, SourceError> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SourceError::Failed(format!("failed to spawn {}: {}", binary, e)))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceError::Timeout(timeout));
            }
            Ok(None) => thread::sleep(POLL_STEP),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SourceError::Failed(e.to_string()));
            }
        }
    };

    let stdout = stdout
        .join()
        .map_err(|_| SourceError::Failed("stdout reader panicked".to_string()))?;
    let stderr = stderr.join().unwrap_or_default();

    if !status.success() {
        debug!("media: {} exited with {}: {}", binary, status, stderr.trim());
        return Err(SourceError::Failed(format!(
            "{} exited with {}: {}",
            binary,
            status,
            stderr.trim()
        )));
    }

    Ok(stdout)
}

/// Read a child pipe to the end on a helper thread so the child never blocks
/// on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut out);
        }
        out
    })
}
