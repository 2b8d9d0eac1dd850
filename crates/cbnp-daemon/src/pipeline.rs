/// Update pipeline: the control-thread side of the relay.
///
/// Timer callbacks land here.  A poll tick reads the media source, keeps the
/// previous track when nothing changed, normalizes artwork only for a new
/// track, and hands the update to the worker.  Any failed handoff, including
/// one that merely timed out, is treated as a lost connection: poll and
/// heartbeat stop and the reconnect timer takes over.
///
/// ```text
///   Reconnect tick ─▶ Connect ─ok─▶ start Poll + Heartbeat, stop Reconnect
///   Poll tick      ─▶ source ─▶ dedup ─▶ normalize ─▶ Publish(update)
///   Heartbeat tick ─▶ Publish(heartbeat)
///   any Err        ─▶ post Close, stop Poll + Heartbeat, start Reconnect
/// ```
use std::sync::Arc;
use std::time::Instant;

use cbnp_proto::artwork::{ArtworkNormalizer, RawArtwork};
use cbnp_proto::config::Config;
use cbnp_proto::protocol::OutboundMessage;
use cbnp_proto::track::{should_emit, Snapshot, Track};
use tracing::{debug, info, warn};

use crate::connection::ConnectionState;
use crate::error::{ConnectionError, HandoffError, RelayError, SourceError};
use crate::media::{MediaSource, TRACK_FIELDS};
use crate::status::{StatusLine, NO_TRACK};
use crate::timers::{TimerControl, TimerId};
use crate::worker::{ConnectionPort, Operation};

pub struct UpdatePipeline<P: ConnectionPort> {
    config: Config,
    source: Box<dyn MediaSource>,
    normalizer: ArtworkNormalizer,
    port: P,
    /// Last track handed to the worker.
    current: Option<Track>,
    /// Control-thread view of the connection; only flipped by replies.
    connected: bool,
    status: StatusLine,
}

impl<P: ConnectionPort> UpdatePipeline<P> {
    pub fn new(
        config: Config,
        source: Box<dyn MediaSource>,
        normalizer: ArtworkNormalizer,
        port: P,
    ) -> Self {
        Self {
            config,
            source,
            normalizer,
            port,
            current: None,
            connected: false,
            status: StatusLine::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── timer callbacks ───────────────────────────────────────────────────────

    pub fn on_poll_tick(&mut self, timers: &mut dyn TimerControl) {
        if !self.connected {
            debug!("pipeline: poll while disconnected, skipping");
            return;
        }

        let values = match self.source.fetch(
            &TRACK_FIELDS,
            self.config.polling.media_player,
            self.config.request_timeout(),
        ) {
            Ok(values) => values,
            Err(SourceError::NoTrack) => {
                self.status.set(NO_TRACK);
                return;
            }
            Err(e) => {
                warn!("pipeline: media source: {}", e);
                self.status.set(NO_TRACK);
                self.status.flash_error(e.to_string(), Instant::now());
                return;
            }
        };

        let track = self.select_track(snapshot_from(values));
        let message = OutboundMessage::update(&track, &self.config.publisher.token);
        match self
            .port
            .request(Operation::Publish(message), self.config.request_timeout())
        {
            Ok(_) => {
                debug!("pipeline: published {}", track);
                self.status.set(track.status_line());
            }
            Err(e) => self.connection_lost(timers, &e),
        }
    }

    pub fn on_heartbeat_tick(&mut self, timers: &mut dyn TimerControl) {
        if !self.connected {
            return;
        }
        if let Err(e) = self.port.request(
            Operation::Publish(OutboundMessage::heartbeat()),
            self.config.request_timeout(),
        ) {
            self.connection_lost(timers, &e);
        }
    }

    pub fn on_reconnect_tick(&mut self, timers: &mut dyn TimerControl) {
        if self.connected {
            timers.stop(TimerId::Reconnect);
            return;
        }

        let endpoint = self.config.publisher.endpoint.clone();
        debug!("pipeline: connecting to {}", endpoint);
        match self.port.request(
            Operation::Connect {
                endpoint: endpoint.clone(),
            },
            self.config.request_timeout(),
        ) {
            Ok(ConnectionState::Connected) => {
                info!("pipeline: connected to {}", endpoint);
                self.connected = true;
                timers.start(TimerId::Poll);
                timers.start(TimerId::Heartbeat);
                timers.stop(TimerId::Reconnect);
            }
            Ok(state) => {
                warn!("pipeline: connect left the socket {:?}", state);
                self.port.post(Operation::Close);
            }
            Err(e) => {
                debug!("pipeline: connect to {} failed: {}", endpoint, e);
                // a connect that outlived its caller may still succeed later,
                // and a worker that is still connected missed an earlier close
                if matches!(
                    e,
                    RelayError::Handoff(HandoffError::Timeout(_))
                        | RelayError::Connection(ConnectionError::AlreadyConnected)
                ) {
                    self.port.post(Operation::Close);
                }
                self.status
                    .flash_error(format!("Cannot connect: {}", e), Instant::now());
            }
        }
    }

    // ── configuration ─────────────────────────────────────────────────────────

    /// Take a reloaded configuration.  A new poll interval reschedules the
    /// poll timer; a new request timeout also bounds the worker's writes; a
    /// new endpoint drops the current connection so the next reconnect tick
    /// dials it.  Artwork settings and the connect timeout apply at the next
    /// start.
    pub fn apply_config(&mut self, config: Config, timers: &mut dyn TimerControl) {
        if config == self.config {
            return;
        }
        let interval_changed = config.polling.interval_secs != self.config.polling.interval_secs;
        let endpoint_changed = config.publisher.endpoint != self.config.publisher.endpoint;
        let timeout_changed =
            config.polling.request_timeout_secs != self.config.polling.request_timeout_secs;
        self.config = config;

        if timeout_changed {
            info!(
                "pipeline: request timeout now {}s",
                self.config.polling.request_timeout_secs
            );
            self.port
                .post(Operation::SetSendTimeout(self.config.request_timeout()));
        }

        if interval_changed {
            info!(
                "pipeline: poll interval now {}s",
                self.config.polling.interval_secs
            );
            timers.set_period(TimerId::Poll, self.config.poll_interval());
        }
        if endpoint_changed {
            info!("pipeline: endpoint now {}", self.config.publisher.endpoint);
            if self.connected {
                self.disconnect(timers);
            }
        }
    }

    // ── internals ─────────────────────────────────────────────────────────────

    /// The track to publish for `snapshot`.  Metadata always comes from the
    /// snapshot; artwork is normalized only when the dedup key changed and
    /// is otherwise carried over from the current track.
    fn select_track(&mut self, snapshot: Snapshot) -> Track {
        let reused = self
            .current
            .as_ref()
            .filter(|t| !should_emit(Some(*t), &snapshot))
            .map(|t| Arc::clone(t.artwork()));

        let track = match reused {
            Some(artwork) => snapshot.into_track(artwork),
            None => {
                let artwork = self.normalizer.normalize(&snapshot.artwork);
                let track = snapshot.into_track(artwork);
                info!("pipeline: now playing {}", track);
                track
            }
        };
        self.current = Some(track.clone());
        track
    }

    fn connection_lost(&mut self, timers: &mut dyn TimerControl, error: &RelayError) {
        warn!("pipeline: connection lost: {}", error);
        self.disconnect(timers);
        self.status
            .flash_error(format!("Connection lost: {}", error), Instant::now());
    }

    fn disconnect(&mut self, timers: &mut dyn TimerControl) {
        self.connected = false;
        self.port.post(Operation::Close);
        timers.stop(TimerId::Poll);
        timers.stop(TimerId::Heartbeat);
        timers.start(TimerId::Reconnect);
    }
}

/// Map source values, ordered as `TRACK_FIELDS`, onto a snapshot.
fn snapshot_from(values: Vec<String>) -> Snapshot {
    let mut values = values.into_iter();
    let mut next = || values.next().unwrap_or_default();
    let name = next();
    let artist = next();
    let album = next();
    let id = next();
    let artwork = RawArtwork::from_field(&next());
    Snapshot::new(name, artist, album, Some(id), artwork)
}
