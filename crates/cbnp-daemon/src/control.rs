/// Control loop: the single thread that owns the timers and the pipeline.
///
/// Sleeps until the next timer is due or an event arrives, then runs the due
/// callbacks one after another.  A callback can stop a timer that is due in
/// the same round (a failed poll stops heartbeat); such a timer is skipped.
use std::io::BufRead;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::pipeline::UpdatePipeline;
use crate::reload::ConfigWatcher;
use crate::timers::{TimerControl, TimerId, Timers};
use crate::worker::ConnectionPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Poll right away, outside the poll timer.
    PollNow,
    Shutdown,
}

/// Operator command typed on one input line.  An empty line is a manual
/// update.
pub fn parse_command(line: &str) -> Option<ControlEvent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "u" | "update" => Some(ControlEvent::PollNow),
        "q" | "quit" => Some(ControlEvent::Shutdown),
        _ => None,
    }
}

/// Forward commands read from `input` until it ends or the loop is gone.
/// End of input is not a shutdown request.
pub fn spawn_command_reader<R>(input: R, events: Sender<ControlEvent>) -> std::io::Result<()>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("cbnp-commands".to_string())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else {
                    break;
                };
                match parse_command(&line) {
                    Some(event) => {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    None => warn!("control: unknown command {:?} (update, quit)", line.trim()),
                }
            }
            debug!("control: command input closed");
        })?;
    Ok(())
}

pub struct ControlLoop<P: ConnectionPort> {
    timers: Timers,
    pipeline: UpdatePipeline<P>,
    events: Receiver<ControlEvent>,
    watcher: Option<ConfigWatcher>,
}

impl<P: ConnectionPort> ControlLoop<P> {
    pub fn new(pipeline: UpdatePipeline<P>, events: Receiver<ControlEvent>) -> Self {
        Self {
            timers: Timers::new(pipeline.config().poll_interval()),
            pipeline,
            events,
            watcher: None,
        }
    }

    /// Reload the config from `watcher` on poll and reconnect ticks.
    pub fn with_watcher(mut self, watcher: ConfigWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn pipeline(&self) -> &UpdatePipeline<P> {
        &self.pipeline
    }

    /// Run until `ControlEvent::Shutdown` or every sender is gone.  The first
    /// connection attempt is made straight away.  All timers are stopped on
    /// return.
    pub fn run(&mut self) {
        info!(
            "control: starting, polling every {:?}",
            self.timers.period(TimerId::Poll)
        );
        self.timers.start_now(TimerId::Reconnect, Instant::now());

        loop {
            let wait = self.timers.until_next_due(Instant::now());
            match self.events.recv_timeout(wait) {
                Ok(ControlEvent::Shutdown) => {
                    info!("control: shutdown requested");
                    break;
                }
                Ok(ControlEvent::PollNow) => self.poll_now(),
                Err(RecvTimeoutError::Disconnected) => {
                    info!("control: event channel closed");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            self.fire_due(Instant::now());
        }

        self.timers.stop_all();
        info!(
            "control: stopped ({})",
            self.pipeline.status().display(Instant::now())
        );
    }

    /// Manual update.  The poll timer keeps its schedule.
    fn poll_now(&mut self) {
        if !self.pipeline.is_connected() {
            info!("control: manual update ignored while disconnected");
            return;
        }
        info!("control: manual update");
        self.reload_config();
        self.pipeline.on_poll_tick(&mut self.timers);
    }

    fn fire_due(&mut self, now: Instant) {
        for id in self.timers.take_due(now) {
            if self.timers.is_running(id) {
                self.dispatch(id);
            } else {
                debug!("control: {:?} stopped earlier this round", id);
            }
        }
    }

    fn dispatch(&mut self, id: TimerId) {
        match id {
            TimerId::Poll => {
                self.reload_config();
                self.pipeline.on_poll_tick(&mut self.timers);
            }
            TimerId::Heartbeat => self.pipeline.on_heartbeat_tick(&mut self.timers),
            TimerId::Reconnect => {
                self.reload_config();
                self.pipeline.on_reconnect_tick(&mut self.timers);
            }
        }
    }

    fn reload_config(&mut self) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        if let Some(config) = watcher.check() {
            self.pipeline.apply_config(config, &mut self.timers);
        }
    }
}
