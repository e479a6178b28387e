//! Event definitions for the UI event loop.
//!
//! This module defines the `Event` enum which encapsulates everything that
//! drives the list view: terminal input, and completions of asynchronous
//! work such as re-indexing. It also owns the thread that turns crossterm
//! input into events, which can be paused while an editor owns the terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::KeyEvent;
use tokio::sync::mpsc;

use crate::collection::Articles;

/// Represents an event in the UI's main event loop.
#[derive(Debug)]
pub enum Event {
    /// A keyboard event received from the user.
    Key(KeyEvent),
    /// The terminal window was resized.
    Resize,
    /// A re-index finished. `seq` identifies the request that produced it.
    ArticlesLoaded {
        seq: u64,
        result: Result<Articles, String>,
    },
    /// SIGTERM (or SIGINT outside raw mode) asked the UI to stop.
    Shutdown,
}

/// Process signals that can end the list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Background thread reading terminal input.
#[derive(Debug, Clone)]
pub struct InputListener {
    paused: Arc<AtomicBool>,
    idle: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl InputListener {
    /// Spawns the reader thread, forwarding key and resize events to `tx`.
    pub fn spawn(tx: mpsc::Sender<Event>) -> Self {
        let listener = Self::new();
        let state = listener.clone();
        std::thread::spawn(move || {
            loop {
                if state.stop.load(Ordering::SeqCst) || tx.is_closed() {
                    break;
                }
                if state.paused.load(Ordering::SeqCst) {
                    state.idle.store(true, Ordering::SeqCst);
                    std::thread::sleep(POLL_INTERVAL / 2);
                    continue;
                }
                state.idle.store(false, Ordering::SeqCst);
                if crossterm::event::poll(POLL_INTERVAL).unwrap_or(false) {
                    match crossterm::event::read() {
                        Ok(crossterm::event::Event::Key(key)) => {
                            let _ = tx.blocking_send(Event::Key(key));
                        }
                        Ok(crossterm::event::Event::Resize(..)) => {
                            let _ = tx.blocking_send(Event::Resize);
                        }
                        _ => {}
                    }
                }
            }
            state.stop.store(true, Ordering::SeqCst);
        });
        listener
    }

    fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            idle: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops reading input and waits until the thread has parked, so a
    /// foreground child process receives every keystroke.
    pub async fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        while !self.idle.load(Ordering::SeqCst) && !self.stop.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn resume(&self) {
        self.idle.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Maps a process signal to an event for the loop.
    ///
    /// While input is paused the editor owns the terminal, and a ^C typed
    /// there reaches this process too. That interrupt is dropped.
    pub fn signal_event(&self, signal: Signal) -> Option<Event> {
        match signal {
            Signal::Interrupt if self.paused.load(Ordering::SeqCst) => None,
            Signal::Interrupt | Signal::Terminate => Some(Event::Shutdown),
        }
    }
}
