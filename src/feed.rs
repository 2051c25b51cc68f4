//! Arrival feeds for the online regime.
//!
//! A feed hands the scheduler loop newly described jobs, one command per
//! line, without ever blocking it. Blank lines are skipped; end of stream
//! closes the feed for good.

use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::{self, error::TryRecvError};

const LINE_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A new job's command text
    Job(String),
    /// Nothing new right now
    Idle,
    /// No more arrivals, ever
    Closed,
}

pub trait ArrivalFeed {
    /// Non-blocking. `now` is the engine clock offset.
    fn next_arrival(&mut self, now: Duration) -> FeedEvent;
}

/// Line-oriented feed over any async reader, typically stdin.
///
/// Lines are read on a background task and buffered in a channel so that
/// polling the feed is a plain `try_recv`.
#[derive(Debug)]
pub struct LineFeed {
    rx: mpsc::Receiver<String>,
}

impl LineFeed {
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            // Receiver dropped, stop reading
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("Arrival feed reached end of stream");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Arrival feed read failed, closing");
                        break;
                    }
                }
            }
        });

        Self { rx }
    }

    /// Feed over a blocking reader, read on a dedicated OS thread.
    ///
    /// The thread is detached: a read that never returns does not hold up
    /// runtime shutdown, unlike a read parked on tokio's blocking pool.
    pub fn blocking<R>(reader: R) -> io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);

        std::thread::Builder::new()
            .name("arrival-feed".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    match line {
                        Ok(line) => {
                            if tx.blocking_send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Arrival feed read failed, closing");
                            return;
                        }
                    }
                }
                tracing::debug!("Arrival feed reached end of stream");
            })?;

        Ok(Self { rx })
    }

    /// Feed over the process's standard input.
    pub fn stdin() -> io::Result<Self> {
        Self::blocking(io::BufReader::new(io::stdin()))
    }
}

impl ArrivalFeed for LineFeed {
    fn next_arrival(&mut self, _now: Duration) -> FeedEvent {
        loop {
            match self.rx.try_recv() {
                Ok(line) => {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    return FeedEvent::Job(command.to_string());
                }
                Err(TryRecvError::Empty) => return FeedEvent::Idle,
                Err(TryRecvError::Disconnected) => return FeedEvent::Closed,
            }
        }
    }
}

/// Feed that releases each command once the engine clock reaches its
/// arrival offset. Closes after the last one.
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    arrivals: VecDeque<(Duration, String)>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, offset: Duration, command: impl Into<String>) -> Self {
        let command = command.into();
        let pos = self
            .arrivals
            .iter()
            .position(|(t, _)| *t > offset)
            .unwrap_or(self.arrivals.len());
        self.arrivals.insert(pos, (offset, command));
        self
    }

    pub fn remaining(&self) -> usize {
        self.arrivals.len()
    }
}

impl ArrivalFeed for ScriptedFeed {
    fn next_arrival(&mut self, now: Duration) -> FeedEvent {
        match self.arrivals.front() {
            None => FeedEvent::Closed,
            Some((at, _)) if *at > now => FeedEvent::Idle,
            Some(_) => match self.arrivals.pop_front() {
                Some((_, command)) => FeedEvent::Job(command),
                None => FeedEvent::Closed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test]
    async fn line_feed_skips_blank_lines_and_closes() {
        let input = std::io::Cursor::new(b"echo a\n\n   \necho b\n".to_vec());
        let mut feed = LineFeed::spawn(input);

        let mut seen = Vec::new();
        loop {
            match feed.next_arrival(Duration::ZERO) {
                FeedEvent::Job(cmd) => seen.push(cmd),
                FeedEvent::Idle => tokio::task::yield_now().await,
                FeedEvent::Closed => break,
            }
        }
        assert_eq!(seen, vec!["echo a".to_string(), "echo b".to_string()]);
    }

    #[tokio::test]
    async fn blocking_feed_reads_lines() {
        let input = std::io::Cursor::new(b"make\n\nmake test\n".to_vec());
        let mut feed = LineFeed::blocking(input).unwrap();

        let mut seen = Vec::new();
        loop {
            match feed.next_arrival(Duration::ZERO) {
                FeedEvent::Job(cmd) => seen.push(cmd),
                FeedEvent::Idle => tokio::time::sleep(ms(1)).await,
                FeedEvent::Closed => break,
            }
        }
        assert_eq!(seen, vec!["make".to_string(), "make test".to_string()]);
    }

    #[test]
    fn stalled_reader_does_not_block_runtime_shutdown() {
        // The writer stays open, so the reader never sees a line or EOF
        let (reader, _writer) = std::os::unix::net::UnixStream::pair().unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut feed = runtime
            .block_on(async move { LineFeed::blocking(std::io::BufReader::new(reader)) })
            .unwrap();
        assert_eq!(feed.next_arrival(Duration::ZERO), FeedEvent::Idle);

        let started = std::time::Instant::now();
        drop(feed);
        drop(runtime);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn scripted_feed_releases_by_time() {
        let mut feed = ScriptedFeed::new()
            .at(ms(100), "late")
            .at(ms(0), "first")
            .at(ms(0), "second");

        assert_eq!(feed.next_arrival(ms(0)), FeedEvent::Job("first".to_string()));
        assert_eq!(feed.next_arrival(ms(0)), FeedEvent::Job("second".to_string()));
        assert_eq!(feed.next_arrival(ms(50)), FeedEvent::Idle);
        assert_eq!(feed.next_arrival(ms(100)), FeedEvent::Job("late".to_string()));
        assert_eq!(feed.next_arrival(ms(100)), FeedEvent::Closed);
        assert_eq!(feed.remaining(), 0);
    }
}
