//! Candidate racing
//!
//! Dials the ranked candidate list with bounded concurrency and staggered
//! starts: the first candidate gets a head start, later ones join every
//! stagger interval as long as a concurrency slot is free. The first
//! successful connect wins and all other attempts are cancelled.

use std::time::Duration;

use relink_core::config::ConnectConfig;
use relink_core::endpoint::Endpoint;
use relink_core::errors::NetError;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

/// Result of a race: the winning stream or the indices of every candidate
/// that failed (for endpoint scoring).
pub struct RaceOutcome {
    pub stream: TcpStream,
    /// Index of the winner within the candidate list
    pub index: usize,
    pub rtt: Duration,
    /// Candidates that conclusively failed before the winner connected
    pub failed: Vec<usize>,
}

pub async fn race(
    candidates: &[Endpoint],
    config: &ConnectConfig,
) -> Result<RaceOutcome, (NetError, Vec<usize>)> {
    if candidates.is_empty() {
        return Err((NetError::ConnectExhausted, Vec::new()));
    }

    let mut attempts: JoinSet<(usize, Duration, std::io::Result<TcpStream>)> = JoinSet::new();
    let mut failed = Vec::new();
    let mut next = 0usize;
    let start = Instant::now();

    loop {
        // launch every candidate whose stagger slot has come up, concurrency
        // permitting
        while next < candidates.len()
            && attempts.len() < config.max_concurrent
            && Instant::now() >= start + config.stagger_interval * next as u32
        {
            let addr = candidates[next].addr();
            let timeout = config.connect_timeout;
            let index = next;
            debug!(%addr, index, "connect attempt started");
            attempts.spawn(async move {
                let begin = Instant::now();
                let result = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                    Ok(result) => result,
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    )),
                };
                (index, begin.elapsed(), result)
            });
            next += 1;
        }

        let next_launch = (next < candidates.len() && attempts.len() < config.max_concurrent)
            .then(|| start + config.stagger_interval * next as u32);

        if attempts.is_empty() && next_launch.is_none() {
            return Err((NetError::ConnectExhausted, failed));
        }

        tokio::select! {
            Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                let Ok((index, rtt, result)) = joined else {
                    continue; // attempt task cancelled
                };
                match result {
                    Ok(stream) => {
                        info!(endpoint = %candidates[index], ?rtt, "connect race won");
                        attempts.abort_all();
                        return Ok(RaceOutcome { stream, index, rtt, failed });
                    }
                    Err(err) => {
                        debug!(endpoint = %candidates[index], %err, "connect attempt failed");
                        failed.push(index);
                    }
                }
            }
            _ = sleep_until_opt(next_launch), if next_launch.is_some() => {}
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
