//! Telemetry - log targets and the periodic sampler.
//!
//! The host configures a list of memory locations ([`LogTarget`]s), possibly
//! across several frames.  Targets accumulate in a staged list and only
//! replace the live (committed) list when the configuration is ended, so a
//! half-finished reconfiguration never affects sampling.
//!
//! While logging is enabled, every elapsed interval the committed targets
//! are read and packed, little-endian and in order, into one telemetry
//! frame.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::config::{Config, LOG_TARGETS_MAX};
use crate::memory::{DataWidth, MemoryAccessor};
use crate::session::Session;
use crate::{Error, Result};

/// A single memory location to sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogTarget {
    pub width: DataWidth,
    pub address: u32,
}

impl LogTarget {
    pub const fn new(width: DataWidth, address: u32) -> Self {
        Self { width, address }
    }
}

const EMPTY_TARGET: LogTarget = LogTarget::new(DataWidth::U8, 0);

/// Staged and committed log target lists
#[derive(Debug, Clone)]
pub struct LogTargets {
    staged: [LogTarget; LOG_TARGETS_MAX],
    staged_count: usize,
    committed: [LogTarget; LOG_TARGETS_MAX],
    committed_count: usize,
}

impl Default for LogTargets {
    fn default() -> Self {
        Self::new()
    }
}

impl LogTargets {
    pub const fn new() -> Self {
        Self {
            staged: [EMPTY_TARGET; LOG_TARGETS_MAX],
            staged_count: 0,
            committed: [EMPTY_TARGET; LOG_TARGETS_MAX],
            committed_count: 0,
        }
    }

    /// Targets actually sampled
    pub fn committed(&self) -> &[LogTarget] {
        &self.committed[..self.committed_count]
    }

    pub fn committed_count(&self) -> usize {
        self.committed_count
    }

    /// Targets accumulated by the configuration in progress
    pub fn staged(&self) -> &[LogTarget] {
        &self.staged[..self.staged_count]
    }

    pub fn staged_count(&self) -> usize {
        self.staged_count
    }

    /// Begin a fresh configuration
    pub fn start(&mut self) {
        self.staged_count = 0;
    }

    /// Append a target to the configuration in progress
    pub fn stage(&mut self, target: LogTarget) -> Result<()> {
        if self.staged_count >= LOG_TARGETS_MAX {
            return Err(Error::TooManyTargets);
        }
        self.staged[self.staged_count] = target;
        self.staged_count += 1;
        Ok(())
    }

    /// Make the staged targets live
    pub fn commit(&mut self) {
        self.committed[..self.staged_count].copy_from_slice(&self.staged[..self.staged_count]);
        self.committed_count = self.staged_count;
    }

    /// Abandon all configuration, staged and committed
    pub fn discard(&mut self) {
        self.staged_count = 0;
        self.committed_count = 0;
    }

    /// Total payload bytes the staged targets would produce
    pub fn staged_payload_size(&self) -> usize {
        self.staged().iter().map(|t| t.width.bytes()).sum()
    }

    /// Read every committed target into `buf`, returning the number of
    /// bytes written.
    pub fn sample<M: MemoryAccessor>(&self, memory: &mut M, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        for target in self.committed() {
            let end = offset + target.width.bytes();
            if end > buf.len() {
                return Err(Error::PayloadTooLarge);
            }
            memory.read(target.address, &mut buf[offset..end])?;
            offset = end;
        }
        Ok(offset)
    }
}

/// Advance the log watchdog and interval timers by `elapsed_ms`.
///
/// The watchdog disables logging if no request has been accepted within
/// [`Config::log_watchdog_ms`].  Returns `true` if a telemetry sample is
/// due this tick.  Does nothing unless logging is enabled.
pub fn advance(session: &mut Session, config: &Config, elapsed_ms: u32) -> bool {
    if !session.is_logging_enabled {
        return false;
    }

    session.log_timeout_ms = session.log_timeout_ms.saturating_add(elapsed_ms);
    if session.log_timeout_ms >= config.log_watchdog_ms {
        info!(
            "No request for {} ms, logging disabled",
            session.log_timeout_ms
        );
        session.log_timeout_ms = 0;
        session.is_logging_enabled = false;
        return false;
    }

    session.log_interval_ms = session.log_interval_ms.saturating_add(elapsed_ms);
    if session.log_interval_ms >= session.log_interval_period as u32 {
        session.log_interval_ms = 0;
        true
    } else {
        false
    }
}
