// src/config/validate.rs

use std::time::Duration;

use globset::Glob;

use crate::config::duration::parse_duration;
use crate::config::model::{
    AdapterSettings, BaselineSettings, ConfigFile, DispatchSettings, HandlerSettings,
    RawAdapterSection, RawConfigFile, RawDispatchSection, RawHandlerSection,
    RawShutdownSection, RawWatchSection, ShutdownSettings, WatchSettings,
    DEFAULT_ABSENCE_CONFIRM_COUNT, DEFAULT_BASELINE_PATH, DEFAULT_CONCURRENCY,
    DEFAULT_DRAIN_GRACE_TIMEOUT, DEFAULT_HANDLER_TIMEOUT, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_OBSERVE_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_QUIET_WINDOW,
    DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_RECONNECT_MAX_DELAY,
    DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY,
};
use crate::errors::{ChangewatchError, Result};
use crate::types::HandlerKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ChangewatchError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        Ok(ConfigFile {
            watch: validate_watch(&raw.watch)?,
            dispatch: validate_dispatch(&raw.dispatch)?,
            shutdown: validate_shutdown(&raw.shutdown)?,
            adapter: validate_adapter(&raw.adapter)?,
            handler: validate_handler(&raw.handler)?,
            baseline: BaselineSettings {
                storage: raw.baseline.storage,
                path: raw
                    .baseline
                    .path
                    .unwrap_or_else(|| DEFAULT_BASELINE_PATH.into()),
            },
            failure_log: raw.failures.path,
        })
    }
}

fn config_err(msg: impl Into<String>) -> ChangewatchError {
    ChangewatchError::ConfigError(msg.into())
}

/// Parse an optional duration key, falling back to `default`.
fn duration_or(key: &str, value: Option<&String>, default: Duration) -> Result<Duration> {
    match value {
        Some(s) => parse_duration(s).map_err(|e| config_err(format!("{key}: {e}"))),
        None => Ok(default),
    }
}

fn validate_watch(raw: &RawWatchSection) -> Result<WatchSettings> {
    let poll_interval = duration_or(
        "[watch].poll_interval",
        raw.poll_interval.as_ref(),
        DEFAULT_POLL_INTERVAL,
    )?;
    if poll_interval.is_zero() {
        return Err(config_err("[watch].poll_interval must be > 0"));
    }

    let quiet_window = duration_or(
        "[watch].quiet_window",
        raw.quiet_window.as_ref(),
        DEFAULT_QUIET_WINDOW,
    )?;

    let max_wait = match raw.max_wait.as_ref() {
        Some(s) => Some(
            parse_duration(s).map_err(|e| config_err(format!("[watch].max_wait: {e}")))?,
        ),
        None => None,
    };
    if let Some(max_wait) = max_wait {
        if max_wait < quiet_window {
            return Err(config_err(format!(
                "[watch].max_wait ({max_wait:?}) must be >= quiet_window ({quiet_window:?})"
            )));
        }
    }

    let absence_confirm_count = raw
        .absence_confirm_count
        .unwrap_or(DEFAULT_ABSENCE_CONFIRM_COUNT);
    if absence_confirm_count == 0 {
        return Err(config_err("[watch].absence_confirm_count must be >= 1 (got 0)"));
    }

    Ok(WatchSettings {
        poll_interval,
        quiet_window,
        max_wait,
        absence_confirm_count,
    })
}

fn validate_dispatch(raw: &RawDispatchSection) -> Result<DispatchSettings> {
    let retry_base_delay = duration_or(
        "[dispatch].retry_base_delay",
        raw.retry_base_delay.as_ref(),
        DEFAULT_RETRY_BASE_DELAY,
    )?;
    if retry_base_delay.is_zero() {
        return Err(config_err("[dispatch].retry_base_delay must be > 0"));
    }

    let retry_max_delay = duration_or(
        "[dispatch].retry_max_delay",
        raw.retry_max_delay.as_ref(),
        DEFAULT_RETRY_MAX_DELAY,
    )?;
    if retry_max_delay < retry_base_delay {
        return Err(config_err(format!(
            "[dispatch].retry_max_delay ({retry_max_delay:?}) must be >= retry_base_delay ({retry_base_delay:?})"
        )));
    }

    let max_attempts = raw.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
    if max_attempts == 0 {
        return Err(config_err("[dispatch].max_attempts must be >= 1 (got 0)"));
    }

    let handler_timeout = duration_or(
        "[dispatch].handler_timeout",
        raw.handler_timeout.as_ref(),
        DEFAULT_HANDLER_TIMEOUT,
    )?;
    if handler_timeout.is_zero() {
        return Err(config_err("[dispatch].handler_timeout must be > 0"));
    }

    let concurrency = raw.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
    if concurrency == 0 {
        return Err(config_err("[dispatch].concurrency must be >= 1 (got 0)"));
    }

    Ok(DispatchSettings {
        retry_base_delay,
        retry_max_delay,
        max_attempts,
        handler_timeout,
        concurrency,
    })
}

fn validate_shutdown(raw: &RawShutdownSection) -> Result<ShutdownSettings> {
    Ok(ShutdownSettings {
        drain_mode: raw.drain_mode,
        drain_grace_timeout: duration_or(
            "[shutdown].drain_grace_timeout",
            raw.drain_grace_timeout.as_ref(),
            DEFAULT_DRAIN_GRACE_TIMEOUT,
        )?,
    })
}

fn validate_adapter(raw: &RawAdapterSection) -> Result<AdapterSettings> {
    let include = raw
        .include
        .clone()
        .unwrap_or_else(|| vec!["**".to_string()]);
    if include.is_empty() {
        return Err(config_err("[adapter].include must not be empty"));
    }
    for pat in include.iter().chain(raw.exclude.iter()) {
        Glob::new(pat).map_err(|e| config_err(format!("[adapter] invalid glob '{pat}': {e}")))?;
    }

    let observe_timeout = duration_or(
        "[adapter].observe_timeout",
        raw.observe_timeout.as_ref(),
        DEFAULT_OBSERVE_TIMEOUT,
    )?;
    if observe_timeout.is_zero() {
        return Err(config_err("[adapter].observe_timeout must be > 0"));
    }

    let reconnect_attempts = raw.reconnect_attempts.unwrap_or(DEFAULT_RECONNECT_ATTEMPTS);
    if reconnect_attempts == 0 {
        return Err(config_err("[adapter].reconnect_attempts must be >= 1 (got 0)"));
    }

    let reconnect_base_delay = duration_or(
        "[adapter].reconnect_base_delay",
        raw.reconnect_base_delay.as_ref(),
        DEFAULT_RECONNECT_BASE_DELAY,
    )?;
    let reconnect_max_delay = duration_or(
        "[adapter].reconnect_max_delay",
        raw.reconnect_max_delay.as_ref(),
        DEFAULT_RECONNECT_MAX_DELAY,
    )?;
    if reconnect_max_delay < reconnect_base_delay {
        return Err(config_err(
            "[adapter].reconnect_max_delay must be >= reconnect_base_delay",
        ));
    }

    Ok(AdapterSettings {
        kind: raw.kind,
        root: raw.root.clone(),
        include,
        exclude: raw.exclude.clone(),
        observe_timeout,
        reconnect_attempts,
        reconnect_base_delay,
        reconnect_max_delay,
    })
}

fn validate_handler(raw: &RawHandlerSection) -> Result<HandlerSettings> {
    let cmd = raw
        .cmd
        .as_ref()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let kind = match raw.kind {
        Some(kind) => kind,
        None if cmd.is_some() => HandlerKind::Command,
        None => HandlerKind::Log,
    };

    if kind == HandlerKind::Command && cmd.is_none() {
        return Err(config_err(
            "[handler].cmd is required when [handler].kind = \"command\"",
        ));
    }

    Ok(HandlerSettings { kind, cmd })
}
