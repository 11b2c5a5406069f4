//! Process-wide console channels.
//!
//! Application code writes through [`console_info!`](crate::console_info),
//! [`console_warn!`](crate::console_warn) and
//! [`console_error!`](crate::console_error) (or the [`info`], [`warn`] and
//! [`error`] functions). Each channel is bound to a [`ConsoleSink`]; the
//! default sink prints the arguments joined by single spaces to stdout
//! (info) or stderr (warn, error).
//!
//! The bindings live in one process-wide registry. Reads are lock-free via
//! `arc-swap`; replacing a binding (the log bridge, tests) takes a mutex.
//!
//! # Example
//!
//! ```
//! use otel_bootstrap::console_info;
//!
//! console_info!("listening on port", 8080);
//! ```

pub mod bridge;

use std::fmt::{self, Write as _};
use std::io::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use arc_swap::ArcSwap;
use opentelemetry::logs::Severity;
use thiserror::Error;

pub use bridge::{install, is_installed, uninstall, Installed, LogEmitter, OtelLogEmitter};

/// Severity channel of a console call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Info,
    Warn,
    Error,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Info, Channel::Warn, Channel::Error];

    /// Structured-log severity number for records emitted from this channel.
    pub fn severity(self) -> Severity {
        match self {
            Channel::Info => Severity::Info,
            Channel::Warn => Severity::Warn,
            Channel::Error => Severity::Error,
        }
    }

    /// Structured-log severity text for records emitted from this channel.
    pub fn severity_text(self) -> &'static str {
        match self {
            Channel::Info => "INFO",
            Channel::Warn => "WARN",
            Channel::Error => "ERROR",
        }
    }
}

/// Destination of console calls for one or more channels.
pub trait ConsoleSink: Send + Sync {
    fn write(&self, channel: Channel, args: &[&dyn fmt::Display]);
}

/// Default sink: stdout for info, stderr for warn and error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

impl ConsoleSink for StdConsole {
    fn write(&self, channel: Channel, args: &[&dyn fmt::Display]) {
        let line = render(args);
        // A closed stdio stream must not take the caller down with it.
        let _ = match channel {
            Channel::Info => writeln!(std::io::stdout().lock(), "{line}"),
            Channel::Warn | Channel::Error => writeln!(std::io::stderr().lock(), "{line}"),
        };
    }
}

/// Join the `Display` rendering of every argument with a single space.
pub fn render(args: &[&dyn fmt::Display]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{arg}");
    }
    out
}

/// The sink bound to each channel.
#[derive(Clone)]
pub struct ChannelBindings {
    info: Arc<dyn ConsoleSink>,
    warn: Arc<dyn ConsoleSink>,
    error: Arc<dyn ConsoleSink>,
}

impl ChannelBindings {
    pub fn new(
        info: Arc<dyn ConsoleSink>,
        warn: Arc<dyn ConsoleSink>,
        error: Arc<dyn ConsoleSink>,
    ) -> Self {
        Self { info, warn, error }
    }

    /// Bind the same sink to all three channels.
    pub fn uniform(sink: Arc<dyn ConsoleSink>) -> Self {
        Self::new(sink.clone(), sink.clone(), sink)
    }

    pub fn get(&self, channel: Channel) -> &Arc<dyn ConsoleSink> {
        match channel {
            Channel::Info => &self.info,
            Channel::Warn => &self.warn,
            Channel::Error => &self.error,
        }
    }

    /// Returns `true` when every channel points at the same sink as `other`.
    pub fn ptr_eq(&self, other: &ChannelBindings) -> bool {
        Channel::ALL
            .iter()
            .all(|&c| Arc::ptr_eq(self.get(c), other.get(c)))
    }

    pub(crate) fn map(
        &self,
        mut f: impl FnMut(Channel, &Arc<dyn ConsoleSink>) -> Arc<dyn ConsoleSink>,
    ) -> Self {
        Self::new(
            f(Channel::Info, &self.info),
            f(Channel::Warn, &self.warn),
            f(Channel::Error, &self.error),
        )
    }
}

impl Default for ChannelBindings {
    fn default() -> Self {
        Self::uniform(Arc::new(StdConsole))
    }
}

impl fmt::Debug for ChannelBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBindings")
            .field("info", &Arc::as_ptr(&self.info))
            .field("warn", &Arc::as_ptr(&self.warn))
            .field("error", &Arc::as_ptr(&self.error))
            .finish()
    }
}

/// Errors from the console registry.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Bindings cannot be swapped underneath an installed log bridge.
    #[error("console bindings cannot be replaced while the log bridge is installed")]
    BridgeInstalled,
}

struct Registry {
    active: ArcSwap<ChannelBindings>,
    /// Pre-bridge bindings; `Some` exactly while the bridge is installed.
    originals: Mutex<Option<Arc<ChannelBindings>>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        active: ArcSwap::from_pointee(ChannelBindings::default()),
        originals: Mutex::new(None),
    })
}

pub(crate) fn lock_originals() -> MutexGuard<'static, Option<Arc<ChannelBindings>>> {
    registry()
        .originals
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn store_active(bindings: Arc<ChannelBindings>) {
    registry().active.store(bindings);
}

/// Snapshot of the bindings currently in effect.
pub fn bindings() -> Arc<ChannelBindings> {
    registry().active.load_full()
}

/// Replace the process-wide bindings, returning the previous ones.
///
/// # Errors
///
/// Returns [`ConsoleError::BridgeInstalled`] while the log bridge is
/// installed; uninstall it first.
pub fn replace(bindings: ChannelBindings) -> Result<Arc<ChannelBindings>, ConsoleError> {
    let originals = lock_originals();
    if originals.is_some() {
        return Err(ConsoleError::BridgeInstalled);
    }
    Ok(registry().active.swap(Arc::new(bindings)))
}

/// Write `args` to `channel` through its current binding.
pub fn write(channel: Channel, args: &[&dyn fmt::Display]) {
    registry().active.load().get(channel).write(channel, args);
}

pub fn info(args: &[&dyn fmt::Display]) {
    write(Channel::Info, args);
}

pub fn warn(args: &[&dyn fmt::Display]) {
    write(Channel::Warn, args);
}

pub fn error(args: &[&dyn fmt::Display]) {
    write(Channel::Error, args);
}

/// Write the arguments to the info console channel.
#[macro_export]
macro_rules! console_info {
    ($($arg:expr),* $(,)?) => {
        $crate::console::info(&[$(&$arg as &dyn ::std::fmt::Display),*])
    };
}

/// Write the arguments to the warn console channel.
#[macro_export]
macro_rules! console_warn {
    ($($arg:expr),* $(,)?) => {
        $crate::console::warn(&[$(&$arg as &dyn ::std::fmt::Display),*])
    };
}

/// Write the arguments to the error console channel.
#[macro_export]
macro_rules! console_error {
    ($($arg:expr),* $(,)?) => {
        $crate::console::error(&[$(&$arg as &dyn ::std::fmt::Display),*])
    };
}
