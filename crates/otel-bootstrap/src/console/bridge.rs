//! Log bridge: duplicates console calls into structured log records.
//!
//! [`install`] wraps every channel binding so that each call
//! 1. renders its arguments joined by single spaces,
//! 2. emits one log record with the channel's severity and that body,
//! 3. forwards the untouched arguments to the sink captured at install time.
//!
//! The emission side never affects the passthrough: a panicking emitter is
//! contained, and console calls made from inside an emission on the same
//! thread skip emission instead of recursing.

use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use opentelemetry::logs::{AnyValue, LogRecord, Logger};
use tracing::debug;

use super::{lock_originals, render, store_active, Channel, ChannelBindings, ConsoleSink};

/// Receives one structured record per bridged console call.
pub trait LogEmitter: Send + Sync {
    fn emit(&self, channel: Channel, body: String);
}

impl<T: LogEmitter + ?Sized> LogEmitter for Arc<T> {
    fn emit(&self, channel: Channel, body: String) {
        (**self).emit(channel, body);
    }
}

/// [`LogEmitter`] backed by an OpenTelemetry [`Logger`].
#[derive(Debug, Clone)]
pub struct OtelLogEmitter<L> {
    logger: L,
}

impl<L> OtelLogEmitter<L> {
    pub fn new(logger: L) -> Self {
        Self { logger }
    }
}

impl<L> LogEmitter for OtelLogEmitter<L>
where
    L: Logger + Send + Sync,
{
    fn emit(&self, channel: Channel, body: String) {
        let mut record = self.logger.create_log_record();
        record.set_timestamp(SystemTime::now());
        record.set_severity_number(channel.severity());
        record.set_severity_text(channel.severity_text());
        record.set_body(AnyValue::from(body));
        self.logger.emit(record);
    }
}

thread_local! {
    static EMITTING: Cell<bool> = const { Cell::new(false) };
}

struct EmittingGuard;

impl EmittingGuard {
    /// `None` if this thread is already inside an emission.
    fn enter() -> Option<Self> {
        if EMITTING.with(|e| e.replace(true)) {
            None
        } else {
            Some(EmittingGuard)
        }
    }
}

impl Drop for EmittingGuard {
    fn drop(&mut self) {
        EMITTING.with(|e| e.set(false));
    }
}

struct BridgedSink {
    original: Arc<dyn ConsoleSink>,
    emitter: Arc<dyn LogEmitter>,
}

impl ConsoleSink for BridgedSink {
    fn write(&self, channel: Channel, args: &[&dyn fmt::Display]) {
        if let Some(_guard) = EmittingGuard::enter() {
            let body = render(args);
            // Emission faults are dropped; the passthrough below always runs.
            let _ = catch_unwind(AssertUnwindSafe(|| self.emitter.emit(channel, body)));
        }
        self.original.write(channel, args);
    }
}

/// Wrap every binding in `originals` with a bridged sink.
///
/// Pure: the process-wide registry is untouched. [`install`] uses this and
/// then publishes the result.
pub fn bridged(originals: &ChannelBindings, emitter: Arc<dyn LogEmitter>) -> ChannelBindings {
    originals.map(|_, original| {
        let sink: Arc<dyn ConsoleSink> = Arc::new(BridgedSink {
            original: original.clone(),
            emitter: emitter.clone(),
        });
        sink
    })
}

/// Result of [`install`].
#[derive(Debug, Clone)]
pub struct Installed {
    /// Bindings now in effect.
    pub bindings: Arc<ChannelBindings>,
    /// Bindings that were in effect before the bridge and receive the passthrough.
    pub originals: Arc<ChannelBindings>,
    /// `false` when the bridge was already installed and nothing changed.
    pub fresh: bool,
}

/// Install the bridge on all three channels of the process-wide console.
///
/// Idempotent: while a bridge is installed, further calls leave the
/// bindings as they are (the new `emitter` is dropped) and return
/// `fresh == false`.
pub fn install<E>(emitter: E) -> Installed
where
    E: LogEmitter + 'static,
{
    let mut originals = lock_originals();
    if let Some(existing) = originals.as_ref() {
        debug!("console log bridge already installed");
        return Installed {
            bindings: super::bindings(),
            originals: existing.clone(),
            fresh: false,
        };
    }

    let current = super::bindings();
    let wrapped = Arc::new(bridged(&current, Arc::new(emitter)));
    store_active(wrapped.clone());
    *originals = Some(current.clone());
    debug!("console log bridge installed");

    Installed {
        bindings: wrapped,
        originals: current,
        fresh: true,
    }
}

/// Restore the bindings captured by [`install`].
///
/// Returns `false` if no bridge was installed.
pub fn uninstall() -> bool {
    let mut originals = lock_originals();
    match originals.take() {
        Some(previous) => {
            store_active(previous);
            debug!("console log bridge uninstalled");
            true
        }
        None => false,
    }
}

/// Returns `true` while the bridge is installed.
pub fn is_installed() -> bool {
    lock_originals().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{self, replace};
    use crate::test_support::{serial, RecordingEmitter, RecordingSink};
    use opentelemetry::logs::{LoggerProvider as _, Severity};
    use opentelemetry_sdk::logs::{InMemoryLogExporter, SdkLoggerProvider};

    /// Swap in a recording sink as the "original" console for one test.
    fn with_recording_console(test: impl FnOnce(&Arc<RecordingSink>)) {
        let _guard = serial();
        let sink = RecordingSink::new();
        let previous = replace(ChannelBindings::uniform(sink.clone())).unwrap();
        test(&sink);
        uninstall();
        replace((*previous).clone()).unwrap();
    }

    #[test]
    fn emits_record_and_passes_through() {
        with_recording_console(|sink| {
            let emitter = RecordingEmitter::new();
            assert!(install(emitter.clone()).fresh);

            crate::console_info!("a", 1);
            crate::console_warn!("disk", 93.5, "%");
            crate::console_error!("boom");

            assert_eq!(
                emitter.records(),
                vec![
                    (Channel::Info, "a 1".to_owned()),
                    (Channel::Warn, "disk 93.5 %".to_owned()),
                    (Channel::Error, "boom".to_owned()),
                ]
            );
            // The original sink sees the individual arguments, not the joined body.
            assert_eq!(
                sink.calls(),
                vec![
                    (Channel::Info, vec!["a".to_owned(), "1".to_owned()]),
                    (
                        Channel::Warn,
                        vec!["disk".to_owned(), "93.5".to_owned(), "%".to_owned()]
                    ),
                    (Channel::Error, vec!["boom".to_owned()]),
                ]
            );
        });
    }

    #[test]
    fn second_install_does_not_double_wrap() {
        with_recording_console(|sink| {
            let first = RecordingEmitter::new();
            let second = RecordingEmitter::new();
            let installed = install(first.clone());
            let again = install(second.clone());

            assert!(!again.fresh);
            assert!(again.bindings.ptr_eq(&installed.bindings));
            assert!(again.originals.ptr_eq(&installed.originals));

            crate::console_info!("once");
            assert_eq!(first.records().len(), 1);
            assert!(second.records().is_empty());
            assert_eq!(sink.calls().len(), 1);
        });
    }

    #[test]
    fn uninstall_restores_originals() {
        with_recording_console(|sink| {
            let before = console::bindings();
            let emitter = RecordingEmitter::new();
            install(emitter.clone());
            assert!(is_installed());
            assert!(!console::bindings().ptr_eq(&before));

            assert!(uninstall());
            assert!(!is_installed());
            assert!(console::bindings().ptr_eq(&before));
            assert!(!uninstall());

            crate::console_info!("after");
            assert!(emitter.records().is_empty());
            assert_eq!(sink.calls().len(), 1);
        });
    }

    #[test]
    fn replace_is_refused_while_installed() {
        with_recording_console(|_| {
            install(RecordingEmitter::new());
            assert!(matches!(
                replace(ChannelBindings::default()),
                Err(console::ConsoleError::BridgeInstalled)
            ));
        });
    }

    struct ReentrantEmitter {
        inner: Arc<RecordingEmitter>,
    }

    impl LogEmitter for ReentrantEmitter {
        fn emit(&self, channel: Channel, body: String) {
            // Logging from the emission path, as an exporter might.
            crate::console_warn!("emitting", &body);
            self.inner.emit(channel, body);
        }
    }

    #[test]
    fn reentrant_console_call_does_not_recurse() {
        with_recording_console(|sink| {
            let inner = RecordingEmitter::new();
            install(ReentrantEmitter {
                inner: inner.clone(),
            });

            crate::console_info!("outer");

            assert_eq!(inner.records(), vec![(Channel::Info, "outer".to_owned())]);
            // The nested warn still reached the original console.
            assert_eq!(
                sink.calls(),
                vec![
                    (Channel::Warn, vec!["emitting".to_owned(), "outer".to_owned()]),
                    (Channel::Info, vec!["outer".to_owned()]),
                ]
            );
        });
    }

    struct PanickingEmitter;

    impl LogEmitter for PanickingEmitter {
        fn emit(&self, _: Channel, _: String) {
            panic!("log pipeline unavailable");
        }
    }

    #[test]
    fn emitter_panic_never_suppresses_passthrough() {
        with_recording_console(|sink| {
            install(PanickingEmitter);
            crate::console_error!("still visible");
            crate::console_error!("twice");
            assert_eq!(sink.calls().len(), 2);
        });
    }

    #[test]
    fn otel_emitter_sets_severity_and_body() {
        let exporter = InMemoryLogExporter::default();
        let provider = SdkLoggerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let emitter = OtelLogEmitter::new(provider.logger("console"));

        emitter.emit(Channel::Warn, "low disk".to_owned());

        let logs = exporter.get_emitted_logs().unwrap();
        assert_eq!(logs.len(), 1);
        let record = &logs[0].record;
        assert_eq!(record.severity_number(), Some(Severity::Warn));
        assert_eq!(record.severity_text(), Some("WARN"));
        assert_eq!(record.body(), Some(&AnyValue::from("low disk".to_owned())));
    }
}
