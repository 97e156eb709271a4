//! `log` facade backend.
//!
//! Records are formatted straight into a board-provided byte sink (UART,
//! RTT, ...). Both the bridge and smoltcp log through here.

use core::cell::Cell;
use core::fmt::{self, Write};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Output function for formatted log text
pub type LogSink = fn(&str);

static LOGGER: SinkLogger = SinkLogger;
static SINK: Mutex<CriticalSectionRawMutex, Cell<Option<LogSink>>> = Mutex::new(Cell::new(None));

struct SinkLogger;

struct SinkWriter(LogSink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        (self.0)(s);
        Ok(())
    }
}

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = SINK.lock(|s| s.get()) {
            let mut out = SinkWriter(sink);
            let _ = writeln!(
                out,
                "[{:>5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Install the logger (call once at boot, before USB is started).
///
/// Calling it again only swaps the sink and level.
pub fn init_logger(sink: LogSink, level: log::LevelFilter) {
    SINK.lock(|s| s.set(Some(sink)));
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
