//! Simple logger implementation for the scheduling core
//!
//! Routes `log` records to a byte sink supplied by the embedding kernel
//! (serial port, early console, ring buffer). The core has no I/O surface
//! of its own, so the sink is the only way log output leaves it.

use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

/// Byte sink installed by the embedding kernel.
pub type SinkFn = fn(&[u8]);

static SINK: Once<SinkFn> = Once::new();

/// Logger that formats records into a fixed buffer and hands them to the
/// installed sink.
struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        SINK.get().is_some()
    }

    fn log(&self, record: &Record) {
        let Some(sink) = SINK.get() else {
            return;
        };

        // Format: [LEVEL] message
        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        sink(b"[");
        sink(level_str.as_bytes());
        sink(b"] ");

        // Format the message without allocating; long records are cut at
        // the buffer boundary.
        use core::fmt::Write;
        let mut buf = [0u8; 512];
        let pos = {
            let mut writer = BufferWriter {
                buffer: &mut buf,
                pos: 0,
            };
            let _ = core::write!(&mut writer, "{}\n", record.args());
            writer.pos
        };
        sink(&buf[..pos]);
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the logger with the given sink. The first sink wins; later
/// calls keep it.
pub fn init(sink: SinkFn) {
    SINK.call_once(|| sink);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}

/// Simple buffer writer for formatting without alloc
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl<'a> core::fmt::Write for BufferWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);

        if to_write > 0 {
            self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
            self.pos += to_write;
        }

        Ok(())
    }
}
