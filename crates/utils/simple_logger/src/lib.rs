#![cfg_attr(not(test), no_std)]

use core::fmt;

use anstyle::{AnsiColor, Reset};
use klocks::{Lazy, Once};
use log::{self, Level, LevelFilter, Log, Metadata, Record};

/// 日志的输出端，比如串口或者测试时的标准输出
pub trait LogSink: Sync {
    fn write_log(&self, args: fmt::Arguments<'_>);
}

/// a simple logger
struct SimpleLogger {
    level: LevelFilter,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.level >= metadata.level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(sink) = SINK.get() else {
            return;
        };
        let color = match record.level() {
            Level::Error => AnsiColor::Red,
            Level::Warn => AnsiColor::BrightYellow,
            Level::Info => AnsiColor::Blue,
            Level::Debug => AnsiColor::Green,
            Level::Trace => AnsiColor::BrightBlack,
        };
        sink.write_log(format_args!(
            "{}[{:>5}]{} {}\n",
            color.render_fg(),
            record.level(),
            Reset.render(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static SINK: Once<&'static dyn LogSink> = Once::new();

static LOGGER: Lazy<SimpleLogger> = Lazy::new(|| SimpleLogger {
    level: parse_level(option_env!("VM_LOG")),
});

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// initiate logger
///
/// 只有第一次调用生效，之后的调用直接返回
pub fn init(sink: &'static dyn LogSink) {
    SINK.call_once(|| {
        // 别的 logger 已经注册时，沿用它
        if log::set_logger(&*LOGGER).is_ok() {
            log::set_max_level(LOGGER.level);
        }
        sink
    });
}
