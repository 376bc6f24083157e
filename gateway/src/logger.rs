//! Stderr logging, grounded on the upstream server crate's logger but
//! trimmed to the one sink this binary actually has: no OTel exporter, no
//! TUI channel appender, since neither is wired up here.

use std::io::IsTerminal;
use std::str::FromStr;

use jiff::{Zoned, tz::TimeZone};
use logforth::append::Stderr;
use logforth::filter::EnvFilter;
use logforth::layout::Layout;

/// Formats timestamps in UTC rather than logforth's default local time.
#[derive(Debug)]
struct UtcLayout {
    no_color: bool,
}

impl Layout for UtcLayout {
    fn format(&self, record: &log::Record<'_>, _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>]) -> anyhow::Result<Vec<u8>> {
        use std::fmt::Write;

        let now = Zoned::now().with_time_zone(TimeZone::UTC);
        let mut output = String::new();
        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = if self.no_color {
            format!("{:>5}", record.level())
        } else {
            match record.level() {
                log::Level::Error => format!("\x1b[31m{:>5}\x1b[0m", record.level()),
                log::Level::Warn => format!("\x1b[33m{:>5}\x1b[0m", record.level()),
                log::Level::Info => format!("\x1b[32m{:>5}\x1b[0m", record.level()),
                log::Level::Debug => format!("\x1b[34m{:>5}\x1b[0m", record.level()),
                log::Level::Trace => format!("\x1b[35m{:>5}\x1b[0m", record.level()),
            }
        };
        write!(output, "{level}  {}", record.args())?;

        Ok(output.into_bytes())
    }
}

pub fn init(log_filter: &str) {
    let layout = if std::io::stderr().is_terminal() {
        UtcLayout { no_color: false }
    } else {
        UtcLayout { no_color: true }
    };

    let filter = log_filter.to_string();
    logforth::builder()
        .dispatch(move |d| {
            let filter = EnvFilter::from_str(&filter).unwrap_or_else(|_| EnvFilter::from_str("info").expect("valid default filter"));
            d.filter(filter).append(Stderr::default().with_layout(layout))
        })
        .apply();
}
