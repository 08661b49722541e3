use std::{
    collections::HashMap,
    fmt::Write as _,
    fs::OpenOptions,
    path::PathBuf,
};
use nu_ansi_term::{Color, Style};
use serde::Deserialize;
use termcolor::ColorChoice;
use tracing::{field::Visit, Level, Metadata};
use tracing_log::NormalizeEvent;
use tracing_subscriber::{
    filter::{FilterFn, LevelFilter},
    fmt::FormatEvent,
    prelude::*,
};

use crate::{prelude::*, args::Args};


#[derive(Debug, confique::Config)]
pub(crate) struct LogConfig {
    /// Minimum log level per module path prefix. A log message is emitted if
    /// the entry with the longest prefix of its module path allows its level.
    /// Messages from modules matching no entry are dropped. Levels: "off",
    /// "error", "warn", "info", "debug", "trace".
    ///
    /// Example: info logs in general, everything from the ledger access code
    /// and debug logs of the Postgres client library.
    ///
    ///    [log]
    ///    filters.bank_ledger = "info"
    ///    filters."bank_ledger::ledger" = "trace"
    ///    filters.tokio_postgres = "debug"
    #[config(default = { "bank_ledger": "debug" })]
    pub(crate) filters: Filters,

    /// Additional log file. `${cmd}` is replaced by the name of the
    /// subcommand (`serve`, `db` or `check`), so that different processes
    /// can write to different files. Example: "/var/log/bank-ledger-${cmd}.log".
    pub(crate) file: Option<PathBuf>,

    /// Whether to write log messages to stdout.
    #[config(default = true)]
    pub(crate) stdout: bool,

    /// Log the HTTP headers of every incoming request at 'trace' level.
    #[config(default = false)]
    pub(crate) log_http_headers: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "HashMap<String, String>")]
pub(crate) struct Filters(HashMap<String, LevelFilter>);

impl TryFrom<HashMap<String, String>> for Filters {
    type Error = String;
    fn try_from(value: HashMap<String, String>) -> Result<Self, Self::Error> {
        value.into_iter()
            .map(|(target_prefix, level)| Ok((target_prefix, parse_level_filter(&level)?)))
            .collect::<Result<_, _>>()
            .map(Self)
    }
}

impl Filters {
    /// Checks whether a log with the given target and level passes. See the
    /// config doc comment for the logic.
    fn is_enabled(&self, target: &str, level: &Level) -> bool {
        // We only expect very few entries, so a linear scan is fine.
        self.0.iter()
            .filter(|(target_prefix, _)| target.starts_with(target_prefix.as_str()))
            .max_by_key(|(target_prefix, _)| target_prefix.len())
            .map(|(_, level_filter)| level <= level_filter)
            .unwrap_or(false)
    }

    fn max_level(&self) -> LevelFilter {
        self.0.values().max().copied().unwrap_or(LevelFilter::OFF)
    }
}

fn parse_level_filter(s: &str) -> Result<LevelFilter, String> {
    match s {
        "off" => Ok(LevelFilter::OFF),
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        other => Err(format!("invalid log level '{other}'")),
    }
}

/// Installs the global logger. Panics when called twice.
pub(crate) fn init(config: &LogConfig, args: &Args, cmd: &str) -> Result<()> {
    let filter = {
        let filters = config.filters.clone();
        let max_level = filters.max_level();
        FilterFn::new(move |metadata: &Metadata<'_>| {
            filters.is_enabled(metadata.target(), metadata.level())
        }).with_max_level_hint(max_level)
    };

    macro_rules! subscriber {
        ($writer:expr) => {
            tracing_subscriber::fmt::layer()
                .event_format(EventFormatter(args.color))
                .with_writer($writer)
        };
    }

    let stdout_output = config.stdout.then(|| subscriber!(std::io::stdout));

    let file_output = config.file.as_ref()
        .map(|path| -> Result<std::fs::File> {
            use std::io::Write;

            let new_path = path.to_str()
                .ok_or_else(|| anyhow!("log file path is not valid UTF-8"))?
                .replace("${cmd}", cmd);

            let mut file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&new_path)
                .with_context(|| format!("failed to open/create log file '{new_path}'"))?;

            // Separates runs of the process.
            file.write_all(b"\n").context("could not write to log file")?;

            Ok(file)
        })
        .transpose()?
        .map(|file| subscriber!(file).with_ansi(args.color == ColorChoice::Always));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_output)
        .with(stdout_output)
        .init();

    Ok(())
}

type TracingWriter<'a> = tracing_subscriber::fmt::format::Writer<'a>;

/// Prints one line per event: time, level, target, message and then all
/// other fields as `key=value`.
#[derive(Clone, Copy)]
struct EventFormatter(ColorChoice);

impl<S, N> FormatEvent<S, N> for EventFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: TracingWriter<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let use_ansi = self.0 == ColorChoice::Always
            || (writer.has_ansi_escapes() && self.0 != ColorChoice::Never);

        // Events coming from the `log` crate carry their real metadata in
        // special fields.
        let normalized_metadata = event.normalized_metadata();
        let metadata = normalized_metadata.as_ref().unwrap_or(event.metadata());

        let dim_style = Style::new().dimmed();
        let (level_style, body_style) = match *metadata.level() {
            Level::ERROR => (Style::new().fg(Color::Red).bold(), Style::new().fg(Color::Red)),
            Level::WARN => (Style::new().fg(Color::Yellow).bold(), Style::new().fg(Color::Yellow)),
            Level::INFO => (Style::new().fg(Color::Green), Style::new()),
            Level::DEBUG => (Style::new().fg(Color::Blue), Style::new().dimmed()),
            Level::TRACE => (Style::new().fg(Color::Magenta), Style::new().fg(Color::DarkGray)),
        };

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S.%3f");
        with_style(&mut writer, use_ansi, dim_style, |w| write!(w, "{now} "))?;
        with_style(&mut writer, use_ansi, level_style, |w| write!(w, "{:5}", metadata.level()))?;
        with_style(&mut writer, use_ansi, dim_style, |w| write!(w, " {} >  ", metadata.target()))?;

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        with_style(&mut writer, use_ansi, body_style, |w| {
            write!(w, "{}", fields.message)?;
            if !fields.rest.is_empty() {
                write!(w, " ~~{}", fields.rest)?;
            }
            Ok(())
        })?;

        writeln!(writer)
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    rest: String,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => { let _ = write!(self.message, "{value:?}"); }
            name if name.starts_with("log.") => {}
            name => { let _ = write!(self.rest, " {name}={value:?}"); }
        }
    }
}

fn with_style(
    out: &mut TracingWriter<'_>,
    use_ansi: bool,
    style: Style,
    f: impl FnOnce(&mut TracingWriter<'_>) -> std::fmt::Result,
) -> std::fmt::Result {
    if use_ansi {
        write!(out, "{}", style.prefix())?;
    }
    f(out)?;
    if use_ansi {
        write!(out, "{}", style.suffix())?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn filters(entries: &[(&str, &str)]) -> Filters {
        let map = entries.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        Filters::try_from(map).unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let filters = filters(&[
            ("bank_ledger", "info"),
            ("bank_ledger::ledger", "trace"),
            ("bank_ledger::http", "off"),
        ]);

        assert!(filters.is_enabled("bank_ledger::api", &Level::INFO));
        assert!(!filters.is_enabled("bank_ledger::api", &Level::DEBUG));
        assert!(filters.is_enabled("bank_ledger::ledger::pg", &Level::TRACE));
        assert!(!filters.is_enabled("bank_ledger::http", &Level::ERROR));
        assert!(!filters.is_enabled("hyper::proto", &Level::ERROR));
        assert_eq!(filters.max_level(), LevelFilter::TRACE);
    }

    #[test]
    fn invalid_level_is_rejected() {
        let map: HashMap<String, String> = [("bank_ledger".to_string(), "loud".to_string())]
            .into_iter()
            .collect();
        assert_eq!(Filters::try_from(map).unwrap_err(), "invalid log level 'loud'");
    }
}
