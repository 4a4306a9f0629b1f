use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::config::SinkSpec;
use crate::config::error::{ConfigError, ConfigErrorKind};
use crate::report::display::ListSink;
use crate::report::event::Sink;
use crate::report::junit::JunitSink;
use crate::report::serialize::{ReportFormat, ReportSink};

/// Names accepted in `reporter` entries and `--reporter`.
pub const REPORTERS: &[&str] = &["list", "json", "yaml", "junit"];

/// Instantiate the configured reporters.
///
/// # Errors
///
/// - `UnknownReporter` for a name not in [`REPORTERS`]
/// - `UnreadableFile` if the list reporter's output file cannot be created
pub fn build_sinks(specs: &[SinkSpec]) -> Result<Vec<Box<dyn Sink>>, ConfigError> {
    specs.iter().map(build_sink).collect()
}

fn build_sink(spec: &SinkSpec) -> Result<Box<dyn Sink>, ConfigError> {
    let output = spec.output.clone();
    let sink: Box<dyn Sink> = match spec.name.as_str() {
        "list" => match &output {
            Some(path) => Box::new(ListSink::new(Box::new(BufWriter::new(create(path)?)))),
            None => Box::new(ListSink::stdout()),
        },
        "json" => Box::new(ReportSink::new(ReportFormat::Json, output)),
        "yaml" => Box::new(ReportSink::new(ReportFormat::Yaml, output)),
        "junit" => Box::new(JunitSink::new(output)),
        other => {
            return Err(ConfigError::new(
                ConfigErrorKind::UnknownReporter,
                format!("reporter \"{other}\" not found"),
            )
            .with_detail(format!("available reporters: {}", REPORTERS.join(", "))));
        }
    };
    Ok(sink)
}

fn create(path: &Path) -> Result<File, ConfigError> {
    let open = || {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        File::create(path)
    };
    open().map_err(|e| {
        ConfigError::new(
            ConfigErrorKind::UnreadableFile,
            format!("cannot open report output {}", path.display()),
        )
        .with_detail(e.to_string())
    })
}
