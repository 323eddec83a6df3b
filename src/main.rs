use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use gpmf_frames::config::parse_bbox;
use gpmf_frames::diagnostics::log_diagnostics;
use gpmf_frames::logging::init_logging;
use gpmf_frames::process::{calculate_gradient, calculate_odo, calculate_speeds, filter_locked, is_locked};
use gpmf_frames::visit::DumpVisitor;
use gpmf_frames::{
    parse_gopro, BoundingBox, Entry, Error, ExtractOptions, Extraction, Field, FrameMeta, Gpmd, GpsFilterSettings,
    LoadFlags, LogDiagnostics, Speed, SpeedUnit, Timeunit, VideoStreamMeta,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn entry_csv_header() -> &'static str {
    "dt,timestamp_ms,packet,packet_index,gpsfix,dop,lat,lon,alt,speed,cspeed,dist,azi,cog,codo,cgrad,accl_x,accl_y,accl_z"
}

#[derive(Parser, Debug)]
#[command(name = "gpmf-frames")]
#[command(about = "Extract GoPro GPMF telemetry as time-indexed frames", long_about = None)]
struct Cli {
    /// Raw metadata stream, demuxed from the recording
    #[arg(value_name = "INPUT.gpmd")]
    input: PathBuf,

    /// Output file path (use '-' for stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Json, conflicts_with_all = ["csv", "json"])]
    format: OutputFormat,

    /// Alias for `--format csv`
    #[arg(long, conflicts_with_all = ["json", "format"], action = clap::ArgAction::SetTrue)]
    csv: bool,

    /// Alias for `--format json`
    #[arg(long, conflicts_with_all = ["csv", "format"], action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Fixes with a worse dilution of precision are treated as unlocked
    #[arg(long = "max-dop", default_value_t = 10.0)]
    max_dop: f64,

    /// Fixes reporting a higher speed are treated as unlocked
    #[arg(long = "max-speed", default_value_t = 60.0)]
    max_speed: f64,

    /// Unit of --max-speed (mps, kph, mph, knots)
    #[arg(long = "speed-unit", default_value = "kph")]
    speed_unit: SpeedUnit,

    /// Fixes outside minlon,minlat,maxlon,maxlat are treated as unlocked
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    bbox: Option<BoundingBox>,

    /// Only write entries with a 2D or 3D lock
    #[arg(long = "only-locked", action = clap::ArgAction::SetTrue)]
    only_locked: bool,

    /// Resample to one interpolated entry every SECONDS
    #[arg(long, value_name = "SECONDS")]
    every: Option<f64>,

    /// Video frame count, for recordings without a shutter-stream anchor
    #[arg(long = "frame-count", requires_all = ["timebase", "frame_duration"])]
    frame_count: Option<u64>,

    /// Video time base, ticks per second
    #[arg(long, requires = "frame_count")]
    timebase: Option<u64>,

    /// Video frame duration, ticks
    #[arg(long = "frame-duration", requires = "frame_count")]
    frame_duration: Option<u64>,

    #[arg(long = "no-accl", action = clap::ArgAction::SetTrue)]
    no_accl: bool,

    #[arg(long = "no-grav", action = clap::ArgAction::SetTrue)]
    no_grav: bool,

    #[arg(long = "no-cori", action = clap::ArgAction::SetTrue)]
    no_cori: bool,

    /// Log the decoded record tree before extracting
    #[arg(long, action = clap::ArgAction::SetTrue)]
    dump: bool,

    /// Fail on lookups outside the recorded time range instead of clamping
    #[arg(long, action = clap::ArgAction::SetTrue)]
    strict: bool,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,
}

fn resolve_format(cli: &Cli) -> OutputFormat {
    if cli.csv {
        OutputFormat::Csv
    } else if cli.json {
        OutputFormat::Json
    } else {
        cli.format
    }
}

fn should_write_to_stdout(output: &Option<PathBuf>) -> bool {
    match output {
        None => true,
        Some(p) => p.as_os_str() == "-",
    }
}

fn options_from(cli: &Cli) -> ExtractOptions {
    let video = match (cli.frame_count, cli.timebase, cli.frame_duration) {
        (Some(frame_count), Some(timebase), Some(frame_duration)) => Some(VideoStreamMeta {
            frame_count,
            timebase,
            frame_duration,
        }),
        _ => None,
    };

    ExtractOptions {
        video,
        flags: LoadFlags {
            accl: !cli.no_accl,
            grav: !cli.no_grav,
            cori: !cli.no_cori,
        },
        gps_filter: Some(GpsFilterSettings {
            max_dop: cli.max_dop,
            max_speed: Speed::new(cli.max_speed, cli.speed_unit),
            bbox: cli.bbox,
        }),
        strict: cli.strict,
        diagnostics: log_diagnostics(),
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.10}")).unwrap_or_default()
}

fn csv_row(e: &Entry) -> String {
    let point = e.point();
    let accl = e.point3(Field::Accl);
    let cols = [
        e.dt.to_rfc3339(),
        fmt_opt(e.number(Field::Timestamp)),
        fmt_opt(e.number(Field::Packet)),
        fmt_opt(e.number(Field::PacketIndex)),
        fmt_opt(e.number(Field::GpsFix)),
        fmt_opt(e.number(Field::Dop)),
        fmt_opt(point.map(|p| p.lat)),
        fmt_opt(point.map(|p| p.lon)),
        fmt_opt(e.number(Field::Alt)),
        fmt_opt(e.number(Field::Speed)),
        fmt_opt(e.number(Field::CSpeed)),
        fmt_opt(e.number(Field::Dist)),
        fmt_opt(e.number(Field::Azi)),
        fmt_opt(e.number(Field::Cog)),
        fmt_opt(e.number(Field::Codo)),
        fmt_opt(e.number(Field::CGrad)),
        fmt_opt(accl.map(|a| a.x)),
        fmt_opt(accl.map(|a| a.y)),
        fmt_opt(accl.map(|a| a.z)),
    ];
    cols.join(",")
}

#[derive(Serialize)]
struct Row<'a> {
    time_ms: f64,
    #[serde(flatten)]
    entry: &'a Entry,
}

/// Entries to write, either as stored or resampled.
fn selected<'a>(frames: &'a FrameMeta, every: Option<f64>) -> Result<Vec<(Timeunit, Cow<'a, Entry>)>, Error> {
    match every {
        Some(secs) if secs > 0.0 => frames
            .stepper(Timeunit::from_secs_f64(secs))
            .steps()
            .map(|t| frames.get(t, true).map(|e| (t, e)))
            .collect(),
        _ => Ok(frames.items().into_iter().map(|(t, e)| (t, Cow::Borrowed(e))).collect()),
    }
}

fn run_with_writer(cli: &Cli, format: OutputFormat, out: &mut dyn Write) -> Result<(), Error> {
    let data = fs::read(&cli.input)?;
    if cli.dump {
        Gpmd::parse(&data)?.accept(DumpVisitor::new(log_diagnostics()))?;
    }

    let Extraction { mut frames, rejections } = parse_gopro(&data, &options_from(cli))?;
    rejections.report(&LogDiagnostics);

    frames.process_deltas_filtered(is_locked, calculate_speeds(), 1);
    frames.process(calculate_odo());
    frames.process_deltas_filtered(is_locked, calculate_gradient(), 1);
    frames.process(filter_locked());

    let rows = selected(&frames, cli.every)?;
    let rows = rows.iter().filter(|(_, e)| !cli.only_locked || is_locked(e));

    match format {
        OutputFormat::Csv => {
            writeln!(out, "{}", entry_csv_header())?;
            for (_, entry) in rows {
                writeln!(out, "{}", csv_row(entry))?;
            }
        }
        OutputFormat::Json => {
            let results: Vec<Row> = rows
                .map(|(t, entry)| Row {
                    time_ms: t.millis(),
                    entry: &**entry,
                })
                .collect();
            let json = serde_json::to_string_pretty(&results).map_err(io::Error::other)?;
            writeln!(out, "{json}")?;
        }
    }

    Ok(())
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let format = resolve_format(&cli);

    match &cli.output {
        Some(path) if !should_write_to_stdout(&cli.output) => {
            let file = File::create(path)?;
            let mut out = BufWriter::new(file);
            run_with_writer(&cli, format, &mut out)?;
            out.flush()?;
        }
        _ => {
            let stdout = io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            run_with_writer(&cli, format, &mut out)?;
            out.flush()?;
        }
    }

    Ok(())
}
