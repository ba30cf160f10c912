use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_merge_sort::{check_sorted_by, ExternalSorterBuilder, Record, SortError};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let record: RecordType = arg_parser.value_of_t_or_exit("record");
    let result = match record {
        RecordType::I32 => run::<i32>(&arg_parser),
        RecordType::U32 => run::<u32>(&arg_parser),
        RecordType::I64 => run::<i64>(&arg_parser),
        RecordType::U64 => run::<u64>(&arg_parser),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            log::error!("{}", err);
            process::exit(1);
        }
    }
}

/// Sorts or checks the input. Returns `false` if a checked file is not sorted.
fn run<T: Record + Ord>(arg_parser: &clap::ArgMatches) -> Result<bool, SortError> {
    let order: Order = arg_parser.value_of_t_or_exit("sort");
    let buffer_size =
        parse_size(arg_parser.value_of("buffer_size").expect("value is required")).expect("value is pre-validated");
    let input = path::Path::new(arg_parser.value_of("input").expect("value is required"));

    if arg_parser.is_present("check") {
        let result = match order {
            Order::Asc => check_sorted_by(input, buffer_size, T::cmp)?,
            Order::Desc => check_sorted_by(input, buffer_size, |a: &T, b: &T| b.cmp(a))?,
        };

        return Ok(match result.first_violation {
            None => {
                log::info!("file is sorted ({} records)", result.records_checked);
                true
            }
            Some(idx) => {
                log::warn!("file is not sorted: record {} is out of order", idx);
                false
            }
        });
    }

    let output = path::Path::new(arg_parser.value_of("output").expect("value is required"));

    let mut sorter_builder = ExternalSorterBuilder::<T>::new()
        .with_buffer_size(buffer_size)
        .with_verbose(arg_parser.is_present("verbose"));

    if arg_parser.is_present("threads") {
        sorter_builder = sorter_builder.with_threads_number(arg_parser.value_of_t_or_exit("threads"));
    }

    if let Some(tmp_dir) = arg_parser.value_of("tmp_dir") {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(split_size) = arg_parser.value_of("split_size") {
        sorter_builder = sorter_builder.with_split_buffer_size(parse_size(split_size).expect("value is pre-validated"));
    }

    let sorter = sorter_builder.build()?;
    let summary = match order {
        Order::Asc => sorter.sort_by(input, output, T::cmp)?,
        Order::Desc => sorter.sort_by(input, output, |a: &T, b: &T| b.cmp(a))?,
    };

    log::info!(
        "sorted {} records ({} runs, {} merge rounds) in {:?}",
        summary.records,
        summary.runs,
        summary.rounds,
        summary.elapsed
    );

    return Ok(true);
}

fn parse_size(value: &str) -> Result<usize, String> {
    let size = match value.parse::<ByteSize>() {
        Ok(size) => size,
        Err(err) => return Err(format!("size format incorrect: {}", err)),
    };

    usize::try_from(size.as_u64()).map_err(|_| format!("size {} exceeds the addressable memory", size))
}

fn validate_size(value: &str) -> Result<(), String> {
    parse_size(value).map(|_| ())
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Order::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Order as clap::ArgEnum>::from_str(s, false)
    }
}

/// Record layout of the input file.
#[derive(Copy, Clone, clap::ArgEnum)]
enum RecordType {
    I32,
    U32,
    I64,
    U64,
}

impl RecordType {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        RecordType::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <RecordType as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-merge-sort")
        .about("external merge sort of fixed-width binary records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted or checked")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required_unless_present("check")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("check")
                .long("check")
                .help("check that the input is sorted instead of sorting it"),
        )
        .arg(
            clap::Arg::new("record")
                .short('r')
                .long("record")
                .help("record type")
                .takes_value(true)
                .default_value("i32")
                .possible_values(RecordType::possible_values()),
        )
        .arg(
            clap::Arg::new("sort")
                .long("sort")
                .help("sorting order")
                .takes_value(true)
                .default_value("asc")
                .possible_values(Order::possible_values()),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("report merge progress and phase timings"),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel merging")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary runs")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("buffer_size")
                .short('b')
                .long("buffer-size")
                .help("memory budget of the I/O buffers")
                .required(true)
                .takes_value(true)
                .validator(validate_size),
        )
        .arg(
            clap::Arg::new("split_size")
                .short('s')
                .long("split-size")
                .help("split phase buffer size")
                .takes_value(true)
                .validator(validate_size),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
