use tracing::level_filters::LevelFilter;

/// Maps the CLI verbosity surface onto a tracing level filter.
///
/// `--quiet` wins over any number of `-v` flags and keeps only errors; the
/// default level is WARN so that routine per-session traffic stays silent.
pub fn level_filter(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}
