use clap::Parser;
use metrics_core_rs::prometheus::promslog::{self, AllowedLevel};
use metrics_core_rs::prometheus::{
    collect_all, Collector, CounterVec, HistogramOpts, HistogramVec, MetricSnapshot, Opts,
    Snapshot,
};
use slog::{debug, error, info, o, Logger};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Hammers a histogram and a counter from many threads while a collector
/// scrapes them, then checks that no observation was lost.
#[derive(Parser, Debug)]
#[command(name = "metrics_core_stress", version)]
struct Args {
    /// Number of writer threads.
    #[arg(long, default_value_t = 8)]
    threads: usize,

    /// Observations recorded by each writer.
    #[arg(long, default_value_t = 100_000)]
    observations: u64,

    /// Scrapes taken while the writers run.
    #[arg(long, default_value_t = 200)]
    scrapes: usize,

    /// Native bucket limit; small values force frequent rescaling.
    #[arg(long, default_value_t = 40)]
    max_buckets: usize,

    /// Only log messages with the given severity or above.
    #[arg(long = "log.level", default_value = "info")]
    log_level: AllowedLevel,

    /// Output format of log messages. One of: [full, compact]
    #[arg(long = "log.format", default_value = "compact")]
    log_format: promslog::AllowedFormat,
}

#[derive(Debug, Default, PartialEq)]
struct Totals {
    observations: u64,
    increments: f64,
}

fn totals(families: &[MetricSnapshot]) -> Totals {
    let mut t = Totals::default();
    for point in families.iter().flat_map(|f| &f.data_points) {
        match &point.snapshot {
            Snapshot::Histogram(h) => t.observations += h.count,
            Snapshot::Counter(c) => t.increments += c.value,
            _ => {}
        }
    }
    t
}

// Deterministic spread of positive and negative values over several
// orders of magnitude.
fn sample(worker: usize, i: u64) -> f64 {
    let x = (i.wrapping_mul(2_654_435_761) ^ worker as u64) % 100_000;
    let v = (x as f64 / 1000.0).exp2() / 1e12;
    if x % 7 == 0 {
        -v
    } else {
        v
    }
}

fn run(args: &Args, logger: &Logger) -> Result<bool, Box<dyn std::error::Error>> {
    let latency = HistogramVec::new(
        HistogramOpts::new("work_duration_seconds", "Simulated work duration.")
            .native_max_bucket_number(args.max_buckets),
        &["worker"],
    )?
    .with_logger(logger.clone());
    let jobs = CounterVec::new(Opts::new("jobs_total", "Simulated jobs."), &["worker"])?
        .with_logger(logger.clone());

    let done = AtomicBool::new(false);
    let start = Instant::now();

    thread::scope(|s| {
        let writers: Vec<_> = (0..args.threads)
            .map(|w| {
                let name = w.to_string();
                let (latency, jobs) = (&latency, &jobs);
                s.spawn(move || {
                    let histogram = latency.with_label_values(&[&name]);
                    let counter = jobs.with_label_values(&[&name]);
                    for i in 0..args.observations {
                        histogram.observe(sample(w, i));
                        counter.inc();
                    }
                })
            })
            .collect();

        let done = &done;
        let collectors: [&dyn Collector; 2] = [&latency, &jobs];
        s.spawn(move || {
            for n in 0..args.scrapes {
                if done.load(Ordering::Acquire) {
                    break;
                }
                let t = totals(&collect_all(&collectors));
                debug!(logger, "scrape"; "n" => n, "observations" => t.observations, "increments" => t.increments);
                thread::sleep(Duration::from_millis(1));
            }
        });

        for w in writers {
            if w.join().is_err() {
                error!(logger, "writer panicked");
            }
        }
        done.store(true, Ordering::Release);
    });

    let expected = args.threads as u64 * args.observations;
    let collectors: [&dyn Collector; 2] = [&latency, &jobs];
    let got = totals(&collect_all(&collectors));
    info!(logger, "finished";
        "elapsed" => ?start.elapsed(),
        "expected" => expected,
        "observations" => got.observations,
        "increments" => got.increments);

    Ok(got
        == Totals {
            observations: expected,
            increments: expected as f64,
        })
}

fn main() {
    let args = Args::parse();
    let logger = promslog::new(&promslog::Config {
        level: args.log_level,
        format: args.log_format,
    })
    .new(o!("app" => "metrics_core_stress"));

    info!(logger, "Starting stress run"; "threads" => args.threads, "observations" => args.observations);
    let code = match run(&args, &logger) {
        Ok(true) => 0,
        Ok(false) => {
            error!(logger, "totals do not match the number of observations");
            1
        }
        Err(err) => {
            error!(logger, "setup failed"; "err" => %err);
            2
        }
    };
    // Flush the async drain before exiting.
    drop(logger);
    process::exit(code);
}
