use metrics_core_rs::prometheus::{
    CounterVec, Histogram, HistogramOpts, HistogramSnapshot, Opts, Summary, SummaryOpts,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn assert_consistent(s: &HistogramSnapshot) {
    if let Some(last) = s.classic.last() {
        assert_eq!(last.upper_bound, f64::INFINITY);
        assert_eq!(last.cumulative_count, s.count, "classic buckets disagree with count");
    }
    if let Some(native) = &s.native {
        assert_eq!(native.total_count(), s.count, "native buckets disagree with count");
    }
}

#[test]
fn no_observation_is_lost_or_duplicated() {
    const THREADS: usize = 8;
    const PER_THREAD: u64 = 20_000;

    let histogram = Arc::new(
        Histogram::new(&HistogramOpts::new("h", "h").native_max_bucket_number(10)).unwrap(),
    );
    let done = Arc::new(AtomicBool::new(false));

    let collector = {
        let histogram = Arc::clone(&histogram);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut scrapes = 0;
            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                let s = histogram.collect();
                assert_consistent(&s);
                assert!(s.count >= last);
                last = s.count;
                scrapes += 1;
            }
            scrapes
        })
    };

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let histogram = Arc::clone(&histogram);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    // Small integers keep the sum exact.
                    let v = ((i + t as u64) % 16) as f64 - 4.0;
                    histogram.observe(v * 1024.0);
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    assert!(collector.join().unwrap() > 0);

    let expected_sum: f64 = (0..THREADS)
        .flat_map(|t| (0..PER_THREAD).map(move |i| (((i + t as u64) % 16) as f64 - 4.0) * 1024.0))
        .sum();
    let s = histogram.collect();
    assert_eq!(s.count, THREADS as u64 * PER_THREAD);
    assert_eq!(s.sum, expected_sum);
    assert_consistent(&s);
}

#[test]
fn sum_matches_count_in_every_snapshot() {
    let histogram = Arc::new(Histogram::new(&HistogramOpts::new("h", "h").native_only()).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let histogram = Arc::clone(&histogram);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    histogram.observe(1.0);
                }
            })
        })
        .collect();

    for _ in 0..500 {
        let s = histogram.collect();
        assert_eq!(s.sum, s.count as f64);
        assert_consistent(&s);
    }
    done.store(true, Ordering::Release);
    for w in writers {
        w.join().unwrap();
    }
}

#[test]
fn thousand_threads_observe_once() {
    const THREADS: usize = 1000;
    let histogram = Arc::new(Histogram::new(&HistogramOpts::new("h", "h")).unwrap());
    let barrier = Arc::new(Barrier::new(THREADS + 1));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let histogram = Arc::clone(&histogram);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                histogram.observe(1.0);
            })
        })
        .collect();

    barrier.wait();
    // Collections racing the writers must still be internally consistent.
    for _ in 0..10 {
        assert_consistent(&histogram.collect());
    }
    for h in handles {
        h.join().unwrap();
    }

    let s = histogram.collect();
    assert_eq!(s.count, 1000);
    assert_eq!(s.sum, 1000.0);
    assert_consistent(&s);
}

#[test]
fn summary_count_and_sum_are_consistent() {
    let summary = Arc::new(Summary::new(&SummaryOpts::new("s", "s"), None).unwrap());
    let writers: Vec<_> = (0..8)
        .map(|_| {
            let summary = Arc::clone(&summary);
            thread::spawn(move || {
                for _ in 0..10_000 {
                    summary.observe(0.5);
                }
            })
        })
        .collect();

    for _ in 0..100 {
        let s = summary.collect();
        assert_eq!(s.sum, 0.5 * s.count as f64);
    }
    for w in writers {
        w.join().unwrap();
    }
    assert_eq!(summary.collect().count, 80_000);
}

#[test]
fn series_are_created_once_under_contention() {
    let vec = Arc::new(CounterVec::new(Opts::new("hits", "Hits."), &["shard"]).unwrap());
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let vec = Arc::clone(&vec);
            thread::spawn(move || {
                for i in 0..1000 {
                    vec.with_label_values(&[&(i % 4).to_string()]).inc();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for shard in 0..4 {
        assert_eq!(vec.with_label_values(&[&shard.to_string()]).get(), 4000.0);
    }
}
