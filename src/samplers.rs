use async_stream::try_stream;
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use vigil_core::{AttributePath, AttributeValue, CoreError};
use vigil_sdk::{ProducerHandle, SdkError};

/// One observation from a sampler.
#[derive(Clone, Debug)]
pub enum Sample {
    Set(AttributePath, AttributeValue),
    Gone(AttributePath),
}

fn attr(segments: &[&str]) -> Result<AttributePath, CoreError> {
    segments
        .iter()
        .try_fold(AttributePath::root(), |path, key| path.child(key))
}

/// Host facts: the boot timestamp once, then uptime every `period`.
pub fn host(ticks: usize, period: Duration) -> impl Stream<Item = Result<Sample, CoreError>> {
    try_stream! {
        let booted = Instant::now();
        yield Sample::Set(attr(&["host", "boot_time"])?, Utc::now().to_rfc3339().into());
        yield Sample::Set(attr(&["host", "name"])?, "vigil-demo".into());
        for _ in 0..ticks {
            tokio::time::sleep(period).await;
            yield Sample::Set(attr(&["uptime"])?, booted.elapsed().into());
        }
    }
}

/// Per-core load in percent plus a fixed model string per core.
pub fn cpu_load(
    cpus: usize,
    ticks: usize,
    period: Duration,
) -> impl Stream<Item = Result<Sample, CoreError>> {
    try_stream! {
        let mut rng = StdRng::from_entropy();
        for cpu in 0..cpus {
            let model = if cpu % 2 == 0 { "x86" } else { "arm" };
            yield Sample::Set(attr(&["cpu", &cpu.to_string(), "model"])?, model.into());
        }
        for _ in 0..ticks {
            for cpu in 0..cpus {
                let load: f64 = rng.gen_range(0.0..100.0);
                yield Sample::Set(attr(&["cpu", &cpu.to_string(), "load"])?, load.into());
            }
            tokio::time::sleep(period).await;
        }
    }
}

/// Memory usage as a bounded random walk around half of `total`.
pub fn memory(total: u64, ticks: usize, period: Duration) -> impl Stream<Item = Result<Sample, CoreError>> {
    let total = i64::try_from(total).unwrap_or(i64::MAX);
    try_stream! {
        let mut rng = StdRng::from_entropy();
        let mut used = total / 2;
        yield Sample::Set(attr(&["memory", "total"])?, total.into());
        for _ in 0..ticks {
            tokio::time::sleep(period).await;
            let step = (total / 20).max(1);
            used = (used + rng.gen_range(-step..=step)).clamp(0, total);
            yield Sample::Set(attr(&["memory", "usage"])?, used.into());
        }
    }
}

const PROGRAMS: &[&str] = &["sshd", "cron", "nginx", "postgres", "redis", "worker"];

/// A process table where processes start and exit at random.
pub fn processes(ticks: usize, period: Duration) -> impl Stream<Item = Result<Sample, CoreError>> {
    try_stream! {
        let mut rng = StdRng::from_entropy();
        let mut running: BTreeMap<u32, &str> = BTreeMap::new();
        let mut next_pid = 100u32;

        for _ in 0..ticks {
            tokio::time::sleep(period).await;
            let exit = !running.is_empty() && rng.gen_bool(0.4);
            if exit {
                let pids: Vec<u32> = running.keys().copied().collect();
                if let Some(&pid) = pids.choose(&mut rng) {
                    running.remove(&pid);
                    yield Sample::Gone(attr(&["proc", &pid.to_string()])?);
                }
            } else {
                let name = PROGRAMS.choose(&mut rng).copied().unwrap_or("worker");
                let pid = next_pid;
                next_pid += rng.gen_range(1..50);
                running.insert(pid, name);
                let key = pid.to_string();
                yield Sample::Set(attr(&["proc", &key, "name"])?, name.into());
                yield Sample::Set(attr(&["proc", &key, "started"])?, Utc::now().to_rfc3339().into());
            }
        }
    }
}

/// Submit every sample to the producer. Returns the number submitted.
pub async fn feed<S>(producer: ProducerHandle, samples: S) -> Result<usize, SdkError>
where
    S: Stream<Item = Result<Sample, CoreError>>,
{
    let mut samples = Box::pin(samples);
    let mut submitted = 0;
    while let Some(sample) = samples.next().await {
        match sample? {
            Sample::Set(path, value) => producer.upsert(&path, value).await?,
            Sample::Gone(path) => producer.remove(&path).await?,
        };
        submitted += 1;
    }
    Ok(submitted)
}
