use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vigil_sdk::prelude::*;
use vigil_sdk::{Change, MemoryTransport, NetworkError, SessionConfigBuilder};

pub mod samplers;
use samplers::{cpu_load, feed, host, memory, processes};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Synthetic host monitored through a mirrored attribute namespace")]
#[command(version)]
struct Cli {
    /// Samples taken by each sampler
    #[arg(long, default_value_t = 20)]
    ticks: usize,
    /// Sampling period in milliseconds
    #[arg(long, default_value_t = 100)]
    period_ms: u64,
    /// Number of simulated cores
    #[arg(long, default_value_t = 4)]
    cpus: usize,
    /// Simulated memory size in GiB
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u64).range(1..=65536))]
    memory_gib: u64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("VIGIL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main(cli))?;
    Ok(())
}

const BANNER_WIDTH: usize = 60;

/// A boxed, centered title.
fn banner(title: &str) -> String {
    let rule = "═".repeat(BANNER_WIDTH);
    format!(
        "╔{rule}╗\n║{title:^width$}║\n╚{rule}╝",
        rule = rule,
        title = title,
        width = BANNER_WIDTH
    )
}

fn print_notification(label: &'static str) -> impl Fn(&Notification) + Send + Sync + 'static {
    move |n: &Notification| {
        let marker = match n.change {
            Change::Added => "+".green(),
            Change::Updated => "~".yellow(),
            Change::Removed => "-".red(),
        };
        println!("  [{}] {} {} = {} (v{})", label, marker, n.path, n.value, n.version);
    }
}

async fn async_main(cli: Cli) -> Result<(), SdkError> {
    let period = Duration::from_millis(cli.period_ms);
    println!("\n{}", banner("VIGIL MONITORING DEMO"));

    // Producer side: the monitored host.
    let host_transport = MemoryTransport::new(PeerId::new("host"));
    let viewer_transport = MemoryTransport::new(PeerId::new("viewer"));
    host_transport.connect_to(&viewer_transport);
    info!(routes = ?host_transport.routes(), "host transport ready");

    let host_inbox = host_transport
        .subscribe()
        .ok_or(NetworkError::Disconnected)?;
    let viewer_inbox = viewer_transport
        .subscribe()
        .ok_or(NetworkError::Disconnected)?;

    let (producer, producer_task) = Producer::spawn(ProducerConfig::default());
    let sync = Arc::new(SyncManager::new(
        Arc::new(host_transport),
        producer.clone(),
        SyncConfig::default(),
    ));
    let (shutdown, stopped) = watch::channel(false);
    let sync_task = {
        let sync = sync.clone();
        let stopped = stopped.clone();
        tokio::spawn(async move { sync.run(host_inbox, stopped).await })
    };

    // Consumer side: a viewer mirroring the host.
    let config = SessionConfigBuilder::new()
        .name("dashboard")
        .producer(PeerId::new("host"))
        .build();
    let session = Arc::new(Session::new(config, Arc::new(viewer_transport)));
    let session_task = {
        let session = session.clone();
        let stopped = stopped.clone();
        tokio::spawn(async move { session.run(viewer_inbox, stopped).await })
    };

    let usage = session.watch(
        "/memory/usage".parse()?,
        DeliveryPolicy::Interval(Duration::from_millis(500)),
        print_notification("memory"),
    )?;
    session.watch(
        "/proc/_/name".parse()?,
        DeliveryPolicy::Push,
        print_notification("proc"),
    )?;
    session.watch(
        "/cpu/_/model".parse()?,
        DeliveryPolicy::Interval(Duration::from_secs(1)),
        print_notification("cpu"),
    )?;
    println!(
        "\n/memory/usage before the first sample: {}",
        format!("{:?}", session.subscriptions().state(usage)).dimmed()
    );

    let scheduler = Scheduler::spawn(session.subscriptions().clone(), Duration::from_millis(50));
    session.connect().await?;

    println!("\n[Phase 1/2] Sampling...");
    let samplers = vec![
        tokio::spawn(feed(producer.clone(), host(cli.ticks, period))),
        tokio::spawn(feed(producer.clone(), cpu_load(cli.cpus, cli.ticks, period))),
        tokio::spawn(feed(producer.clone(), memory(cli.memory_gib << 30, cli.ticks, period))),
        tokio::spawn(feed(producer.clone(), processes(cli.ticks, period))),
    ];
    let mut submitted = 0;
    for sampler in samplers {
        match sampler.await {
            Ok(Ok(count)) => submitted += count,
            Ok(Err(err)) => warn!(error = %err, "sampler failed"),
            Err(err) => warn!(error = %err, "sampler panicked"),
        }
    }
    info!(submitted, version = producer.version(), "sampling finished");

    println!("[Phase 2/2] Waiting for the viewer to catch up...");
    for _ in 0..50 {
        if session.mirror().version() >= producer.version() {
            break;
        }
        tokio::time::sleep(period).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    println!("\n{}", banner("Mirror Contents"));
    for pattern in ["/host/_", "/uptime", "/cpu/_/_", "/memory/_", "/proc/_/name"] {
        for resolved in session.resolve(&pattern.parse()?) {
            println!("  {:<24} {}", resolved.path.to_string().cyan(), resolved.value);
        }
    }
    println!(
        "\n  producer v{} (horizon {}), viewer v{}, acked v{}",
        producer.version(),
        producer.horizon(),
        session.mirror().version(),
        sync.acked(&PeerId::new("viewer")),
    );

    scheduler.stop().await;
    if let Err(err) = session.close().await {
        warn!(error = %err, "failed to say goodbye");
    }
    let _ = shutdown.send(true);
    let _ = session_task.await;
    if let Ok(Err(err)) = sync_task.await {
        warn!(error = %err, "sync manager failed");
    }
    drop(producer);
    drop(sync);
    let _ = producer_task.await;

    println!("\n{}", "✓ Demo completed".green().bold());
    Ok(())
}
