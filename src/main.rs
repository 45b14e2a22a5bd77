use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use tracing::info;
use umarell::{
    logging, Broker, PersistOption, PropertyBag, PropertyObserver, Settings, Subscriber, Value,
};

const DEFAULT_CHANNEL: &str = "My channel name";
const TIMER_PROPERTY: &str = "timerValue";
const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// Walks through the broker: observes a ticking counter property, then
/// publishes a few messages on a channel.
#[derive(Debug, Parser)]
#[command(name = "umarell", version, long_version = LONG_VERSION)]
struct Cli {
    /// Settings file (TOML, YAML or JSON).
    #[arg(short, long, env = "UMARELL_CONFIG")]
    config: Option<PathBuf>,

    /// Counter increments to observe.
    #[arg(long, default_value_t = 5)]
    ticks: u32,

    /// Delay between increments, in milliseconds.
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,

    /// Messages to publish on the channel.
    #[arg(long, default_value_t = 3)]
    messages: u32,

    #[arg(long, default_value = DEFAULT_CHANNEL)]
    channel: String,

    /// Keep the last message in the durable tier.
    #[arg(long)]
    durable: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(cli.config.as_deref()).context("loading settings")?;
    let logging = logging::init_logging(settings.logging.clone())?;

    let broker = Arc::new(Broker::from_config(&settings.storage).context("opening storage")?);
    let _ = Broker::install_shared(broker.clone());

    if let Some(previous) = broker.last_value(&cli.channel) {
        info!(channel = %cli.channel, ?previous, "Last message from a previous run");
    }

    let me = Subscriber::named("demo");
    observe_counter(&broker, &me, cli.ticks, Duration::from_millis(cli.interval_ms))?;
    publish_messages(&broker, &me, &cli.channel, cli.messages, cli.durable);

    info!(metrics = ?broker.metrics().snapshot(), "Demo finished");
    logging.shutdown();
    Ok(())
}

fn observe_counter(
    broker: &Arc<Broker>,
    me: &Subscriber,
    ticks: u32,
    interval: Duration,
) -> anyhow::Result<()> {
    let observer = PropertyObserver::new(broker.clone());
    let counter = Arc::new(PropertyBag::with_properties([(TIMER_PROPERTY, Value::Int(0))]));

    observer.observe(&counter, TIMER_PROPERTY, me, |value, property| {
        info!(property, ?value, "Observed property value");
    })?;

    let ticker = {
        let counter = counter.clone();
        thread::spawn(move || {
            for tick in 1..=ticks {
                thread::sleep(interval);
                counter.set(TIMER_PROPERTY, i64::from(tick));
            }
        })
    };
    ticker
        .join()
        .map_err(|_| anyhow::anyhow!("ticker thread panicked"))?;

    observer.stop_observing_all(&counter, me);
    Ok(())
}

fn publish_messages(
    broker: &Broker,
    me: &Subscriber,
    channel: &str,
    count: u32,
    durable: bool,
) {
    broker.subscribe(channel, me, |value| {
        info!(?value, "Observed channel value");
    });

    let option = if durable {
        PersistOption::Durable
    } else {
        PersistOption::None
    };
    let mut rng = rand::thread_rng();
    for _ in 0..count {
        let message = format!("Channel message - {}", rng.gen_range(0..1000));
        broker.publish_with(channel, message, option);
    }

    broker.unsubscribe(channel, me);
}
