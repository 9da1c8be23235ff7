use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::ValueEnum;
use herald_messaging::{
    payload, BusConfig, MessageBus, Payload, Remaining, Timeout, Value, WaitOutcome,
};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Handlers run once per send, in registration order
    Ping,
    /// A wait with nobody sending times out
    Ready,
    /// A send from another thread wakes an untimed waiter
    Go,
    /// Save handlers fill a table passed by reference
    Save,
}

type Transcript = Arc<Mutex<Vec<String>>>;

fn push(transcript: &Transcript, line: impl Into<String>) {
    if let Ok(mut lines) = transcript.lock() {
        lines.push(line.into());
    }
}

fn lines(transcript: &Transcript) -> Vec<String> {
    transcript.lock().map(|l| l.clone()).unwrap_or_default()
}

/// Render an outcome the way a script would see it: `(remaining, args...)` or `none`
pub fn describe(outcome: &WaitOutcome) -> String {
    match outcome {
        WaitOutcome::Received { remaining, payload } => {
            let mut parts = vec![match remaining {
                Remaining::Unbounded => "true".to_string(),
                Remaining::Left(left) => format!("{}ms", left.as_millis()),
            }];
            parts.extend(payload.iter().map(|v| format!("{:?}", v)));
            format!("({})", parts.join(", "))
        }
        WaitOutcome::TimedOut => "none".to_string(),
        WaitOutcome::Cancelled => "cancelled".to_string(),
    }
}

pub async fn run(scenario: Scenario, config: &BusConfig) -> anyhow::Result<Vec<String>> {
    let bus = MessageBus::with_config(config.clone());
    info!(target: "herald", "Running scenario {:?}", scenario);

    let result = match scenario {
        Scenario::Ping => ping(&bus),
        Scenario::Ready => ready(&bus).await,
        Scenario::Go => go(&bus).await,
        Scenario::Save => save(&bus),
    };

    bus.shutdown();
    result
}

fn ping(bus: &MessageBus) -> anyhow::Result<Vec<String>> {
    let transcript = Transcript::default();

    let a = Arc::clone(&transcript);
    bus.on_message_labeled("Ping", "A", move |_| {
        push(&a, "A");
        Ok(())
    })?;
    bus.send("Ping", payload![])?;

    let b = Arc::clone(&transcript);
    bus.on_message_labeled("Ping", "B", move |_| {
        push(&b, "B");
        Ok(())
    })?;
    bus.send("Ping", payload![])?;

    Ok(lines(&transcript))
}

async fn ready(bus: &MessageBus) -> anyhow::Result<Vec<String>> {
    let outcome = bus.wait("Ready", Timeout::from_millis(100)).await?;
    Ok(vec![format!("Ready -> {}", describe(&outcome))])
}

async fn go(bus: &MessageBus) -> anyhow::Result<Vec<String>> {
    let pending = bus.enqueue_wait("Go", Timeout::Never)?;
    let waiter = tokio::spawn(pending);

    let sender = bus.clone();
    std::thread::spawn(move || sender.send("Go", payload![42]))
        .join()
        .map_err(|_| anyhow!("sender thread panicked"))??;

    let outcome = waiter.await.context("waiter task failed")??;
    Ok(vec![format!("Go -> {}", describe(&outcome))])
}

fn save(bus: &MessageBus) -> anyhow::Result<Vec<String>> {
    type SaveTable = Mutex<BTreeMap<String, i64>>;

    fn save_table(args: &Payload) -> anyhow::Result<Arc<SaveTable>> {
        args.get(0)
            .and_then(Value::downcast::<SaveTable>)
            .ok_or_else(|| anyhow!("SaveData expects a table argument"))
    }

    bus.on_message_labeled("SaveData", "inventory", |args| {
        let table = save_table(args)?;
        let mut table = table.lock().map_err(|_| anyhow!("save table poisoned"))?;
        table.insert("gold".to_string(), 120);
        Ok(())
    })?;
    bus.on_message_labeled("SaveData", "progress", |args| {
        let table = save_table(args)?;
        let mut table = table.lock().map_err(|_| anyhow!("save table poisoned"))?;
        table.insert("level".to_string(), 4);
        Ok(())
    })?;

    let table: Arc<SaveTable> = Arc::default();
    let report = bus.send("SaveData", payload![Value::from_arc(Arc::clone(&table))])?;

    let saved = table.lock().map_err(|_| anyhow!("save table poisoned"))?;
    let mut out: Vec<String> = saved.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
    out.push(format!(
        "{} handler(s), {} failure(s)",
        report.handlers_run,
        report.failures.len()
    ));
    Ok(out)
}

/// How long the longest scenario can take; used to bound a run
pub const SCENARIO_LIMIT: Duration = Duration::from_secs(5);
