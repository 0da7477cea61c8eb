use std::{sync::Arc, time::Duration};

use clap::Parser;
use repset_engine::{
    ExerciseId, GatewayError, InMemoryGateway, RecordedCall, SessionController, SetDraft,
    WorkoutApi, WriteMode,
};

mod config;

#[derive(Parser)]
#[command(
    name = "repset-cli",
    about = "Drive a simulated workout session against the auto-save engine"
)]
struct Opts {
    /// Preset group to start the session from
    #[arg(long, default_value = "pg-demo")]
    preset_group: String,
    /// Record on behalf of this athlete instead of the acting user
    #[arg(long)]
    athlete: Option<String>,
    /// Number of exercises to record
    #[arg(long, default_value_t = 2)]
    exercises: u32,
    /// Sets per exercise
    #[arg(long, default_value_t = 3)]
    sets: u32,
    /// Debounce override in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,
    /// Fail this many gateway calls during recording, then recover
    #[arg(long, default_value_t = 0)]
    inject_failures: usize,
    /// Log at debug level
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::from_filename(".env.local").ok();

    let opts = Opts::parse();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if opts.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = config::read_config()?;
    let mut autosave = settings.autosave_config();
    if let Some(debounce_ms) = opts.debounce_ms {
        autosave.debounce = Duration::from_millis(debounce_ms);
    }
    tracing::debug!(
        debounce_ms = autosave.debounce.as_millis() as u64,
        max_retries = autosave.max_retries,
        "effective autosave config"
    );

    let gateway = Arc::new(InMemoryGateway::new());
    let (api, mut failures) = WorkoutApi::new(Arc::clone(&gateway), autosave);
    let mut controller = SessionController::new(api, opts.preset_group.as_str());
    if let Some(athlete) = &opts.athlete {
        controller = controller.with_athlete(athlete.as_str());
    }

    controller
        .start_session()
        .await
        .map_err(|e| anyhow::anyhow!("could not start session: {e}"))?;
    let session_id = controller.session().expect("session just started").id.clone();
    println!("session {session_id} started ({})", controller.status());

    if opts.inject_failures > 0 {
        gateway.script_failures(
            opts.inject_failures,
            GatewayError::Unavailable("injected outage".into()),
        );
        println!("injected {} transient gateway failures", opts.inject_failures);
    }

    // two rapid edits per set, so the queue has something to coalesce
    for exercise in 1..=opts.exercises {
        let exercise_id = ExerciseId::from(format!("ex{exercise}"));
        for set in 1..=opts.sets {
            let rough = SetDraft::new(set).with_reps(8);
            let corrected = SetDraft::new(set)
                .with_reps(8 + set)
                .with_weight(60.0 + f64::from(exercise) * 2.5)
                .with_duration(45.0)
                .with_completed(true);

            controller
                .api()
                .record_set(&session_id, &exercise_id, rough, WriteMode::Queued)
                .await?;
            controller
                .api()
                .record_set(&session_id, &exercise_id, corrected, WriteMode::Queued)
                .await?;
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!(
        "queued writes pending: {} (saving: {})",
        controller.pending_saves().await,
        controller.is_saving().await
    );

    println!("checkpoint save...");
    let mut attempts = 0;
    while controller.save_session().await.is_err() {
        attempts += 1;
        if attempts >= 5 {
            anyhow::bail!("could not deliver queued writes");
        }
        println!(
            "save incomplete ({}), retrying...",
            controller.last_error().unwrap_or("unknown error")
        );
    }

    let mut dropped = 0;
    while let Ok(failure) = failures.try_recv() {
        dropped += 1;
        println!(
            "dropped write {} after {} attempts: {}",
            failure.key, failure.attempts, failure.error
        );
    }
    if dropped == 0 {
        println!("all queued writes delivered");
    } else {
        println!("queue flushed with {dropped} writes abandoned");
    }

    controller
        .complete_session(Some("demo session".into()))
        .await
        .map_err(|e| anyhow::anyhow!("could not complete session: {e}"))?;
    println!("session completed ({})", controller.status());

    let record_calls = gateway
        .calls()
        .iter()
        .filter(|call| matches!(call, RecordedCall::AddSetRecord { .. }))
        .count();
    println!(
        "{} set edits coalesced into {} gateway writes; {} details stored",
        opts.exercises * opts.sets * 2,
        record_calls,
        controller.details().len()
    );
    if let Some(at) = controller.last_save_time().await {
        println!("last successful save at {at}");
    }

    Ok(())
}
