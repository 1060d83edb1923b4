//! Scalewise Simulation Engine CLI
//!
//! Trains or evaluates an autoscaling policy against the simulated pipeline

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scalewise_core::{DecisionPolicy, ScalewiseConfig};
use scalewise_simulation_engine::{
    control::{ControlLoop, EpisodeSummary},
    policies::{StaticPolicy, ThresholdPolicy},
    queue::InMemoryQueues,
    reward::RewardCalculator,
    sarsa::SarsaAgent,
    simulator::PipelineSimulator,
    workload::PhasedWorkload,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyKind {
    Sarsa,
    Static,
    Threshold,
}

#[derive(Parser, Debug)]
#[command(name = "scalewise-sim")]
#[command(about = "Train and compare worker autoscaling policies on a simulated pipeline", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Number of episodes to run
    #[arg(short, long, default_value_t = 50)]
    episodes: usize,

    /// Decision policy
    #[arg(short, long, value_enum, default_value_t = PolicyKind::Sarsa)]
    policy: PolicyKind,

    /// Pending tasks per worker above which the threshold policy scales up
    #[arg(long, default_value_t = 2.0)]
    scale_up_backlog: f64,

    /// Pending tasks per worker below which the threshold policy scales down
    #[arg(long, default_value_t = 0.5)]
    scale_down_backlog: f64,

    /// Agent checkpoint to resume from
    #[arg(long)]
    load_checkpoint: Option<PathBuf>,

    /// Where to write the agent checkpoint after the run
    #[arg(long)]
    save_checkpoint: Option<PathBuf>,

    /// Output JSON file for episode summaries and step telemetry
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn build_policy(args: &Args, config: &ScalewiseConfig) -> Result<Box<dyn DecisionPolicy>> {
    let policy: Box<dyn DecisionPolicy> = match args.policy {
        PolicyKind::Sarsa => Box::new(
            SarsaAgent::new(config.agent.clone()).context("Failed to build SARSA agent")?,
        ),
        PolicyKind::Static => Box::new(StaticPolicy::new()),
        PolicyKind::Threshold => Box::new(ThresholdPolicy::new(
            args.scale_up_backlog,
            args.scale_down_backlog,
            3,
        )),
    };
    Ok(policy)
}

fn print_results(summaries: &[EpisodeSummary]) {
    println!("\n╔══════════════════════════════════════════════════════════╗");
    println!("║  Episode Results                                         ║");
    println!("╚══════════════════════════════════════════════════════════╝\n");

    println!(
        "{:<8} {:>8} {:>12} {:>12} {:>10} {:>12} {:>8}",
        "Episode", "Steps", "Reward", "Completed", "QoS", "Avg Workers", "Scales"
    );
    println!("{}", "-".repeat(78));

    for s in summaries {
        println!(
            "{:<8} {:>8} {:>12.2} {:>7}/{:<4} {:>9.1}% {:>12.2} {:>8}",
            s.episode,
            s.steps,
            s.total_reward,
            s.tasks_completed,
            s.tasks_generated,
            s.qos_rate * 100.0,
            s.mean_active_workers,
            s.scale_actions,
        );
    }

    if let (Some(first), Some(last)) = (summaries.first(), summaries.last()) {
        if summaries.len() > 1 {
            println!("\n{}", "-".repeat(78));
            println!(
                "Reward {:.2} -> {:.2}, QoS {:.1}% -> {:.1}%",
                first.total_reward,
                last.total_reward,
                first.qos_rate * 100.0,
                last.qos_rate * 100.0
            );
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scalewise=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = ScalewiseConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║  Scalewise Simulation Engine                             ║");
    println!("╚══════════════════════════════════════════════════════════╝\n");

    println!("Configuration:");
    println!("  Policy: {:?}", args.policy);
    println!("  Episodes: {}", args.episodes);
    println!(
        "  Workers: {} initial, [{}, {}]",
        config.pool.initial_workers, config.pool.min_workers, config.pool.max_workers
    );
    println!(
        "  Step: {}s, max {} steps, window {}",
        config.simulation.step_duration_secs,
        config.simulation.max_steps,
        config.simulation.observation_window
    );
    println!("  Base arrival rate: {:.2}/s\n", config.workload.base_rate);

    let mut policy = build_policy(&args, &config)?;
    if !policy.is_learning() && (args.load_checkpoint.is_some() || args.save_checkpoint.is_some()) {
        bail!("{} policy has no learned state; checkpoint options require --policy sarsa", policy.name());
    }
    if let Some(path) = &args.load_checkpoint {
        policy
            .load(path)
            .with_context(|| format!("Failed to load checkpoint {}", path.display()))?;
    }

    let workload = PhasedWorkload::from_config(&config.workload, config.simulation.deadline_coefficient)
        .context("Invalid workload configuration")?;
    let mut sim = PipelineSimulator::new(
        config.simulation.clone(),
        config.pool.clone(),
        Box::new(InMemoryQueues::new()),
        Box::new(workload),
    );
    let control = ControlLoop::new(
        RewardCalculator::new(config.reward.clone()),
        config.pool.initial_workers,
    );

    info!(policy = policy.name(), episodes = args.episodes, "starting run");
    let summaries = control
        .train(&mut sim, policy.as_mut(), args.episodes)
        .context("Simulation aborted")?;

    print_results(&summaries);

    if let Some(path) = &args.save_checkpoint {
        policy
            .save(path)
            .with_context(|| format!("Failed to save checkpoint {}", path.display()))?;
        println!("\nCheckpoint saved to {}", path.display());
    }

    if let Some(path) = &args.output {
        println!("\nWriting results to {}...", path.display());
        let json = serde_json::to_string_pretty(&summaries)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  Results saved");
    }

    println!("\n✅ Simulation complete!\n");
    Ok(())
}
