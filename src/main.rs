//! Agent Search CLI - Run a search experiment from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use agent_search::{
    engine::{
        EvaluationHarness, ScriptLoader, TaskSet,
        dataset::{load_examples, scorer_for},
        evolution::{DefaultPrompts, Proposer, SearchLoop},
        llm::{Backoff, CommandModel, RetryingModel},
    },
    schema::{ModelConfig, SearchConfig},
};

/// What the binary should do after loading the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Search,
    Evaluate,
    All,
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [search|evaluate|all]", args[0]);
        eprintln!();
        eprintln!("Search for LLM agent architectures from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to experiment configuration file");
        eprintln!("  mode         search, evaluate or all (default: all)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let mode = match args.get(2).map(String::as_str) {
        None | Some("all") => Mode::All,
        Some("search") => Mode::Search,
        Some("evaluate") => Mode::Evaluate,
        Some(other) => {
            eprintln!("Unknown mode '{}', expected search, evaluate or all", other);
            std::process::exit(1);
        }
    };

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: SearchConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {}", e);
        std::process::exit(1);
    }

    // Load benchmark
    let Some(dataset_path) = config.dataset.path.clone() else {
        eprintln!("Config must set dataset.path");
        std::process::exit(1);
    };
    let examples = load_examples(&dataset_path).unwrap_or_else(|e| {
        eprintln!("Error loading dataset: {}", e);
        std::process::exit(1);
    });

    println!("Agent Search");
    println!("============");
    println!("Experiment: {}", config.experiment.expr_name);
    println!("Dataset: {} ({} examples)", dataset_path.display(), examples.len());
    println!(
        "Windows: {} validation, {} test, x{}",
        config.dataset.valid_size, config.dataset.test_size, config.dataset.n_repeat
    );
    println!("Generations: {}", config.generation.n_generation);
    println!();

    let harness = EvaluationHarness::new(
        TaskSet::new(examples, &config.dataset),
        Box::new(ScriptLoader),
        scorer_for(config.evaluation.answer_match),
        Box::new(build_model("agent_model", &config.agent_model)),
        config.evaluation.clone(),
    );
    let proposer = Proposer::new(
        Box::new(build_model("proposer_model", &config.proposer_model)),
        config.generation.proposer_temperature,
    );

    let mut search = SearchLoop::new(config, harness, proposer, Box::new(DefaultPrompts))
        .unwrap_or_else(|e| {
            eprintln!("Error starting search: {}", e);
            std::process::exit(1);
        });

    let start = Instant::now();

    if matches!(mode, Mode::Search | Mode::All) {
        let summary = search
            .run_with_callback(|progress| {
                println!(
                    "  Generation {} (attempt {}): archive={}, best={:.2}%, cells={}",
                    progress.generation,
                    progress.attempts,
                    progress.archive_size,
                    progress.best_performance.unwrap_or(0.0),
                    progress.occupied_cells
                );
            })
            .unwrap_or_else(|e| {
                eprintln!("Search failed: {}", e);
                std::process::exit(1);
            });

        println!();
        println!("Search complete:");
        println!("  Resumed after generation: {}", summary.start_generation);
        println!("  Committed: {}", summary.committed);
        println!("  Abandoned attempts: {}", summary.abandoned);
        println!("  Archive size: {}", summary.archive_size);
        println!(
            "  Best upper bound: {:.2}%",
            summary.best_performance.unwrap_or(0.0)
        );
        println!();
    }

    if matches!(mode, Mode::Evaluate | Mode::All) {
        let summary = search.evaluate_thoroughly().unwrap_or_else(|e| {
            eprintln!("Evaluation failed: {}", e);
            std::process::exit(1);
        });

        println!("Thorough evaluation complete:");
        println!("  Evaluated: {} ({} failed)", summary.evaluated, summary.failed);
        println!("  Results: {} in {}", summary.total, summary.path.display());
        println!();
    }

    println!("Time: {:.2}s", start.elapsed().as_secs_f32());
}

fn build_model(section: &str, config: &ModelConfig) -> RetryingModel<CommandModel> {
    let model = CommandModel::from_command(&config.command).unwrap_or_else(|| {
        eprintln!("Config must set {}.command", section);
        std::process::exit(1);
    });
    RetryingModel::new(model, Backoff::from_config(config))
}

fn print_example_config() {
    let mut config = SearchConfig::default();
    config.dataset.path = Some(PathBuf::from("data/mgsm.jsonl"));
    config.proposer_model.command = vec!["./llm-adapter".to_string(), "--model".to_string(), "proposer".to_string()];
    config.agent_model.command = vec!["./llm-adapter".to_string(), "--model".to_string(), "agent".to_string()];

    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing example config: {}", e);
            std::process::exit(1);
        }
    }
}
