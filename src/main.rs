use node_harness::config::HarnessConfig;
use node_harness::launcher::{close_session, Launcher};
use node_harness::logger::{self, Role};
use node_harness::{run_scenario, HarnessContext, HarnessError};
use std::path::Path;
use std::process::ExitCode;

const DEFAULT_CONFIG: &str = "config/harness.yaml";

/// Entry point: `node_harness [node|launch] [config.yaml]`, launching by default
#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("node_harness");
    let mode = args.get(1).map(String::as_str).unwrap_or("launch");
    let config_path = match args.get(2) {
        Some(path) => path.as_str(),
        None => {
            eprintln!(
                "[\x1b[33mWARN\x1b[0m node_harness] Usage: {} <node|launch> <config.yaml>.",
                program
            );
            eprintln!("[\x1b[33mWARN\x1b[0m node_harness] Loading default configuration: {DEFAULT_CONFIG}");
            DEFAULT_CONFIG
        }
    };
    let result = match mode {
        "node" => run_node(config_path).await,
        "launch" => run_launcher(config_path).await,
        other => Err(HarnessError::InvalidConfig(format!(
            "unknown mode {other:?}, expected \"node\" or \"launch\""
        ))),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            // No-op when the mode already installed its logger.
            logger::init(Role::Launcher);
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(config_path: &str) -> Result<HarnessConfig, HarnessError> {
    let mut config = HarnessConfig::from_yaml(config_path)?;
    config.apply_env()?;
    Ok(config)
}

async fn run_node(config_path: &str) -> Result<ExitCode, HarnessError> {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            logger::init(Role::Node(HarnessConfig::node_id_from_env()));
            return Err(e);
        }
    };
    logger::init(Role::Node(Some(config.node_id)));
    let context = HarnessContext::from_config(&config)?;
    for line in run_scenario(&context).await? {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_launcher(config_path: &str) -> Result<ExitCode, HarnessError> {
    logger::init(Role::Launcher);
    let config = load_config(config_path)?;
    log::info!(
        "Launching {} nodes running {:?}",
        config.participant_count,
        config.scenario
    );
    let launcher = Launcher::current_exe(Path::new(config_path))?;
    tokio::select! {
        outputs = launcher.launch(&config) => {
            outputs?;
            Ok(ExitCode::SUCCESS)
        }
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupt received at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f"));
            if !config.keep_work_dir {
                close_session(&config.work_dir);
            }
            Ok(ExitCode::from(130))
        }
    }
}
