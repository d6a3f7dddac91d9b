use clap::Parser;

use gradflow::core::landscape::LossFunction;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path to config TOML
    #[arg(long, default_value = "gradflow.toml")]
    pub config: String,

    /// Loss landscape (rastrigin, ackley, himmelblau; overrides config)
    #[arg(long)]
    pub landscape: Option<LossFunction>,

    /// Run length in seconds (overrides config)
    #[arg(long)]
    pub duration: Option<f32>,

    /// RNG seed (overrides config)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write audio to wav file
    #[arg(long)]
    pub wav: Option<String>,

    /// Write a JSON run summary
    #[arg(long)]
    pub stats_json: Option<String>,

    /// Run without sonification
    #[arg(long, default_value_t = false)]
    pub mute: bool,

    /// Hold a spawn pointer at x,y for the whole run
    #[arg(long, value_parser = parse_point)]
    pub pointer: Option<(f64, f64)>,
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got {s:?}"))?;
    let x = x.trim().parse::<f64>().map_err(|e| format!("x: {e}"))?;
    let y = y.trim().parse::<f64>().map_err(|e| format!("y: {e}"))?;
    Ok((x, y))
}
