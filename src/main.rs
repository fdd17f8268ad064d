use std::env;
use std::process;

use log::error;
use rand::SeedableRng;
use rand::rngs::StdRng;
use scalar_mlp::data;
use scalar_mlp::{AppConfig, MLP, MlpError, Trainer};

const SAMPLES: usize = 64;
const NOISE: f64 = 0.05;

fn run() -> Result<(), MlpError> {
    // optional JSON config path, defaults otherwise
    let config = match env::args().nth(1) {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let mut rng = match config.training.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let dataset = data::generate(SAMPLES, config.network.input_size, NOISE, &mut rng);
    let mut mlp = MLP::with_rng(&config.network, &mut rng)?;
    let trainer = Trainer::new(config.training.clone())?;

    println!("Starting training...");
    let reports = trainer.fit(&mut mlp, &dataset, &mut rng)?;
    for report in &reports {
        if report.epoch % 50 == 0 || report.epoch == 1 || report.epoch == reports.len() {
            println!("Epoch {:3} | Loss: {:.6}", report.epoch, report.mean_loss());
        }
    }

    println!("\nLearned function:");
    for (x, y) in data::sample_curve(&mut mlp, 11)? {
        println!(
            "x: {:5.1} | true: {:.4} | pred: {:.4}",
            x,
            data::true_function(x),
            y
        );
    }

    println!("\nLayer outputs at x = {}:", data::DOMAIN_MAX);
    for (i, values) in mlp.layer_output_values().iter().enumerate() {
        println!("layer_{i}: {values:.4?}");
    }

    println!(
        "\nNetwork snapshot:\n{}",
        serde_json::to_string_pretty(&mlp.snapshot())?
    );

    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(err) = run() {
        error!("{err}");
        eprintln!("error: {err}");
        process::exit(1);
    }
}
