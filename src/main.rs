use std::{env, fs};

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};

use optvis::{LayerFilter, RenderSpec, arch::MiniInception, get_layer_repr, render_vis};

const DEFAULT_OBJECTIVE: &str = "features->mixed3a:3";
const DEFAULT_SEED: u64 = 0;
const DEFAULT_SPEC: &str = r#"{
    "thresholds": [16, 64],
    "seed": 0,
    "param": { "width": 32, "height": 32 }
}"#;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let objective = env::var("OBJECTIVE").unwrap_or_else(|_| DEFAULT_OBJECTIVE.to_string());
    let seed = match env::var("MODEL_SEED") {
        Ok(seed) => seed.parse()?,
        Err(_) => DEFAULT_SEED,
    };
    let spec = match env::var("RENDER_CONFIG") {
        Ok(path) => fs::read_to_string(path)?,
        Err(_) => DEFAULT_SPEC.to_string(),
    };

    let options = RenderSpec::from_json(&spec)?.into_options()?;
    let mut model = MiniInception::new(&mut StdRng::seed_from_u64(seed))?;

    for (name, repr) in get_layer_repr(&model, &LayerFilter::default()) {
        debug!("layer {name}: {repr}");
    }

    info!("rendering {objective}");
    let images = render_vis(&mut model, objective.as_str(), options)?;

    for (i, image) in images.iter().enumerate() {
        let (min, max) = image
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = image.mean().unwrap_or(0.);

        info!(
            "checkpoint {i}: shape={:?} min={min:.4} max={max:.4} mean={mean:.4}",
            image.shape()
        );
    }

    Ok(())
}
