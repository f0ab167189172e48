use ptycho_core::synthetic::{
    add_shot_noise, formulated_initial_object, random_complex_image, raster_scan,
    simulate_measurements,
};
use ptycho_core::{wf_recon, ErrorTrace, FftNorm, FourierOps, ReconConfig, ReconInputs};
use std::time::Instant;

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse::<T>().ok())
        .unwrap_or(default)
}

fn print_trace(label: &str, trace: &ErrorTrace<f32>, every: usize) {
    for (k, value) in trace.entries().iter().enumerate() {
        if k % every == 0 || k + 1 == trace.len() {
            match value {
                Some(v) => println!("  {} iter={:4} {:.6e}", label, k, v),
                None => println!("  {} iter={:4} n/a", label, k),
            }
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let image = parse_arg(&args, "--image", 128usize);
    let patch = parse_arg(&args, "--patch", 32usize);
    let stride = parse_arg(&args, "--stride", 8usize);
    let num_iter = parse_arg(&args, "--iters", 100usize);
    let photons = parse_arg(&args, "--photons", 0.0f64);
    let joint = parse_arg(&args, "--joint", false);
    let seed = parse_arg(&args, "--seed", 7u64);

    println!(
        "synthetic recon image={} patch={} stride={} iters={} photons={} joint={} seed={}",
        image, patch, stride, num_iter, photons, joint, seed
    );

    let truth = random_complex_image::<f32>((image, image), (0.6, 1.0), 1.5, seed)
        .expect("object sampling failed");
    let probe = random_complex_image::<f32>((patch, patch), (0.8, 1.0), 3.0, seed + 1)
        .expect("probe sampling failed");
    let bounds =
        raster_scan((image, image), (patch, patch), (stride, stride)).expect("scan failed");
    let clean = simulate_measurements(truth.view(), probe.view(), &bounds, FftNorm::Ortho, false)
        .expect("simulation failed");
    let meas = if photons > 0.0 {
        add_shot_noise(clean.view(), photons, seed + 2).expect("noise failed")
    } else {
        clean
    };

    let ops = FourierOps::<f32>::new((patch, patch), FftNorm::Ortho, false);
    let init = formulated_initial_object(meas.view(), &bounds, (image, image), probe.view(), &ops)
        .expect("initial guess failed");
    println!("scan positions={}", bounds.len());

    for accel in [false, true] {
        let config = ReconConfig::<f32> {
            num_iter,
            accel,
            joint_recon: joint,
            ..ReconConfig::default()
        };
        let approach = config.approach();
        let inputs = ReconInputs::new(meas.view(), &bounds, init.view(), probe.view())
            .with_ref_object(truth.view())
            .with_ref_probe(probe.view());

        let t0 = Instant::now();
        let result = wf_recon(inputs, config).expect("reconstruction failed");
        let elapsed = t0.elapsed();

        println!(
            "{} done iterations={} elapsed_s={:.3}",
            approach,
            result.iterations,
            elapsed.as_secs_f64()
        );
        let every = (num_iter / 10).max(1);
        print_trace("err_obj ", &result.err_obj, every);
        print_trace("err_meas", &result.err_meas, every);
        if joint {
            print_trace("err_prb ", &result.err_probe, every);
        }
    }
}
