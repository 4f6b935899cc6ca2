use design_oracle::{
    Activation, DesignDataset, FitConfig, FullyConnectedOracle,
};
use tempfile::TempDir;

fn synthetic_continuous(n: usize, width: usize) -> DesignDataset {
    let mut x = Vec::with_capacity(n * width);
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let mut sum = 0.0_f32;
        for j in 0..width {
            let v = ((i * 7 + j * 13) % 29) as f32 / 29.0 - 0.5;
            x.push(v);
            sum += v * (j as f32 + 1.0);
        }
        y.push(sum);
    }
    DesignDataset::continuous(x, y, vec![width]).unwrap()
}

fn synthetic_logits(n: usize, seq_len: usize, num_classes: usize) -> DesignDataset {
    let mut x = Vec::with_capacity(n * seq_len * num_classes);
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let mut score = 0.0_f32;
        for l in 0..seq_len {
            let hot = (i * 5 + l * 3) % num_classes;
            score += hot as f32;
            for c in 0..num_classes {
                x.push(if c == hot { 0.9 } else { 0.05 });
            }
        }
        y.push(score);
    }
    DesignDataset::categorical(x, y, vec![seq_len, num_classes], num_classes, true).unwrap()
}

#[test]
fn fit_synthetic_continuous_end_to_end() {
    // 100 designs of width 8, one hidden block, a single epoch.
    let dataset = synthetic_continuous(100, 8);
    assert!(FullyConnectedOracle::check_input_format(&dataset));

    let mut oracle = FullyConnectedOracle::new(&dataset, 0.0, 32).unwrap();
    let rho = oracle
        .fit(
            &dataset,
            &FitConfig {
                hidden_size: 32,
                num_layers: 1,
                epochs: 1,
                ..Default::default()
            },
        )
        .unwrap();

    assert!((-1.0..=1.0).contains(&rho));
    assert!(oracle.fitted().is_some());

    // One scalar per design, in input order.
    let inputs = oracle.dataset_to_oracle_x(dataset.x()).unwrap();
    let predictions = oracle.predict(&inputs).unwrap();
    assert_eq!(predictions.len(), dataset.len());
    assert!(predictions.iter().all(|p| p.is_finite()));
}

#[test]
fn trained_oracle_survives_an_archive_round_trip() {
    let dataset = synthetic_continuous(80, 4);
    let mut oracle = FullyConnectedOracle::new(&dataset, 0.0, 16).unwrap();
    oracle
        .fit(
            &dataset,
            &FitConfig {
                hidden_size: 16,
                num_layers: 2,
                epochs: 3,
                learning_rate: 1e-2,
                ..Default::default()
            },
        )
        .unwrap();

    let inputs = oracle.dataset_to_oracle_x(dataset.x()).unwrap();
    let before = oracle.predict(&inputs).unwrap();
    let rho = oracle.rank_correlation().unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("oracle.zip");
    oracle.save_path(&path).unwrap();

    let mut reloaded = FullyConnectedOracle::new(&dataset, 0.0, 16).unwrap();
    assert!(reloaded.fitted().is_none());
    reloaded.load_path(&path).unwrap();

    // Bit-identical predictions and the exact stored correlation.
    assert_eq!(reloaded.predict(&inputs).unwrap(), before);
    assert_eq!(reloaded.rank_correlation(), Some(rho));
}

#[test]
fn logit_encoded_designs_drop_the_trailing_class_axis() {
    let dataset = synthetic_logits(40, 5, 4);
    assert_eq!(dataset.input_shape(), &[5, 4]);
    assert!(FullyConnectedOracle::check_input_format(&dataset));

    let mut oracle = FullyConnectedOracle::new(&dataset, 0.0, 8).unwrap();
    oracle
        .fit(
            &dataset,
            &FitConfig {
                hidden_size: 8,
                activation: Activation::Tanh,
                num_layers: 1,
                epochs: 1,
                learning_rate: 1e-2,
                ..Default::default()
            },
        )
        .unwrap();

    // The model consumes sequences of 5 class indices, not 5 * 4 features.
    let model = oracle.fitted().unwrap().model();
    assert!(model.is_categorical());
    assert_eq!(model.input_len(), 5);

    let indices = oracle.dataset_to_oracle_x(dataset.x()).unwrap();
    assert_eq!(indices.len(), dataset.len() * 5);
    let predictions = oracle.predict(&indices).unwrap();
    assert_eq!(predictions.len(), dataset.len());
}

#[test]
fn predict_requires_a_fitted_or_loaded_model() {
    let dataset = synthetic_continuous(20, 3);
    let oracle = FullyConnectedOracle::new(&dataset, 0.0, 8).unwrap();
    assert!(oracle.predict(&[0.0; 3]).is_err());
    assert!(oracle.save_path("/nonexistent/should-not-be-created.zip").is_err());
}
