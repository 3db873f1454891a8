use agriyield::config::AppConfig;
use agriyield::vector::{FeatureName, schema};
use agriyield::{
    Estimator, FeatureMismatch, FeatureVector, InMemoryStore, ModelArtifact, ModelEstimator,
    ObservationInput, ObservationStore, PredictionError, PredictionService,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const TWO_FEATURE_ARTIFACT: &str = r#"
description = "two-feature test model"
feature_names = ["A", "B"]

[production]
intercept = 0.0
coefficients = [1.0, 1.0]

[yield]
intercept = 0.0
coefficients = [0.5, 0.0]

[price]
intercept = 100.0
coefficients = [0.0, 2.0]
link = "identity"
"#;

fn kenya_maize() -> ObservationInput {
    ObservationInput {
        country: Some("Kenya".to_string()),
        crop: Some("Maize".to_string()),
        year: Some(2023),
        area_harvested: Some(10.0),
        production: Some(50.0),
        rainfall: Some(200.0),
        temperature: Some(25.0),
        price_per_tonne: Some(300.0),
        policy_flag: Some("Subsidy".to_string()),
        transport_cost: Some(100.0),
        demand_supply_gap: Some(10.0),
        productivity_index: None,
    }
}

/// A full-schema artifact written with the legacy column spellings. Only rainfall and
/// price carry weight, so the expected outputs are easy to compute by hand.
fn write_legacy_schema_artifact(path: &Path) {
    let names: Vec<String> = FeatureName::ALL
        .iter()
        .map(|f| format!("\"{}\"", f.legacy_name()))
        .collect();
    let coefficients = |feature: FeatureName, weight: f64| -> String {
        FeatureName::ALL
            .iter()
            .map(|f| if *f == feature { weight.to_string() } else { "0.0".to_string() })
            .collect::<Vec<_>>()
            .join(", ")
    };
    let toml = format!(
        r#"feature_names = [{names}]

[categories.Country]
unknown = 0.0
[categories.Country.levels]
Kenya = 1.0

[categories.Crop]
unknown = 0.0
[categories.Crop.levels]

[production]
intercept = 0.0
coefficients = [{production}]

[yield]
intercept = 1.0
coefficients = [{zero}]

[price]
intercept = 0.0
coefficients = [{price}]
"#,
        names = names.join(", "),
        production = coefficients(FeatureName::Rainfall, 0.5),
        zero = coefficients(FeatureName::Rainfall, 0.0),
        price = coefficients(FeatureName::PricePerTonne, 1.1),
    );
    fs::write(path, toml).unwrap();
}

#[test]
fn extra_feature_in_vector_raises_mismatch() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("two.toml");
    fs::write(&path, TWO_FEATURE_ARTIFACT).unwrap();
    let estimator = ModelEstimator::load(&path).unwrap();

    let vector = FeatureVector::from_entries([("A", 1.0), ("B", 2.0), ("C", 3.0)]);
    let err = estimator.predict(&vector).unwrap_err();
    assert_eq!(
        err.to_string(),
        FeatureMismatch {
            missing: vec![],
            unexpected: vec!["C".to_string()],
        }
        .to_string()
    );

    let exact = FeatureVector::from_entries([("A", 1.0), ("B", 2.0)]);
    // faulted until a reload
    assert!(estimator.predict(&exact).is_err());
    estimator.reload(&path).unwrap();
    let result = estimator.predict(&exact).unwrap();
    assert_eq!(result.predicted_production, 3.0);
    assert_eq!(result.predicted_yield, 0.5);
    assert_eq!(result.predicted_price, 104.0);
}

#[test]
fn service_refuses_artifact_with_foreign_schema() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("two.toml");
    fs::write(&path, TWO_FEATURE_ARTIFACT).unwrap();

    let estimator = Arc::new(ModelEstimator::load(&path).unwrap());
    let store = Arc::new(InMemoryStore::new());
    match PredictionService::new(estimator, store.clone()) {
        Err(PredictionError::FeatureMismatch(mismatch)) => {
            assert_eq!(mismatch.missing, vec!["A".to_string(), "B".to_string()]);
            assert_eq!(mismatch.unexpected.len(), schema().len());
        }
        Err(other) => panic!("expected a feature mismatch, got {other}"),
        Ok(_) => panic!("expected a feature mismatch, got a service"),
    }
    assert!(store.is_empty());
}

#[test]
fn legacy_artifact_serves_the_canonical_pipeline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("legacy.toml");
    write_legacy_schema_artifact(&path);

    let config = AppConfig::default().with_artifact(path.clone());
    let service = PredictionService::new(
        config.build_estimator().unwrap(),
        Arc::new(InMemoryStore::new()),
    )
    .unwrap();
    assert_eq!(service.estimator().name(), "model");

    let prediction = service.estimate(&kenya_maize()).unwrap();
    assert_eq!(prediction.estimate.predicted_production, 100.0);
    assert_eq!(prediction.estimate.predicted_yield, 1.0);
    assert!((prediction.estimate.predicted_price - 330.0).abs() < 1e-9);
}

#[test]
fn save_then_load_preserves_artifact() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("two.toml");
    fs::write(&source, TWO_FEATURE_ARTIFACT).unwrap();
    let artifact = ModelArtifact::load(&source).unwrap();

    let copy = dir.path().join("copy.toml");
    artifact.save(&copy).unwrap();
    let reloaded = ModelArtifact::load(&copy).unwrap();

    assert_eq!(reloaded.description.as_deref(), Some("two-feature test model"));
    assert_eq!(reloaded.feature_names, artifact.feature_names);
    assert_eq!(reloaded.price.coefficients, vec![0.0, 2.0]);
}
