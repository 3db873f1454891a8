use agriyield::export::{ExportFormat, write_export};
use agriyield::observation::{Field, read_inputs_csv};
use agriyield::summary::recent_window_start;
use agriyield::{
    HeuristicEstimator, InMemoryStore, ObservationInput, ObservationStore, PredictionError,
    PredictionService,
};
use approx::assert_abs_diff_eq;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

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

fn service_with_store() -> (PredictionService, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let service = PredictionService::new(Arc::new(HeuristicEstimator), store.clone())
        .expect("heuristic accepts the canonical schema");
    (service, store)
}

#[test]
fn reference_scenario_end_to_end() {
    let (service, store) = service_with_store();
    let prediction = service.estimate(&kenya_maize()).unwrap();

    assert_eq!(prediction.estimate.predicted_production, 50.0);
    assert_eq!(prediction.estimate.predicted_yield, 5.0);
    assert_eq!(prediction.estimate.predicted_price, 330.0);
    assert_eq!(store.len(), 1);
    assert_eq!(prediction.observation.to_string(), "Maize in Kenya (2023)");
}

#[test]
fn identical_requests_create_two_records_with_equal_results() {
    let (service, store) = service_with_store();
    let first = service.estimate(&kenya_maize()).unwrap();
    let second = service.estimate(&kenya_maize()).unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.estimate, second.estimate);
    assert_eq!(store.len(), 2);
}

#[test]
fn zero_area_is_estimated_without_division_errors() {
    let (service, _) = service_with_store();
    let input = ObservationInput {
        area_harvested: Some(0.0),
        ..kenya_maize()
    };
    let prediction = service.estimate(&input).unwrap();
    assert_eq!(prediction.estimate.predicted_production, 0.0);
    assert_eq!(prediction.estimate.predicted_yield, 0.0);
}

#[test]
fn invalid_input_reports_every_field_and_stores_nothing() {
    let (service, store) = service_with_store();
    let input = ObservationInput {
        crop: None,
        year: Some(2101),
        production: Some(-1.0),
        ..kenya_maize()
    };

    match service.estimate(&input) {
        Err(PredictionError::Validation(err)) => {
            assert_eq!(err.fields(), vec![Field::Crop, Field::Year, Field::Production]);
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert!(store.is_empty());
}

#[test]
fn policy_flag_must_match_exactly() {
    let (service, _) = service_with_store();
    let lowercase = ObservationInput {
        policy_flag: Some("subsidy".to_string()),
        ..kenya_maize()
    };
    let prediction = service.estimate(&lowercase).unwrap();
    assert_eq!(prediction.estimate.predicted_production, 25.0);
}

#[test]
fn yield_times_area_recovers_production() {
    let (service, _) = service_with_store();
    let mut rng = StdRng::seed_from_u64(20_230_101);
    for _ in 0..200 {
        let area = rng.gen_range(0.5..5_000.0);
        let input = ObservationInput {
            area_harvested: Some(area),
            rainfall: Some(rng.gen_range(0.0..2_500.0)),
            temperature: Some(rng.gen_range(-10.0..45.0)),
            ..kenya_maize()
        };
        let result = service.evaluate(&input).unwrap();
        assert_abs_diff_eq!(
            result.predicted_yield * area,
            result.predicted_production,
            epsilon = 1e-9 * result.predicted_production.abs().max(1.0)
        );
    }
}

#[test]
fn csv_batch_summary_and_export() {
    let content = "\
country,crop,year,area_harvested_ha,production_tonnes,rainfall_mm,temperature_c,price_usd_per_tonne,policy_flag,transport_cost_usd,demand_supply_gap,productivity_index
Kenya,Maize,2023,10,50,200,25,300,Subsidy,100,10,
Ghana,Cassava,2022,20,80,100,20,150,,50,0,0.5
Peru,Maize,1999,10,50,200,25,300,Subsidy,100,10,
";
    let inputs = read_inputs_csv(content.as_bytes()).unwrap();
    let (service, store) = service_with_store();
    let outcomes = service.estimate_batch(&inputs);

    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].is_ok());
    assert!(matches!(outcomes[2], Err(PredictionError::Validation(_))));
    assert_eq!(store.len(), 2);

    let summary = service.summary(recent_window_start(Utc::now()));
    assert_eq!(summary.count, 2);
    // Ghana: 20 * 1 * 1 * 1 = 20 tonnes, price 150
    assert_abs_diff_eq!(summary.avg_production, 35.0, epsilon = 1e-12);
    assert_abs_diff_eq!(summary.avg_price, 240.0, epsilon = 1e-12);

    let records = service.records();
    assert_eq!(records[0].observation.country, "Kenya");
    assert_eq!(records[1].observation.country, "Ghana");

    let mut out = Vec::new();
    write_export(&mut out, &records, ExportFormat::Csv).unwrap();
    let text = String::from_utf8(out).unwrap();
    let first_row = text.lines().nth(1).unwrap();
    assert!(first_row.starts_with("Maize,Kenya,2023,10.0,200.0,25.0,Subsidy,100.0,10.0,50.0,5.0,330.0,"));
}
