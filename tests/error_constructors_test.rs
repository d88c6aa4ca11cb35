use batman::error::BatmanError;

#[test]
fn domain_error_constructors() {
    assert!(matches!(
        BatmanError::empty_prices("2025-01-15"),
        BatmanError::EmptyPriceSeries { .. }
    ));
    assert!(matches!(
        BatmanError::invalid_observation("soc", "missing"),
        BatmanError::InvalidObservation { .. }
    ));
    assert!(matches!(
        BatmanError::ramp_divergence(6, 5),
        BatmanError::RampDivergence { steps: 6, budget: 5 }
    ));
    assert!(matches!(
        BatmanError::actuation("bat1", "timeout"),
        BatmanError::ActuationFailure { .. }
    ));
}

#[test]
fn ambient_error_constructors() {
    assert!(matches!(BatmanError::config("x"), BatmanError::Config { .. }));
    assert!(matches!(
        BatmanError::validation("f", "m"),
        BatmanError::Validation { .. }
    ));
    assert!(matches!(BatmanError::io("x"), BatmanError::Io { .. }));
    assert!(matches!(
        BatmanError::network("x"),
        BatmanError::Network { .. }
    ));
    assert!(matches!(
        BatmanError::generic("x"),
        BatmanError::Generic { .. }
    ));
}

#[test]
fn degraded_inputs_are_recognised() {
    assert!(BatmanError::empty_prices("today").is_degraded_input());
    assert!(BatmanError::invalid_observation("soc", "NaN").is_degraded_input());
    assert!(!BatmanError::ramp_divergence(6, 5).is_degraded_input());
    assert!(!BatmanError::actuation("bat1", "refused").is_degraded_input());
}

#[test]
fn display_messages() {
    let e = BatmanError::actuation("bat2", "HTTP 500");
    let s = format!("{}", e);
    assert!(s.contains("bat2"));
    assert!(s.contains("HTTP 500"));

    let s = format!("{}", BatmanError::ramp_divergence(6, 5));
    assert!(s.contains("budget was 5"));
}
