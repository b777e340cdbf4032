//! Area parsing, rounding and the apportionment formula.
//!
//! All rounding is half away from zero. The scaled value gets a small tie
//! tolerance so that decimal ties like `1.005` round up even though the
//! binary representation sits just below the tie.

pub const COEFFICIENT_PLACES: u32 = 6;
pub const AREA_PLACES: u32 = 2;

const TIE_TOLERANCE: f64 = 1e-9;

/// Parses stored decimal text. Blank, non-numeric and non-finite values are `0`.
pub fn parse_decimal(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => 0.0,
    }
}

pub fn parse_area(raw: &str) -> f64 {
    parse_decimal(raw)
}

pub fn round_half_away(value: f64, places: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(places as i32);
    let scaled = value * factor;
    let whole = scaled.trunc();
    let fraction = (scaled - whole).abs();
    let rounded = if fraction + TIE_TOLERANCE >= 0.5 {
        whole + scaled.signum()
    } else {
        whole
    };
    // avoid rendering "-0.000000"
    if rounded == 0.0 {
        return 0.0;
    }
    rounded / factor
}

pub fn round_coefficient(value: f64) -> f64 {
    round_half_away(value, COEFFICIENT_PLACES)
}

pub fn round_area(value: f64) -> f64 {
    round_half_away(value, AREA_PLACES)
}

pub fn format_coefficient(value: f64) -> String {
    format!("{:.6}", round_coefficient(value))
}

pub fn format_area(value: f64) -> String {
    format!("{:.2}", round_area(value))
}

/// `round6((C + C * parent) / H)`, or `None` when the participant area is zero.
pub fn apportionment_coefficient(
    common_area: f64,
    participant_area: f64,
    parent_coefficient: f64,
) -> Option<f64> {
    if participant_area == 0.0 {
        return None;
    }
    Some(round_coefficient(
        (common_area + common_area * parent_coefficient) / participant_area,
    ))
}

pub fn apportioned_area(inner_area: f64, coefficient: f64) -> f64 {
    round_area(inner_area * coefficient)
}

pub fn apportionable_area(inner_area: f64, parent_coefficient: f64) -> f64 {
    round_area(inner_area * (1.0 + parent_coefficient))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_area_treats_garbage_as_zero() {
        assert_eq!(parse_area(" 12.5 "), 12.5);
        assert_eq!(parse_area(""), 0.0);
        assert_eq!(parse_area("n/a"), 0.0);
        assert_eq!(parse_area("NaN"), 0.0);
        assert_eq!(parse_area("inf"), 0.0);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_half_away(1.005, 2), 1.01);
        assert_eq!(round_half_away(-2.5, 0), -3.0);
        assert_eq!(round_half_away(2.5, 0), 3.0);
        assert_eq!(round_half_away(0.1234565, 6), 0.123457);
        assert_eq!(round_half_away(0.1234564, 6), 0.123456);
        assert_eq!(round_half_away(-0.0000001, 6), 0.0);
    }

    #[test]
    fn formats_fixed_places() {
        assert_eq!(format_coefficient(0.275), "0.275000");
        assert_eq!(format_area(13.75), "13.75");
        assert_eq!(format_area(3.0), "3.00");
        assert_eq!(format_coefficient(-0.0000001), "0.000000");
    }

    #[test]
    fn coefficient_matches_worked_example() {
        let coefficient = apportionment_coefficient(100.0, 400.0, 0.1).expect("non-zero area");
        assert_eq!(format_coefficient(coefficient), "0.275000");
        assert_eq!(apportioned_area(50.0, coefficient), 13.75);
    }

    #[test]
    fn coefficient_rejects_zero_participant_area() {
        assert!(apportionment_coefficient(100.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn apportionable_area_scales_by_parent() {
        assert_eq!(apportionable_area(20.0, 0.25), 25.0);
        assert_eq!(apportionable_area(10.0, 0.0), 10.0);
    }
}
