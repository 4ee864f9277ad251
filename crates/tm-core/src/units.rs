// tm-core/src/units.rs

use uom::si::f64::ThermodynamicTemperature as UomThermodynamicTemperature;

use crate::error::{CoreError, CoreResult};

// Public canonical unit type (SI, f64)
pub type Temperature = UomThermodynamicTemperature;

#[inline]
pub fn k(v: f64) -> Temperature {
    use uom::si::thermodynamic_temperature::kelvin;
    Temperature::new::<kelvin>(v)
}

#[inline]
pub fn as_kelvin(t: Temperature) -> f64 {
    use uom::si::thermodynamic_temperature::kelvin;
    t.get::<kelvin>()
}

/// Build a temperature from a raw instrument value, rejecting anything that
/// is not a physical kelvin reading.
pub fn checked_k(v: f64) -> CoreResult<Temperature> {
    if !v.is_finite() {
        return Err(CoreError::NonFinite {
            what: "temperature",
            value: v,
        });
    }
    if v < 0.0 {
        return Err(CoreError::BelowAbsoluteZero { value: v });
    }
    Ok(k(v))
}
