use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Used for rates, bonuses and energy, where results must be identical on
/// every node that evaluates them.
pub type Fixed64 = I32F32;

/// Convert an f64 to Fixed64. Use only for initialization (catalog/config
/// loading), never inside a scheduling decision.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::saturating_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display and logging.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Turn a percentage bonus into a multiplier: `10` becomes `1.1`.
/// Returns None on overflow.
#[inline]
pub fn percent_multiplier(percent: Fixed64) -> Option<Fixed64> {
    let fraction = percent.checked_div(Fixed64::from_num(100))?;
    Fixed64::ONE.checked_add(fraction)
}
