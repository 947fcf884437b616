/// Terms lying more than this many nats below the maximum are skipped.
///
/// `exp(-16)` is already below the 32-bit float epsilon relative to the
/// maximum term, so adding it cannot change the sum.
pub const UNDERFLOW_GUARD: f32 = 16.0;

/// Computes `log(sum(exp(x)))` over the given terms in a numerically stable way.
///
/// Returns `-inf` for an empty input or when all terms are `-inf`, and NaN
/// when any term is NaN.
#[inline(always)]
pub fn logsumexp<I>(xs: I) -> f32
where
    I: IntoIterator<Item = f32>,
    I::IntoIter: Clone,
{
    let xs = xs.into_iter();
    let mut max = f32::NEG_INFINITY;
    for x in xs.clone() {
        if x.is_nan() {
            return f32::NAN;
        }
        if x > max {
            max = x;
        }
    }
    if max.is_infinite() {
        return max;
    }
    let mut sum = 0.0f32;
    for x in xs {
        let d = x - max;
        if d > -UNDERFLOW_GUARD {
            sum += d.exp();
        }
    }
    max + sum.ln()
}
