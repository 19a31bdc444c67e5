use candle_core::{Result, Tensor};

/// KL divergence loss between two Gaussian distributions
///
/// -0.5 * (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Gaussian log-likelihood of count-ish data
///
/// llik(i) = -0.5 * sum_w [ x(i,w) - xhat(i,w) ]^2
///
/// * `x_nd` - data tensor (observed data)
/// * `hat_nd` - reconstruction tensor
///
pub fn gaussian_likelihood(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    x_nd.sub(hat_nd)?.powf(2.)?.sum(x_nd.rank() - 1)? * (-0.5)
}

/// Negative binomial log-likelihood with a shared dispersion
///
/// llik(i) = sum_w x * log(mu / (mu + theta))
///           + theta * log(theta / (mu + theta))
///           + lgamma(x + theta) - lgamma(theta) - lgamma(x + 1)
///
/// * `x_nd` - data tensor (observed counts)
/// * `mu_nd` - mean tensor (reconstruction), strictly positive
/// * `theta` - inverse dispersion, strictly positive
///
pub fn nb_likelihood(x_nd: &Tensor, mu_nd: &Tensor, theta: f64) -> Result<Tensor> {
    let eps = 1e-8;
    let mu_nd = (mu_nd + eps)?;
    let denom_nd = (&mu_nd + theta)?;

    let term1 = x_nd.mul(&mu_nd.log()?.sub(&denom_nd.log()?)?)?;
    let term2 = ((denom_nd.log()?.neg()? + theta.ln())? * theta)?;
    let term3 = approx_lgamma(&(x_nd + theta)?)?
        .sub(&approx_lgamma(&(x_nd.zeros_like()? + theta)?)?)?
        .sub(&approx_lgamma(&(x_nd + 1.)?)?)?;

    term1.add(&term2)?.add(&term3)?.sum(x_nd.rank() - 1)
}

/// -0.0810614667f - x - log(x) + (0.5f + x) * log(1.0f + x);
fn approx_lgamma(x: &Tensor) -> Result<Tensor> {
    let term1 = (x.neg()? - 0.0810614667)?;
    let term2 = x.log()?.neg()?;
    let term3 = (x + 0.5)?.mul(&(x + 1.0)?.log()?)?;
    term1.add(&term2)?.add(&term3)
}

/// Aggregated categorical cross-entropy
///
/// ce(i) = -sum_k y(i,k) * log(p(i,k))
///
/// Fractional multi-hot targets are supported: each matching class
/// contributes its full mass.
///
/// * `y_nk` - target tensor (one-hot or fractional multi-hot)
/// * `p_nk` - class probability tensor
///
pub fn cross_entropy_agg(y_nk: &Tensor, p_nk: &Tensor) -> Result<Tensor> {
    let log_p_nk = (p_nk + 1e-10)?.log()?;
    y_nk.mul(&log_p_nk)?.sum(y_nk.rank() - 1)?.neg()
}
