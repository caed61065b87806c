use candle_core::{Result, Tensor};

/// KL divergence loss between a diagonal Gaussian and `N(0, I)`
///
/// -0.5 * sum_k (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
/// Returns one value per row (summed over the last dimension).
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Predicted ratings of aligned (user, item) pairs
///
/// rating(i) = sum_d recon_user(i,d) * recon_item(i,d)
///
/// which is the diagonal of `recon_user * recon_item^T` without
/// forming the n x n product.
///
/// * `recon_user_nd` - reconstructed user vectors
/// * `recon_item_nd` - reconstructed item vectors
///
pub fn rating_dot(recon_user_nd: &Tensor, recon_item_nd: &Tensor) -> Result<Tensor> {
    recon_user_nd
        .mul(recon_item_nd)?
        .sum(recon_user_nd.rank() - 1)
}

/// mean_i (y(i) - yhat(i))^2
pub fn mean_squared_error(y_n: &Tensor, yhat_n: &Tensor) -> Result<Tensor> {
    y_n.sub(yhat_n)?.sqr()?.mean_all()
}

/// mean_i |y(i) - yhat(i)|
pub fn mean_absolute_error(y_n: &Tensor, yhat_n: &Tensor) -> Result<Tensor> {
    y_n.sub(yhat_n)?.abs()?.mean_all()
}

/// sqrt( mean_i (y(i) - yhat(i))^2 )
pub fn root_mean_squared_error(y_n: &Tensor, yhat_n: &Tensor) -> Result<Tensor> {
    mean_squared_error(y_n, yhat_n)?.sqrt()
}

/// Scalar summary of one minibatch objective
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossStats {
    /// batch mean of the combined (user + item) KL divergence
    pub kl: f32,
    pub mse: f32,
    pub mae: f32,
    pub rmse: f32,
    /// sum of squared weight norms
    pub l2: f32,
    /// `kl + mse`
    pub loss: f32,
    /// `loss + reg_param * l2`
    pub regularized_loss: f32,
}

impl LossStats {
    pub fn is_finite(&self) -> bool {
        [
            self.kl,
            self.mse,
            self.mae,
            self.rmse,
            self.l2,
            self.loss,
            self.regularized_loss,
        ]
        .iter()
        .all(|x| x.is_finite())
    }

    /// Fail on NaN or infinite values at `step`
    pub fn check_finite(&self, step: usize) -> anyhow::Result<()> {
        if self.is_finite() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "non-finite loss at step {}: {:?}",
                step,
                self
            ))
        }
    }
}
