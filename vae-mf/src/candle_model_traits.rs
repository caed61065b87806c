use candle_core::{Device, Result, Tensor};

/// Gaussian latent states of a minibatch
pub struct GaussianLatent {
    /// mean `mu` (n x k)
    pub z_mean: Tensor,
    /// log variance `logvar` (n x k)
    pub z_lnvar: Tensor,
    /// latent sample (n x k)
    pub z: Tensor,
}

pub trait EncoderModuleT {
    /// An encoder that spits out the latent Gaussian and a sample
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `eps_nk` - standard normal noise (n x k); `None` takes the
    ///   mean as the latent state
    fn forward_t(&self, x_nd: &Tensor, eps_nk: Option<&Tensor>) -> Result<GaussianLatent>;

    /// Sum of squared weight norms of every affine layer
    fn weight_sq_norm(&self, dev: &Device) -> Result<Tensor>;

    /// width of the input rows
    fn dim_obs(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor>;

    /// Sum of squared weight norms of every affine layer
    fn weight_sq_norm(&self, dev: &Device) -> Result<Tensor>;
}
