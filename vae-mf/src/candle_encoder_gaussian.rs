use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Device, Result, Tensor};
use candle_nn::{Linear, Module};

/// Dense encoder tower: `x -> relu(fc) -> (mu, logvar)`
pub struct GaussianEncoder {
    n_features: usize,
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl EncoderModuleT for GaussianEncoder {
    fn forward_t(&self, x_nd: &Tensor, eps_nk: Option<&Tensor>) -> Result<GaussianLatent> {
        let (z_mean, z_lnvar) = self.latent_gaussian_params(x_nd)?;
        let z = match eps_nk {
            Some(eps_nk) => reparameterize(&z_mean, &z_lnvar, eps_nk)?,
            None => z_mean.clone(),
        };
        Ok(GaussianLatent {
            z_mean,
            z_lnvar,
            z,
        })
    }

    fn weight_sq_norm(&self, dev: &Device) -> Result<Tensor> {
        self.fc
            .weight_sq_norm(dev)?
            .add(&sq_frobenius_norm(self.z_mean.weight())?)?
            .add(&sq_frobenius_norm(self.z_lnvar.weight())?)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }
}

impl GaussianEncoder {
    ///
    /// Evaluate latent Gaussian parameters: mu and log_var
    /// z ~ (mu(x), log_var(x))
    pub fn latent_gaussian_params(&self, x_nd: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_, d) = x_nd.dims2()?;
        if d != self.n_features {
            candle_core::bail!("encoder expects {} features, got {}", self.n_features, d);
        }
        let h_nl = self.fc.forward(x_nd)?;
        let z_mean_nk = self.z_mean.forward(&h_nl)?;
        let z_lnvar_nk = self.z_lnvar.forward(&h_nl)?;
        Ok((z_mean_nk, z_lnvar_nk))
    }

    /// Will create a new Gaussian encoder module
    /// with these variables:
    ///
    /// * `enc.fc.{}.weight` where {} is the layer index
    /// * `enc.z.mean.weight`
    /// * `enc.z.lnvar.weight`
    ///
    /// and their `bias` counterparts
    pub fn new(
        n_features: usize,
        n_latent: usize,
        layers: &[usize],
        vs: SeededVarBuilder,
    ) -> Result<Self> {
        if layers.is_empty() {
            candle_core::bail!("encoder needs at least one hidden layer");
        }

        // (1) data -> fc
        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = n_features;
        for (j, &next_dim) in layers.iter().enumerate() {
            fc.push_with_act(
                linear(prev_dim, next_dim, vs.pp(format!("enc.fc.{}", j)))?,
                candle_nn::Activation::Relu,
            );
            prev_dim = next_dim;
        }

        // (2) fc -> K
        let z_mean = linear(prev_dim, n_latent, vs.pp("enc.z.mean"))?;
        let z_lnvar = linear(prev_dim, n_latent, vs.pp("enc.z.lnvar"))?;

        Ok(Self {
            n_features,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}

///
/// z = mu + sigma * eps
/// where eps ~ N(0, 1)
///
/// # Arguments
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
/// * `eps` - standard normal noise of the same shape
pub fn reparameterize(z_mean: &Tensor, z_lnvar: &Tensor, eps: &Tensor) -> Result<Tensor> {
    let z_std = z_lnvar.affine(0.5, 0.)?.exp()?;
    z_mean.add(&z_std.mul(eps)?)
}
