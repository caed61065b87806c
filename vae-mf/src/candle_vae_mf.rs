use crate::candle_aux_layers::{standard_normal, SeededVarBuilder};
use crate::candle_decoder_dense::DenseDecoder;
use crate::candle_encoder_gaussian::GaussianEncoder;
use crate::candle_loss_functions::*;
use crate::candle_model_traits::*;
use crate::candle_rating_data::{RatingFeed, RatingMatrix};

use anyhow::anyhow;
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Model hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaeMfConfig {
    /// width of a user profile (number of items)
    pub user_input_dim: usize,
    /// width of an item profile (number of users)
    pub item_input_dim: usize,
    pub hidden_encoder_dim: usize,
    pub hidden_decoder_dim: usize,
    pub latent_dim: usize,
    pub output_dim: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub reg_param: f64,
    /// seed for weight initialization, minibatch sampling and
    /// reparameterization noise; `None` draws from the OS
    #[serde(default)]
    pub seed: Option<u64>,
}

impl VaeMfConfig {
    pub fn new(user_input_dim: usize, item_input_dim: usize) -> Self {
        Self {
            user_input_dim,
            item_input_dim,
            hidden_encoder_dim: 216,
            hidden_decoder_dim: 216,
            latent_dim: 24,
            output_dim: 24,
            learning_rate: 0.002,
            batch_size: 64,
            reg_param: 0.,
            seed: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let dims = [
            ("user_input_dim", self.user_input_dim),
            ("item_input_dim", self.item_input_dim),
            ("hidden_encoder_dim", self.hidden_encoder_dim),
            ("hidden_decoder_dim", self.hidden_decoder_dim),
            ("latent_dim", self.latent_dim),
            ("output_dim", self.output_dim),
            ("batch_size", self.batch_size),
        ];
        for (name, dim) in dims {
            if dim == 0 {
                return Err(anyhow!("{} must be positive", name));
            }
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.) {
            return Err(anyhow!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            ));
        }
        if !(self.reg_param.is_finite() && self.reg_param >= 0.) {
            return Err(anyhow!(
                "reg_param must be non-negative and finite, got {}",
                self.reg_param
            ));
        }
        Ok(())
    }
}

/// Standard normal noise for the two latent samplers
pub struct LatentNoise {
    pub user_nk: Tensor,
    pub item_nk: Tensor,
}

/// Everything computed by one forward pass
pub struct VaeMfForward {
    pub user: GaussianLatent,
    pub item: GaussianLatent,
    /// reconstructed user vectors (n x output)
    pub recon_user_nd: Tensor,
    /// reconstructed item vectors (n x output)
    pub recon_item_nd: Tensor,
    /// predicted ratings (n)
    pub rating_hat_n: Tensor,
}

/// Differentiable objective and its scalar summary
pub struct VaeMfLoss {
    pub regularized_loss: Tensor,
    pub stats: LossStats,
}

struct Towers {
    user_encoder: GaussianEncoder,
    item_encoder: GaussianEncoder,
    user_decoder: DenseDecoder,
    item_decoder: DenseDecoder,
}

impl Towers {
    /// Variables:
    /// * `user.enc.*`, `item.enc.*` (see `GaussianEncoder::new`)
    /// * `user.dec.*`, `item.dec.*` (see `DenseDecoder::new`)
    fn new(config: &VaeMfConfig, vs: SeededVarBuilder) -> candle_core::Result<Self> {
        let enc_layers = [config.hidden_encoder_dim];
        let dec_layers = [config.hidden_decoder_dim];
        Ok(Self {
            user_encoder: GaussianEncoder::new(
                config.user_input_dim,
                config.latent_dim,
                &enc_layers,
                vs.pp("user"),
            )?,
            item_encoder: GaussianEncoder::new(
                config.item_input_dim,
                config.latent_dim,
                &enc_layers,
                vs.pp("item"),
            )?,
            user_decoder: DenseDecoder::new(
                config.latent_dim,
                config.output_dim,
                &dec_layers,
                vs.pp("user"),
            )?,
            item_decoder: DenseDecoder::new(
                config.latent_dim,
                config.output_dim,
                &dec_layers,
                vs.pp("item"),
            )?,
        })
    }
}

///
/// Variational autoencoder matrix factorization.
///
/// A user's profile (its row of the rating matrix) and an item's
/// profile (its column) go through separate encoder/decoder towers;
/// the predicted rating of the pair is the dot product of the two
/// reconstructions.
///
pub struct VaeMf {
    config: VaeMfConfig,
    device: Device,
    parameters: VarMap,
    towers: Towers,
    rng: RefCell<StdRng>,
}

impl VaeMf {
    /// Build a model with freshly initialized parameters
    pub fn new(config: VaeMfConfig, device: &Device) -> anyhow::Result<Self> {
        config.validate()?;

        let rng = RefCell::new(match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        });

        let parameters = VarMap::new();
        let towers = Towers::new(
            &config,
            SeededVarBuilder::new(&parameters, &rng, device),
        )?;

        debug!(
            "user: {} -> {} -> {} -> {} -> {}",
            config.user_input_dim,
            config.hidden_encoder_dim,
            config.latent_dim,
            config.hidden_decoder_dim,
            config.output_dim
        );

        Ok(Self {
            config,
            device: device.clone(),
            parameters,
            towers,
            rng,
        })
    }

    /// Replace every weight by a fresh draw and every bias by zero
    pub fn reset_parameters(&mut self) -> anyhow::Result<()> {
        let parameters = VarMap::new();
        let towers = Towers::new(
            &self.config,
            SeededVarBuilder::new(&parameters, &self.rng, &self.device),
        )?;
        self.parameters = parameters;
        self.towers = towers;
        Ok(())
    }

    pub fn config(&self) -> &VaeMfConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The parameter store (all weights and biases)
    pub fn parameters(&self) -> &VarMap {
        &self.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut VarMap {
        &mut self.parameters
    }

    pub(crate) fn rng(&self) -> &RefCell<StdRng> {
        &self.rng
    }

    /// Name-sorted copies of all the parameter tensors
    pub fn named_parameters(&self) -> anyhow::Result<Vec<(String, Tensor)>> {
        let data = self
            .parameters
            .data()
            .lock()
            .map_err(|e| anyhow!("parameter store: {}", e))?;
        let mut ret = data
            .iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy()?)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        ret.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(ret)
    }

    /// Draw fresh standard normal noise for `nn` pairs
    pub fn sample_noise(&self, nn: usize) -> candle_core::Result<LatentNoise> {
        let kk = self.config.latent_dim;
        let mut rng = self.rng.borrow_mut();
        let user_nk = standard_normal((nn, kk), &mut rng, &self.device)?;
        let item_nk = standard_normal((nn, kk), &mut rng, &self.device)?;
        Ok(LatentNoise { user_nk, item_nk })
    }

    ///
    /// encode -> sample -> decode -> predict
    ///
    /// # Arguments
    /// * `user_nd` - user profiles (n x user_input_dim)
    /// * `item_nd` - item profiles (n x item_input_dim)
    /// * `noise` - reparameterization noise; `None` uses the
    ///   latent means
    pub fn forward_t(
        &self,
        user_nd: &Tensor,
        item_nd: &Tensor,
        noise: Option<&LatentNoise>,
    ) -> candle_core::Result<VaeMfForward> {
        let (n_user, _) = user_nd.dims2()?;
        let (n_item, _) = item_nd.dims2()?;
        if n_user != n_item {
            candle_core::bail!(
                "user and item batches must be aligned: {} vs {}",
                n_user,
                n_item
            );
        }

        let t = &self.towers;
        let user = t
            .user_encoder
            .forward_t(user_nd, noise.map(|x| &x.user_nk))?;
        let item = t
            .item_encoder
            .forward_t(item_nd, noise.map(|x| &x.item_nk))?;

        let recon_user_nd = t.user_decoder.forward(&user.z)?;
        let recon_item_nd = t.item_decoder.forward(&item.z)?;
        let rating_hat_n = rating_dot(&recon_user_nd, &recon_item_nd)?;

        Ok(VaeMfForward {
            user,
            item,
            recon_user_nd,
            recon_item_nd,
            rating_hat_n,
        })
    }

    /// Sum of squared norms of all the weight matrices
    pub fn l2_penalty(&self) -> candle_core::Result<Tensor> {
        let t = &self.towers;
        let dev = &self.device;
        t.user_encoder
            .weight_sq_norm(dev)?
            .add(&t.item_encoder.weight_sq_norm(dev)?)?
            .add(&t.user_decoder.weight_sq_norm(dev)?)?
            .add(&t.item_decoder.weight_sq_norm(dev)?)
    }

    ///
    /// loss = mean_n [ KL(user) + KL(item) ] + MSE
    /// regularized loss = loss + reg_param * L2
    ///
    pub fn compose_loss(
        &self,
        fwd: &VaeMfForward,
        rating_n: &Tensor,
    ) -> anyhow::Result<VaeMfLoss> {
        let kl_n = gaussian_kl_loss(&fwd.user.z_mean, &fwd.user.z_lnvar)?
            .add(&gaussian_kl_loss(&fwd.item.z_mean, &fwd.item.z_lnvar)?)?;
        let kl = kl_n.mean_all()?;

        let mse = mean_squared_error(rating_n, &fwd.rating_hat_n)?;
        let mae = mean_absolute_error(rating_n, &fwd.rating_hat_n)?;
        let rmse = root_mean_squared_error(rating_n, &fwd.rating_hat_n)?;

        let loss = kl.add(&mse)?;
        let l2 = self.l2_penalty()?;
        let regularized_loss = loss.add(&l2.affine(self.config.reg_param, 0.)?)?;

        let stats = LossStats {
            kl: kl.to_scalar::<f32>()?,
            mse: mse.to_scalar::<f32>()?,
            mae: mae.to_scalar::<f32>()?,
            rmse: rmse.to_scalar::<f32>()?,
            l2: l2.to_scalar::<f32>()?,
            loss: loss.to_scalar::<f32>()?,
            regularized_loss: regularized_loss.to_scalar::<f32>()?,
        };

        Ok(VaeMfLoss {
            regularized_loss,
            stats,
        })
    }

    /// Objective on a feed; `train` samples fresh latent noise,
    /// otherwise the latent means are used
    pub fn loss(&self, feed: &RatingFeed, train: bool) -> anyhow::Result<VaeMfLoss> {
        let noise = if train {
            Some(self.sample_noise(feed.num_pairs())?)
        } else {
            None
        };
        let fwd = self.forward_t(&feed.user_nd, &feed.item_nd, noise.as_ref())?;
        self.compose_loss(&fwd, &feed.rating_n)
    }

    /// Check that the matrix fits the encoders' input widths
    pub fn check_ratings<M: RatingMatrix>(&self, ratings: &M) -> anyhow::Result<()> {
        let user_width = self.towers.user_encoder.dim_obs();
        let item_width = self.towers.item_encoder.dim_obs();
        if ratings.num_items() != user_width || ratings.num_users() != item_width {
            return Err(anyhow!(
                "rating matrix is {} users x {} items, but the model expects {} x {}",
                ratings.num_users(),
                ratings.num_items(),
                item_width,
                user_width
            ));
        }
        Ok(())
    }

    /// Score a feed with fresh latent samples, as in training
    pub fn evaluate_feed(&self, feed: &RatingFeed) -> anyhow::Result<LossStats> {
        Ok(self.loss(feed, true)?.stats)
    }

    /// Stochastic evaluation (fresh latent samples) on the pairs
    pub fn evaluate<M: RatingMatrix>(
        &self,
        ratings: &M,
        pairs: &[(usize, usize)],
    ) -> anyhow::Result<LossStats> {
        self.check_ratings(ratings)?;
        let feed = RatingFeed::new(ratings, pairs, &self.device)?;
        self.evaluate_feed(&feed)
    }

    /// Deterministic rating predictions with `z = mu`
    pub fn predict<M: RatingMatrix>(
        &self,
        ratings: &M,
        pairs: &[(usize, usize)],
    ) -> anyhow::Result<Vec<f32>> {
        self.check_ratings(ratings)?;
        let feed = RatingFeed::new(ratings, pairs, &self.device)?;
        let fwd = self.forward_t(&feed.user_nd, &feed.item_nd, None)?;
        Ok(fwd.rating_hat_n.to_vec1::<f32>()?)
    }
}
