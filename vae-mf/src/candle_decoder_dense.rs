use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Device, Result, Tensor};
use candle_nn::{Linear, Module};

////////////////////////////
// Dense (linear) decoder //
////////////////////////////

/// Decoder tower: `z -> relu(fc) -> reconstruction` (no output
/// activation)
pub struct DenseDecoder {
    fc: StackLayers<Linear>,
    recon: Linear,
}

impl DenseDecoder {
    /// Will create a new decoder with the following parameters:
    /// * `dec.fc.{}.weight` where {} is the layer index
    /// * `dec.recon.weight`
    ///
    /// and their `bias` counterparts
    pub fn new(
        n_latent: usize,
        n_output: usize,
        layers: &[usize],
        vs: SeededVarBuilder,
    ) -> Result<Self> {
        if layers.is_empty() {
            candle_core::bail!("decoder needs at least one hidden layer");
        }

        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = n_latent;
        for (j, &next_dim) in layers.iter().enumerate() {
            fc.push_with_act(
                linear(prev_dim, next_dim, vs.pp(format!("dec.fc.{}", j)))?,
                candle_nn::Activation::Relu,
            );
            prev_dim = next_dim;
        }

        let recon = linear(prev_dim, n_output, vs.pp("dec.recon"))?;

        Ok(Self {
            fc,
            recon,
        })
    }
}

impl DecoderModuleT for DenseDecoder {
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor> {
        let h_nl = self.fc.forward(z_nk)?;
        self.recon.forward(&h_nl)
    }

    fn weight_sq_norm(&self, dev: &Device) -> Result<Tensor> {
        self.fc
            .weight_sq_norm(dev)?
            .add(&sq_frobenius_norm(self.recon.weight())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;

    #[test]
    fn decoder_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let rng = RefCell::new(StdRng::seed_from_u64(5));
        let vs = SeededVarBuilder::new(&varmap, &rng, &dev);
        let dec = DenseDecoder::new(3, 4, &[7], vs.pp("item"))?;

        let z = Tensor::ones((2, 3), DType::F32, &dev)?;
        assert_eq!(dec.forward(&z)?.dims(), &[2, 4]);

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["item.dec.fc.0.weight"].dims(), &[7, 3]);
        assert_eq!(data["item.dec.recon.weight"].dims(), &[4, 7]);
        assert_eq!(data["item.dec.recon.bias"].dims(), &[4]);
        Ok(())
    }

    #[test]
    fn weight_norm_is_non_negative() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let rng = RefCell::new(StdRng::seed_from_u64(5));
        let vs = SeededVarBuilder::new(&varmap, &rng, &dev);
        let dec = DenseDecoder::new(3, 4, &[7], vs)?;
        let l2 = dec.weight_sq_norm(&dev)?.to_scalar::<f32>()?;
        assert!(l2 > 0.);
        // 49 weights bounded by (2 * 0.001)^2
        assert!(l2 <= 49. * 4e-6);
        Ok(())
    }
}
