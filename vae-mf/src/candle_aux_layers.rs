use std::cell::RefCell;

use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{Activation, Linear, Module, VarMap};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, StandardNormal};

/// Standard deviation of the affine weight initialization
pub const INIT_WEIGHT_STD: f64 = 0.001;

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }
}

impl StackLayers<Linear> {
    /// Sum of squared Frobenius norms of all the weight matrices
    /// (biases excluded)
    pub fn weight_sq_norm(&self, dev: &Device) -> Result<Tensor> {
        let mut ret = Tensor::zeros((), DType::F32, dev)?;
        for layer in self.module_layers.iter() {
            ret = ret.add(&sq_frobenius_norm(layer.weight())?)?;
        }
        Ok(ret)
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

/// `||W||_F^2 = sum_ij W(i,j)^2`
pub fn sq_frobenius_norm(w: &Tensor) -> Result<Tensor> {
    w.sqr()?.sum_all()
}

/////////////////////////////////////////////
// Variable builder with a seeded generator //
/////////////////////////////////////////////

/// Registers trainable variables in a `VarMap`, drawing initial
/// values from a shared, seedable generator so that the whole
/// parameter set is reproducible. Names are joined by `.` as in
/// `candle_nn::VarBuilder::pp`.
#[derive(Clone)]
pub struct SeededVarBuilder<'a> {
    varmap: &'a VarMap,
    rng: &'a RefCell<StdRng>,
    device: &'a Device,
    path: Vec<String>,
}

impl<'a> SeededVarBuilder<'a> {
    pub fn new(varmap: &'a VarMap, rng: &'a RefCell<StdRng>, device: &'a Device) -> Self {
        Self {
            varmap,
            rng,
            device,
            path: vec![],
        }
    }

    /// push a prefix
    pub fn pp<S: ToString>(&self, s: S) -> Self {
        let mut path = self.path.clone();
        path.push(s.to_string());
        Self {
            varmap: self.varmap,
            rng: self.rng,
            device: self.device,
            path,
        }
    }

    fn full_name(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path.join("."), name)
        }
    }

    fn register(&self, name: &str, value: Tensor) -> Result<Tensor> {
        let name = self.full_name(name);
        let var = Var::from_tensor(&value)?;
        let ret = var.as_tensor().clone();
        let mut data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("variable map lock: {}", e)))?;
        if data.contains_key(&name) {
            candle_core::bail!("duplicate variable name {}", name);
        }
        data.insert(name, var);
        Ok(ret)
    }

    /// A `rows x cols` variable ~ N(0, stdev^2) truncated at two
    /// standard deviations
    pub fn get_truncated_normal(
        &self,
        (rows, cols): (usize, usize),
        name: &str,
        stdev: f64,
    ) -> Result<Tensor> {
        let value = {
            let mut rng = self.rng.borrow_mut();
            truncated_normal((rows, cols), stdev, &mut rng, self.device)?
        };
        self.register(name, value)
    }

    /// A zero-initialized vector variable
    pub fn get_zeros(&self, dim: usize, name: &str) -> Result<Tensor> {
        self.register(name, Tensor::zeros(dim, DType::F32, self.device)?)
    }
}

/// Affine layer `x W^T + b` with `W ~ N(0, 0.001^2)` (truncated)
/// and `b = 0`; variables `{prefix}.weight` (out x in) and
/// `{prefix}.bias` (out)
pub fn linear(in_dim: usize, out_dim: usize, vs: SeededVarBuilder) -> Result<Linear> {
    let ws = vs.get_truncated_normal((out_dim, in_dim), "weight", INIT_WEIGHT_STD)?;
    let bs = vs.get_zeros(out_dim, "bias")?;
    Ok(Linear::new(ws, Some(bs)))
}

/// Sample a `rows x cols` matrix from `N(0, stdev^2)`, redrawing
/// anything beyond two standard deviations
pub fn truncated_normal(
    (rows, cols): (usize, usize),
    stdev: f64,
    rng: &mut StdRng,
    dev: &Device,
) -> Result<Tensor> {
    let normal = Normal::new(0_f32, stdev as f32)
        .map_err(|e| candle_core::Error::Msg(format!("normal distribution: {}", e)))?;
    let bound = 2. * stdev as f32;
    let data = (0..(rows * cols))
        .map(|_| loop {
            let x = normal.sample(rng);
            if x.abs() <= bound {
                break x;
            }
        })
        .collect::<Vec<f32>>();
    Tensor::from_vec(data, (rows, cols), dev)
}

/// Sample a `rows x cols` matrix from `N(0, 1)`
pub fn standard_normal(
    (rows, cols): (usize, usize),
    rng: &mut StdRng,
    dev: &Device,
) -> Result<Tensor> {
    let data: Vec<f32> = StandardNormal.sample_iter(rng).take(rows * cols).collect();
    Tensor::from_vec(data, (rows, cols), dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn linear_registers_weight_and_bias() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let rng = RefCell::new(StdRng::seed_from_u64(7));
        let vs = SeededVarBuilder::new(&varmap, &rng, &dev);

        let layer = linear(5, 3, vs.pp("user").pp("fc"))?;
        assert_eq!(layer.weight().dims(), &[3, 5]);

        let data = varmap.data().lock().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data["user.fc.weight"].dims(), &[3, 5]);
        assert_eq!(data["user.fc.bias"].dims(), &[3]);

        let bias = data["user.fc.bias"].as_tensor().to_vec1::<f32>()?;
        assert!(bias.iter().all(|&b| b == 0.));
        Ok(())
    }

    #[test]
    fn duplicate_names_are_rejected() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let rng = RefCell::new(StdRng::seed_from_u64(7));
        let vs = SeededVarBuilder::new(&varmap, &rng, &dev);

        linear(2, 2, vs.pp("fc"))?;
        assert!(linear(2, 2, vs.pp("fc")).is_err());
        Ok(())
    }

    #[test]
    fn truncated_normal_stays_in_band() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let x = truncated_normal((40, 50), INIT_WEIGHT_STD, &mut rng, &Device::Cpu)?;
        let x = x.flatten_all()?.to_vec1::<f32>()?;
        let bound = 2. * INIT_WEIGHT_STD as f32;
        assert!(x.iter().all(|v| v.abs() <= bound));
        assert!(x.iter().any(|&v| v != 0.));
        Ok(())
    }

    #[test]
    fn seeded_draws_repeat() -> Result<()> {
        let a = standard_normal((4, 3), &mut StdRng::seed_from_u64(3), &Device::Cpu)?;
        let b = standard_normal((4, 3), &mut StdRng::seed_from_u64(3), &Device::Cpu)?;
        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn stack_weight_norm() -> Result<()> {
        let dev = Device::Cpu;
        let w1 = Tensor::new(&[[1f32, 2.], [0., 1.]], &dev)?;
        let w2 = Tensor::new(&[[3f32, 0.]], &dev)?;
        let mut fc = StackLayers::<Linear>::new();
        fc.push_with_act(
            Linear::new(w1, Some(Tensor::new(&[10f32, 10.], &dev)?)),
            Activation::Relu,
        );
        fc.push(Linear::new(w2, None));

        let norm = fc.weight_sq_norm(&dev)?.to_scalar::<f32>()?;
        assert_eq!(norm, 15.);

        let x = Tensor::new(&[[1f32, -1.]], &dev)?;
        // relu([-1 + 10, -1 + 10]) = [9, 9] -> 27
        let y = fc.forward(&x)?.to_vec2::<f32>()?;
        assert_eq!(y, vec![vec![27.]]);
        Ok(())
    }
}
