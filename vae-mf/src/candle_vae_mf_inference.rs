use crate::candle_inference::TrainConfig;
use crate::candle_rating_data::*;
use crate::candle_vae_mf::VaeMf;
use crate::summary_writer::SummaryWriter;

use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info};

/// Held-out scores at one checkpoint
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EvalRecord {
    pub step: usize,
    pub mse: f32,
    pub mae: f32,
    pub rmse: f32,
}

/// Per-step training scores and held-out evaluations
#[derive(Clone, Debug, Default)]
pub struct TrainTrace {
    pub num_train: usize,
    pub num_held_out: usize,
    /// regularized loss of each step
    pub loss: Vec<f32>,
    pub mse: Vec<f32>,
    pub mae: Vec<f32>,
    pub evaluations: Vec<EvalRecord>,
}

impl VaeMf {
    ///
    /// Train on the nonzero entries of `ratings`
    ///
    /// The observed coordinates are split (in matrix order) into a
    /// training prefix of `floor(n * train_prop)` entries and a
    /// held-out suffix. Each step samples a minibatch with
    /// replacement from the prefix and takes one Adam step on the
    /// regularized loss. Every `eval_interval` steps the parameters
    /// are written to `checkpoint_dir` and, if anything is held out,
    /// the whole held-out set is scored.
    ///
    pub fn train<M: RatingMatrix>(
        &mut self,
        ratings: &M,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainTrace> {
        train_config.validate()?;
        self.check_ratings(ratings)?;

        let split = RatingSplit::from_matrix(ratings, train_config.train_prop);
        let batch_size = self.config().batch_size;
        if split.train.len() < batch_size {
            return Err(anyhow::anyhow!(
                "insufficient training data: {} observed ratings in the train partition, batch size {}",
                split.train.len(),
                batch_size
            ));
        }

        if !train_config.warm_start {
            self.reset_parameters()?;
        }

        let held_out_feed = if split.held_out.is_empty() {
            None
        } else {
            Some(RatingFeed::new(ratings, &split.held_out, self.device())?)
        };

        let mut adam = AdamW::new(
            self.parameters().all_vars(),
            ParamsAdamW {
                lr: self.config().learning_rate,
                weight_decay: 0.,
                ..Default::default()
            },
        )?;

        let mut summary = SummaryWriter::create(&train_config.summary_dir)?;

        let pb = ProgressBar::new(train_config.num_steps as u64);

        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut trace = TrainTrace {
            num_train: split.train.len(),
            num_held_out: split.held_out.len(),
            loss: Vec::with_capacity(train_config.num_steps),
            mse: Vec::with_capacity(train_config.num_steps),
            mae: Vec::with_capacity(train_config.num_steps),
            evaluations: vec![],
        };

        info!(
            "Start training VAE-MF: {} train, {} held-out ratings",
            trace.num_train, trace.num_held_out
        );

        for step in 1..=train_config.num_steps {
            let batch = {
                let mut rng = self.rng().borrow_mut();
                sample_minibatch(&split.train, batch_size, &mut rng)?
            };
            let feed = RatingFeed::new(ratings, &batch, self.device())?;

            let loss = self.loss(&feed, true)?;
            loss.stats.check_finite(step)?;
            adam.backward_step(&loss.regularized_loss)?;

            summary.add_scalar(step, "mean_squared_error", loss.stats.mse)?;
            trace.loss.push(loss.stats.regularized_loss);
            trace.mse.push(loss.stats.mse);
            trace.mae.push(loss.stats.mae);

            if train_config.verbose {
                debug!(
                    "[{}] loss: {}, kl: {}, mse: {}, mae: {}",
                    step,
                    loss.stats.regularized_loss,
                    loss.stats.kl,
                    loss.stats.mse,
                    loss.stats.mae
                );
            }
            pb.inc(1);

            if step % train_config.eval_interval == 0 {
                self.save_checkpoint(&train_config.checkpoint_dir)?;
                summary.flush()?;

                if let Some(feed) = held_out_feed.as_ref() {
                    let stats = self.evaluate_feed(feed)?;
                    info!(
                        "Step {} | Test MSE: {}, MAE: {}, RMSE: {}",
                        step, stats.mse, stats.mae, stats.rmse
                    );
                    trace.evaluations.push(EvalRecord {
                        step,
                        mse: stats.mse,
                        mae: stats.mae,
                        rmse: stats.rmse,
                    });
                }
            }
        }

        summary.flush()?;
        pb.finish_and_clear();

        info!("done model training");
        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_aux_layers::INIT_WEIGHT_STD;
    use crate::candle_vae_mf::VaeMfConfig;
    use candle_core::Device;
    use nalgebra::DMatrix;

    fn config() -> VaeMfConfig {
        VaeMfConfig {
            hidden_encoder_dim: 8,
            hidden_decoder_dim: 8,
            latent_dim: 3,
            output_dim: 3,
            batch_size: 4,
            seed: Some(3),
            ..VaeMfConfig::new(6, 5)
        }
    }

    fn ratings() -> DMatrix<f32> {
        DMatrix::<f32>::from_fn(5, 6, |u, i| ((u + 2 * i) % 5) as f32)
    }

    #[test]
    fn insufficient_data_fails_before_training() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut m = DMatrix::<f32>::zeros(5, 6);
        m[(0, 0)] = 4.;
        m[(3, 5)] = 2.;
        let mut model = VaeMf::new(config(), &Device::Cpu)?;
        let train_config = TrainConfig {
            num_steps: 3,
            checkpoint_dir: dir.path().join("save"),
            summary_dir: dir.path().join("experiment"),
            show_progress: false,
            ..Default::default()
        };
        let err = model.train(&m, &train_config).unwrap_err();
        assert!(err.to_string().contains("insufficient training data"));
        assert!(!dir.path().join("save").exists());
        Ok(())
    }

    #[test]
    fn checkpoint_and_evaluation_cadence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut model = VaeMf::new(config(), &Device::Cpu)?;
        let train_config = TrainConfig {
            num_steps: 7,
            train_prop: 0.75,
            eval_interval: 3,
            checkpoint_dir: dir.path().join("save"),
            summary_dir: dir.path().join("experiment"),
            show_progress: false,
            ..Default::default()
        };
        let trace = model.train(&ratings(), &train_config)?;

        assert_eq!(trace.loss.len(), 7);
        assert_eq!(trace.mse.len(), 7);
        assert_eq!(trace.num_train + trace.num_held_out, 24);
        assert_eq!(trace.num_train, 18);

        let steps: Vec<usize> = trace.evaluations.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![3, 6]);
        for e in trace.evaluations.iter() {
            approx::assert_abs_diff_eq!(e.rmse, e.mse.sqrt(), epsilon = 1e-4);
        }

        assert!(dir.path().join("save").join("model.safetensors").exists());
        assert!(dir.path().join("save").join("model.json").exists());

        let summary = std::fs::read_to_string(dir.path().join("experiment").join("summary.tsv"))?;
        // header + one record per step
        assert_eq!(summary.lines().count(), 8);
        Ok(())
    }

    #[test]
    fn no_evaluation_without_held_out() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut model = VaeMf::new(config(), &Device::Cpu)?;
        let train_config = TrainConfig {
            num_steps: 4,
            train_prop: 1.0,
            eval_interval: 2,
            checkpoint_dir: dir.path().join("save"),
            summary_dir: dir.path().join("experiment"),
            show_progress: false,
            ..Default::default()
        };
        let trace = model.train(&ratings(), &train_config)?;
        assert_eq!(trace.num_held_out, 0);
        assert!(trace.evaluations.is_empty());
        assert!(dir.path().join("save").join("model.safetensors").exists());
        Ok(())
    }

    #[test]
    fn invalid_train_config() -> anyhow::Result<()> {
        let mut model = VaeMf::new(config(), &Device::Cpu)?;
        for train_config in [
            TrainConfig {
                train_prop: 0.,
                ..Default::default()
            },
            TrainConfig {
                train_prop: 1.5,
                ..Default::default()
            },
            TrainConfig {
                eval_interval: 0,
                ..Default::default()
            },
        ] {
            assert!(model.train(&ratings(), &train_config).is_err());
        }
        Ok(())
    }

    #[test]
    fn infinite_rating_stops_before_update() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = ratings().map(|x| if x != 0. { f32::INFINITY } else { 0. });
        let mut model = VaeMf::new(config(), &Device::Cpu)?;
        let before = model.named_parameters()?;
        let train_config = TrainConfig {
            num_steps: 5,
            eval_interval: 1,
            checkpoint_dir: dir.path().join("save"),
            summary_dir: dir.path().join("experiment"),
            show_progress: false,
            ..Default::default()
        };
        let err = model.train(&m, &train_config).unwrap_err();
        assert!(err.to_string().contains("non-finite loss at step 1"));
        assert!(!dir.path().join("save").exists());

        // a fresh draw at entry, then no update
        let bound = 2. * INIT_WEIGHT_STD as f32;
        let after = model.named_parameters()?;
        assert_eq!(before.len(), after.len());
        for (_, x) in after.iter() {
            let x = x.flatten_all()?.to_vec1::<f32>()?;
            assert!(x.iter().all(|v| v.abs() <= bound));
        }
        Ok(())
    }

    #[test]
    fn checkpoint_write_failure_is_fatal() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("save");
        std::fs::write(&blocker, "not a directory")?;

        let mut model = VaeMf::new(config(), &Device::Cpu)?;
        let train_config = TrainConfig {
            num_steps: 6,
            eval_interval: 2,
            checkpoint_dir: blocker.clone(),
            summary_dir: dir.path().join("experiment"),
            show_progress: false,
            ..Default::default()
        };
        assert!(model.train(&ratings(), &train_config).is_err());
        assert!(blocker.is_file());

        // header + steps 1 and 2, then the failed write at step 2
        let summary = std::fs::read_to_string(dir.path().join("experiment").join("summary.tsv"))?;
        assert_eq!(summary.lines().count(), 3);
        Ok(())
    }

    #[test]
    fn warm_start_keeps_parameters() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut model = VaeMf::new(config(), &Device::Cpu)?;
        let before = model.named_parameters()?;
        let train_config = TrainConfig {
            num_steps: 0,
            warm_start: true,
            checkpoint_dir: dir.path().join("save"),
            summary_dir: dir.path().join("experiment"),
            show_progress: false,
            ..Default::default()
        };
        model.train(&ratings(), &train_config)?;
        let after = model.named_parameters()?;
        for ((_, a), (_, b)) in before.iter().zip(after.iter()) {
            assert_eq!(
                a.flatten_all()?.to_vec1::<f32>()?,
                b.flatten_all()?.to_vec1::<f32>()?
            );
        }
        Ok(())
    }
}
