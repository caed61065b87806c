use std::path::PathBuf;

pub struct TrainConfig {
    /// number of optimizer steps
    pub num_steps: usize,
    /// fraction of the observed ratings used for training; the
    /// rest is held out for evaluation
    pub train_prop: f64,
    /// checkpoint and held-out evaluation cadence (in steps)
    pub eval_interval: usize,
    /// checkpoints are overwritten in this directory
    pub checkpoint_dir: PathBuf,
    /// run summary records are appended in this directory
    pub summary_dir: PathBuf,
    /// continue from the current parameters instead of
    /// re-initializing them
    pub warm_start: bool,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_steps: 100_000,
            train_prop: 0.9,
            eval_interval: 50,
            checkpoint_dir: PathBuf::from("save"),
            summary_dir: PathBuf::from("experiment"),
            warm_start: false,
            show_progress: true,
            verbose: false,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.train_prop > 0. && self.train_prop <= 1.) {
            return Err(anyhow::anyhow!(
                "train_prop must be in (0, 1], got {}",
                self.train_prop
            ));
        }
        if self.eval_interval == 0 {
            return Err(anyhow::anyhow!("eval_interval must be positive"));
        }
        Ok(())
    }
}
