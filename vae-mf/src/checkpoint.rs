use crate::candle_vae_mf::{VaeMf, VaeMfConfig};

use anyhow::anyhow;
use candle_core::Device;
use log::debug;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// all weights and biases (safetensors)
pub const CHECKPOINT_FILE: &str = "model.safetensors";

/// model configuration (json)
pub const CONFIG_FILE: &str = "model.json";

/// Read the configuration stored next to a checkpoint
pub fn read_checkpoint_config<P: AsRef<Path>>(dir: P) -> anyhow::Result<VaeMfConfig> {
    let path = dir.as_ref().join(CONFIG_FILE);
    let file = File::open(&path)
        .map_err(|e| anyhow!("failed to open {}: {}", path.display(), e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

impl VaeMf {
    ///
    /// Write `{dir}/model.safetensors` and `{dir}/model.json`,
    /// overwriting a previous checkpoint
    ///
    pub fn save_checkpoint<P: AsRef<Path>>(&self, dir: P) -> anyhow::Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let param_path = dir.join(CHECKPOINT_FILE);
        self.parameters()
            .save(&param_path)
            .map_err(|e| anyhow!("failed to save {}: {}", param_path.display(), e))?;

        let config_path = dir.join(CONFIG_FILE);
        let mut buf = BufWriter::new(File::create(&config_path)?);
        serde_json::to_writer_pretty(&mut buf, self.config())?;
        buf.flush()?;

        debug!("saved checkpoint: {}", param_path.display());
        Ok(())
    }

    ///
    /// Restore the parameters of this model from `dir`; the stored
    /// configuration must agree on every dimension
    ///
    pub fn load_checkpoint<P: AsRef<Path>>(&mut self, dir: P) -> anyhow::Result<()> {
        let dir = dir.as_ref();
        let stored = read_checkpoint_config(dir)?;
        let ours = self.config();

        let dims = |c: &VaeMfConfig| {
            [
                c.user_input_dim,
                c.item_input_dim,
                c.hidden_encoder_dim,
                c.hidden_decoder_dim,
                c.latent_dim,
                c.output_dim,
            ]
        };

        if dims(&stored) != dims(ours) {
            return Err(anyhow!(
                "checkpoint dimensions {:?} do not match the model {:?}",
                dims(&stored),
                dims(ours)
            ));
        }

        let param_path = dir.join(CHECKPOINT_FILE);
        self.parameters_mut()
            .load(&param_path)
            .map_err(|e| anyhow!("failed to load {}: {}", param_path.display(), e))?;
        Ok(())
    }

    /// Rebuild a model from a checkpoint directory
    pub fn from_checkpoint<P: AsRef<Path>>(dir: P, device: &Device) -> anyhow::Result<Self> {
        let config = read_checkpoint_config(&dir)?;
        let mut model = VaeMf::new(config, device)?;
        model.load_checkpoint(&dir)?;
        Ok(model)
    }
}
