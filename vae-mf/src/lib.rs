pub mod candle_aux_layers;
pub mod candle_decoder_dense;
pub mod candle_encoder_gaussian;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_rating_data;
pub mod candle_vae_mf;
pub mod candle_vae_mf_inference;
pub mod checkpoint;
pub mod summary_writer;

pub use candle_core;
pub use candle_nn;
