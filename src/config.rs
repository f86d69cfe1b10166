/// Run configuration for the Dual forecaster
///
/// Multi-word flags are spelled with underscores (`--seq_len`, `--es_patience`).
use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

/// Default save prefix: `./logs/<timestamp>-`
pub fn default_save_prefix() -> String {
    format!("./logs/{}-", chrono::Local::now().format("%Y-%m-%d-%H:%M:%S"))
}

#[derive(Debug, Clone, Parser, serde::Serialize, serde::Deserialize)]
#[command(name = "train_recon", about = "Train and evaluate the Dual forecaster")]
pub struct RunConfig {
    /// Compute device: cpu, cuda[:N] or metal[:N]
    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// Dataset identifier (file stem under root_path)
    #[arg(long = "data_path", default_value = "ETTh1")]
    pub data_path: String,

    /// Directory holding the dataset files
    #[arg(long = "root_path", default_value = "./dataset/")]
    pub root_path: String,

    /// Student embedding width
    #[arg(long, default_value_t = 512)]
    pub channel: usize,

    /// Number of series (variates)
    #[arg(long = "num_nodes", default_value_t = 7)]
    pub num_nodes: usize,

    /// Input window length
    #[arg(long = "seq_len", default_value_t = 96)]
    pub seq_len: usize,

    /// Forecast horizon length
    #[arg(long = "pred_len", default_value_t = 96)]
    pub pred_len: usize,

    #[arg(long = "batch_size", default_value_t = 32)]
    pub batch_size: usize,

    /// Learning rate
    #[arg(long, default_value_t = 1e-4)]
    pub lrate: f64,

    /// Dropout rate of the network layers
    #[arg(long = "dropout_n", default_value_t = 0.2)]
    pub dropout_n: f64,

    /// Hidden width of the language-model context path
    #[arg(long = "d_llm", default_value_t = 768)]
    pub d_llm: usize,

    /// Blocks in the context path
    #[arg(long = "l_layer", default_value_t = 1)]
    pub l_layer: usize,

    /// Blocks in the student encoder
    #[arg(long = "e_layer", default_value_t = 1)]
    pub e_layer: usize,

    /// Attention heads
    #[arg(long, default_value_t = 8)]
    pub head: usize,

    /// Language model the context path stands in for
    #[arg(long = "model_name", default_value = "gpt2")]
    pub model_name: String,

    #[arg(long = "weight_decay", default_value_t = 1e-3)]
    pub weight_decay: f64,

    /// Data loader worker threads (0 = assemble batches inline)
    #[arg(long = "num_workers", default_value_t = 10)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    #[arg(long, default_value_t = 2036)]
    pub seed: u64,

    /// Quit if no improvement after this many epochs
    #[arg(long = "es_patience", default_value_t = 50)]
    pub es_patience: usize,

    /// Save path prefix
    #[arg(long, default_value_t = default_save_prefix())]
    pub save: String,

    /// Keep the context path fixed; only the student side is optimised
    #[arg(long = "freeze_llm", default_value_t = false)]
    pub freeze_llm: bool,
}

impl RunConfig {
    /// Parse from an argument list (first item is the program name)
    ///
    /// `--help` and `--version` print and exit; every other parse failure is a
    /// configuration error.
    pub fn from_args<I, T>(args: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match Self::try_parse_from(args) {
            Ok(config) => Ok(config),
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                e.exit()
            }
            Err(e) => Err(crate::ForecastError::Config(e.to_string())),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        let sizes = [
            ("channel", self.channel),
            ("num_nodes", self.num_nodes),
            ("seq_len", self.seq_len),
            ("pred_len", self.pred_len),
            ("batch_size", self.batch_size),
            ("d_llm", self.d_llm),
            ("head", self.head),
            ("epochs", self.epochs),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(crate::ForecastError::Config(format!("{} must be > 0", name)));
            }
        }

        if self.channel % self.head != 0 {
            return Err(crate::ForecastError::Config(format!(
                "channel ({}) must be divisible by head ({})",
                self.channel, self.head
            )));
        }

        if self.d_llm % self.head != 0 {
            return Err(crate::ForecastError::Config(format!(
                "d_llm ({}) must be divisible by head ({})",
                self.d_llm, self.head
            )));
        }

        if !(0.0..1.0).contains(&self.dropout_n) {
            return Err(crate::ForecastError::Config(format!(
                "dropout_n must be in [0, 1), got {}",
                self.dropout_n
            )));
        }

        if !(self.lrate > 0.0) {
            return Err(crate::ForecastError::Config(format!(
                "lrate must be > 0, got {}",
                self.lrate
            )));
        }

        Ok(())
    }

    /// Directory holding this run's checkpoint:
    /// `<save>/<data_path>/<pred_len>_<channel>_<e_layer>_<lrate>_<dropout_n>_<seed>`
    pub fn run_dir(&self) -> PathBuf {
        PathBuf::from(&self.save).join(&self.data_path).join(format!(
            "{}_{}_{}_{}_{}_{}",
            self.pred_len, self.channel, self.e_layer, self.lrate, self.dropout_n, self.seed
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_args(["train_recon"]).unwrap();

        assert_eq!(config.device, "cpu");
        assert_eq!(config.data_path, "ETTh1");
        assert_eq!(config.channel, 512);
        assert_eq!(config.num_nodes, 7);
        assert_eq!(config.seq_len, 96);
        assert_eq!(config.pred_len, 96);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.lrate, 1e-4);
        assert_eq!(config.dropout_n, 0.2);
        assert_eq!(config.d_llm, 768);
        assert_eq!(config.head, 8);
        assert_eq!(config.model_name, "gpt2");
        assert_eq!(config.weight_decay, 1e-3);
        assert_eq!(config.num_workers, 10);
        assert_eq!(config.epochs, 100);
        assert_eq!(config.seed, 2036);
        assert_eq!(config.es_patience, 50);
        assert!(config.save.starts_with("./logs/"));
        assert!(config.save.ends_with('-'));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_underscore_flags() {
        let config = RunConfig::from_args([
            "train_recon",
            "--data_path",
            "ETTm1",
            "--pred_len",
            "192",
            "--es_patience",
            "5",
            "--dropout_n",
            "0.1",
        ])
        .unwrap();

        assert_eq!(config.data_path, "ETTm1");
        assert_eq!(config.pred_len, 192);
        assert_eq!(config.es_patience, 5);
        assert_eq!(config.dropout_n, 0.1);
    }

    #[test]
    fn test_bad_value_is_config_error() {
        let err = RunConfig::from_args(["train_recon", "--epochs", "many"]).unwrap_err();
        assert!(matches!(err, crate::ForecastError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_indivisible_heads() {
        let mut config = RunConfig::from_args(["train_recon"]).unwrap();
        config.channel = 100;
        config.head = 8;
        assert!(matches!(config.validate(), Err(crate::ForecastError::Config(_))));

        config.channel = 64;
        config.d_llm = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_dropout() {
        let mut config = RunConfig::from_args(["train_recon"]).unwrap();
        config.dropout_n = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_dir_layout() {
        let config = RunConfig::from_args([
            "train_recon",
            "--save",
            "./logs/2024-01-01-00:00:00-",
        ])
        .unwrap();

        let expected = PathBuf::from("./logs/2024-01-01-00:00:00-")
            .join("ETTh1")
            .join("96_512_1_0.0001_0.2_2036");
        assert_eq!(config.run_dir(), expected);
    }
}
