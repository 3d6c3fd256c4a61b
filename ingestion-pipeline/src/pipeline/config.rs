#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_backoff_cap_exponent: u32,
    /// Chunk texts per embedding request.
    pub embed_batch_size: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 15 * 60,
            retry_backoff_cap_exponent: 5,
            embed_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    /// Character window and overlap for the splitter. The same values with
    /// the same input bytes always reproduce the same chunk set.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            chunk_size: 1200,
            chunk_overlap: 200,
        }
    }
}

impl IngestionConfig {
    pub fn from_app_config(config: &common::utils::config::AppConfig) -> Self {
        Self {
            tuning: IngestionTuning::default(),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }
}
