use std::str::FromStr;
use structopt::StructOpt;

/// How the hit ratios of the non-target events combine into the noise term
/// subtracted from a candidate page's ratio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoiseModel {
    /// Worst-case estimate, assumes all other events fire within one
    /// measurement window.
    LinearSum,
    /// Root of the summed squares, honours rare events a bit less.
    RootSumSquare,
}

impl FromStr for NoiseModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear-sum" => Ok(NoiseModel::LinearSum),
            "rms" => Ok(NoiseModel::RootSumSquare),
            _ => Err(format!("unknown noise model: {}", s)),
        }
    }
}

/// Distance between two events' hit-ratio rows for the similarity grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimilarityMetric {
    /// Largest per-page difference.
    MaxAbsolute,
    /// Root mean square of the per-page differences.
    RootMeanSquare,
}

impl FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max-abs" => Ok(SimilarityMetric::MaxAbsolute),
            "rms" => Ok(SimilarityMetric::RootMeanSquare),
            _ => Err(format!("unknown similarity metric: {}", s)),
        }
    }
}

/// How speculative fault read-ahead around a candidate page is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadaheadMode {
    /// Assume no fault clustering exists.
    Off,
    /// Treat pages that can pull the candidate in via read-ahead as noise
    /// and subtract their ratios from the candidate's fitness.
    Noise,
    /// Accept candidates as if clustering were suppressed, then cross-check
    /// window corners of accepted pages that sit closer than one window and
    /// flag pairs the corners cannot separate.
    CornerProbe,
}

impl FromStr for ReadaheadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ReadaheadMode::Off),
            "noise" => Ok(ReadaheadMode::Noise),
            "corner-probe" => Ok(ReadaheadMode::CornerProbe),
            _ => Err(format!("unknown read-ahead mode: {}", s)),
        }
    }
}

#[derive(Clone, Debug, StructOpt)]
pub struct ClassifierConfig {
    /// events whose ratio rows differ at most this much merge into one group
    #[structopt(long, default_value = "0.5")]
    pub similarity_threshold: f64,
    /// candidates at or below this fitness are rejected
    #[structopt(long, default_value = "0.7")]
    pub fitness_threshold: f64,
    /// corner pages hotter than this cannot vouch for a candidate pair
    #[structopt(long, default_value = "0.1")]
    pub corner_threshold: f64,
    /// noise model: linear-sum | rms
    #[structopt(long, default_value = "linear-sum")]
    pub noise_model: NoiseModel,
    /// similarity metric: max-abs | rms
    #[structopt(long, default_value = "max-abs")]
    pub similarity_metric: SimilarityMetric,
    /// read-ahead handling: off | noise | corner-probe
    #[structopt(long, default_value = "corner-probe")]
    pub readahead: ReadaheadMode,
    /// kernel fault read-ahead window, in pages
    #[structopt(long, default_value = "32")]
    pub readahead_window: usize,
    /// log ascii heatmaps of the ratio rows around accepted pages
    #[structopt(long)]
    pub debug_heatmap: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            similarity_threshold: 0.5,
            fitness_threshold: 0.7,
            corner_threshold: 0.1,
            noise_model: NoiseModel::LinearSum,
            similarity_metric: SimilarityMetric::MaxAbsolute,
            readahead: ReadaheadMode::CornerProbe,
            readahead_window: 32,
            debug_heatmap: false,
        }
    }
}
