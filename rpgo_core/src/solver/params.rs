// rpgo_core/src/solver/params.rs

//! Construction parameters for the `RobustSolver`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;

/// Which outlier-rejection strategy guards the graph. Fixed for the solver's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutlierRemovalMethod {
    /// Every factor is admitted.
    #[default]
    None,
    Pcm2D,
    Pcm3D,
    PcmSimple2D,
    PcmSimple3D,
}

impl OutlierRemovalMethod {
    /// Whether the method uses the Mahalanobis thresholds (`odom`/`lc`) or
    /// the distance thresholds (`trans`/`rot`).
    fn uses_mahalanobis(&self) -> bool {
        matches!(self, Self::Pcm2D | Self::Pcm3D)
    }
}

/// Lowercased with `_`, `-` and spaces removed.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for OutlierRemovalMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "none" => Ok(Self::None),
            "pcm2d" => Ok(Self::Pcm2D),
            "pcm3d" => Ok(Self::Pcm3D),
            "pcmsimple2d" => Ok(Self::PcmSimple2D),
            "pcmsimple3d" => Ok(Self::PcmSimple3D),
            _ => Err(ConfigError::UnknownOutlierRemoval(s.to_string())),
        }
    }
}

impl fmt::Display for OutlierRemovalMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Pcm2D => "pcm2d",
            Self::Pcm3D => "pcm3d",
            Self::PcmSimple2D => "pcm_simple2d",
            Self::PcmSimple3D => "pcm_simple3d",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverMode {
    GaussNewton,
    #[default]
    LevenbergMarquardt,
}

impl FromStr for SolverMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "gn" | "gaussnewton" => Ok(Self::GaussNewton),
            "lm" | "levenbergmarquardt" => Ok(Self::LevenbergMarquardt),
            _ => Err(ConfigError::UnknownSolver(s.to_string())),
        }
    }
}

/// How much the solver and its strategy report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Solver output only; the strategy is quiet.
    #[default]
    Update,
    /// Nothing but warnings.
    Quiet,
    /// Solver, strategy and per-iteration optimizer output.
    Verbose,
}

impl Verbosity {
    /// Parses a verbosity name. Unrecognized names fall back to `Update`.
    pub fn parse_lossy(s: &str) -> Self {
        match normalize(s).as_str() {
            "update" => Self::Update,
            "quiet" => Self::Quiet,
            "verbose" => Self::Verbose,
            _ => {
                warn!("Unrecognized verbosity '{}'. Automatically setting to UPDATE.", s);
                Self::Update
            }
        }
    }
}

/// Parameters consumed by `RobustSolver::new`.
///
/// The Mahalanobis thresholds apply to `Pcm2D`/`Pcm3D`, the distance
/// thresholds to `PcmSimple2D`/`PcmSimple3D`.
#[derive(Debug, Clone, PartialEq)]
pub struct RobustSolverParams {
    pub outlier_removal: OutlierRemovalMethod,
    pub solver: SolverMode,
    pub verbosity: Verbosity,
    pub odom_threshold: f64,
    pub lc_threshold: f64,
    pub trans_threshold: f64,
    pub rot_threshold: f64,
    /// Prefixes of landmark variables.
    pub special_symbols: BTreeSet<char>,
    /// When set, the solver starts with file logging enabled in this folder.
    pub log_folder: Option<PathBuf>,
}

impl Default for RobustSolverParams {
    fn default() -> Self {
        Self {
            outlier_removal: OutlierRemovalMethod::None,
            solver: SolverMode::LevenbergMarquardt,
            verbosity: Verbosity::Update,
            odom_threshold: 5.0,
            lc_threshold: 5.0,
            trans_threshold: 0.05,
            rot_threshold: 0.005,
            special_symbols: BTreeSet::new(),
            log_folder: None,
        }
    }
}

/// On-disk layout; method names are kept as strings so unknown ones map
/// to typed errors instead of parse failures.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct ParamsFile {
    outlier_removal: String,
    solver: String,
    verbosity: String,
    odom_threshold: f64,
    lc_threshold: f64,
    trans_threshold: f64,
    rot_threshold: f64,
    special_symbols: Vec<char>,
    log_folder: Option<PathBuf>,
}

impl Default for ParamsFile {
    fn default() -> Self {
        let d = RobustSolverParams::default();
        Self {
            outlier_removal: d.outlier_removal.to_string(),
            solver: "lm".to_string(),
            verbosity: "update".to_string(),
            odom_threshold: d.odom_threshold,
            lc_threshold: d.lc_threshold,
            trans_threshold: d.trans_threshold,
            rot_threshold: d.rot_threshold,
            special_symbols: Vec::new(),
            log_folder: None,
        }
    }
}

impl TryFrom<ParamsFile> for RobustSolverParams {
    type Error = ConfigError;

    fn try_from(file: ParamsFile) -> Result<Self, Self::Error> {
        let params = Self {
            outlier_removal: file.outlier_removal.parse()?,
            solver: file.solver.parse()?,
            verbosity: Verbosity::parse_lossy(&file.verbosity),
            odom_threshold: file.odom_threshold,
            lc_threshold: file.lc_threshold,
            trans_threshold: file.trans_threshold,
            rot_threshold: file.rot_threshold,
            special_symbols: file.special_symbols.into_iter().collect(),
            log_folder: file.log_folder,
        };
        params.validate()?;
        Ok(params)
    }
}

impl RobustSolverParams {
    /// Loads parameters from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }
        Self::from_figment(Figment::new().merge(Toml::file(path)))
    }

    /// Loads parameters from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let file: ParamsFile = figment.extract()?;
        file.try_into()
    }

    pub fn set_pcm_2d_params(&mut self, odom_threshold: f64, lc_threshold: f64, verbosity: Verbosity) {
        self.set_mahalanobis(OutlierRemovalMethod::Pcm2D, odom_threshold, lc_threshold, verbosity);
    }

    pub fn set_pcm_3d_params(&mut self, odom_threshold: f64, lc_threshold: f64, verbosity: Verbosity) {
        self.set_mahalanobis(OutlierRemovalMethod::Pcm3D, odom_threshold, lc_threshold, verbosity);
    }

    pub fn set_pcm_simple_2d_params(&mut self, trans_threshold: f64, rot_threshold: f64, verbosity: Verbosity) {
        self.set_distance(OutlierRemovalMethod::PcmSimple2D, trans_threshold, rot_threshold, verbosity);
    }

    pub fn set_pcm_simple_3d_params(&mut self, trans_threshold: f64, rot_threshold: f64, verbosity: Verbosity) {
        self.set_distance(OutlierRemovalMethod::PcmSimple3D, trans_threshold, rot_threshold, verbosity);
    }

    pub fn set_no_rejection(&mut self, verbosity: Verbosity) {
        self.outlier_removal = OutlierRemovalMethod::None;
        self.verbosity = verbosity;
    }

    pub fn set_solver(&mut self, solver: SolverMode) {
        self.solver = solver;
    }

    pub fn set_special_symbols(&mut self, symbols: impl IntoIterator<Item = char>) {
        self.special_symbols = symbols.into_iter().collect();
    }

    pub fn set_log_folder(&mut self, folder: impl Into<PathBuf>) {
        self.log_folder = Some(folder.into());
    }

    fn set_mahalanobis(&mut self, method: OutlierRemovalMethod, odom: f64, lc: f64, verbosity: Verbosity) {
        self.outlier_removal = method;
        self.odom_threshold = odom;
        self.lc_threshold = lc;
        self.verbosity = verbosity;
    }

    fn set_distance(&mut self, method: OutlierRemovalMethod, trans: f64, rot: f64, verbosity: Verbosity) {
        self.outlier_removal = method;
        self.trans_threshold = trans;
        self.rot_threshold = rot;
        self.verbosity = verbosity;
    }

    /// Checks the thresholds used by the selected method.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds: &[(&'static str, f64)] = match self.outlier_removal {
            OutlierRemovalMethod::None => &[],
            m if m.uses_mahalanobis() => &[
                ("odom_threshold", self.odom_threshold),
                ("lc_threshold", self.lc_threshold),
            ],
            _ => &[
                ("trans_threshold", self.trans_threshold),
                ("rot_threshold", self.rot_threshold),
            ],
        };
        for &(name, value) in thresholds {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        Ok(())
    }
}
