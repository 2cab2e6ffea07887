use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use galcore::spatial::pairs::SeparationMetric;
use galcore::spatial::periodic::ImageSet;
use galcore::SnapNum;
use tracing::warn;

use crate::error::Result;
use crate::pipeline::PipelineConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MetricArg {
    Projected,
    Spatial,
}

impl From<MetricArg> for SeparationMetric {
    fn from(m: MetricArg) -> Self {
        match m {
            MetricArg::Projected => SeparationMetric::Projected,
            MetricArg::Spatial => SeparationMetric::Spatial,
        }
    }
}

/// Count galaxy close pairs and write their properties, one file per snapshot.
#[derive(Debug, Parser)]
#[command(name = "count_pairs")]
#[command(version)]
pub struct Args {
    /// SQLite catalog store (subhalos, groups, header)
    pub catalog: PathBuf,

    /// SQLite merger tree store
    pub tree: PathBuf,

    /// SQLite environment store (overdensities)
    pub environment: PathBuf,

    /// Output prefix, files are named `{prefix}_{snapnum:03}`
    pub writepath: PathBuf,

    pub snapnum_first: SnapNum,

    pub snapnum_last: SnapNum,

    /// JSON file with pipeline parameters; flags below override it
    #[arg(long)]
    pub params: Option<PathBuf>,

    /// Inner radius of the annulus
    #[arg(long)]
    pub rmin: Option<f64>,

    /// Outer radius of the annulus
    #[arg(long)]
    pub rmax: Option<f64>,

    /// Minimum stellar mass of a subject
    #[arg(long)]
    pub mstar_min: Option<f32>,

    #[arg(long, value_enum)]
    pub metric: Option<MetricArg>,

    /// Also create edge and corner images
    #[arg(long)]
    pub all_images: bool,

    /// Only replicate galaxies within this distance of a face
    #[arg(long)]
    pub ghost_margin: Option<f64>,

    /// Skip the merger tree lineage
    #[arg(long)]
    pub no_lineage: bool,

    /// Write each unordered pair once
    #[arg(long)]
    pub unique: bool,

    /// zstd-compress the output files
    #[arg(long)]
    pub compress: bool,

    /// Number of worker threads, 0 uses all cores; 1 runs sequentially
    #[arg(short = 'j', long, default_value = "0")]
    pub threads: usize,
}

impl Args {
    /// Parameters from `--params` (or defaults) with the command-line overrides applied.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.params {
            Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
            None => PipelineConfig::default(),
        };

        config.snapnum_first = self.snapnum_first;
        config.snapnum_last = self.snapnum_last;
        if let Some(rmin) = self.rmin {
            config.search.rmin = rmin;
        }
        if let Some(rmax) = self.rmax {
            config.search.rmax = rmax;
        }
        if let Some(mstar_min) = self.mstar_min {
            config.search.mstar_min = mstar_min;
        }
        if let Some(metric) = self.metric {
            config.search.metric = metric.into();
        }
        if self.all_images {
            config.ghosts.images = ImageSet::All;
        }
        if self.ghost_margin.is_some() {
            config.ghosts.margin = self.ghost_margin;
        }
        if self.threads == 1 {
            config.search.parallel = false;
        }
        config.lineage &= !self.no_lineage;
        config.unique_pairs |= self.unique;
        config.compress |= self.compress;

        config.validate()?;
        Ok(config)
    }
}

/// Size the global rayon pool; `0` keeps the default. Returns false (and logs)
/// when the pool could not be configured, e.g. because it already exists.
pub fn configure_thread_pool(threads: usize) -> bool {
    if threads == 0 {
        return true;
    }
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
        Ok(()) => true,
        Err(e) => {
            warn!(threads, error = %e, "unable to configure the thread pool");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["count_pairs", "sim.db", "tree.db", "env.db", "out/pairs", "10", "20"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).pipeline_config().unwrap();
        assert_eq!((config.snapnum_first, config.snapnum_last), (10, 20));
        assert_eq!(config.search.rmin, 5.0);
        assert_eq!(config.search.rmax, 20.0);
        assert_eq!(config.search.mstar_min, 0.704);
        assert!(config.lineage);
        assert!(config.search.parallel);
    }

    #[test]
    fn test_overrides() {
        let args = parse(&["--rmax", "50", "--metric", "spatial", "--all-images", "--no-lineage", "-j", "1", "--compress"]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.search.rmax, 50.0);
        assert_eq!(config.search.metric, SeparationMetric::Spatial);
        assert_eq!(config.ghosts.images, ImageSet::All);
        assert!(!config.lineage);
        assert!(!config.search.parallel);
        assert!(config.compress);
    }

    #[test]
    fn test_params_file() {
        let path = std::env::temp_dir().join(format!("galdf-params-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"search": {"rmin": 1.0, "rmax": 30.0}, "unique_pairs": true}"#).unwrap();

        let args = parse(&["--params", path.to_str().unwrap(), "--rmin", "2.5"]);
        let config = args.pipeline_config().unwrap();
        assert_eq!(config.search.rmin, 2.5);
        assert_eq!(config.search.rmax, 30.0);
        assert!(config.unique_pairs);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_radii() {
        assert!(parse(&["--rmin", "30"]).pipeline_config().is_err());
        assert!(Args::try_parse_from(["count_pairs", "a", "b", "c", "d", "x", "1"]).is_err());
    }

    #[test]
    fn test_thread_pool_configured_once() {
        assert!(configure_thread_pool(0));
        configure_thread_pool(2);
        // the global pool exists now, a second attempt is reported
        assert!(!configure_thread_pool(2));
    }
}
