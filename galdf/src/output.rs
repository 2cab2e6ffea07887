use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use galcore::spatial::pairs::CandidatePair;
use galcore::tree::lineage::LineageAnnotation;
use galcore::{SnapNum, SubfindId};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One output line: a subject, one of its neighbours and their context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairRecord {
    pub snapnum: SnapNum,
    pub subject_id: SubfindId,
    pub neighbor_id: SubfindId,
    pub separation: f64,
    pub via_ghost: bool,
    pub subject_stellar_mass: f32,
    pub neighbor_stellar_mass: f32,
    pub subject_overdensity: f32,
    pub neighbor_overdensity: f32,
    /// The subject is the more massive member, i.e. the primary of the lineage walk.
    pub subject_is_primary: bool,
    #[serde(flatten)]
    pub lineage: LineageAnnotation,
}

impl PairRecord {
    pub fn from_candidate(pair: &CandidatePair) -> Self {
        PairRecord {
            snapnum: pair.snapnum,
            subject_id: pair.subject_id,
            neighbor_id: pair.neighbor_id,
            separation: pair.separation,
            via_ghost: pair.via_ghost,
            subject_stellar_mass: 0.0,
            neighbor_stellar_mass: 0.0,
            subject_overdensity: galcore::environment::SENTINEL,
            neighbor_overdensity: galcore::environment::SENTINEL,
            subject_is_primary: true,
            lineage: LineageAnnotation::unknown(),
        }
    }
}

/// Writes one JSON-lines file per snapshot, `{prefix}_{snapnum:03}`.
#[derive(Clone, Debug)]
pub struct PairWriter {
    prefix: PathBuf,
    compress: bool,
}

impl PairWriter {
    /// `compress` wraps the files in zstd and appends `.zst`.
    pub fn new(prefix: impl Into<PathBuf>, compress: bool) -> Self {
        PairWriter { prefix: prefix.into(), compress }
    }

    pub fn path_for(&self, snapnum: SnapNum) -> PathBuf {
        let mut name = format!("{}_{:03}", self.prefix.display(), snapnum);
        if self.compress {
            name.push_str(".zst");
        }
        PathBuf::from(name)
    }

    pub fn write(&self, snapnum: SnapNum, records: &[PairRecord]) -> io::Result<PathBuf> {
        let path = self.path_for(snapnum);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let f = File::create(&path)?;

        if self.compress {
            // level 3 is a good default
            let mut zw = zstd::Encoder::new(f, 3)?;
            write_lines(&mut zw, records)?;
            zw.finish()?.sync_all()?;
        } else {
            let mut bw = BufWriter::new(f);
            write_lines(&mut bw, records)?;
            bw.flush()?;
        }
        info!(snapnum, n_pairs = records.len(), path = %path.display(), "wrote pairs");
        Ok(path)
    }
}

fn write_lines<W: Write>(w: &mut W, records: &[PairRecord]) -> io::Result<()> {
    for r in records {
        serde_json::to_writer(&mut *w, r).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        w.write_all(b"\n")?;
    }
    Ok(())
}

/// Read a file written by [`PairWriter`]; `.zst` files are decompressed.
pub fn read_records(path: &Path) -> io::Result<Vec<PairRecord>> {
    let f = File::open(path)?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|e| e == "zst") {
        Box::new(BufReader::new(zstd::Decoder::new(f)?))
    } else {
        Box::new(BufReader::new(f))
    };

    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?);
    }
    Ok(records)
}
