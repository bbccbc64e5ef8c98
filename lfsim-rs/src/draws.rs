//! Per-replicate random draw ingestion.
//!
//! Each replicate is driven by one row of an external parameter file plus an
//! optional seed and coverage-proportion row. All files are parsed once at
//! startup into lists indexed by replicate number.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{ConfigError, Result};

/// One calibration draw: fixed column order in the parameter file is
/// vector-to-host ratio, aggregation parameter, importation amplitude,
/// MDA-uptake proportion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSet {
    pub v_to_h: f64,
    pub k: f64,
    pub a_imp: f64,
    pub w_prop_mda: f64,
}

/// Everything drawn for a single replicate.
#[derive(Debug, Clone, Copy)]
pub struct ReplicateDraw<'a> {
    /// Seed from the seed file, or `None` when no file was given and the
    /// caller should fall back to an unpredictable source.
    pub seed: Option<u64>,
    /// Multiplier applied to declared MDA coverage. 1.0 when no file given.
    pub cov_prop: f64,
    /// Calibration series, one entry per calendar year of the row.
    pub series: &'a [ParameterSet],
}

#[derive(Debug)]
pub struct DrawSource {
    rows: Vec<Vec<ParameterSet>>,
    seeds: Option<Vec<u64>>,
    cov_props: Option<Vec<f64>>,
}

impl DrawSource {
    /// Reads the parameter file (mandatory) and the optional seed and
    /// coverage-proportion files. Any file with fewer rows than `replicates`
    /// is a fatal error before the first replicate runs.
    pub fn load(
        params_path: &Path,
        seed_path: Option<&Path>,
        cov_path: Option<&Path>,
        replicates: usize,
    ) -> Result<DrawSource> {
        let rows = read_parameter_rows(params_path, replicates)?;

        let seeds = match seed_path {
            Some(path) => Some(read_column(path, replicates, "seed")?),
            None => None,
        };
        let cov_props = match cov_path {
            Some(path) => Some(read_column(path, replicates, "coverage proportion")?),
            None => None,
        };

        Ok(DrawSource {
            rows,
            seeds,
            cov_props,
        })
    }

    pub fn draw(&self, rep: usize) -> ReplicateDraw<'_> {
        ReplicateDraw {
            seed: self.seeds.as_ref().map(|s| s[rep]),
            cov_prop: self.cov_props.as_ref().map(|c| c[rep]).unwrap_or(1.0),
            series: &self.rows[rep],
        }
    }
}

/// Parses the "multiple values per line" parameter format: each line holds
/// one replicate's calibration series, four whitespace-separated values per
/// calendar-year column.
///
/// A row whose value count differs from the previous row is reported with a
/// warning and the missing tail is carried over from the previous row rather
/// than aborting the run.
fn read_parameter_rows(path: &Path, replicates: usize) -> Result<Vec<Vec<ParameterSet>>> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows: Vec<Vec<ParameterSet>> = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let values: Vec<f64> = line
            .split_whitespace()
            .map_while(|tok| tok.parse::<f64>().ok())
            .collect();

        let mut sets: Vec<ParameterSet> = Vec::with_capacity(values.len() / 4);
        for chunk in values.chunks_exact(4) {
            sets.push(ParameterSet {
                v_to_h: chunk[0],
                k: chunk[1],
                a_imp: chunk[2],
                w_prop_mda: chunk[3],
            });
        }

        if let Some(prev) = rows.last() {
            if sets.len() != prev.len() {
                warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    expected = prev.len(),
                    found = sets.len(),
                    "number of input parameters has changed"
                );
                // Carry stale values forward so the row keeps its full width.
                if sets.len() < prev.len() {
                    sets.extend_from_slice(&prev[sets.len()..]);
                }
            }
        }

        if sets.is_empty() {
            return Err(ConfigError::Parse {
                path: path.to_path_buf(),
                line: lineno + 1,
                what: "parameter row",
                value: line.to_string(),
            });
        }
        rows.push(sets);
    }

    if rows.len() < replicates {
        return Err(ConfigError::TooShort {
            path: path.to_path_buf(),
            needed: replicates,
            found: rows.len(),
        });
    }
    Ok(rows)
}

/// Reads a single-column file (seeds or coverage proportions), one value per
/// line, checked against the requested replicate count.
fn read_column<T: std::str::FromStr>(
    path: &Path,
    replicates: usize,
    what: &'static str,
) -> Result<Vec<T>> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut values = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let tok = match line.split_whitespace().next() {
            Some(tok) => tok,
            None => continue,
        };
        let value = tok.parse::<T>().map_err(|_| ConfigError::Parse {
            path: path.to_path_buf(),
            line: lineno + 1,
            what,
            value: tok.to_string(),
        })?;
        values.push(value);
    }

    if values.len() < replicates {
        return Err(ConfigError::TooShort {
            path: path.to_path_buf(),
            needed: replicates,
            found: values.len(),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_four_values_per_year_column() {
        let params = write_file("10.0 0.3 1.5 0.8 11.0 0.4 1.2 0.7\n9.0 0.2 1.0 0.9\n");
        let source = DrawSource::load(params.path(), None, None, 2).unwrap();

        let draw = source.draw(0);
        assert_eq!(draw.series.len(), 2);
        assert_eq!(draw.series[0].v_to_h, 10.0);
        assert_eq!(draw.series[0].k, 0.3);
        assert_eq!(draw.series[0].a_imp, 1.5);
        assert_eq!(draw.series[0].w_prop_mda, 0.8);
        assert_eq!(draw.series[1].v_to_h, 11.0);
    }

    #[test]
    fn short_row_inherits_stale_tail() {
        let params = write_file("10.0 0.3 1.5 0.8 11.0 0.4 1.2 0.7\n9.0 0.2 1.0 0.9\n");
        let source = DrawSource::load(params.path(), None, None, 2).unwrap();

        let draw = source.draw(1);
        assert_eq!(draw.series.len(), 2);
        assert_eq!(draw.series[0].v_to_h, 9.0);
        // Second year column carried over from the first row.
        assert_eq!(draw.series[1].v_to_h, 11.0);
        assert_eq!(draw.series[1].w_prop_mda, 0.7);
    }

    #[test]
    fn undersized_parameter_file_is_fatal() {
        let params = write_file("10.0 0.3 1.5 0.8\n");
        let err = DrawSource::load(params.path(), None, None, 5).unwrap_err();
        match err {
            ConfigError::TooShort { needed, found, .. } => {
                assert_eq!(needed, 5);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn undersized_seed_file_is_fatal() {
        let params = write_file("10.0 0.3 1.5 0.8\n10.0 0.3 1.5 0.8\n");
        let seeds = write_file("12345\n");
        let err = DrawSource::load(params.path(), Some(seeds.path()), None, 2).unwrap_err();
        assert!(matches!(err, ConfigError::TooShort { needed: 2, found: 1, .. }));
    }

    #[test]
    fn missing_optional_files_fall_back_to_defaults() {
        let params = write_file("10.0 0.3 1.5 0.8\n");
        let source = DrawSource::load(params.path(), None, None, 1).unwrap();
        let draw = source.draw(0);
        assert_eq!(draw.seed, None);
        assert_eq!(draw.cov_prop, 1.0);
    }

    #[test]
    fn seed_and_coverage_files_are_indexed_by_replicate() {
        let params = write_file("10.0 0.3 1.5 0.8\n9.0 0.2 1.0 0.9\n");
        let seeds = write_file("111\n222\n");
        let covs = write_file("0.5\n0.75\n");
        let source =
            DrawSource::load(params.path(), Some(seeds.path()), Some(covs.path()), 2).unwrap();

        assert_eq!(source.draw(0).seed, Some(111));
        assert_eq!(source.draw(1).seed, Some(222));
        assert_eq!(source.draw(0).cov_prop, 0.5);
        assert_eq!(source.draw(1).cov_prop, 0.75);
    }

    #[test]
    fn unparsable_seed_reports_line() {
        let params = write_file("10.0 0.3 1.5 0.8\n");
        let seeds = write_file("111\nnot-a-seed\n");
        let err = DrawSource::load(params.path(), Some(seeds.path()), None, 1).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 2, .. }));
    }
}
