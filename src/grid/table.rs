//! Prediction table persistence.
//!
//! The table is the hand-off point between the classifier and the ratio
//! analysis. It is a plain CSV file:
//!
//! ```text
//! patch,class,true_label,prob_0,prob_1,prob_2
//! 1024_2048,1,-1,0.05,0.90,0.05
//! ```
//!
//! Columns are located by name. Only `patch` and `class` are required;
//! `true_label` and any `prob_*` columns are carried through unchanged and
//! other columns are ignored. Fields are never quoted.

use std::fs;
use std::path::Path;

use crate::error::{IoError, TableError};

use super::classification::{ClassificationGrid, Label};
use super::coord::TileCoord;

/// One classified tile.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub coord: TileCoord,
    pub label: Label,
    pub true_label: Option<String>,
    pub probabilities: Vec<f64>,
}

impl PredictionRecord {
    pub fn new(coord: TileCoord, label: Label) -> Self {
        Self {
            coord,
            label,
            true_label: None,
            probabilities: Vec::new(),
        }
    }

    pub fn with_probabilities(mut self, probabilities: Vec<f64>) -> Self {
        self.probabilities = probabilities;
        self
    }
}

/// All predictions of one slide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionTable {
    pub records: Vec<PredictionRecord>,
}

impl PredictionTable {
    pub fn new(records: Vec<PredictionRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load a table from disk.
    ///
    /// A missing file is reported as [`TableError::MissingClassificationData`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| match IoError::from_std(path, e) {
            IoError::NotFound(path) => TableError::MissingClassificationData { path },
            other => TableError::Io(other),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TableError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
            .filter(|(_, l)| !l.trim().is_empty());

        let (_, header) = lines.next().ok_or(TableError::MissingColumn("patch"))?;
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let find = |name: &'static str| {
            columns
                .iter()
                .position(|c| *c == name)
                .ok_or(TableError::MissingColumn(name))
        };
        let patch_col = find("patch")?;
        let class_col = find("class")?;
        let true_col = columns.iter().position(|c| *c == "true_label");
        let mut prob_cols: Vec<(usize, usize)> = columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                c.strip_prefix("prob_")
                    .and_then(|n| n.parse::<usize>().ok())
                    .map(|n| (n, i))
            })
            .collect();
        prob_cols.sort_unstable();

        let mut records = Vec::new();
        for (line, row) in lines {
            let fields: Vec<&str> = row.split(',').map(str::trim).collect();
            let field = |col: usize| {
                fields.get(col).copied().ok_or_else(|| TableError::Malformed {
                    line,
                    message: format!("expected {} fields, found {}", columns.len(), fields.len()),
                })
            };

            let coord: TileCoord = field(patch_col)?.parse().map_err(|e| TableError::Malformed {
                line,
                message: format!("{}", e),
            })?;
            let label = parse_label(field(class_col)?).ok_or_else(|| TableError::Malformed {
                line,
                message: format!("unknown class '{}'", fields[class_col]),
            })?;
            let true_label = match true_col {
                Some(col) => Some(field(col)?.to_string()),
                None => None,
            };
            let probabilities = prob_cols
                .iter()
                .map(|&(_, col)| {
                    let raw = field(col)?;
                    raw.parse::<f64>().map_err(|_| TableError::Malformed {
                        line,
                        message: format!("invalid probability '{}'", raw),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            records.push(PredictionRecord {
                coord,
                label,
                true_label,
                probabilities,
            });
        }

        Ok(Self { records })
    }

    /// Render as CSV. Probability columns are sized to the widest record.
    pub fn to_csv(&self) -> String {
        let prob_count = self
            .records
            .iter()
            .map(|r| r.probabilities.len())
            .max()
            .unwrap_or(0);
        let with_truth = self.records.iter().any(|r| r.true_label.is_some());

        let mut header = vec!["patch".to_string(), "class".to_string()];
        if with_truth {
            header.push("true_label".to_string());
        }
        header.extend((0..prob_count).map(|i| format!("prob_{}", i)));

        let mut out = header.join(",");
        out.push('\n');
        for record in &self.records {
            let mut fields = vec![record.coord.to_string(), record.label.index().to_string()];
            if with_truth {
                fields.push(record.true_label.clone().unwrap_or_else(|| "-1".to_string()));
            }
            fields.extend(
                (0..prob_count).map(|i| {
                    record
                        .probabilities
                        .get(i)
                        .map(|p| p.to_string())
                        .unwrap_or_default()
                }),
            );
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), TableError> {
        let path = path.as_ref();
        fs::write(path, self.to_csv()).map_err(|e| TableError::Io(IoError::from_std(path, e)))
    }

    /// Classification grid with the lattice spacing inferred from the coordinates.
    pub fn to_grid(&self) -> ClassificationGrid {
        self.records.iter().map(|r| (r.coord, r.label)).collect()
    }

    /// Classification grid on a known lattice spacing.
    pub fn to_grid_with_step(&self, step: i64) -> ClassificationGrid {
        let mut grid = self.to_grid();
        grid.set_step(step);
        grid
    }

    /// Overwrite record labels with those of `grid` (e.g. after denoising).
    ///
    /// Returns the number of records whose label changed.
    pub fn apply_grid(&mut self, grid: &ClassificationGrid) -> usize {
        let mut changed = 0;
        for record in &mut self.records {
            if let Some(label) = grid.get(&record.coord) {
                if label != record.label {
                    record.label = label;
                    changed += 1;
                }
            }
        }
        changed
    }
}

/// Class as its numeric value (`"1"`, `"1.0"`) or its name (`"stroma"`).
fn parse_label(raw: &str) -> Option<Label> {
    if let Ok(value) = raw.parse::<f64>() {
        if value.fract() == 0.0 {
            return Label::from_index(value as i64);
        }
        return None;
    }
    match raw.to_ascii_lowercase().as_str() {
        "other" => Some(Label::Other),
        "stroma" => Some(Label::Stroma),
        "tumor" => Some(Label::Tumor),
        "unknown" => Some(Label::Unknown),
        _ => None,
    }
}
