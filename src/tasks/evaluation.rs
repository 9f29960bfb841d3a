//! Accuracy assessment.
//!
//! Two entry points: reference labels from an ROI mask compared against a
//! class map, or a table of sampled points with reference and classified
//! values. Both end in a confusion matrix with overall accuracy and Kappa.
//!
//! A class map with a sample count instead draws random pixels into
//! `random_samples.csv`, with `CLASSIFIED` left at -1 for labelling.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use serde::Serialize;

use crate::error::{TableError, TaskError};
use crate::params::{EvaluationParams, EvaluationSource, ReportFormat};
use crate::table::Table;
use crate::tasks::{ensure_dir, load_raster, save_text};
use crate::worker::{Task, TaskContext, TaskFamily};

const TRUE_COLUMNS: [&str; 2] = ["true_label", "CLASSIFIED"];
const PREDICTED_COLUMNS: [&str; 2] = ["predicted_label", "RASTERVALU"];
/// Reference value marking an unlabelled sample row.
const UNLABELLED: i64 = -1;
const SAMPLE_COLUMNS: [&str; 5] = ["OBJECTID", "CLASSIFIED", "RASTERVALU", "row", "col"];

/// Counts indexed `[reference][predicted]` over the sorted union of classes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    classes: Vec<i64>,
    counts: Vec<Vec<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ConfusionMatrix {
    pub fn from_pairs(reference: &[i64], predicted: &[i64]) -> Self {
        let mut classes: Vec<i64> = reference.iter().chain(predicted).copied().collect();
        classes.sort_unstable();
        classes.dedup();
        let position: BTreeMap<i64, usize> =
            classes.iter().enumerate().map(|(i, c)| (*c, i)).collect();

        let mut counts = vec![vec![0u64; classes.len()]; classes.len()];
        for (r, p) in reference.iter().zip(predicted) {
            counts[position[r]][position[p]] += 1;
        }
        Self { classes, counts }
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn counts(&self) -> &[Vec<u64>] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    fn diagonal(&self) -> u64 {
        (0..self.classes.len()).map(|i| self.counts[i][i]).sum()
    }

    fn row_sum(&self, i: usize) -> u64 {
        self.counts[i].iter().sum()
    }

    fn col_sum(&self, j: usize) -> u64 {
        self.counts.iter().map(|row| row[j]).sum()
    }

    pub fn overall_accuracy(&self) -> f64 {
        ratio(self.diagonal(), self.total())
    }

    /// Cohen's Kappa. Degenerate chance agreement (`pe == 1`) yields 1.0
    /// for perfect agreement and 0.0 otherwise.
    pub fn kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let po = self.overall_accuracy();
        let pe: f64 = (0..self.classes.len())
            .map(|i| self.row_sum(i) as f64 * self.col_sum(i) as f64)
            .sum::<f64>()
            / (total * total);
        if (1.0 - pe).abs() < f64::EPSILON {
            return if po >= 1.0 { 1.0 } else { 0.0 };
        }
        (po - pe) / (1.0 - pe)
    }

    pub fn scores(&self, i: usize) -> ClassScores {
        let hit = self.counts[i][i];
        let precision = ratio(hit, self.col_sum(i));
        let recall = ratio(hit, self.row_sum(i));
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassScores {
            precision,
            recall,
            f1,
        }
    }

    pub fn macro_average(&self) -> ClassScores {
        let n = self.classes.len().max(1) as f64;
        let (p, r, f) = (0..self.classes.len())
            .map(|i| self.scores(i))
            .fold((0.0, 0.0, 0.0), |(p, r, f), s| {
                (p + s.precision, r + s.recall, f + s.f1)
            });
        ClassScores {
            precision: p / n,
            recall: r / n,
            f1: f / n,
        }
    }

    /// Matrix as a table with a labelled header row and column.
    fn to_table(&self, names: &[String]) -> Table {
        let mut headers = vec!["reference\\predicted".to_string()];
        headers.extend(names.iter().cloned());
        let rows = names
            .iter()
            .zip(&self.counts)
            .map(|(name, row)| {
                std::iter::once(name.clone())
                    .chain(row.iter().map(u64::to_string))
                    .collect()
            })
            .collect();
        Table::new(headers, rows)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

#[derive(Debug, Serialize)]
struct ClassReport {
    class: i64,
    name: String,
    support: u64,
    #[serde(flatten)]
    scores: ClassScores,
}

#[derive(Debug, Serialize)]
struct Report {
    samples: u64,
    classes: Vec<String>,
    confusion_matrix: Vec<Vec<u64>>,
    overall_accuracy: f64,
    kappa: f64,
    per_class: Vec<ClassReport>,
    macro_avg: ClassScores,
}

impl Report {
    fn new(matrix: &ConfusionMatrix, names: &[String]) -> Self {
        Self {
            samples: matrix.total(),
            classes: names.to_vec(),
            confusion_matrix: matrix.counts.clone(),
            overall_accuracy: matrix.overall_accuracy(),
            kappa: matrix.kappa(),
            per_class: matrix
                .classes
                .iter()
                .enumerate()
                .map(|(i, class)| ClassReport {
                    class: *class,
                    name: names[i].clone(),
                    support: matrix.row_sum(i),
                    scores: matrix.scores(i),
                })
                .collect(),
            macro_avg: matrix.macro_average(),
        }
    }

    fn render_text(&self, matrix_table: &Table, per_class: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Accuracy evaluation report");
        let _ = writeln!(out, "Samples: {}", self.samples);
        let _ = writeln!(out, "Overall accuracy (OA): {:.4}", self.overall_accuracy);
        let _ = writeln!(out, "Kappa: {:.4}", self.kappa);
        let _ = writeln!(out);
        let _ = writeln!(out, "Confusion matrix (rows: reference, columns: predicted)");
        let width = matrix_table
            .headers()
            .iter()
            .chain(matrix_table.rows().iter().flatten())
            .map(|c| c.len())
            .max()
            .unwrap_or(0);
        for row in std::iter::once(matrix_table.headers()).chain(matrix_table.rows().iter().map(Vec::as_slice)) {
            let cells: Vec<String> = row.iter().map(|c| format!("{c:>width$}")).collect();
            let _ = writeln!(out, "{}", cells.join("  "));
        }
        if per_class {
            let _ = writeln!(out);
            let _ = writeln!(out, "{:<16} {:>9} {:>9} {:>9} {:>9}", "class", "precision", "recall", "f1", "support");
            for c in &self.per_class {
                let _ = writeln!(
                    out,
                    "{:<16} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                    c.name, c.scores.precision, c.scores.recall, c.scores.f1, c.support
                );
            }
            let m = &self.macro_avg;
            let _ = writeln!(
                out,
                "{:<16} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                "macro avg", m.precision, m.recall, m.f1, self.samples
            );
        }
        out
    }
}

/// Reference and predicted labels from a sample table.
fn read_samples(path: &Path) -> Result<(Vec<i64>, Vec<i64>), TableError> {
    let table = Table::read(path)?;
    let truth = table
        .column(&TRUE_COLUMNS)
        .ok_or_else(|| TableError::MissingColumn(TRUE_COLUMNS.join("/")))?;
    let predicted = table
        .column(&PREDICTED_COLUMNS)
        .ok_or_else(|| TableError::MissingColumn(PREDICTED_COLUMNS.join("/")))?;

    let parse = |cell: &str, line: usize| -> Result<i64, TableError> {
        cell.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.round() as i64)
            .ok_or_else(|| TableError::Parse {
                line,
                message: format!("'{cell}' is not a class value"),
            })
    };

    let mut reference = Vec::new();
    let mut classified = Vec::new();
    for (i, row) in table.rows().iter().enumerate() {
        // header is line 1
        let line = i + 2;
        let r = parse(&row[truth], line)?;
        if r == UNLABELLED {
            continue;
        }
        reference.push(r);
        classified.push(parse(&row[predicted], line)?);
    }
    if reference.is_empty() {
        return Err(TableError::NoLabelledRows);
    }
    Ok((reference, classified))
}

pub struct EvaluationTask {
    params: EvaluationParams,
}

impl EvaluationTask {
    pub fn new(params: EvaluationParams) -> Self {
        Self { params }
    }

    fn class_names(&self, matrix: &ConfusionMatrix) -> Vec<String> {
        matrix
            .classes
            .iter()
            .map(|c| {
                self.params
                    .label_names
                    .get(&c.to_string())
                    .cloned()
                    .unwrap_or_else(|| c.to_string())
            })
            .collect()
    }

    fn from_class_map(
        &self,
        ctx: &mut TaskContext,
        class_map: &Path,
        roi_mask: &Path,
    ) -> Result<String, TaskError> {
        let dir = &self.params.output_dir;

        ctx.step(format!("Loading class map {}", class_map.display()));
        let class_map = load_raster(ctx, class_map)?;
        ctx.checkpoint()?;
        ctx.step(format!("Loading ROI mask {}", roi_mask.display()));
        let mask = load_raster(ctx, roi_mask)?;
        if mask.shape() != class_map.shape() {
            return Err(TaskError::InvalidInput(format!(
                "ROI mask {:?} does not match class map {:?}",
                mask.shape(),
                class_map.shape()
            )));
        }

        ctx.checkpoint()?;
        ctx.step("Extracting samples");
        let (reference, predicted): (Vec<i64>, Vec<i64>) = mask
            .data()
            .iter()
            .zip(class_map.data())
            .filter(|(m, _)| **m > 0.0)
            .map(|(m, c)| (m.round() as i64, c.round() as i64))
            .unzip();
        if reference.is_empty() {
            return Err(TaskError::InvalidInput(
                "ROI mask contains no samples".to_string(),
            ));
        }
        ctx.log(format!("Valid samples: {}", reference.len()));

        ctx.checkpoint()?;
        ctx.step("Computing confusion matrix");
        let matrix = ConfusionMatrix::from_pairs(&reference, &predicted);
        let names = self.class_names(&matrix);
        let table = matrix.to_table(&names);
        save_text(ctx, dir.join("confusion_matrix.csv"), &table.render())?;

        ctx.step("Computing OA and Kappa");
        let report = Report::new(&matrix, &names);
        ctx.log(format!("Overall accuracy (OA): {:.4}", report.overall_accuracy));
        ctx.log(format!("Kappa: {:.4}", report.kappa));

        ctx.checkpoint()?;
        ctx.step("Writing report");
        save_text(
            ctx,
            dir.join("evaluation_report.txt"),
            &report.render_text(&table, false),
        )?;

        Ok(format!(
            "Evaluation finished: OA {:.4}, Kappa {:.4}",
            report.overall_accuracy, report.kappa
        ))
    }

    fn generate_samples(
        &self,
        ctx: &mut TaskContext,
        class_map: &Path,
        count: usize,
        seed: u64,
    ) -> Result<String, TaskError> {
        ctx.step(format!("Loading class map {}", class_map.display()));
        let class_map = load_raster(ctx, class_map)?;
        let (h, w) = class_map.dims2()?;
        let count = count.min(h * w);
        if count == 0 {
            return Err(TaskError::InvalidInput("class map is empty".to_string()));
        }

        ctx.checkpoint()?;
        ctx.step(format!("Drawing {count} random samples"));
        let mut rng = StdRng::seed_from_u64(seed);
        let rows = index::sample(&mut rng, h * w, count)
            .into_iter()
            .enumerate()
            .map(|(n, pixel)| {
                vec![
                    (n + 1).to_string(),
                    UNLABELLED.to_string(),
                    (class_map.data()[pixel].round() as i64).to_string(),
                    (pixel / w).to_string(),
                    (pixel % w).to_string(),
                ]
            })
            .collect();
        let table = Table::new(SAMPLE_COLUMNS.map(String::from).to_vec(), rows);

        ctx.checkpoint()?;
        let path = self.params.output_dir.join("random_samples.csv");
        table.write(&path)?;
        ctx.log(format!("Saved {}", path.display()));
        ctx.output(path);

        Ok(format!("Generated {count} random sample(s)"))
    }

    fn from_samples(&self, ctx: &mut TaskContext, samples: &Path) -> Result<String, TaskError> {
        let p = &self.params;

        ctx.step(format!("Reading samples {}", samples.display()));
        let (reference, predicted) = read_samples(samples)?;
        ctx.log(format!("Labelled samples: {}", reference.len()));

        ctx.checkpoint()?;
        ctx.step("Computing confusion matrix");
        let matrix = ConfusionMatrix::from_pairs(&reference, &predicted);
        let names = self.class_names(&matrix);
        let table = matrix.to_table(&names);
        let report = Report::new(&matrix, &names);
        ctx.log(format!("Overall accuracy (OA): {:.4}", report.overall_accuracy));
        ctx.log(format!("Kappa: {:.4}", report.kappa));
        ctx.log(format!("Macro F1: {:.4}", report.macro_avg.f1));

        for format in &p.formats {
            ctx.checkpoint()?;
            match format {
                ReportFormat::Csv => {
                    save_text(ctx, p.output_dir.join(format!("{}.csv", p.prefix)), &table.render())?
                }
                ReportFormat::Json => {
                    let json = serde_json::to_string_pretty(&report)
                        .map_err(|e| TaskError::InvalidInput(format!("report: {e}")))?;
                    save_text(ctx, p.output_dir.join(format!("{}.json", p.prefix)), &json)?
                }
                ReportFormat::Txt => save_text(
                    ctx,
                    p.output_dir.join(format!("{}_report.txt", p.prefix)),
                    &report.render_text(&table, true),
                )?,
                ReportFormat::Png => ctx.log("png output skipped: image rendering is not available"),
            }
        }

        Ok(format!(
            "Sample evaluation finished: OA {:.4}, Kappa {:.4}",
            report.overall_accuracy, report.kappa
        ))
    }
}

impl Task for EvaluationTask {
    fn family(&self) -> TaskFamily {
        TaskFamily::Evaluation
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError> {
        ctx.step("Creating output directory");
        ensure_dir(ctx, &self.params.output_dir)?;
        match self.params.source() {
            Some(EvaluationSource::Samples(samples)) => self.from_samples(ctx, samples),
            Some(EvaluationSource::ClassMap {
                class_map,
                roi_mask,
            }) => self.from_class_map(ctx, class_map, roi_mask),
            Some(EvaluationSource::GenerateSamples {
                class_map,
                count,
                seed,
            }) => self.generate_samples(ctx, class_map, count, seed),
            None => Err(TaskError::InvalidInput(
                "evaluation needs samples_file, or class_map_path with roi_mask_path or num_samples"
                    .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::raster::Raster;
    use crate::tasks::test_support::run;
    use crate::worker::TaskStatus;

    fn params(dir: &Path) -> EvaluationParams {
        EvaluationParams {
            class_map_path: None,
            roi_mask_path: None,
            samples_file: None,
            num_samples: None,
            seed: 42,
            label_names: BTreeMap::new(),
            formats: vec![ReportFormat::Csv, ReportFormat::Json, ReportFormat::Txt],
            prefix: "confusion_matrix".to_string(),
            output_dir: dir.join("evaluation"),
        }
    }

    #[test]
    fn perfect_agreement() {
        let m = ConfusionMatrix::from_pairs(&[1, 2, 2, 3], &[1, 2, 2, 3]);
        assert_eq!(m.classes(), [1, 2, 3]);
        assert_eq!(m.overall_accuracy(), 1.0);
        assert_eq!(m.kappa(), 1.0);
        assert_eq!(m.macro_average().f1, 1.0);
    }

    #[test]
    fn kappa_known_value() {
        // reference 1,1,2,2 predicted 1,2,2,2: po = 0.75, pe = 0.5*0.25 + 0.5*0.75 = 0.5
        let m = ConfusionMatrix::from_pairs(&[1, 1, 2, 2], &[1, 2, 2, 2]);
        assert_eq!(m.counts(), [vec![1, 1], vec![0, 2]]);
        assert!((m.overall_accuracy() - 0.75).abs() < 1e-12);
        assert!((m.kappa() - 0.5).abs() < 1e-12);
        let s = m.scores(0);
        assert_eq!(s.precision, 1.0);
        assert_eq!(s.recall, 0.5);
    }

    #[test]
    fn single_class_degenerate_kappa() {
        let m = ConfusionMatrix::from_pairs(&[4, 4], &[4, 4]);
        assert_eq!(m.kappa(), 1.0);
    }

    fn sample_rows(dir: &Path, count: usize, seed: u64) -> (Table, Raster) {
        let map_path = dir.join("class_map.npy");
        let class_map = Raster::new(vec![3, 4], (0..12).map(|v| (v % 3) as f64).collect()).unwrap();
        class_map.save(&map_path).unwrap();
        let mut p = params(dir);
        p.class_map_path = Some(map_path);
        p.num_samples = Some(count);
        p.seed = seed;

        let (_, result) = run(&EvaluationTask::new(p));
        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert_eq!(result.outputs(), [dir.join("evaluation/random_samples.csv")]);
        (Table::read(&result.outputs()[0]).unwrap(), class_map)
    }

    #[test]
    fn random_samples_drawn_from_class_map() {
        let dir = tempfile::tempdir().unwrap();
        let (table, class_map) = sample_rows(dir.path(), 5, 42);

        assert_eq!(table.headers(), SAMPLE_COLUMNS);
        assert_eq!(table.rows().len(), 5);
        let mut pixels = Vec::new();
        for (n, row) in table.rows().iter().enumerate() {
            assert_eq!(row[0], (n + 1).to_string());
            assert_eq!(row[1], "-1");
            let (r, c): (usize, usize) = (row[3].parse().unwrap(), row[4].parse().unwrap());
            let value = class_map.data()[r * 4 + c] as i64;
            assert_eq!(row[2], value.to_string());
            pixels.push((r, c));
        }
        pixels.sort_unstable();
        pixels.dedup();
        assert_eq!(pixels.len(), 5);
    }

    #[test]
    fn random_samples_repeat_for_a_seed() {
        let (a, b, c) = (
            tempfile::tempdir().unwrap(),
            tempfile::tempdir().unwrap(),
            tempfile::tempdir().unwrap(),
        );
        let first = sample_rows(a.path(), 6, 7).0;
        let again = sample_rows(b.path(), 6, 7).0;
        let other = sample_rows(c.path(), 6, 8).0;
        assert_eq!(first.rows(), again.rows());
        assert_ne!(first.rows(), other.rows());
    }

    #[test]
    fn sample_count_capped_at_pixel_count() {
        let dir = tempfile::tempdir().unwrap();
        let (table, _) = sample_rows(dir.path(), 100, 42);
        assert_eq!(table.rows().len(), 12);
    }

    #[test]
    fn generated_samples_feed_sample_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let (table, _) = sample_rows(dir.path(), 4, 42);
        // label every sample with its mapped class
        let labelled = Table::new(
            table.headers().to_vec(),
            table
                .rows()
                .iter()
                .map(|row| {
                    let mut row = row.clone();
                    row[1] = row[2].clone();
                    row
                })
                .collect(),
        );
        let samples = dir.path().join("labelled.csv");
        labelled.write(&samples).unwrap();
        let mut p = params(dir.path());
        p.samples_file = Some(samples);

        let (_, result) = run(&EvaluationTask::new(p));
        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert!(result.logs().iter().any(|l| l == "Overall accuracy (OA): 1.0000"));
    }

    fn write_samples(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("samples.csv");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn samples_table_with_legacy_columns() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(
            dir.path(),
            "FID,CLASSIFIED,RASTERVALU\n0,1,1\n1,2,2\n2,-1,1\n3,2,1\n",
        );
        let mut p = params(dir.path());
        p.samples_file = Some(samples);
        p.formats.push(ReportFormat::Png);
        p.label_names.insert("1".to_string(), "water".to_string());

        let (_, result) = run(&EvaluationTask::new(p));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        let names: Vec<String> = result
            .outputs()
            .iter()
            .map(|o| o.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["confusion_matrix.csv", "confusion_matrix.json", "confusion_matrix_report.txt"]
        );
        assert!(result.logs().iter().any(|l| l.contains("png output skipped")));
        assert!(result.logs().iter().any(|l| l == "Labelled samples: 3"));

        let csv = std::fs::read_to_string(&result.outputs()[0]).unwrap();
        assert_eq!(csv, "reference\\predicted,water,2\nwater,1,0\n2,1,1\n");

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&result.outputs()[1]).unwrap()).unwrap();
        assert_eq!(json["samples"], 3);
        assert_eq!(json["per_class"][0]["name"], "water");
        assert!(json["macro_avg"]["f1"].is_number());
    }

    #[test]
    fn all_rows_unlabelled_fails() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(dir.path(), "true_label,predicted_label\n-1,1\n-1,2\n");
        let mut p = params(dir.path());
        p.samples_file = Some(samples);
        let (_, result) = run(&EvaluationTask::new(p));
        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.message().contains("no labelled rows"));
    }

    #[test]
    fn non_finite_class_value_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(dir.path(), "true_label,predicted_label\n1,1\n2,nan\n");
        let mut p = params(dir.path());
        p.samples_file = Some(samples);
        let (_, result) = run(&EvaluationTask::new(p));
        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.message().contains("Line 3"), "{}", result.message());
        assert!(result.message().contains("'nan' is not a class value"));
    }

    #[test]
    fn missing_column_named() {
        let dir = tempfile::tempdir().unwrap();
        let samples = write_samples(dir.path(), "true_label,other\n1,1\n");
        let mut p = params(dir.path());
        p.samples_file = Some(samples);
        let (_, result) = run(&EvaluationTask::new(p));
        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.message().contains("predicted_label/RASTERVALU"));
    }

    #[test]
    fn class_map_against_roi_mask() {
        let dir = tempfile::tempdir().unwrap();
        let class_map = dir.path().join("class_map.npy");
        let mask = dir.path().join("mask.npy");
        Raster::new(vec![2, 2], vec![1.0, 2.0, 2.0, 1.0])
            .unwrap()
            .save(&class_map)
            .unwrap();
        Raster::new(vec![2, 2], vec![1.0, 2.0, 0.0, 2.0])
            .unwrap()
            .save(&mask)
            .unwrap();
        let mut p = params(dir.path());
        p.class_map_path = Some(class_map);
        p.roi_mask_path = Some(mask);

        let (progress, result) = run(&EvaluationTask::new(p));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert_eq!(
            progress.iter().filter(|m| !m.starts_with("Loading")).cloned().collect::<Vec<_>>(),
            [
                "Creating output directory",
                "Extracting samples",
                "Computing confusion matrix",
                "Computing OA and Kappa",
                "Writing report"
            ]
        );
        assert!(result.outputs()[0].ends_with("confusion_matrix.csv"));
        assert!(result.outputs()[1].ends_with("evaluation_report.txt"));
        assert!(result.logs().iter().any(|l| l == "Valid samples: 3"));
        assert!(result.logs().iter().any(|l| l == "Overall accuracy (OA): 0.6667"));

        let report = std::fs::read_to_string(&result.outputs()[1]).unwrap();
        assert!(report.contains("Samples: 3"));
    }

    #[test]
    fn mismatched_mask_fails() {
        let dir = tempfile::tempdir().unwrap();
        let class_map = dir.path().join("class_map.npy");
        let mask = dir.path().join("mask.npy");
        Raster::zeros(vec![2, 2]).save(&class_map).unwrap();
        Raster::zeros(vec![3, 2]).save(&mask).unwrap();
        let mut p = params(dir.path());
        p.class_map_path = Some(class_map);
        p.roi_mask_path = Some(mask);

        let (_, result) = run(&EvaluationTask::new(p));
        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.message().contains("does not match"));
    }
}
