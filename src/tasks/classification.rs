//! Pixel classification: unsupervised k-means and supervised minimum
//! distance, with optional comparison against reference labels.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;

use crate::error::TaskError;
use crate::params::{ClassificationParams, Classifier, KmeansParams};
use crate::raster::Raster;
use crate::tasks::{ensure_dir, load_raster, save_raster};
use crate::worker::{Task, TaskContext, TaskFamily};

/// Feature rows plus the shape a class map takes.
struct Samples {
    rows: Vec<Vec<f64>>,
    map_shape: Vec<usize>,
}

impl Samples {
    fn from_raster(features: &Raster) -> Result<Self, TaskError> {
        let (map_shape, count, width) = match features.shape() {
            &[h, w, f] => (vec![h, w], h * w, f),
            &[n, f] => (vec![n], n, f),
            other => {
                return Err(TaskError::InvalidInput(format!(
                    "features must be (h, w, f) or (n, f), found {other:?}"
                )));
            }
        };
        if count == 0 || width == 0 {
            return Err(TaskError::InvalidInput("feature array is empty".to_string()));
        }
        let rows = features
            .data()
            .chunks_exact(width)
            .map(<[f64]>::to_vec)
            .collect::<Vec<_>>();
        debug_assert_eq!(rows.len(), count);
        Ok(Self { rows, map_shape })
    }
}

fn distance2(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(row: &[f64], centers: &[Vec<f64>]) -> usize {
    centers
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance2(row, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i)
}

fn mean_of<'a>(rows: impl Iterator<Item = &'a Vec<f64>>, width: usize) -> Option<Vec<f64>> {
    let mut sum = vec![0.0; width];
    let mut n = 0usize;
    for row in rows {
        for (s, v) in sum.iter_mut().zip(row) {
            *s += v;
        }
        n += 1;
    }
    (n > 0).then(|| sum.into_iter().map(|s| s / n as f64).collect())
}

/// Lloyd's k-means. Classes are numbered `1..=k`.
fn kmeans(
    ctx: &TaskContext,
    samples: &Samples,
    params: &KmeansParams,
) -> Result<Vec<f64>, TaskError> {
    let rows = &samples.rows;
    if rows.len() < params.k {
        return Err(TaskError::InvalidInput(format!(
            "kmeans needs at least k={} samples, found {}",
            params.k,
            rows.len()
        )));
    }
    let width = rows[0].len();
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centers: Vec<Vec<f64>> = index::sample(&mut rng, rows.len(), params.k)
        .into_iter()
        .map(|i| rows[i].clone())
        .collect();
    let mut assignment: Vec<usize> = rows.iter().map(|r| nearest(r, &centers)).collect();

    for _ in 0..params.max_iter {
        ctx.checkpoint()?;
        for (c, center) in centers.iter_mut().enumerate() {
            let members = rows
                .iter()
                .zip(&assignment)
                .filter(|(_, a)| **a == c)
                .map(|(r, _)| r);
            // An empty cluster keeps its previous center.
            if let Some(mean) = mean_of(members, width) {
                *center = mean;
            }
        }
        let next: Vec<usize> = rows.iter().map(|r| nearest(r, &centers)).collect();
        if next == assignment {
            break;
        }
        assignment = next;
    }
    Ok(assignment.into_iter().map(|a| (a + 1) as f64).collect())
}

/// Nearest class mean, with means taken over labelled samples.
fn minimum_distance(samples: &Samples, labels: &[f64]) -> Result<Vec<f64>, TaskError> {
    let width = samples.rows[0].len();
    let mut classes: Vec<f64> = labels.iter().copied().filter(|l| *l > 0.0).collect();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    if classes.is_empty() {
        return Err(TaskError::InvalidInput(
            "minimum_distance needs at least one labelled sample".to_string(),
        ));
    }
    let centers = classes
        .iter()
        .map(|class| {
            let members = samples
                .rows
                .iter()
                .zip(labels)
                .filter(|(_, l)| *l == class)
                .map(|(r, _)| r);
            mean_of(members, width).unwrap_or_else(|| vec![0.0; width])
        })
        .collect::<Vec<_>>();
    Ok(samples
        .rows
        .iter()
        .map(|r| classes[nearest(r, &centers)])
        .collect())
}

/// Fraction of labelled samples whose prediction equals the label.
fn agreement(predicted: &[f64], labels: &[f64]) -> Option<f64> {
    let (hits, total) = predicted
        .iter()
        .zip(labels)
        .filter(|(_, l)| **l > 0.0)
        .fold((0usize, 0usize), |(hits, total), (p, l)| {
            (hits + usize::from(p == l), total + 1)
        });
    (total > 0).then(|| hits as f64 / total as f64)
}

pub struct ClassificationTask {
    params: ClassificationParams,
}

impl ClassificationTask {
    pub fn new(params: ClassificationParams) -> Self {
        Self { params }
    }
}

impl Task for ClassificationTask {
    fn family(&self) -> TaskFamily {
        TaskFamily::Classification
    }

    fn execute(&self, ctx: &mut TaskContext) -> Result<String, TaskError> {
        let p = &self.params;
        ensure_dir(ctx, &p.output_dir)?;

        ctx.step(format!("Loading features {}", p.data.features.display()));
        let features = load_raster(ctx, &p.data.features)?;
        let samples = Samples::from_raster(&features)?;

        let labels = match &p.data.labels {
            Some(path) => {
                let labels = load_raster(ctx, path)?;
                if labels.len() != samples.rows.len() {
                    return Err(TaskError::InvalidInput(format!(
                        "labels {:?} do not match {} samples",
                        labels.shape(),
                        samples.rows.len()
                    )));
                }
                Some(labels.into_data())
            }
            None => None,
        };

        let classifiers = &p.pipeline_config.classifiers;
        let mut scores: Vec<(String, f64)> = Vec::new();
        for (i, classifier) in classifiers.iter().enumerate() {
            ctx.checkpoint()?;
            let name = classifier.name();
            // Repeated classifiers are told apart by pipeline position.
            let label = if classifiers.iter().filter(|c| c.name() == name).count() > 1 {
                format!("{name}_{}", i + 1)
            } else {
                name.to_string()
            };
            ctx.step(format!("Running {label}"));
            let predicted = match classifier {
                Classifier::Kmeans(params) => kmeans(ctx, &samples, params)?,
                Classifier::MinimumDistance => {
                    let labels = labels.as_deref().ok_or_else(|| {
                        TaskError::InvalidInput(format!("{name} requires labels"))
                    })?;
                    minimum_distance(&samples, labels)?
                }
            };

            if let Some(score) = labels.as_deref().and_then(|l| agreement(&predicted, l)) {
                scores.push((label.clone(), score));
            }
            let class_map = Raster::new(samples.map_shape.clone(), predicted)?;
            save_raster(ctx, &class_map, p.output_dir.join(format!("{label}_class_map.npy")))?;
        }

        if p.pipeline_config.compare {
            if scores.is_empty() {
                ctx.log("Comparison skipped: no labelled samples");
            } else {
                for (name, score) in &scores {
                    ctx.log(format!("{name}: agreement {score:.4}"));
                }
                if let Some((best, score)) = scores.iter().max_by(|a, b| a.1.total_cmp(&b.1)) {
                    ctx.log(format!("Best classifier: {best} ({score:.4})"));
                }
            }
        }

        Ok(format!(
            "Classification finished with {} classifier(s)",
            p.pipeline_config.classifiers.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::params::{ClassificationData, PipelineConfig};
    use crate::tasks::test_support::run;
    use crate::worker::TaskStatus;

    /// Two well separated groups on a 2x4 grid with two features.
    fn write_features(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let mut data = Vec::new();
        for i in 0..8 {
            if i % 4 < 2 {
                data.extend([0.0 + i as f64 * 0.01, 0.0]);
            } else {
                data.extend([10.0 + i as f64 * 0.01, 10.0]);
            }
        }
        let features = dir.join("features.npy");
        Raster::new(vec![2, 4, 2], data).unwrap().save(&features).unwrap();

        let labels = dir.join("labels.npy");
        Raster::new(vec![2, 4], vec![1.0, 0.0, 2.0, 0.0, 1.0, 0.0, 2.0, 2.0])
            .unwrap()
            .save(&labels)
            .unwrap();
        (features, labels)
    }

    fn params(dir: &Path, labels: Option<std::path::PathBuf>, classifiers: Vec<Classifier>) -> ClassificationParams {
        let (features, _) = write_features(dir);
        ClassificationParams {
            data: ClassificationData { features, labels },
            pipeline_config: PipelineConfig {
                classifiers,
                compare: true,
            },
            output_dir: dir.join("classification"),
        }
    }

    #[test]
    fn kmeans_separates_groups() {
        let dir = tempfile::tempdir().unwrap();
        let kmeans = Classifier::Kmeans(KmeansParams {
            k: 2,
            max_iter: 50,
            seed: 7,
        });
        let (_, result) = run(&ClassificationTask::new(params(dir.path(), None, vec![kmeans])));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert!(result.outputs()[0].ends_with("classification/kmeans_class_map.npy"));
        let map = Raster::load(&result.outputs()[0]).unwrap();
        assert_eq!(map.shape(), [2, 4]);
        let d = map.data();
        assert_eq!(d[0], d[1]);
        assert_eq!(d[2], d[3]);
        assert_ne!(d[0], d[2]);
        assert!(d.iter().all(|c| *c == 1.0 || *c == 2.0));
        assert!(result.logs().iter().any(|l| l.contains("Comparison skipped")));
    }

    #[test]
    fn minimum_distance_compared_with_labels() {
        let dir = tempfile::tempdir().unwrap();
        let (_, labels) = write_features(dir.path());
        let classifiers = vec![
            Classifier::Kmeans(KmeansParams {
                k: 2,
                max_iter: 50,
                seed: 1,
            }),
            Classifier::MinimumDistance,
        ];
        let (_, result) = run(&ClassificationTask::new(params(dir.path(), Some(labels), classifiers)));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert_eq!(result.outputs().len(), 2);
        let map = Raster::load(&result.outputs()[1]).unwrap();
        assert_eq!(map.data(), [1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);
        assert!(result.logs().iter().any(|l| l == "minimum_distance: agreement 1.0000"));
        assert!(result.logs().iter().any(|l| l.starts_with("Best classifier:")));
    }

    #[test]
    fn repeated_classifier_outputs_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let (_, labels) = write_features(dir.path());
        let classifiers = vec![
            Classifier::Kmeans(KmeansParams {
                k: 2,
                max_iter: 50,
                seed: 3,
            }),
            Classifier::Kmeans(KmeansParams {
                k: 4,
                max_iter: 50,
                seed: 3,
            }),
        ];
        let (_, result) = run(&ClassificationTask::new(params(dir.path(), Some(labels), classifiers)));

        assert_eq!(result.status(), TaskStatus::Success, "{}", result.message());
        assert!(result.outputs()[0].ends_with("classification/kmeans_1_class_map.npy"));
        assert!(result.outputs()[1].ends_with("classification/kmeans_2_class_map.npy"));
        let first = Raster::load(&result.outputs()[0]).unwrap();
        assert!(first.data().iter().all(|c| *c <= 2.0));
        assert!(result.logs().iter().any(|l| l.starts_with("kmeans_1: agreement")));
        assert!(result.logs().iter().any(|l| l.starts_with("kmeans_2: agreement")));
    }

    #[test]
    fn too_few_samples_for_k() {
        let dir = tempfile::tempdir().unwrap();
        let kmeans = Classifier::Kmeans(KmeansParams {
            k: 9,
            max_iter: 10,
            seed: 0,
        });
        let (_, result) = run(&ClassificationTask::new(params(dir.path(), None, vec![kmeans])));
        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.message().contains("k=9"));
    }

    #[test]
    fn label_count_mismatch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("short.npy");
        Raster::zeros(vec![3]).save(&labels).unwrap();
        let (_, result) = run(&ClassificationTask::new(params(
            dir.path(),
            Some(labels),
            vec![Classifier::MinimumDistance],
        )));
        assert_eq!(result.status(), TaskStatus::Failure);
        assert!(result.message().contains("do not match"));
    }
}
