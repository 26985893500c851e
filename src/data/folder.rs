use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use log::debug;

use super::dataset::Dataset;
use super::transform::Transform;
use crate::error::{ParallelErr, Result};

/// A sample read from an [`ImageFolder`].
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample<X> {
    pub input: X,
    /// The label's class index, as given by the mapping.
    pub class: usize,
    pub label: String,
}

/// A directory of image files labeled by a sibling `stem,label` file.
///
/// Each file's raw bytes are fed to the transform pipeline, which is where
/// decoding and augmentation happen.
pub struct ImageFolder<T> {
    paths: Vec<PathBuf>,
    labels: Vec<String>,
    mapping: HashMap<String, usize>,
    transform: T,
}

impl<T> ImageFolder<T>
where
    T: Transform<Vec<u8>>,
{
    /// Indexes every file in `dir` and pairs it with its label.
    ///
    /// Files are indexed in name order so every participant agrees on the indices.
    ///
    /// # Args
    /// * `dir` - The directory holding the image files.
    /// * `label_file` - Two comma separated columns: a file stem and its label.
    /// * `mapping` - Label to class index.
    /// * `transform` - The per-sample pipeline.
    ///
    /// # Errors
    /// Fails on I/O errors, malformed label rows, files without a label and
    /// labels missing from `mapping`.
    pub fn new(
        dir: impl AsRef<Path>,
        label_file: impl AsRef<Path>,
        mapping: HashMap<String, usize>,
        transform: T,
    ) -> Result<Self> {
        let table = read_labels(label_file.as_ref())?;

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let labels = paths
            .iter()
            .map(|path| {
                let stem = file_stem(path);
                let label = table
                    .get(stem)
                    .ok_or_else(|| ParallelErr::MissingLabel { stem: stem.into() })?;

                if !mapping.contains_key(label) {
                    return Err(ParallelErr::UnknownLabel {
                        label: label.clone(),
                    });
                }

                Ok(label.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(files = paths.len(), classes = mapping.len(); "indexed image folder");

        Ok(Self {
            paths,
            labels,
            mapping,
            transform,
        })
    }

    #[inline]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    #[inline]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl<T> Dataset for ImageFolder<T>
where
    T: Transform<Vec<u8>>,
    T::Out: Send,
{
    type Item = LabeledSample<T::Out>;

    #[inline]
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn get(&self, idx: usize) -> Result<Self::Item> {
        let (path, label) = self
            .paths
            .get(idx)
            .zip(self.labels.get(idx))
            .ok_or(ParallelErr::IndexOutOfBounds {
                index: idx,
                len: self.len(),
            })?;

        let class = *self
            .mapping
            .get(label)
            .ok_or_else(|| ParallelErr::UnknownLabel {
                label: label.clone(),
            })?;

        let input = self.transform.apply(fs::read(path)?)?;

        Ok(LabeledSample {
            input,
            class,
            label: label.clone(),
        })
    }
}

/// The file name up to its first dot.
fn file_stem(path: &Path) -> &str {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.split('.').next().unwrap_or(name)
}

fn read_labels(path: &Path) -> Result<HashMap<String, String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut table = HashMap::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (stem, label) = line.split_once(',').ok_or_else(|| {
            ParallelErr::InvalidConfig(format!(
                "{}:{}: expected `stem,label`, got {line:?}",
                path.display(),
                lineno + 1
            ))
        })?;

        table.insert(stem.trim().to_string(), label.trim().to_string());
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transform::{Identity, TransformExt};

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(files: &[(&str, &[u8])], labels: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir(dir.path().join("images")).unwrap();
            for (name, bytes) in files {
                fs::write(dir.path().join("images").join(name), bytes).unwrap();
            }
            fs::write(dir.path().join("labels.csv"), labels).unwrap();
            Self { dir }
        }

        fn images(&self) -> PathBuf {
            self.dir.path().join("images")
        }

        fn labels(&self) -> PathBuf {
            self.dir.path().join("labels.csv")
        }
    }

    fn mapping() -> HashMap<String, usize> {
        HashMap::from([("benign".to_string(), 0), ("malignant".to_string(), 1)])
    }

    #[test]
    fn folder_pairs_files_with_labels_in_name_order() {
        let fx = Fixture::new(
            &[("b.jpg", &b"bb"[..]), ("a.jpg", &b"a"[..]), ("c.v2.png", &b"ccc"[..])],
            "a,benign\nb,malignant\n\nc,benign\n",
        );

        let ds = ImageFolder::new(fx.images(), fx.labels(), mapping(), Identity).unwrap();

        assert_eq!(ds.len(), 3);
        assert_eq!(ds.labels(), &["benign", "malignant", "benign"]);

        let sample = ds.get(1).unwrap();
        assert_eq!(sample.input, b"bb".to_vec());
        assert_eq!(sample.class, 1);
        assert_eq!(sample.label, "malignant");
    }

    #[test]
    fn folder_applies_transform_pipeline() {
        let fx = Fixture::new(&[("x.jpg", &b"abcd"[..])], "x,benign");
        let pipeline = (|bytes: Vec<u8>| -> Result<Vec<u8>> { Ok(bytes) })
            .then(|bytes: Vec<u8>| -> Result<usize> { Ok(bytes.len()) });

        let ds = ImageFolder::new(fx.images(), fx.labels(), mapping(), pipeline).unwrap();
        assert_eq!(ds.get(0).unwrap().input, 4);
    }

    #[test]
    fn folder_rejects_file_without_label() {
        let fx = Fixture::new(&[("x.jpg", &b""[..])], "y,benign");
        let res = ImageFolder::new(fx.images(), fx.labels(), mapping(), Identity);
        assert!(matches!(res, Err(ParallelErr::MissingLabel { stem }) if stem == "x"));
    }

    #[test]
    fn folder_rejects_unmapped_label() {
        let fx = Fixture::new(&[("x.jpg", &b""[..])], "x,unknown");
        let res = ImageFolder::new(fx.images(), fx.labels(), mapping(), Identity);
        assert!(matches!(res, Err(ParallelErr::UnknownLabel { label }) if label == "unknown"));
    }

    #[test]
    fn folder_rejects_malformed_label_row() {
        let fx = Fixture::new(&[("x.jpg", &b""[..])], "x benign");
        let res = ImageFolder::new(fx.images(), fx.labels(), mapping(), Identity);
        assert!(matches!(res, Err(ParallelErr::InvalidConfig(_))));
    }

    #[test]
    fn folder_get_out_of_bounds() {
        let fx = Fixture::new(&[("x.jpg", &b""[..])], "x,benign");
        let ds = ImageFolder::new(fx.images(), fx.labels(), mapping(), Identity).unwrap();
        assert!(matches!(ds.get(1), Err(ParallelErr::IndexOutOfBounds { .. })));
    }
}
