#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use dataset_manager::Config;
use image::{Rgb, RgbImage};
use serde_json::json;
use tempfile::TempDir;

/// A throwaway dataset root with the standard subtree.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("images/raw")).unwrap();
        fs::create_dir_all(dir.path().join("annotations/temp")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> Config {
        Config::new(self.root())
    }

    pub fn raw(&self, file_name: &str) -> PathBuf {
        self.root().join("images/raw").join(file_name)
    }

    pub fn temp(&self, file_name: &str) -> PathBuf {
        self.root().join("annotations/temp").join(file_name)
    }

    /// Write a small real image whose pixels depend on the file name, so no two
    /// fixture images share a checksum.
    pub fn add_image(&self, file_name: &str, width: u32, height: u32) -> PathBuf {
        let seed = file_name
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
        let [r, g, b, extra] = seed.to_le_bytes();
        let mut img = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        img.put_pixel(0, 0, Rgb([extra, r, g]));
        let path = self.raw(file_name);
        img.save(&path).unwrap();
        path
    }

    /// Write a temp-schema annotation with `(label, [x1, y1, x2, y2])` objects.
    pub fn add_annotation(
        &self,
        key: &str,
        width: u32,
        height: u32,
        objects: &[(&str, [f64; 4])],
    ) -> PathBuf {
        let bboxes: Vec<_> = objects
            .iter()
            .enumerate()
            .map(|(id, (label, bbox))| {
                json!({ "bbox": bbox, "category_id": id, "category": label })
            })
            .collect();
        let record = json!({
            "filename": format!("{}.jpg", key),
            "image_size": [height, width],
            "bboxes": bboxes,
            "timestamp": "2024-01-01T00:00:00",
        });
        self.write_annotation(&format!("{}.json", key), &record.to_string())
    }

    pub fn write_annotation(&self, file_name: &str, content: &str) -> PathBuf {
        let path = self.temp(file_name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Images a, b, c; a has an empty annotation, b one "ring", c none.
    pub fn ring_corpus() -> Self {
        let fixture = Self::new();
        for key in ["a", "b", "c"] {
            fixture.add_image(&format!("{}.jpg", key), 64, 48);
        }
        fixture.add_annotation("a", 64, 48, &[]);
        fixture.add_annotation("b", 64, 48, &[("ring", [8.0, 6.0, 40.0, 30.0])]);
        fixture
    }

    /// `n` annotated png images named `img_000`, `img_001`, ...
    pub fn annotated_corpus(n: usize, labels: &[&str]) -> Self {
        let fixture = Self::new();
        for i in 0..n {
            let key = format!("img_{:03}", i);
            fixture.add_image(&format!("{}.png", key), 32, 32);
            let label = labels[i % labels.len()];
            fixture.add_annotation(&key, 32, 32, &[(label, [2.0, 2.0, 20.0, 24.0])]);
        }
        fixture
    }
}

/// Relative path and bytes of every file below `dir`, sorted.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    collect(dir, dir, &mut files);
    files.sort();
    files
}

fn collect(base: &Path, dir: &Path, files: &mut Vec<(PathBuf, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(base, &path, files);
        } else {
            let relative = path.strip_prefix(base).unwrap().to_path_buf();
            files.push((relative, fs::read(&path).unwrap()));
        }
    }
}

pub fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    snapshot(dir).len()
}
