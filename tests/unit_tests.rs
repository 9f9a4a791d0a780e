#[cfg(test)]
mod tests {
    use clap::Parser;
    use dataset_manager::annotation::{parse_yolo_lines, AnnotationDocument};
    use dataset_manager::config::{validate_size, Args};
    use dataset_manager::conversion::{calculate_bounding_box, convert_to_yolo_format};
    use dataset_manager::error::EngineError;
    use dataset_manager::export::ClassMap;
    use dataset_manager::io::{create_dataset_yaml, setup_yolo_output_directories};
    use dataset_manager::split::{partition_sizes, split, SplitCandidate, SplitConfig, SplitRatios};
    use dataset_manager::types::{
        AnnotationFormat, AnnotationRecord, BoundingBox, ImageRecord, ImageSize, ObjectAnnotation,
        Partition, PixelBox, ViolationKind,
    };
    use dataset_manager::validate::check_objects;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;

    fn pixel(x1: f64, y1: f64, x2: f64, y2: f64) -> BoundingBox {
        BoundingBox::Pixel(PixelBox { x1, y1, x2, y2 })
    }

    fn record(objects: &[(&str, BoundingBox)]) -> AnnotationRecord {
        AnnotationRecord {
            key: "image".to_string(),
            format: AnnotationFormat::Temp,
            objects: objects
                .iter()
                .map(|(label, bbox)| ObjectAnnotation {
                    class_label: label.to_string(),
                    bbox: *bbox,
                })
                .collect(),
            declared_size: Some(ImageSize::new(100, 100)),
        }
    }

    fn candidates(n: usize) -> Vec<SplitCandidate> {
        (0..n)
            .map(|i| SplitCandidate {
                key: format!("image{}", i),
                stratum: None,
            })
            .collect()
    }

    fn config(val: f64, test: f64, seed: u64) -> SplitConfig {
        SplitConfig {
            ratios: SplitRatios::new(val, test).unwrap(),
            seed,
            stratified: false,
        }
    }

    #[test]
    fn test_validate_size() {
        assert!(validate_size("0.5").is_ok());
        assert!(validate_size("1.0").is_ok());
        assert!(validate_size("0.0").is_ok());
        assert!(validate_size("-0.1").is_err());
        assert!(validate_size("1.1").is_err());
        assert!(validate_size("abc").is_err());
    }

    #[test]
    fn test_args_to_config() {
        let args = Args::try_parse_from([
            "dataset-manager",
            "clean",
            "-d",
            "some/root",
            "--remove-orphans",
            "--quarantine",
            "--val-size",
            "0.25",
        ])
        .unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(config.layout.root(), PathBuf::from("some/root").as_path());
        assert!(config.clean.remove_orphan_images);
        assert_eq!(
            config.clean.act_on,
            BTreeSet::from([ViolationKind::OrphanImage, ViolationKind::OrphanAnnotation])
        );
        assert_eq!(config.split.ratios.val, 0.25);
        assert_eq!(config.split.seed, 42);
        assert!(config.show_progress);

        let args = Args::try_parse_from([
            "dataset-manager",
            "clean",
            "--act-on",
            "orphan_annotation,malformed_annotation",
        ])
        .unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(
            config.clean.act_on,
            BTreeSet::from([
                ViolationKind::OrphanAnnotation,
                ViolationKind::MalformedAnnotation
            ])
        );

        assert!(Args::try_parse_from(["dataset-manager", "split", "--val-size", "1.5"]).is_err());
        assert!(Args::try_parse_from(["dataset-manager", "shuffle"]).is_err());

        let args = Args::try_parse_from([
            "dataset-manager",
            "split",
            "--val-size",
            "0.6",
            "--test-size",
            "0.5",
        ])
        .unwrap();
        assert!(matches!(args.to_config(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_calculate_bounding_box() {
        let size = ImageSize::new(100, 100);
        let (x_center, y_center, width, height) =
            calculate_bounding_box(&pixel(10.0, 10.0, 20.0, 20.0), size);

        assert_eq!(x_center, 0.15);
        assert_eq!(y_center, 0.15);
        assert_eq!(width, 0.1);
        assert_eq!(height, 0.1);
    }

    #[test]
    fn test_convert_to_yolo_format() {
        let annotation = record(&[
            ("test", pixel(10.0, 10.0, 20.0, 20.0)),
            ("other", pixel(0.0, 50.0, 100.0, 100.0)),
        ]);
        let class_map = ClassMap::build(&["test".to_string()], &["other".to_string()]);

        let yolo_data =
            convert_to_yolo_format(&annotation, ImageSize::new(100, 100), &class_map).unwrap();

        assert_eq!(
            yolo_data,
            "0 0.150000 0.150000 0.100000 0.100000\n1 0.500000 0.750000 1.000000 0.500000\n"
        );
    }

    #[test]
    fn test_convert_to_yolo_format_unknown_label() {
        let annotation = record(&[("missing", pixel(10.0, 10.0, 20.0, 20.0))]);
        let class_map = ClassMap::build(&[], &["test".to_string()]);
        assert!(convert_to_yolo_format(&annotation, ImageSize::new(100, 100), &class_map).is_err());
    }

    #[test]
    fn test_bbox_round_trip() {
        let size = ImageSize::new(640, 480);
        let original = PixelBox {
            x1: 12.5,
            y1: 30.0,
            x2: 200.25,
            y2: 479.0,
        };
        let back = original.to_yolo(size).to_pixel(size);
        for (a, b) in [
            (original.x1, back.x1),
            (original.y1, back.y1),
            (original.x2, back.x2),
            (original.y2, back.y2),
        ] {
            assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
        }
    }

    #[test]
    fn test_class_map_pins_labels_first() {
        let observed = vec!["ring".to_string(), "necklace".to_string(), "ring".to_string()];
        let class_map = ClassMap::build(&["bracelet".to_string(), "necklace".to_string()], &observed);
        assert_eq!(class_map.names(), ["bracelet", "necklace", "ring"]);
        assert_eq!(class_map.id_of("ring"), Some(2));
        assert_eq!(class_map.id_of("watch"), None);
    }

    #[test]
    fn test_partition_sizes() {
        let sizes = partition_sizes(10, &SplitRatios::default()).unwrap();
        assert_eq!(sizes[&Partition::Train], 8);
        assert_eq!(sizes[&Partition::Val], 2);
        assert!(!sizes.contains_key(&Partition::Test));

        let sizes = partition_sizes(5, &SplitRatios::new(0.2, 0.2).unwrap()).unwrap();
        assert_eq!(
            (sizes[&Partition::Train], sizes[&Partition::Val], sizes[&Partition::Test]),
            (3, 1, 1)
        );

        // Positive ratios always get at least one record
        let sizes = partition_sizes(3, &SplitRatios::new(0.1, 0.0).unwrap()).unwrap();
        assert_eq!((sizes[&Partition::Train], sizes[&Partition::Val]), (2, 1));

        // Train is never left empty
        let sizes = partition_sizes(2, &SplitRatios::new(0.9, 0.0).unwrap()).unwrap();
        assert_eq!((sizes[&Partition::Train], sizes[&Partition::Val]), (1, 1));

        let sizes = partition_sizes(7, &SplitRatios::new(0.3, 0.3).unwrap()).unwrap();
        assert_eq!(sizes.values().sum::<usize>(), 7);
    }

    #[test]
    fn test_split_annotations() {
        let candidates = candidates(5);
        let assignment = split(&candidates, &config(0.2, 0.2, 42)).unwrap();

        assert_eq!(assignment.keys_in(Partition::Train).len(), 3);
        assert_eq!(assignment.keys_in(Partition::Val).len(), 1);
        assert_eq!(assignment.keys_in(Partition::Test).len(), 1);
        assert!(assignment.covers_exactly(&candidates));
    }

    #[test]
    fn test_split_is_deterministic() {
        let forward = candidates(50);
        let mut reversed = forward.clone();
        reversed.reverse();

        let first = split(&forward, &config(0.2, 0.1, 7)).unwrap();
        let second = split(&reversed, &config(0.2, 0.1, 7)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.keys_in(Partition::Val).len(), 10);
        assert_eq!(first.keys_in(Partition::Test).len(), 5);
        assert_eq!(first.keys_in(Partition::Train).len(), 35);
    }

    #[test]
    fn test_split_insufficient_data() {
        let result = split(&candidates(1), &config(0.2, 0.0, 42));
        assert!(matches!(
            result,
            Err(EngineError::InsufficientData {
                available: 1,
                requested: 2
            })
        ));

        let result = split(&candidates(2), &config(0.2, 0.2, 42));
        assert!(matches!(
            result,
            Err(EngineError::InsufficientData {
                available: 2,
                requested: 3
            })
        ));
    }

    #[test]
    fn test_stratified_split_balances_groups() {
        let candidates: Vec<SplitCandidate> = (0..20)
            .map(|i| SplitCandidate {
                key: format!("image{:02}", i),
                stratum: Some(if i % 2 == 0 { "ring" } else { "necklace" }.to_string()),
            })
            .collect();
        let config = SplitConfig {
            stratified: true,
            ..config(0.2, 0.0, 3)
        };

        let assignment = split(&candidates, &config).unwrap();
        let val = assignment.keys_in(Partition::Val);
        assert_eq!(val.len(), 4);
        let rings = val
            .iter()
            .filter(|key| key[5..].parse::<usize>().unwrap() % 2 == 0)
            .count();
        assert_eq!(rings, 2);
        assert_eq!(split(&candidates, &config).unwrap(), assignment);
    }

    #[test]
    fn test_parse_yolo_lines() {
        let lines = parse_yolo_lines("0 0.5 0.5 0.25 0.25\n\n2 0.1 0.2 0.05 0.1\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].class_id, 2);
        assert_eq!(lines[1].bbox.cy, 0.2);

        assert!(parse_yolo_lines("0 0.5 0.5 0.25\n").is_err());
        assert!(parse_yolo_lines("ring 0.5 0.5 0.25 0.25\n").is_err());
    }

    #[test]
    fn test_temp_schema_parsing() {
        let value = serde_json::json!({
            "filename": "ring_0001_20240101_120000.jpg",
            "image_size": [480, 640],
            "bboxes": [
                {"bbox": [10, 20, 110, 220], "category_id": 0, "category": "ring"},
                {"bbox": [300, 40, 420, 200], "category_id": 1, "category": "necklace"}
            ],
            "bbox": [],
            "category": "ring"
        });
        let document = AnnotationDocument::from_json(value).unwrap();
        assert_eq!(document.format(), AnnotationFormat::Temp);
        let record = document.into_record("ring_0001_20240101_120000", None).unwrap();
        assert_eq!(record.objects.len(), 2);
        assert_eq!(record.objects[1].class_label, "necklace");
        assert_eq!(record.declared_size, Some(ImageSize::new(640, 480)));

        // Single-box form written by the collector
        let value = serde_json::json!({"bbox": [1, 2, 3, 4], "category": "earring"});
        let record = AnnotationDocument::from_json(value)
            .unwrap()
            .into_record("k", None)
            .unwrap();
        assert_eq!(record.objects[0].class_label, "earring");

        let value = serde_json::json!({"bbox": [1, 2, 3], "category": "earring"});
        assert!(AnnotationDocument::from_json(value)
            .unwrap()
            .into_record("k", None)
            .is_err());

        let value = serde_json::json!({"bboxes": [{"bbox": "wide", "category": "ring"}]});
        assert!(AnnotationDocument::from_json(value).is_err());
    }

    #[test]
    fn test_coco_record_parsing() {
        let value = serde_json::json!({
            "images": [{"id": 7, "file_name": "photo.jpg", "width": 200, "height": 100}],
            "annotations": [{"image_id": 7, "category_id": 3, "bbox": [10, 10, 50, 40]}],
            "categories": [{"id": 3, "name": "watch"}]
        });
        let record = AnnotationDocument::from_json(value)
            .unwrap()
            .into_record("photo", None)
            .unwrap();
        assert_eq!(record.format, AnnotationFormat::Coco);
        assert_eq!(record.objects[0].class_label, "watch");
        assert_eq!(
            record.objects[0].bbox,
            pixel(10.0, 10.0, 60.0, 50.0)
        );
    }

    #[test]
    fn test_dominant_label() {
        let tie = record(&[
            ("ring", pixel(0.0, 0.0, 1.0, 1.0)),
            ("bracelet", pixel(0.0, 0.0, 1.0, 1.0)),
        ]);
        assert_eq!(tie.dominant_label().as_deref(), Some("bracelet"));

        let majority = record(&[
            ("ring", pixel(0.0, 0.0, 1.0, 1.0)),
            ("bracelet", pixel(0.0, 0.0, 1.0, 1.0)),
            ("ring", pixel(0.0, 0.0, 1.0, 1.0)),
        ]);
        assert_eq!(majority.dominant_label().as_deref(), Some("ring"));
        assert_eq!(record(&[]).dominant_label(), None);
    }

    #[test]
    fn test_check_objects() {
        let size = Some(ImageSize::new(100, 100));
        assert!(check_objects(&record(&[("ring", pixel(0.0, 0.0, 100.0, 100.0))]), size).is_ok());
        assert!(check_objects(&record(&[("ring", pixel(-0.4, 0.0, 100.3, 50.0))]), size).is_ok());
        assert!(check_objects(&record(&[("ring", pixel(0.0, 0.0, 120.0, 50.0))]), size).is_err());
        assert!(check_objects(&record(&[("ring", pixel(30.0, 0.0, 20.0, 50.0))]), size).is_err());
        assert!(check_objects(&record(&[("", pixel(0.0, 0.0, 10.0, 10.0))]), size).is_err());
    }

    #[test]
    fn test_captured_at_from_file_name() {
        let image = ImageRecord::new(
            "ring_0001_20240315_101112".to_string(),
            PathBuf::from("ring_0001_20240315_101112.jpg"),
            0,
            None,
        );
        let captured = image.captured_at().unwrap();
        assert_eq!(captured.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-15 10:11:12");

        let image = ImageRecord::new("photo".to_string(), PathBuf::from("photo.jpg"), 0, None);
        assert!(image.captured_at().is_none());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            EngineError::StorageUnavailable {
                path: PathBuf::from("x"),
                reason: String::new(),
            },
            EngineError::MalformedRecord {
                key: "k".to_string(),
                path: PathBuf::from("k.json"),
                detail: String::new(),
            },
            EngineError::InsufficientData {
                available: 1,
                requested: 2,
            },
            EngineError::ExportIncomplete {
                partition: "train".to_string(),
                key: "k".to_string(),
                detail: String::new(),
            },
            EngineError::ReconcileConflict {
                kind: ViolationKind::DuplicateImage,
                keys: vec![],
            },
            EngineError::BackupFailed {
                destination: PathBuf::from("b"),
                detail: String::new(),
            },
            EngineError::InvalidConfig(String::new()),
        ];
        let codes: BTreeSet<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
        assert!(!codes.contains(&2));
    }

    #[test]
    fn test_create_dataset_yaml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let staging = temp_dir.path().join(".yolo_dataset.partial");
        let final_dir = temp_dir.path().join("yolo_dataset");

        let output_dirs =
            setup_yolo_output_directories(&staging, &[Partition::Train, Partition::Val]).unwrap();
        let class_map = ClassMap::build(&[], &["test".to_string()]);
        create_dataset_yaml(&output_dirs, &final_dir, &class_map).unwrap();

        let yaml_content = fs::read_to_string(staging.join("dataset.yaml")).unwrap();

        assert!(yaml_content.contains("path:"));
        assert!(yaml_content.contains("yolo_dataset\n"));
        assert!(yaml_content.contains("train: images/train"));
        assert!(yaml_content.contains("val: images/val"));
        assert!(yaml_content.contains("test:\n"));
        assert!(yaml_content.contains("nc: 1"));
        assert!(yaml_content.contains("names:"));
        assert!(yaml_content.contains("0: test"));
        assert!(staging.join("labels/train").is_dir());
        assert!(staging.join("images/val").is_dir());
    }
}
